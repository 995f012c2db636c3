// Copyright (c) 2019-present Dmitry Stepanov and Fyrox Engine contributors.
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Skeleton description: a bone hierarchy with bind-pose transforms.

use crate::math::Transform;
use nalgebra::Matrix4;
use std::sync::Arc;

/// A single bone of a skeleton.
#[derive(Clone, Debug, PartialEq)]
pub struct SkeletonNode {
    /// Name of the bone. Clips and graph nodes reference bones by name.
    pub name: String,
    /// Index of the parent bone, or `-1` for a root bone.
    pub parent: i32,
    /// Local-space bind (rest) transform of the bone.
    pub local_bind: Transform,
}

/// A bone hierarchy shared between graphs, clips and instances. Read-only
/// during evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Skeleton {
    nodes: Vec<SkeletonNode>,
}

/// Shared handle to a skeleton.
pub type SkeletonResource = Arc<Skeleton>;

impl Skeleton {
    /// Creates a skeleton from a list of bones. Bones must be ordered so a
    /// parent always precedes its children.
    pub fn new(nodes: Vec<SkeletonNode>) -> Self {
        Self { nodes }
    }

    /// Returns the bones of the skeleton.
    #[inline]
    pub fn nodes(&self) -> &[SkeletonNode] {
        &self.nodes
    }

    /// Returns the amount of bones in the skeleton.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Searches a bone by its name, returns `-1` if there is no such bone.
    pub fn find_node(&self, name: &str) -> i32 {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(|i| i as i32)
            .unwrap_or(-1)
    }

    /// Computes the world-space (model-space) matrix of a bone from a set
    /// of local transforms by walking up the parent chain.
    pub fn world_matrix(&self, locals: &[Transform], index: usize) -> Matrix4<f32> {
        let mut matrix = locals[index].matrix();
        let mut parent = self.nodes[index].parent;
        while parent != -1 {
            matrix = locals[parent as usize].matrix() * matrix;
            parent = self.nodes[parent as usize].parent;
        }
        matrix
    }

    /// Computes the world-space bind matrix of a bone.
    pub fn bind_world_matrix(&self, index: usize) -> Matrix4<f32> {
        let mut matrix = self.nodes[index].local_bind.matrix();
        let mut parent = self.nodes[index].parent;
        while parent != -1 {
            matrix = self.nodes[parent as usize].local_bind.matrix() * matrix;
            parent = self.nodes[parent as usize].parent;
        }
        matrix
    }

    /// Computes the world-space bind matrix of a bone's parent, or identity
    /// for a root bone.
    pub fn parent_bind_world_matrix(&self, index: usize) -> Matrix4<f32> {
        let parent = self.nodes[index].parent;
        if parent == -1 {
            Matrix4::identity()
        } else {
            self.bind_world_matrix(parent as usize)
        }
    }
}

/// A named set of bones used to limit blending to a part of a skeleton
/// (upper body, a single arm and so on).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkeletonMask {
    /// Stable identifier of the mask asset.
    pub id: uuid::Uuid,
    /// Name of the mask.
    pub name: String,
    /// Names of the bones included in the mask.
    pub bones: Vec<String>,
}

/// Shared handle to a skeleton mask.
pub type SkeletonMaskResource = Arc<SkeletonMask>;

impl SkeletonMask {
    /// Resolves the mask against a skeleton, producing a per-bone filter
    /// sized to the skeleton.
    pub fn build_filter(&self, skeleton: &Skeleton) -> Vec<bool> {
        skeleton
            .nodes()
            .iter()
            .map(|node| self.bones.iter().any(|bone| *bone == node.name))
            .collect()
    }
}

/// Per-bone mapping of a target skeleton onto a source skeleton, matched by
/// bone name. `None` means the target bone has no counterpart and holds its
/// bind pose.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkeletonMapping {
    nodes: Vec<Option<usize>>,
}

impl SkeletonMapping {
    /// Builds a mapping from every bone of `target` to the bone of `source`
    /// with the same name.
    pub fn new(source: &Skeleton, target: &Skeleton) -> Self {
        Self {
            nodes: target
                .nodes()
                .iter()
                .map(|node| {
                    let index = source.find_node(&node.name);
                    (index >= 0).then_some(index as usize)
                })
                .collect(),
        }
    }

    /// Returns the source bone index mapped to the given target bone.
    #[inline]
    pub fn source_of(&self, target_index: usize) -> Option<usize> {
        self.nodes.get(target_index).copied().flatten()
    }

    /// Returns the amount of mapped target bones.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the mapping is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use nalgebra::{UnitQuaternion, Vector3};

    /// A tiny root -> spine -> head chain used across evaluator tests.
    pub fn test_skeleton() -> Skeleton {
        Skeleton::new(vec![
            SkeletonNode {
                name: "root".to_string(),
                parent: -1,
                local_bind: Transform::IDENTITY,
            },
            SkeletonNode {
                name: "spine".to_string(),
                parent: 0,
                local_bind: Transform::new(
                    Vector3::new(0.0, 1.0, 0.0),
                    UnitQuaternion::identity(),
                    Vector3::new(1.0, 1.0, 1.0),
                ),
            },
            SkeletonNode {
                name: "head".to_string(),
                parent: 1,
                local_bind: Transform::new(
                    Vector3::new(0.0, 0.5, 0.0),
                    UnitQuaternion::identity(),
                    Vector3::new(1.0, 1.0, 1.0),
                ),
            },
        ])
    }

    #[test]
    fn test_find_node() {
        let skeleton = test_skeleton();
        assert_eq!(skeleton.find_node("root"), 0);
        assert_eq!(skeleton.find_node("head"), 2);
        assert_eq!(skeleton.find_node("tail"), -1);
    }

    #[test]
    fn test_bind_world_matrix_accumulates_parents() {
        let skeleton = test_skeleton();
        let head = skeleton.bind_world_matrix(2);
        assert!((head[(1, 3)] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_mapping_by_name() {
        let skeleton = test_skeleton();
        let reordered = Skeleton::new(vec![
            SkeletonNode {
                name: "head".to_string(),
                parent: -1,
                local_bind: Transform::IDENTITY,
            },
            SkeletonNode {
                name: "pelvis".to_string(),
                parent: 0,
                local_bind: Transform::IDENTITY,
            },
        ]);
        let mapping = SkeletonMapping::new(&skeleton, &reordered);
        assert_eq!(mapping.source_of(0), Some(2));
        assert_eq!(mapping.source_of(1), None);
    }
}
