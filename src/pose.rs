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

//! A skeletal pose: per-bone local transforms plus the root motion delta
//! and the playback position of whatever was sampled to produce it.

use crate::{math::Transform, skeleton::Skeleton};

/// A pose flowing between graph nodes. The bone array is always sized to
/// the base skeleton of the graph. `position` and `length` describe the
/// playback of the sampled source so downstream blend nodes know how to
/// average time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelPose {
    /// Local-space transforms, one per bone of the base skeleton.
    pub nodes: Vec<Transform>,
    /// Root motion extracted from the sampled clips, as a delta for the
    /// current tick.
    pub root_motion: Transform,
    /// Playback position of the sampled source, in seconds.
    pub position: f32,
    /// Length of the sampled source, in seconds.
    pub length: f32,
}

impl ModelPose {
    /// Fills the pose with the bind pose of the given skeleton and resets
    /// root motion and playback info.
    pub fn init_from_bind(&mut self, skeleton: &Skeleton) {
        self.nodes.clear();
        self.nodes
            .extend(skeleton.nodes().iter().map(|n| n.local_bind));
        self.root_motion = Transform::IDENTITY;
        self.position = 0.0;
        self.length = 0.0;
    }

    /// Copies bone transforms and playback info from another pose.
    pub fn copy_from(&mut self, other: &ModelPose) {
        self.nodes.clear();
        self.nodes.extend_from_slice(&other.nodes);
        self.root_motion = other.root_motion;
        self.position = other.position;
        self.length = other.length;
    }

    /// Fills this pose with a blend of two other poses, including root
    /// motion and playback info.
    pub fn blend_from(&mut self, a: &ModelPose, b: &ModelPose, alpha: f32) {
        self.nodes.clear();
        self.nodes.extend(
            a.nodes
                .iter()
                .zip(b.nodes.iter())
                .map(|(ta, tb)| ta.lerp(tb, alpha)),
        );
        self.root_motion = a.root_motion.lerp(&b.root_motion, alpha);
        self.position = crate::math::lerpf(a.position, b.position, alpha);
        self.length = crate::math::lerpf(a.length, b.length, alpha);
    }

    /// Normalizes all bone rotations. Weighted and additive blending
    /// accumulate raw quaternions which drift off unit length.
    pub fn normalize_rotations(&mut self, include_root_motion: bool) {
        for node in self.nodes.iter_mut() {
            node.normalize_rotation();
        }
        if include_root_motion {
            self.root_motion.normalize_rotation();
        }
    }

    /// Computes the model-space transform of a bone by combining the local
    /// transforms up the parent chain.
    pub fn model_transform(&self, skeleton: &Skeleton, index: usize) -> Transform {
        let mut transform = self.nodes[index];
        let mut parent = skeleton.nodes()[index].parent;
        while parent != -1 {
            transform = self.nodes[parent as usize].combine(&transform);
            parent = skeleton.nodes()[parent as usize].parent;
        }
        transform
    }

    /// Sets the model-space transform of a bone, converting it back into
    /// the local space of the bone's parent.
    pub fn set_model_transform(&mut self, skeleton: &Skeleton, index: usize, value: Transform) {
        let parent = skeleton.nodes()[index].parent;
        if parent == -1 {
            self.nodes[index] = value;
        } else {
            let parent_model = self.model_transform(skeleton, parent as usize);
            self.nodes[index] = parent_model.world_to_local(&value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::skeleton::test::test_skeleton;
    use nalgebra::Vector3;

    #[test]
    fn test_init_from_bind() {
        let skeleton = test_skeleton();
        let mut pose = ModelPose::default();
        pose.init_from_bind(&skeleton);
        assert_eq!(pose.nodes.len(), 3);
        assert_eq!(pose.nodes[1].translation, Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(pose.root_motion, Transform::IDENTITY);
    }

    #[test]
    fn test_blend_from_lerps_everything() {
        let skeleton = test_skeleton();
        let mut a = ModelPose::default();
        a.init_from_bind(&skeleton);
        a.length = 1.0;
        let mut b = a.clone();
        b.nodes[0].translation.x = 2.0;
        b.position = 1.0;
        b.length = 3.0;

        let mut out = ModelPose::default();
        out.blend_from(&a, &b, 0.5);
        assert_eq!(out.nodes[0].translation.x, 1.0);
        assert_eq!(out.position, 0.5);
        assert_eq!(out.length, 2.0);
    }

    #[test]
    fn test_model_transform_round_trip() {
        let skeleton = test_skeleton();
        let mut pose = ModelPose::default();
        pose.init_from_bind(&skeleton);

        let mut head_model = pose.model_transform(&skeleton, 2);
        assert!((head_model.translation.y - 1.5).abs() < 1e-6);

        head_model.translation = Vector3::new(1.0, 1.5, 0.0);
        pose.set_model_transform(&skeleton, 2, head_model);
        let restored = pose.model_transform(&skeleton, 2);
        assert!((restored.translation.x - 1.0).abs() < 1e-5);
        assert!((pose.nodes[2].translation.x - 1.0).abs() < 1e-5);
    }
}
