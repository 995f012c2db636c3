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

//! Retargeting: maps a pose sampled on one skeleton onto the bones of
//! another, preserving the world-space difference of each source bone's
//! animation inside the target parent's frame.

use crate::{
    math::Transform,
    skeleton::{Skeleton, SkeletonMapping},
};
use nalgebra::Matrix4;

/// Reframes a single sampled local transform from the source skeleton onto
/// a bone of the target skeleton. Unmapped target bones keep their bind
/// pose.
pub fn retarget_node(
    source_skeleton: &Skeleton,
    target_skeleton: &Skeleton,
    mapping: &SkeletonMapping,
    sampled_local: Transform,
    target_index: usize,
) -> Transform {
    let Some(source_index) = mapping.source_of(target_index) else {
        return target_skeleton.nodes()[target_index].local_bind;
    };

    let inv_bind_source = source_skeleton
        .bind_world_matrix(source_index)
        .try_inverse()
        .unwrap_or_else(Matrix4::identity);
    let sampled_world =
        source_skeleton.parent_bind_world_matrix(source_index) * sampled_local.matrix();
    let target_world = target_skeleton.bind_world_matrix(target_index);
    let inv_parent_target = target_skeleton
        .parent_bind_world_matrix(target_index)
        .try_inverse()
        .unwrap_or_else(Matrix4::identity);

    // The world-space difference of the source animation, re-expressed in
    // the frame of the target bone's parent.
    let local_from_source = sampled_world * inv_bind_source;
    Transform::from_matrix(&(inv_parent_target * local_from_source * target_world))
}

/// Retargets a whole pose of local transforms authored on `source_skeleton`
/// onto `target_skeleton`.
pub fn retarget_pose(
    source_skeleton: &Skeleton,
    target_skeleton: &Skeleton,
    mapping: &SkeletonMapping,
    source_locals: &[Transform],
) -> Vec<Transform> {
    (0..target_skeleton.node_count())
        .map(|target_index| match mapping.source_of(target_index) {
            Some(source_index) => retarget_node(
                source_skeleton,
                target_skeleton,
                mapping,
                source_locals
                    .get(source_index)
                    .copied()
                    .unwrap_or(Transform::IDENTITY),
                target_index,
            ),
            None => target_skeleton.nodes()[target_index].local_bind,
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::skeleton::{test::test_skeleton, SkeletonNode};
    use nalgebra::{UnitQuaternion, Vector3};

    #[test]
    fn test_identity_retarget_keeps_pose() {
        let skeleton = test_skeleton();
        let mapping = SkeletonMapping::new(&skeleton, &skeleton);

        let mut sampled = skeleton.nodes()[1].local_bind;
        sampled.translation.x = 0.5;
        sampled.rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.7).into_inner();

        let result = retarget_node(&skeleton, &skeleton, &mapping, sampled, 1);
        assert!((result.translation - sampled.translation).norm() < 1e-4);
        assert!(
            result
                .unit_rotation()
                .angle_to(&sampled.unit_rotation())
                .abs()
                < 1e-4
        );
    }

    #[test]
    fn test_unmapped_bone_holds_bind_pose() {
        let skeleton = test_skeleton();
        let target = Skeleton::new(vec![SkeletonNode {
            name: "tail".to_string(),
            parent: -1,
            local_bind: Transform {
                translation: Vector3::new(0.0, 3.0, 0.0),
                ..Transform::IDENTITY
            },
        }]);
        let mapping = SkeletonMapping::new(&skeleton, &target);

        let locals: Vec<Transform> = skeleton.nodes().iter().map(|n| n.local_bind).collect();
        let result = retarget_pose(&skeleton, &target, &mapping, &locals);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].translation, Vector3::new(0.0, 3.0, 0.0));
    }

    #[test]
    fn test_bind_pose_retargets_to_bind_pose() {
        let source = test_skeleton();
        // Same bone names, different proportions.
        let target = Skeleton::new(vec![
            SkeletonNode {
                name: "root".to_string(),
                parent: -1,
                local_bind: Transform::IDENTITY,
            },
            SkeletonNode {
                name: "spine".to_string(),
                parent: 0,
                local_bind: Transform {
                    translation: Vector3::new(0.0, 2.0, 0.0),
                    ..Transform::IDENTITY
                },
            },
        ]);
        let mapping = SkeletonMapping::new(&source, &target);

        let locals: Vec<Transform> = source.nodes().iter().map(|n| n.local_bind).collect();
        let result = retarget_pose(&source, &target, &mapping, &locals);
        // An unanimated source keeps the target at its own bind pose.
        assert!((result[1].translation - Vector3::new(0.0, 2.0, 0.0)).norm() < 1e-4);
    }
}
