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

//! Per-bone pose operators: transform overrides, bone copies, transform
//! reads and the aim / two-bone IK solvers.

use super::{Eval, BLEND_EPSILON};
use crate::{
    graph::{NodeData, NodeRef},
    math::{saturate, Transform},
    value::Value,
};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// How a transform node combines its transform with the bone's.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BoneTransformMode {
    None,
    Add,
    Replace,
}

impl BoneTransformMode {
    fn from_id(id: i32) -> Self {
        match id {
            1 => Self::Add,
            2 => Self::Replace,
            _ => Self::None,
        }
    }
}

fn add_transforms(base: &Transform, extra: &Transform) -> Transform {
    Transform {
        translation: base.translation + extra.translation,
        rotation: (base.unit_rotation() * extra.unit_rotation()).into_inner(),
        scale: base.scale.component_mul(&extra.scale),
    }
}

impl Eval<'_> {
    fn resolved_bone(&self, node_ref: NodeRef) -> i32 {
        match &self.graph.node(node_ref).data {
            NodeData::SkeletonNode { node_index } => *node_index,
            _ => -1,
        }
    }

    /// Copies the input pose (or the bind pose) into a fresh writable
    /// buffer.
    fn writable_input_pose(&mut self, input: &Value) -> crate::value::PoseRef {
        let out = self.ctx.acquire_pose();
        let mut buffer = self.ctx.take_pose(out);
        buffer.copy_from(self.pose_or_empty(input));
        self.ctx.put_pose(out, buffer);
        out
    }

    /// Handler of the bone transform override node, in local or model
    /// space.
    pub(crate) fn transform_node(&mut self, node_ref: NodeRef, model_space: bool) -> Value {
        let bone = self.resolved_bone(node_ref);
        let mode = BoneTransformMode::from_id(self.graph.node(node_ref).value(1).as_int());

        let transform = Transform {
            translation: self.input_value(node_ref, 2, Value::Null).as_vec3(),
            rotation: self
                .input_value(node_ref, 3, Value::Quat(Quaternion::identity()))
                .as_quat(),
            scale: self
                .input_value(node_ref, 4, Value::Vec3(Vector3::new(1.0, 1.0, 1.0)))
                .as_vec3(),
        };

        // Unresolved bone or a no-op setup passes the input through.
        if bone < 0
            || bone as usize >= self.skeleton.node_count()
            || mode == BoneTransformMode::None
            || (mode == BoneTransformMode::Add && transform.is_identity())
        {
            return self.input_value(node_ref, 1, Value::Null);
        }
        let bone = bone as usize;

        let input = self.input_value(node_ref, 1, Value::Null);
        let out = self.writable_input_pose(&input);

        let mut pose = self.ctx.take_pose(out);
        if model_space {
            let current = pose.model_transform(self.skeleton, bone);
            let value = match mode {
                BoneTransformMode::Add => add_transforms(&current, &transform),
                _ => transform,
            };
            pose.set_model_transform(self.skeleton, bone, value);
        } else {
            pose.nodes[bone] = match mode {
                BoneTransformMode::Add => add_transforms(&pose.nodes[bone], &transform),
                _ => transform,
            };
        }
        self.ctx.put_pose(out, pose);
        Value::Pose(out)
    }

    /// Handler of the bone copy node.
    pub(crate) fn copy_node(&mut self, node_ref: NodeRef) -> Value {
        let node = self.graph.node(node_ref);
        let (src, dst) = match &node.data {
            NodeData::CopyNode { src, dst } => (*src, *dst),
            _ => (-1, -1),
        };
        let copy_translation = node.value(2).as_bool();
        let copy_rotation = node.value(3).as_bool();
        let copy_scale = node.value(4).as_bool();

        let input = self.input_value(node_ref, 1, Value::Null);

        let bone_count = self.skeleton.node_count() as i32;
        if src < 0
            || src >= bone_count
            || dst < 0
            || dst >= bone_count
            || !(copy_translation || copy_rotation || copy_scale)
        {
            return input;
        }

        let out = self.writable_input_pose(&input);
        let mut pose = self.ctx.take_pose(out);
        let source = pose.nodes[src as usize];
        let destination = &mut pose.nodes[dst as usize];
        if copy_translation {
            destination.translation = source.translation;
        }
        if copy_rotation {
            destination.rotation = source.rotation;
        }
        if copy_scale {
            destination.scale = source.scale;
        }
        self.ctx.put_pose(out, pose);
        Value::Pose(out)
    }

    /// Handler of the bone transform read node, in local or model space.
    /// Box 1 outputs translation, box 2 rotation, box 3 scale.
    pub(crate) fn get_node_transform(
        &mut self,
        node_ref: NodeRef,
        box_id: u32,
        model_space: bool,
    ) -> Value {
        let bone = self.resolved_bone(node_ref);
        let input = self.input_value(node_ref, 0, Value::Null);

        let transform = match (input.as_pose(), bone) {
            (Some(pose), bone) if bone >= 0 && (bone as usize) < self.skeleton.node_count() => {
                let bone = bone as usize;
                if model_space {
                    self.ctx.pose(pose).model_transform(self.skeleton, bone)
                } else {
                    self.ctx.pose(pose).nodes[bone]
                }
            }
            _ => Transform::IDENTITY,
        };

        match box_id {
            1 => Value::Vec3(transform.translation),
            2 => Value::Quat(transform.rotation),
            3 => Value::Vec3(transform.scale),
            _ => Value::Null,
        }
    }

    /// Handler of the aim IK node: rotates one bone so its forward axis
    /// points at a world-space target, blended by weight.
    pub(crate) fn aim_ik(&mut self, node_ref: NodeRef) -> Value {
        let bone = self.resolved_bone(node_ref);
        let input = self.input_value(node_ref, 1, Value::Null);
        let weight = self.input_or_value(node_ref, 3, 1).as_float();
        if bone < 0 || bone as usize >= self.skeleton.node_count() || weight < BLEND_EPSILON {
            return input;
        }
        let bone = bone as usize;
        let target = self.input_value(node_ref, 2, Value::Null).as_vec3();
        let weight = saturate(weight);

        let out = self.writable_input_pose(&input);
        let mut pose = self.ctx.take_pose(out);

        let mut model = pose.model_transform(self.skeleton, bone);
        let correction = solve_aim_ik(&model, target);
        let aimed = correction * model.unit_rotation();
        model.rotation = if weight < 1.0 {
            model.unit_rotation().slerp(&aimed, weight).into_inner()
        } else {
            aimed.into_inner()
        };
        pose.set_model_transform(self.skeleton, bone, model);

        self.ctx.put_pose(out, pose);
        Value::Pose(out)
    }

    /// Handler of the two-bone IK node: solves the root-joint-end chain so
    /// the end bone reaches a world-space target, blended by weight.
    pub(crate) fn two_bone_ik(&mut self, node_ref: NodeRef) -> Value {
        let bone = self.resolved_bone(node_ref);
        let input = self.input_value(node_ref, 1, Value::Null);
        let weight = self.input_or_value(node_ref, 4, 1).as_float();
        if bone < 0 || bone as usize >= self.skeleton.node_count() || weight < BLEND_EPSILON {
            return input;
        }
        let bone = bone as usize;

        let joint = self.skeleton.nodes()[bone].parent;
        if joint == -1 {
            return input;
        }
        let joint = joint as usize;
        let root = self.skeleton.nodes()[joint].parent;
        if root == -1 {
            return input;
        }
        let root = root as usize;

        let target = self.input_value(node_ref, 2, Value::Null).as_vec3();
        let joint_target = self.input_value(node_ref, 3, Value::Null).as_vec3();
        let allow_stretching = self.input_or_value(node_ref, 5, 2).as_bool();
        let max_stretch_scale = self.input_or_value(node_ref, 6, 3).as_float();
        let weight = saturate(weight);

        let out = self.writable_input_pose(&input);
        let mut pose = self.ctx.take_pose(out);

        let root_local = pose.nodes[root];
        let joint_local = pose.nodes[joint];
        let end_local = pose.nodes[bone];

        let mut root_model = pose.model_transform(self.skeleton, root);
        let mut joint_model = root_model.combine(&joint_local);
        let mut end_model = joint_model.combine(&end_local);
        solve_two_bone_ik(
            &mut root_model,
            &mut joint_model,
            &mut end_model,
            target,
            joint_target,
            allow_stretching,
            max_stretch_scale,
        );

        pose.set_model_transform(self.skeleton, root, root_model);
        pose.nodes[joint] = root_model.world_to_local(&joint_model);
        pose.nodes[bone] = joint_model.world_to_local(&end_model);
        if weight < 1.0 {
            pose.nodes[root] = root_local.lerp(&pose.nodes[root], weight);
            pose.nodes[joint] = joint_local.lerp(&pose.nodes[joint], weight);
            pose.nodes[bone] = end_local.lerp(&pose.nodes[bone], weight);
        }

        self.ctx.put_pose(out, pose);
        Value::Pose(out)
    }
}

/// Returns the rotation mapping the bone's forward direction onto the
/// direction toward the target.
pub(crate) fn solve_aim_ik(node: &Transform, target: Vector3<f32>) -> UnitQuaternion<f32> {
    let to_target = target - node.translation;
    if to_target.norm_squared() <= f32::EPSILON {
        return UnitQuaternion::identity();
    }
    let forward = node.unit_rotation().transform_vector(&Vector3::z());
    match UnitQuaternion::rotation_between(&forward, &to_target) {
        Some(rotation) => rotation,
        // Anti-parallel directions: turn half a circle around any axis
        // perpendicular to the forward direction.
        None => UnitQuaternion::from_axis_angle(
            &nalgebra::Unit::new_normalize(any_perpendicular(forward)),
            std::f32::consts::PI,
        ),
    }
}

/// Closed-form planar solver for a two-bone chain. Mutates the model-space
/// transforms of the chain so the end lands on (or reaches toward) the
/// target, bending toward `pole`.
pub(crate) fn solve_two_bone_ik(
    root: &mut Transform,
    joint: &mut Transform,
    end: &mut Transform,
    target: Vector3<f32>,
    pole: Vector3<f32>,
    allow_stretching: bool,
    max_stretch_scale: f32,
) {
    let upper = joint.translation - root.translation;
    let lower = end.translation - joint.translation;
    let mut len_upper = upper.norm();
    let mut len_lower = lower.norm();
    let to_target = target - root.translation;
    let mut len_target = to_target.norm();
    if len_target <= f32::EPSILON || len_upper <= f32::EPSILON || len_lower <= f32::EPSILON {
        return;
    }
    let dir = to_target / len_target;

    let max_reach = len_upper + len_lower;
    if len_target > max_reach {
        if allow_stretching {
            let stretch = (len_target / max_reach).min(max_stretch_scale.max(1.0));
            len_upper *= stretch;
            len_lower *= stretch;
        }
        len_target = len_target.min((len_upper + len_lower) * 0.9999);
    }

    // Law of cosines at the root joint.
    let cos_angle = ((len_upper * len_upper + len_target * len_target - len_lower * len_lower)
        / (2.0 * len_upper * len_target))
        .clamp(-1.0, 1.0);
    let sin_angle = (1.0 - cos_angle * cos_angle).max(0.0).sqrt();

    // The chain bends inside the plane spanned by the target direction and
    // the pole.
    let pole_dir = pole - root.translation;
    let mut bend = pole_dir - dir * pole_dir.dot(&dir);
    if bend.norm_squared() <= f32::EPSILON {
        bend = any_perpendicular(dir);
    }
    let bend = bend.normalize();

    let new_joint_pos = root.translation + dir * (len_upper * cos_angle) + bend * (len_upper * sin_angle);
    let new_end_pos = root.translation + dir * len_target;

    if let Some(delta) = UnitQuaternion::rotation_between(&upper, &(new_joint_pos - root.translation))
    {
        root.rotation = (delta * root.unit_rotation()).into_inner();
    }
    if let Some(delta) = UnitQuaternion::rotation_between(&lower, &(new_end_pos - new_joint_pos)) {
        joint.rotation = (delta * joint.unit_rotation()).into_inner();
    }
    joint.translation = new_joint_pos;
    end.translation = new_end_pos;
}

fn any_perpendicular(v: Vector3<f32>) -> Vector3<f32> {
    let candidate = v.cross(&Vector3::x());
    if candidate.norm_squared() > f32::EPSILON {
        candidate
    } else {
        v.cross(&Vector3::y())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_aim_ik_points_forward_axis_at_target() {
        let node = Transform::IDENTITY;
        let target = Vector3::new(1.0, 0.0, 0.0);
        let correction = solve_aim_ik(&node, target);
        let aimed = correction.transform_vector(&Vector3::z());
        assert!((aimed.normalize() - target.normalize()).norm() < 1e-5);
    }

    #[test]
    fn test_two_bone_ik_reaches_target_in_range() {
        let mut root = Transform::IDENTITY;
        let mut joint = Transform::IDENTITY;
        joint.translation = Vector3::new(0.0, 1.0, 0.0);
        let mut end = Transform::IDENTITY;
        end.translation = Vector3::new(0.0, 2.0, 0.0);

        let target = Vector3::new(1.0, 1.0, 0.0);
        solve_two_bone_ik(
            &mut root,
            &mut joint,
            &mut end,
            target,
            Vector3::new(0.5, 1.0, 1.0),
            false,
            1.0,
        );

        assert!((end.translation - target).norm() < 1e-4);
        // Bone lengths are preserved without stretching.
        assert!(((joint.translation - root.translation).norm() - 1.0).abs() < 1e-4);
        assert!(((end.translation - joint.translation).norm() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_two_bone_ik_clamps_out_of_reach_target() {
        let mut root = Transform::IDENTITY;
        let mut joint = Transform::IDENTITY;
        joint.translation = Vector3::new(0.0, 1.0, 0.0);
        let mut end = Transform::IDENTITY;
        end.translation = Vector3::new(0.0, 2.0, 0.0);

        solve_two_bone_ik(
            &mut root,
            &mut joint,
            &mut end,
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 1.0),
            false,
            1.0,
        );

        // The chain straightens toward the target at full reach.
        assert!((end.translation.norm() - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_two_bone_ik_stretches_when_allowed() {
        let mut root = Transform::IDENTITY;
        let mut joint = Transform::IDENTITY;
        joint.translation = Vector3::new(0.0, 1.0, 0.0);
        let mut end = Transform::IDENTITY;
        end.translation = Vector3::new(0.0, 2.0, 0.0);

        solve_two_bone_ik(
            &mut root,
            &mut joint,
            &mut end,
            Vector3::new(3.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 1.0),
            true,
            2.0,
        );

        assert!((end.translation - Vector3::new(3.0, 0.0, 0.0)).norm() < 1e-3);
    }
}
