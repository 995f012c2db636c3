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

//! Pose combinator nodes: plain, additive and masked two-pose blends,
//! 1D/2D multi-blend spaces and the indexed pose selector with crossfade.

use super::{animation::SampleData, Eval, BLEND_EPSILON};
use crate::{
    alpha::AlphaBlendMode,
    clip::ClipResource,
    graph::{GraphNode, NodeData, NodeRef, MULTI_BLEND_INVALID},
    instance::Bucket,
    math::{
        barycentric_is_inside, closest_point_on_segment, get_barycentric_coords_2d, saturate,
    },
    value::Value,
};
use arrayvec::ArrayVec;
use nalgebra::Vector2;

/// Per-frame record of a clip tracked by a multi-blend bucket.
type MultiBlendList = ArrayVec<(f32, u8), 3>;

impl Eval<'_> {
    /// Blends two pose values through an alpha curve, including root
    /// motion and playback info. Null inputs stand in for the bind pose.
    pub(crate) fn blend(
        &mut self,
        pose_a: Value,
        pose_b: Value,
        alpha: f32,
        mode: AlphaBlendMode,
    ) -> Value {
        let alpha = if alpha.is_finite() { alpha } else { 0.0 };
        let alpha = mode.process(saturate(alpha));

        let out = self.ctx.acquire_pose();
        let mut out_pose = self.ctx.take_pose(out);
        out_pose.blend_from(
            self.pose_or_empty(&pose_a),
            self.pose_or_empty(&pose_b),
            alpha,
        );
        self.ctx.put_pose(out, out_pose);
        Value::Pose(out)
    }

    /// Handler of the two-pose blend node.
    pub(crate) fn anim_blend(&mut self, node_ref: NodeRef) -> Value {
        let alpha = saturate(self.input_or_value(node_ref, 3, 0).as_float());

        if alpha <= BLEND_EPSILON {
            self.input_value(node_ref, 1, Value::Null)
        } else if (alpha - 1.0).abs() <= BLEND_EPSILON {
            self.input_value(node_ref, 2, Value::Null)
        } else {
            let pose_a = self.input_value(node_ref, 1, Value::Null);
            let pose_b = self.input_value(node_ref, 2, Value::Null);
            self.blend(pose_a, pose_b, alpha, AlphaBlendMode::Linear)
        }
    }

    /// Handler of the additive blend node: base + (blend - bind), lerped
    /// over the base by alpha.
    pub(crate) fn anim_blend_additive(&mut self, node_ref: NodeRef) -> Value {
        let alpha = saturate(self.input_or_value(node_ref, 3, 0).as_float());

        if alpha <= BLEND_EPSILON {
            return self.input_value(node_ref, 1, Value::Null);
        }
        let base = self.input_value(node_ref, 1, Value::Null);
        let Some(base_ref) = base.as_pose() else {
            return Value::Null;
        };
        let blend = self.input_value(node_ref, 2, Value::Null);
        let Some(blend_ref) = blend.as_pose() else {
            return base;
        };

        let out = self.ctx.acquire_pose();
        let mut out_pose = self.ctx.take_pose(out);
        {
            let base_pose = self.ctx.pose(base_ref);
            let blend_pose = self.ctx.pose(blend_ref);
            out_pose.nodes.clear();
            for (index, (base_node, blend_node)) in base_pose
                .nodes
                .iter()
                .zip(blend_pose.nodes.iter())
                .enumerate()
            {
                let ref_node = &self.empty_pose.nodes[index];

                // base + (blend - reference)
                let mut target = *base_node;
                target.translation += blend_node.translation - ref_node.translation;
                target.scale += blend_node.scale - ref_node.scale;
                let diff = ref_node.unit_rotation().inverse() * blend_node.unit_rotation();
                target.rotation = (base_node.unit_rotation() * diff).into_inner();

                out_pose.nodes.push(base_node.lerp(&target, alpha));
            }
            let mut added = base_pose.root_motion;
            added.translation += blend_pose.root_motion.translation;
            added.rotation =
                (base_pose.root_motion.unit_rotation() * blend_pose.root_motion.unit_rotation())
                    .into_inner();
            out_pose.root_motion = base_pose.root_motion.lerp(&added, alpha);
            out_pose.position = base_pose.position;
            out_pose.length = base_pose.length;
        }
        self.ctx.put_pose(out, out_pose);
        Value::Pose(out)
    }

    /// Handler of the masked blend node: only bones selected by the mask
    /// blend toward the second pose.
    pub(crate) fn anim_blend_mask(&mut self, node_ref: NodeRef) -> Value {
        let alpha = saturate(self.input_or_value(node_ref, 3, 0).as_float());
        let has_mask = matches!(
            &self.graph.node(node_ref).data,
            NodeData::BoneMask { mask } if !mask.is_empty()
        );

        if alpha <= BLEND_EPSILON || !has_mask {
            return self.input_value(node_ref, 1, Value::Null);
        }

        let pose_a = self.input_value(node_ref, 1, Value::Null);
        let pose_b = self.input_value(node_ref, 2, Value::Null);

        let out = self.ctx.acquire_pose();
        let mut out_pose = self.ctx.take_pose(out);
        {
            let NodeData::BoneMask { mask } = &self.graph.node(node_ref).data else {
                unreachable!()
            };
            let a = self.pose_or_empty(&pose_a);
            let b = self.pose_or_empty(&pose_b);
            out_pose.nodes.clear();
            for (index, (node_a, node_b)) in a.nodes.iter().zip(b.nodes.iter()).enumerate() {
                if mask.get(index).copied().unwrap_or(false) {
                    out_pose.nodes.push(node_a.lerp(node_b, alpha));
                } else {
                    out_pose.nodes.push(*node_a);
                }
            }
            out_pose.root_motion = a.root_motion.lerp(&b.root_motion, alpha);
            out_pose.position = a.position;
            out_pose.length = a.length;
        }
        self.ctx.put_pose(out, out_pose);
        Value::Pose(out)
    }

    // ---- Multi blend ----

    /// Location of a blend point in the axis space of the node.
    fn blend_point(&self, node_ref: NodeRef, slot: u8) -> Vector2<f32> {
        let info = self.graph.node(node_ref).value(4 + slot as usize * 2).as_vec4();
        Vector2::new(info.x, info.y)
    }

    fn multi_blend_lists(&self, bucket_index: usize) -> (MultiBlendList, u64) {
        match self.data.buckets.get(bucket_index) {
            Some(Bucket::MultiBlend(bucket)) => {
                let mut list = MultiBlendList::new();
                for i in 0..bucket.count.min(3) as usize {
                    list.push((bucket.time_positions[i], bucket.animations[i]));
                }
                (list, bucket.last_update_frame)
            }
            _ => (MultiBlendList::new(), 0),
        }
    }

    fn multi_blend_store(&mut self, bucket_index: usize, list: &MultiBlendList) {
        let frame = self.data.current_frame;
        if let Some(Bucket::MultiBlend(bucket)) = self.data.buckets.get_mut(bucket_index) {
            bucket.count = list.len() as u8;
            for (i, (time, slot)) in list.iter().enumerate() {
                bucket.time_positions[i] = *time;
                bucket.animations[i] = *slot;
            }
            bucket.last_update_frame = frame;
        }
    }

    /// Restores a sample's time position from the previous frame and
    /// integrates the node speed into the new one.
    fn before_sample(
        &self,
        last_update_frame: u64,
        prev_list: &MultiBlendList,
        sample: &mut SampleData,
        speed: f32,
    ) {
        sample.prev_time_pos = prev_list
            .iter()
            .find(|(_, slot)| *slot == sample.slot)
            .map(|(time, _)| *time)
            .unwrap_or(0.0);

        if speed < 0.0 && self.is_first_bucket_update(last_update_frame) {
            // Reversed playback starts from the end.
            sample.prev_time_pos = sample.length;
        }

        sample.time_pos = sample.prev_time_pos + self.dt * speed;
    }

    fn after_sample(new_list: &mut MultiBlendList, sample: &SampleData) {
        if !new_list.is_full() {
            new_list.push((sample.time_pos, sample.slot));
        }
    }

    /// Samples a single clip of a multi-blend node and records its time in
    /// the new tracking list.
    fn sample_single(
        &mut self,
        node_ref: NodeRef,
        looped: bool,
        start_time_pos: f32,
        sample: &mut SampleData,
        new_list: &mut MultiBlendList,
    ) -> Value {
        let clip = sample.clip.clone();
        let mut time = sample.time_pos;
        let value = self.sample_animation(
            node_ref,
            looped,
            sample.length,
            start_time_pos,
            sample.prev_time_pos,
            &mut time,
            Some(&clip),
            sample.speed,
        );
        sample.time_pos = time;
        Self::after_sample(new_list, sample);
        value
    }

    /// The shared effective length across all clips of a multi-blend node,
    /// computed once to stabilize looped playback regardless of which
    /// clips are mixed.
    fn multi_blend_length(node: &GraphNode, clips: &[Option<ClipResource>]) -> f32 {
        let mut length = 0.0f32;
        for (i, clip) in clips.iter().enumerate() {
            if let Some(clip) = clip {
                let info = node.value(4 + i * 2).as_vec4();
                length = length.max(clip.length * info.w.abs());
            }
        }
        length
    }

    fn multi_blend_sample_data(&self, node_ref: NodeRef, slot: u8) -> Option<SampleData> {
        let node = self.graph.node(node_ref);
        let clips = match &node.data {
            NodeData::MultiBlend1D { clips, .. } | NodeData::MultiBlend2D { clips, .. } => clips,
            _ => return None,
        };
        let clip = clips.get(slot as usize)?.clone()?;
        let info = node.value(4 + slot as usize * 2).as_vec4();
        Some(SampleData::new(clip, info.w, slot))
    }

    /// Handler of the 1D multi-blend node.
    pub(crate) fn multi_blend_1d(&mut self, node_ref: NodeRef) -> Value {
        let node = self.graph.node(node_ref);
        let bucket_index = node.bucket_index.max(0) as usize;
        let range = node.value(0).as_vec4();
        let NodeData::MultiBlend1D {
            count,
            length,
            indices_sorted,
            clips,
        } = &node.data
        else {
            return Value::Null;
        };
        if *count == 0 {
            return Value::Null;
        }
        let indices_sorted = indices_sorted.clone();
        let length = *length.get_or_init(|| Self::multi_blend_length(node, clips));
        if length <= BLEND_EPSILON {
            return Value::Null;
        }

        let speed = self.input_or_value(node_ref, 1, 1).as_float();
        let looped = self.input_or_value(node_ref, 2, 2).as_bool();
        let start_time_pos = self.input_or_value(node_ref, 3, 3).as_float();
        let x = self
            .input_value(node_ref, 4, Value::Float(0.0))
            .as_float()
            .clamp(range.x, range.y);

        if let Some(trace) = self.add_trace_event(node_ref) {
            trace.value = x;
        }

        let (prev_list, last_frame) = self.multi_blend_lists(bucket_index);
        let mut new_list = MultiBlendList::new();
        let mut value = Value::Null;

        let valid: Vec<u8> = indices_sorted
            .iter()
            .copied()
            .filter(|slot| *slot != MULTI_BLEND_INVALID)
            .collect();

        // Find the two neighbouring blend points around the axis value.
        for window in 0..valid.len().saturating_sub(1) {
            let a_slot = valid[window];
            let a_x = self.blend_point(node_ref, a_slot).x;
            let Some(mut a) = self.multi_blend_sample_data(node_ref, a_slot) else {
                break;
            };

            // At or before the A point.
            if x <= a_x + BLEND_EPSILON {
                self.before_sample(last_frame, &prev_list, &mut a, speed);
                value = self.sample_single(node_ref, looped, start_time_pos, &mut a, &mut new_list);
                break;
            }

            let b_slot = valid[window + 1];
            let b_x = self.blend_point(node_ref, b_slot).x;
            let Some(mut b) = self.multi_blend_sample_data(node_ref, b_slot) else {
                break;
            };

            // Exactly at the B point.
            if (b_x - x).abs() <= BLEND_EPSILON {
                self.before_sample(last_frame, &prev_list, &mut b, speed);
                value = self.sample_single(node_ref, looped, start_time_pos, &mut b, &mut new_list);
                break;
            }

            // Between A and B.
            let alpha = (x - a_x) / (b_x - a_x);
            if alpha > 1.0 {
                continue;
            }
            self.before_sample(last_frame, &prev_list, &mut a, speed);
            self.before_sample(last_frame, &prev_list, &mut b, speed);
            value = self.sample_animations_with_blend(
                node_ref,
                looped,
                start_time_pos,
                &mut a,
                &mut b,
                alpha,
            );
            Self::after_sample(&mut new_list, &a);
            Self::after_sample(&mut new_list, &b);
            break;
        }

        if new_list.is_empty() {
            // A single blend point, or an axis value past the last point:
            // sample the last clip alone.
            if let Some(last_slot) = valid.last() {
                if let Some(mut a) = self.multi_blend_sample_data(node_ref, *last_slot) {
                    self.before_sample(last_frame, &prev_list, &mut a, speed);
                    value =
                        self.sample_single(node_ref, looped, start_time_pos, &mut a, &mut new_list);
                }
            }
        }

        self.multi_blend_store(bucket_index, &new_list);
        value
    }

    /// Handler of the 2D multi-blend node.
    pub(crate) fn multi_blend_2d(&mut self, node_ref: NodeRef) -> Value {
        let node = self.graph.node(node_ref);
        let bucket_index = node.bucket_index.max(0) as usize;
        let range = node.value(0).as_vec4();
        let NodeData::MultiBlend2D {
            length,
            triangles,
            clips,
            ..
        } = &node.data
        else {
            return Value::Null;
        };
        if triangles.is_empty() {
            return Value::Null;
        }
        let triangles = triangles.clone();
        let length = *length.get_or_init(|| Self::multi_blend_length(node, clips));
        if length <= BLEND_EPSILON {
            return Value::Null;
        }

        let speed = self.input_or_value(node_ref, 1, 1).as_float();
        let looped = self.input_or_value(node_ref, 2, 2).as_bool();
        let start_time_pos = self.input_or_value(node_ref, 3, 3).as_float();
        let x = self
            .input_value(node_ref, 4, Value::Float(0.0))
            .as_float()
            .clamp(range.x, range.y);
        let y = self
            .input_value(node_ref, 5, Value::Float(0.0))
            .as_float()
            .clamp(range.z, range.w);

        if let Some(trace) = self.add_trace_event(node_ref) {
            // Pack both axes into the single trace scalar.
            let packed = ((half_bits(x) as u32) << 16) | half_bits(y) as u32;
            trace.value = f32::from_bits(packed);
        }

        let (prev_list, last_frame) = self.multi_blend_lists(bucket_index);
        let mut new_list = MultiBlendList::new();
        let mut value = Value::Null;

        let point = Vector2::new(x, y);

        // Closest hull edge, the fallback for points outside all triangles:
        // (squared distance, slot A, slot B, weight along the edge).
        let mut best: Option<(f32, u8, u8, f32)> = None;

        for triangle in triangles.chunks_exact(3) {
            let slots = [triangle[0], triangle[1], triangle[2]];
            let points = [
                self.blend_point(node_ref, slots[0]),
                self.blend_point(node_ref, slots[1]),
                self.blend_point(node_ref, slots[2]),
            ];

            let degenerate = degenerate_coefficient(&points);
            let inside = if degenerate {
                point_in_degenerate_triangle(point, &points)
            } else {
                barycentric_is_inside(get_barycentric_coords_2d(
                    point, points[0], points[1], points[2],
                ))
            };

            if inside {
                // Near-vertex shortcuts.
                let mut sampled = false;
                for (slot, vertex) in slots.iter().zip(points.iter()) {
                    if (point - vertex).norm_squared() < BLEND_EPSILON * BLEND_EPSILON {
                        if let Some(mut a) = self.multi_blend_sample_data(node_ref, *slot) {
                            self.before_sample(last_frame, &prev_list, &mut a, speed);
                            value = self.sample_single(
                                node_ref,
                                looped,
                                start_time_pos,
                                &mut a,
                                &mut new_list,
                            );
                        }
                        sampled = true;
                        break;
                    }
                }
                if sampled {
                    break;
                }

                if degenerate {
                    // Collinear triangle: fall back to 1D blending along
                    // the non-degenerate axis.
                    value = self.degenerate_triangle_blend(
                        node_ref,
                        looped,
                        start_time_pos,
                        speed,
                        last_frame,
                        &prev_list,
                        &mut new_list,
                        point,
                        &points,
                        slots,
                    );
                    break;
                }

                let (u, v, w) =
                    get_barycentric_coords_2d(point, points[0], points[1], points[2]);
                let (Some(mut a), Some(mut b), Some(mut c)) = (
                    self.multi_blend_sample_data(node_ref, slots[0]),
                    self.multi_blend_sample_data(node_ref, slots[1]),
                    self.multi_blend_sample_data(node_ref, slots[2]),
                ) else {
                    break;
                };
                self.before_sample(last_frame, &prev_list, &mut a, speed);
                self.before_sample(last_frame, &prev_list, &mut b, speed);
                self.before_sample(last_frame, &prev_list, &mut c, speed);
                value = self.sample_animations_with_blend3(
                    node_ref,
                    looped,
                    start_time_pos,
                    &mut a,
                    &mut b,
                    &mut c,
                    u,
                    v,
                    w,
                );
                Self::after_sample(&mut new_list, &a);
                Self::after_sample(&mut new_list, &b);
                Self::after_sample(&mut new_list, &c);
                break;
            }

            for j in 0..3 {
                let s0 = points[j];
                let s1 = points[(j + 1) % 3];
                let (closest, t) = closest_point_on_segment(point, s0, s1);
                let distance = (closest - point).norm_squared();
                if best.map_or(true, |(best_distance, ..)| distance < best_distance) {
                    let edge_len = (s1 - s0).norm();
                    let weight = if edge_len < BLEND_EPSILON { 0.0 } else { t };
                    best = Some((distance, slots[j], slots[(j + 1) % 3], weight));
                }
            }
        }

        if value == Value::Null && new_list.is_empty() {
            if let Some((_, best0_slot, best1_slot, best_weight)) = best {
                if let Some(mut best0) = self.multi_blend_sample_data(node_ref, best0_slot) {
                    self.before_sample(last_frame, &prev_list, &mut best0, speed);
                    if best_weight < BLEND_EPSILON {
                        value = self.sample_single(
                            node_ref,
                            looped,
                            start_time_pos,
                            &mut best0,
                            &mut new_list,
                        );
                    } else if let Some(mut best1) =
                        self.multi_blend_sample_data(node_ref, best1_slot)
                    {
                        self.before_sample(last_frame, &prev_list, &mut best1, speed);
                        value = self.sample_animations_with_blend(
                            node_ref,
                            looped,
                            start_time_pos,
                            &mut best0,
                            &mut best1,
                            best_weight,
                        );
                        Self::after_sample(&mut new_list, &best0);
                        Self::after_sample(&mut new_list, &best1);
                    }
                }
            }
        }

        self.multi_blend_store(bucket_index, &new_list);
        value
    }

    /// 1D fallback for a collinear blend triangle: projects the sampling
    /// point on the shared axis and blends the two samples around it.
    #[allow(clippy::too_many_arguments)]
    fn degenerate_triangle_blend(
        &mut self,
        node_ref: NodeRef,
        looped: bool,
        start_time_pos: f32,
        speed: f32,
        last_frame: u64,
        prev_list: &MultiBlendList,
        new_list: &mut MultiBlendList,
        point: Vector2<f32>,
        points: &[Vector2<f32>; 3],
        slots: [u8; 3],
    ) -> Value {
        let mut v0 = points[1] - points[0];
        let mut v1 = points[2] - points[0];
        let mut p = point - points[0];

        let x_axis = v0.x.abs() <= BLEND_EPSILON && v1.x.abs() <= BLEND_EPSILON;
        let y_axis = v0.y.abs() <= BLEND_EPSILON && v1.y.abs() <= BLEND_EPSILON;

        if (x_axis && y_axis) || (!x_axis && !y_axis) {
            // All points coincide, or the collinearity is not axis-aligned:
            // the first vertex alone.
            if let Some(mut a) = self.multi_blend_sample_data(node_ref, slots[0]) {
                self.before_sample(last_frame, prev_list, &mut a, speed);
                return self.sample_single(node_ref, looped, start_time_pos, &mut a, new_list);
            }
            return Value::Null;
        }

        if y_axis {
            // Reuse the X-axis code path with swapped coordinates.
            v0 = Vector2::new(v0.y, v0.x);
            v1 = Vector2::new(v1.y, v1.x);
            p = Vector2::new(p.y, p.x);
        }

        // Pick the two samples around the projected point along the axis.
        let (alpha_x, alpha_y, slot_a, slot_b) = if v1.y >= v0.y {
            if p.y < v0.y {
                (p.y, v0.y, slots[0], slots[1])
            } else {
                (p.y - v0.y, v1.y - v0.y, slots[1], slots[2])
            }
        } else if p.y < v1.y {
            (p.y, v1.y, slots[0], slots[2])
        } else {
            (p.y - v1.y, v0.y - v1.y, slots[2], slots[1])
        };
        let alpha = if alpha_y.abs() <= BLEND_EPSILON {
            0.0
        } else {
            alpha_x / alpha_y
        };

        let (Some(mut a), Some(mut b)) = (
            self.multi_blend_sample_data(node_ref, slot_a),
            self.multi_blend_sample_data(node_ref, slot_b),
        ) else {
            return Value::Null;
        };
        self.before_sample(last_frame, prev_list, &mut a, speed);
        self.before_sample(last_frame, prev_list, &mut b, speed);
        let value = self.sample_animations_with_blend(
            node_ref,
            looped,
            start_time_pos,
            &mut a,
            &mut b,
            alpha,
        );
        Self::after_sample(new_list, &a);
        Self::after_sample(new_list, &b);
        value
    }

    /// Handler of the indexed pose selector with crossfade.
    pub(crate) fn blend_poses(&mut self, node_ref: NodeRef) -> Value {
        const FIRST_BLEND_POSE_BOX: u32 = 3;
        const MAX_BLEND_POSES: i32 = 8;

        let node = self.graph.node(node_ref);
        let bucket_index = node.bucket_index.max(0) as usize;
        let pose_count = node.value(2).as_int().clamp(0, MAX_BLEND_POSES);
        let mode = AlphaBlendMode::from_id(node.value(3).as_int() as u8).unwrap_or_default();

        let pose_index = self.input_or_value(node_ref, 1, 0).as_int();
        let blend_duration = self.input_or_value(node_ref, 2, 1).as_float();

        if pose_count == 0 || pose_index < 0 || pose_index >= pose_count {
            return Value::Null;
        }

        let (transition_position, previous_index) = match self.data.buckets.get_mut(bucket_index) {
            Some(Bucket::BlendPose(bucket)) => {
                bucket.transition_position += self.dt;
                (bucket.transition_position, bucket.previous_index)
            }
            _ => return Value::Null,
        };

        // No crossfade on the first evaluation, when the selection stays
        // put, or when the fade elapsed.
        if previous_index == -1
            || previous_index == pose_index
            || transition_position >= blend_duration
            || blend_duration <= BLEND_EPSILON
        {
            if let Some(Bucket::BlendPose(bucket)) = self.data.buckets.get_mut(bucket_index) {
                bucket.transition_position = 0.0;
                bucket.previous_index = pose_index;
            }
            return self.input_value(
                node_ref,
                FIRST_BLEND_POSE_BOX + pose_index as u32,
                Value::Null,
            );
        }

        debug_assert!(previous_index >= 0 && previous_index < pose_count);

        let alpha = transition_position / blend_duration;
        let pose_a = self.input_value(
            node_ref,
            FIRST_BLEND_POSE_BOX + previous_index as u32,
            Value::Null,
        );
        let pose_b = self.input_value(
            node_ref,
            FIRST_BLEND_POSE_BOX + pose_index as u32,
            Value::Null,
        );
        self.blend(pose_a, pose_b, alpha, mode)
    }
}

/// Coarse containment test for degenerate (zero-area) triangles: the point
/// must lie on one of the segments.
fn point_in_degenerate_triangle(point: Vector2<f32>, points: &[Vector2<f32>; 3]) -> bool {
    for i in 0..3 {
        let (closest, _) = closest_point_on_segment(point, points[i], points[(i + 1) % 3]);
        if (closest - point).norm_squared() <= BLEND_EPSILON {
            return true;
        }
    }
    false
}

/// Returns `true` when the barycentric denominator of the triangle is
/// (near) zero, which happens for collinear points.
fn degenerate_coefficient(points: &[Vector2<f32>; 3]) -> bool {
    let v0 = points[1] - points[0];
    let v1 = points[2] - points[0];
    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    (d00 * d11 - d01 * d01).abs() <= BLEND_EPSILON * BLEND_EPSILON
}

/// Packs a float into IEEE half precision bits. Used to fit a 2D blend
/// position into the single scalar of a trace record.
fn half_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xff) as i32 - 127 + 15;
    let mantissa = (bits >> 13) & 0x3ff;
    if exponent <= 0 {
        sign
    } else if exponent >= 31 {
        sign | 0x7c00
    } else {
        sign | ((exponent as u16) << 10) | mantissa as u16
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_half_bits_round_numbers() {
        assert_eq!(half_bits(0.0), 0);
        assert_eq!(half_bits(1.0), 0x3c00);
        assert_eq!(half_bits(-2.0), 0xc000);
    }

    #[test]
    fn test_degenerate_coefficient() {
        let collinear = [
            Vector2::new(0.0, 0.0),
            Vector2::new(0.0, 1.0),
            Vector2::new(0.0, 2.0),
        ];
        assert!(degenerate_coefficient(&collinear));
        let proper = [
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(0.0, 1.0),
        ];
        assert!(!degenerate_coefficient(&proper));
    }

    #[test]
    fn test_point_in_degenerate_triangle() {
        let points = [
            Vector2::new(0.0, 0.0),
            Vector2::new(0.0, 1.0),
            Vector2::new(0.0, 2.0),
        ];
        assert!(point_in_degenerate_triangle(Vector2::new(0.0, 0.5), &points));
        assert!(!point_in_degenerate_triangle(Vector2::new(1.0, 0.5), &points));
    }
}
