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

//! Clip sampling: time mapping, per-bone channel evaluation with the four
//! blend modes, root-motion extraction and animation event firing.

use super::{Eval, RootMotionExtraction, BLEND_EPSILON};
use crate::{
    clip::{ClipResource, RootMotionFlags},
    graph::{NodeData, NodeRef},
    instance::{ActiveEvent, ActiveEventKey, AnimEvent, AnimEventKind, Bucket},
    math::Transform,
    pose::ModelPose,
    skeleton::SkeletonMapping,
    value::Value,
};
use nalgebra::Vector3;

/// How a sampled bone transform is written into the destination pose.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ProcessAnimationMode {
    /// Write the transform directly (scaled when weighted).
    Override,
    /// Accumulate the weighted transform.
    Add,
    /// Accumulate the weighted transform with the shortest-arc rotation
    /// fix.
    BlendAdditive,
}

/// Sampling request of a single clip inside a blend.
#[derive(Clone)]
pub(crate) struct SampleData {
    pub clip: ClipResource,
    pub time_pos: f32,
    pub prev_time_pos: f32,
    pub length: f32,
    pub speed: f32,
    pub slot: u8,
}

impl SampleData {
    pub fn new(clip: ClipResource, speed: f32, slot: u8) -> Self {
        let length = clip.length;
        Self {
            clip,
            time_pos: 0.0,
            prev_time_pos: 0.0,
            length,
            speed,
            slot,
        }
    }
}

/// Maps integrated playback time into the `[0, length]` range of an
/// animation source, updating the stored time so looping stays stable
/// across frames. `speed` here is a time-scale factor; callers integrating
/// time themselves pass `1.0`.
pub(crate) fn get_anim_pos(
    time_pos: &mut f32,
    start_time_pos: f32,
    speed: f32,
    looped: bool,
    length: f32,
) -> f32 {
    if length <= BLEND_EPSILON {
        return 0.0;
    }
    let mut result = start_time_pos + *time_pos * speed;
    if result < 0.0 {
        if looped {
            result = crate::math::wrapf(result, 0.0, length);
        } else {
            // Reversed playback ended.
            result = 0.0;
        }
        *time_pos = result;
    } else if result >= length {
        if looped {
            result %= length;
            // Remove the start offset so the next frame keeps looping from
            // the animation start.
            *time_pos = result - start_time_pos;
        } else {
            result = length;
            *time_pos = result;
        }
    }
    result
}

/// Resolves both the current and the previous sampling position of an
/// animation source.
pub(crate) fn get_anim_positions(
    looped: bool,
    length: f32,
    speed: f32,
    start_time_pos: f32,
    prev_time_pos: &mut f32,
    new_time_pos: &mut f32,
) -> (f32, f32) {
    let pos = get_anim_pos(new_time_pos, start_time_pos, speed, looped, length);
    let prev_pos = get_anim_pos(prev_time_pos, start_time_pos, speed, looped, length);
    (pos, prev_pos)
}

/// Converts a position on an animation source (whose length may exceed the
/// clip's) into the clip-local sampling time, repeating the clip to fill
/// the gap and scaling so whole clip cycles fit without a cut.
pub(crate) fn get_clip_sample_pos(length: f32, clip_length: f32, pos: f32) -> f32 {
    if clip_length <= BLEND_EPSILON {
        return 0.0;
    }
    let cycles = (length / clip_length).floor().max(1.0);
    let cycle_length = clip_length * cycles;
    let adjust_rate_scale = if cycle_length > BLEND_EPSILON {
        length / cycle_length
    } else {
        1.0
    };
    let mut clip_pos = pos * adjust_rate_scale;
    while clip_pos > clip_length {
        clip_pos -= clip_length;
    }
    if clip_pos < 0.0 {
        clip_pos += clip_length;
    }
    clip_pos
}

impl Eval<'_> {
    /// Returns `true` when a bucket was not updated on the previous frame,
    /// which makes the next evaluation a (re)start.
    pub(crate) fn is_first_bucket_update(&self, last_update_frame: u64) -> bool {
        last_update_frame == 0 || last_update_frame + 1 < self.data.current_frame
    }

    /// Samples a clip into a fresh pose buffer, advancing `new_time_pos`
    /// with loop handling. Returns null when the clip is absent.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn sample_animation(
        &mut self,
        node_ref: NodeRef,
        looped: bool,
        length: f32,
        start_time_pos: f32,
        mut prev_time_pos: f32,
        new_time_pos: &mut f32,
        clip: Option<&ClipResource>,
        speed: f32,
    ) -> Value {
        let Some(clip) = clip else {
            return Value::Null;
        };
        let clip = clip.clone();

        let (pos, prev_pos) = get_anim_positions(
            looped,
            length,
            speed,
            start_time_pos,
            &mut prev_time_pos,
            new_time_pos,
        );

        let pose = self.new_pose();
        let mut buffer = self.ctx.take_pose(pose);
        buffer.position = pos;
        buffer.length = length;
        self.process_animation(
            &mut buffer,
            node_ref,
            looped,
            length,
            pos,
            prev_pos,
            &clip,
            speed,
            1.0,
            ProcessAnimationMode::Override,
            &mut None,
            false,
        );
        buffer.normalize_rotations(self.root_motion_mode != RootMotionExtraction::NoExtraction);
        self.ctx.put_pose(pose, buffer);
        Value::Pose(pose)
    }

    /// Samples two clips with complementary weights into one pose buffer.
    pub(crate) fn sample_animations_with_blend(
        &mut self,
        node_ref: NodeRef,
        looped: bool,
        start_time_pos: f32,
        a: &mut SampleData,
        b: &mut SampleData,
        alpha: f32,
    ) -> Value {
        let (pos_a, prev_pos_a) = get_anim_positions(
            looped,
            a.length,
            a.speed,
            start_time_pos,
            &mut a.prev_time_pos,
            &mut a.time_pos,
        );
        let (pos_b, prev_pos_b) = get_anim_positions(
            looped,
            b.length,
            b.speed,
            start_time_pos,
            &mut b.prev_time_pos,
            &mut b.time_pos,
        );

        let pose = self.new_pose();
        let mut buffer = self.ctx.take_pose(pose);
        buffer.position = (a.time_pos + b.time_pos) / 2.0;
        buffer.length = a.length.max(b.length);
        let clip_a = a.clip.clone();
        let clip_b = b.clip.clone();
        self.process_animation(
            &mut buffer,
            node_ref,
            looped,
            a.length,
            pos_a,
            prev_pos_a,
            &clip_a,
            a.speed,
            1.0 - alpha,
            ProcessAnimationMode::Override,
            &mut None,
            false,
        );
        self.process_animation(
            &mut buffer,
            node_ref,
            looped,
            b.length,
            pos_b,
            prev_pos_b,
            &clip_b,
            b.speed,
            alpha,
            ProcessAnimationMode::BlendAdditive,
            &mut None,
            false,
        );
        buffer.normalize_rotations(self.root_motion_mode != RootMotionExtraction::NoExtraction);
        self.ctx.put_pose(pose, buffer);
        Value::Pose(pose)
    }

    /// Samples three clips with barycentric weights into one pose buffer.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn sample_animations_with_blend3(
        &mut self,
        node_ref: NodeRef,
        looped: bool,
        start_time_pos: f32,
        a: &mut SampleData,
        b: &mut SampleData,
        c: &mut SampleData,
        alpha_a: f32,
        alpha_b: f32,
        alpha_c: f32,
    ) -> Value {
        let (pos_a, prev_pos_a) = get_anim_positions(
            looped,
            a.length,
            a.speed,
            start_time_pos,
            &mut a.prev_time_pos,
            &mut a.time_pos,
        );
        let (pos_b, prev_pos_b) = get_anim_positions(
            looped,
            b.length,
            b.speed,
            start_time_pos,
            &mut b.prev_time_pos,
            &mut b.time_pos,
        );
        let (pos_c, prev_pos_c) = get_anim_positions(
            looped,
            c.length,
            c.speed,
            start_time_pos,
            &mut c.prev_time_pos,
            &mut c.time_pos,
        );

        debug_assert!((alpha_a + alpha_b + alpha_c - 1.0).abs() <= BLEND_EPSILON);

        let pose = self.new_pose();
        let mut buffer = self.ctx.take_pose(pose);
        buffer.position = (a.time_pos + b.time_pos + c.time_pos) / 3.0;
        buffer.length = a.length.max(b.length).max(c.length);
        for (sample, pos, prev_pos, weight, mode) in [
            (&*a, pos_a, prev_pos_a, alpha_a, ProcessAnimationMode::Override),
            (&*b, pos_b, prev_pos_b, alpha_b, ProcessAnimationMode::BlendAdditive),
            (&*c, pos_c, prev_pos_c, alpha_c, ProcessAnimationMode::BlendAdditive),
        ] {
            let clip = sample.clip.clone();
            self.process_animation(
                &mut buffer,
                node_ref,
                looped,
                sample.length,
                pos,
                prev_pos,
                &clip,
                sample.speed,
                weight,
                mode,
                &mut None,
                false,
            );
        }
        buffer.normalize_rotations(self.root_motion_mode != RootMotionExtraction::NoExtraction);
        self.ctx.put_pose(pose, buffer);
        Value::Pose(pose)
    }

    /// Evaluates every channel of a clip into the destination pose with the
    /// requested blend mode and weight, processes nested clips, extracts
    /// root motion and fires animation events.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn process_animation(
        &mut self,
        pose: &mut ModelPose,
        node_ref: NodeRef,
        looped: bool,
        length: f32,
        pos: f32,
        prev_pos: f32,
        clip: &ClipResource,
        speed: f32,
        weight: f32,
        mode: ProcessAnimationMode,
        used_nodes: &mut Option<Vec<bool>>,
        is_nested: bool,
    ) {
        let clip_pos = get_clip_sample_pos(length, clip.length, pos);
        let clip_prev_pos = get_clip_sample_pos(length, clip.length, prev_pos);

        if let Some(trace) = self.add_trace_event(node_ref) {
            trace.asset = Some(clip.id);
            trace.value = clip_pos;
        }

        // Nested clips overlay their window first; the per-bone mask makes
        // the outer clip skip the bones they wrote.
        if !clip.nested.is_empty() {
            if used_nodes.is_none() {
                *used_nodes = Some(vec![false; self.skeleton.node_count()]);
            }
            for nested in clip.nested.iter() {
                let nested_pos = clip_pos - nested.time;
                if !nested.enabled || nested_pos < 0.0 || nested_pos >= nested.duration {
                    continue;
                }
                let nested_length = nested.clip.length;
                let scale = nested.speed * speed;
                let mut nested_new = nested_pos * scale;
                let mut nested_prev = (clip_prev_pos - nested.time) * scale;
                let (nested_pos, nested_prev_pos) = get_anim_positions(
                    nested.looped,
                    nested_length,
                    1.0,
                    nested.start_time,
                    &mut nested_prev,
                    &mut nested_new,
                );
                let nested_clip = nested.clip.clone();
                self.process_animation(
                    pose,
                    node_ref,
                    true,
                    nested_length,
                    nested_pos,
                    nested_prev_pos,
                    &nested_clip,
                    1.0,
                    weight,
                    mode,
                    used_nodes,
                    true,
                );
            }
        }

        // Clips authored on a foreign skeleton are reframed bone by bone.
        let source_skeleton = clip
            .skeleton
            .as_ref()
            .filter(|source| !std::ptr::eq(&***source, self.skeleton));
        let source_mapping = source_skeleton
            .map(|source| SkeletonMapping::new(source, self.skeleton));

        let weighted = weight < 1.0;
        for node_index in 0..pose.nodes.len() {
            let bone_name = &self.skeleton.nodes()[node_index].name;
            let channel = clip.channel_for(bone_name);
            let mut src_node = self.empty_pose.nodes[node_index];
            if let Some(channel) = channel {
                match (source_skeleton, source_mapping.as_ref()) {
                    (Some(source), Some(mapping)) => {
                        let fallback = mapping
                            .source_of(node_index)
                            .map(|i| source.nodes()[i].local_bind)
                            .unwrap_or(src_node);
                        let sampled = clip.channels()[channel].evaluate(clip_pos, &fallback);
                        src_node = super::retarget_node(
                            source,
                            self.skeleton,
                            mapping,
                            sampled,
                            node_index,
                        );
                    }
                    _ => {
                        src_node = clip.channels()[channel].evaluate(clip_pos, &src_node);
                    }
                }
                if let Some(mask) = used_nodes.as_deref_mut() {
                    mask[node_index] = true;
                }
            } else if is_nested {
                // Nested clips only write the bones they animate.
                continue;
            } else if used_nodes.as_deref().is_some_and(|mask| mask[node_index]) {
                // A nested clip already wrote this bone.
                continue;
            }

            let dst_node = &mut pose.nodes[node_index];
            match mode {
                ProcessAnimationMode::BlendAdditive => {
                    dst_node.translation += src_node.translation * weight;
                    dst_node.scale += src_node.scale * weight;
                    blend_additive_weighted_rotation(dst_node, &src_node, weight);
                }
                ProcessAnimationMode::Add => {
                    dst_node.translation += src_node.translation * weight;
                    dst_node.scale += src_node.scale * weight;
                    dst_node.rotation += src_node.rotation * weight;
                }
                ProcessAnimationMode::Override if weighted => {
                    dst_node.translation = src_node.translation * weight;
                    dst_node.scale = src_node.scale * weight;
                    dst_node.rotation = src_node.rotation * weight;
                }
                ProcessAnimationMode::Override => {
                    *dst_node = src_node;
                }
            }
        }

        if self.root_motion_mode != RootMotionExtraction::NoExtraction
            && !clip.root_motion.is_empty()
        {
            self.extract_root_motion(pose, clip, clip_pos, clip_prev_pos, weight, mode);
        }

        // Events fire from the dominant contributor of a blend only.
        if weight > 0.5 {
            self.process_anim_events(node_ref, looped, clip_pos, clip_prev_pos, clip, speed);
        }
    }

    fn extract_root_motion(
        &mut self,
        pose: &mut ModelPose,
        clip: &ClipResource,
        clip_pos: f32,
        clip_prev_pos: f32,
        weight: f32,
        mode: ProcessAnimationMode,
    ) {
        let motion_position_xz = clip.root_motion.contains(RootMotionFlags::POSITION_XZ);
        let motion_position_y = clip.root_motion.contains(RootMotionFlags::POSITION_Y);
        let motion_rotation = clip.root_motion.contains(RootMotionFlags::ROTATION);
        let motion_position = motion_position_xz | motion_position_y;
        let position_mask = Vector3::new(
            if motion_position_xz { 1.0 } else { 0.0 },
            if motion_position_y { 1.0 } else { 0.0 },
            if motion_position_xz { 1.0 } else { 0.0 },
        );

        let root_node_index = clip
            .root_node
            .as_deref()
            .map(|name| self.skeleton.find_node(name))
            .filter(|index| *index >= 0)
            .unwrap_or(0) as usize;
        let ref_pose = self.empty_pose.nodes[root_node_index];
        let channel = clip.channel_for(&self.skeleton.nodes()[root_node_index].name);

        let mut src_node = Transform::IDENTITY;
        if self.root_motion_mode == RootMotionExtraction::Enable {
            if let Some(channel) = channel {
                let root_channel = &clip.channels()[channel];
                let root_before = root_channel.evaluate(clip_prev_pos, &ref_pose);
                let root_now = root_channel.evaluate(clip_pos, &ref_pose);

                if clip_pos < clip_prev_pos {
                    // The playback wrapped over the loop seam; sum the
                    // motion up to the clip end and from the clip start,
                    // (end - before + now - begin), to keep it continuous.
                    let root_begin = root_channel.evaluate(0.0, &ref_pose);
                    let root_end = root_channel.evaluate(clip.length, &ref_pose);
                    if motion_position {
                        src_node.translation = (root_end.translation - root_before.translation
                            + root_now.translation
                            - root_begin.translation)
                            .component_mul(&position_mask);
                    }
                    if motion_rotation {
                        src_node.rotation = (root_before.unit_rotation().inverse()
                            * root_end.unit_rotation())
                        .into_inner()
                            * (root_begin.unit_rotation().inverse() * root_now.unit_rotation())
                                .into_inner();
                    }
                } else {
                    if motion_position {
                        src_node.translation = (root_now.translation - root_before.translation)
                            .component_mul(&position_mask);
                    }
                    if motion_rotation {
                        src_node.rotation = (root_before.unit_rotation().inverse()
                            * root_now.unit_rotation())
                        .into_inner();
                    }
                }

                // Convert the delta from the root bone's local space into
                // instance space in case the bone has animated parents.
                let mut parent = self.skeleton.nodes()[root_node_index].parent;
                while parent != -1 {
                    let parent_node = &pose.nodes[parent as usize];
                    src_node.translation = parent_node.local_to_world(src_node.translation);
                    parent = self.skeleton.nodes()[parent as usize].parent;
                }
            }
        }

        // Remove the extracted components from the root bone.
        let root_bone = &mut pose.nodes[root_node_index];
        if motion_position {
            root_bone.translation = ref_pose.translation.component_mul(&position_mask)
                + root_bone.translation.component_mul(
                    &(Vector3::new(1.0, 1.0, 1.0) - position_mask),
                );
        }
        if motion_rotation {
            root_bone.rotation = ref_pose.rotation;
        }

        let dst = &mut pose.root_motion;
        match mode {
            ProcessAnimationMode::BlendAdditive => {
                if motion_position {
                    dst.translation +=
                        (src_node.translation * weight).component_mul(&position_mask);
                }
                if motion_rotation {
                    blend_additive_weighted_rotation(dst, &src_node, weight);
                }
            }
            ProcessAnimationMode::Add => {
                if motion_position {
                    dst.translation +=
                        (src_node.translation * weight).component_mul(&position_mask);
                }
                if motion_rotation {
                    dst.rotation += src_node.rotation * weight;
                }
            }
            ProcessAnimationMode::Override => {
                if weight < 1.0 {
                    if motion_position {
                        dst.translation =
                            (src_node.translation * weight).component_mul(&position_mask);
                    }
                    if motion_rotation {
                        dst.rotation = src_node.rotation * weight;
                    }
                } else {
                    if motion_position {
                        dst.translation = src_node.translation.component_mul(&position_mask);
                    }
                    if motion_rotation {
                        dst.rotation = src_node.rotation;
                    }
                }
            }
        }
    }

    /// Fires the events of a clip whose windows intersect the traversed
    /// `[prev, now]` span, bracketing continuous events with begin/end.
    pub(crate) fn process_anim_events(
        &mut self,
        node_ref: NodeRef,
        looped: bool,
        clip_pos: f32,
        clip_prev_pos: f32,
        clip: &ClipResource,
        speed: f32,
    ) {
        if !clip.has_events() {
            return;
        }
        let mut event_time_min = clip_prev_pos;
        let mut event_time_max = clip_pos;
        if looped && self.dt * speed < 0.0 {
            std::mem::swap(&mut event_time_min, &mut event_time_max);
        }
        let event_time = clip_pos;
        let event_dt = clip_pos - clip_prev_pos;

        for (track_index, track) in clip.events.iter().enumerate() {
            for (key_index, key) in track.keys.iter().enumerate() {
                if key.name.is_empty() {
                    continue;
                }
                let continuous = key.duration > 0.0;
                let active_key = ActiveEventKey {
                    node: node_ref,
                    clip: clip.id,
                    track: track_index as u32,
                    key: key_index as u32,
                };
                if key.time <= event_time_max && event_time_min <= key.time + key.duration {
                    let mut was_active = false;
                    if continuous {
                        if let Some(active) = self
                            .data
                            .active_events
                            .iter_mut()
                            .find(|e| e.key == active_key)
                        {
                            active.hit = true;
                            was_active = true;
                        }
                        if !was_active {
                            self.data.active_events.push(ActiveEvent {
                                key: active_key,
                                name: key.name.clone(),
                                hit: true,
                            });
                            self.data.push_event(AnimEvent {
                                kind: AnimEventKind::Begin,
                                name: key.name.clone(),
                                clip: clip.id,
                                time: event_time,
                                dt: event_dt,
                            });
                        }
                    }
                    self.data.push_event(AnimEvent {
                        kind: AnimEventKind::Event,
                        name: key.name.clone(),
                        clip: clip.id,
                        time: event_time,
                        dt: event_dt,
                    });
                } else if continuous {
                    if let Some(index) = self
                        .data
                        .active_events
                        .iter()
                        .position(|e| e.key == active_key)
                    {
                        self.data.active_events.remove(index);
                        self.data.push_event(AnimEvent {
                            kind: AnimEventKind::End,
                            name: key.name.clone(),
                            clip: clip.id,
                            time: event_time,
                            dt: event_dt,
                        });
                    }
                }
            }
        }
    }

    /// Handler of the clip sampling node.
    pub(crate) fn anim_play(&mut self, node_ref: NodeRef, box_id: u32) -> Value {
        let node = self.graph.node(node_ref);
        let bucket_index = node.bucket_index.max(0) as usize;
        let clip = match &node.data {
            NodeData::Animation { clip } => clip.clone(),
            _ => None,
        };
        let length = clip.as_ref().map(|c| c.length).unwrap_or(0.0);

        match box_id {
            // Sampled pose output.
            0 => {
                let speed = self.input_or_value(node_ref, 5, 1).as_float();
                let looped = self.input_or_value(node_ref, 6, 2).as_bool();
                let start_time_pos = self.input_or_value(node_ref, 7, 3).as_float();

                let (mut time_position, last_update_frame) =
                    match self.data.buckets.get(bucket_index) {
                        Some(Bucket::Animation(bucket)) => {
                            (bucket.time_position, bucket.last_update_frame)
                        }
                        _ => (0.0, 0),
                    };
                // Negative playback starts from the clip end.
                if speed < 0.0 && self.is_first_bucket_update(last_update_frame) {
                    time_position = length;
                }
                let mut new_time_pos = time_position + self.dt * speed;

                let value = self.sample_animation(
                    node_ref,
                    looped,
                    length,
                    start_time_pos,
                    time_position,
                    &mut new_time_pos,
                    clip.as_ref(),
                    1.0,
                );

                let frame = self.data.current_frame;
                if let Some(Bucket::Animation(bucket)) = self.data.buckets.get_mut(bucket_index) {
                    bucket.time_position = new_time_pos;
                    bucket.last_update_frame = frame;
                }
                value
            }
            // Normalized playback time.
            1 => {
                let start_time_pos = self.input_or_value(node_ref, 7, 3).as_float();
                let time = match self.data.buckets.get(bucket_index) {
                    Some(Bucket::Animation(bucket)) => bucket.time_position,
                    _ => 0.0,
                };
                let mut value = start_time_pos + time;
                if length > BLEND_EPSILON {
                    value /= length;
                }
                Value::Float(value)
            }
            // Playback time.
            2 => {
                let start_time_pos = self.input_or_value(node_ref, 7, 3).as_float();
                let time = match self.data.buckets.get(bucket_index) {
                    Some(Bucket::Animation(bucket)) => bucket.time_position,
                    _ => 0.0,
                };
                Value::Float(start_time_pos + time)
            }
            // Clip length.
            3 => Value::Float(length),
            // Is playing: the bucket was updated during this or the
            // previous frame.
            4 => {
                let last_update_frame = match self.data.buckets.get(bucket_index) {
                    Some(Bucket::Animation(bucket)) => bucket.last_update_frame,
                    _ => 0,
                };
                Value::Bool(last_update_frame + 1 >= self.data.current_frame)
            }
            _ => Value::Null,
        }
    }
}

/// Accumulates a weighted rotation picking the shortest arc, which avoids
/// sign flip artifacts when summing quaternions.
pub(crate) fn blend_additive_weighted_rotation(
    base: &mut Transform,
    additive: &Transform,
    weight: f32,
) {
    let mut additive = additive.rotation * weight;
    if base.rotation.dot(&additive) < 0.0 {
        additive = -additive;
    }
    base.rotation += additive;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_anim_pos_loops_forward() {
        // Length 2, dt 0.5 per tick: the observed positions wrap at the
        // seam back to zero.
        let mut time = 0.0;
        let mut observed = Vec::new();
        for _ in 0..5 {
            time += 0.5;
            observed.push(get_anim_pos(&mut time, 0.0, 1.0, true, 2.0));
        }
        assert_eq!(observed, vec![0.5, 1.0, 1.5, 0.0, 0.5]);
    }

    #[test]
    fn test_anim_pos_clamps_without_loop() {
        let mut time = 2.5;
        assert_eq!(get_anim_pos(&mut time, 0.0, 1.0, false, 2.0), 2.0);
        assert_eq!(time, 2.0);
    }

    #[test]
    fn test_anim_pos_reversed_wraps() {
        let mut time = -0.25;
        let pos = get_anim_pos(&mut time, 0.0, 1.0, true, 1.0);
        assert!((pos - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_clip_sample_pos_repeats_short_clip() {
        // A 1 second clip on a 2 second source plays twice.
        assert!((get_clip_sample_pos(2.0, 1.0, 0.25) - 0.25).abs() < 1e-6);
        assert!((get_clip_sample_pos(2.0, 1.0, 1.25) - 0.25).abs() < 1e-6);
    }
}
