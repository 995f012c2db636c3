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

//! Slot node: plays host-pushed clips mixed over the graph's own pose with
//! fade-in/out windows.

use super::Eval;
use crate::{
    alpha::AlphaBlendMode,
    graph::NodeRef,
    instance::Bucket,
    value::Value,
};

impl Eval<'_> {
    /// Handler of the slot playback node.
    pub(crate) fn slot(&mut self, node_ref: NodeRef) -> Value {
        let node = self.graph.node(node_ref);
        let bucket_index = node.bucket_index.max(0) as usize;
        let slot_name = node.value(0).as_str().to_string();

        if self.data.slots.is_empty() {
            return self.input_value(node_ref, 1, Value::Null);
        }

        let mut bucket = match self.data.buckets.get(bucket_index) {
            Some(Bucket::Slot(bucket)) => *bucket,
            _ => return Value::Null,
        };

        // The playing request finished or was removed.
        if bucket.index != -1
            && self
                .data
                .slots
                .get(bucket.index as usize)
                .map_or(true, |slot| slot.clip.is_none())
        {
            bucket.index = -1;
        }

        if bucket.index == -1 {
            // Pick the first pending request with a matching name. Time and
            // blend-in positions carry over when crossfading between two
            // clips of the same slot.
            for (index, slot) in self.data.slots.iter().enumerate() {
                if slot.clip.is_some() && slot.name == slot_name {
                    bucket.index = index as i32;
                    bucket.blend_out_position = 0.0;
                    bucket.loops_done = 0;
                    bucket.loops_left = slot.loop_count;
                    break;
                }
            }
            if bucket.index == -1 {
                let value = self.input_value(node_ref, 1, Value::Null);
                // Drop leftover times once no follow-up clip arrived.
                if bucket.blend_in_position > 0.0 {
                    bucket.time_position = 0.0;
                    bucket.blend_in_position = 0.0;
                }
                if let Some(Bucket::Slot(stored)) = self.data.buckets.get_mut(bucket_index) {
                    *stored = bucket;
                }
                return value;
            }
        }

        let slot_index = bucket.index as usize;
        let (clip, slot_speed, slot_pause, slot_reset, blend_in_time, blend_out_time) = {
            let slot = &self.data.slots[slot_index];
            (
                slot.clip.clone(),
                slot.speed,
                slot.pause,
                slot.reset,
                slot.blend_in_time,
                slot.blend_out_time,
            )
        };
        let Some(clip) = clip else {
            if let Some(Bucket::Slot(stored)) = self.data.buckets.get_mut(bucket_index) {
                *stored = bucket;
            }
            return self.input_value(node_ref, 1, Value::Null);
        };

        let delta_time = if slot_pause { 0.0 } else { self.dt * slot_speed };
        let length = clip.length;
        let looped = bucket.loops_left != 0;
        let mut new_time_pos = bucket.time_position + delta_time;
        if new_time_pos >= length {
            if bucket.loops_left == 0 {
                // Played to the end: release the clip and return to the
                // input pose.
                let value = self.input_value(node_ref, 1, Value::Null);
                bucket.index = -1;
                self.data.slots[slot_index].clip = None;
                if let Some(Bucket::Slot(stored)) = self.data.buckets.get_mut(bucket_index) {
                    *stored = bucket;
                }
                return value;
            }
            if bucket.loops_left > 0 {
                bucket.loops_left -= 1;
            }
            bucket.loops_done += 1;
        }

        // Speed is already folded into the integrated time.
        let mut value = self.sample_animation(
            node_ref,
            looped,
            length,
            0.0,
            bucket.time_position,
            &mut new_time_pos,
            Some(&clip),
            1.0,
        );
        bucket.time_position = new_time_pos;

        if slot_reset {
            // Crossfade to the next queued clip of the same slot, or back
            // to the input pose.
            let next_index = self.data.slots.iter().enumerate().position(|(i, s)| {
                i != slot_index && s.clip.is_some() && s.name == slot_name
            });

            let old_blend_out = bucket.blend_out_position;
            bucket.blend_out_position += delta_time;
            bucket.blend_in_position = bucket.blend_out_position;
            let alpha = if blend_out_time > 0.0 {
                bucket.blend_out_position / blend_out_time
            } else {
                1.0
            };

            if let Some(next_index) = next_index {
                let next_clip = self.data.slots[next_index].clip.clone();
                let mut next_time = bucket.blend_in_position;
                let next_value = self.sample_animation(
                    node_ref,
                    false,
                    next_clip.as_ref().map(|c| c.length).unwrap_or(0.0),
                    0.0,
                    old_blend_out,
                    &mut next_time,
                    next_clip.as_ref(),
                    1.0,
                );
                bucket.blend_in_position = next_time;
                value = self.blend(value, next_value, alpha, AlphaBlendMode::HermiteCubic);
            } else {
                let input = self.input_value(node_ref, 1, Value::Null);
                value = self.blend(value, input, alpha, AlphaBlendMode::HermiteCubic);
            }

            if bucket.blend_out_position >= blend_out_time {
                // Hand over to the next clip, or rewind for the next use.
                self.data.slots[slot_index].clip = None;
                self.data.slots[slot_index].reset = false;
                bucket.index = -1;
                if next_index.is_none() {
                    bucket.time_position = 0.0;
                    bucket.blend_in_position = 0.0;
                } else {
                    bucket.time_position = bucket.blend_in_position;
                }
            }
        } else if bucket.loops_left == 0
            && blend_out_time > 0.0
            && length - blend_out_time < bucket.time_position
        {
            // Fade out over the input pose as the clip approaches its end.
            let input = self.input_value(node_ref, 1, Value::Null);
            bucket.blend_out_position += delta_time;
            let alpha = bucket.blend_out_position / blend_out_time;
            value = self.blend(value, input, alpha, AlphaBlendMode::HermiteCubic);
        } else if bucket.loops_done == 0
            && blend_in_time > 0.0
            && bucket.blend_in_position < blend_in_time
        {
            // Fade in from the input pose right after the start.
            let input = self.input_value(node_ref, 1, Value::Null);
            bucket.blend_in_position += delta_time;
            let alpha = bucket.blend_in_position / blend_in_time;
            value = self.blend(input, value, alpha, AlphaBlendMode::HermiteCubic);
        }

        if let Some(Bucket::Slot(stored)) = self.data.buckets.get_mut(bucket_index) {
            *stored = bucket;
        }
        value
    }
}
