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

//! Graph instance: the per-character playback state of a shared graph
//! definition. Holds parameter overrides, node state buckets, slot
//! requests, the output pose and the queues of fired events.

use crate::{
    clip::ClipResource,
    graph::{AnimGraph, BucketKind, NodeRef},
    math::Transform,
    skeleton::{SkeletonMapping, SkeletonResource},
    value::Value,
};
use nalgebra::Matrix4;
use parking_lot::Mutex;
use uuid::Uuid;

/// Playback state of a clip sampling node (or the time tool node).
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AnimationBucket {
    /// Current integrated playback time, in seconds.
    pub time_position: f32,
    /// Frame index of the last update of this bucket.
    pub last_update_frame: u64,
}

/// Playback state of a multi-blend node. Up to three clips play at once
/// inside a 2D blend triangle; each keeps an independent time position.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct MultiBlendBucket {
    /// Time positions of the tracked clips.
    pub time_positions: [f32; 3],
    /// Blend point slots of the tracked clips.
    pub animations: [u8; 3],
    /// Amount of tracked clips.
    pub count: u8,
    /// Frame index of the last update of this bucket.
    pub last_update_frame: u64,
}

/// Crossfade state of an indexed pose selector.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BlendPoseBucket {
    /// Progress of the running crossfade, in seconds.
    pub transition_position: f32,
    /// Previously selected pose index, `-1` before the first evaluation.
    pub previous_index: i32,
}

/// Current state and transition progress of a state machine node.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct StateMachineBucket {
    /// Frame index of the last update of this bucket.
    pub last_update_frame: u64,
    /// The active state node (an index into the machine's sub-graph).
    pub current_state: Option<u32>,
    /// The running transition (an index into the machine graph's
    /// transition table).
    pub active_transition: Option<u16>,
    /// The interrupted transition kept as the blend source.
    pub base_transition: Option<u16>,
    /// Source state of the interrupted transition.
    pub base_transition_state: Option<u32>,
    /// Progress of the active transition, in seconds.
    pub transition_position: f32,
    /// Frozen progress of the interrupted transition.
    pub base_transition_position: f32,
}

/// Playback state of a slot node.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SlotBucket {
    /// Index of the playing slot request, `-1` when idle.
    pub index: i32,
    /// Playback time of the slot clip.
    pub time_position: f32,
    /// Progress of the blend-in window.
    pub blend_in_position: f32,
    /// Progress of the blend-out window.
    pub blend_out_position: f32,
    /// Completed loops.
    pub loops_done: i32,
    /// Remaining loops; negative means infinite.
    pub loops_left: i32,
}

/// Per-instance constant data captured on first evaluation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct InstanceDataBucket {
    /// `true` until the data has been captured.
    pub init: bool,
    /// The captured values.
    pub data: [f32; 4],
}

/// Persistent state of a single stateful graph node. The variant is fixed
/// by the node's type; bucket indices are assigned at graph load and stay
/// stable for the lifetime of the instance.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Bucket {
    /// See [`AnimationBucket`].
    Animation(AnimationBucket),
    /// See [`MultiBlendBucket`].
    MultiBlend(MultiBlendBucket),
    /// See [`BlendPoseBucket`].
    BlendPose(BlendPoseBucket),
    /// See [`StateMachineBucket`].
    StateMachine(StateMachineBucket),
    /// See [`SlotBucket`].
    Slot(SlotBucket),
    /// See [`InstanceDataBucket`].
    InstanceData(InstanceDataBucket),
}

impl Bucket {
    /// Creates a bucket of the given kind in its initial state.
    pub fn new(kind: BucketKind) -> Self {
        match kind {
            BucketKind::Animation => Bucket::Animation(AnimationBucket::default()),
            BucketKind::MultiBlend => Bucket::MultiBlend(MultiBlendBucket::default()),
            BucketKind::BlendPose => Bucket::BlendPose(BlendPoseBucket {
                transition_position: 0.0,
                previous_index: -1,
            }),
            BucketKind::StateMachine => Bucket::StateMachine(StateMachineBucket::default()),
            BucketKind::Slot => Bucket::Slot(SlotBucket {
                index: -1,
                time_position: 0.0,
                blend_in_position: 0.0,
                blend_out_position: 0.0,
                loops_done: 0,
                loops_left: 0,
            }),
            BucketKind::InstanceData => Bucket::InstanceData(InstanceDataBucket {
                init: true,
                data: [0.0; 4],
            }),
        }
    }
}

/// A slot playback request pushed by the host. The first slot node whose
/// name matches picks the request up and mixes the clip over its input
/// pose.
#[derive(Clone, Debug)]
pub struct AnimGraphSlot {
    /// Name of the slot channel.
    pub name: String,
    /// The clip to play; cleared by the evaluator when playback finishes.
    pub clip: Option<ClipResource>,
    /// Playback speed scale.
    pub speed: f32,
    /// Fade-in duration over the input pose, in seconds.
    pub blend_in_time: f32,
    /// Fade-out duration before the clip ends, in seconds.
    pub blend_out_time: f32,
    /// Extra loops to play; `0` plays once, negative loops forever.
    pub loop_count: i32,
    /// Freezes playback while set.
    pub pause: bool,
    /// Requests a crossfade to the next queued clip of the same slot, or
    /// back to the input pose.
    pub reset: bool,
}

impl Default for AnimGraphSlot {
    fn default() -> Self {
        Self {
            name: String::new(),
            clip: None,
            speed: 1.0,
            blend_in_time: 0.0,
            blend_out_time: 0.0,
            loop_count: 0,
            pause: false,
            reset: false,
        }
    }
}

/// Kind of a fired animation event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AnimEventKind {
    /// A point event, or the periodic tick of a continuous event.
    Event,
    /// A continuous event entered its time window.
    Begin,
    /// A continuous event left its time window.
    End,
}

/// An animation event delivered to the host.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimEvent {
    /// Kind of the event.
    pub kind: AnimEventKind,
    /// Name of the event key.
    pub name: String,
    /// Identifier of the clip that fired the event.
    pub clip: Uuid,
    /// Clip playback time at the moment of firing, in seconds.
    pub time: f32,
    /// Playback time advance of the firing update, in seconds.
    pub dt: f32,
}

/// Identity of a continuous event occurrence, used to bracket begin/end
/// pairs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ActiveEventKey {
    /// The graph node that sampled the clip.
    pub node: NodeRef,
    /// Identifier of the clip.
    pub clip: Uuid,
    /// Index of the event track in the clip.
    pub track: u32,
    /// Index of the key in the track.
    pub key: u32,
}

/// A continuous event currently inside its time window.
#[derive(Clone, Debug)]
pub(crate) struct ActiveEvent {
    pub key: ActiveEventKey,
    pub name: String,
    /// Set when the event window was hit during the current tick.
    pub hit: bool,
}

/// A single entry of the playback trace, recorded when tracing is enabled
/// on the instance.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceEvent {
    /// Contextual asset, e.g. the sampled clip.
    pub asset: Option<Uuid>,
    /// Generic value contextual to the node kind, e.g. the sampling time or
    /// a packed blend position.
    pub value: f32,
    /// Identifier of the traced node.
    pub node_id: u32,
    /// Identifiers of the enclosing nodes (state machines, states,
    /// functions), outermost first. Unused entries are zero.
    pub node_path: [u32; 8],
}

/// The per-character state needed to play an animation graph. Exclusively
/// owned by one thread during an update; the outgoing event queue can be
/// drained from any thread.
#[derive(Debug, Default)]
pub struct AnimGraphInstance {
    /// Version of the graph this instance state was built for. A mismatch
    /// with the graph makes the next update rebuild all state.
    pub(crate) version: u32,
    /// Per-instance parameter values, same layout as the graph's parameter
    /// list.
    pub(crate) parameters: Vec<Value>,
    /// State buckets of every stateful node of the graph tree.
    pub(crate) buckets: Vec<Bucket>,
    /// The last host time the instance was updated at. Maintained by the
    /// host, `-1` marks the instance as never updated.
    pub last_update_time: f32,
    /// Monotonic update counter.
    pub(crate) current_frame: u64,
    /// The root bone transformation produced by the previous update.
    pub root_transform: Transform,
    /// The root motion delta produced by the previous update.
    pub root_motion: Transform,
    /// Final per-bone local-space matrices, sized to the target skeleton.
    pub nodes_pose: Vec<Matrix4<f32>>,
    /// Optional rendering skeleton distinct from the graph's base skeleton;
    /// the final pose is retargeted onto it.
    pub(crate) target_skeleton: Option<SkeletonResource>,
    /// Cached base-to-target mapping, rebuilt when the target changes.
    pub(crate) retarget_mapping: Option<SkeletonMapping>,
    /// Slot playback requests pushed by the host.
    pub slots: Vec<AnimGraphSlot>,
    /// Continuous events currently inside their window.
    pub(crate) active_events: Vec<ActiveEvent>,
    /// Events fired during updates, waiting for the host to drain them.
    outgoing_events: Mutex<Vec<AnimEvent>>,
    /// Enables collection of [`TraceEvent`] records during updates.
    pub enable_tracing: bool,
    /// Trace records of the last update.
    pub trace_events: Vec<TraceEvent>,
}

impl AnimGraphInstance {
    /// Creates an instance with state laid out for the given graph.
    pub fn new(graph: &AnimGraph) -> Self {
        let mut instance = Self {
            last_update_time: -1.0,
            ..Default::default()
        };
        instance.reset_state(graph);
        instance
    }

    /// Rebuilds parameters and buckets from the graph defaults and adopts
    /// the graph's version.
    pub fn reset_state(&mut self, graph: &AnimGraph) {
        self.version = graph.version;
        self.parameters = graph
            .parameters()
            .iter()
            .map(|p| p.value.clone())
            .collect();
        self.buckets = graph
            .bucket_kinds()
            .iter()
            .map(|kind| Bucket::new(*kind))
            .collect();
        self.active_events.clear();
        self.current_frame = 0;
    }

    /// Version of the graph the instance state was built for.
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Monotonic update counter.
    #[inline]
    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    /// Returns the instance's state buckets.
    #[inline]
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Returns the instance's parameter values.
    #[inline]
    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }

    /// Overrides a parameter value by its index in the graph's parameter
    /// list.
    pub fn set_parameter(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.parameters.get_mut(index) {
            *slot = value;
        }
    }

    /// Overrides a parameter value by its name. Returns `false` when the
    /// graph has no such parameter.
    pub fn set_parameter_by_name(&mut self, graph: &AnimGraph, name: &str, value: Value) -> bool {
        match graph.parameters().iter().position(|p| p.name == name) {
            Some(index) => {
                self.set_parameter(index, value);
                true
            }
            None => false,
        }
    }

    /// Sets the skeleton the final pose is produced for. `None` outputs on
    /// the graph's base skeleton.
    pub fn set_target_skeleton(&mut self, skeleton: Option<SkeletonResource>) {
        self.target_skeleton = skeleton;
        self.retarget_mapping = None;
    }

    /// Returns the target skeleton override, if any.
    #[inline]
    pub fn target_skeleton(&self) -> Option<&SkeletonResource> {
        self.target_skeleton.as_ref()
    }

    /// Pushes a slot playback request.
    pub fn push_slot(&mut self, slot: AnimGraphSlot) {
        self.slots.push(slot);
    }

    /// Removes finished slot requests (their clip handle was released by
    /// the evaluator).
    pub fn sweep_slots(&mut self) {
        self.slots.retain(|slot| slot.clip.is_some());
    }

    pub(crate) fn push_event(&self, event: AnimEvent) {
        self.outgoing_events.lock().push(event);
    }

    /// Takes all events fired since the previous drain, in firing order.
    pub fn drain_events(&self) -> Vec<AnimEvent> {
        std::mem::take(&mut *self.outgoing_events.lock())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::BucketKind;

    #[test]
    fn test_bucket_initial_states() {
        let Bucket::BlendPose(blend) = Bucket::new(BucketKind::BlendPose) else {
            panic!("wrong bucket kind");
        };
        assert_eq!(blend.previous_index, -1);

        let Bucket::Slot(slot) = Bucket::new(BucketKind::Slot) else {
            panic!("wrong bucket kind");
        };
        assert_eq!(slot.index, -1);

        let Bucket::InstanceData(data) = Bucket::new(BucketKind::InstanceData) else {
            panic!("wrong bucket kind");
        };
        assert!(data.init);
    }

    #[test]
    fn test_event_queue_drain_preserves_order() {
        let instance = AnimGraphInstance::default();
        for i in 0..3 {
            instance.push_event(AnimEvent {
                kind: AnimEventKind::Event,
                name: format!("e{i}"),
                clip: Uuid::nil(),
                time: i as f32,
                dt: 0.1,
            });
        }
        let events: Vec<String> = instance.drain_events().into_iter().map(|e| e.name).collect();
        assert_eq!(events, vec!["e0", "e1", "e2"]);
        assert!(instance.drain_events().is_empty());
    }
}
