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

//! State machine evaluation: state sampling, transition scanning with
//! rules, crossfades, interruption handling and instant transition chains.

use super::{Eval, TransitionData, BLEND_EPSILON};
use crate::{
    graph::{ids, GraphId, NodeData, NodeRef, StateTransition, TransitionFlags},
    instance::{Bucket, StateMachineBucket},
    value::Value,
};

impl Eval<'_> {
    /// Handler of the transition source playback info node, usable inside
    /// transition rule graphs.
    pub(crate) fn transition_source(&mut self, box_id: u32) -> Value {
        let data = self.ctx.transition_data;
        match box_id {
            // Length
            0 => Value::Float(data.length),
            // Time
            1 => Value::Float(data.position),
            // Normalized time
            2 => Value::Float(data.position / data.length),
            // Remaining time
            3 => Value::Float(data.length - data.position),
            // Remaining normalized time
            4 => Value::Float(1.0 - data.position / data.length),
            _ => Value::Null,
        }
    }

    /// Samples the pose of a state by evaluating its sub-graph root.
    fn sample_state(&mut self, machine_graph: GraphId, state_node: u32) -> Value {
        let state_ref = NodeRef {
            graph: machine_graph,
            node: state_node,
        };
        let NodeData::State { graph, .. } = &self.graph.node(state_ref).data else {
            return Value::Null;
        };
        let Some(state_graph) = *graph else {
            return Value::Null;
        };
        let Some(root) = self.graph.graph(state_graph).root_node else {
            return Value::Null;
        };

        self.add_trace_event(state_ref);

        let state_id = self.graph.node(state_ref).id;
        let pushed = self.ctx.node_path.try_push(state_id).is_ok();
        let value = self.eat_box(crate::graph::BoxRef {
            node: NodeRef {
                graph: state_graph,
                node: root,
            },
            box_id: 0,
        });
        if pushed {
            self.ctx.node_path.pop();
        }
        value
    }

    fn transition(&self, machine_graph: GraphId, index: u16) -> Option<StateTransition> {
        self.graph
            .graph(machine_graph)
            .state_transitions
            .get(index as usize)
            .cloned()
    }

    /// Transition index list of a state or any-state node.
    fn transitions_of(&self, machine_graph: GraphId, node: u32) -> Vec<u16> {
        match &self.graph.graph(machine_graph).nodes[node as usize].data {
            NodeData::State { transitions, .. } | NodeData::AnyState { transitions } => {
                transitions.clone()
            }
            _ => Vec::new(),
        }
    }

    /// Resets the buckets of a state's sub-graph tree.
    fn reset_state_graph(&mut self, machine_graph: GraphId, state_node: u32) {
        let state_graph = match &self.graph.graph(machine_graph).nodes[state_node as usize].data {
            NodeData::State { graph, .. } => *graph,
            _ => None,
        };
        if let Some(state_graph) = state_graph {
            self.reset_buckets(state_graph);
        }
    }

    /// Activates (or clears) a transition and releases any stored base
    /// transition.
    fn init_state_transition(
        &mut self,
        bucket: &mut StateMachineBucket,
        machine_graph: GraphId,
        transition: Option<u16>,
    ) {
        bucket.active_transition = transition;
        bucket.transition_position = 0.0;

        if let Some(base_state) = bucket.base_transition_state.take() {
            self.reset_state_graph(machine_graph, base_state);
        }
        bucket.base_transition = None;
        bucket.base_transition_position = 0.0;
    }

    /// Commits the active transition: the destination becomes the current
    /// state and the source state's graph is rewound.
    fn end_transition(&mut self, bucket: &mut StateMachineBucket, machine_graph: GraphId) {
        let (Some(current), Some(active)) = (bucket.current_state, bucket.active_transition)
        else {
            return;
        };
        let Some(transition) = self.transition(machine_graph, active) else {
            return;
        };
        self.reset_state_graph(machine_graph, current);
        bucket.current_state = Some(transition.destination);
        self.init_state_transition(bucket, machine_graph, None);
    }

    /// Scans a transition list in priority order and returns the first
    /// transition whose rule passes. `sample_state` provides the playback
    /// info rule graphs read; transitions into it (or into `ignore_state`)
    /// are skipped.
    fn scan_transitions(
        &mut self,
        machine_graph: GraphId,
        list: &[u16],
        sample_state: u32,
        ignore_state: Option<u32>,
    ) -> Option<u16> {
        for &index in list {
            let Some(transition) = self.transition(machine_graph, index) else {
                continue;
            };
            if transition.destination == sample_state
                || Some(transition.destination) == ignore_state
            {
                continue;
            }

            // Expose the source state playback info to rule graphs.
            let source_value = self.sample_state(machine_graph, sample_state);
            self.ctx.transition_data = match source_value.as_pose() {
                Some(pose) => {
                    let pose = self.ctx.pose(pose);
                    let length = pose.length.max(0.0);
                    TransitionData {
                        position: pose.position.clamp(0.0, length),
                        length,
                    }
                }
                None => TransitionData::default(),
            };

            let use_default_rule = transition.flags.contains(TransitionFlags::USE_DEFAULT_RULE);
            if !use_default_rule {
                if let Some(rule_graph) = transition.rule_graph {
                    if let Some(rule_root) = self.graph.graph(rule_graph).root_node {
                        let fired = self
                            .eat_box(crate::graph::BoxRef {
                                node: NodeRef {
                                    graph: rule_graph,
                                    node: rule_root,
                                },
                                box_id: 0,
                            })
                            .as_bool();
                        if !fired {
                            continue;
                        }
                    }
                }
            }

            let can_enter = if use_default_rule {
                // Fire when the source state playback is about to end,
                // splitting the blend evenly across both states.
                let half_duration = transition.blend_duration * 0.5 + BLEND_EPSILON;
                let end_position = self.ctx.transition_data.length - half_duration;
                self.ctx.transition_data.position >= end_position
            } else {
                transition.rule_graph.is_some()
            };
            if can_enter {
                return Some(index);
            }

            if transition.flags.contains(TransitionFlags::SOLO) {
                break;
            }
        }
        None
    }

    /// Scans the outgoing transitions of a state (for interruption checks).
    fn scan_state_transitions(
        &mut self,
        machine_graph: GraphId,
        state_node: u32,
        ignore_state: Option<u32>,
    ) -> Option<u16> {
        let list = self.transitions_of(machine_graph, state_node);
        self.scan_transitions(machine_graph, &list, state_node, ignore_state)
    }

    /// Handler of the state machine node.
    pub(crate) fn state_machine(&mut self, node_ref: NodeRef) -> Value {
        let node = self.graph.node(node_ref);
        let bucket_index = node.bucket_index.max(0) as usize;
        let machine_node_id = node.id;
        let max_transitions_per_update = node.value(2).as_int();
        let reinitialize_on_becoming_relevant = node.value(3).as_bool();
        let skip_first_update_transition = node.value(4).as_bool();
        let NodeData::StateMachine { graph } = &node.data else {
            return Value::Null;
        };
        let Some(machine_graph) = *graph else {
            return Value::Null;
        };

        let mut bucket = match self.data.buckets.get(bucket_index) {
            Some(Bucket::StateMachine(bucket)) => *bucket,
            _ => return Value::Null,
        };

        let mut transitions_left = if max_transitions_per_update == 0 {
            u16::MAX as i32
        } else {
            max_transitions_per_update
        };
        let mut is_first_update = bucket.last_update_frame == 0 || bucket.current_state.is_none();
        if reinitialize_on_becoming_relevant
            && bucket.last_update_frame + 1 != self.data.current_frame
        {
            // Reset on becoming relevant again.
            is_first_update = true;
        }
        if is_first_update && skip_first_update_transition {
            transitions_left = 0;
        }

        if is_first_update {
            // Enter the state pointed at by the entry marker, without
            // transitions, and rewind everything inside the machine.
            let Some(entry_state) = self.graph.graph(machine_graph).root_node else {
                return Value::Null;
            };
            bucket = StateMachineBucket {
                current_state: Some(entry_state),
                ..Default::default()
            };
            self.reset_buckets(machine_graph);
        }

        let path_pushed = self.ctx.node_path.try_push(machine_node_id).is_ok();

        // Advance the active transition.
        if let Some(active_index) = bucket.active_transition {
            bucket.transition_position += self.dt;

            if let Some(active) = self.transition(machine_graph, active_index) {
                if bucket.transition_position >= active.blend_duration {
                    self.end_transition(&mut bucket, machine_graph);
                } else if active
                    .flags
                    .contains(TransitionFlags::INTERRUPTION_RULE_RECHECKING)
                    && !active.flags.contains(TransitionFlags::USE_DEFAULT_RULE)
                {
                    if let Some(rule_graph) = active.rule_graph {
                        if let Some(rule_root) = self.graph.graph(rule_graph).root_node {
                            let still_valid = self
                                .eat_box(crate::graph::BoxRef {
                                    node: NodeRef {
                                        graph: rule_graph,
                                        node: rule_root,
                                    },
                                    box_id: 0,
                                })
                                .as_bool();
                            if !still_valid {
                                let cancel = if active
                                    .flags
                                    .contains(TransitionFlags::INTERRUPTION_INSTANT)
                                {
                                    true
                                } else {
                                    // Blend back toward the source state by
                                    // rewinding at double speed.
                                    bucket.transition_position -= self.dt;
                                    bucket.transition_position -= self.dt;
                                    bucket.transition_position <= BLEND_EPSILON
                                };
                                if cancel {
                                    if let Some(current) = bucket.current_state {
                                        self.reset_state_graph(machine_graph, current);
                                    }
                                    self.init_state_transition(&mut bucket, machine_graph, None);
                                }
                            }
                        }
                    }
                }
            }

            // Source-state interruption: any other transition of the source
            // may take over mid-blend.
            if let (Some(active_index), None) = (bucket.active_transition, bucket.base_transition)
            {
                if let Some(active) = self.transition(machine_graph, active_index) {
                    if active
                        .flags
                        .contains(TransitionFlags::INTERRUPTION_SOURCE_STATE)
                    {
                        if let Some(current) = bucket.current_state {
                            if let Some(interrupting) = self.scan_state_transitions(
                                machine_graph,
                                current,
                                Some(active.destination),
                            ) {
                                if !active.flags.contains(TransitionFlags::INTERRUPTION_INSTANT) {
                                    // Keep the interrupted blend as the base
                                    // pose for seamless blending.
                                    bucket.base_transition = Some(active_index);
                                    bucket.base_transition_state = bucket.current_state;
                                    bucket.base_transition_position = bucket.transition_position;
                                }
                                bucket.active_transition = Some(interrupting);
                                bucket.transition_position = 0.0;
                            }
                        }
                    }
                }
            }

            // Destination-state interruption: transitions of the
            // destination may take over, except the one leading back.
            if let (Some(active_index), None) = (bucket.active_transition, bucket.base_transition)
            {
                if let Some(active) = self.transition(machine_graph, active_index) {
                    if active
                        .flags
                        .contains(TransitionFlags::INTERRUPTION_DESTINATION_STATE)
                    {
                        if let Some(interrupting) = self.scan_state_transitions(
                            machine_graph,
                            active.destination,
                            bucket.current_state,
                        ) {
                            if !active.flags.contains(TransitionFlags::INTERRUPTION_INSTANT) {
                                bucket.base_transition = Some(active_index);
                                bucket.base_transition_state = bucket.current_state;
                                bucket.base_transition_position = bucket.transition_position;
                            }
                            bucket.current_state = Some(active.destination);
                            bucket.active_transition = Some(interrupting);
                            bucket.transition_position = 0.0;
                        }
                    }
                }
            }
        }

        debug_assert!(bucket.current_state.is_some());

        // Look for a transition to start. Transitions are consulted in
        // their serialized order; instant ones commit in the same tick and
        // the loop continues up to the configured limit. When the limit
        // runs out with a transition still pending, fall through and sample
        // normally.
        while bucket.active_transition.is_none() && transitions_left > 0 {
            transitions_left -= 1;

            if let Some(current) = bucket.current_state {
                let list = self.transitions_of(machine_graph, current);
                if let Some(found) = self.scan_transitions(machine_graph, &list, current, None) {
                    self.init_state_transition(&mut bucket, machine_graph, Some(found));
                }

                // Transitions attached to any-state nodes fire regardless
                // of the current state.
                let node_count = self.graph.graph(machine_graph).nodes.len() as u32;
                for any_state in 0..node_count {
                    let any_node = &self.graph.graph(machine_graph).nodes[any_state as usize];
                    if any_node.group_id != ids::GROUP_ANIMATION
                        || any_node.type_id != ids::ANIM_ANY_STATE
                    {
                        continue;
                    }
                    let list = self.transitions_of(machine_graph, any_state);
                    if let Some(found) = self.scan_transitions(machine_graph, &list, current, None)
                    {
                        self.init_state_transition(&mut bucket, machine_graph, Some(found));
                    }
                }
            }

            if let Some(active_index) = bucket.active_transition {
                if let Some(active) = self.transition(machine_graph, active_index) {
                    if active.blend_duration <= BLEND_EPSILON {
                        self.end_transition(&mut bucket, machine_graph);
                    }
                }
            }
        }

        // Produce the machine's pose.
        let mut value = if let Some(base_state) = bucket.base_transition_state {
            // An interrupted blend is frozen and reused as the source pose.
            let mut value = self.sample_state(machine_graph, base_state);
            if let Some(base_index) = bucket.base_transition {
                if let Some(base) = self.transition(machine_graph, base_index) {
                    let destination = self.sample_state(machine_graph, base.destination);
                    let alpha = bucket.base_transition_position / base.blend_duration;
                    value = self.blend(value, destination, alpha, base.blend_mode);
                }
            }
            value
        } else if let Some(current) = bucket.current_state {
            self.sample_state(machine_graph, current)
        } else {
            Value::Null
        };

        if let Some(active_index) = bucket.active_transition {
            if let Some(active) = self.transition(machine_graph, active_index) {
                let destination = self.sample_state(machine_graph, active.destination);
                let alpha = bucket.transition_position / active.blend_duration;
                value = self.blend(value, destination, alpha, active.blend_mode);
            }
        }

        bucket.last_update_frame = self.data.current_frame;
        if let Some(Bucket::StateMachine(stored)) = self.data.buckets.get_mut(bucket_index) {
            *stored = bucket;
        }
        if path_pushed {
            self.ctx.node_path.pop();
        }
        value
    }
}
