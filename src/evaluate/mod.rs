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

//! The graph evaluator: resolves the root output box of a graph into a
//! final skeletal pose for one instance, pulling values through the box
//! connections with per-tick memoization.

use crate::{
    graph::{
        ids, AnimGraphResource, BoxRef, CustomNodeContext, GraphId, NodeData, NodeRef,
    },
    instance::{AnimEventKind, AnimGraphInstance, Bucket, TraceEvent},
    math::Transform,
    pose::ModelPose,
    skeleton::{Skeleton, SkeletonMapping},
    value::{PoseRef, Value},
};
use arrayvec::ArrayVec;
use fxhash::FxHashMap;
use log::warn;

mod animation;
mod blend;
mod machine;
mod retarget;
mod slot;
mod transform;

pub use retarget::{retarget_node, retarget_pose};

/// Maximum node depth of a single pull-based traversal. Exceeding it marks
/// the context with a sticky overflow flag and yields null values.
pub const MAX_CALL_STACK: usize = 100;

/// Tolerance used by blend weight and duration comparisons.
pub const BLEND_EPSILON: f32 = 1e-5;

/// How the root motion embedded in sampled clips is treated.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub enum RootMotionExtraction {
    /// Keep root motion inside the skeletal pose.
    #[default]
    NoExtraction,
    /// Remove root motion from the root bone and discard it.
    Ignore,
    /// Remove root motion from the root bone and report it as the
    /// instance's root motion delta.
    Enable,
}

impl RootMotionExtraction {
    fn from_id(id: i32) -> Self {
        match id {
            1 => Self::Ignore,
            2 => Self::Enable,
            _ => Self::NoExtraction,
        }
    }
}

/// Playback info of the source state while a transition rule is evaluated.
#[derive(Copy, Clone, Debug)]
pub struct TransitionData {
    /// Playback position of the source state, in seconds.
    pub position: f32,
    /// Playback length of the source state, in seconds.
    pub length: f32,
}

impl Default for TransitionData {
    fn default() -> Self {
        Self {
            position: 0.0,
            length: BLEND_EPSILON,
        }
    }
}

/// Per-thread evaluation scratch. The host keeps one context per worker
/// thread and passes it to every [`AnimGraphExecutor::update`] call made on
/// that thread; no globals are touched during evaluation.
#[derive(Default)]
pub struct Context {
    pub(crate) call_stack: ArrayVec<NodeRef, MAX_CALL_STACK>,
    pub(crate) graph_stack: ArrayVec<GraphId, 32>,
    pub(crate) node_path: ArrayVec<u32, MAX_CALL_STACK>,
    pub(crate) functions: FxHashMap<NodeRef, GraphId>,
    pub(crate) value_cache: FxHashMap<BoxRef, Value>,
    pub(crate) transition_data: TransitionData,
    pub(crate) stack_overflow: bool,
    pose_cache: Vec<ModelPose>,
    pose_cache_size: usize,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.call_stack.clear();
        self.graph_stack.clear();
        self.node_path.clear();
        self.functions.clear();
        self.value_cache.clear();
        self.transition_data = TransitionData::default();
        self.stack_overflow = false;
        self.pose_cache_size = 0;
    }

    /// Hands out the next pooled pose buffer. Buffers are reused between
    /// ticks to avoid per-evaluation allocation.
    pub(crate) fn acquire_pose(&mut self) -> PoseRef {
        let index = self.pose_cache_size;
        if index == self.pose_cache.len() {
            self.pose_cache.push(ModelPose::default());
        }
        self.pose_cache_size += 1;
        PoseRef(index)
    }

    #[inline]
    pub(crate) fn pose(&self, pose: PoseRef) -> &ModelPose {
        &self.pose_cache[pose.0]
    }

    /// Temporarily takes a pose buffer out of the cache so it can be
    /// written while other buffers are being read.
    #[inline]
    pub(crate) fn take_pose(&mut self, pose: PoseRef) -> ModelPose {
        std::mem::take(&mut self.pose_cache[pose.0])
    }

    #[inline]
    pub(crate) fn put_pose(&mut self, pose: PoseRef, value: ModelPose) {
        self.pose_cache[pose.0] = value;
    }
}

/// The executor evaluating one graph definition. Stateless between calls:
/// all mutable state lives in the instance and in the per-thread context,
/// so one executor may serve any number of instances from any number of
/// threads, one instance per thread at a time.
pub struct AnimGraphExecutor {
    graph: AnimGraphResource,
    empty_pose: ModelPose,
}

impl AnimGraphExecutor {
    /// Creates an executor for the given graph.
    pub fn new(graph: AnimGraphResource) -> Self {
        let mut empty_pose = ModelPose::default();
        if let Some(skeleton) = graph.base_skeleton.as_ref() {
            empty_pose.init_from_bind(skeleton);
        }
        Self { graph, empty_pose }
    }

    /// Returns the graph this executor evaluates.
    #[inline]
    pub fn graph(&self) -> &AnimGraphResource {
        &self.graph
    }

    /// Advances the instance by `dt` seconds and produces the frame pose.
    ///
    /// The final per-bone matrices land in the instance's `nodes_pose`,
    /// the root motion delta in its `root_motion`, and fired events in its
    /// outgoing queue. A graph without a loaded root surface or base
    /// skeleton leaves the instance unchanged.
    pub fn update(&self, instance: &mut AnimGraphInstance, context: &mut Context, dt: f32) {
        let graph = &*self.graph;
        let Some(skeleton) = graph.base_skeleton.as_ref() else {
            return;
        };
        let Some(root_node) = graph.root().root_node else {
            return;
        };

        // Hot reload recovery: stale instance state is discarded wholesale.
        if instance.version != graph.version {
            instance.reset_state(graph);
        }
        instance.current_frame += 1;
        instance.trace_events.clear();

        context.reset();
        let _ = context.graph_stack.try_push(GraphId::ROOT);

        let root_ref = NodeRef {
            graph: GraphId::ROOT,
            node: root_node,
        };
        let root_motion_mode =
            RootMotionExtraction::from_id(graph.node(root_ref).value(0).as_int());

        let mut eval = Eval {
            graph,
            skeleton,
            empty_pose: &self.empty_pose,
            ctx: &mut *context,
            data: &mut *instance,
            dt,
            root_motion_mode,
        };

        let value = eval.eat_box(BoxRef {
            node: root_ref,
            box_id: 0,
        });
        eval.finish_continuous_events();

        // Materialize the frame output.
        let mut final_pose = match value.as_pose() {
            Some(pose) => context.take_pose(pose),
            None => self.empty_pose.clone(),
        };
        final_pose.normalize_rotations(root_motion_mode != RootMotionExtraction::NoExtraction);

        instance.root_motion = if root_motion_mode == RootMotionExtraction::Enable {
            final_pose.root_motion
        } else {
            Transform::IDENTITY
        };

        match instance.target_skeleton.clone() {
            Some(target) if !std::ptr::eq(&**skeleton, &*target) => {
                let mapping = instance
                    .retarget_mapping
                    .get_or_insert_with(|| SkeletonMapping::new(skeleton, &target));
                let target_locals =
                    retarget_pose(skeleton, &target, mapping, &final_pose.nodes);
                write_nodes_pose(&mut instance.nodes_pose, &target_locals);
                instance.root_transform =
                    target_locals.first().copied().unwrap_or(Transform::IDENTITY);
            }
            _ => {
                write_nodes_pose(&mut instance.nodes_pose, &final_pose.nodes);
                instance.root_transform =
                    final_pose.nodes.first().copied().unwrap_or(Transform::IDENTITY);
            }
        }

        if let Some(pose) = value.as_pose() {
            context.put_pose(pose, final_pose);
        }
    }
}

fn write_nodes_pose(out: &mut Vec<nalgebra::Matrix4<f32>>, locals: &[Transform]) {
    out.clear();
    out.extend(locals.iter().map(|t| t.matrix()));
}

/// One in-flight update: the executor's shared data plus the mutable
/// context and instance, threaded through every node handler.
pub(crate) struct Eval<'a> {
    pub(crate) graph: &'a crate::graph::AnimGraph,
    pub(crate) skeleton: &'a Skeleton,
    pub(crate) empty_pose: &'a ModelPose,
    pub(crate) ctx: &'a mut Context,
    pub(crate) data: &'a mut AnimGraphInstance,
    pub(crate) dt: f32,
    pub(crate) root_motion_mode: RootMotionExtraction,
}

impl Eval<'_> {
    /// Resolves the value feeding the given box of a node, returning
    /// `default` when nothing is connected.
    pub(crate) fn input_value(&mut self, node: NodeRef, box_id: u32, default: Value) -> Value {
        let source = self
            .graph
            .node(node)
            .get_box(box_id)
            .and_then(|b| b.first_source());
        match source {
            Some((source_node, source_box)) => self.eat_box(BoxRef {
                node: NodeRef {
                    graph: node.graph,
                    node: source_node,
                },
                box_id: source_box,
            }),
            None => default,
        }
    }

    /// Shorthand for resolving an input box whose default is the node's
    /// literal at `value_index`.
    pub(crate) fn input_or_value(&mut self, node: NodeRef, box_id: u32, value_index: usize) -> Value {
        let default = self.graph.node(node).value(value_index);
        self.input_value(node, box_id, default)
    }

    /// Evaluates an output box of a node: the memoized, stack-guarded core
    /// of the pull-based traversal.
    pub(crate) fn eat_box(&mut self, box_ref: BoxRef) -> Value {
        if let Some(value) = self.ctx.value_cache.get(&box_ref) {
            return value.clone();
        }

        if self.ctx.call_stack.try_push(box_ref.node).is_err() {
            if !self.ctx.stack_overflow {
                self.ctx.stack_overflow = true;
                warn!("Animation graph evaluation call stack overflow");
            }
            return Value::Null;
        }

        let value = self.dispatch(box_ref.node, box_ref.box_id);

        self.ctx.call_stack.pop();
        self.ctx.value_cache.insert(box_ref, value.clone());
        value
    }

    fn dispatch(&mut self, node_ref: NodeRef, box_id: u32) -> Value {
        let node = self.graph.node(node_ref);
        let type_pair = (node.group_id, node.type_id);
        match type_pair {
            (ids::GROUP_PARAMETERS, ids::PARAM_GET) => self.param_get(node_ref, box_id),
            (ids::GROUP_TOOLS, ids::TOOL_TIME) => self.tool_time(node_ref, box_id),
            (ids::GROUP_TOOLS, ids::TOOL_COMPARE) => self.tool_compare(node_ref),
            (ids::GROUP_TOOLS, ids::TOOL_LOGIC) => self.tool_logic(node_ref),
            (ids::GROUP_ANIMATION, ids::ANIM_OUTPUT)
            | (ids::GROUP_ANIMATION, ids::ANIM_STATE_OUTPUT)
            | (ids::GROUP_ANIMATION, ids::ANIM_RULE_OUTPUT) => {
                self.input_value(node_ref, 0, Value::Null)
            }
            (ids::GROUP_ANIMATION, ids::ANIM_PLAY) => self.anim_play(node_ref, box_id),
            (ids::GROUP_ANIMATION, ids::ANIM_BLEND) => self.anim_blend(node_ref),
            (ids::GROUP_ANIMATION, ids::ANIM_BLEND_ADDITIVE) => {
                self.anim_blend_additive(node_ref)
            }
            (ids::GROUP_ANIMATION, ids::ANIM_BLEND_MASK) => self.anim_blend_mask(node_ref),
            (ids::GROUP_ANIMATION, ids::ANIM_MULTI_BLEND_1D) => self.multi_blend_1d(node_ref),
            (ids::GROUP_ANIMATION, ids::ANIM_MULTI_BLEND_2D) => self.multi_blend_2d(node_ref),
            (ids::GROUP_ANIMATION, ids::ANIM_BLEND_POSES) => self.blend_poses(node_ref),
            (ids::GROUP_ANIMATION, ids::ANIM_GET_ROOT_MOTION) => {
                self.get_root_motion(node_ref, box_id)
            }
            (ids::GROUP_ANIMATION, ids::ANIM_SET_ROOT_MOTION) => {
                self.set_root_motion(node_ref, false)
            }
            (ids::GROUP_ANIMATION, ids::ANIM_ADD_ROOT_MOTION) => {
                self.set_root_motion(node_ref, true)
            }
            (ids::GROUP_ANIMATION, ids::ANIM_STATE_MACHINE) => self.state_machine(node_ref),
            (ids::GROUP_ANIMATION, ids::ANIM_TRANSITION_SOURCE) => {
                self.transition_source(box_id)
            }
            (ids::GROUP_ANIMATION, ids::ANIM_FUNCTION) => self.function_call(node_ref, box_id),
            (ids::GROUP_ANIMATION, ids::ANIM_TRANSFORM_NODE_LOCAL) => {
                self.transform_node(node_ref, false)
            }
            (ids::GROUP_ANIMATION, ids::ANIM_TRANSFORM_NODE_MODEL) => {
                self.transform_node(node_ref, true)
            }
            (ids::GROUP_ANIMATION, ids::ANIM_COPY_NODE) => self.copy_node(node_ref),
            (ids::GROUP_ANIMATION, ids::ANIM_GET_NODE_TRANSFORM_MODEL) => {
                self.get_node_transform(node_ref, box_id, true)
            }
            (ids::GROUP_ANIMATION, ids::ANIM_GET_NODE_TRANSFORM_LOCAL) => {
                self.get_node_transform(node_ref, box_id, false)
            }
            (ids::GROUP_ANIMATION, ids::ANIM_AIM_IK) => self.aim_ik(node_ref),
            (ids::GROUP_ANIMATION, ids::ANIM_TWO_BONE_IK) => self.two_bone_ik(node_ref),
            (ids::GROUP_ANIMATION, ids::ANIM_SLOT) => self.slot(node_ref),
            (ids::GROUP_ANIMATION, ids::ANIM_INSTANCE_DATA) => self.instance_data(node_ref),
            (ids::GROUP_CUSTOM, _) => self.custom_node(node_ref, box_id),
            (ids::GROUP_FUNCTION, ids::FUNCTION_INPUT) => self.function_input(node_ref),
            (ids::GROUP_FUNCTION, ids::FUNCTION_OUTPUT) => {
                self.input_value(node_ref, 0, Value::Null)
            }
            _ => Value::Null,
        }
    }

    /// Appends a trace record tagged with the current node path.
    pub(crate) fn add_trace_event(&mut self, node_ref: NodeRef) -> Option<&mut TraceEvent> {
        if !self.data.enable_tracing {
            return None;
        }
        let mut node_path = [0u32; 8];
        for (slot, id) in node_path.iter_mut().zip(self.ctx.node_path.iter()) {
            *slot = *id;
        }
        self.data.trace_events.push(TraceEvent {
            asset: None,
            value: 0.0,
            node_id: self.graph.node(node_ref).id,
            node_path,
        });
        self.data.trace_events.last_mut()
    }

    /// Resets all state buckets used by a graph and every graph nested in
    /// it. Bucket ranges of a subtree are contiguous by construction.
    pub(crate) fn reset_buckets(&mut self, graph_id: GraphId) {
        let sub = self.graph.graph(graph_id);
        let start = sub.buckets_start as usize;
        let end = start + sub.buckets_count_total as usize;
        for index in start..end {
            if let Some(kind) = self.graph.bucket_kinds().get(index) {
                self.data.buckets[index] = Bucket::new(*kind);
            }
        }
    }

    // ---- Parameters ----

    fn param_get(&mut self, node_ref: NodeRef, box_id: u32) -> Value {
        let Some(id) = self.graph.node(node_ref).value(0).as_asset_id() else {
            return Value::Null;
        };
        let Some((index, _)) = self.graph.find_parameter(id) else {
            return Value::Null;
        };
        let value = self
            .data
            .parameters
            .get(index)
            .cloned()
            .unwrap_or_default();
        // Component output boxes of vector parameters.
        if box_id >= 1 {
            let component = (box_id - 1) as usize;
            return match &value {
                Value::Vec2(v) if component < 2 => Value::Float(v[component]),
                Value::Vec3(v) if component < 3 => Value::Float(v[component]),
                Value::Vec4(v) if component < 4 => Value::Float(v[component]),
                _ => Value::Null,
            };
        }
        value
    }

    // ---- Tools ----

    fn tool_time(&mut self, node_ref: NodeRef, box_id: u32) -> Value {
        let bucket_index = self.graph.node(node_ref).bucket_index;
        let frame = self.data.current_frame;
        let dt = self.dt;
        let Some(Bucket::Animation(bucket)) =
            self.data.buckets.get_mut(bucket_index.max(0) as usize)
        else {
            return Value::Null;
        };
        if bucket.last_update_frame != frame {
            bucket.time_position += dt;
            bucket.last_update_frame = frame;
        }
        if box_id == 0 {
            Value::Float(bucket.time_position)
        } else {
            Value::Float(dt)
        }
    }

    fn tool_compare(&mut self, node_ref: NodeRef) -> Value {
        let op = self.graph.node(node_ref).value(0).as_int();
        let a = self.input_or_value(node_ref, 0, 1).as_float();
        let b = self.input_or_value(node_ref, 1, 2).as_float();
        Value::Bool(match op {
            0 => (a - b).abs() <= BLEND_EPSILON,
            1 => (a - b).abs() > BLEND_EPSILON,
            2 => a > b,
            3 => a < b,
            4 => a >= b,
            5 => a <= b,
            _ => false,
        })
    }

    fn tool_logic(&mut self, node_ref: NodeRef) -> Value {
        let op = self.graph.node(node_ref).value(0).as_int();
        let a = self.input_value(node_ref, 0, Value::Bool(false)).as_bool();
        if op == 3 {
            return Value::Bool(!a);
        }
        let b = self.input_value(node_ref, 1, Value::Bool(false)).as_bool();
        Value::Bool(match op {
            0 => a & b,
            1 => a | b,
            2 => a ^ b,
            _ => false,
        })
    }

    // ---- Functions ----

    fn function_call(&mut self, node_ref: NodeRef, box_id: u32) -> Value {
        let NodeData::Function { graph, outputs, .. } = &self.graph.node(node_ref).data else {
            return Value::Null;
        };
        let Some(function_graph) = *graph else {
            return Value::Null;
        };

        // Output boxes of the call node start at 16; map the requested one
        // to the function's output list.
        let Some(output_index) = box_id.checked_sub(16) else {
            return Value::Null;
        };
        let Some((_, output_node)) = outputs.get(output_index as usize).cloned() else {
            return Value::Null;
        };

        // Record which function graph this call site maps to, so input
        // nodes inside the body can find their caller.
        self.ctx.functions.insert(node_ref, function_graph);

        if self.ctx.graph_stack.try_push(function_graph).is_err() {
            return Value::Null;
        }
        let value = self.eat_box(BoxRef {
            node: NodeRef {
                graph: function_graph,
                node: output_node,
            },
            box_id: 0,
        });
        self.ctx.graph_stack.pop();
        value
    }

    fn function_input(&mut self, node_ref: NodeRef) -> Value {
        let Some(&current_graph) = self.ctx.graph_stack.last() else {
            return Value::Null;
        };

        // Walk the call stack upward to find the function call node whose
        // body is being evaluated.
        let mut call_site = None;
        for caller in self.ctx.call_stack.iter().rev() {
            let caller_node = self.graph.node(*caller);
            if caller_node.group_id == ids::GROUP_ANIMATION
                && caller_node.type_id == ids::ANIM_FUNCTION
            {
                if self.ctx.functions.get(caller) == Some(&current_graph) {
                    call_site = Some(*caller);
                    break;
                }
            }
        }
        let Some(call_site) = call_site else {
            return Value::Null;
        };

        let NodeData::Function { inputs, .. } = &self.graph.node(call_site).data else {
            return Value::Null;
        };
        let name = self.graph.node(node_ref).value(0);
        let Some(input_index) = inputs
            .iter()
            .position(|(input_name, _)| input_name == name.as_str())
        else {
            return Value::Null;
        };

        let connected = self
            .graph
            .node(call_site)
            .get_box(input_index as u32)
            .is_some_and(|b| b.has_connection());
        if connected {
            // The caller's connection resolves in the caller's frame.
            let popped = self.ctx.graph_stack.pop();
            let value = self.input_value(call_site, input_index as u32, Value::Null);
            if let Some(graph) = popped {
                let _ = self.ctx.graph_stack.try_push(graph);
            }
            value
        } else {
            // Fall back to the input node's own default.
            self.input_value(node_ref, 1, self.graph.node(node_ref).value(1))
        }
    }

    // ---- Custom nodes ----

    fn custom_node(&mut self, node_ref: NodeRef, box_id: u32) -> Value {
        let NodeData::Custom { handler } = &self.graph.node(node_ref).data else {
            return Value::Null;
        };
        let handler = handler.0.clone();
        let mut ctx = CustomContext {
            eval: self,
            node: node_ref,
        };
        handler.evaluate(&mut ctx, box_id)
    }

    // ---- Root motion accessors ----

    fn get_root_motion(&mut self, node_ref: NodeRef, box_id: u32) -> Value {
        let pose = self.input_value(node_ref, 2, Value::Null);
        match pose.as_pose() {
            Some(pose) => {
                let root_motion = self.ctx.pose(pose).root_motion;
                match box_id {
                    0 => Value::Vec3(root_motion.translation),
                    _ => Value::Quat(root_motion.rotation),
                }
            }
            None => match box_id {
                0 => Value::Vec3(nalgebra::Vector3::zeros()),
                _ => Value::Quat(nalgebra::Quaternion::identity()),
            },
        }
    }

    fn set_root_motion(&mut self, node_ref: NodeRef, additive: bool) -> Value {
        let pose = self.input_value(node_ref, 1, Value::Null);
        let Some(source) = pose.as_pose() else {
            return pose;
        };
        let translation = self.input_value(node_ref, 2, Value::Null).as_vec3();
        let rotation = self.input_value(node_ref, 3, Value::Null).as_quat();

        let out = self.ctx.acquire_pose();
        let mut out_pose = self.ctx.take_pose(out);
        out_pose.copy_from(self.ctx.pose(source));
        if additive {
            out_pose.root_motion.translation += translation;
            out_pose.root_motion.rotation *= rotation;
        } else {
            out_pose.root_motion.translation = translation;
            out_pose.root_motion.rotation = rotation;
        }
        self.ctx.put_pose(out, out_pose);
        Value::Pose(out)
    }

    // ---- Instance data ----

    fn instance_data(&mut self, node_ref: NodeRef) -> Value {
        let bucket_index = self.graph.node(node_ref).bucket_index.max(0) as usize;
        let needs_init = matches!(
            self.data.buckets.get(bucket_index),
            Some(Bucket::InstanceData(bucket)) if bucket.init
        );
        if needs_init {
            let value = self.input_value(node_ref, 1, Value::Null).as_vec4();
            if let Some(Bucket::InstanceData(bucket)) = self.data.buckets.get_mut(bucket_index) {
                bucket.init = false;
                bucket.data = [value.x, value.y, value.z, value.w];
            }
        }
        match self.data.buckets.get(bucket_index) {
            Some(Bucket::InstanceData(bucket)) => Value::Vec4(nalgebra::Vector4::new(
                bucket.data[0],
                bucket.data[1],
                bucket.data[2],
                bucket.data[3],
            )),
            _ => Value::Null,
        }
    }

    // ---- Pose plumbing ----

    /// Acquires a pose buffer initialized with the bind pose.
    pub(crate) fn new_pose(&mut self) -> PoseRef {
        let pose = self.ctx.acquire_pose();
        let mut buffer = self.ctx.take_pose(pose);
        buffer.copy_from(self.empty_pose);
        self.ctx.put_pose(pose, buffer);
        pose
    }

    /// Returns the referenced pose, or the bind pose for non-pose values.
    pub(crate) fn pose_or_empty<'p>(&'p self, value: &Value) -> &'p ModelPose {
        match value.as_pose() {
            Some(pose) => self.ctx.pose(pose),
            None => self.empty_pose,
        }
    }
}

struct CustomContext<'a, 'b> {
    eval: &'a mut Eval<'b>,
    node: NodeRef,
}

impl CustomNodeContext for CustomContext<'_, '_> {
    fn input_value(&mut self, box_id: u32) -> Value {
        self.eval.input_value(self.node, box_id, Value::Null)
    }

    fn dt(&self) -> f32 {
        self.eval.dt
    }

    fn frame(&self) -> u64 {
        self.eval.data.current_frame
    }
}

impl Eval<'_> {
    /// Ends continuous events whose clip window was not hit during this
    /// update, so OnBegin/OnEnd stay balanced when states stop being
    /// sampled.
    pub(crate) fn finish_continuous_events(&mut self) {
        let dt = self.dt;
        let mut index = 0;
        while index < self.data.active_events.len() {
            if self.data.active_events[index].hit {
                self.data.active_events[index].hit = false;
                index += 1;
            } else {
                let event = self.data.active_events.remove(index);
                self.data.push_event(crate::instance::AnimEvent {
                    kind: AnimEventKind::End,
                    name: event.name,
                    clip: event.key.clip,
                    time: 0.0,
                    dt,
                });
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        clip::{AnimationClip, BoneChannel, ClipResource, EventKey, EventTrack, RootMotionFlags},
        curve::{Curve, CurveKey, CurveKeyKind},
        graph::{
            ids,
            loader::{AssetProvider, GraphLoader},
            writer::{NodeSpec, SurfaceBuilder, TransitionSpec},
            AnimGraphResource, CustomNode, CustomNodeRegistry, GraphParameter, TransitionFlags,
        },
        instance::{AnimEventKind, AnimGraphInstance, AnimGraphSlot, Bucket},
        math::Transform,
        skeleton::{Skeleton, SkeletonNode, SkeletonResource},
        value::Value,
    };
    use fxhash::FxHashMap;
    use nalgebra::{Quaternion, Vector3, Vector4};
    use std::sync::Arc;
    use uuid::Uuid;

    fn one_bone_skeleton() -> SkeletonResource {
        Arc::new(Skeleton::new(vec![SkeletonNode {
            name: "root".to_string(),
            parent: -1,
            local_bind: Transform::IDENTITY,
        }]))
    }

    fn y_rotation(angle: f32) -> Quaternion<f32> {
        let half = angle * 0.5;
        Quaternion::new(half.cos(), 0.0, half.sin(), 0.0)
    }

    /// A clip holding the root bone at a constant rotation about Y.
    fn rotation_clip(name: &str, length: f32, angle: f32) -> ClipResource {
        let rotation = y_rotation(angle);
        let mut channel = BoneChannel::new("root");
        for (i, value) in [rotation.i, rotation.j, rotation.k, rotation.w].iter().enumerate() {
            channel.rotation[i] =
                Curve::from(vec![CurveKey::new(0.0, *value, CurveKeyKind::Constant)]);
        }
        let mut clip = AnimationClip::new(name, length);
        clip.add_channel(channel);
        Arc::new(clip)
    }

    /// A clip moving the root bone one unit per second along X, marked for
    /// horizontal root motion extraction.
    fn root_motion_clip(length: f32) -> ClipResource {
        let mut channel = BoneChannel::new("root");
        channel.translation[0] = Curve::from(vec![
            CurveKey::new(0.0, 0.0, CurveKeyKind::Linear),
            CurveKey::new(length, length, CurveKeyKind::Linear),
        ]);
        let mut clip = AnimationClip::new("run", length);
        clip.add_channel(channel);
        clip.root_motion = RootMotionFlags::POSITION_XZ;
        Arc::new(clip)
    }

    #[derive(Default)]
    struct TestAssets {
        clips: FxHashMap<Uuid, ClipResource>,
        functions: FxHashMap<Uuid, Vec<u8>>,
    }

    impl TestAssets {
        fn with_clip(mut self, clip: &ClipResource) -> Self {
            self.clips.insert(clip.id, clip.clone());
            self
        }

        fn with_function(mut self, id: Uuid, surface: Vec<u8>) -> Self {
            self.functions.insert(id, surface);
            self
        }
    }

    impl AssetProvider for TestAssets {
        fn clip(&self, id: Uuid) -> Option<ClipResource> {
            self.clips.get(&id).cloned()
        }

        fn function_graph(&self, id: Uuid) -> Option<Vec<u8>> {
            self.functions.get(&id).cloned()
        }
    }

    fn load_graph(surface: &[u8], assets: &TestAssets, version: u32) -> AnimGraphResource {
        Arc::new(
            GraphLoader {
                assets,
                custom_nodes: &CustomNodeRegistry::default(),
                base_skeleton: Some(one_bone_skeleton()),
                version,
            }
            .load(surface)
            .unwrap(),
        )
    }

    fn play_node(id: u32, clip: &ClipResource, looped: bool) -> NodeSpec {
        NodeSpec::new(id, ids::GROUP_ANIMATION, ids::ANIM_PLAY)
            .with_value(Value::AssetId(clip.id))
            .with_value(Value::Float(1.0))
            .with_value(Value::Bool(looped))
            .with_value(Value::Float(0.0))
            .with_box(0)
    }

    fn output_node(id: u32, source: u32, root_motion_mode: i32) -> NodeSpec {
        NodeSpec::new(id, ids::GROUP_ANIMATION, ids::ANIM_OUTPUT)
            .with_value(Value::Int(root_motion_mode))
            .with_connected_box(0, source, 0)
    }

    fn param_node(id: u32, parameter: Uuid) -> NodeSpec {
        NodeSpec::new(id, ids::GROUP_PARAMETERS, ids::PARAM_GET)
            .with_value(Value::AssetId(parameter))
            .with_box(0)
    }

    /// A state surface playing a single looped clip.
    fn state_surface(clip: &ClipResource) -> Vec<u8> {
        let mut surface = SurfaceBuilder::new();
        surface.add_node(play_node(1, clip, true));
        surface.add_node(
            NodeSpec::new(2, ids::GROUP_ANIMATION, ids::ANIM_STATE_OUTPUT)
                .with_connected_box(0, 1, 0),
        );
        surface.build()
    }

    /// A rule surface firing when a boolean parameter is set.
    fn rule_surface(parameter: Uuid) -> Vec<u8> {
        let mut surface = SurfaceBuilder::new();
        surface.add_node(param_node(1, parameter));
        surface.add_node(
            NodeSpec::new(2, ids::GROUP_ANIMATION, ids::ANIM_RULE_OUTPUT)
                .with_connected_box(0, 1, 0),
        );
        surface.build()
    }

    fn state_node(id: u32, name: &str, surface: Vec<u8>, transitions: Vec<u8>) -> NodeSpec {
        NodeSpec::new(id, ids::GROUP_ANIMATION, ids::ANIM_STATE)
            .with_value(Value::String(name.to_string()))
            .with_value(Value::Blob(surface))
            .with_value(Value::Blob(transitions))
    }

    fn machine_node(id: u32, surface: Vec<u8>) -> NodeSpec {
        NodeSpec::new(id, ids::GROUP_ANIMATION, ids::ANIM_STATE_MACHINE)
            .with_value(Value::String("machine".to_string()))
            .with_value(Value::Blob(surface))
            .with_value(Value::Int(3))
            .with_value(Value::Bool(false))
            .with_value(Value::Bool(false))
            .with_box(0)
    }

    fn angle_of(instance: &AnimGraphInstance) -> f32 {
        instance.root_transform.unit_rotation().angle()
    }

    fn expected_blend_angle(from: f32, to: f32, alpha: f32) -> f32 {
        let mut a = Transform::IDENTITY;
        a.rotation = y_rotation(from);
        let mut b = Transform::IDENTITY;
        b.rotation = y_rotation(to);
        a.lerp(&b, alpha).unit_rotation().angle()
    }

    #[test]
    fn test_single_clip_loops_over_the_seam() {
        let clip = rotation_clip("idle", 2.0, 0.0);
        let assets = TestAssets::default().with_clip(&clip);

        let mut surface = SurfaceBuilder::new();
        surface.add_node(play_node(1, &clip, true));
        surface.add_node(output_node(2, 1, 0));
        let graph = load_graph(&surface.build(), &assets, 1);

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        let mut observed = Vec::new();
        for _ in 0..5 {
            executor.update(&mut instance, &mut context, 0.5);
            let Bucket::Animation(bucket) = instance.buckets()[0] else {
                panic!("wrong bucket kind");
            };
            observed.push(bucket.time_position);
        }
        assert_eq!(observed, vec![0.5, 1.0, 1.5, 0.0, 0.5]);

        // The output pose stays sized to the skeleton.
        assert_eq!(instance.nodes_pose.len(), 1);
    }

    #[test]
    fn test_root_motion_is_continuous_over_the_loop_seam() {
        let clip = root_motion_clip(1.0);
        let assets = TestAssets::default().with_clip(&clip);

        let mut surface = SurfaceBuilder::new();
        surface.add_node(play_node(1, &clip, true));
        surface.add_node(output_node(2, 1, 2));
        let graph = load_graph(&surface.build(), &assets, 1);

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        let mut accumulated = 0.0;
        for _ in 0..2 {
            executor.update(&mut instance, &mut context, 0.6);
            accumulated += instance.root_motion.translation.x;
        }
        assert!((accumulated - 1.2).abs() < 1e-5, "got {accumulated}");

        // The extracted motion was removed from the root bone itself.
        assert!(instance.root_transform.translation.x.abs() < 1e-5);
    }

    #[test]
    fn test_multi_blend_1d_midpoint_blends_evenly() {
        let clip_a = rotation_clip("a", 1.0, 0.0);
        let clip_b = rotation_clip("b", 1.0, std::f32::consts::FRAC_PI_2);
        let assets = TestAssets::default().with_clip(&clip_a).with_clip(&clip_b);

        let axis = Uuid::new_v4();
        let mut surface = SurfaceBuilder::new();
        surface.add_parameter(GraphParameter {
            id: axis,
            name: "X".to_string(),
            value: Value::Float(0.5),
        });
        surface.add_node(param_node(2, axis));
        surface.add_node(
            NodeSpec::new(3, ids::GROUP_ANIMATION, ids::ANIM_MULTI_BLEND_1D)
                .with_value(Value::Vec4(Vector4::new(0.0, 1.0, 0.0, 0.0)))
                .with_value(Value::Float(1.0))
                .with_value(Value::Bool(true))
                .with_value(Value::Float(0.0))
                .with_value(Value::Vec4(Vector4::new(0.0, 0.0, 0.0, 1.0)))
                .with_value(Value::AssetId(clip_a.id))
                .with_value(Value::Vec4(Vector4::new(1.0, 0.0, 0.0, 1.0)))
                .with_value(Value::AssetId(clip_b.id))
                .with_box(0)
                .with_connected_box(4, 2, 0),
        );
        surface.add_node(output_node(9, 3, 0));
        let graph = load_graph(&surface.build(), &assets, 1);

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        executor.update(&mut instance, &mut context, 0.1);

        // Halfway between identity and a quarter turn about Y.
        let expected = std::f32::consts::FRAC_PI_4;
        assert!((angle_of(&instance) - expected).abs() < 1e-4);

        // Both clips are tracked by the bucket with independent times.
        let Bucket::MultiBlend(bucket) = instance.buckets()[0] else {
            panic!("wrong bucket kind");
        };
        assert_eq!(bucket.count, 2);

        // Rotations of the final pose are normalized.
        assert!((instance.root_transform.rotation.norm() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_state_machine_default_rule_fires_near_the_end() {
        let clip_a = rotation_clip("a", 1.0, 0.0);
        let clip_b = rotation_clip("b", 1.0, std::f32::consts::FRAC_PI_2);
        let assets = TestAssets::default().with_clip(&clip_a).with_clip(&clip_b);

        let mut machine = SurfaceBuilder::new();
        machine.add_node(state_node(
            10,
            "S1",
            state_surface(&clip_a),
            crate::graph::writer::write_transitions(&[TransitionSpec::new(20, 0.2)
                .with_flags(TransitionFlags::USE_DEFAULT_RULE)]),
        ));
        machine.add_node(state_node(
            20,
            "S2",
            state_surface(&clip_b),
            crate::graph::writer::write_transitions(&[]),
        ));
        machine.add_node(
            NodeSpec::new(1, ids::GROUP_ANIMATION, ids::ANIM_ENTRY).with_value(Value::Int(10)),
        );

        let mut surface = SurfaceBuilder::new();
        surface.add_node(machine_node(5, machine.build()));
        surface.add_node(output_node(9, 5, 0));
        let graph = load_graph(&surface.build(), &assets, 1);

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        // At position 0.85 the default rule (fires past length - duration/2)
        // is still quiet.
        executor.update(&mut instance, &mut context, 0.85);
        let Bucket::StateMachine(bucket) = instance.buckets()[0] else {
            panic!("wrong bucket kind");
        };
        assert!(bucket.active_transition.is_none());

        // Crossing 0.9 starts the transition.
        executor.update(&mut instance, &mut context, 0.05);
        let Bucket::StateMachine(bucket) = instance.buckets()[0] else {
            panic!("wrong bucket kind");
        };
        assert!(bucket.active_transition.is_some());
        assert_eq!(bucket.transition_position, 0.0);

        // 0.1 s into the 0.2 s blend the output is the even mix of both
        // states.
        executor.update(&mut instance, &mut context, 0.05);
        executor.update(&mut instance, &mut context, 0.05);
        let Bucket::StateMachine(bucket) = instance.buckets()[0] else {
            panic!("wrong bucket kind");
        };
        assert!((bucket.transition_position - 0.1).abs() < 1e-5);
        assert!((angle_of(&instance) - std::f32::consts::FRAC_PI_4).abs() < 1e-3);

        // The transition commits at full duration.
        executor.update(&mut instance, &mut context, 0.1);
        let Bucket::StateMachine(bucket) = instance.buckets()[0] else {
            panic!("wrong bucket kind");
        };
        assert!(bucket.active_transition.is_none());
        let machine_graph = crate::graph::GraphId(1);
        assert_eq!(
            bucket.current_state,
            graph.graph(machine_graph).find_node_by_id(20)
        );
    }

    #[test]
    fn test_interrupted_transition_keeps_base_blend() {
        let clip_a = rotation_clip("a", 10.0, 0.0);
        let clip_b = rotation_clip("b", 10.0, std::f32::consts::FRAC_PI_2);
        let clip_c = rotation_clip("c", 10.0, std::f32::consts::FRAC_PI_2 * 0.5);
        let assets = TestAssets::default()
            .with_clip(&clip_a)
            .with_clip(&clip_b)
            .with_clip(&clip_c);

        let to_b = Uuid::new_v4();
        let to_c = Uuid::new_v4();

        let mut machine = SurfaceBuilder::new();
        machine.add_node(state_node(
            10,
            "S1",
            state_surface(&clip_a),
            crate::graph::writer::write_transitions(&[
                TransitionSpec::new(20, 1.0)
                    .with_flags(TransitionFlags::INTERRUPTION_SOURCE_STATE)
                    .with_rule(rule_surface(to_b)),
                TransitionSpec::new(30, 1.0).with_rule(rule_surface(to_c)),
            ]),
        ));
        machine.add_node(state_node(
            20,
            "S2",
            state_surface(&clip_b),
            crate::graph::writer::write_transitions(&[]),
        ));
        machine.add_node(state_node(
            30,
            "S3",
            state_surface(&clip_c),
            crate::graph::writer::write_transitions(&[]),
        ));
        machine.add_node(
            NodeSpec::new(1, ids::GROUP_ANIMATION, ids::ANIM_ENTRY).with_value(Value::Int(10)),
        );

        let mut surface = SurfaceBuilder::new();
        surface.add_parameter(GraphParameter {
            id: to_b,
            name: "toB".to_string(),
            value: Value::Bool(false),
        });
        surface.add_parameter(GraphParameter {
            id: to_c,
            name: "toC".to_string(),
            value: Value::Bool(false),
        });
        surface.add_node(machine_node(5, machine.build()));
        surface.add_node(output_node(9, 5, 0));
        let graph = load_graph(&surface.build(), &assets, 1);

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        executor.update(&mut instance, &mut context, 0.1);
        instance.set_parameter_by_name(&graph, "toB", Value::Bool(true));
        // The transition toward S2 starts and blends for two ticks.
        executor.update(&mut instance, &mut context, 0.1);
        executor.update(&mut instance, &mut context, 0.1);
        executor.update(&mut instance, &mut context, 0.1);

        // Mid-blend at progress 0.3 the second transition becomes eligible
        // and interrupts.
        instance.set_parameter_by_name(&graph, "toC", Value::Bool(true));
        executor.update(&mut instance, &mut context, 0.1);

        let Bucket::StateMachine(bucket) = instance.buckets()[0] else {
            panic!("wrong bucket kind");
        };
        let machine_graph = crate::graph::GraphId(1);
        let s1 = graph.graph(machine_graph).find_node_by_id(10);
        assert_eq!(bucket.base_transition, Some(0));
        assert_eq!(bucket.base_transition_state, s1);
        assert!((bucket.base_transition_position - 0.3).abs() < 1e-5);
        assert_eq!(bucket.active_transition, Some(1));
        assert_eq!(bucket.transition_position, 0.0);

        // With the new transition at zero progress the output is still the
        // frozen base blend of S1 toward S2.
        let expected = expected_blend_angle(0.0, std::f32::consts::FRAC_PI_2, 0.3);
        assert!((angle_of(&instance) - expected).abs() < 1e-3);
    }

    #[test]
    fn test_slot_crossfades_to_input_near_the_end() {
        let input_clip = rotation_clip("idle", 1.0, 0.0);
        let slot_clip = rotation_clip("wave", 1.0, std::f32::consts::FRAC_PI_2);
        let assets = TestAssets::default()
            .with_clip(&input_clip)
            .with_clip(&slot_clip);

        let mut surface = SurfaceBuilder::new();
        surface.add_node(play_node(1, &input_clip, true));
        surface.add_node(
            NodeSpec::new(6, ids::GROUP_ANIMATION, ids::ANIM_SLOT)
                .with_value(Value::String("upper".to_string()))
                .with_box(0)
                .with_connected_box(1, 1, 0),
        );
        surface.add_node(output_node(9, 6, 0));
        let graph = load_graph(&surface.build(), &assets, 1);

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        instance.push_slot(AnimGraphSlot {
            name: "upper".to_string(),
            clip: Some(slot_clip.clone()),
            blend_out_time: 0.2,
            ..Default::default()
        });

        // While playing, the slot clip fully overrides the input pose.
        executor.update(&mut instance, &mut context, 0.05);
        assert!((angle_of(&instance) - std::f32::consts::FRAC_PI_2).abs() < 1e-4);

        // Step to playback time 0.9 = length - 0.1: halfway through the
        // 0.2 s fade-out window.
        for _ in 0..17 {
            executor.update(&mut instance, &mut context, 0.05);
        }
        let Bucket::Slot(bucket) = instance.buckets()[1] else {
            panic!("wrong bucket kind");
        };
        assert!((bucket.time_position - 0.9).abs() < 1e-4);
        assert!((angle_of(&instance) - std::f32::consts::FRAC_PI_4).abs() < 1e-3);
    }

    #[test]
    fn test_blend_poses_crossfade_is_linear() {
        let clip_a = rotation_clip("a", 4.0, 0.0);
        let clip_b = rotation_clip("b", 4.0, std::f32::consts::FRAC_PI_2);
        let assets = TestAssets::default().with_clip(&clip_a).with_clip(&clip_b);

        let index = Uuid::new_v4();
        let mut surface = SurfaceBuilder::new();
        surface.add_parameter(GraphParameter {
            id: index,
            name: "Index".to_string(),
            value: Value::Int(0),
        });
        surface.add_node(param_node(2, index));
        surface.add_node(play_node(3, &clip_a, true));
        surface.add_node(play_node(4, &clip_b, true));
        surface.add_node(
            NodeSpec::new(5, ids::GROUP_ANIMATION, ids::ANIM_BLEND_POSES)
                .with_value(Value::Int(0))
                .with_value(Value::Float(1.0))
                .with_value(Value::Int(2))
                .with_value(Value::Int(0))
                .with_box(0)
                .with_connected_box(1, 2, 0)
                .with_box(2)
                .with_connected_box(3, 3, 0)
                .with_connected_box(4, 4, 0),
        );
        surface.add_node(output_node(9, 5, 0));
        let graph = load_graph(&surface.build(), &assets, 1);

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        executor.update(&mut instance, &mut context, 0.25);
        assert!(angle_of(&instance).abs() < 1e-4);

        // Switch the selection: every tick advances the linear crossfade
        // by dt / duration.
        instance.set_parameter_by_name(&graph, "Index", Value::Int(1));
        for step in 1..=3 {
            executor.update(&mut instance, &mut context, 0.25);
            let expected =
                expected_blend_angle(0.0, std::f32::consts::FRAC_PI_2, step as f32 * 0.25);
            assert!(
                (angle_of(&instance) - expected).abs() < 1e-3,
                "step {step}"
            );
        }

        // The crossfade completes and snaps to the new pose.
        executor.update(&mut instance, &mut context, 0.25);
        assert!((angle_of(&instance) - std::f32::consts::FRAC_PI_2).abs() < 1e-4);
        let Bucket::BlendPose(bucket) = instance.buckets()[2] else {
            panic!("wrong bucket kind");
        };
        assert_eq!(bucket.previous_index, 1);
    }

    #[test]
    fn test_zero_dt_update_is_idempotent() {
        let clip = rotation_clip("idle", 2.0, 0.3);
        let assets = TestAssets::default().with_clip(&clip);

        let mut surface = SurfaceBuilder::new();
        surface.add_node(play_node(1, &clip, true));
        surface.add_node(output_node(2, 1, 0));
        let graph = load_graph(&surface.build(), &assets, 1);

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        executor.update(&mut instance, &mut context, 0.5);
        executor.update(&mut instance, &mut context, 0.0);
        let first_pose = instance.nodes_pose.clone();
        let first_motion = instance.root_motion;

        executor.update(&mut instance, &mut context, 0.0);
        assert_eq!(instance.nodes_pose, first_pose);
        assert_eq!(instance.root_motion, first_motion);
    }

    #[test]
    fn test_version_mismatch_rebuilds_instance_state() {
        let clip = rotation_clip("idle", 2.0, 0.4);
        let assets = TestAssets::default().with_clip(&clip);

        let mut surface = SurfaceBuilder::new();
        surface.add_node(play_node(1, &clip, true));
        surface.add_node(output_node(2, 1, 0));
        let bytes = surface.build();

        let graph_v1 = load_graph(&bytes, &assets, 1);
        let graph_v2 = load_graph(&bytes, &assets, 2);

        let executor_v1 = AnimGraphExecutor::new(graph_v1.clone());
        let mut stale = AnimGraphInstance::new(&graph_v1);
        let mut context = Context::new();
        for _ in 0..3 {
            executor_v1.update(&mut stale, &mut context, 0.25);
        }

        // A reloaded graph resets the stale instance to a state identical
        // to a fresh one.
        let executor_v2 = AnimGraphExecutor::new(graph_v2.clone());
        let mut fresh = AnimGraphInstance::new(&graph_v2);
        executor_v2.update(&mut stale, &mut context, 0.25);
        executor_v2.update(&mut fresh, &mut context, 0.25);

        assert_eq!(stale.version(), 2);
        assert_eq!(stale.nodes_pose, fresh.nodes_pose);
        assert_eq!(stale.buckets(), fresh.buckets());
    }

    #[test]
    fn test_animation_events_are_bracketed() {
        let mut clip = rotation_clip("steps", 1.0, 0.0);
        {
            let clip = Arc::get_mut(&mut clip).unwrap();
            clip.events.push(EventTrack {
                name: "feet".to_string(),
                keys: vec![EventKey {
                    time: 0.2,
                    duration: 0.4,
                    name: "ground".to_string(),
                }],
            });
        }
        let assets = TestAssets::default().with_clip(&clip);

        let mut surface = SurfaceBuilder::new();
        surface.add_node(play_node(1, &clip, true));
        surface.add_node(output_node(2, 1, 0));
        let graph = load_graph(&surface.build(), &assets, 1);

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        let mut kinds = Vec::new();
        for _ in 0..4 {
            executor.update(&mut instance, &mut context, 0.3);
            kinds.extend(instance.drain_events().into_iter().map(|e| e.kind));
        }
        assert_eq!(
            kinds,
            vec![
                AnimEventKind::Begin,
                AnimEventKind::Event,
                AnimEventKind::Event,
                AnimEventKind::Event,
                AnimEventKind::End,
            ]
        );
    }

    #[test]
    fn test_function_call_routes_caller_inputs() {
        let clip_a = rotation_clip("a", 1.0, 0.0);
        let clip_b = rotation_clip("b", 1.0, std::f32::consts::FRAC_PI_2);

        // The function body forwards its "Alpha" input to its output.
        let function_id = Uuid::new_v4();
        let mut function = SurfaceBuilder::new();
        function.add_node(
            NodeSpec::new(1, ids::GROUP_FUNCTION, ids::FUNCTION_INPUT)
                .with_value(Value::String("Alpha".to_string()))
                .with_value(Value::Float(0.25))
                .with_box(0)
                .with_box(1),
        );
        function.add_node(
            NodeSpec::new(2, ids::GROUP_FUNCTION, ids::FUNCTION_OUTPUT)
                .with_value(Value::String("Result".to_string()))
                .with_connected_box(0, 1, 0),
        );

        let assets = TestAssets::default()
            .with_clip(&clip_a)
            .with_clip(&clip_b)
            .with_function(function_id, function.build());

        let alpha_param = Uuid::new_v4();
        let mut surface = SurfaceBuilder::new();
        surface.add_parameter(GraphParameter {
            id: alpha_param,
            name: "A".to_string(),
            value: Value::Float(0.75),
        });
        surface.add_node(param_node(2, alpha_param));
        surface.add_node(play_node(3, &clip_a, true));
        surface.add_node(play_node(4, &clip_b, true));
        surface.add_node(
            NodeSpec::new(5, ids::GROUP_ANIMATION, ids::ANIM_FUNCTION)
                .with_value(Value::AssetId(function_id))
                .with_connected_box(0, 2, 0)
                .with_box(16),
        );
        surface.add_node(
            NodeSpec::new(6, ids::GROUP_ANIMATION, ids::ANIM_BLEND)
                .with_value(Value::Float(0.0))
                .with_box(0)
                .with_connected_box(1, 3, 0)
                .with_connected_box(2, 4, 0)
                .with_connected_box(3, 5, 16),
        );
        surface.add_node(output_node(9, 6, 0));
        let graph = load_graph(&surface.build(), &assets, 1);

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        executor.update(&mut instance, &mut context, 0.1);
        let expected = expected_blend_angle(0.0, std::f32::consts::FRAC_PI_2, 0.75);
        assert!((angle_of(&instance) - expected).abs() < 1e-3);
    }

    #[test]
    fn test_function_input_falls_back_to_default() {
        let clip_a = rotation_clip("a", 1.0, 0.0);
        let clip_b = rotation_clip("b", 1.0, std::f32::consts::FRAC_PI_2);

        let function_id = Uuid::new_v4();
        let mut function = SurfaceBuilder::new();
        function.add_node(
            NodeSpec::new(1, ids::GROUP_FUNCTION, ids::FUNCTION_INPUT)
                .with_value(Value::String("Alpha".to_string()))
                .with_value(Value::Float(0.25))
                .with_box(0)
                .with_box(1),
        );
        function.add_node(
            NodeSpec::new(2, ids::GROUP_FUNCTION, ids::FUNCTION_OUTPUT)
                .with_value(Value::String("Result".to_string()))
                .with_connected_box(0, 1, 0),
        );

        let assets = TestAssets::default()
            .with_clip(&clip_a)
            .with_clip(&clip_b)
            .with_function(function_id, function.build());

        let mut surface = SurfaceBuilder::new();
        surface.add_node(play_node(3, &clip_a, true));
        surface.add_node(play_node(4, &clip_b, true));
        // The caller leaves the function input unconnected.
        surface.add_node(
            NodeSpec::new(5, ids::GROUP_ANIMATION, ids::ANIM_FUNCTION)
                .with_value(Value::AssetId(function_id))
                .with_box(0)
                .with_box(16),
        );
        surface.add_node(
            NodeSpec::new(6, ids::GROUP_ANIMATION, ids::ANIM_BLEND)
                .with_value(Value::Float(0.0))
                .with_box(0)
                .with_connected_box(1, 3, 0)
                .with_connected_box(2, 4, 0)
                .with_connected_box(3, 5, 16),
        );
        surface.add_node(output_node(9, 6, 0));
        let graph = load_graph(&surface.build(), &assets, 1);

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        executor.update(&mut instance, &mut context, 0.1);
        let expected = expected_blend_angle(0.0, std::f32::consts::FRAC_PI_2, 0.25);
        assert!((angle_of(&instance) - expected).abs() < 1e-3);
    }

    struct HalvingNode;

    impl CustomNode for HalvingNode {
        fn evaluate(&self, ctx: &mut dyn crate::graph::CustomNodeContext, box_id: u32) -> Value {
            match box_id {
                1 => Value::Float(ctx.input_value(0).as_float() * 0.5),
                _ => Value::Null,
            }
        }
    }

    #[test]
    fn test_custom_node_evaluates_through_registry() {
        let clip_a = rotation_clip("a", 1.0, 0.0);
        let clip_b = rotation_clip("b", 1.0, std::f32::consts::FRAC_PI_2);
        let assets = TestAssets::default().with_clip(&clip_a).with_clip(&clip_b);

        let mut registry = CustomNodeRegistry::default();
        registry.register(42, Arc::new(HalvingNode));

        let alpha_param = Uuid::new_v4();
        let mut surface = SurfaceBuilder::new();
        surface.add_parameter(GraphParameter {
            id: alpha_param,
            name: "A".to_string(),
            value: Value::Float(1.0),
        });
        surface.add_node(param_node(2, alpha_param));
        surface.add_node(play_node(3, &clip_a, true));
        surface.add_node(play_node(4, &clip_b, true));
        surface.add_node(
            NodeSpec::new(5, ids::GROUP_CUSTOM, 42)
                .with_connected_box(0, 2, 0)
                .with_box(1),
        );
        surface.add_node(
            NodeSpec::new(6, ids::GROUP_ANIMATION, ids::ANIM_BLEND)
                .with_value(Value::Float(0.0))
                .with_box(0)
                .with_connected_box(1, 3, 0)
                .with_connected_box(2, 4, 0)
                .with_connected_box(3, 5, 1),
        );
        surface.add_node(output_node(9, 6, 0));

        let graph = Arc::new(
            GraphLoader {
                assets: &assets,
                custom_nodes: &registry,
                base_skeleton: Some(one_bone_skeleton()),
                version: 1,
            }
            .load(&surface.build())
            .unwrap(),
        );

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        executor.update(&mut instance, &mut context, 0.1);
        let expected = expected_blend_angle(0.0, std::f32::consts::FRAC_PI_2, 0.5);
        assert!((angle_of(&instance) - expected).abs() < 1e-3);
    }

    #[test]
    fn test_instance_data_captures_once() {
        let clip_a = rotation_clip("a", 1.0, 0.0);
        let clip_b = rotation_clip("b", 1.0, std::f32::consts::FRAC_PI_2);
        let assets = TestAssets::default().with_clip(&clip_a).with_clip(&clip_b);

        let seed = Uuid::new_v4();
        let mut surface = SurfaceBuilder::new();
        surface.add_parameter(GraphParameter {
            id: seed,
            name: "Seed".to_string(),
            value: Value::Float(0.6),
        });
        surface.add_node(param_node(2, seed));
        surface.add_node(play_node(3, &clip_a, true));
        surface.add_node(play_node(4, &clip_b, true));
        surface.add_node(
            NodeSpec::new(7, ids::GROUP_ANIMATION, ids::ANIM_INSTANCE_DATA)
                .with_box(0)
                .with_connected_box(1, 2, 0),
        );
        surface.add_node(
            NodeSpec::new(6, ids::GROUP_ANIMATION, ids::ANIM_BLEND)
                .with_value(Value::Float(0.0))
                .with_box(0)
                .with_connected_box(1, 3, 0)
                .with_connected_box(2, 4, 0)
                .with_connected_box(3, 7, 0),
        );
        surface.add_node(output_node(9, 6, 0));
        let graph = load_graph(&surface.build(), &assets, 1);

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        executor.update(&mut instance, &mut context, 0.1);
        let captured = angle_of(&instance);
        let expected = expected_blend_angle(0.0, std::f32::consts::FRAC_PI_2, 0.6);
        assert!((captured - expected).abs() < 1e-3);

        // The captured data is immutable for the rest of the instance's
        // lifetime.
        instance.set_parameter_by_name(&graph, "Seed", Value::Float(0.9));
        executor.update(&mut instance, &mut context, 0.1);
        assert!((angle_of(&instance) - captured).abs() < 1e-4);
    }

    #[test]
    fn test_final_pose_retargets_onto_target_skeleton() {
        let clip = rotation_clip("idle", 1.0, 0.5);
        let assets = TestAssets::default().with_clip(&clip);

        let mut surface = SurfaceBuilder::new();
        surface.add_node(play_node(1, &clip, true));
        surface.add_node(output_node(2, 1, 0));
        let graph = load_graph(&surface.build(), &assets, 1);

        let executor = AnimGraphExecutor::new(graph.clone());
        let mut instance = AnimGraphInstance::new(&graph);
        let mut context = Context::new();

        // A rendering skeleton with one extra, unmapped bone.
        instance.set_target_skeleton(Some(Arc::new(Skeleton::new(vec![
            SkeletonNode {
                name: "root".to_string(),
                parent: -1,
                local_bind: Transform::IDENTITY,
            },
            SkeletonNode {
                name: "prop".to_string(),
                parent: 0,
                local_bind: Transform {
                    translation: Vector3::new(1.0, 0.0, 0.0),
                    ..Transform::IDENTITY
                },
            },
        ]))));

        executor.update(&mut instance, &mut context, 0.1);
        // The output pose matches the target skeleton; the unmapped bone
        // holds its bind pose.
        assert_eq!(instance.nodes_pose.len(), 2);
        assert!((instance.nodes_pose[1][(0, 3)] - 1.0).abs() < 1e-5);
        // The mapped bone carries the sampled rotation.
        assert!((angle_of(&instance) - 0.5).abs() < 1e-3);
    }
}
