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

//! Animation graph definition: an immutable, shareable description of
//! operator nodes, their connections and nested sub-graphs. Loaded once and
//! evaluated by any number of instances.

use crate::{
    alpha::AlphaBlendMode,
    clip::ClipResource,
    skeleton::SkeletonResource,
    value::Value,
};
use bitflags::bitflags;
use fxhash::FxHashMap;
use std::{fmt, sync::Arc, sync::OnceLock};
use uuid::Uuid;

pub mod loader;
pub mod writer;

/// Node group and type identifiers of the serialized graph format. A node
/// is discriminated by its `(group, type)` pair.
pub mod ids {
    /// Parameter access nodes.
    pub const GROUP_PARAMETERS: u16 = 2;
    /// General-purpose tool nodes (time, comparisons, logic).
    pub const GROUP_TOOLS: u16 = 7;
    /// Animation pose nodes.
    pub const GROUP_ANIMATION: u16 = 9;
    /// Host-registered custom nodes; the type id selects the handler.
    pub const GROUP_CUSTOM: u16 = 13;
    /// Function graph boundary nodes.
    pub const GROUP_FUNCTION: u16 = 16;

    /// Parameter fetch. `values[0]` holds the parameter id.
    pub const PARAM_GET: u16 = 1;

    /// Accumulated playback time source.
    pub const TOOL_TIME: u16 = 5;
    /// Scalar comparison, `values[0]` selects the operation.
    pub const TOOL_COMPARE: u16 = 10;
    /// Boolean logic, `values[0]` selects the operation.
    pub const TOOL_LOGIC: u16 = 11;

    /// The final pose output of a graph.
    pub const ANIM_OUTPUT: u16 = 1;
    /// Clip sampling node.
    pub const ANIM_PLAY: u16 = 2;
    /// Two-pose linear blend.
    pub const ANIM_BLEND: u16 = 9;
    /// Additive blend over a base pose.
    pub const ANIM_BLEND_ADDITIVE: u16 = 10;
    /// Masked blend of two poses.
    pub const ANIM_BLEND_MASK: u16 = 11;
    /// Linear blend space over one axis.
    pub const ANIM_MULTI_BLEND_1D: u16 = 12;
    /// Triangulated blend space over two axes.
    pub const ANIM_MULTI_BLEND_2D: u16 = 13;
    /// Indexed pose selector with crossfade.
    pub const ANIM_BLEND_POSES: u16 = 14;
    /// Root motion accessors.
    pub const ANIM_GET_ROOT_MOTION: u16 = 15;
    /// Replaces root motion of a pose.
    pub const ANIM_SET_ROOT_MOTION: u16 = 16;
    /// Accumulates extra root motion onto a pose.
    pub const ANIM_ADD_ROOT_MOTION: u16 = 17;
    /// Hierarchical state machine.
    pub const ANIM_STATE_MACHINE: u16 = 18;
    /// Entry marker of a state machine graph.
    pub const ANIM_ENTRY: u16 = 19;
    /// A state with its own pose sub-graph.
    pub const ANIM_STATE: u16 = 20;
    /// The pose output of a state sub-graph.
    pub const ANIM_STATE_OUTPUT: u16 = 21;
    /// The boolean output of a transition rule sub-graph.
    pub const ANIM_RULE_OUTPUT: u16 = 22;
    /// Playback info of the transition's source state, for rule graphs.
    pub const ANIM_TRANSITION_SOURCE: u16 = 23;
    /// Reusable function graph call.
    pub const ANIM_FUNCTION: u16 = 24;
    /// Bone transform override in local space.
    pub const ANIM_TRANSFORM_NODE_LOCAL: u16 = 25;
    /// Bone transform override in model space.
    pub const ANIM_TRANSFORM_NODE_MODEL: u16 = 26;
    /// Copies transform components from one bone to another.
    pub const ANIM_COPY_NODE: u16 = 27;
    /// Reads a bone transform in model space.
    pub const ANIM_GET_NODE_TRANSFORM_MODEL: u16 = 28;
    /// Rotates a bone to aim at a world-space target.
    pub const ANIM_AIM_IK: u16 = 29;
    /// Reads a bone transform in local space.
    pub const ANIM_GET_NODE_TRANSFORM_LOCAL: u16 = 30;
    /// Planar two-bone IK solver.
    pub const ANIM_TWO_BONE_IK: u16 = 31;
    /// Slot playback mixed over the input pose.
    pub const ANIM_SLOT: u16 = 32;
    /// Per-instance constant data initialized on first evaluation.
    pub const ANIM_INSTANCE_DATA: u16 = 33;
    /// Transition source evaluated regardless of the current state.
    pub const ANIM_ANY_STATE: u16 = 34;

    /// Function graph input boundary.
    pub const FUNCTION_INPUT: u16 = 1;
    /// Function graph output boundary.
    pub const FUNCTION_OUTPUT: u16 = 2;
}

/// Index of a sub-graph inside the flattened graph arena of an
/// [`AnimGraph`]. Index `0` is always the root graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GraphId(pub(crate) u32);

impl GraphId {
    /// The root graph of the arena.
    pub const ROOT: GraphId = GraphId(0);
}

/// Address of a node: the sub-graph it belongs to plus its index there.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeRef {
    /// Owning sub-graph.
    pub graph: GraphId,
    /// Index of the node in the sub-graph's node list.
    pub node: u32,
}

/// Address of a box on a node. Used as the key of the per-tick value cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BoxRef {
    /// The node owning the box.
    pub node: NodeRef,
    /// Identifier of the box on its node.
    pub box_id: u32,
}

/// An input or output port of a node. Holds back references to the source
/// boxes feeding it; traversal is pull-based from output boxes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeBox {
    /// Identifier of the box, unique on its node.
    pub id: u32,
    /// Source connections as `(node_index, box_id)` pairs within the same
    /// sub-graph.
    pub sources: Vec<(u32, u32)>,
}

impl NodeBox {
    /// Creates an unconnected box.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            sources: Vec::new(),
        }
    }

    /// Returns `true` if anything is connected to the box.
    #[inline]
    pub fn has_connection(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Returns the first source connection of the box.
    #[inline]
    pub fn first_source(&self) -> Option<(u32, u32)> {
        self.sources.first().copied()
    }
}

bitflags! {
    /// Behavior flags of a state transition.
    #[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
    pub struct TransitionFlags: u32 {
        /// Disabled transitions are dropped at load.
        const ENABLED = 1;
        /// Stop scanning further transitions after this one.
        const SOLO = 2;
        /// Fire when the source state playback is about to end instead of
        /// evaluating the rule graph.
        const USE_DEFAULT_RULE = 4;
        /// Keep re-evaluating the rule while the transition is blending and
        /// roll back when it turns false.
        const INTERRUPTION_RULE_RECHECKING = 8;
        /// Cancel or switch transitions without blending back.
        const INTERRUPTION_INSTANT = 16;
        /// While blending, transitions of the source state may take over.
        const INTERRUPTION_SOURCE_STATE = 32;
        /// While blending, transitions of the destination state may take
        /// over.
        const INTERRUPTION_DESTINATION_STATE = 64;
    }
}

/// A directed transition between two states of a state machine.
#[derive(Clone, Debug, PartialEq)]
pub struct StateTransition {
    /// Index of the destination state node inside the machine's sub-graph.
    pub destination: u32,
    /// Optional rule sub-graph whose root output decides whether the
    /// transition fires.
    pub rule_graph: Option<GraphId>,
    /// Behavior flags.
    pub flags: TransitionFlags,
    /// The curve shaping the blend weight.
    pub blend_mode: AlphaBlendMode,
    /// Duration of the crossfade in seconds. Durations within epsilon of
    /// zero commit instantly.
    pub blend_duration: f32,
}

/// A named, typed, default-valued parameter cell. Instances override
/// parameter values while keeping the layout of the graph's list.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphParameter {
    /// Stable identifier of the parameter.
    pub id: Uuid,
    /// Display name of the parameter.
    pub name: String,
    /// Default value of the parameter.
    pub value: Value,
}

/// The kind of per-instance state a stateful node needs. Registered per
/// bucket index at load; instances use the list to initialize and reset
/// their bucket arrays.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BucketKind {
    /// Clip playback position.
    Animation,
    /// Up to three concurrently sampled clip positions.
    MultiBlend,
    /// Crossfade progress of an indexed pose selector.
    BlendPose,
    /// Current state and transition progress of a state machine.
    StateMachine,
    /// Slot playback state.
    Slot,
    /// Four floats of per-instance constant data.
    InstanceData,
}

/// The context handed to custom node evaluation. Lets the handler pull
/// values from its input boxes without exposing evaluator internals.
pub trait CustomNodeContext {
    /// Resolves the value connected to the given box of the custom node,
    /// or [`Value::Null`] when nothing is connected.
    fn input_value(&mut self, box_id: u32) -> Value;
    /// Delta time of the current update.
    fn dt(&self) -> f32;
    /// Monotonic frame index of the current update.
    fn frame(&self) -> u64;
}

/// A host-registered node evaluator. Nodes of the custom group dispatch to
/// a handler registered for their type id; the evaluator treats it as a
/// black box that turns a box id into a value.
pub trait CustomNode: Send + Sync {
    /// Evaluates an output box of the node.
    fn evaluate(&self, ctx: &mut dyn CustomNodeContext, box_id: u32) -> Value;
}

/// Registry of custom node handlers keyed by node type id. Passed to the
/// loader so handlers attach to nodes at load time.
#[derive(Default, Clone)]
pub struct CustomNodeRegistry {
    handlers: FxHashMap<u16, Arc<dyn CustomNode>>,
}

impl CustomNodeRegistry {
    /// Registers a handler for the given custom node type id.
    pub fn register(&mut self, type_id: u16, handler: Arc<dyn CustomNode>) {
        self.handlers.insert(type_id, handler);
    }

    /// Returns the handler registered for the given type id.
    pub fn get(&self, type_id: u16) -> Option<&Arc<dyn CustomNode>> {
        self.handlers.get(&type_id)
    }
}

/// A handle to a registered custom node evaluator.
#[derive(Clone)]
pub struct CustomNodeHandle(pub Arc<dyn CustomNode>);

impl fmt::Debug for CustomNodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomNodeHandle")
    }
}

/// Per-node cached auxiliary data, discriminated by the node's type pair.
#[derive(Clone, Debug, Default)]
pub enum NodeData {
    /// No auxiliary data.
    #[default]
    None,
    /// Resolved clip of a sampling node.
    Animation {
        /// The referenced clip, if it resolved at load.
        clip: Option<ClipResource>,
    },
    /// Cached layout of a 1D blend space.
    MultiBlend1D {
        /// Amount of blend points.
        count: u8,
        /// Shared effective length of the mixed clips, computed lazily on
        /// first evaluation to stabilize looped playback.
        length: OnceLock<f32>,
        /// Blend point indices sorted by X. Points without a resolved clip
        /// use [`MULTI_BLEND_INVALID`].
        indices_sorted: Vec<u8>,
        /// Resolved clips per blend point.
        clips: Vec<Option<ClipResource>>,
    },
    /// Cached triangulation of a 2D blend space.
    MultiBlend2D {
        /// Amount of blend points.
        count: u8,
        /// Shared effective length of the mixed clips, computed lazily.
        length: OnceLock<f32>,
        /// Flat triangle vertex indices, three per triangle, pointing at
        /// blend point slots.
        triangles: Vec<u8>,
        /// Resolved clips per blend point.
        clips: Vec<Option<ClipResource>>,
    },
    /// Owned sub-graph of a state machine.
    StateMachine {
        /// The machine's graph; `None` when its surface failed to load.
        graph: Option<GraphId>,
    },
    /// Owned sub-graph and outgoing transitions of a state.
    State {
        /// The state's pose graph.
        graph: Option<GraphId>,
        /// Indices into the machine graph's transition table, in priority
        /// order.
        transitions: Vec<u16>,
    },
    /// Outgoing transitions evaluated regardless of the current state.
    AnyState {
        /// Indices into the machine graph's transition table.
        transitions: Vec<u16>,
    },
    /// Resolved function graph of a call node.
    Function {
        /// The function body graph.
        graph: Option<GraphId>,
        /// Function inputs as `(name, node_index)` pairs in declaration
        /// order. The call node's input box `i` feeds input `i`.
        inputs: Vec<(String, u32)>,
        /// Function outputs as `(name, node_index)` pairs.
        outputs: Vec<(String, u32)>,
    },
    /// A bone resolved against the base skeleton, `-1` when unresolved.
    SkeletonNode {
        /// Index of the bone in the base skeleton.
        node_index: i32,
    },
    /// Source and destination bones of a copy node.
    CopyNode {
        /// Source bone index, `-1` when unresolved.
        src: i32,
        /// Destination bone index, `-1` when unresolved.
        dst: i32,
    },
    /// Per-bone filter of a masked blend, sized to the base skeleton.
    BoneMask {
        /// `true` for bones affected by the blend.
        mask: Vec<bool>,
    },
    /// Host-provided evaluator of a custom node.
    Custom {
        /// The registered handler.
        handler: CustomNodeHandle,
    },
}

/// Sentinel marking an unused slot of a multi-blend index table.
pub const MULTI_BLEND_INVALID: u8 = 0xff;

/// A single operator node of a graph.
#[derive(Clone, Debug, Default)]
pub struct GraphNode {
    /// Identifier of the node, unique within its sub-graph. Used by
    /// connections, trace events and entry markers.
    pub id: u32,
    /// Group of the node type pair.
    pub group_id: u16,
    /// Type of the node type pair.
    pub type_id: u16,
    /// Ordered literal values: constants and asset references.
    pub values: Vec<Value>,
    /// Ordered connection ports.
    pub boxes: Vec<NodeBox>,
    /// Index of the node's state bucket, `-1` for stateless nodes.
    pub bucket_index: i32,
    /// Cached per-type auxiliary data.
    pub data: NodeData,
}

impl GraphNode {
    /// Returns the box with the given id, if the node has one.
    pub fn get_box(&self, id: u32) -> Option<&NodeBox> {
        // Boxes are serialized in id order, so a direct hit is the common
        // case.
        if let Some(node_box) = self.boxes.get(id as usize) {
            if node_box.id == id {
                return Some(node_box);
            }
        }
        self.boxes.iter().find(|b| b.id == id)
    }

    /// Returns the literal value at the given index, or null when the node
    /// carries fewer values.
    pub fn value(&self, index: usize) -> Value {
        self.values.get(index).cloned().unwrap_or_default()
    }
}

/// A self-contained graph: the body of the root surface, a state machine, a
/// state, a transition rule or a reusable function.
#[derive(Clone, Debug, Default)]
pub struct SubGraph {
    /// Nodes of the graph.
    pub nodes: Vec<GraphNode>,
    /// Parameters declared by this graph. Only the root graph's list is
    /// overridable per instance.
    pub parameters: Vec<GraphParameter>,
    /// Index of the root node: the output node of the surface, or the entry
    /// state of a state machine.
    pub root_node: Option<u32>,
    /// Flat transition table of a state machine graph. States hold index
    /// lists into it.
    pub state_transitions: Vec<StateTransition>,
    /// First bucket index used by this graph's own nodes.
    pub buckets_start: u32,
    /// Amount of buckets used by this graph's own nodes.
    pub buckets_count_self: u32,
    /// Amount of buckets used by this graph and all graphs nested in it.
    pub buckets_count_total: u32,
}

impl SubGraph {
    /// Finds a node by its serialized identifier.
    pub fn find_node_by_id(&self, id: u32) -> Option<u32> {
        self.nodes
            .iter()
            .position(|n| n.id == id)
            .map(|index| index as u32)
    }
}

/// The animation graph definition: a flattened arena of sub-graphs shared
/// read-only between every instance playing it. Hot reloads replace the
/// arena and bump [`AnimGraph::version`]; instances detect the mismatch and
/// rebuild their state.
#[derive(Debug, Default)]
pub struct AnimGraph {
    /// All sub-graphs of the tree; index 0 is the root.
    pub(crate) graphs: Vec<SubGraph>,
    /// Version of the definition, compared against instance versions.
    pub version: u32,
    /// Bucket kinds indexed by bucket index; the length is the total bucket
    /// count of the whole tree.
    pub(crate) bucket_kinds: Vec<BucketKind>,
    /// The skeleton the graph was authored for.
    pub base_skeleton: Option<SkeletonResource>,
}

/// Shared handle to a loaded animation graph.
pub type AnimGraphResource = Arc<AnimGraph>;

impl AnimGraph {
    /// Returns the root sub-graph.
    #[inline]
    pub fn root(&self) -> &SubGraph {
        &self.graphs[0]
    }

    /// Returns a sub-graph of the arena.
    #[inline]
    pub fn graph(&self, id: GraphId) -> &SubGraph {
        &self.graphs[id.0 as usize]
    }

    /// Returns a node of the arena.
    #[inline]
    pub fn node(&self, node_ref: NodeRef) -> &GraphNode {
        &self.graph(node_ref.graph).nodes[node_ref.node as usize]
    }

    /// Returns all sub-graphs of the arena.
    #[inline]
    pub fn graphs(&self) -> &[SubGraph] {
        &self.graphs
    }

    /// Returns the instance-overridable parameter list (the root graph's).
    #[inline]
    pub fn parameters(&self) -> &[GraphParameter] {
        &self.root().parameters
    }

    /// Finds a root parameter by its id.
    pub fn find_parameter(&self, id: Uuid) -> Option<(usize, &GraphParameter)> {
        self.parameters()
            .iter()
            .enumerate()
            .find(|(_, p)| p.id == id)
    }

    /// Total amount of state buckets required by an instance of this graph.
    #[inline]
    pub fn total_bucket_count(&self) -> usize {
        self.bucket_kinds.len()
    }

    /// Bucket kinds indexed by bucket index.
    #[inline]
    pub fn bucket_kinds(&self) -> &[BucketKind] {
        &self.bucket_kinds
    }

    /// Returns `true` when the graph has a root surface to evaluate.
    pub fn is_ready(&self) -> bool {
        !self.graphs.is_empty() && self.root().root_node.is_some()
    }
}
