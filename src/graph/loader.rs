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

//! Binary graph loader. Decodes a serialized surface into an [`AnimGraph`],
//! assigns state bucket slots, resolves assets and skeleton bones, decodes
//! state transition tables and recursively loads nested sub-graphs.

use crate::{
    alpha::AlphaBlendMode,
    clip::ClipResource,
    graph::{
        ids, AnimGraph, BucketKind, CustomNodeHandle, CustomNodeRegistry, GraphId, GraphNode,
        GraphParameter, NodeBox, NodeData, StateTransition, SubGraph, TransitionFlags,
        MULTI_BLEND_INVALID,
    },
    skeleton::{SkeletonMaskResource, SkeletonResource},
    value::Value,
};
use byteorder::{LittleEndian, ReadBytesExt};
use log::warn;
use nalgebra::{Quaternion, Vector2, Vector3, Vector4};
use spade::{DelaunayTriangulation, Point2, Triangulation};
use std::{
    error::Error,
    fmt,
    io::{self, Cursor, Read},
    sync::OnceLock,
};
use uuid::Uuid;

/// Magic bytes opening every serialized graph surface.
pub const SURFACE_MAGIC: &[u8; 4] = b"AGRF";
/// Version of the surface format this loader understands.
pub const SURFACE_VERSION: u32 = 1;
/// Version of the state transitions table format.
pub const TRANSITIONS_VERSION: u32 = 1;

/// An error occurred during graph loading. Structural problems inside an
/// otherwise well-formed surface (missing rule roots, unknown transition
/// targets, unresolved assets) are not errors: the offending element is
/// skipped with a logged warning and the rest of the graph loads.
#[derive(Debug)]
pub enum GraphLoadError {
    /// Low-level read failure, including a truncated surface.
    Io(io::Error),
    /// The data does not start with the surface magic.
    NotASurface,
    /// The surface was written by an unsupported format version.
    UnsupportedVersion(u32),
    /// A serialized value has an unknown type tag.
    InvalidValueTag(u8),
    /// A serialized string is not valid UTF-8.
    InvalidString,
}

impl fmt::Display for GraphLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphLoadError::Io(err) => write!(f, "io error: {err}"),
            GraphLoadError::NotASurface => write!(f, "the data is not a graph surface"),
            GraphLoadError::UnsupportedVersion(version) => {
                write!(f, "unsupported surface version {version}")
            }
            GraphLoadError::InvalidValueTag(tag) => {
                write!(f, "unknown value type tag {tag}")
            }
            GraphLoadError::InvalidString => write!(f, "malformed utf-8 string"),
        }
    }
}

impl Error for GraphLoadError {}

impl From<io::Error> for GraphLoadError {
    fn from(err: io::Error) -> Self {
        GraphLoadError::Io(err)
    }
}

/// Source of external assets referenced by graph literals. Implemented by
/// the host; every method defaults to "not loaded" so partial providers
/// stay valid.
pub trait AssetProvider {
    /// Resolves an animation clip by its id.
    fn clip(&self, id: Uuid) -> Option<ClipResource> {
        let _ = id;
        None
    }

    /// Resolves the serialized surface of a function graph by its id.
    fn function_graph(&self, id: Uuid) -> Option<Vec<u8>> {
        let _ = id;
        None
    }

    /// Resolves a skeleton mask by its id.
    fn skeleton_mask(&self, id: Uuid) -> Option<SkeletonMaskResource> {
        let _ = id;
        None
    }
}

/// An asset provider that resolves nothing. Useful for graphs without
/// external references and for tests.
pub struct NoAssets;

impl AssetProvider for NoAssets {}

/// Graph loading front end. Borrows the asset source and custom node
/// registry for the duration of a load.
pub struct GraphLoader<'a> {
    /// Source of clips, masks and function surfaces.
    pub assets: &'a dyn AssetProvider,
    /// Handlers for custom group nodes.
    pub custom_nodes: &'a CustomNodeRegistry,
    /// The skeleton bone names are resolved against. Nodes referencing
    /// bones become no-ops when absent.
    pub base_skeleton: Option<SkeletonResource>,
    /// Version stamp of the produced definition; bump it on hot reload so
    /// instances rebuild their state.
    pub version: u32,
}

impl GraphLoader<'_> {
    /// Loads a graph definition from a serialized surface.
    pub fn load(&self, data: &[u8]) -> Result<AnimGraph, GraphLoadError> {
        let mut state = LoaderState {
            loader: self,
            graphs: Vec::new(),
            bucket_kinds: Vec::new(),
        };
        state.load_sub_graph(data, "root")?;
        Ok(AnimGraph {
            graphs: state.graphs,
            version: self.version,
            bucket_kinds: state.bucket_kinds,
            base_skeleton: self.base_skeleton.clone(),
        })
    }
}

struct LoaderState<'a, 'b> {
    loader: &'a GraphLoader<'b>,
    graphs: Vec<SubGraph>,
    bucket_kinds: Vec<BucketKind>,
}

impl LoaderState<'_, '_> {
    /// Loads a nested surface, returning `None` (with a warning) when it is
    /// malformed. Failures of nested surfaces do not fail the outer load.
    fn try_load_sub_graph(&mut self, data: &[u8], name: &str) -> Option<GraphId> {
        if data.is_empty() {
            return None;
        }
        match self.load_sub_graph(data, name) {
            Ok(graph) => Some(graph),
            Err(err) => {
                warn!("Failed to load sub graph {name}: {err}");
                None
            }
        }
    }

    fn load_sub_graph(&mut self, data: &[u8], name: &str) -> Result<GraphId, GraphLoadError> {
        let id = GraphId(self.graphs.len() as u32);
        self.graphs.push(SubGraph::default());

        let mut sub = SubGraph {
            buckets_start: self.bucket_kinds.len() as u32,
            ..Default::default()
        };

        let mut stream = Cursor::new(data);

        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic)?;
        if &magic != SURFACE_MAGIC {
            return Err(GraphLoadError::NotASurface);
        }
        let version = stream.read_u32::<LittleEndian>()?;
        if version != SURFACE_VERSION {
            return Err(GraphLoadError::UnsupportedVersion(version));
        }

        let param_count = stream.read_u32::<LittleEndian>()?;
        for _ in 0..param_count {
            sub.parameters.push(GraphParameter {
                id: read_uuid(&mut stream)?,
                name: read_string(&mut stream)?,
                value: read_value(&mut stream)?,
            });
        }

        let node_count = stream.read_u32::<LittleEndian>()?;
        for _ in 0..node_count {
            let node_id = stream.read_u32::<LittleEndian>()?;
            let group_id = stream.read_u16::<LittleEndian>()?;
            let type_id = stream.read_u16::<LittleEndian>()?;

            let value_count = stream.read_u32::<LittleEndian>()?;
            let mut values = Vec::with_capacity(value_count as usize);
            for _ in 0..value_count {
                values.push(read_value(&mut stream)?);
            }

            let box_count = stream.read_u32::<LittleEndian>()?;
            let mut boxes = Vec::with_capacity(box_count as usize);
            for _ in 0..box_count {
                let box_id = stream.read_u32::<LittleEndian>()?;
                let source_count = stream.read_u32::<LittleEndian>()?;
                let mut sources = Vec::with_capacity(source_count as usize);
                for _ in 0..source_count {
                    let source_node = stream.read_u32::<LittleEndian>()?;
                    let source_box = stream.read_u32::<LittleEndian>()?;
                    sources.push((source_node, source_box));
                }
                boxes.push(NodeBox {
                    id: box_id,
                    sources,
                });
            }

            sub.nodes.push(GraphNode {
                id: node_id,
                group_id,
                type_id,
                values,
                boxes,
                bucket_index: -1,
                data: NodeData::None,
            });
        }

        // Connections reference nodes by their serialized ids; remap them to
        // node indices, dropping references to unknown nodes.
        let ids_to_indices: Vec<(u32, u32)> = sub
            .nodes
            .iter()
            .enumerate()
            .map(|(index, n)| (n.id, index as u32))
            .collect();
        for node in sub.nodes.iter_mut() {
            for node_box in node.boxes.iter_mut() {
                node_box.sources.retain_mut(|(source_node, _)| {
                    match ids_to_indices.iter().find(|(id, _)| *id == *source_node) {
                        Some((_, index)) => {
                            *source_node = *index;
                            true
                        }
                        None => {
                            warn!("Dropping a connection to unknown node {source_node} in {name}");
                            false
                        }
                    }
                });
            }
        }

        // Assign bucket slots for every stateful node of this graph before
        // loading anything nested, so a graph's own buckets stay contiguous
        // at [buckets_start; buckets_start + buckets_count_self).
        for node in sub.nodes.iter_mut() {
            if let Some(kind) = bucket_kind_of(node.group_id, node.type_id) {
                node.bucket_index = self.bucket_kinds.len() as i32;
                self.bucket_kinds.push(kind);
                sub.buckets_count_self += 1;
            }
        }

        // Resolve per-type auxiliary data and recurse into nested surfaces.
        // The node list is processed by index since rule and state surfaces
        // push new graphs into the arena as they load.
        for node_index in 0..sub.nodes.len() {
            self.resolve_node_data(&mut sub, node_index)?;
        }

        sub.buckets_count_total = self.bucket_kinds.len() as u32 - sub.buckets_start;
        self.graphs[id.0 as usize] = sub;
        Ok(id)
    }

    fn resolve_node_data(
        &mut self,
        sub: &mut SubGraph,
        node_index: usize,
    ) -> Result<(), GraphLoadError> {
        let group_id = sub.nodes[node_index].group_id;
        let type_id = sub.nodes[node_index].type_id;
        match (group_id, type_id) {
            (ids::GROUP_ANIMATION, ids::ANIM_OUTPUT)
            | (ids::GROUP_ANIMATION, ids::ANIM_STATE_OUTPUT)
            | (ids::GROUP_ANIMATION, ids::ANIM_RULE_OUTPUT) => {
                sub.root_node = Some(node_index as u32);
            }
            (ids::GROUP_ANIMATION, ids::ANIM_ENTRY) => {
                let entry_id = sub.nodes[node_index].value(0).as_int() as u32;
                match sub.find_node_by_id(entry_id) {
                    Some(index) => sub.root_node = Some(index),
                    None => warn!("Missing entry state node {entry_id}"),
                }
            }
            (ids::GROUP_ANIMATION, ids::ANIM_PLAY) => {
                let clip = self.resolve_clip(sub.nodes[node_index].value(0));
                sub.nodes[node_index].data = NodeData::Animation { clip };
            }
            (ids::GROUP_ANIMATION, ids::ANIM_MULTI_BLEND_1D) => {
                let node = &sub.nodes[node_index];
                let count = multi_blend_count(node);
                let mut clips = Vec::with_capacity(count as usize);
                let mut indices: Vec<u8> = Vec::with_capacity(count as usize);
                for i in 0..count {
                    let clip = self.resolve_clip(node.value(5 + i as usize * 2));
                    indices.push(if clip.is_some() { i } else { MULTI_BLEND_INVALID });
                    clips.push(clip);
                }
                // Sort blend points by X location, unused slots go last.
                let point_x = |slot: u8| {
                    if slot == MULTI_BLEND_INVALID {
                        f32::MAX
                    } else {
                        node.value(4 + slot as usize * 2).as_vec4().x
                    }
                };
                indices.sort_by(|a, b| point_x(*a).total_cmp(&point_x(*b)));
                sub.nodes[node_index].data = NodeData::MultiBlend1D {
                    count,
                    length: OnceLock::new(),
                    indices_sorted: indices,
                    clips,
                };
            }
            (ids::GROUP_ANIMATION, ids::ANIM_MULTI_BLEND_2D) => {
                let node = &sub.nodes[node_index];
                let count = multi_blend_count(node);
                let mut clips = Vec::with_capacity(count as usize);
                let mut vertices = Vec::new();
                let mut vertex_to_slot = Vec::new();
                for i in 0..count {
                    let clip = self.resolve_clip(node.value(5 + i as usize * 2));
                    if clip.is_some() {
                        let info = node.value(4 + i as usize * 2).as_vec4();
                        vertices.push(Vector2::new(info.x, info.y));
                        vertex_to_slot.push(i);
                    }
                    clips.push(clip);
                }
                let triangles = triangulate_blend_space(&vertices, &vertex_to_slot);
                sub.nodes[node_index].data = NodeData::MultiBlend2D {
                    count,
                    length: OnceLock::new(),
                    triangles,
                    clips,
                };
            }
            (ids::GROUP_ANIMATION, ids::ANIM_STATE_MACHINE) => {
                let name = sub.nodes[node_index].value(0).as_str().to_string();
                let surface = take_blob(&mut sub.nodes[node_index], 1);
                let graph = self.try_load_sub_graph(&surface, &name);
                sub.nodes[node_index].data = NodeData::StateMachine { graph };
            }
            (ids::GROUP_ANIMATION, ids::ANIM_STATE) => {
                let name = sub.nodes[node_index].value(0).as_str().to_string();
                let surface = take_blob(&mut sub.nodes[node_index], 1);
                let graph = self.try_load_sub_graph(&surface, &name);
                let transitions_data = take_blob(&mut sub.nodes[node_index], 2);
                let transitions = self.load_state_transitions(sub, &transitions_data);
                sub.nodes[node_index].data = NodeData::State { graph, transitions };
            }
            (ids::GROUP_ANIMATION, ids::ANIM_ANY_STATE) => {
                let transitions_data = take_blob(&mut sub.nodes[node_index], 0);
                let transitions = self.load_state_transitions(sub, &transitions_data);
                sub.nodes[node_index].data = NodeData::AnyState { transitions };
            }
            (ids::GROUP_ANIMATION, ids::ANIM_FUNCTION) => {
                let data = self.resolve_function(sub.nodes[node_index].value(0));
                sub.nodes[node_index].data = data;
            }
            (ids::GROUP_ANIMATION, ids::ANIM_TRANSFORM_NODE_LOCAL)
            | (ids::GROUP_ANIMATION, ids::ANIM_TRANSFORM_NODE_MODEL)
            | (ids::GROUP_ANIMATION, ids::ANIM_GET_NODE_TRANSFORM_MODEL)
            | (ids::GROUP_ANIMATION, ids::ANIM_GET_NODE_TRANSFORM_LOCAL)
            | (ids::GROUP_ANIMATION, ids::ANIM_AIM_IK)
            | (ids::GROUP_ANIMATION, ids::ANIM_TWO_BONE_IK) => {
                let node_index_in_skeleton =
                    self.resolve_bone(sub.nodes[node_index].value(0).as_str());
                sub.nodes[node_index].data = NodeData::SkeletonNode {
                    node_index: node_index_in_skeleton,
                };
            }
            (ids::GROUP_ANIMATION, ids::ANIM_COPY_NODE) => {
                let src = self.resolve_bone(sub.nodes[node_index].value(0).as_str());
                let dst = self.resolve_bone(sub.nodes[node_index].value(1).as_str());
                sub.nodes[node_index].data = NodeData::CopyNode { src, dst };
            }
            (ids::GROUP_ANIMATION, ids::ANIM_BLEND_MASK) => {
                let mask = sub.nodes[node_index]
                    .value(1)
                    .as_asset_id()
                    .and_then(|id| self.loader.assets.skeleton_mask(id));
                let filter = match (&mask, &self.loader.base_skeleton) {
                    (Some(mask), Some(skeleton)) => mask.build_filter(skeleton),
                    _ => Vec::new(),
                };
                sub.nodes[node_index].data = NodeData::BoneMask { mask: filter };
            }
            (ids::GROUP_CUSTOM, custom_type) => {
                match self.loader.custom_nodes.get(custom_type) {
                    Some(handler) => {
                        sub.nodes[node_index].data = NodeData::Custom {
                            handler: CustomNodeHandle(handler.clone()),
                        };
                    }
                    None => {
                        warn!("No handler registered for custom node type {custom_type}");
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Decodes a state transitions blob into the graph's flat transition
    /// table and returns the indices of the decoded entries.
    fn load_state_transitions(&mut self, sub: &mut SubGraph, data: &[u8]) -> Vec<u16> {
        let mut indices = Vec::new();
        if data.is_empty() {
            return indices;
        }
        if let Err(err) = self.load_state_transitions_inner(sub, data, &mut indices) {
            warn!("Failed to load state transitions: {err}");
        }
        indices
    }

    fn load_state_transitions_inner(
        &mut self,
        sub: &mut SubGraph,
        data: &[u8],
        indices: &mut Vec<u16>,
    ) -> Result<(), GraphLoadError> {
        let mut stream = Cursor::new(data);

        let version = stream.read_u32::<LittleEndian>()?;
        if version != TRANSITIONS_VERSION {
            return Err(GraphLoadError::UnsupportedVersion(version));
        }

        let count = stream.read_u32::<LittleEndian>()?;
        for _ in 0..count {
            let destination_id = stream.read_u32::<LittleEndian>()?;
            let flags = TransitionFlags::from_bits_truncate(stream.read_u32::<LittleEndian>()?);
            // Priority order; transitions are serialized pre-sorted by it.
            let _order = stream.read_i32::<LittleEndian>()?;
            let blend_duration = stream.read_f32::<LittleEndian>()?;
            let blend_mode = AlphaBlendMode::from_id(stream.read_u32::<LittleEndian>()? as u8)
                .unwrap_or_default();
            let rule_size = stream.read_u32::<LittleEndian>()? as usize;
            let mut rule_data = vec![0u8; rule_size];
            stream.read_exact(&mut rule_data)?;

            if !flags.contains(TransitionFlags::ENABLED) {
                continue;
            }

            let rule_graph = self.try_load_sub_graph(&rule_data, "rule");
            if rule_size != 0 {
                if let Some(rule) = rule_graph {
                    if self.graphs[rule.0 as usize].root_node.is_none() {
                        warn!("Missing root node for the state machine transition rule graph");
                        continue;
                    }
                }
            }

            let destination = match sub.find_node_by_id(destination_id) {
                Some(index) => index,
                None => {
                    warn!("Missing target node for the state machine transition");
                    continue;
                }
            };

            indices.push(sub.state_transitions.len() as u16);
            sub.state_transitions.push(StateTransition {
                destination,
                rule_graph,
                flags,
                blend_mode,
                blend_duration,
            });
        }

        Ok(())
    }

    fn resolve_clip(&self, value: Value) -> Option<ClipResource> {
        let id = value.as_asset_id()?;
        let clip = self.loader.assets.clip(id);
        if clip.is_none() {
            warn!("Failed to resolve animation clip {id}");
        }
        clip
    }

    fn resolve_function(&mut self, value: Value) -> NodeData {
        let Some(id) = value.as_asset_id() else {
            return NodeData::Function {
                graph: None,
                inputs: Vec::new(),
                outputs: Vec::new(),
            };
        };
        let Some(surface) = self.loader.assets.function_graph(id) else {
            warn!("Failed to resolve function graph {id}");
            return NodeData::Function {
                graph: None,
                inputs: Vec::new(),
                outputs: Vec::new(),
            };
        };
        let graph = self.try_load_sub_graph(&surface, "function");
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        if let Some(graph) = graph {
            for (index, node) in self.graphs[graph.0 as usize].nodes.iter().enumerate() {
                if node.group_id == ids::GROUP_FUNCTION {
                    let entry = (node.value(0).as_str().to_string(), index as u32);
                    if node.type_id == ids::FUNCTION_INPUT {
                        inputs.push(entry);
                    } else if node.type_id == ids::FUNCTION_OUTPUT {
                        outputs.push(entry);
                    }
                }
            }
        }
        NodeData::Function {
            graph,
            inputs,
            outputs,
        }
    }

    fn resolve_bone(&self, name: &str) -> i32 {
        match &self.loader.base_skeleton {
            Some(skeleton) if !name.is_empty() => skeleton.find_node(name),
            _ => -1,
        }
    }
}

/// Returns the bucket kind of a stateful node type, `None` for stateless
/// node types.
fn bucket_kind_of(group_id: u16, type_id: u16) -> Option<BucketKind> {
    match (group_id, type_id) {
        (ids::GROUP_TOOLS, ids::TOOL_TIME) => Some(BucketKind::Animation),
        (ids::GROUP_ANIMATION, ids::ANIM_PLAY) => Some(BucketKind::Animation),
        (ids::GROUP_ANIMATION, ids::ANIM_MULTI_BLEND_1D)
        | (ids::GROUP_ANIMATION, ids::ANIM_MULTI_BLEND_2D) => Some(BucketKind::MultiBlend),
        (ids::GROUP_ANIMATION, ids::ANIM_BLEND_POSES) => Some(BucketKind::BlendPose),
        (ids::GROUP_ANIMATION, ids::ANIM_STATE_MACHINE) => Some(BucketKind::StateMachine),
        (ids::GROUP_ANIMATION, ids::ANIM_SLOT) => Some(BucketKind::Slot),
        (ids::GROUP_ANIMATION, ids::ANIM_INSTANCE_DATA) => Some(BucketKind::InstanceData),
        _ => None,
    }
}

/// Amount of blend points of a multi-blend node: four node-level values,
/// then two values (info, clip) per point.
fn multi_blend_count(node: &GraphNode) -> u8 {
    (node.values.len().saturating_sub(4) / 2).min(MULTI_BLEND_INVALID as usize - 1) as u8
}

/// Triangulates 2D blend space points, mapping triangulation vertices back
/// to blend point slots. Degenerate inputs (fewer than three points, or
/// collinear points the triangulation rejects) produce synthetic triangles
/// so the node still yields a pose.
fn triangulate_blend_space(vertices: &[Vector2<f32>], vertex_to_slot: &[u8]) -> Vec<u8> {
    let mut triangles = Vec::new();

    let mut triangulation: DelaunayTriangulation<Point2<f32>> = DelaunayTriangulation::new();
    let mut valid = true;
    for vertex in vertices {
        if triangulation.insert(Point2::new(vertex.x, vertex.y)).is_err() {
            valid = false;
            break;
        }
    }
    if valid {
        for face in triangulation.inner_faces() {
            let edges = face.adjacent_edges();
            for edge in &edges {
                let vertex = edge.from().index();
                triangles.push(vertex_to_slot.get(vertex).copied().unwrap_or(0));
            }
        }
    }

    if triangles.is_empty() && !vertices.is_empty() {
        // Synthetic fallback triangles; the sampling code degrades them to
        // 1D or single-clip blending.
        let mut left = vertices.len();
        while left >= 3 {
            left -= 3;
            for offset in 0..3 {
                triangles.push(vertex_to_slot[left + offset]);
            }
        }
        if left == 1 {
            triangles.extend_from_slice(&[vertex_to_slot[0]; 3]);
        } else if left == 2 {
            triangles.extend_from_slice(&[vertex_to_slot[0], vertex_to_slot[1], vertex_to_slot[0]]);
        }
    }

    triangles
}

/// Replaces a blob literal of a node with null and returns its payload.
fn take_blob(node: &mut GraphNode, value_index: usize) -> Vec<u8> {
    match node.values.get_mut(value_index) {
        Some(value @ Value::Blob(_)) => {
            let Value::Blob(data) = std::mem::take(value) else {
                unreachable!()
            };
            data
        }
        _ => Vec::new(),
    }
}

pub(crate) fn read_uuid(stream: &mut Cursor<&[u8]>) -> Result<Uuid, GraphLoadError> {
    let mut bytes = [0u8; 16];
    stream.read_exact(&mut bytes)?;
    Ok(Uuid::from_bytes(bytes))
}

pub(crate) fn read_string(stream: &mut Cursor<&[u8]>) -> Result<String, GraphLoadError> {
    let len = stream.read_u32::<LittleEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    stream.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| GraphLoadError::InvalidString)
}

pub(crate) fn read_value(stream: &mut Cursor<&[u8]>) -> Result<Value, GraphLoadError> {
    let tag = stream.read_u8()?;
    Ok(match tag {
        0 => Value::Null,
        1 => Value::Bool(stream.read_u8()? != 0),
        2 => Value::Int(stream.read_i32::<LittleEndian>()?),
        3 => Value::Float(stream.read_f32::<LittleEndian>()?),
        4 => Value::Vec2(Vector2::new(
            stream.read_f32::<LittleEndian>()?,
            stream.read_f32::<LittleEndian>()?,
        )),
        5 => Value::Vec3(Vector3::new(
            stream.read_f32::<LittleEndian>()?,
            stream.read_f32::<LittleEndian>()?,
            stream.read_f32::<LittleEndian>()?,
        )),
        6 => Value::Vec4(Vector4::new(
            stream.read_f32::<LittleEndian>()?,
            stream.read_f32::<LittleEndian>()?,
            stream.read_f32::<LittleEndian>()?,
            stream.read_f32::<LittleEndian>()?,
        )),
        7 => {
            let x = stream.read_f32::<LittleEndian>()?;
            let y = stream.read_f32::<LittleEndian>()?;
            let z = stream.read_f32::<LittleEndian>()?;
            let w = stream.read_f32::<LittleEndian>()?;
            Value::Quat(Quaternion::new(w, x, y, z))
        }
        8 => Value::String(read_string(stream)?),
        9 => Value::AssetId(read_uuid(stream)?),
        10 => {
            let len = stream.read_u32::<LittleEndian>()? as usize;
            let mut bytes = vec![0u8; len];
            stream.read_exact(&mut bytes)?;
            Value::Blob(bytes)
        }
        other => return Err(GraphLoadError::InvalidValueTag(other)),
    })
}
