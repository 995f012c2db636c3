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

//! Graph surface writer: produces the binary layout the loader consumes.
//! Used by authoring tools and by tests to build graphs procedurally.

use crate::{
    alpha::AlphaBlendMode,
    graph::{
        loader::{SURFACE_MAGIC, SURFACE_VERSION, TRANSITIONS_VERSION},
        GraphParameter, TransitionFlags,
    },
    value::Value,
};
use byteorder::{LittleEndian, WriteBytesExt};

/// A box of a node being authored, with optional source connections given
/// as `(node_id, box_id)` pairs.
#[derive(Clone, Debug, Default)]
pub struct BoxSpec {
    /// Identifier of the box on its node.
    pub id: u32,
    /// Source connections by serialized node id.
    pub sources: Vec<(u32, u32)>,
}

/// A node being authored.
#[derive(Clone, Debug)]
pub struct NodeSpec {
    /// Identifier of the node, unique within the surface.
    pub id: u32,
    /// Group of the node type pair.
    pub group_id: u16,
    /// Type of the node type pair.
    pub type_id: u16,
    /// Literal values of the node.
    pub values: Vec<Value>,
    /// Boxes of the node.
    pub boxes: Vec<BoxSpec>,
}

impl NodeSpec {
    /// Starts a node of the given type.
    pub fn new(id: u32, group_id: u16, type_id: u16) -> Self {
        Self {
            id,
            group_id,
            type_id,
            values: Vec::new(),
            boxes: Vec::new(),
        }
    }

    /// Appends a literal value.
    pub fn with_value(mut self, value: Value) -> Self {
        self.values.push(value);
        self
    }

    /// Appends an unconnected box.
    pub fn with_box(mut self, id: u32) -> Self {
        self.boxes.push(BoxSpec {
            id,
            sources: Vec::new(),
        });
        self
    }

    /// Appends a box fed by the given box of another node.
    pub fn with_connected_box(mut self, id: u32, source_node: u32, source_box: u32) -> Self {
        self.boxes.push(BoxSpec {
            id,
            sources: vec![(source_node, source_box)],
        });
        self
    }
}

/// Builder of a serialized graph surface.
#[derive(Clone, Debug, Default)]
pub struct SurfaceBuilder {
    /// Parameters of the surface.
    pub parameters: Vec<GraphParameter>,
    /// Nodes of the surface.
    pub nodes: Vec<NodeSpec>,
}

impl SurfaceBuilder {
    /// Creates an empty surface.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter to the surface.
    pub fn add_parameter(&mut self, parameter: GraphParameter) -> &mut Self {
        self.parameters.push(parameter);
        self
    }

    /// Adds a node to the surface and returns its id.
    pub fn add_node(&mut self, node: NodeSpec) -> u32 {
        let id = node.id;
        self.nodes.push(node);
        id
    }

    /// Serializes the surface into its binary form.
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(SURFACE_MAGIC);
        out.write_u32::<LittleEndian>(SURFACE_VERSION).unwrap();

        out.write_u32::<LittleEndian>(self.parameters.len() as u32)
            .unwrap();
        for parameter in &self.parameters {
            out.extend_from_slice(parameter.id.as_bytes());
            write_string(&mut out, &parameter.name);
            write_value(&mut out, &parameter.value);
        }

        out.write_u32::<LittleEndian>(self.nodes.len() as u32)
            .unwrap();
        for node in &self.nodes {
            out.write_u32::<LittleEndian>(node.id).unwrap();
            out.write_u16::<LittleEndian>(node.group_id).unwrap();
            out.write_u16::<LittleEndian>(node.type_id).unwrap();

            out.write_u32::<LittleEndian>(node.values.len() as u32)
                .unwrap();
            for value in &node.values {
                write_value(&mut out, value);
            }

            out.write_u32::<LittleEndian>(node.boxes.len() as u32)
                .unwrap();
            for node_box in &node.boxes {
                out.write_u32::<LittleEndian>(node_box.id).unwrap();
                out.write_u32::<LittleEndian>(node_box.sources.len() as u32)
                    .unwrap();
                for (source_node, source_box) in &node_box.sources {
                    out.write_u32::<LittleEndian>(*source_node).unwrap();
                    out.write_u32::<LittleEndian>(*source_box).unwrap();
                }
            }
        }

        out
    }
}

/// A state transition being authored.
#[derive(Clone, Debug)]
pub struct TransitionSpec {
    /// Serialized id of the destination state node.
    pub destination: u32,
    /// Behavior flags. Remember to include [`TransitionFlags::ENABLED`].
    pub flags: TransitionFlags,
    /// Priority order used by the editor for sorting.
    pub order: i32,
    /// Crossfade duration in seconds.
    pub blend_duration: f32,
    /// Crossfade curve.
    pub blend_mode: AlphaBlendMode,
    /// Serialized rule surface, empty when the transition uses the default
    /// rule or fires unconditionally.
    pub rule: Vec<u8>,
}

impl TransitionSpec {
    /// Starts an enabled transition to the given state.
    pub fn new(destination: u32, blend_duration: f32) -> Self {
        Self {
            destination,
            flags: TransitionFlags::ENABLED,
            order: 0,
            blend_duration,
            blend_mode: AlphaBlendMode::Linear,
            rule: Vec::new(),
        }
    }

    /// Adds behavior flags to the transition.
    pub fn with_flags(mut self, flags: TransitionFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Sets the rule surface of the transition.
    pub fn with_rule(mut self, rule: Vec<u8>) -> Self {
        self.rule = rule;
        self
    }
}

/// Serializes a state's transition list into the blob stored on the state
/// node.
pub fn write_transitions(transitions: &[TransitionSpec]) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(TRANSITIONS_VERSION).unwrap();
    out.write_u32::<LittleEndian>(transitions.len() as u32)
        .unwrap();
    for transition in transitions {
        out.write_u32::<LittleEndian>(transition.destination)
            .unwrap();
        out.write_u32::<LittleEndian>(transition.flags.bits())
            .unwrap();
        out.write_i32::<LittleEndian>(transition.order).unwrap();
        out.write_f32::<LittleEndian>(transition.blend_duration)
            .unwrap();
        out.write_u32::<LittleEndian>(transition.blend_mode as u32)
            .unwrap();
        out.write_u32::<LittleEndian>(transition.rule.len() as u32)
            .unwrap();
        out.extend_from_slice(&transition.rule);
    }
    out
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    out.write_u32::<LittleEndian>(value.len() as u32).unwrap();
    out.extend_from_slice(value.as_bytes());
}

/// Serializes a single value with its type tag.
pub fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.write_u8(0).unwrap(),
        Value::Bool(v) => {
            out.write_u8(1).unwrap();
            out.write_u8(*v as u8).unwrap();
        }
        Value::Int(v) => {
            out.write_u8(2).unwrap();
            out.write_i32::<LittleEndian>(*v).unwrap();
        }
        Value::Float(v) => {
            out.write_u8(3).unwrap();
            out.write_f32::<LittleEndian>(*v).unwrap();
        }
        Value::Vec2(v) => {
            out.write_u8(4).unwrap();
            for i in 0..2 {
                out.write_f32::<LittleEndian>(v[i]).unwrap();
            }
        }
        Value::Vec3(v) => {
            out.write_u8(5).unwrap();
            for i in 0..3 {
                out.write_f32::<LittleEndian>(v[i]).unwrap();
            }
        }
        Value::Vec4(v) => {
            out.write_u8(6).unwrap();
            for i in 0..4 {
                out.write_f32::<LittleEndian>(v[i]).unwrap();
            }
        }
        Value::Quat(v) => {
            out.write_u8(7).unwrap();
            out.write_f32::<LittleEndian>(v.i).unwrap();
            out.write_f32::<LittleEndian>(v.j).unwrap();
            out.write_f32::<LittleEndian>(v.k).unwrap();
            out.write_f32::<LittleEndian>(v.w).unwrap();
        }
        Value::String(v) => {
            out.write_u8(8).unwrap();
            write_string(out, v);
        }
        Value::AssetId(v) => {
            out.write_u8(9).unwrap();
            out.extend_from_slice(v.as_bytes());
        }
        Value::Blob(v) => {
            out.write_u8(10).unwrap();
            out.write_u32::<LittleEndian>(v.len() as u32).unwrap();
            out.extend_from_slice(v);
        }
        // Poses live only inside an evaluation tick and are never part of a
        // serialized surface.
        Value::Pose(_) => out.write_u8(0).unwrap(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::loader::{read_value, GraphLoader, NoAssets};
    use crate::graph::{ids, CustomNodeRegistry};
    use nalgebra::Vector3;
    use std::io::Cursor;
    use uuid::Uuid;

    #[test]
    fn test_value_round_trip() {
        let values = [
            Value::Null,
            Value::Bool(true),
            Value::Int(-5),
            Value::Float(2.5),
            Value::Vec3(Vector3::new(1.0, 2.0, 3.0)),
            Value::String("walk".to_string()),
            Value::AssetId(Uuid::new_v4()),
            Value::Blob(vec![1, 2, 3]),
        ];
        for value in values {
            let mut data = Vec::new();
            write_value(&mut data, &value);
            let mut stream = Cursor::new(data.as_slice());
            assert_eq!(read_value(&mut stream).unwrap(), value);
        }
    }

    #[test]
    fn test_surface_round_trip() {
        let mut surface = SurfaceBuilder::new();
        surface.add_parameter(GraphParameter {
            id: Uuid::new_v4(),
            name: "Speed".to_string(),
            value: Value::Float(1.0),
        });
        let play = surface.add_node(
            NodeSpec::new(1, ids::GROUP_ANIMATION, ids::ANIM_PLAY)
                .with_value(Value::AssetId(Uuid::nil()))
                .with_value(Value::Float(1.0))
                .with_value(Value::Bool(true))
                .with_value(Value::Float(0.0))
                .with_box(0),
        );
        surface.add_node(
            NodeSpec::new(2, ids::GROUP_ANIMATION, ids::ANIM_OUTPUT)
                .with_value(Value::Int(0))
                .with_connected_box(0, play, 0),
        );

        let graph = GraphLoader {
            assets: &NoAssets,
            custom_nodes: &CustomNodeRegistry::default(),
            base_skeleton: None,
            version: 1,
        }
        .load(&surface.build())
        .unwrap();

        assert_eq!(graph.parameters().len(), 1);
        assert_eq!(graph.root().nodes.len(), 2);
        // The output node became the root; the connection remapped to the
        // node index of the play node.
        assert_eq!(graph.root().root_node, Some(1));
        assert_eq!(graph.root().nodes[1].boxes[0].sources, vec![(0, 0)]);
        // The play node took the first bucket.
        assert_eq!(graph.root().nodes[0].bucket_index, 0);
        assert_eq!(graph.total_bucket_count(), 1);
    }
}
