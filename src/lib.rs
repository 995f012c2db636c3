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

//! Animation graph evaluation runtime for skeletal characters.
//!
//! A graph definition ([`graph::AnimGraph`]) describes a directed network
//! of animation operators: sampled clips, 1D/2D blend spaces, crossfading
//! pose selectors, hierarchical state machines, slot players and reusable
//! function graphs. The definition is immutable after loading and shared by
//! any number of characters; each character owns an
//! [`instance::AnimGraphInstance`] with its parameter overrides and
//! per-node playback state.
//!
//! Every frame, [`evaluate::AnimGraphExecutor::update`] pulls the graph's
//! root output box, memoizing box values so an operator wired into several
//! consumers runs once, and produces:
//!
//! - a final pose: one local-space matrix per bone of the target skeleton;
//! - a root motion delta to drive the character's world transform;
//! - animation events fired by the traversed clips.
//!
//! Evaluation never fails: missing assets, unresolved bones and malformed
//! sub-graphs degrade to the bind pose or pass their input through, with a
//! warning in the log.
//!
//! # Example
//!
//! ```rust
//! use animgraph::{
//!     evaluate::{AnimGraphExecutor, Context},
//!     graph::{ids, loader::{GraphLoader, NoAssets}, writer::{NodeSpec, SurfaceBuilder},
//!         CustomNodeRegistry},
//!     instance::AnimGraphInstance,
//!     value::Value,
//! };
//! use std::sync::Arc;
//!
//! // A minimal surface: an output node fed by nothing, which resolves to
//! // the bind pose of the skeleton.
//! let mut surface = SurfaceBuilder::new();
//! surface.add_node(
//!     NodeSpec::new(1, ids::GROUP_ANIMATION, ids::ANIM_OUTPUT)
//!         .with_value(Value::Int(0))
//!         .with_box(0),
//! );
//!
//! let graph = GraphLoader {
//!     assets: &NoAssets,
//!     custom_nodes: &CustomNodeRegistry::default(),
//!     base_skeleton: None,
//!     version: 1,
//! }
//! .load(&surface.build())
//! .unwrap();
//!
//! let graph = Arc::new(graph);
//! let executor = AnimGraphExecutor::new(graph.clone());
//! let mut instance = AnimGraphInstance::new(&graph);
//! let mut context = Context::new();
//!
//! // Without a base skeleton the update is a no-op; with one, this is the
//! // per-frame entry point.
//! executor.update(&mut instance, &mut context, 1.0 / 60.0);
//! ```

#![warn(missing_docs)]

pub mod alpha;
pub mod clip;
pub mod curve;
pub mod evaluate;
pub mod graph;
pub mod instance;
pub mod math;
pub mod pose;
pub mod skeleton;
pub mod value;

pub use alpha::AlphaBlendMode;
pub use clip::{AnimationClip, BoneChannel, ClipResource, EventKey, EventTrack, RootMotionFlags};
pub use evaluate::{AnimGraphExecutor, Context, RootMotionExtraction};
pub use graph::{
    loader::{AssetProvider, GraphLoadError, GraphLoader},
    AnimGraph, AnimGraphResource, CustomNode, CustomNodeContext, CustomNodeRegistry,
};
pub use instance::{AnimEvent, AnimEventKind, AnimGraphInstance, AnimGraphSlot};
pub use math::Transform;
pub use pose::ModelPose;
pub use skeleton::{Skeleton, SkeletonMapping, SkeletonMask, SkeletonNode, SkeletonResource};
pub use value::Value;
