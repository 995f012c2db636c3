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

//! Animation clip asset: per-bone transform channels, event tracks, nested
//! clips and root-motion extraction settings.

use crate::{
    curve::Curve,
    math::Transform,
    skeleton::SkeletonResource,
};
use bitflags::bitflags;
use fxhash::FxHashMap;
use nalgebra::{Quaternion, Vector3};
use std::sync::Arc;
use uuid::Uuid;

bitflags! {
    /// Which components of the root bone's animation are extracted as root
    /// motion instead of being applied to the skeletal pose.
    #[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
    pub struct RootMotionFlags: u8 {
        /// Extract horizontal translation.
        const POSITION_XZ = 0b001;
        /// Extract vertical translation.
        const POSITION_Y = 0b010;
        /// Extract rotation.
        const ROTATION = 0b100;
    }
}

/// Animated transform curves of a single bone. Curves left empty fall back
/// to the bind pose of the bone at sampling.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoneChannel {
    /// Name of the animated bone.
    pub bone: String,
    /// X/Y/Z translation curves.
    pub translation: [Curve; 3],
    /// X/Y/Z/W rotation quaternion component curves. The evaluated
    /// quaternion is normalized.
    pub rotation: [Curve; 4],
    /// X/Y/Z scale curves.
    pub scale: [Curve; 3],
}

impl BoneChannel {
    /// Creates an empty channel for the given bone.
    pub fn new<S: AsRef<str>>(bone: S) -> Self {
        Self {
            bone: bone.as_ref().to_string(),
            ..Default::default()
        }
    }

    /// Evaluates the channel at the given time. Components without any
    /// curve keys keep the values of `fallback` (usually the bind pose of
    /// the bone).
    pub fn evaluate(&self, time: f32, fallback: &Transform) -> Transform {
        let mut transform = *fallback;

        if self.translation.iter().any(|c| !c.is_empty()) {
            transform.translation = Vector3::new(
                self.translation[0].value_at(time),
                self.translation[1].value_at(time),
                self.translation[2].value_at(time),
            );
        }

        if self.rotation.iter().any(|c| !c.is_empty()) {
            let rotation = Quaternion::new(
                self.rotation[3].value_at(time),
                self.rotation[0].value_at(time),
                self.rotation[1].value_at(time),
                self.rotation[2].value_at(time),
            );
            let len = rotation.norm();
            transform.rotation = if len > f32::EPSILON {
                rotation / len
            } else {
                Quaternion::identity()
            };
        }

        if self.scale.iter().any(|c| !c.is_empty()) {
            transform.scale = Vector3::new(
                self.scale[0].value_at(time),
                self.scale[1].value_at(time),
                self.scale[2].value_at(time),
            );
        }

        transform
    }
}

/// A key frame on an event track. Zero duration produces a point event; a
/// positive duration produces a continuous event with begin/end
/// bracketing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventKey {
    /// Time of the event on the clip timeline, in seconds.
    pub time: f32,
    /// Duration of the event, in seconds. Zero for point events.
    pub duration: f32,
    /// Name of the event delivered to the host.
    pub name: String,
}

/// A named track of animation events.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventTrack {
    /// Name of the track.
    pub name: String,
    /// Keys of the track. Expected to be sorted by time.
    pub keys: Vec<EventKey>,
}

/// A clip overlaid onto a time range of its parent clip. Bones written by a
/// nested clip are skipped by later samples on the same level.
#[derive(Clone, Debug)]
pub struct NestedClip {
    /// The overlaid clip.
    pub clip: ClipResource,
    /// Start of the overlay window on the parent timeline, in seconds.
    pub time: f32,
    /// Length of the overlay window, in seconds.
    pub duration: f32,
    /// Playback speed scale of the nested clip.
    pub speed: f32,
    /// Start time offset inside the nested clip.
    pub start_time: f32,
    /// Whether the nested clip loops within its window.
    pub looped: bool,
    /// Disabled nested clips are skipped entirely.
    pub enabled: bool,
}

/// An animation clip: shared, immutable source data for sampling. Kept
/// behind an [`Arc`] so a clip stays alive as long as any graph node or
/// slot references it.
#[derive(Clone, Debug, Default)]
pub struct AnimationClip {
    /// Name of the clip, used in logs.
    pub name: String,
    /// Stable identifier of the clip, used by graph literals.
    pub id: Uuid,
    /// Length of the clip in seconds.
    pub length: f32,
    /// Per-bone transform channels.
    channels: Vec<BoneChannel>,
    channel_lookup: FxHashMap<String, usize>,
    /// Animation event tracks.
    pub events: Vec<EventTrack>,
    /// Clips overlaid onto time ranges of this clip.
    pub nested: Vec<NestedClip>,
    /// Root motion extraction mask. Empty flags disable extraction.
    pub root_motion: RootMotionFlags,
    /// Name of the bone that drives root motion. The first bone of the
    /// skeleton is used when not set.
    pub root_node: Option<String>,
    /// The skeleton the clip was authored on. When it differs from the
    /// skeleton of the graph that samples the clip, the sampled pose is
    /// retargeted.
    pub skeleton: Option<SkeletonResource>,
}

/// Shared handle to an animation clip.
pub type ClipResource = Arc<AnimationClip>;

impl AnimationClip {
    /// Creates an empty clip with the given name and length.
    pub fn new<S: AsRef<str>>(name: S, length: f32) -> Self {
        Self {
            name: name.as_ref().to_string(),
            id: Uuid::new_v4(),
            length,
            ..Default::default()
        }
    }

    /// Adds a bone channel to the clip.
    pub fn add_channel(&mut self, channel: BoneChannel) -> &mut Self {
        self.channel_lookup
            .insert(channel.bone.clone(), self.channels.len());
        self.channels.push(channel);
        self
    }

    /// Returns the channels of the clip.
    #[inline]
    pub fn channels(&self) -> &[BoneChannel] {
        &self.channels
    }

    /// Returns the index of the channel animating the given bone.
    #[inline]
    pub fn channel_for(&self, bone: &str) -> Option<usize> {
        self.channel_lookup.get(bone).copied()
    }

    /// Returns `true` if the clip has any event keys.
    pub fn has_events(&self) -> bool {
        self.events.iter().any(|track| !track.keys.is_empty())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::curve::{CurveKey, CurveKeyKind};

    #[test]
    fn test_channel_fallback_to_bind_pose() {
        let channel = BoneChannel::new("spine");
        let mut bind = Transform::IDENTITY;
        bind.translation.y = 2.0;
        assert_eq!(channel.evaluate(0.5, &bind), bind);
    }

    #[test]
    fn test_channel_translation_evaluation() {
        let mut channel = BoneChannel::new("root");
        channel.translation[0] = Curve::from(vec![
            CurveKey::new(0.0, 0.0, CurveKeyKind::Linear),
            CurveKey::new(1.0, 4.0, CurveKeyKind::Linear),
        ]);
        let sampled = channel.evaluate(0.5, &Transform::IDENTITY);
        assert_eq!(sampled.translation.x, 2.0);
        // Untouched components keep the fallback.
        assert_eq!(sampled.translation.y, 0.0);
        assert_eq!(sampled.scale.x, 1.0);
    }

    #[test]
    fn test_channel_rotation_is_normalized() {
        let mut channel = BoneChannel::new("root");
        for (i, value) in [2.0, 0.0, 0.0, 2.0].iter().enumerate() {
            channel.rotation[i] = Curve::from(vec![CurveKey::new(
                0.0,
                *value,
                CurveKeyKind::Constant,
            )]);
        }
        let sampled = channel.evaluate(0.0, &Transform::IDENTITY);
        assert!((sampled.rotation.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_channel_lookup() {
        let mut clip = AnimationClip::new("walk", 1.0);
        clip.add_channel(BoneChannel::new("root"))
            .add_channel(BoneChannel::new("spine"));
        assert_eq!(clip.channel_for("spine"), Some(1));
        assert_eq!(clip.channel_for("tail"), None);
    }
}
