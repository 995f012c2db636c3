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

//! A dynamically typed value flowing through graph connections.

use nalgebra::{Quaternion, Vector2, Vector3, Vector4};
use strum_macros::{AsRefStr, VariantNames};
use uuid::Uuid;

/// An index of a pose buffer inside the per-tick pose cache of the
/// evaluation context. Pose values never outlive the tick that produced
/// them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PoseRef(pub(crate) usize);

/// A value produced by a graph box. Graph literals and evaluation results
/// share the same representation.
///
/// Casts are forgiving: a mismatched kind converts when a sensible numeric
/// promotion exists and falls back to the default value of the requested
/// kind otherwise, so a malformed graph degrades instead of failing.
#[derive(Clone, Debug, Default, PartialEq, AsRefStr, VariantNames)]
pub enum Value {
    /// No value. Pose inputs treat it as the bind pose, scalar inputs as
    /// zero.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i32),
    /// Single-precision real value.
    Float(f32),
    /// Two-component vector.
    Vec2(Vector2<f32>),
    /// Three-component vector.
    Vec3(Vector3<f32>),
    /// Four-component vector.
    Vec4(Vector4<f32>),
    /// Rotation quaternion.
    Quat(Quaternion<f32>),
    /// String value (slot names, bone names, parameter names).
    String(String),
    /// A reference to an external asset (animation clip, function graph).
    AssetId(Uuid),
    /// Opaque binary payload. Used for nested graph surfaces during loading
    /// and released afterwards.
    Blob(Vec<u8>),
    /// An evaluated skeletal pose, alive for the current tick only.
    Pose(PoseRef),
}

impl Value {
    /// Converts the value into a boolean.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            _ => false,
        }
    }

    /// Converts the value into an integer.
    pub fn as_int(&self) -> i32 {
        match self {
            Value::Bool(v) => *v as i32,
            Value::Int(v) => *v,
            Value::Float(v) => *v as i32,
            _ => 0,
        }
    }

    /// Converts the value into a real number. Vectors yield their first
    /// component.
    pub fn as_float(&self) -> f32 {
        match self {
            Value::Bool(v) => *v as i32 as f32,
            Value::Int(v) => *v as f32,
            Value::Float(v) => *v,
            Value::Vec2(v) => v.x,
            Value::Vec3(v) => v.x,
            Value::Vec4(v) => v.x,
            _ => 0.0,
        }
    }

    /// Converts the value into a two-component vector.
    pub fn as_vec2(&self) -> Vector2<f32> {
        match self {
            Value::Vec2(v) => *v,
            Value::Vec3(v) => v.xy(),
            Value::Vec4(v) => v.xy(),
            Value::Float(v) => Vector2::new(*v, *v),
            Value::Int(v) => Vector2::new(*v as f32, *v as f32),
            _ => Vector2::zeros(),
        }
    }

    /// Converts the value into a three-component vector.
    pub fn as_vec3(&self) -> Vector3<f32> {
        match self {
            Value::Vec2(v) => Vector3::new(v.x, v.y, 0.0),
            Value::Vec3(v) => *v,
            Value::Vec4(v) => v.xyz(),
            Value::Float(v) => Vector3::new(*v, *v, *v),
            Value::Int(v) => Vector3::new(*v as f32, *v as f32, *v as f32),
            _ => Vector3::zeros(),
        }
    }

    /// Converts the value into a four-component vector.
    pub fn as_vec4(&self) -> Vector4<f32> {
        match self {
            Value::Vec2(v) => Vector4::new(v.x, v.y, 0.0, 0.0),
            Value::Vec3(v) => Vector4::new(v.x, v.y, v.z, 0.0),
            Value::Vec4(v) => *v,
            Value::Float(v) => Vector4::new(*v, *v, *v, *v),
            Value::Int(v) => Vector4::new(*v as f32, *v as f32, *v as f32, *v as f32),
            _ => Vector4::zeros(),
        }
    }

    /// Converts the value into a rotation quaternion.
    pub fn as_quat(&self) -> Quaternion<f32> {
        match self {
            Value::Quat(v) => *v,
            Value::Vec4(v) => Quaternion::new(v.w, v.x, v.y, v.z),
            _ => Quaternion::identity(),
        }
    }

    /// Returns the string payload, or an empty string for other kinds.
    pub fn as_str(&self) -> &str {
        match self {
            Value::String(v) => v,
            _ => "",
        }
    }

    /// Returns the asset identifier, if the value holds one.
    pub fn as_asset_id(&self) -> Option<Uuid> {
        match self {
            Value::AssetId(id) if !id.is_nil() => Some(*id),
            _ => None,
        }
    }

    /// Returns the pose reference, if the value holds one.
    pub fn as_pose(&self) -> Option<PoseRef> {
        match self {
            Value::Pose(pose) => Some(*pose),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_numeric_promotions() {
        assert_eq!(Value::Int(3).as_float(), 3.0);
        assert_eq!(Value::Float(2.7).as_int(), 2);
        assert!(Value::Float(0.1).as_bool());
        assert!(!Value::Null.as_bool());
        assert_eq!(Value::Bool(true).as_float(), 1.0);
    }

    #[test]
    fn test_vector_truncation_and_widening() {
        let v = Value::Vec4(Vector4::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(v.as_vec2(), Vector2::new(1.0, 2.0));
        assert_eq!(v.as_vec3(), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(
            Value::Vec2(Vector2::new(1.0, 2.0)).as_vec4(),
            Vector4::new(1.0, 2.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_mismatched_kinds_use_defaults() {
        assert_eq!(Value::String("x".to_string()).as_float(), 0.0);
        assert_eq!(Value::Null.as_vec3(), Vector3::zeros());
        assert_eq!(Value::Null.as_quat(), Quaternion::identity());
        assert!(Value::Null.as_pose().is_none());
        assert!(Value::AssetId(Uuid::nil()).as_asset_id().is_none());
    }
}
