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

//! Parametric curves made of key frames. Clip channels store one curve per
//! animated scalar component.

use crate::math::{cubicf, lerpf};
use std::cmp::Ordering;

fn stepf(p0: f32, p1: f32, t: f32) -> f32 {
    if t.eq(&1.0) {
        p1
    } else {
        p0
    }
}

/// Interpolation mode of a curve key.
#[derive(Default, Clone, Debug, PartialEq)]
pub enum CurveKeyKind {
    /// Produces the left value of two neighbouring keys, creating step-like
    /// behaviour.
    #[default]
    Constant,
    /// Straight interpolation between two neighbouring keys.
    Linear,
    /// Cubic Hermite spline interpolation.
    Cubic {
        /// A `tan(angle)` of the left tangent.
        left_tangent: f32,
        /// A `tan(angle)` of the right tangent.
        right_tangent: f32,
    },
}

/// A single key frame of a curve: location on the timeline, value and
/// interpolation mode toward the next key.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct CurveKey {
    /// Position of the key on the timeline, in seconds.
    pub location: f32,
    /// Value of the key.
    pub value: f32,
    /// Interpolation mode.
    pub kind: CurveKeyKind,
}

impl CurveKey {
    /// Creates a new key.
    #[inline]
    pub fn new(location: f32, value: f32, kind: CurveKeyKind) -> Self {
        Self {
            location,
            value,
            kind,
        }
    }

    #[inline]
    fn interpolate(&self, other: &Self, t: f32) -> f32 {
        match (&self.kind, &other.kind) {
            (CurveKeyKind::Constant, _) => stepf(self.value, other.value, t),
            (CurveKeyKind::Linear, _) => lerpf(self.value, other.value, t),
            (
                CurveKeyKind::Cubic {
                    right_tangent: left_tangent,
                    ..
                },
                CurveKeyKind::Constant | CurveKeyKind::Linear,
            ) => cubicf(self.value, other.value, t, *left_tangent, 0.0),
            (
                CurveKeyKind::Cubic {
                    right_tangent: left_tangent,
                    ..
                },
                CurveKeyKind::Cubic {
                    left_tangent: right_tangent,
                    ..
                },
            ) => cubicf(self.value, other.value, t, *left_tangent, *right_tangent),
        }
    }
}

/// A parametric curve: an ordered set of key frames with a binary-searched
/// fetch. An empty curve evaluates to zero; locations outside of the key
/// range are clamped to the first/last key value.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Curve {
    keys: Vec<CurveKey>,
}

fn sort_keys(keys: &mut [CurveKey]) {
    keys.sort_by(|a, b| {
        a.location
            .partial_cmp(&b.location)
            .unwrap_or(Ordering::Equal)
    });
}

impl From<Vec<CurveKey>> for Curve {
    fn from(mut keys: Vec<CurveKey>) -> Self {
        sort_keys(&mut keys);
        Self { keys }
    }
}

impl Curve {
    /// Returns `true` if the curve has no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns a reference to the keys of the curve.
    #[inline]
    pub fn keys(&self) -> &[CurveKey] {
        &self.keys
    }

    /// Adds a new key keeping the keys sorted by location.
    #[inline]
    pub fn add_key(&mut self, new_key: CurveKey) {
        let pos = self.keys.partition_point(|k| k.location < new_key.location);
        self.keys.insert(pos, new_key);
    }

    /// Returns the location of the right-most key, or zero for an empty
    /// curve.
    #[inline]
    pub fn max_location(&self) -> f32 {
        self.keys.last().map(|k| k.location).unwrap_or_default()
    }

    /// Fetches the curve value at the given location.
    #[inline]
    pub fn value_at(&self, location: f32) -> f32 {
        if let (Some(first), Some(last)) = (self.keys.first(), self.keys.last()) {
            if location <= first.location {
                first.value
            } else if location >= last.location {
                last.value
            } else {
                let pos = self.keys.partition_point(|k| k.location < location);
                let left = self.keys.get(pos.saturating_sub(1)).unwrap();
                let right = self.keys.get(pos).unwrap();
                let t = (location - left.location) / (right.location - left.location);
                left.interpolate(right, t)
            }
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_empty_curve() {
        assert_eq!(Curve::default().value_at(10.0), 0.0);
    }

    #[test]
    fn test_linear_fetch() {
        let curve = Curve::from(vec![
            CurveKey::new(0.0, 0.0, CurveKeyKind::Linear),
            CurveKey::new(1.0, 2.0, CurveKeyKind::Linear),
        ]);
        assert_eq!(curve.value_at(-1.0), 0.0);
        assert_eq!(curve.value_at(0.5), 1.0);
        assert_eq!(curve.value_at(2.0), 2.0);
        assert_eq!(curve.max_location(), 1.0);
    }

    #[test]
    fn test_constant_fetch() {
        let curve = Curve::from(vec![
            CurveKey::new(0.0, 1.0, CurveKeyKind::Constant),
            CurveKey::new(1.0, 5.0, CurveKeyKind::Constant),
        ]);
        assert_eq!(curve.value_at(0.999), 1.0);
        assert_eq!(curve.value_at(1.0), 5.0);
    }

    #[test]
    fn test_unsorted_keys_are_sorted_on_construction() {
        let curve = Curve::from(vec![
            CurveKey::new(1.0, 2.0, CurveKeyKind::Linear),
            CurveKey::new(0.0, 0.0, CurveKeyKind::Linear),
        ]);
        assert_eq!(curve.value_at(0.25), 0.5);
    }
}
