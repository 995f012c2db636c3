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

//! Math utilities for pose evaluation: local-space transforms, scalar
//! interpolators and a few 2D helpers used by blend spaces.

use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector2, Vector3, Vector4};

/// A local-space transformation of a single skeleton bone: translation,
/// rotation and scale.
///
/// The rotation is stored as a plain (potentially non-unit) quaternion,
/// because weighted and additive blending accumulate rotations as raw
/// quaternion sums which are renormalized in a single pass once blending
/// of a pose is finished.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform {
    /// Translation of the bone relative to its parent.
    pub translation: Vector3<f32>,
    /// Rotation of the bone relative to its parent. Not guaranteed to be of
    /// unit length in the middle of blending.
    pub rotation: Quaternion<f32>,
    /// Scale of the bone relative to its parent.
    pub scale: Vector3<f32>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// Identity transformation that does not move, rotate or scale a bone.
    pub const IDENTITY: Transform = Transform {
        translation: Vector3::new(0.0, 0.0, 0.0),
        rotation: Quaternion {
            coords: Vector4::new(0.0, 0.0, 0.0, 1.0),
        },
        scale: Vector3::new(1.0, 1.0, 1.0),
    };

    /// Creates a new transform from its components.
    #[inline]
    pub fn new(
        translation: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
        scale: Vector3<f32>,
    ) -> Self {
        Self {
            translation,
            rotation: rotation.into_inner(),
            scale,
        }
    }

    /// Returns the rotation as a unit quaternion, normalizing it if needed.
    #[inline]
    pub fn unit_rotation(&self) -> UnitQuaternion<f32> {
        UnitQuaternion::new_normalize(self.rotation)
    }

    /// Normalizes the rotation part in place.
    #[inline]
    pub fn normalize_rotation(&mut self) {
        let len = self.rotation.norm();
        if len > f32::EPSILON {
            self.rotation /= len;
        } else {
            self.rotation = Quaternion::identity();
        }
    }

    /// Linearly interpolates between two transforms. Rotation uses
    /// normalized linear interpolation which is enough for the small angular
    /// differences occurring between animation poses.
    #[inline]
    pub fn lerp(&self, other: &Transform, t: f32) -> Transform {
        Transform {
            translation: self.translation.lerp(&other.translation, t),
            rotation: nlerp(self.rotation, &other.rotation, t),
            scale: self.scale.lerp(&other.scale, t),
        }
    }

    /// Composes a homogeneous matrix from the transform.
    #[inline]
    pub fn matrix(&self) -> Matrix4<f32> {
        Matrix4::new_translation(&self.translation)
            * self.unit_rotation().to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&self.scale)
    }

    /// Transforms a point from the local space of this transform into the
    /// space of its parent.
    #[inline]
    pub fn local_to_world(&self, point: Vector3<f32>) -> Vector3<f32> {
        self.unit_rotation()
            .transform_vector(&point.component_mul(&self.scale))
            + self.translation
    }

    /// Combines `self` (parent) with a child transform, producing the child
    /// transform expressed in the parent's parent space.
    #[inline]
    pub fn combine(&self, child: &Transform) -> Transform {
        Transform {
            translation: self.local_to_world(child.translation),
            rotation: (self.unit_rotation() * child.unit_rotation()).into_inner(),
            scale: self.scale.component_mul(&child.scale),
        }
    }

    /// Decomposes a homogeneous matrix into translation, rotation and
    /// scale. Shear is not representable and gets folded into the scale.
    pub fn from_matrix(matrix: &Matrix4<f32>) -> Transform {
        let translation = matrix.fixed_view::<3, 1>(0, 3).into_owned();
        let mut basis = matrix.fixed_view::<3, 3>(0, 0).into_owned();
        let scale = Vector3::new(
            basis.column(0).norm(),
            basis.column(1).norm(),
            basis.column(2).norm(),
        );
        for (column, s) in scale.iter().enumerate() {
            if *s > f32::EPSILON {
                let normalized = basis.column(column) / *s;
                basis.set_column(column, &normalized);
            }
        }
        let rotation = UnitQuaternion::from_rotation_matrix(
            &nalgebra::Rotation3::from_matrix_unchecked(basis),
        );
        Transform {
            translation,
            rotation: rotation.into_inner(),
            scale,
        }
    }

    /// Expresses a transform given in this transform's parent space in the
    /// local space of this transform. Inverse of [`Self::combine`].
    #[inline]
    pub fn world_to_local(&self, world: &Transform) -> Transform {
        let inv_rotation = self.unit_rotation().inverse();
        let inv_scale = self.scale.map(|s| if s.abs() > f32::EPSILON { 1.0 / s } else { 0.0 });
        Transform {
            translation: inv_rotation
                .transform_vector(&(world.translation - self.translation))
                .component_mul(&inv_scale),
            rotation: (inv_rotation * world.unit_rotation()).into_inner(),
            scale: world.scale.component_mul(&inv_scale),
        }
    }

    /// Returns `true` if the transform is close enough to identity.
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.translation.norm_squared() <= f32::EPSILON
            && self.scale.metric_distance(&Vector3::new(1.0, 1.0, 1.0)) <= f32::EPSILON
            && self
                .unit_rotation()
                .angle_to(&UnitQuaternion::identity())
                .abs()
                <= f32::EPSILON
    }
}

/// Normalized linear interpolation of quaternions, taking the shortest arc.
#[inline]
pub fn nlerp(mut a: Quaternion<f32>, b: &Quaternion<f32>, t: f32) -> Quaternion<f32> {
    let mut b = *b;
    if a.dot(&b) < 0.0 {
        b = -b;
    }
    a = a.lerp(&b, t);
    let len = a.norm();
    if len > f32::EPSILON {
        a / len
    } else {
        Quaternion::identity()
    }
}

/// Wraps a number into the `[min_limit, max_limit]` range.
#[inline]
pub fn wrapf(mut n: f32, mut min_limit: f32, mut max_limit: f32) -> f32 {
    if n >= min_limit && n <= max_limit {
        return n;
    }

    if max_limit == 0.0 && min_limit == 0.0 {
        return 0.0;
    }

    max_limit -= min_limit;

    let offset = min_limit;
    min_limit = 0.0;
    n -= offset;

    let num_of_max = (n / max_limit).abs().floor();

    if n >= max_limit {
        n -= num_of_max * max_limit;
    } else if n < min_limit {
        n += (num_of_max + 1.0) * max_limit;
    }

    n + offset
}

/// Linear interpolation between two numbers.
#[inline]
pub fn lerpf(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

// https://en.wikipedia.org/wiki/Cubic_Hermite_spline
#[inline]
pub fn cubicf(p0: f32, p1: f32, t: f32, m0: f32, m1: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;
    let scale = (p1 - p0).abs();

    (2.0 * t3 - 3.0 * t2 + 1.0) * p0
        + (t3 - 2.0 * t2 + t) * m0 * scale
        + (-2.0 * t3 + 3.0 * t2) * p1
        + (t3 - t2) * m1 * scale
}

/// Clamps a number into the `[0, 1]` range.
#[inline]
pub fn saturate(t: f32) -> f32 {
    t.clamp(0.0, 1.0)
}

/// A triangle of a 2D blend space given as three vertex indices.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TriangleDefinition(pub [u32; 3]);

impl TriangleDefinition {
    /// Returns vertex indices of the triangle.
    #[inline]
    pub fn indices(&self) -> &[u32; 3] {
        &self.0
    }
}

/// Computes barycentric coordinates of `p` in the `abc` triangle.
#[inline]
pub fn get_barycentric_coords_2d(
    p: Vector2<f32>,
    a: Vector2<f32>,
    b: Vector2<f32>,
    c: Vector2<f32>,
) -> (f32, f32, f32) {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;

    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    let d20 = v2.dot(&v0);
    let d21 = v2.dot(&v1);
    let inv_denom = 1.0 / (d00 * d11 - d01.powi(2));

    let v = (d11 * d20 - d01 * d21) * inv_denom;
    let w = (d00 * d21 - d01 * d20) * inv_denom;
    let u = 1.0 - v - w;

    (u, v, w)
}

/// Returns `true` if barycentric coordinates belong to a point inside of a
/// triangle.
#[inline]
pub fn barycentric_is_inside(bary: (f32, f32, f32)) -> bool {
    (bary.0 >= 0.0) && (bary.1 >= 0.0) && (bary.0 + bary.1 < 1.0)
}

/// Projects `p` onto the `ab` segment and returns the closest point of the
/// segment together with the normalized position of the projection on it.
#[inline]
pub fn closest_point_on_segment(
    p: Vector2<f32>,
    a: Vector2<f32>,
    b: Vector2<f32>,
) -> (Vector2<f32>, f32) {
    let edge = b - a;
    let sqr_len = edge.dot(&edge);
    if sqr_len <= f32::EPSILON {
        return (a, 0.0);
    }
    let t = ((p - a).dot(&edge) / sqr_len).clamp(0.0, 1.0);
    (a + edge.scale(t), t)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrapf() {
        assert_eq!(wrapf(1.5, 0.0, 1.0), 0.5);
        assert_eq!(wrapf(0.5, 0.0, 1.0), 0.5);
        assert_eq!(wrapf(-0.25, 0.0, 1.0), 0.75);
        assert_eq!(wrapf(3.0, 0.0, 2.0), 1.0);
    }

    #[test]
    fn test_transform_lerp_rotation_shortest_arc() {
        let a = Transform::IDENTITY;
        let mut b = Transform::IDENTITY;
        b.rotation = -UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.5).into_inner();

        let mid = a.lerp(&b, 0.5);
        let angle = mid
            .unit_rotation()
            .angle_to(&UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.25));
        assert!(angle < 1e-5);
    }

    #[test]
    fn test_barycentric_inside() {
        let bary = get_barycentric_coords_2d(
            Vector2::new(0.25, 0.25),
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(0.0, 1.0),
        );
        assert!(barycentric_is_inside(bary));
        assert!((bary.0 + bary.1 + bary.2 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_closest_point_on_segment() {
        let (p, t) = closest_point_on_segment(
            Vector2::new(0.5, 1.0),
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
        );
        assert_eq!(p, Vector2::new(0.5, 0.0));
        assert_eq!(t, 0.5);
    }
}
