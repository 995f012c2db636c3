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

//! Alpha blending curves used by crossfades and state transitions.

use crate::math::saturate;
use std::f32::consts::{FRAC_PI_2, PI};
use strum_macros::{AsRefStr, EnumString, VariantNames};

/// Shape of the blending curve that maps a linear `[0; 1]` transition
/// progress into the actual blend weight. The output is saturated to
/// `[0; 1]`.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, AsRefStr, EnumString, VariantNames)]
#[repr(u8)]
pub enum AlphaBlendMode {
    /// Linear interpolation.
    #[default]
    Linear = 0,
    /// Cubic-in interpolation.
    Cubic,
    /// Hermite-Cubic (smooth step) interpolation.
    HermiteCubic,
    /// Sinusoidal interpolation.
    Sinusoidal,
    /// Quadratic in-out interpolation.
    QuadraticInOut,
    /// Cubic in-out interpolation.
    CubicInOut,
    /// Quartic in-out interpolation.
    QuarticInOut,
    /// Quintic in-out interpolation.
    QuinticInOut,
    /// Circular-in interpolation.
    CircularIn,
    /// Circular-out interpolation.
    CircularOut,
    /// Circular in-out interpolation.
    CircularInOut,
    /// Exponential-in interpolation.
    ExpIn,
    /// Exponential-out interpolation.
    ExpOut,
    /// Exponential in-out interpolation.
    ExpInOut,
}

impl AlphaBlendMode {
    /// Restores the blend mode from its serialized index.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Linear),
            1 => Some(Self::Cubic),
            2 => Some(Self::HermiteCubic),
            3 => Some(Self::Sinusoidal),
            4 => Some(Self::QuadraticInOut),
            5 => Some(Self::CubicInOut),
            6 => Some(Self::QuarticInOut),
            7 => Some(Self::QuinticInOut),
            8 => Some(Self::CircularIn),
            9 => Some(Self::CircularOut),
            10 => Some(Self::CircularInOut),
            11 => Some(Self::ExpIn),
            12 => Some(Self::ExpOut),
            13 => Some(Self::ExpInOut),
            _ => None,
        }
    }

    /// Converts a linear `[0; 1]` alpha into the output alpha described by
    /// the curve. The result is saturated to `[0; 1]`.
    pub fn process(self, alpha: f32) -> f32 {
        let t = alpha;
        let alpha = match self {
            Self::Linear => t,
            // Hermite spline with zero tangents at both ends.
            Self::Cubic | Self::HermiteCubic => {
                let t = saturate(t);
                t * t * (3.0 - 2.0 * t)
            }
            Self::Sinusoidal => ((t * PI - FRAC_PI_2).sin() + 1.0) / 2.0,
            Self::QuadraticInOut => ease_in_out(t, 2),
            Self::CubicInOut => ease_in_out(t, 3),
            Self::QuarticInOut => ease_in_out(t, 4),
            Self::QuinticInOut => ease_in_out(t, 5),
            Self::CircularIn => {
                let t = saturate(t);
                1.0 - (1.0 - t * t).sqrt()
            }
            Self::CircularOut => {
                let t = saturate(t) - 1.0;
                (1.0 - t * t).sqrt()
            }
            Self::CircularInOut => {
                let t = saturate(t) * 2.0;
                if t < 1.0 {
                    -0.5 * ((1.0 - t * t).sqrt() - 1.0)
                } else {
                    let t = t - 2.0;
                    0.5 * ((1.0 - t * t).sqrt() + 1.0)
                }
            }
            Self::ExpIn => {
                if t == 0.0 {
                    0.0
                } else {
                    2.0f32.powf(10.0 * (t - 1.0))
                }
            }
            Self::ExpOut => {
                if t >= 1.0 {
                    1.0
                } else {
                    1.0 - 2.0f32.powf(-10.0 * t)
                }
            }
            Self::ExpInOut => {
                if t < 0.5 {
                    0.5 * Self::ExpIn.process(t * 2.0)
                } else {
                    0.5 + 0.5 * Self::ExpOut.process(t * 2.0 - 1.0)
                }
            }
        };
        saturate(alpha)
    }
}

fn ease_in_out(t: f32, exp: i32) -> f32 {
    let t = saturate(t) * 2.0;
    if t < 1.0 {
        0.5 * t.powi(exp)
    } else {
        1.0 - 0.5 * (2.0 - t).powi(exp)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use strum::VariantNames;

    fn all_modes() -> Vec<AlphaBlendMode> {
        (0..AlphaBlendMode::VARIANTS.len() as u8)
            .map(|i| AlphaBlendMode::from_id(i).unwrap())
            .collect()
    }

    #[test]
    fn test_endpoints_are_fixed() {
        for mode in all_modes() {
            assert!(mode.process(0.0).abs() < 1e-5, "{mode:?} at 0");
            assert!((mode.process(1.0) - 1.0).abs() < 1e-5, "{mode:?} at 1");
        }
    }

    #[test]
    fn test_output_is_saturated() {
        for mode in all_modes() {
            for i in -4..20 {
                let alpha = mode.process(i as f32 * 0.125);
                assert!((0.0..=1.0).contains(&alpha), "{mode:?} at {i}");
            }
        }
    }

    #[test]
    fn test_linear_is_identity_inside_range() {
        assert_eq!(AlphaBlendMode::Linear.process(0.25), 0.25);
        assert_eq!(AlphaBlendMode::Linear.process(0.75), 0.75);
    }

    #[test]
    fn test_in_out_symmetry() {
        for mode in [
            AlphaBlendMode::QuadraticInOut,
            AlphaBlendMode::CubicInOut,
            AlphaBlendMode::QuarticInOut,
            AlphaBlendMode::QuinticInOut,
            AlphaBlendMode::CircularInOut,
            AlphaBlendMode::Sinusoidal,
        ] {
            assert!((mode.process(0.5) - 0.5).abs() < 1e-5, "{mode:?}");
        }
    }
}
