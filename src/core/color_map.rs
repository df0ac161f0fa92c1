use std::sync::OnceLock;

use image::Rgb;
use serde::{Deserialize, Serialize};

/// Color of points whose orbit never exceeded the escape threshold.
pub const INTERIOR_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

pub const ESCAPED_SATURATION: f64 = 1.0;
pub const ESCAPED_LIGHTNESS: f64 = 0.5;
/// Lightness used for pixels inside an active selection rectangle.
pub const HIGHLIGHT_LIGHTNESS: f64 = 0.75;

pub trait ColorMapper {
    fn color_for(&self, magnitude_squared: f64, iteration_count: u32, highlighted: bool)
        -> Rgb<u8>;
}

/**
 * Flat-shaded escape-time coloring: bounded orbits are drawn with the interior color,
 * escaped orbits with a hue derived from `(iteration_count / iter_hue_adjust) * |z|^2`.
 * The product is read as an angle in radians and wrapped onto the hue wheel.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HueRampColorMap {
    pub iter_hue_adjust: f64,
    pub threshold: f64,
}

impl HueRampColorMap {
    pub fn new(iter_hue_adjust: f64, threshold: f64) -> HueRampColorMap {
        HueRampColorMap {
            iter_hue_adjust,
            threshold,
        }
    }

    /// Hue on [0, 1) for an escaped orbit.
    pub fn hue(&self, magnitude_squared: f64, iteration_count: u32) -> f64 {
        let angle = (iteration_count as f64 / self.iter_hue_adjust) * magnitude_squared;
        let hue = (angle / std::f64::consts::TAU).rem_euclid(1.0);
        if hue.is_finite() {
            hue
        } else {
            0.0
        }
    }
}

impl ColorMapper for HueRampColorMap {
    fn color_for(
        &self,
        magnitude_squared: f64,
        iteration_count: u32,
        highlighted: bool,
    ) -> Rgb<u8> {
        if magnitude_squared <= self.threshold {
            return INTERIOR_COLOR;
        }
        let lightness = if highlighted {
            HIGHLIGHT_LIGHTNESS
        } else {
            ESCAPED_LIGHTNESS
        };
        let [r, g, b] = hsl_to_rgb(
            self.hue(magnitude_squared, iteration_count),
            ESCAPED_SATURATION,
            lightness,
        );
        Rgb([unit_to_byte(r), unit_to_byte(g), unit_to_byte(b)])
    }
}

/// Standard piecewise HSL interpolation, breakpoints at 1/6, 1/2 and 2/3 of the wheel.
fn hue_to_channel(p: f64, q: f64, hue: f64) -> f64 {
    let t = hue.rem_euclid(1.0);
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

/**
 * Converts HSL (all components on [0, 1]) to RGB components on [0, 1].
 */
pub fn hsl_to_rgb(hue: f64, saturation: f64, lightness: f64) -> [f64; 3] {
    if saturation <= 0.0 {
        return [lightness, lightness, lightness];
    }
    let q = if lightness < 0.5 {
        lightness * (1.0 + saturation)
    } else {
        lightness + saturation - lightness * saturation
    };
    let p = 2.0 * lightness - q;
    [
        hue_to_channel(p, q, hue + 1.0 / 3.0),
        hue_to_channel(p, q, hue),
        hue_to_channel(p, q, hue - 1.0 / 3.0),
    ]
}

pub fn unit_to_byte(value: f64) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Convert an sRGB component on [0,1] to linear light.
pub fn srgb_to_linear(c: f64) -> f64 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Convert a linear-light component on [0,1] back to sRGB.
pub fn linear_to_srgb(c: f64) -> f64 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn srgb_decode_table() -> &'static [f64; 256] {
    static TABLE: OnceLock<[f64; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0.0; 256];
        for (index, entry) in table.iter_mut().enumerate() {
            *entry = srgb_to_linear(index as f64 / 255.0);
        }
        table
    })
}

/// How supersamples of one pixel are averaged.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccumulationMode {
    /// Average in linear light, then re-encode. Avoids the darkening bias of
    /// averaging gamma-encoded values.
    #[default]
    LinearLight,
    /// Average the gamma-encoded bytes directly.
    Gamma,
}

/**
 * Running sum of the samples taken for a single pixel.
 */
#[derive(Debug, Clone)]
pub struct SampleAccumulator {
    mode: AccumulationMode,
    sum: [f64; 3],
    count: u32,
}

impl SampleAccumulator {
    pub fn new(mode: AccumulationMode) -> SampleAccumulator {
        SampleAccumulator {
            mode,
            sum: [0.0; 3],
            count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.sum = [0.0; 3];
        self.count = 0;
    }

    pub fn add(&mut self, color: Rgb<u8>) {
        match self.mode {
            AccumulationMode::LinearLight => {
                let table = srgb_decode_table();
                for (sum, channel) in self.sum.iter_mut().zip(color.0) {
                    *sum += table[channel as usize];
                }
            }
            AccumulationMode::Gamma => {
                for (sum, channel) in self.sum.iter_mut().zip(color.0) {
                    *sum += channel as f64;
                }
            }
        }
        self.count += 1;
    }

    /// Average of the samples added so far. Black if nothing was added.
    pub fn average(&self) -> Rgb<u8> {
        if self.count == 0 {
            return Rgb([0, 0, 0]);
        }
        let n = self.count as f64;
        let channel = |sum: f64| match self.mode {
            AccumulationMode::LinearLight => unit_to_byte(linear_to_srgb(sum / n)),
            AccumulationMode::Gamma => (sum / n).round().clamp(0.0, 255.0) as u8,
        };
        Rgb([
            channel(self.sum[0]),
            channel(self.sum[1]),
            channel(self.sum[2]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsl_primary_hues() {
        assert_eq!(hsl_to_rgb(0.0, 1.0, 0.5), [1.0, 0.0, 0.0]);
        assert_eq!(hsl_to_rgb(1.0 / 3.0, 1.0, 0.5), [0.0, 1.0, 0.0]);
        assert_eq!(hsl_to_rgb(2.0 / 3.0, 1.0, 0.5), [0.0, 0.0, 1.0]);
        assert_eq!(hsl_to_rgb(0.5, 0.0, 0.25), [0.25, 0.25, 0.25]);
    }

    #[test]
    fn hsl_highlight_is_lighter() {
        let [r, g, b] = hsl_to_rgb(0.0, 1.0, HIGHLIGHT_LIGHTNESS);
        assert_eq!([r, g, b], [1.0, 0.5, 0.5]);
    }

    #[test]
    fn interior_points_are_flat_white() {
        let color_map = HueRampColorMap::new(32.0, 4.0);
        assert_eq!(color_map.color_for(0.0, 1000, false), INTERIOR_COLOR);
        assert_eq!(color_map.color_for(4.0, 1000, true), INTERIOR_COLOR);
    }

    #[test]
    fn escaped_points_use_hue_ramp() {
        let color_map = HueRampColorMap::new(1.0, 4.0);
        // angle = 2 * pi --> hue 0 --> red
        let magnitude_squared = std::f64::consts::TAU;
        assert_eq!(
            color_map.color_for(magnitude_squared, 1, false),
            Rgb([255, 0, 0])
        );
        assert_eq!(
            color_map.color_for(magnitude_squared, 1, true),
            Rgb([255, 128, 128])
        );
        let hue = color_map.hue(5.0, 3);
        assert!((0.0..1.0).contains(&hue));
    }

    #[test]
    fn color_for_is_deterministic() {
        let color_map = HueRampColorMap::new(17.5, 4.0);
        for iteration in 0..50 {
            let magnitude = 4.0 + iteration as f64 * 0.37;
            assert_eq!(
                color_map.color_for(magnitude, iteration, false),
                color_map.color_for(magnitude, iteration, false)
            );
        }
    }

    #[test]
    fn srgb_round_trip_is_exact_on_bytes() {
        for byte in 0..=255u8 {
            let decoded = srgb_decode_table()[byte as usize];
            assert_eq!(unit_to_byte(linear_to_srgb(decoded)), byte);
        }
    }

    #[test]
    fn single_sample_average_reproduces_the_sample() {
        for mode in [AccumulationMode::LinearLight, AccumulationMode::Gamma] {
            let mut accumulator = SampleAccumulator::new(mode);
            accumulator.add(Rgb([12, 200, 77]));
            assert_eq!(accumulator.average(), Rgb([12, 200, 77]));
        }
    }

    #[test]
    fn linear_light_average_is_brighter_than_gamma_average() {
        let mut linear = SampleAccumulator::new(AccumulationMode::LinearLight);
        let mut gamma = SampleAccumulator::new(AccumulationMode::Gamma);
        for color in [Rgb([0, 0, 0]), Rgb([255, 255, 255])] {
            linear.add(color);
            gamma.add(color);
        }
        assert_eq!(gamma.average(), Rgb([128, 128, 128]));
        // Half of the light of white is sRGB 188.
        assert_eq!(linear.average(), Rgb([188, 188, 188]));

        linear.reset();
        assert_eq!(linear.average(), Rgb([0, 0, 0]));
    }
}
