//! Sources of the sub-pixel offsets used for stochastic supersampling.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::error::RenderError;

/// Produces uniform values on `[0, 1)`. Each supersample draws two of them: x first, then y.
pub trait JitterSource {
    fn next_unit(&mut self) -> f64;

    fn next_offset(&mut self) -> (f64, f64) {
        let dx = self.next_unit();
        let dy = self.next_unit();
        (dx, dy)
    }
}

/// Adapter that draws jitter from any `rand` generator.
pub struct RandomJitter<R: Rng> {
    rng: R,
}

impl<R: Rng> RandomJitter<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> JitterSource for RandomJitter<R> {
    fn next_unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/**
 * Replays a fixed sequence of values, wrapping around at the end. Used to make
 * supersampled output reproducible in tests.
 */
#[derive(Debug, Clone)]
pub struct FixedJitter {
    values: Vec<f64>,
    index: usize,
}

impl FixedJitter {
    pub fn new(values: Vec<f64>) -> FixedJitter {
        assert!(
            values.iter().all(|v| (0.0..1.0).contains(v)),
            "jitter values must be on [0, 1)"
        );
        FixedJitter { values, index: 0 }
    }
}

impl JitterSource for FixedJitter {
    fn next_unit(&mut self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let value = self.values[self.index];
        self.index = (self.index + 1) % self.values.len();
        value
    }
}

/// Every sample lands on the top-left corner of its pixel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroJitter;

impl JitterSource for ZeroJitter {
    fn next_unit(&mut self) -> f64 {
        0.0
    }
}

/**
 * Serializable description of the jitter a row request should use. Random jitter
 * is described by a seed; every row derives its own generator from `(seed, row)`,
 * so the output does not depend on which worker renders the row, or when.
 */
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum JitterSpec {
    Random { seed: u64 },
    Fixed { values: Vec<f64> },
    Zero,
}

impl JitterSpec {
    pub fn validate(&self) -> Result<(), RenderError> {
        if let JitterSpec::Fixed { values } = self {
            if let Some(bad) = values.iter().find(|v| !(0.0..1.0).contains(*v)) {
                return Err(RenderError::Configuration(format!(
                    "fixed jitter value {} is outside [0, 1)",
                    bad
                )));
            }
        }
        Ok(())
    }

    pub fn source_for_row(&self, row: u32) -> Box<dyn JitterSource + Send> {
        match self {
            JitterSpec::Random { seed } => Box::new(RandomJitter::new(StdRng::seed_from_u64(
                row_seed(*seed, row),
            ))),
            JitterSpec::Fixed { values } => Box::new(FixedJitter::new(values.clone())),
            JitterSpec::Zero => Box::new(ZeroJitter),
        }
    }
}

// Golden-ratio increment keeps neighbouring rows from sharing nearby seeds.
fn row_seed(seed: u64, row: u32) -> u64 {
    seed ^ (row as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
