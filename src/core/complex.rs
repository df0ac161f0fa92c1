use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/**
 * Minimal complex number used by the escape-time iteration and the viewport mapping.
 * It is an immutable value type: every operation returns a new instance.
 */
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ComplexNumber {
    pub real: f64,
    pub imag: f64,
}

impl ComplexNumber {
    pub const ZERO: ComplexNumber = ComplexNumber {
        real: 0.0,
        imag: 0.0,
    };

    pub fn new(real: f64, imag: f64) -> ComplexNumber {
        ComplexNumber { real, imag }
    }

    pub fn scale(&self, factor: f64) -> ComplexNumber {
        ComplexNumber::new(factor * self.real, factor * self.imag)
    }

    /// (a+bi)^2 = (a^2 - b^2) + (2ab)i
    pub fn square(&self) -> ComplexNumber {
        ComplexNumber::new(
            self.real * self.real - self.imag * self.imag,
            (self.real + self.real) * self.imag,
        )
    }

    pub fn magnitude_squared(&self) -> f64 {
        self.real * self.real + self.imag * self.imag
    }
}

impl Add for ComplexNumber {
    type Output = ComplexNumber;

    fn add(self, other: ComplexNumber) -> ComplexNumber {
        ComplexNumber::new(self.real + other.real, self.imag + other.imag)
    }
}

impl Sub for ComplexNumber {
    type Output = ComplexNumber;

    fn sub(self, other: ComplexNumber) -> ComplexNumber {
        ComplexNumber::new(self.real - other.real, self.imag - other.imag)
    }
}

impl Mul for ComplexNumber {
    type Output = ComplexNumber;

    fn mul(self, other: ComplexNumber) -> ComplexNumber {
        ComplexNumber::new(
            self.real * other.real - self.imag * other.imag,
            self.real * other.imag + other.real * self.imag,
        )
    }
}

impl Mul<f64> for ComplexNumber {
    type Output = ComplexNumber;

    fn mul(self, factor: f64) -> ComplexNumber {
        self.scale(factor)
    }
}

impl std::fmt::Display for ComplexNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.imag < 0.0 {
            write!(f, "({}{}i)", self.real, self.imag)
        } else {
            write!(f, "({}+{}i)", self.real, self.imag)
        }
    }
}
