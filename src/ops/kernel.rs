//! Elementwise kernel descriptions shared by every backend.
//!
//! A kernel is plain data: the host backend evaluates it with [`UnaryKernel::apply`]
//! and [`BinaryKernel::apply`], the accelerator backend turns it into an opcode
//! for the elementwise shader.

/// `sqrt(2 / pi)`, the scale inside the tanh approximation of GeLU.
pub const GELU_SCALE: f64 = 0.797_884_560_802_865_4;
/// Cubic coefficient of the tanh approximation of GeLU.
pub const GELU_CUBIC: f64 = 0.044_715;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryKernel {
    Add(f64),
    Mul(f64),
    Pow(f64),
    /// `max(x, c)`
    Max(f64),
    /// `1` where `x > c`, else `0`.
    Step(f64),
    Exp,
    Log,
    Tanh,
    /// `1 - tanh(x)^2`
    TanhGrad,
    Sigmoid,
    /// `sigmoid(x) * (1 - sigmoid(x))`
    SigmoidGrad,
    /// `x * sigmoid(x)`
    Swish,
    /// Derivative of swish.
    SwishGrad,
    /// Tanh approximation of GeLU.
    Gelu,
    /// Derivative of the tanh approximation of GeLU.
    GeluGrad,
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

fn pow(x: f64, c: f64) -> f64 {
    if c.fract() == 0.0 && c.abs() <= i32::MAX as f64 {
        x.powi(c as i32)
    } else {
        x.powf(c)
    }
}

impl UnaryKernel {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Self::Add(c) => x + c,
            Self::Mul(c) => x * c,
            Self::Pow(c) => pow(x, c),
            Self::Max(c) => x.max(c),
            Self::Step(c) => {
                if x > c {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Exp => x.exp(),
            Self::Log => x.ln(),
            Self::Tanh => x.tanh(),
            Self::TanhGrad => {
                let t = x.tanh();
                1.0 - t * t
            }
            Self::Sigmoid => sigmoid(x),
            Self::SigmoidGrad => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            Self::Swish => x * sigmoid(x),
            Self::SwishGrad => {
                let s = sigmoid(x);
                s * (1.0 + x * (1.0 - s))
            }
            Self::Gelu => {
                let inner = GELU_SCALE * (x + GELU_CUBIC * x * x * x);
                0.5 * x * (1.0 + inner.tanh())
            }
            Self::GeluGrad => {
                let inner = GELU_SCALE * (x + GELU_CUBIC * x * x * x);
                let t = inner.tanh();
                let d_inner = GELU_SCALE * (1.0 + 3.0 * GELU_CUBIC * x * x);
                0.5 * (1.0 + t) + 0.5 * x * (1.0 - t * t) * d_inner
            }
        }
    }

    /// Opcode and scalar parameter understood by the elementwise shader.
    pub(crate) fn opcode(self) -> (u32, f64) {
        match self {
            Self::Add(c) => (0, c),
            Self::Mul(c) => (1, c),
            Self::Pow(c) => (2, c),
            Self::Max(c) => (3, c),
            Self::Step(c) => (4, c),
            Self::Exp => (5, 0.0),
            Self::Log => (6, 0.0),
            Self::Tanh => (7, 0.0),
            Self::TanhGrad => (8, 0.0),
            Self::Sigmoid => (9, 0.0),
            Self::SigmoidGrad => (10, 0.0),
            Self::Swish => (11, 0.0),
            Self::SwishGrad => (12, 0.0),
            Self::Gelu => (13, 0.0),
            Self::GeluGrad => (14, 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKernel {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryKernel {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
        }
    }

    /// Opcodes continue after the unary ones so one shader serves both.
    pub(crate) fn opcode(self) -> u32 {
        match self {
            Self::Add => 100,
            Self::Sub => 101,
            Self::Mul => 102,
            Self::Div => 103,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_derivative(kernel: UnaryKernel, x: f64) -> f64 {
        let h = 1e-6;
        (kernel.apply(x + h) - kernel.apply(x - h)) / (2.0 * h)
    }

    #[test]
    fn derivative_kernels_match_central_differences() {
        let pairs = [
            (UnaryKernel::Tanh, UnaryKernel::TanhGrad),
            (UnaryKernel::Sigmoid, UnaryKernel::SigmoidGrad),
            (UnaryKernel::Swish, UnaryKernel::SwishGrad),
            (UnaryKernel::Gelu, UnaryKernel::GeluGrad),
        ];
        for (f, df) in pairs {
            for x in [-3.0, -0.7, 0.0, 0.4, 2.5] {
                let expected = numeric_derivative(f, x);
                assert!((df.apply(x) - expected).abs() < 1e-6, "{f:?} at {x}");
            }
        }
    }

    #[test]
    fn integral_powers_keep_sign() {
        assert_eq!(UnaryKernel::Pow(3.0).apply(-2.0), -8.0);
        assert_eq!(UnaryKernel::Pow(-1.0).apply(4.0), 0.25);
    }

    #[test]
    fn gelu_matches_reference_points() {
        assert_eq!(UnaryKernel::Gelu.apply(0.0), 0.0);
        assert!((UnaryKernel::Gelu.apply(1.0) - 0.841_191_990_608_276_8).abs() < 1e-12);
    }
}
