//! Arithmetic dispatch on the kind of the right-hand operand.
//!
//! Every arithmetic symbol has one function here that matches exhaustively on
//! [`Operand`]:
//!
//! | operand | `+` | `-` | `*` | `/` | `pow` |
//! |---|---|---|---|---|---|
//! | scalar | `uadd` | `usub` | `umul` | `umul(1/c)` | `upow` |
//! | value | `badd` | `bsub` | `bmul` | `bdiv` | unsupported |
//! | anything else | error | error | error | error | error |
//!
//! Floor division and modulo are never supported.
//!
//! The `std::ops` operators on `&Value` forward to these functions and
//! therefore return `Result<Value>`.

use crate::array::Array;
use crate::binary::{badd, bdiv, bmul, bsub};
use crate::error::{Error, Result};
use crate::unary::{uadd, umul, upow, usub};
use crate::value::Value;
use std::ops;

/// Right-hand side of an arithmetic operation.
#[derive(Debug, Clone)]
pub enum Operand {
    Scalar(f64),
    Value(Value),
    /// Anything else; carries a description of its kind for the error.
    Unsupported(&'static str),
}

impl Operand {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Value(_) => "value",
            Self::Unsupported(kind) => *kind,
        }
    }
}

macro_rules! scalar_operand {
    ($($t:ty),*) => {
        $(impl From<$t> for Operand {
            fn from(x: $t) -> Self {
                Self::Scalar(x as f64)
            }
        })*
    };
}

scalar_operand!(f64, f32, i32, i64, u32, usize);

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<&Value> for Operand {
    fn from(v: &Value) -> Self {
        Self::Value(v.clone())
    }
}

/// Raw arrays become constants.
impl From<Array> for Operand {
    fn from(a: Array) -> Self {
        Self::Value(Value::constant(a))
    }
}

impl From<bool> for Operand {
    fn from(_: bool) -> Self {
        Self::Unsupported("bool")
    }
}

impl From<&str> for Operand {
    fn from(_: &str) -> Self {
        Self::Unsupported("string")
    }
}

impl From<String> for Operand {
    fn from(_: String) -> Self {
        Self::Unsupported("string")
    }
}

fn unsupported(op: &'static str, kind: &'static str) -> Error {
    Error::UnsupportedOperandKind { op, kind }
}

pub fn add(lhs: &Value, rhs: impl Into<Operand>) -> Result<Value> {
    match rhs.into() {
        Operand::Scalar(c) => uadd(lhs, c),
        Operand::Value(v) => badd(lhs, &v),
        Operand::Unsupported(kind) => Err(unsupported("add", kind)),
    }
}

pub fn sub(lhs: &Value, rhs: impl Into<Operand>) -> Result<Value> {
    match rhs.into() {
        Operand::Scalar(c) => usub(lhs, c),
        Operand::Value(v) => bsub(lhs, &v),
        Operand::Unsupported(kind) => Err(unsupported("sub", kind)),
    }
}

pub fn mul(lhs: &Value, rhs: impl Into<Operand>) -> Result<Value> {
    match rhs.into() {
        Operand::Scalar(c) => umul(lhs, c),
        Operand::Value(v) => bmul(lhs, &v),
        Operand::Unsupported(kind) => Err(unsupported("mul", kind)),
    }
}

pub fn div(lhs: &Value, rhs: impl Into<Operand>) -> Result<Value> {
    match rhs.into() {
        Operand::Scalar(c) => umul(lhs, 1.0 / c),
        Operand::Value(v) => bdiv(lhs, &v),
        Operand::Unsupported(kind) => Err(unsupported("div", kind)),
    }
}

pub fn pow(lhs: &Value, rhs: impl Into<Operand>) -> Result<Value> {
    match rhs.into() {
        Operand::Scalar(c) => upow(lhs, c),
        Operand::Value(_) => Err(Error::UnsupportedOperation("raising to the power of a value")),
        Operand::Unsupported(kind) => Err(unsupported("pow", kind)),
    }
}

pub fn floor_div(_lhs: &Value, _rhs: impl Into<Operand>) -> Result<Value> {
    Err(Error::UnsupportedOperation("floor division"))
}

pub fn rem(_lhs: &Value, _rhs: impl Into<Operand>) -> Result<Value> {
    Err(Error::UnsupportedOperation("modulo"))
}

impl Value {
    pub fn pow(&self, exponent: impl Into<Operand>) -> Result<Value> {
        pow(self, exponent)
    }

    pub fn floor_div(&self, rhs: impl Into<Operand>) -> Result<Value> {
        floor_div(self, rhs)
    }
}

macro_rules! value_op {
    ($tr:ident, $method:ident, $f:path) => {
        impl ops::$tr<&Value> for &Value {
            type Output = Result<Value>;
            fn $method(self, rhs: &Value) -> Result<Value> {
                $f(self, rhs)
            }
        }

        impl ops::$tr<Value> for &Value {
            type Output = Result<Value>;
            fn $method(self, rhs: Value) -> Result<Value> {
                $f(self, rhs)
            }
        }

        impl ops::$tr<f64> for &Value {
            type Output = Result<Value>;
            fn $method(self, rhs: f64) -> Result<Value> {
                $f(self, rhs)
            }
        }
    };
}

value_op!(Add, add, add);
value_op!(Sub, sub, sub);
value_op!(Mul, mul, mul);
value_op!(Div, div, div);
value_op!(Rem, rem, rem);

impl ops::Neg for &Value {
    type Output = Result<Value>;
    fn neg(self) -> Result<Value> {
        umul(self, -1.0)
    }
}

impl ops::Add<&Value> for f64 {
    type Output = Result<Value>;
    fn add(self, rhs: &Value) -> Result<Value> {
        uadd(rhs, self)
    }
}

impl ops::Sub<&Value> for f64 {
    type Output = Result<Value>;
    fn sub(self, rhs: &Value) -> Result<Value> {
        uadd(&umul(rhs, -1.0)?, self)
    }
}

impl ops::Mul<&Value> for f64 {
    type Output = Result<Value>;
    fn mul(self, rhs: &Value) -> Result<Value> {
        umul(rhs, self)
    }
}

impl ops::Div<&Value> for f64 {
    type Output = Result<Value>;
    fn div(self, rhs: &Value) -> Result<Value> {
        umul(&upow(rhs, -1.0)?, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(v: &Value) -> Vec<f64> {
        v.to_array().unwrap().data().to_vec()
    }

    #[test]
    fn scalars_take_the_unary_path() {
        let x = Value::new(vec![2.0, 4.0]);
        assert_eq!(data(&(&x + 1.0).unwrap()), vec![3.0, 5.0]);
        assert_eq!(data(&(&x - 1.0).unwrap()), vec![1.0, 3.0]);
        assert_eq!(data(&(&x * 3.0).unwrap()), vec![6.0, 12.0]);
        assert_eq!(data(&(&x / 2.0).unwrap()), vec![1.0, 2.0]);
        assert_eq!(data(&(1.0 - &x).unwrap()), vec![-1.0, -3.0]);
        assert_eq!(data(&(8.0 / &x).unwrap()), vec![4.0, 2.0]);
        assert_eq!(data(&x.pow(2).unwrap()), vec![4.0, 16.0]);
    }

    #[test]
    fn unsupported_operand_kinds_fail() {
        let x = Value::new(vec![1.0]);
        assert!(matches!(
            add(&x, "one"),
            Err(Error::UnsupportedOperandKind { op: "add", kind: "string" })
        ));
        assert!(matches!(
            mul(&x, true),
            Err(Error::UnsupportedOperandKind { kind: "bool", .. })
        ));
    }

    #[test]
    fn floor_division_and_modulo_are_rejected() {
        let x = Value::new(vec![5.0]);
        let y = Value::new(vec![2.0]);
        assert!(matches!(x.floor_div(&y), Err(Error::UnsupportedOperation(_))));
        assert!(matches!(&x % &y, Err(Error::UnsupportedOperation(_))));
        assert!(matches!(&x % 2.0, Err(Error::UnsupportedOperation(_))));
    }

    #[test]
    fn value_exponent_is_rejected() {
        let x = Value::new(vec![2.0]);
        assert!(matches!(x.pow(&x), Err(Error::UnsupportedOperation(_))));
    }

    #[test]
    fn negation_flows_gradient() {
        let x = Value::new(vec![3.0]);
        (-&x).unwrap().backward().unwrap();
        assert_eq!(data(&x.grad().unwrap()), vec![-1.0]);
    }
}
