//! Single-word primitive encoding.
//!
//! A primitive operand is `(payload << 3) | tag`. Small positive integers are
//! stored inline, every other number goes through the float table, strings go
//! through the string pool and the remaining values share one tag with
//! reserved payloads.

use std::fmt;

use thiserror::Error;

use super::constants::Constants;

/// Immediate integers must fit in the payload bits of a `u32` word.
pub const MAX_IMMEDIATE: u32 = (1 << 29) - 1;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Number = 0,
    Float = 1,
    String = 2,
    BooleanOrVoid = 3,
}

const FALSE: u32 = 0;
const TRUE: u32 = 1;
const NULL: u32 = 2;
const UNDEFINED: u32 = 3;

/// A template primitive value.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    Undefined,
}

/// Error returned when a value cannot be represented as a primitive.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid primitive: {0}")]
pub struct InvalidPrimitive(pub String);

impl TryFrom<&serde_json::Value> for Primitive {
    type Error = InvalidPrimitive;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;
        match value {
            Value::Null => Ok(Primitive::Null),
            Value::Bool(b) => Ok(Primitive::Boolean(*b)),
            Value::String(s) => Ok(Primitive::String(s.clone())),
            Value::Number(n) => n
                .as_f64()
                .map(Primitive::Number)
                .ok_or_else(|| InvalidPrimitive(n.to_string())),
            Value::Array(_) => Err(InvalidPrimitive("array".to_string())),
            Value::Object(_) => Err(InvalidPrimitive("object".to_string())),
        }
    }
}

impl Primitive {
    /// The tag this value encodes under.
    pub fn kind(&self) -> PrimitiveType {
        match self {
            Primitive::Number(n) if is_immediate(*n) => PrimitiveType::Number,
            Primitive::Number(_) => PrimitiveType::Float,
            Primitive::String(_) => PrimitiveType::String,
            Primitive::Boolean(_) | Primitive::Null | Primitive::Undefined => {
                PrimitiveType::BooleanOrVoid
            }
        }
    }

    /// Encode into a single operand word, interning into `constants` as needed.
    pub fn encode(&self, constants: &mut Constants) -> u32 {
        let payload = match self {
            Primitive::Number(n) if is_immediate(*n) => *n as u32,
            Primitive::Number(n) => constants.float(*n),
            Primitive::String(s) => constants.string(s),
            Primitive::Boolean(false) => FALSE,
            Primitive::Boolean(true) => TRUE,
            Primitive::Null => NULL,
            Primitive::Undefined => UNDEFINED,
        };
        (payload << 3) | self.kind() as u32
    }

    /// Decode an operand word produced by [`Primitive::encode`].
    pub fn decode(word: u32, constants: &Constants) -> Option<Primitive> {
        let payload = word >> 3;
        match word & 0b111 {
            0 => Some(Primitive::Number(payload as f64)),
            1 => constants.get_float(payload).map(Primitive::Number),
            2 => constants.get_string(payload).map(|s| Primitive::String(s.to_string())),
            3 => match payload {
                FALSE => Some(Primitive::Boolean(false)),
                TRUE => Some(Primitive::Boolean(true)),
                NULL => Some(Primitive::Null),
                UNDEFINED => Some(Primitive::Undefined),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Primitive::Number(n) => *n != 0.0 && !n.is_nan(),
            Primitive::String(s) => !s.is_empty(),
            Primitive::Boolean(b) => *b,
            Primitive::Null | Primitive::Undefined => false,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Primitive::Null | Primitive::Undefined)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Primitive::Number(n) => format_number_json(*n),
            Primitive::String(s) => serde_json::Value::String(s.clone()),
            Primitive::Boolean(b) => serde_json::Value::Bool(*b),
            Primitive::Null | Primitive::Undefined => serde_json::Value::Null,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Number(n) => write!(f, "{}", format_number(*n)),
            Primitive::String(s) => write!(f, "{:?}", s),
            Primitive::Boolean(b) => write!(f, "{}", b),
            Primitive::Null => write!(f, "null"),
            Primitive::Undefined => write!(f, "undefined"),
        }
    }
}

fn is_immediate(n: f64) -> bool {
    n.fract() == 0.0 && n > 0.0 && n <= MAX_IMMEDIATE as f64
}

/// Render a number the way template output expects (`3`, not `3.0`).
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn format_number_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}
