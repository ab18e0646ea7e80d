use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hypercube_model::{Dimension, Hierarchy, Level, Member, Tuple};

use crate::cursor::TupleList;
use crate::types::ScalarType;

/// Null sentinel for integer-valued expressions. Reserved; no real integer
/// result may be this value.
pub const INT_NULL: i32 = i32::MIN;

/// Null sentinel for double-valued expressions: a quiet NaN with a
/// distinguished payload, compared by bit pattern via [`is_double_null`].
///
/// Ordinary arithmetic NaNs carry other payloads and are *not* null; code
/// must check `is_double_null(x)`, never `x.is_nan()`.
pub const DOUBLE_NULL: f64 = f64::from_bits(0x7FF8_0000_0000_DEAD);

/// Whether `x` is exactly the double null sentinel.
pub fn is_double_null(x: f64) -> bool {
    x.to_bits() == DOUBLE_NULL.to_bits()
}

/// The generic result representation shared by every compiled expression.
///
/// Typed calc variants narrow evaluation to one of these shapes with its own
/// null convention; the generic entry point must agree with the typed one,
/// which is why the sentinel-carrying constructors below fold each typed null
/// into [`Value::Null`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Double(f64),
    Str(Arc<str>),
    DateTime(DateTime<Utc>),
    Member(Member),
    Level(Level),
    Hierarchy(Hierarchy),
    Dimension(Dimension),
    Tuple(Tuple),
    Set(TupleList),
}

impl Value {
    /// Box a typed boolean result; `None` is the boolean null.
    pub fn from_bool(b: Option<bool>) -> Value {
        match b {
            Some(b) => Value::Bool(b),
            None => Value::Null,
        }
    }

    /// Box a typed integer result; [`INT_NULL`] becomes [`Value::Null`].
    pub fn from_int(i: i32) -> Value {
        if i == INT_NULL {
            Value::Null
        } else {
            Value::Int(i)
        }
    }

    /// Box a typed double result; [`DOUBLE_NULL`] becomes [`Value::Null`].
    pub fn from_double(d: f64) -> Value {
        if is_double_null(d) {
            Value::Null
        } else {
            Value::Double(d)
        }
    }

    /// Box a typed string result.
    pub fn from_str_opt(s: Option<Arc<str>>) -> Value {
        match s {
            Some(s) => Value::Str(s),
            None => Value::Null,
        }
    }

    /// Box a typed member result; the hierarchy null member boxes to
    /// [`Value::Null`] so generic callers observe the same null behavior as
    /// typed ones.
    pub fn from_member(m: Member) -> Value {
        if m.is_null() {
            Value::Null
        } else {
            Value::Member(m)
        }
    }

    /// Box a typed tuple result; `None` (the tuple-level null) becomes
    /// [`Value::Null`].
    pub fn from_tuple(t: Option<Tuple>) -> Value {
        match t {
            Some(t) => Value::Tuple(t),
            None => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The static type this value belongs to, used by the compiler when
    /// typing literals. `Null` has no type of its own and reports `Void`.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Value::Null => ScalarType::Void,
            Value::Bool(_) => ScalarType::Boolean,
            Value::Int(_) => ScalarType::Integer,
            Value::Double(_) => ScalarType::Double,
            Value::Str(_) => ScalarType::String,
            Value::DateTime(_) => ScalarType::DateTime,
            Value::Member(_) => ScalarType::Member,
            Value::Level(_) => ScalarType::Level,
            Value::Hierarchy(_) => ScalarType::Hierarchy,
            Value::Dimension(_) => ScalarType::Dimension,
            Value::Tuple(_) => ScalarType::Tuple,
            Value::Set(_) => ScalarType::Set,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::from_int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::from_double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Arc::from(value))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str(""),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Str(s) => f.write_str(s),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            Value::Member(m) => write!(f, "{m}"),
            Value::Level(l) => write!(f, "{l}"),
            Value::Hierarchy(h) => write!(f, "{h}"),
            Value::Dimension(d) => write!(f, "{d}"),
            Value::Tuple(t) => write!(f, "{t}"),
            Value::Set(s) => write!(f, "<set of {} tuples>", s.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_null_is_not_ordinary_nan() {
        assert!(DOUBLE_NULL.is_nan());
        assert!(is_double_null(DOUBLE_NULL));
        assert!(!is_double_null(f64::NAN));
        assert!(!is_double_null(0.0 / f64::INFINITY));
    }

    #[test]
    fn sentinel_boxing_folds_to_null() {
        assert_eq!(Value::from_int(INT_NULL), Value::Null);
        assert_eq!(Value::from_double(DOUBLE_NULL), Value::Null);
        assert_eq!(Value::from_bool(None), Value::Null);
        assert_eq!(Value::from_int(7), Value::Int(7));
    }
}
