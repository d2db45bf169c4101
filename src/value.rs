//! Trace values
//!
//! Every entity carries one `TraceValue`. Assignments into a proxy classify the
//! Rust type into one of six categories: null, duration, 64-bit integer,
//! 64-bit float, string, bool. Unsigned values above `i64::MAX` saturate.
//! Serializers built on top of a snapshot must carry all six without loss.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

/// Tagged value stored in an entity
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TraceValue {
    #[default]
    Null,
    Duration(Duration),
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
}

impl TraceValue {
    /// Category name, stable across releases
    pub fn kind(&self) -> &'static str {
        match self {
            TraceValue::Null => "null",
            TraceValue::Duration(_) => "duration",
            TraceValue::Int(_) => "int",
            TraceValue::Float(_) => "float",
            TraceValue::String(_) => "string",
            TraceValue::Bool(_) => "bool",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TraceValue::Null)
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            TraceValue::Duration(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            TraceValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            TraceValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TraceValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TraceValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Overwrite with a string, reusing the existing buffer when already a string.
    pub fn assign_str(&mut self, s: &str) {
        match self {
            TraceValue::String(buf) => {
                buf.clear();
                buf.push_str(s);
            }
            other => *other = TraceValue::String(s.to_owned()),
        }
    }

    /// Overwrite with formatted text, reusing the existing buffer when possible.
    pub fn assign_fmt(&mut self, args: fmt::Arguments<'_>) {
        use std::fmt::Write;

        if !matches!(self, TraceValue::String(_)) {
            *self = TraceValue::String(String::new());
        }
        if let TraceValue::String(buf) = self {
            buf.clear();
            // Writing into a String cannot fail
            let _ = buf.write_fmt(args);
        }
    }
}

impl fmt::Display for TraceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceValue::Null => f.write_str("[null]"),
            TraceValue::Duration(d) => write!(f, "{:.4} ms", d.as_secs_f64() * 1000.0),
            TraceValue::Int(v) => write!(f, "{}", v),
            TraceValue::Float(v) => write!(f, "{:.6}", v),
            TraceValue::String(s) => write!(f, "\"{}\"", s),
            TraceValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for TraceValue {
                fn from(v: $ty) -> Self {
                    TraceValue::Int(v as i64)
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, isize, u8, u16, u32);

// saturate instead of wrapping to a negative value
macro_rules! impl_from_wide_unsigned {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for TraceValue {
                fn from(v: $ty) -> Self {
                    TraceValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
                }
            }
        )*
    };
}

impl_from_wide_unsigned!(u64, usize);

impl From<f32> for TraceValue {
    fn from(v: f32) -> Self {
        TraceValue::Float(f64::from(v))
    }
}

impl From<f64> for TraceValue {
    fn from(v: f64) -> Self {
        TraceValue::Float(v)
    }
}

impl From<bool> for TraceValue {
    fn from(v: bool) -> Self {
        TraceValue::Bool(v)
    }
}

impl From<Duration> for TraceValue {
    fn from(v: Duration) -> Self {
        TraceValue::Duration(v)
    }
}

impl From<String> for TraceValue {
    fn from(v: String) -> Self {
        TraceValue::String(v)
    }
}

impl From<&str> for TraceValue {
    fn from(v: &str) -> Self {
        TraceValue::String(v.to_owned())
    }
}

impl From<&String> for TraceValue {
    fn from(v: &String) -> Self {
        TraceValue::String(v.clone())
    }
}

impl From<Cow<'_, str>> for TraceValue {
    fn from(v: Cow<'_, str>) -> Self {
        TraceValue::String(v.into_owned())
    }
}

impl From<()> for TraceValue {
    fn from(_: ()) -> Self {
        TraceValue::Null
    }
}
