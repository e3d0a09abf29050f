#![forbid(unsafe_code)]

use crate::types::LogicalType;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// A zero-copy view of a byte range.
///
/// Slices taken from a block payload share the payload's allocation; the allocation is
/// released once the last slice referencing it is dropped.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteSlice(Bytes);

impl ByteSlice {
    /// View `buffer[start..start + len]` without copying.
    ///
    /// Returns `None` when the range falls outside `buffer`.
    pub fn view(buffer: &Bytes, start: usize, len: usize) -> Option<Self> {
        let end = start.checked_add(len)?;
        if end > buffer.len() {
            return None;
        }
        Some(Self(buffer.slice(start..end)))
    }

    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(data))
    }

    /// Detach the slice from the buffer it was taken from.
    pub fn to_owned_copy(&self) -> Self {
        Self::copy_from_slice(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Address of the first byte, for identity checks against the source buffer.
    pub fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for ByteSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "{s:?}"),
            None => write!(f, "{:?}", self.as_bytes()),
        }
    }
}

impl From<&str> for ByteSlice {
    fn from(value: &str) -> Self {
        Self::copy_from_slice(value.as_bytes())
    }
}

impl From<String> for ByteSlice {
    fn from(value: String) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<Vec<u8>> for ByteSlice {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<Bytes> for ByteSlice {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

/// Why a value could not be converted to another logical type.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CastError {
    #[error("{from:?} value cannot be represented as {to:?}")]
    Incompatible { from: LogicalType, to: LogicalType },
    #[error("{value} is out of range for {to:?}")]
    OutOfRange { value: String, to: LogicalType },
    #[error("`{text}` cannot be parsed as {to:?}")]
    Parse { text: String, to: LogicalType },
}

/// A boxed cell value.
///
/// Scalar variants carry one primitive payload. The nested variants only appear when reading
/// cells back out of container columns.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(ByteSlice),
    Bytes(ByteSlice),
    Array(Vec<Option<Value>>),
    Struct(Vec<(Arc<str>, Option<Value>)>),
    /// Present entries only, in key order of the map's children.
    Map(Vec<(Arc<str>, Value)>),
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::String(ByteSlice::from(s))
    }

    pub fn bytes(b: &[u8]) -> Self {
        Value::Bytes(ByteSlice::copy_from_slice(b))
    }

    pub fn logical_type(&self) -> LogicalType {
        match self {
            Value::Boolean(_) => LogicalType::Boolean,
            Value::Byte(_) => LogicalType::Byte,
            Value::Short(_) => LogicalType::Short,
            Value::Integer(_) => LogicalType::Integer,
            Value::Long(_) => LogicalType::Long,
            Value::Float(_) => LogicalType::Float,
            Value::Double(_) => LogicalType::Double,
            Value::String(_) => LogicalType::String,
            Value::Bytes(_) => LogicalType::Bytes,
            Value::Array(_) => LogicalType::Array,
            Value::Struct(_) => LogicalType::Struct,
            Value::Map(_) => LogicalType::Map,
        }
    }

    /// Convert to `target`, failing instead of wrapping, saturating or truncating.
    pub fn cast_to(&self, target: LogicalType) -> Result<Value, CastError> {
        Ok(match target {
            LogicalType::Boolean => Value::Boolean(self.to_boolean()?),
            LogicalType::Byte => Value::Byte(self.to_byte()?),
            LogicalType::Short => Value::Short(self.to_short()?),
            LogicalType::Integer => Value::Integer(self.to_integer()?),
            LogicalType::Long => Value::Long(self.to_long()?),
            LogicalType::Float => Value::Float(self.to_float()?),
            LogicalType::Double => Value::Double(self.to_double()?),
            LogicalType::String => Value::String(self.to_string_slice()?),
            LogicalType::Bytes => Value::Bytes(self.to_bytes()?),
            _ if self.logical_type() == target => self.clone(),
            _ => return Err(self.incompatible(target)),
        })
    }

    pub fn to_boolean(&self) -> Result<bool, CastError> {
        match self {
            Value::Boolean(v) => Ok(*v),
            Value::String(s) => match s.as_str() {
                Some("true") => Ok(true),
                Some("false") => Ok(false),
                _ => Err(parse_error(s, LogicalType::Boolean)),
            },
            other => Err(other.incompatible(LogicalType::Boolean)),
        }
    }

    pub fn to_byte(&self) -> Result<i8, CastError> {
        let v = self.integral(LogicalType::Byte)?;
        i8::try_from(v).map_err(|_| out_of_range(v, LogicalType::Byte))
    }

    pub fn to_short(&self) -> Result<i16, CastError> {
        let v = self.integral(LogicalType::Short)?;
        i16::try_from(v).map_err(|_| out_of_range(v, LogicalType::Short))
    }

    pub fn to_integer(&self) -> Result<i32, CastError> {
        let v = self.integral(LogicalType::Integer)?;
        i32::try_from(v).map_err(|_| out_of_range(v, LogicalType::Integer))
    }

    pub fn to_long(&self) -> Result<i64, CastError> {
        self.integral(LogicalType::Long)
    }

    pub fn to_float(&self) -> Result<f32, CastError> {
        match self {
            Value::Byte(v) => Ok(*v as f32),
            Value::Short(v) => Ok(*v as f32),
            Value::Integer(v) => Ok(*v as f32),
            Value::Long(v) => Ok(*v as f32),
            Value::Float(v) => Ok(*v),
            Value::Double(v) => {
                if !v.is_finite() || v.abs() <= f32::MAX as f64 {
                    Ok(*v as f32)
                } else {
                    Err(out_of_range(v, LogicalType::Float))
                }
            }
            Value::String(s) => s
                .as_str()
                .and_then(|t| t.parse::<f32>().ok())
                .ok_or_else(|| parse_error(s, LogicalType::Float)),
            other => Err(other.incompatible(LogicalType::Float)),
        }
    }

    pub fn to_double(&self) -> Result<f64, CastError> {
        match self {
            Value::Byte(v) => Ok(*v as f64),
            Value::Short(v) => Ok(*v as f64),
            Value::Integer(v) => Ok(*v as f64),
            Value::Long(v) => Ok(*v as f64),
            Value::Float(v) => Ok(*v as f64),
            Value::Double(v) => Ok(*v),
            Value::String(s) => s
                .as_str()
                .and_then(|t| t.parse::<f64>().ok())
                .ok_or_else(|| parse_error(s, LogicalType::Double)),
            other => Err(other.incompatible(LogicalType::Double)),
        }
    }

    pub fn to_string_slice(&self) -> Result<ByteSlice, CastError> {
        let text = match self {
            Value::String(s) => return Ok(s.clone()),
            Value::Bytes(b) => {
                return match b.as_str() {
                    Some(_) => Ok(b.clone()),
                    None => Err(self.incompatible(LogicalType::String)),
                }
            }
            Value::Boolean(v) => v.to_string(),
            Value::Byte(v) => v.to_string(),
            Value::Short(v) => v.to_string(),
            Value::Integer(v) => v.to_string(),
            Value::Long(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            other => return Err(other.incompatible(LogicalType::String)),
        };
        Ok(ByteSlice::from(text))
    }

    pub fn to_bytes(&self) -> Result<ByteSlice, CastError> {
        match self {
            Value::Bytes(b) | Value::String(b) => Ok(b.clone()),
            other => Err(other.incompatible(LogicalType::Bytes)),
        }
    }

    fn integral(&self, to: LogicalType) -> Result<i64, CastError> {
        match self {
            Value::Byte(v) => Ok(*v as i64),
            Value::Short(v) => Ok(*v as i64),
            Value::Integer(v) => Ok(*v as i64),
            Value::Long(v) => Ok(*v),
            Value::Float(v) => float_to_i64(*v as f64, to),
            Value::Double(v) => float_to_i64(*v, to),
            Value::String(s) => s
                .as_str()
                .and_then(|t| t.parse::<i64>().ok())
                .ok_or_else(|| parse_error(s, to)),
            other => Err(other.incompatible(to)),
        }
    }

    fn incompatible(&self, to: LogicalType) -> CastError {
        CastError::Incompatible {
            from: self.logical_type(),
            to,
        }
    }
}

fn float_to_i64(v: f64, to: LogicalType) -> Result<i64, CastError> {
    // `i64::MAX as f64` rounds up to 2^63, which is already out of range.
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Ok(v as i64)
    } else {
        Err(out_of_range(v, to))
    }
}

fn out_of_range(value: impl fmt::Display, to: LogicalType) -> CastError {
    CastError::OutOfRange {
        value: value.to_string(),
        to,
    }
}

fn parse_error(s: &ByteSlice, to: LogicalType) -> CastError {
    CastError::Parse {
        text: String::from_utf8_lossy(s.as_bytes()).into_owned(),
        to,
    }
}

macro_rules! value_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from_primitive!(
    bool => Boolean,
    i8 => Byte,
    i16 => Short,
    i32 => Integer,
    i64 => Long,
    f32 => Float,
    f64 => Double,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

/// Native primitives that can be bulk-extracted from scalar columns.
pub trait Primitive: Copy + Sized {
    const LOGICAL_TYPE: LogicalType;

    /// Checked conversion; `None` when the value is not representable.
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_primitive {
    ($($ty:ty => $logical:ident, $conv:ident);* $(;)?) => {
        $(
            impl Primitive for $ty {
                const LOGICAL_TYPE: LogicalType = LogicalType::$logical;

                fn from_value(value: &Value) -> Option<Self> {
                    value.$conv().ok()
                }
            }
        )*
    };
}

impl_primitive!(
    bool => Boolean, to_boolean;
    i8 => Byte, to_byte;
    i16 => Short, to_short;
    i32 => Integer, to_integer;
    i64 => Long, to_long;
    f32 => Float, to_float;
    f64 => Double, to_double;
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowing_is_range_checked() {
        assert_eq!(Value::Integer(300).to_byte().ok(), None);
        assert_eq!(Value::Integer(-128).to_byte(), Ok(-128));
        assert_eq!(Value::Long(i64::from(i32::MAX) + 1).to_integer().ok(), None);
        assert_eq!(Value::Short(127).to_byte(), Ok(127));
        assert!(matches!(
            Value::Integer(300).to_byte(),
            Err(CastError::OutOfRange { to: LogicalType::Byte, .. })
        ));
    }

    #[test]
    fn widening_always_succeeds() {
        assert_eq!(Value::Byte(-5).to_long(), Ok(-5));
        assert_eq!(Value::Integer(7).to_double(), Ok(7.0));
        assert_eq!(Value::Long(i64::MAX).to_float(), Ok(i64::MAX as f32));
        assert_eq!(Value::Float(1.5).to_double(), Ok(1.5));
    }

    #[test]
    fn floats_to_integers_must_be_integral() {
        assert_eq!(Value::Double(42.0).to_integer(), Ok(42));
        assert!(Value::Double(42.5).to_integer().is_err());
        assert!(Value::Double(f64::NAN).to_long().is_err());
        assert!(Value::Double(1e300).to_long().is_err());
        assert!(Value::Double(1e300).to_float().is_err());
        assert!(Value::Double(f64::INFINITY).to_float().unwrap().is_infinite());
    }

    #[test]
    fn strings_parse_and_render() {
        assert_eq!(Value::string("12").to_short(), Ok(12));
        assert!(Value::string("12x").to_short().is_err());
        assert_eq!(Value::string("true").to_boolean(), Ok(true));
        assert_eq!(
            Value::Integer(-3).to_string_slice().unwrap().as_str(),
            Some("-3")
        );
        assert!(Value::Boolean(true).to_integer().is_err());
        assert!(Value::Integer(1).to_boolean().is_err());
    }

    #[test]
    fn bytes_to_string_requires_utf8() {
        assert!(Value::bytes(&[0xff, 0xfe]).to_string_slice().is_err());
        assert_eq!(
            Value::bytes(b"ok").cast_to(LogicalType::String),
            Ok(Value::string("ok"))
        );
    }

    #[test]
    fn view_is_zero_copy_and_bounds_checked() {
        let buf = Bytes::from_static(b"hello world");
        let slice = ByteSlice::view(&buf, 6, 5).unwrap();
        assert_eq!(slice.as_str(), Some("world"));
        assert_eq!(slice.as_ptr(), buf[6..].as_ptr());
        assert!(ByteSlice::view(&buf, 6, 6).is_none());
        assert!(ByteSlice::view(&buf, usize::MAX, 2).is_none());

        let copy = slice.to_owned_copy();
        assert_eq!(copy, slice);
        assert_ne!(copy.as_ptr(), slice.as_ptr());
    }

    #[test]
    fn nested_values_do_not_cast_to_scalars() {
        let v = Value::Array(vec![Some(Value::Integer(1))]);
        assert!(v.cast_to(LogicalType::Integer).is_err());
        assert_eq!(v.cast_to(LogicalType::Array), Ok(v.clone()));
    }
}
