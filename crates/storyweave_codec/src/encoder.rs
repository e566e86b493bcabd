//! Canonical JSON encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::fmt::Write;

/// Encodes a value to its canonical JSON string.
///
/// Output is deterministic: object keys are emitted in sorted order (the
/// map type guarantees it), there is no whitespace, and numbers have a
/// single stable textual form. Two semantically equal trees therefore
/// produce byte-identical output, which is what hashing and equality
/// comparisons in the diff engine rely on.
///
/// Non-finite floats cannot be represented in JSON; this function maps
/// them to `"null"` to stay infallible for callers that only hash. Use
/// [`CanonicalEncoder::encode`] when non-finite floats must be an error.
pub fn to_canonical_json(value: &Value) -> String {
    let mut encoder = CanonicalEncoder::new();
    // Only non-finite floats can fail; they are emitted as null instead.
    let _ = encoder.encode(value);
    encoder.into_string()
}

/// A canonical JSON encoder.
pub struct CanonicalEncoder {
    buffer: String,
}

impl CanonicalEncoder {
    /// Creates a new encoder.
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Creates a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: String::with_capacity(capacity),
        }
    }

    /// Encodes a value into the internal buffer.
    ///
    /// # Errors
    ///
    /// Returns an error on non-finite floats; `null` is written in their
    /// place so the buffer stays valid JSON either way.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => {
                self.buffer.push_str("null");
                Ok(())
            }
            Value::Bool(b) => {
                self.buffer.push_str(if *b { "true" } else { "false" });
                Ok(())
            }
            Value::Int(n) => {
                let _ = write!(self.buffer, "{n}");
                Ok(())
            }
            Value::Float(f) => self.encode_float(*f),
            Value::Text(s) => {
                self.encode_string(s);
                Ok(())
            }
            Value::Array(items) => {
                self.buffer.push('[');
                let mut result = Ok(());
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.buffer.push(',');
                    }
                    result = result.and(self.encode(item));
                }
                self.buffer.push(']');
                result
            }
            Value::Map(map) => {
                self.buffer.push('{');
                let mut result = Ok(());
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        self.buffer.push(',');
                    }
                    self.encode_string(key);
                    self.buffer.push(':');
                    result = result.and(self.encode(item));
                }
                self.buffer.push('}');
                result
            }
        }
    }

    /// Consumes this encoder and returns the encoded string.
    pub fn into_string(self) -> String {
        self.buffer
    }

    /// Gets a reference to the encoded string.
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    fn encode_float(&mut self, f: f64) -> CodecResult<()> {
        if !f.is_finite() {
            self.buffer.push_str("null");
            return Err(CodecError::NonFiniteFloat);
        }
        // `{:?}` keeps the fractional part for integral floats ("1.0",
        // not "1"), so a float never collides with an integer's encoding.
        let _ = write!(self.buffer, "{f:?}");
        Ok(())
    }

    fn encode_string(&mut self, s: &str) {
        self.buffer.push('"');
        for c in s.chars() {
            match c {
                '"' => self.buffer.push_str("\\\""),
                '\\' => self.buffer.push_str("\\\\"),
                '\n' => self.buffer.push_str("\\n"),
                '\r' => self.buffer.push_str("\\r"),
                '\t' => self.buffer.push_str("\\t"),
                '\u{08}' => self.buffer.push_str("\\b"),
                '\u{0c}' => self.buffer.push_str("\\f"),
                c if (c as u32) < 0x20 => {
                    let _ = write!(self.buffer, "\\u{:04x}", c as u32);
                }
                c => self.buffer.push(c),
            }
        }
        self.buffer.push('"');
    }
}

impl Default for CanonicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (key, item) in map {
                    m.serialize_entry(key, item)?;
                }
                m.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn scalars() {
        assert_eq!(to_canonical_json(&Value::Null), "null");
        assert_eq!(to_canonical_json(&Value::Bool(true)), "true");
        assert_eq!(to_canonical_json(&Value::Bool(false)), "false");
        assert_eq!(to_canonical_json(&Value::Int(42)), "42");
        assert_eq!(to_canonical_json(&Value::Int(-7)), "-7");
    }

    #[test]
    fn float_formatting_is_stable() {
        assert_eq!(to_canonical_json(&Value::Float(1.5)), "1.5");
        // Integral floats keep the fractional part and never collide
        // with the integer encoding.
        assert_eq!(to_canonical_json(&Value::Float(1.0)), "1.0");
        assert_eq!(to_canonical_json(&Value::Float(-0.25)), "-0.25");
    }

    #[test]
    fn non_finite_float_is_an_error() {
        let mut enc = CanonicalEncoder::new();
        assert!(matches!(
            enc.encode(&Value::Float(f64::NAN)),
            Err(CodecError::NonFiniteFloat)
        ));
        let mut enc = CanonicalEncoder::new();
        assert!(enc.encode(&Value::Float(f64::INFINITY)).is_err());
    }

    #[test]
    fn string_escaping() {
        assert_eq!(
            to_canonical_json(&Value::from("a\"b\\c\nd")),
            r#""a\"b\\c\nd""#
        );
        assert_eq!(
            to_canonical_json(&Value::from("\u{01}")),
            "\"\\u0001\""
        );
        // Non-ASCII passes through unescaped.
        assert_eq!(to_canonical_json(&Value::from("привет")), "\"привет\"");
    }

    #[test]
    fn objects_are_sorted_and_compact() {
        let v = Value::object(vec![
            ("zeta", Value::Int(1)),
            ("alpha", Value::Array(vec![Value::Int(1), Value::Int(2)])),
            ("mid", Value::object(vec![("k", Value::Null)])),
        ]);
        assert_eq!(
            to_canonical_json(&v),
            r#"{"alpha":[1,2],"mid":{"k":null},"zeta":1}"#
        );
    }

    #[test]
    fn equal_trees_encode_identically() {
        // Assembled in different insertion orders.
        let a = Value::object(vec![("x", Value::Int(1)), ("y", Value::Int(2))]);
        let b = Value::object(vec![("y", Value::Int(2)), ("x", Value::Int(1))]);
        assert_eq!(to_canonical_json(&a), to_canonical_json(&b));
    }

    #[test]
    fn serde_serialize_matches_shape() {
        let v = Value::object(vec![("a", Value::from("s")), ("b", Value::Float(2.5))]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"a":"s","b":2.5}"#);
    }
}
