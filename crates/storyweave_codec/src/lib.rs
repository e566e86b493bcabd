//! # StoryWeaver Codec
//!
//! Canonical JSON encoding and content hashing for StoryWeaver sync.
//!
//! This crate provides deterministic JSON encoding that ensures:
//! - Identical trees produce identical bytes regardless of how they
//!   were assembled
//! - Cross-platform consistency
//! - Stable hashing for change detection and echo detection
//!
//! ## Canonical JSON Rules
//!
//! - Object keys are sorted (the [`Value`] map is ordered by construction)
//! - No whitespace between tokens
//! - Integers in plain decimal, floats in shortest round-trip form with a
//!   forced fractional part
//! - Non-finite floats are an encode error
//! - Non-ASCII text is emitted as-is (UTF-8), control characters escaped
//!
//! ## Usage
//!
//! ```
//! use storyweave_codec::{to_canonical_json, Value};
//!
//! let value = Value::object(vec![
//!     ("b", Value::Int(2)),
//!     ("a", Value::Int(1)),
//! ]);
//! assert_eq!(to_canonical_json(&value), r#"{"a":1,"b":2}"#);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod hash;
mod value;

pub use decoder::from_json_str;
pub use encoder::{to_canonical_json, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use hash::content_hash;
pub use value::Value;
