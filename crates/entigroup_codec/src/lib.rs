//! # entigroup codec
//!
//! Keys and values for a hierarchical key-value store.
//!
//! This crate provides:
//! - [`StoreKey`]: kind, optional parent and numeric-id-or-name identity
//! - [`PropertyValue`]: the store-native property types
//! - Key string encoding with an exact round trip
//!
//! ## Usage
//!
//! ```
//! use entigroup_codec::{decode_key, encode_key, StoreKey};
//!
//! let parent = StoreKey::with_id("Parent", 7).unwrap();
//! let child = parent.child_with_name("Child", "c").unwrap();
//!
//! let encoded = encode_key(&child).unwrap();
//! assert_eq!(decode_key(&encoded).unwrap(), child);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod encoding;
mod error;
mod key;
mod value;

pub use encoding::{decode_key, decode_serialized, encode_key, encode_serialized};
pub use error::{CodecError, CodecResult};
pub use key::{KeyIdentity, StoreKey};
pub use value::PropertyValue;

/// Re-exported so downstream crates name the same timestamp type.
pub use chrono::{DateTime, Utc};
