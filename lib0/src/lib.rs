//! Binary encoding primitives shared between the `yrs` CRDT engine and any
//! future wire-compatible implementation: varints, big-endian floats, and
//! the tagged `Any` value used for JSON-like content.
//!
//! This crate carries no CRDT-specific logic; it only knows how to read and
//! write bytes in the format Yjs v1 updates use.

pub mod any;
pub mod decoding;
pub mod encoding;
pub mod error;

pub use any::Any;
pub use decoding::{Cursor, Read};
pub use encoding::{EncoderV1, Write};
pub use error::{Error, Result};
