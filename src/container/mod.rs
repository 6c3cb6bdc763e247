//! On-disk record container.
//!
//! Every record the store writes is a self-validating envelope: magic bytes,
//! a format version, length-prefixed chunks and a trailing checksum. Safe
//! records are additionally kept in two generations so that an interrupted
//! write never destroys the last committed copy.

pub mod checksum;
pub mod deserializer;
pub mod safe_path;
pub mod serializer;

pub use deserializer::Envelope;
pub use safe_path::SafeFile;
pub use serializer::{Serializer, envelope_len};
