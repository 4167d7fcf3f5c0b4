//! # Utility Modules
//!
//! Common helpers used throughout the m6e-rs crate: big-endian byte cursors
//! for frame decoding and hex encoding/decoding for display and test data.

pub mod cursor;
pub mod hex;

// Re-export commonly used types and functions
pub use cursor::ByteCursor;
pub use hex::{decode_hex, encode_hex, format_hex_compact, hex_dotted_quad, hex_to_bytes};
