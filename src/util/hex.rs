//! # Hex Encoding/Decoding Utilities
//!
//! Hex helpers used for transport logging, version-string assembly and test
//! frame construction.
//!
//! ## Usage
//!
//! ```rust
//! use m6e_rs::util::hex::{encode_hex, decode_hex};
//!
//! let data = [0xFF, 0x00, 0x03];
//! let hex_str = encode_hex(&data);
//! assert_eq!(hex_str, "ff0003");
//!
//! let decoded = decode_hex(&hex_str).unwrap();
//! assert_eq!(decoded, data);
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to lowercase hex string
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Encode bytes to uppercase hex string
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode hex string to bytes
///
/// Accepts both uppercase and lowercase hex characters.
/// Whitespace is automatically stripped.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    if hex_str.is_empty() {
        return Err(HexError::EmptyString);
    }

    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Format hex data for compact display (useful for transport logs)
///
/// Formats data as "ff 00 03" with spaces between bytes.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format a four-byte field as dotted hex pairs, e.g. "01.0b.01.0e".
///
/// The module reports bootloader, hardware and firmware versions as four
/// opaque bytes; this is their conventional display form.
pub fn hex_dotted_quad(quad: &[u8; 4]) -> String {
    format!(
        "{:02x}.{:02x}.{:02x}.{:02x}",
        quad[0], quad[1], quad[2], quad[3]
    )
}

/// Helper for creating test data from hex strings
///
/// Panics on invalid hex (intended for test code only).
pub fn hex_to_bytes(hex: &str) -> Vec<u8> {
    decode_hex(hex).expect("Invalid hex in test data")
}
