//! Input validation for node identifiers, locations and outbound radio text.

use crate::meshtastic::NodeId;

/// Largest text payload accepted for a single mesh message.
pub const MAX_TEXT_BYTES: usize = 230;

/// Validation errors with messages suitable for showing to chat users.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid node id '{0}' (expected 8 hex digits, optionally prefixed with '!')")]
    InvalidNodeId(String),

    #[error("latitude {0} out of range [-90, 90]")]
    Latitude(f64),

    #[error("longitude {0} out of range [-180, 180]")]
    Longitude(f64),

    #[error("altitude {0} m out of range [-1000, 50000]")]
    Altitude(f64),

    #[error("message is empty")]
    EmptyMessage,

    #[error("message too long ({len} bytes, maximum {max})")]
    MessageTooLong { len: usize, max: usize },
}

/// Parse a node id written as `!aaaa1111`, `aaaa1111` or `^all`.
pub fn parse_node_id(input: &str) -> Result<NodeId, ValidationError> {
    let s = input.trim();
    if s.eq_ignore_ascii_case("^all") {
        return Ok(NodeId::BROADCAST);
    }
    let hex = s.strip_prefix('!').unwrap_or(s);
    if hex.len() != 8 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidNodeId(input.to_string()));
    }
    u32::from_str_radix(hex, 16)
        .map(NodeId)
        .map_err(|_| ValidationError::InvalidNodeId(input.to_string()))
}

/// Range check for a shared location. Non-finite values fail as well.
pub fn validate_coordinates(lat: f64, lon: f64, alt: f64) -> Result<(), ValidationError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(ValidationError::Latitude(lat));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(ValidationError::Longitude(lon));
    }
    if !(-1000.0..=50000.0).contains(&alt) {
        return Err(ValidationError::Altitude(alt));
    }
    Ok(())
}

pub fn validate_outbound_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    if text.len() > MAX_TEXT_BYTES {
        return Err(ValidationError::MessageTooLong {
            len: text.len(),
            max: MAX_TEXT_BYTES,
        });
    }
    Ok(())
}

/// First `max` characters of `s` (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
