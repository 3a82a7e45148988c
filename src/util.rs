//! Hashing, encoding, time helpers, and input validation.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use sha2::{Digest, Sha256};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
};

use crate::error::{LedgerError, Result};

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Compact JSON used inside every digest preimage.
///
/// `serde_json::Value` keeps object keys sorted, so a value that went through
/// a serialize/deserialize cycle renders to the same bytes.
pub fn canonical_json(value: &serde_json::Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Base64
// ---------------------------------------------------------------------------

pub fn b64_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn b64_decode(s: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s.trim())
        .map_err(|e| LedgerError::InvalidInput(format!("invalid base64: {e}")))
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub fn now_utc_rfc3339() -> String {
    format_rfc3339(OffsetDateTime::now_utc())
}

pub fn format_rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Parse either a plain `YYYY-MM-DD` date (read as midnight UTC) or an
/// RFC 3339 timestamp.
pub fn parse_timestamp(s: &str) -> Result<OffsetDateTime> {
    let s = s.trim();
    if let Ok(t) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(t);
    }
    Date::parse(s, format_description!("[year]-[month]-[day]"))
        .map(|d| d.midnight().assume_utc())
        .map_err(|e| LedgerError::InvalidInput(format!("invalid date '{s}': {e}")))
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Upper bound on batch identifier length, in characters.
pub const MAX_BATCH_ID_LEN: usize = 128;

/// Validate a batch identifier before it becomes a ledger key.  Any
/// non-blank string up to [`MAX_BATCH_ID_LEN`] characters is a valid lot number.
pub fn validate_batch_id(batch_id: &str) -> Result<()> {
    if batch_id.trim().is_empty() {
        return Err(LedgerError::InvalidInput(
            "batch id must not be empty".into(),
        ));
    }
    if batch_id.chars().count() > MAX_BATCH_ID_LEN {
        return Err(LedgerError::InvalidInput(format!(
            "batch id exceeds {MAX_BATCH_ID_LEN} characters"
        )));
    }
    Ok(())
}

/// Reject empty or whitespace-only required fields.
pub fn require_non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LedgerError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Validate that a path is not empty and does not contain null bytes.
pub fn validate_path(p: &Path, label: &str) -> Result<()> {
    let s = p.to_string_lossy();
    if s.is_empty() {
        return Err(LedgerError::InvalidInput(format!("{label} path is empty")));
    }
    if s.contains('\0') {
        return Err(LedgerError::InvalidInput(format!(
            "{label} path contains null byte"
        )));
    }
    Ok(())
}

/// Canonicalize a path if it exists, otherwise return it unchanged.
pub fn canonicalize_if_exists(p: &Path, label: &str) -> Result<PathBuf> {
    validate_path(p, label)?;
    if p.exists() {
        std::fs::canonicalize(p).map_err(|e| {
            LedgerError::InvalidInput(format!("{label} path invalid: {e}"))
        })
    } else {
        Ok(p.to_path_buf())
    }
}

/// Maximum number of rows allowed in CSV inputs.
pub const MAX_CSV_ROWS: usize = 10_000;

// ---------------------------------------------------------------------------
// Version constants (set by build.rs)
// ---------------------------------------------------------------------------

pub const GIT_HASH: &str = env!("MEDLEDGER_GIT_HASH");
pub const BUILD_TS: &str = env!("MEDLEDGER_BUILD_TS");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-line version string for display.
pub fn version_string() -> String {
    format!("MedLedger v{VERSION} (git {GIT_HASH}, built {BUILD_TS})")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of empty string
        let digest = sha256(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sha256_hex_is_lowercase() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let v: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        assert_eq!(canonical_json(&v), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn b64_decode_invalid() {
        assert!(b64_decode("not!!valid!!base64").is_err());
    }

    #[test]
    fn parses_plain_date_as_utc_midnight() {
        let t = parse_timestamp("2030-06-15").unwrap();
        assert_eq!(t.hour(), 0);
        assert_eq!(t.day(), 15);
        assert_eq!(t.offset(), time::UtcOffset::UTC);
    }

    #[test]
    fn parses_rfc3339() {
        let t = parse_timestamp("2030-06-15T12:30:00Z").unwrap();
        assert_eq!(t.hour(), 12);
    }

    #[test]
    fn rejects_garbage_dates() {
        assert!(parse_timestamp("next tuesday").is_err());
        assert!(parse_timestamp("2030-13-40").is_err());
    }

    #[test]
    fn valid_batch_ids() {
        assert!(validate_batch_id("B-001").is_ok());
        assert!(validate_batch_id("LOT_2024.07/A").is_ok());
        assert!(validate_batch_id("X").is_ok());
        assert!(validate_batch_id("LOT 2024 A").is_ok());
        assert!(validate_batch_id("BATCH#7").is_ok());
        assert!(validate_batch_id("Lot-α1").is_ok());
        assert!(validate_batch_id("(A)123").is_ok());
    }

    #[test]
    fn invalid_batch_ids() {
        assert!(validate_batch_id("").is_err());
        assert!(validate_batch_id("   ").is_err());
        assert!(validate_batch_id(&"A".repeat(200)).is_err());
    }

    #[test]
    fn blank_required_field_rejected() {
        assert!(require_non_empty("  ", "name").is_err());
        assert!(require_non_empty("Amoxicillin", "name").is_ok());
    }

    #[test]
    fn version_string_non_empty() {
        assert!(version_string().contains("MedLedger"));
    }
}
