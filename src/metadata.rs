//! Configuration bag and typed accessors (§4.2).
//!
//! A [`Metadata`] is an ordered string-to-string mapping plus a `name` and
//! `kind` header. It backs both binding property bags and per-connection
//! source/target metadata.

use std::collections::BTreeMap;

use crate::error::BridgeError;

/// An ordered mapping from lower-case string keys to string values, carrying
/// a `name` and `kind` header for error messages and metrics keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// The binding, source, or target name this bag belongs to.
    pub name: String,
    /// The connector kind (`events`, `queue`, `command`, `query`, `null`).
    pub kind: String,
    properties: BTreeMap<String, String>,
}

impl Metadata {
    /// Build a metadata bag from a name, kind, and property map.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>, properties: BTreeMap<String, String>) -> Self {
        Self { name: name.into(), kind: kind.into(), properties }
    }

    /// Build an empty metadata bag, useful in tests.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Insert or overwrite a key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    fn raw(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Parse a string value, falling back to `default` when the key is
    /// absent.
    #[must_use]
    pub fn parse_string(&self, key: &str, default: &str) -> String {
        self.raw(key).filter(|v| !v.is_empty()).unwrap_or(default).to_string()
    }

    /// Parse a string value, failing with [`BridgeError::MissingRequiredKey`]
    /// when absent or empty.
    ///
    /// # Errors
    /// Returns an error when the key is absent or its value is empty.
    pub fn must_parse_string(&self, key: &str) -> Result<String, BridgeError> {
        match self.raw(key) {
            Some(v) if !v.is_empty() => Ok(v.to_string()),
            _ => Err(BridgeError::MissingRequiredKey { key: key.to_string() }),
        }
    }

    /// Parse an integer value, falling back to `default` when the key is
    /// absent. A present-but-unparseable value is treated as absent (mirrors
    /// the lenient distilled-spec accessor).
    #[must_use]
    pub fn parse_int(&self, key: &str, default: i64) -> i64 {
        self.raw(key).and_then(|v| v.parse::<i64>().ok()).unwrap_or(default)
    }

    /// Parse an integer value, requiring it to lie in `[lo, hi]` inclusive.
    /// Falls back to `default` when absent.
    ///
    /// # Errors
    /// Returns [`BridgeError::OutOfRange`] when present but out of bounds, or
    /// when it fails to parse as an integer at all.
    pub fn parse_int_with_range(&self, key: &str, default: i64, lo: i64, hi: i64) -> Result<i64, BridgeError> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => {
                let parsed = v.parse::<i64>().map_err(|_| BridgeError::OutOfRange {
                    key: key.to_string(),
                    value: i64::MIN,
                    lo,
                    hi,
                })?;
                if parsed < lo || parsed > hi {
                    return Err(BridgeError::OutOfRange { key: key.to_string(), value: parsed, lo, hi });
                }
                Ok(parsed)
            }
        }
    }

    /// Like [`Metadata::parse_int_with_range`] but fails when the key is
    /// absent entirely.
    ///
    /// # Errors
    /// Returns an error when absent, unparseable, or out of bounds.
    pub fn must_parse_int_with_range(&self, key: &str, lo: i64, hi: i64) -> Result<i64, BridgeError> {
        let raw = self.raw(key).ok_or_else(|| BridgeError::MissingRequiredKey { key: key.to_string() })?;
        let parsed = raw
            .parse::<i64>()
            .map_err(|_| BridgeError::OutOfRange { key: key.to_string(), value: i64::MIN, lo, hi })?;
        if parsed < lo || parsed > hi {
            return Err(BridgeError::OutOfRange { key: key.to_string(), value: parsed, lo, hi });
        }
        Ok(parsed)
    }

    /// Parse a boolean, accepting case-insensitive `true|false|1|0|yes|no`.
    /// Falls back to `default` when absent or unrecognized.
    #[must_use]
    pub fn parse_bool(&self, key: &str, default: bool) -> bool {
        match self.raw(key).map(str::to_ascii_lowercase).as_deref() {
            Some("true" | "1" | "yes") => true,
            Some("false" | "0" | "no") => false,
            _ => default,
        }
    }

    /// Parse a `host:port` address, splitting on the final `:`. Falls back to
    /// `default` when the key is absent.
    ///
    /// # Errors
    /// Returns [`BridgeError::ConfigInvalid`] when the value is present but
    /// malformed (empty host, non-integer port, or port outside
    /// `[1, 65535]`).
    pub fn must_parse_address(&self, key: &str, default: &str) -> Result<(String, u16), BridgeError> {
        let raw = self.raw(key).filter(|v| !v.is_empty()).unwrap_or(default);
        let (host, port_str) = raw
            .rsplit_once(':')
            .ok_or_else(|| BridgeError::ConfigInvalid(format!("address {key}={raw} missing ':'")))?;
        if host.is_empty() {
            return Err(BridgeError::ConfigInvalid(format!("address {key}={raw} has empty host")));
        }
        let port: u32 = port_str
            .parse()
            .map_err(|_| BridgeError::ConfigInvalid(format!("address {key}={raw} has non-integer port")))?;
        if port < 1 || port > 65535 {
            return Err(BridgeError::ConfigInvalid(format!("address {key}={raw} port out of range")));
        }
        Ok((host.to_string(), port as u16))
    }
}
