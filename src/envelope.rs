//! Envelope value objects and their wire codec (§4.1, §6).
//!
//! The wire format is a compact, self-describing record with four fields in
//! canonical alphabetic order: `data`, `error`, `executed`, `metadata`.
//! Declaring the struct fields in that order is enough to make
//! [`serde_json`]'s default (declaration-order) serialization canonical,
//! without reaching for a `BTreeMap`-backed intermediate representation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// An inbound message parsed from a source, or an outbound call built for a
/// target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Opaque payload bytes, carried verbatim. Serialized as a JSON array of
    /// byte values rather than a text encoding, so arbitrary binary payloads
    /// round-trip without needing an escape scheme of our own.
    pub data: Vec<u8>,
    /// Application-defined routing/correlation headers.
    pub metadata: BTreeMap<String, String>,
}

/// The result of a target's `do_call`, or the value a source sends back on
/// an RPC pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Opaque payload bytes, carried verbatim.
    pub data: Vec<u8>,
    /// Empty on success; carries a human-readable message on failure.
    pub error: String,
    /// Whether the target actually ran (`false` only for fast-fail paths
    /// that never dispatched).
    pub executed: bool,
    /// Application-defined routing/correlation headers.
    pub metadata: BTreeMap<String, String>,
}

impl Request {
    /// Build an empty request (`{metadata:{}, data:""}`).
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, metadata: BTreeMap::new() }
    }

    /// Parse a request from its wire representation.
    ///
    /// # Errors
    /// Returns [`BridgeError::MalformedEnvelope`] when `bytes` is not a valid
    /// record in this format.
    pub fn parse(bytes: &[u8]) -> Result<Self, BridgeError> {
        serde_json::from_slice(bytes).map_err(|e| BridgeError::MalformedEnvelope(e.to_string()))
    }

    /// Serialize to the canonical wire representation. Total: never fails.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        // Field declaration order is already alphabetic; `serde_json`
        // preserves struct field order for non-self-describing maps.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

impl Response {
    /// Build a successful, executed response carrying `data`.
    #[must_use]
    pub fn success(data: Vec<u8>) -> Self {
        Self { data, error: String::new(), executed: true, metadata: BTreeMap::new() }
    }

    /// Build a failure response that was never executed.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self { data: Vec::new(), error: error.into(), executed: false, metadata: BTreeMap::new() }
    }

    /// `true` when `error` is empty.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }

    /// Parse a response from its wire representation.
    ///
    /// # Errors
    /// Returns [`BridgeError::MalformedEnvelope`] when `bytes` is not a valid
    /// record in this format.
    pub fn parse(bytes: &[u8]) -> Result<Self, BridgeError> {
        serde_json::from_slice(bytes).map_err(|e| BridgeError::MalformedEnvelope(e.to_string()))
    }

    /// Serialize to the canonical wire representation. Total: never fails.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_with_empty_data_and_metadata() {
        let req = Request::new(Vec::new());
        let bytes = req.serialize();
        let parsed = Request::parse(&bytes).unwrap();
        assert_eq!(req, parsed);
    }

    #[test]
    fn request_round_trips_arbitrary_bytes_and_metadata() {
        let mut req = Request::new(vec![0, 1, 2, 255, 254, b'"', b'\\']);
        req.metadata.insert("correlation-id".to_string(), "abc-123".to_string());
        let bytes = req.serialize();
        let parsed = Request::parse(&bytes).unwrap();
        assert_eq!(req, parsed);
    }

    #[test]
    fn response_round_trips_success_and_failure() {
        let resp = Response::success(b"hello".to_vec());
        let parsed = Response::parse(&resp.serialize()).unwrap();
        assert_eq!(resp, parsed);
        assert!(parsed.is_success());

        let resp = Response::failure("boom");
        let parsed = Response::parse(&resp.serialize()).unwrap();
        assert_eq!(resp, parsed);
        assert!(!parsed.is_success());
    }

    #[test]
    fn parse_rejects_malformed_bytes() {
        assert!(Request::parse(b"not json").is_err());
    }

    #[test]
    fn serialized_field_order_is_alphabetic() {
        let resp = Response::success(b"x".to_vec());
        let text = String::from_utf8(resp.serialize()).unwrap();
        let data_pos = text.find("\"data\"").unwrap();
        let error_pos = text.find("\"error\"").unwrap();
        let executed_pos = text.find("\"executed\"").unwrap();
        let metadata_pos = text.find("\"metadata\"").unwrap();
        assert!(data_pos < error_pos && error_pos < executed_pos && executed_pos < metadata_pos);
    }
}
