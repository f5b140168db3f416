//! Versioned, text-safe encoding of namespace snapshots.
//!
//! A context blob is a JSON envelope (`{"version": 1, "variables": {...}}`)
//! encoded as base64 so it can be stored or transmitted anywhere plain text
//! can. Decoding is strict: a corrupt or future-versioned blob is rejected
//! with a descriptive error rather than partially applied.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use codexec_core::{Error, Result};

use crate::contract::{ContextSnapshot, VarMap};

/// Current envelope version.
pub const CONTEXT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ContextEnvelope {
    version: u32,
    variables: VarMap,
}

/// Encode a filtered snapshot as an opaque blob. Never fails: the envelope
/// shape is always serializable, and an empty map encodes to a valid blob.
pub fn encode(variables: VarMap) -> ContextSnapshot {
    let envelope = ContextEnvelope {
        version: CONTEXT_VERSION,
        variables,
    };
    let json = serde_json::to_vec(&envelope).unwrap_or_else(|err| {
        // String-keyed JSON values cannot fail to serialize; guard anyway.
        tracing::warn!(error = %err, "context encode fell back to empty envelope");
        format!("{{\"version\":{CONTEXT_VERSION},\"variables\":{{}}}}").into_bytes()
    });
    ContextSnapshot(BASE64.encode(json))
}

/// Decode a blob back into a variable map.
pub fn decode(blob: &str) -> Result<VarMap> {
    let bytes = BASE64
        .decode(blob.trim())
        .map_err(|err| Error::context(format!("blob is not valid base64: {err}")))?;
    let envelope: ContextEnvelope = serde_json::from_slice(&bytes)
        .map_err(|err| Error::context(format!("blob envelope is malformed: {err}")))?;
    if envelope.version != CONTEXT_VERSION {
        return Err(Error::context(format!(
            "unsupported context version {} (expected {CONTEXT_VERSION})",
            envelope.version
        )));
    }
    Ok(envelope.variables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut variables = VarMap::new();
        variables.insert("x".into(), serde_json::json!(42));
        variables.insert("name".into(), serde_json::json!("ada"));

        let blob = encode(variables.clone());
        let decoded = decode(blob.as_str()).unwrap();
        assert_eq!(decoded, variables);
    }

    #[test]
    fn empty_namespace_encodes_to_valid_blob() {
        let blob = encode(VarMap::new());
        assert!(decode(blob.as_str()).unwrap().is_empty());
    }

    #[test]
    fn rejects_garbage_and_wrong_version() {
        assert!(decode("not base64 at all!!!").is_err());

        let wrong = BASE64.encode(br#"{"version": 99, "variables": {}}"#);
        assert!(decode(&wrong).is_err());

        let truncated = BASE64.encode(br#"{"version": 1, "vari"#);
        assert!(decode(&truncated).is_err());
    }
}
