//! Action fingerprints
//!
//! The fingerprint covers the resource, the action kind, the payload schema
//! version and the typed parameters. Confidence, model and reasoning are
//! left out so two engines agreeing on the same remediation collide.

use crate::models::{ActionKind, ActionParameters, ActionPayload};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hex characters of the fingerprint carried into the action id
const ACTION_ID_HEX_LEN: usize = 16;

#[derive(Serialize)]
struct FingerprintInput<'a> {
    resource_id: &'a str,
    kind: ActionKind,
    version: u32,
    parameters: &'a ActionParameters,
}

/// Lowercase hex SHA-256 over the canonical JSON of the normalized payload
pub fn compute(resource_id: &str, payload: &ActionPayload) -> String {
    let input = FingerprintInput {
        resource_id,
        kind: payload.kind,
        version: payload.version,
        parameters: &payload.parameters,
    };
    // Serializing a plain struct of strings, numbers and a tagged enum cannot fail
    let canonical = serde_json::to_vec(&input).unwrap_or_default();
    compute_checksum(&canonical)
}

/// Stable action id derived from a fingerprint
pub fn action_id(fingerprint: &str) -> String {
    let end = fingerprint.len().min(ACTION_ID_HEX_LEN);
    format!("act-{}", &fingerprint[..end])
}

/// Id of the `attempt`-th row for a fingerprint; the first attempt keeps the bare id
pub fn attempt_id(fingerprint: &str, attempt: u32) -> String {
    let base = action_id(fingerprint);
    if attempt <= 1 {
        base
    } else {
        format!("{base}-{attempt}")
    }
}

pub(crate) fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
