//! Calibration payloads.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::iov::Iov;

/// A calibration constant/object produced by an algorithm commit.
///
/// The engine never inspects `data`; the digest (SHA-256 of the serialized
/// JSON) identifies the content for bookkeeping and comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub name: String,
    pub data: serde_json::Value,
    pub digest: String,
}

impl Payload {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        let digest = digest_of(&data);
        Self {
            name: name.into(),
            data,
            digest,
        }
    }
}

fn digest_of(data: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// A payload committed by a strategy, tagged with its validity interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedPayload {
    pub iov: Iov,
    pub payload: Payload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_content_same_digest() {
        let a = Payload::new("gains", json!({"channel": 1, "value": 0.5}));
        let b = Payload::new("gains", json!({"channel": 1, "value": 0.5}));
        assert_eq!(a.digest, b.digest);

        let c = Payload::new("gains", json!({"channel": 2, "value": 0.5}));
        assert_ne!(a.digest, c.digest);
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let p = Payload::new("t0", json!(null));
        assert_eq!(p.digest.len(), 64);
        assert!(p.digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
