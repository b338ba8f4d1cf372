//! TimeSig: a digest bound to an instant by a timestamp authority.
//!
//! The authority signs `digest || time_us` where `time_us` is the authority's
//! UTC time in microseconds since the Unix epoch, encoded as a big-endian
//! `i64`. The payload itself never travels with the TimeSig; verifiers must
//! supply the same digest again.

use chrono::{DateTime, Utc};
use hex::ToHex;
use serde::{Deserialize, Serialize};

/// Longest digest accepted for signing (SHA-512 / BLAKE3-512 size).
pub const MAX_DIGEST_LEN: usize = 64;

/// Size of the encoded time suffix in a signed message.
pub const ENCODED_TIME_LEN: usize = 8;

/// A signed timestamp over a caller-held digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSig {
    /// Authority time at signing, microsecond precision.
    pub time: DateTime<Utc>,
    /// Opaque signature bytes (hex in serialized form).
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    /// Identifier of the authority key, when the authority reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_key_id: Option<String>,
}

impl TimeSig {
    pub fn time_us(&self) -> i64 {
        self.time.timestamp_micros()
    }

    /// Lowercase hex rendering of the signature.
    pub fn signature_hex(&self) -> String {
        self.signature.encode_hex::<String>()
    }

    pub fn to_json(&self) -> String {
        // A struct of a timestamp, a string and an optional string always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("invalid TimeSig JSON: {e}"))
    }
}

/// Check that `digest` is something an authority can sign.
pub fn validate_digest(digest: &[u8]) -> Result<(), String> {
    match digest.len() {
        0 => Err("digest is empty".to_string()),
        len if len > MAX_DIGEST_LEN => Err(format!(
            "digest is {len} bytes, at most {MAX_DIGEST_LEN} are accepted"
        )),
        _ => Ok(()),
    }
}

/// Exact byte sequence the authority signs for `digest` at `time`.
pub fn signed_message(digest: &[u8], time: DateTime<Utc>) -> Vec<u8> {
    let mut message = Vec::with_capacity(digest.len() + ENCODED_TIME_LEN);
    message.extend_from_slice(digest);
    message.extend_from_slice(&time.timestamp_micros().to_be_bytes());
    message
}

/// Truncate an instant to the microsecond precision carried in signatures.
pub fn truncate_to_micros(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(time.timestamp_micros()).unwrap_or(time)
}

/// BLAKE3 digest of a payload, for callers without their own hash provider.
pub fn digest_payload(payload: &[u8]) -> [u8; 32] {
    *blake3::hash(payload).as_bytes()
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}
