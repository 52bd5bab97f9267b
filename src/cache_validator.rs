use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Envelope stored in the durable cache backend.
///
/// Protects against stale and poisoned entries:
/// 1. Expiry is carried in the entry itself and re-checked on every read,
///    independently of the store's own key TTL
/// 2. A SHA-256 checksum of the payload is stored alongside it
/// 3. Tampered or unparsable entries are rejected and read as absent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope {
    /// The cached payload
    pub data: Value,
    /// Creation time, milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Time to live in milliseconds
    pub ttl: i64,
    /// SHA-256 checksum of the serialized payload (hex encoded)
    pub checksum: String,
}

impl CacheEnvelope {
    pub fn new(data: Value, timestamp: i64, ttl: i64) -> Self {
        let checksum = Self::compute_checksum(&data);
        Self {
            data,
            timestamp,
            ttl,
            checksum,
        }
    }

    fn compute_checksum(data: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns true if the checksum matches, false if tampered
    pub fn is_valid(&self) -> bool {
        Self::compute_checksum(&self.data) == self.checksum
    }

    /// Stale once `now` is past `timestamp + ttl`.
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.timestamp.saturating_add(self.ttl)
    }

    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Deserializes and validates an envelope
    ///
    /// Returns None if the text is not an envelope or the checksum does not match
    pub fn deserialize_and_validate(serialized: &str) -> Option<CacheEnvelope> {
        let entry: CacheEnvelope = serde_json::from_str(serialized).ok()?;

        if entry.is_valid() {
            Some(entry)
        } else {
            tracing::warn!(
                "Cache validation failed: checksum mismatch. Expected: {}, Timestamp: {}",
                entry.checksum,
                entry.timestamp
            );
            None
        }
    }
}
