//! Idempotency claims: at most one live job per task fingerprint.
//!
//! A claim is a key/value entry `fingerprint -> job id` with a TTL. It is
//! created by admission with a conditional set (first writer wins) and removed
//! when the owning job reaches any terminal state. If a worker dies before it
//! can release, the TTL is what eventually unblocks the fingerprint.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::broker::KeyValueStore;
use crate::error::{Error, Result};
use crate::model::JobId;

/// Attempts at claim-or-read before giving up. A miss on both sides only
/// happens when the owner releases between our set and our read.
const CLAIM_ATTEMPTS: usize = 3;

/// Deterministic fingerprint for a logical request.
///
/// `task:{task_name}:{16 hex chars}` over the canonical JSON encoding of
/// `{"task", "payload", "duration"}`: object keys sorted at every level, no
/// whitespace. Equal requests hash equally across processes and restarts.
pub fn fingerprint(task_name: &str, material: &Value, duration: u64) -> String {
    let body = canonicalize(&json!({
        "task": task_name,
        "payload": material,
        "duration": duration,
    }))
    .to_string();
    let digest = Sha256::digest(body.as_bytes());
    let hash = hex::encode(digest);
    format!("task:{task_name}:{}", &hash[..16])
}

/// Rebuild `value` with object keys inserted in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Outcome of [`KeyManager::claim_or_owner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller now owns the fingerprint.
    Acquired,
    /// Another live job already owns it.
    Held(JobId),
}

/// Wraps the store's conditional set and delete with claim bookkeeping.
#[derive(Clone)]
pub struct KeyManager {
    store: Arc<dyn KeyValueStore>,
}

impl KeyManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Claim `fingerprint` for `job_id`. True if the caller won.
    pub async fn claim(&self, fingerprint: &str, job_id: JobId, ttl: Duration) -> Result<bool> {
        self.store
            .set_if_absent(fingerprint, &job_id.to_string(), ttl)
            .await
    }

    /// Claim the fingerprint, or report the job that already holds it.
    pub async fn claim_or_owner(
        &self,
        fingerprint: &str,
        job_id: JobId,
        ttl: Duration,
    ) -> Result<Claim> {
        for _ in 0..CLAIM_ATTEMPTS {
            if self.claim(fingerprint, job_id, ttl).await? {
                debug!(fingerprint, %job_id, ttl_secs = ttl.as_secs(), "claim acquired");
                return Ok(Claim::Acquired);
            }
            if let Some(owner) = self.owner(fingerprint).await? {
                return Ok(Claim::Held(owner));
            }
            warn!(fingerprint, "claim released between set and read, retrying");
        }
        Err(Error::Other(format!(
            "could not claim or read owner of {fingerprint}"
        )))
    }

    /// The job currently holding `fingerprint`, if any.
    pub async fn owner(&self, fingerprint: &str) -> Result<Option<JobId>> {
        match self.store.get(fingerprint).await? {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| Error::Other(format!("corrupt claim {fingerprint}: {raw}"))),
            None => Ok(None),
        }
    }

    /// Release `fingerprint` if `job_id` still holds it.
    ///
    /// Idempotent: an absent or expired claim is not an error. A claim that has
    /// since been taken by another job is left alone.
    pub async fn release(&self, fingerprint: &str, job_id: JobId) -> Result<bool> {
        let released = self
            .store
            .delete_if_eq(fingerprint, &job_id.to_string())
            .await?;
        debug!(fingerprint, %job_id, released, "claim release");
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint("long_task", &json!({"b": 1, "a": [1, 2]}), 10);
        let b = fingerprint("long_task", &json!({"a": [1, 2], "b": 1}), 10);
        assert_eq!(a, b);
        assert!(a.starts_with("task:long_task:"));
        assert_eq!(a.len(), "task:long_task:".len() + 16);
    }

    #[test]
    fn fingerprint_separates_tasks_and_durations() {
        let payload = json!({"user_id": 123});
        assert_ne!(
            fingerprint("task_a", &payload, 0),
            fingerprint("task_b", &payload, 0)
        );
        assert_ne!(
            fingerprint("long_task", &payload, 5),
            fingerprint("long_task", &payload, 6)
        );
    }

    #[test]
    fn fingerprint_matches_canonical_encoding() {
        // sha256 of {"duration":0,"payload":{"user_id":123},"task":"task_a"}
        let body = r#"{"duration":0,"payload":{"user_id":123},"task":"task_a"}"#;
        let expected = &hex::encode(Sha256::digest(body.as_bytes()))[..16];
        assert_eq!(
            fingerprint("task_a", &json!({"user_id": 123}), 0),
            format!("task:task_a:{expected}")
        );
    }
}
