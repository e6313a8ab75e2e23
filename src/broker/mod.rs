//! The two shared resources every process coordinates through.
//!
//! [`KeyValueStore`] provides conditional set with TTL, compare-and-delete,
//! and passive expiry. [`LaneQueue`] provides per-lane FIFO push and atomic pop.
//! Nothing above this module uses in-process locks for cross-job coordination:
//! all of it goes through these primitives, because other API and worker
//! processes share the same store.
//!
//! Two implementations exist: [`memory::MemoryBroker`] (single process, used by
//! tests and `laneq dev`) and [`crate::db::Db`] (Postgres + pgmq).

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{JobId, Lane};

/// Key/value store with TTL support.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Set `key` only if it is absent or expired. Returns true if this call wrote it.
    ///
    /// This is the single must-be-atomic step of admission: two concurrent
    /// callers for the same key must never both get `true`.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Read a live (unexpired) value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditionally write `key`. `None` means no expiry; an existing TTL is cleared.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Replace a live value only while it still equals `expected`. Returns
    /// false, writing nothing, if the key changed or is gone.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool>;

    /// Reset the TTL of a live key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remove `key`. Absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove `key` only while it still holds `expected`.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool>;

    /// Connectivity check.
    async fn ping(&self) -> Result<()>;

    /// Release connections. Further calls may fail.
    async fn close(&self) {}
}

/// A message popped from a lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub lane: Lane,
    pub job_id: JobId,
    /// Backend-specific handle used to acknowledge the message.
    pub receipt: i64,
}

/// FIFO-per-lane queue with atomic pop.
#[async_trait]
pub trait LaneQueue: Send + Sync {
    async fn push(&self, lane: Lane, job_id: JobId) -> Result<()>;

    /// Pop the oldest waiting entry of one lane. Each entry is delivered to
    /// exactly one caller until it is acknowledged or its visibility lapses.
    async fn pop(&self, lane: Lane) -> Result<Option<Delivery>>;

    /// Acknowledge a delivery after its job reached a terminal state.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Number of entries still waiting (not yet popped).
    async fn pending(&self, lane: Lane) -> Result<u64>;

    /// Remove every waiting entry of a lane and return the job ids removed.
    /// Entries already popped by a worker are untouched.
    async fn purge(&self, lane: Lane) -> Result<Vec<JobId>>;

    async fn close(&self) {}
}

/// Injected handle to both shared resources.
///
/// Opened once at process start and closed at shutdown. Cheap to clone.
#[derive(Clone)]
pub struct Broker {
    pub store: Arc<dyn KeyValueStore>,
    pub lanes: Arc<dyn LaneQueue>,
}

impl Broker {
    pub fn new(store: Arc<dyn KeyValueStore>, lanes: Arc<dyn LaneQueue>) -> Self {
        Self { store, lanes }
    }

    /// A broker whose store and lanes are both backed by one object.
    pub fn shared<B>(backend: Arc<B>) -> Self
    where
        B: KeyValueStore + LaneQueue + 'static,
    {
        Self {
            store: backend.clone(),
            lanes: backend,
        }
    }

    pub async fn close(&self) {
        self.lanes.close().await;
        self.store.close().await;
    }
}
