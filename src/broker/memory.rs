//! In-process broker: key/value entries with passive expiry plus two FIFO lanes.
//!
//! Expiry uses `tokio::time::Instant`, so tests running on a paused clock can
//! advance past TTLs without sleeping. Pop removes the entry immediately; there
//! is no redelivery, since nothing outlives the process anyway.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{Delivery, KeyValueStore, LaneQueue};
use crate::error::{Error, Result};
use crate::model::{JobId, Lane};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    high: VecDeque<(i64, JobId)>,
    default: VecDeque<(i64, JobId)>,
}

impl State {
    fn lane_mut(&mut self, lane: Lane) -> &mut VecDeque<(i64, JobId)> {
        match lane {
            Lane::High => &mut self.high,
            Lane::Default => &mut self.default,
        }
    }

    /// Look up a live entry, dropping it if it has expired.
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }
}

/// Single-process implementation of both [`KeyValueStore`] and [`LaneQueue`].
pub struct MemoryBroker {
    state: Mutex<State>,
    next_receipt: AtomicI64,
    store_up: AtomicBool,
    queue_up: AtomicBool,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_receipt: AtomicI64::new(1),
            store_up: AtomicBool::new(true),
            queue_up: AtomicBool::new(true),
        }
    }

    /// Simulate the key/value store going away (or coming back).
    pub fn set_store_available(&self, up: bool) {
        self.store_up.store(up, Ordering::SeqCst);
    }

    /// Simulate the lane queue going away (or coming back).
    pub fn set_queue_available(&self, up: bool) {
        self.queue_up.store(up, Ordering::SeqCst);
    }

    /// Number of live keys. Test helper.
    pub fn live_keys(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|s| s.entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Other("memory broker lock poisoned".to_string()))
    }

    fn store(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        if !self.store_up.load(Ordering::SeqCst) {
            return Err(Error::ServiceUnavailable("store: connection refused".to_string()));
        }
        self.lock()
    }

    fn queue(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        if !self.queue_up.load(Ordering::SeqCst) {
            return Err(Error::ServiceUnavailable("queue: connection refused".to_string()));
        }
        self.lock()
    }
}

#[async_trait]
impl KeyValueStore for MemoryBroker {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.store()?;
        if state.live(key, now).is_some() {
            return Ok(false);
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut state = self.store()?;
        Ok(state.live(key, now).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let now = Instant::now();
        let mut state = self.store()?;
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.store()?;
        let unchanged = state.live(key, now).is_some_and(|e| e.value == expected);
        if unchanged {
            state.entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: ttl.map(|ttl| now + ttl),
                },
            );
        }
        Ok(unchanged)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.store()?;
        match state.live(key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.store()?;
        let existed = state.live(key, now).is_some();
        state.entries.remove(key);
        Ok(existed)
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.store()?;
        let owned = state.live(key, now).is_some_and(|e| e.value == expected);
        if owned {
            state.entries.remove(key);
        }
        Ok(owned)
    }

    async fn ping(&self) -> Result<()> {
        self.store()?;
        self.queue()?;
        Ok(())
    }
}

#[async_trait]
impl LaneQueue for MemoryBroker {
    async fn push(&self, lane: Lane, job_id: JobId) -> Result<()> {
        let receipt = self.next_receipt.fetch_add(1, Ordering::Relaxed);
        self.queue()?.lane_mut(lane).push_back((receipt, job_id));
        Ok(())
    }

    async fn pop(&self, lane: Lane) -> Result<Option<Delivery>> {
        let popped = self.queue()?.lane_mut(lane).pop_front();
        Ok(popped.map(|(receipt, job_id)| Delivery {
            lane,
            job_id,
            receipt,
        }))
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<()> {
        self.queue()?;
        Ok(())
    }

    async fn pending(&self, lane: Lane) -> Result<u64> {
        Ok(self.queue()?.lane_mut(lane).len() as u64)
    }

    async fn purge(&self, lane: Lane) -> Result<Vec<JobId>> {
        let drained = self.queue()?.lane_mut(lane).drain(..).map(|(_, id)| id).collect();
        Ok(drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_respects_ttl() {
        let broker = MemoryBroker::new();
        assert!(broker.set_if_absent("k", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!broker.set_if_absent("k", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(broker.get("k").await.unwrap().as_deref(), Some("a"));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(broker.get("k").await.unwrap(), None);
        assert!(broker.set_if_absent("k", "b", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn delete_if_eq_only_removes_matching_owner() {
        let broker = MemoryBroker::new();
        broker.set("k", "owner-1", None).await.unwrap();
        assert!(!broker.delete_if_eq("k", "owner-2").await.unwrap());
        assert!(broker.delete_if_eq("k", "owner-1").await.unwrap());
        assert!(!broker.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_swap_needs_unchanged_value() {
        let broker = MemoryBroker::new();
        assert!(!broker.compare_and_swap("k", "a", "b", None).await.unwrap());
        broker.set("k", "a", None).await.unwrap();
        assert!(broker.compare_and_swap("k", "a", "b", None).await.unwrap());
        assert!(!broker.compare_and_swap("k", "a", "c", None).await.unwrap());
        assert_eq!(broker.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn lanes_are_fifo() {
        let broker = MemoryBroker::new();
        let (a, b) = (JobId::new(), JobId::new());
        broker.push(Lane::Default, a).await.unwrap();
        broker.push(Lane::Default, b).await.unwrap();
        assert_eq!(broker.pending(Lane::Default).await.unwrap(), 2);
        assert_eq!(broker.pop(Lane::Default).await.unwrap().unwrap().job_id, a);
        assert_eq!(broker.pop(Lane::Default).await.unwrap().unwrap().job_id, b);
        assert!(broker.pop(Lane::Default).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unavailable_store_fails_loudly() {
        let broker = MemoryBroker::new();
        broker.set_store_available(false);
        let err = broker.get("k").await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
    }
}
