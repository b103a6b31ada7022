//! Idempotency de-duplication.
//!
//! Maps an idempotency key to the outcome of the first execution with that
//! key. Claiming is a single insert-if-absent under one mutex, so of two
//! concurrent calls with the same key exactly one becomes the owner and
//! executes; the other waits for the owner's broadcast outcome. Settled
//! records live for a configurable TTL so duplicate calls observed later
//! (a client retry after a dropped response) do not re-execute side
//! effects.
//!
//! An owner may also vanish without settling (its future dropped when the
//! client disconnects mid-call), so in-flight entries carry their own
//! deadline: once it passes, the key can be re-claimed and the entry is
//! eligible for purging.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::debug;

use crate::domains::capabilities::CallResult;

/// Outcome of claiming a key.
pub enum Claim {
    /// This caller owns the key and must execute, then `settle`.
    Owner,

    /// A live record exists; return its outcome without executing.
    Replay(CallResult),

    /// Another caller is executing right now; await the broadcast.
    Pending(watch::Receiver<Option<CallResult>>),
}

struct Entry {
    tx: watch::Sender<Option<CallResult>>,
    /// When the owner claimed the key; bounds how long an in-flight
    /// entry may block the key without settling.
    claimed_at: Instant,
    /// Set once settled.
    expires_at: Option<Instant>,
}

/// In-memory idempotency record store.
pub struct IdempotencyStore {
    entries: Mutex<HashMap<String, Entry>>,
    record_ttl: Duration,
    inflight_ttl: Duration,
}

impl IdempotencyStore {
    /// Create a store. Settled records expire after `record_ttl`;
    /// in-flight entries whose owner has not settled within
    /// `inflight_ttl` are treated as abandoned.
    pub fn new(record_ttl: Duration, inflight_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            record_ttl,
            inflight_ttl,
        }
    }

    /// Claim a key. At most one concurrent caller per key becomes the
    /// owner while the record is live.
    pub fn claim(&self, key: &str) -> Claim {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(entry) = entries.get(key) {
            let settled = (*entry.tx.borrow()).clone();
            match settled {
                Some(result) => {
                    let expired = entry
                        .expires_at
                        .map(|at| Instant::now() >= at)
                        .unwrap_or(false);
                    if !expired {
                        debug!("Idempotency replay for key {}", key);
                        return Claim::Replay(result);
                    }
                    // Record aged out; fall through and re-own the key.
                }
                None => {
                    if entry.claimed_at.elapsed() < self.inflight_ttl {
                        return Claim::Pending(entry.tx.subscribe());
                    }
                    // The owner vanished without settling; fall through
                    // and re-own the key.
                }
            }
        }

        let (tx, _rx) = watch::channel(None);
        entries.insert(
            key.to_string(),
            Entry {
                tx,
                claimed_at: Instant::now(),
                expires_at: None,
            },
        );
        Claim::Owner
    }

    /// Record the owner's outcome and wake every pending waiter.
    ///
    /// When `retain` is false (transient terminal failures) the record is
    /// dropped immediately after broadcasting, so a later retry may
    /// re-execute; otherwise it lives for the record TTL.
    pub fn settle(&self, key: &str, result: &CallResult, retain: bool) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = entries.get_mut(key) else {
            return;
        };

        // send_replace stores the outcome even when no receiver is
        // currently subscribed; plain send would fail and lose it.
        entry.tx.send_replace(Some(result.clone()));
        if retain {
            entry.expires_at = Some(Instant::now() + self.record_ttl);
        } else {
            entries.remove(key);
        }
    }

    /// Await another caller's outcome. `None` only if the owner vanished
    /// without settling.
    pub async fn wait(mut rx: watch::Receiver<Option<CallResult>>) -> Option<CallResult> {
        loop {
            let settled = (*rx.borrow()).clone();
            if let Some(result) = settled {
                return Some(result);
            }
            if rx.changed().await.is_err() {
                return (*rx.borrow()).clone();
            }
        }
    }

    /// Drop expired settled records and abandoned in-flight entries.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| {
            if entry.tx.borrow().is_some() {
                entry.expires_at.map(|at| now < at).unwrap_or(true)
            } else {
                entry.claimed_at.elapsed() < self.inflight_ttl
            }
        });
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> IdempotencyStore {
        IdempotencyStore::new(Duration::from_secs(60), Duration::from_secs(60))
    }

    #[test]
    fn test_first_claim_owns() {
        let store = store();
        assert!(matches!(store.claim("k1"), Claim::Owner));
    }

    #[test]
    fn test_settled_key_replays() {
        let store = store();
        assert!(matches!(store.claim("k1"), Claim::Owner));
        let result = CallResult::success(json!({"n": 1}));
        store.settle("k1", &result, true);

        match store.claim("k1") {
            Claim::Replay(replayed) => assert_eq!(replayed, result),
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_unretained_settle_allows_reexecution() {
        let store = store();
        assert!(matches!(store.claim("k1"), Claim::Owner));
        store.settle("k1", &CallResult::failure("net down", "TRANSIENT_EXECUTION"), false);
        assert!(matches!(store.claim("k1"), Claim::Owner));
    }

    #[test]
    fn test_expired_record_reowned() {
        let store = IdempotencyStore::new(Duration::ZERO, Duration::from_secs(60));
        assert!(matches!(store.claim("k1"), Claim::Owner));
        store.settle("k1", &CallResult::success(json!(null)), true);
        assert!(matches!(store.claim("k1"), Claim::Owner));
    }

    #[tokio::test]
    async fn test_pending_waiter_receives_outcome() {
        let store = store();
        assert!(matches!(store.claim("k1"), Claim::Owner));

        let rx = match store.claim("k1") {
            Claim::Pending(rx) => rx,
            _ => panic!("expected pending"),
        };

        let result = CallResult::success(json!({"done": true}));
        store.settle("k1", &result, true);

        let received = IdempotencyStore::wait(rx).await.unwrap();
        assert_eq!(received, result);
    }

    #[test]
    fn test_purge_expired() {
        let store = IdempotencyStore::new(Duration::ZERO, Duration::from_secs(60));
        assert!(matches!(store.claim("k1"), Claim::Owner));
        store.settle("k1", &CallResult::success(json!(null)), true);
        assert_eq!(store.purge_expired(), 1);
    }

    #[test]
    fn test_settle_with_dropped_waiter_still_records() {
        let store = store();
        assert!(matches!(store.claim("k1"), Claim::Owner));

        let rx = match store.claim("k1") {
            Claim::Pending(rx) => rx,
            _ => panic!("expected pending"),
        };
        drop(rx);

        let result = CallResult::success(json!({"n": 7}));
        store.settle("k1", &result, true);

        match store.claim("k1") {
            Claim::Replay(replayed) => assert_eq!(replayed, result),
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_abandoned_inflight_key_reowned() {
        let store = IdempotencyStore::new(Duration::from_secs(60), Duration::ZERO);
        assert!(matches!(store.claim("k1"), Claim::Owner));
        // The first owner never settles; its deadline has already passed.
        assert!(matches!(store.claim("k1"), Claim::Owner));
    }

    #[test]
    fn test_purge_drops_abandoned_inflight_entries() {
        let store = IdempotencyStore::new(Duration::from_secs(60), Duration::ZERO);
        assert!(matches!(store.claim("k1"), Claim::Owner));
        assert_eq!(store.purge_expired(), 1);
    }
}
