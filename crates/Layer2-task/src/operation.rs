//! Operation Ledger - caller-supplied ids make side effects idempotent
//!
//! A repeated id never re-runs its operation: a completed one replays the
//! recorded result, an in-flight one is rejected. Failures release the id so
//! the caller can retry under the same id, and so does an operation whose
//! future is dropped before it finishes.

use chrono::{DateTime, Utc};
use crew_foundation::{Error, JsonCollection, JsonStore, Result};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use tracing::{debug, info, warn};

pub const OPERATIONS_FILE: &str = "operations.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    InFlight,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: String,
    pub kind: String,
    pub state: OperationState,
    #[serde(default)]
    pub result: Option<Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome of claiming an operation id
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// First time this id is seen; the caller runs the operation
    Fresh,
    /// Already completed; here is what it returned
    Replay(Value),
}

pub struct OperationLedger {
    records: JsonCollection<OperationRecord>,
    claim_lock: Mutex<()>,
}

impl OperationLedger {
    /// Load the ledger; in-flight records from a previous process are dropped
    pub fn open(store: JsonStore) -> Result<Self> {
        let records: JsonCollection<OperationRecord> =
            JsonCollection::open(store, OPERATIONS_FILE, "Operation")?;
        for stale in records
            .values()
            .into_iter()
            .filter(|r| r.state == OperationState::InFlight)
        {
            debug!(id = %stale.id, "Dropping interrupted operation");
            records.remove(&stale.id)?;
        }
        Ok(Self {
            records,
            claim_lock: Mutex::new(()),
        })
    }

    pub fn get(&self, id: &str) -> Option<OperationRecord> {
        self.records.get(id)
    }

    /// Claim `id` for an operation of `kind`
    ///
    /// Reusing an id for a different kind of operation is an error.
    pub fn claim(&self, id: &str, kind: &str) -> Result<Claim> {
        let _guard = self.claim_lock.lock();

        if let Some(record) = self.records.get(id) {
            if record.kind != kind {
                return Err(Error::InvalidInput(format!(
                    "Operation id {} was already used for {}",
                    id, record.kind
                )));
            }
            return match record.state {
                OperationState::InFlight => Err(Error::DuplicateOperation(format!(
                    "Operation {} ({}) is already in progress",
                    id, kind
                ))),
                OperationState::Completed => {
                    Ok(Claim::Replay(record.result.unwrap_or(Value::Null)))
                }
            };
        }

        self.records.insert(
            id,
            OperationRecord {
                id: id.to_string(),
                kind: kind.to_string(),
                state: OperationState::InFlight,
                result: None,
                started_at: Utc::now(),
                completed_at: None,
            },
        )?;
        Ok(Claim::Fresh)
    }

    pub fn complete(&self, id: &str, result: Value) -> Result<()> {
        self.records.update(id, |r| {
            r.state = OperationState::Completed;
            r.result = Some(result);
            r.completed_at = Some(Utc::now());
            Ok(())
        })
    }

    pub fn release(&self, id: &str) -> Result<()> {
        self.records.remove(id).map(|_| ())
    }

    /// Run `op` at most once per `id`
    ///
    /// Without an id the operation simply runs.
    pub async fn run<T, F, Fut>(&self, id: Option<&str>, kind: &str, op: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(id) = id else {
            return op().await;
        };

        match self.claim(id, kind)? {
            Claim::Replay(value) => Self::replay(id, kind, value),
            Claim::Fresh => {
                let claim = ClaimGuard::new(self, id);
                let result = op().await;
                claim.finish(result)
            }
        }
    }

    /// Blocking form of [`run`](Self::run) for operations that never await
    pub fn run_sync<T, F>(&self, id: Option<&str>, kind: &str, op: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        let Some(id) = id else {
            return op();
        };

        match self.claim(id, kind)? {
            Claim::Replay(value) => Self::replay(id, kind, value),
            Claim::Fresh => {
                let claim = ClaimGuard::new(self, id);
                claim.finish(op())
            }
        }
    }

    fn replay<T: DeserializeOwned>(id: &str, kind: &str, value: Value) -> Result<T> {
        info!(id, kind, "Replaying completed operation");
        Ok(serde_json::from_value(value)?)
    }

    fn record<T: Serialize>(&self, id: &str, result: Result<T>) -> Result<T> {
        match result {
            Ok(out) => {
                self.complete(id, serde_json::to_value(&out)?)?;
                Ok(out)
            }
            Err(e) => {
                self.release(id)?;
                Err(e)
            }
        }
    }
}

/// Holds a fresh claim; releases the id if dropped before `finish`
struct ClaimGuard<'a> {
    ledger: &'a OperationLedger,
    id: &'a str,
    armed: bool,
}

impl<'a> ClaimGuard<'a> {
    fn new(ledger: &'a OperationLedger, id: &'a str) -> Self {
        Self {
            ledger,
            id,
            armed: true,
        }
    }

    fn finish<T: Serialize>(mut self, result: Result<T>) -> Result<T> {
        self.armed = false;
        self.ledger.record(self.id, result)
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(id = self.id, "Operation abandoned before finishing, releasing id");
        if let Err(e) = self.ledger.release(self.id) {
            warn!(id = self.id, error = %e, "Failed to release operation id");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ledger(dir: &std::path::Path) -> OperationLedger {
        OperationLedger::open(JsonStore::new(dir)).unwrap()
    }

    #[tokio::test]
    async fn test_completed_operation_replays() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let out: u32 = ledger
                .run(Some("op-1"), "project.create", || async {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) + 40)
                })
                .await
                .unwrap();
            assert_eq!(out, 40);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_releases_id() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());

        let first: Result<u32> = ledger
            .run(Some("op-1"), "task.run", || async {
                Err(Error::Internal("boom".into()))
            })
            .await;
        assert!(first.is_err());
        assert!(ledger.get("op-1").is_none());

        let second: u32 = ledger
            .run(Some("op-1"), "task.run", || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(second, 7);
    }

    #[tokio::test]
    async fn test_dropped_operation_releases_id() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            ledger.run(Some("op-1"), "task.run", || {
                std::future::pending::<Result<u32>>()
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(ledger.get("op-1").is_none());

        let second: u32 = ledger
            .run(Some("op-1"), "task.run", || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(second, 2);
    }

    #[test]
    fn test_in_flight_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        assert_eq!(ledger.claim("op-1", "sprint.start").unwrap(), Claim::Fresh);
        let err = ledger.claim("op-1", "sprint.start").unwrap_err();
        assert!(matches!(err, Error::DuplicateOperation(_)));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        ledger.claim("op-1", "task.skip").unwrap();
        ledger.complete("op-1", Value::Null).unwrap();
        assert!(matches!(
            ledger.claim("op-1", "task.retry").unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[test]
    fn test_reopen_drops_in_flight_keeps_completed() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = ledger(dir.path());
            ledger.claim("done", "k").unwrap();
            ledger.complete("done", serde_json::json!({"ok": true})).unwrap();
            ledger.claim("stuck", "k").unwrap();
        }
        let ledger = ledger(dir.path());
        assert!(ledger.get("stuck").is_none());
        assert_eq!(
            ledger.claim("done", "k").unwrap(),
            Claim::Replay(serde_json::json!({"ok": true}))
        );
    }

    #[test]
    fn test_run_sync_replays() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        let calls = AtomicU32::new(0);
        for _ in 0..2 {
            let out: String = ledger
                .run_sync(Some("skip-1"), "task.skip", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("skipped".to_string())
                })
                .unwrap();
            assert_eq!(out, "skipped");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_id_always_runs() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        let calls = AtomicU32::new(0);
        for _ in 0..2 {
            let _: u32 = ledger
                .run(None, "k", || async { Ok(calls.fetch_add(1, Ordering::SeqCst)) })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
