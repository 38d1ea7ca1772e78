//! Callback execution with bounded optimistic-concurrency retry.

use std::sync::Arc;

use tracing::{debug, warn};

use super::handle::{Transaction, TransactionMode};
use crate::config::RetryPolicy;
use crate::error::Error;
use crate::storage::Backend;

/// States of a read-write attempt.
///
/// `Started -> Committing -> Committed`, or `Conflict -> Started` while
/// attempts remain, or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// Callback is running in a fresh transaction.
    Started,
    /// Callback returned; writes are being committed.
    Committing,
    /// Writes are durable.
    Committed,
    /// Data changed between read and commit.
    Conflict,
    /// Non-conflict error or retries exhausted.
    Failed,
}

impl std::fmt::Display for WriteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteState::Started => write!(f, "started"),
            WriteState::Committing => write!(f, "committing"),
            WriteState::Committed => write!(f, "committed"),
            WriteState::Conflict => write!(f, "conflict"),
            WriteState::Failed => write!(f, "failed"),
        }
    }
}

/// Runs callbacks inside transactions.
///
/// Read-write callbacks may run more than once. Any effect they have outside
/// the transaction must be idempotent; the runner cannot detect violations.
#[derive(Clone)]
pub struct TransactionRunner {
    backend: Arc<dyn Backend>,
    policy: RetryPolicy,
}

impl TransactionRunner {
    /// Create a runner over `backend`.
    pub fn new(backend: Arc<dyn Backend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// The retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// The backend transactions are opened on.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Run `f` in a single read-only transaction. Never retried.
    pub fn run_read_only<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Transaction) -> Result<T, Error>,
    {
        let mut txn = self.backend.begin_read_only()?;
        let result = f(&mut txn);
        self.backend.rollback(txn);
        result
    }

    /// Run `f` in a read-write transaction and commit.
    ///
    /// Conflicts, whether raised by the callback or by commit, re-run `f` in
    /// a fresh transaction until the policy's attempt bound is reached, which
    /// yields [`Error::TooManyRetries`]. Any other error is returned
    /// unchanged after a single attempt.
    pub fn run_write<T, F>(&self, mut f: F) -> Result<T, Error>
    where
        F: FnMut(&mut Transaction) -> Result<T, Error>,
    {
        let max_attempts = self.policy.max_attempts;
        for attempt in 1..=max_attempts {
            let mut txn = self.backend.begin_read_write()?;
            txn.set_attempt(attempt);
            let txn_id = txn.id();
            debug!(txn = txn_id, attempt, state = %WriteState::Started, "write attempt");

            let value = match f(&mut txn) {
                Ok(value) => value,
                Err(e) if e.is_conflict() => {
                    self.backend.rollback(txn);
                    warn!(txn = txn_id, attempt, state = %WriteState::Conflict, error = %e, "callback conflicted");
                    continue;
                }
                Err(e) => {
                    self.backend.rollback(txn);
                    debug!(txn = txn_id, attempt, state = %WriteState::Failed, error = %e, "callback failed");
                    return Err(e);
                }
            };

            debug!(txn = txn_id, attempt, state = %WriteState::Committing, "committing");
            match self.backend.commit(txn) {
                Ok(()) => {
                    debug!(txn = txn_id, attempt, state = %WriteState::Committed, "committed");
                    return Ok(value);
                }
                Err(e) if e.is_conflict() => {
                    warn!(txn = txn_id, attempt, state = %WriteState::Conflict, error = %e, "commit conflicted");
                }
                Err(e) => {
                    debug!(txn = txn_id, attempt, state = %WriteState::Failed, error = %e, "commit failed");
                    return Err(e);
                }
            }
        }

        warn!(attempts = max_attempts, state = %WriteState::Failed, "retries exhausted");
        Err(Error::TooManyRetries {
            attempts: max_attempts,
        })
    }

    /// Run `f` in `txn` if one is supplied, otherwise in a new transaction of
    /// the given mode.
    ///
    /// A supplied transaction is reused as is: no new transaction is opened
    /// and no retry wrapping happens.
    pub fn with_transaction<T, F>(
        &self,
        mode: TransactionMode,
        txn: Option<&mut Transaction>,
        mut f: F,
    ) -> Result<T, Error>
    where
        F: FnMut(&mut Transaction) -> Result<T, Error>,
    {
        match (txn, mode) {
            (Some(txn), _) => f(txn),
            (None, TransactionMode::ReadOnly) => self.run_read_only(f),
            (None, TransactionMode::ReadWrite) => self.run_write(f),
        }
    }

    /// Read helper: reuse `txn` or open a read-only transaction.
    pub fn transactional_read<T, F>(&self, txn: Option<&mut Transaction>, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Transaction) -> Result<T, Error>,
    {
        match txn {
            Some(txn) => f(txn),
            None => self.run_read_only(f),
        }
    }

    /// Write helper: reuse `txn` or open a retried read-write transaction.
    pub fn transactional_write<T, F>(&self, txn: Option<&mut Transaction>, f: F) -> Result<T, Error>
    where
        F: FnMut(&mut Transaction) -> Result<T, Error>,
    {
        self.with_transaction(TransactionMode::ReadWrite, txn, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::condition::ReadRequest;
    use crate::migration::SchemaUpdate;
    use crate::storage::{DatabaseSchema, Row};
    use crate::transaction::Mutation;
    use crate::value::Value;

    /// Backend whose first `conflicts` commits report a conflict.
    struct FlakyBackend {
        conflicts: u32,
        commits: AtomicU32,
        applied: AtomicU32,
        next_id: AtomicU32,
    }

    impl FlakyBackend {
        fn new(conflicts: u32) -> Self {
            Self {
                conflicts,
                commits: AtomicU32::new(0),
                applied: AtomicU32::new(0),
                next_id: AtomicU32::new(1),
            }
        }
    }

    impl Backend for FlakyBackend {
        fn begin_read_only(&self) -> Result<Transaction, Error> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) as u64;
            Ok(Transaction::new(id, TransactionMode::ReadOnly))
        }

        fn begin_read_write(&self) -> Result<Transaction, Error> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) as u64;
            Ok(Transaction::new(id, TransactionMode::ReadWrite))
        }

        fn execute_query(&self, _: &mut Transaction, _: &ReadRequest) -> Result<Vec<Row>, Error> {
            Ok(Vec::new())
        }

        fn commit(&self, txn: Transaction) -> Result<(), Error> {
            let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.conflicts {
                return Err(Error::Conflict("simulated".into()));
            }
            self.applied
                .fetch_add(txn.mutations().len() as u32, Ordering::SeqCst);
            Ok(())
        }

        fn apply_schema_change(&self, _: &SchemaUpdate) -> Result<(), Error> {
            Ok(())
        }

        fn database_schema(&self) -> Result<DatabaseSchema, Error> {
            Ok(DatabaseSchema::default())
        }
    }

    fn runner(conflicts: u32, max_attempts: u32) -> (Arc<FlakyBackend>, TransactionRunner) {
        let backend = Arc::new(FlakyBackend::new(conflicts));
        let runner = TransactionRunner::new(backend.clone(), RetryPolicy::new(max_attempts));
        (backend, runner)
    }

    fn write(txn: &mut Transaction) -> Result<(), Error> {
        txn.buffer(Mutation::Delete {
            table: "t".into(),
            key: vec![Value::from("a")],
        })
    }

    #[test]
    fn test_commit_conflict_retried_until_success() {
        let (backend, runner) = runner(2, 5);
        let mut calls = 0;
        let result = runner.run_write(|txn| {
            calls += 1;
            write(txn)?;
            Ok(txn.attempt())
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
        assert_eq!(backend.applied.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_conflict_retried_until_success() {
        let (_, runner) = runner(0, 5);
        let mut calls = 0;
        let result = runner.run_write(|_| {
            calls += 1;
            if calls < 4 {
                return Err(Error::Conflict("simulated".into()));
            }
            Ok("done")
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_retries_exhausted() {
        let (backend, runner) = runner(10, 3);
        let mut calls = 0;
        let result = runner.run_write(|txn| {
            calls += 1;
            write(txn)
        });
        assert!(matches!(result, Err(Error::TooManyRetries { attempts: 3 })));
        assert_eq!(calls, 3);
        assert_eq!(backend.applied.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_non_conflict_error_not_retried() {
        let (backend, runner) = runner(0, 5);
        let mut calls = 0;
        let result: Result<(), Error> = runner.run_write(|txn| {
            calls += 1;
            write(txn)?;
            Err(Error::DuplicateKey { table: "t".into() })
        });
        assert!(matches!(result, Err(Error::DuplicateKey { .. })));
        assert_eq!(calls, 1);
        assert_eq!(backend.commits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_read_only_not_retried() {
        let (_, runner) = runner(0, 5);
        let mut calls = 0;
        let result: Result<(), Error> = runner.run_read_only(|txn| {
            calls += 1;
            assert!(txn.is_read_only());
            Err(Error::Conflict("simulated".into()))
        });
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_supplied_transaction_is_reused() {
        let (backend, runner) = runner(0, 5);
        let mut outer = backend.begin_read_write().unwrap();
        let outer_id = outer.id();

        let seen = runner
            .transactional_write(Some(&mut outer), |txn| {
                write(txn)?;
                Ok(txn.id())
            })
            .unwrap();
        assert_eq!(seen, outer_id);
        assert_eq!(backend.commits.load(Ordering::SeqCst), 0);
        assert_eq!(outer.mutations().len(), 1);

        let seen = runner
            .transactional_read(Some(&mut outer), |txn| Ok(txn.id()))
            .unwrap();
        assert_eq!(seen, outer_id);
    }

    #[test]
    fn test_missing_transaction_opens_one() {
        let (backend, runner) = runner(0, 5);
        let mode = runner
            .with_transaction(TransactionMode::ReadOnly, None, |txn| Ok(txn.mode()))
            .unwrap();
        assert_eq!(mode, TransactionMode::ReadOnly);

        runner.transactional_write(None, write).unwrap();
        assert_eq!(backend.commits.load(Ordering::SeqCst), 1);
    }
}
