//! Saga executor.
//!
//! Runs the steps of a [`TransactionDefinition`] in order against the data
//! backend. On the first failing step, every completed step is compensated in
//! exact reverse order; a failing compensation is recorded and the unwind
//! carries on with the earlier steps.
//!
//! Each transaction runs on its own task, registered in the active set until
//! it reaches a terminal status. Dropping the future returned by
//! [`Orchestrator::execute`] does not strand a half-applied transaction.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use rollcall_db::{BatchOutcome, BatchProgress, Record, SecureBackend, insert_batch};
use rollcall_errors::HasErrorKind;
use rollcall_security::{CallerContext, Operation};

use crate::domain::error::{StepError, WorkflowError};
use crate::domain::step::{StepContext, StepFuture};
use crate::domain::transaction::{
    CompensationFailure, TransactionDefinition, TransactionFailure, TransactionResult,
    TransactionSnapshot, TransactionStatus,
};

pub const DEFAULT_CHUNK_SIZE: usize = 100;

struct Progress {
    status: TransactionStatus,
    current_step: Option<String>,
    steps_completed: usize,
}

struct ActiveTransaction {
    name: String,
    started_at: DateTime<Utc>,
    total_steps: usize,
    progress: Arc<Mutex<Progress>>,
    cancel: CancellationToken,
    done: watch::Receiver<Option<TransactionResult>>,
}

impl ActiveTransaction {
    fn snapshot(&self, id: Uuid) -> TransactionSnapshot {
        let progress = self.progress.lock();
        TransactionSnapshot {
            transaction_id: id,
            name: self.name.clone(),
            status: progress.status,
            current_step: progress.current_step.clone(),
            steps_completed: progress.steps_completed,
            total_steps: self.total_steps,
            started_at: self.started_at,
            rollback_requested: self.cancel.is_cancelled(),
        }
    }
}

type Registry = DashMap<Uuid, ActiveTransaction>;

/// Removes the transaction from the active set however its task ends.
struct RegistryGuard {
    registry: Arc<Registry>,
    id: Uuid,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    partially_rolled_back: AtomicU64,
}

impl Counters {
    fn record(&self, status: TransactionStatus) {
        let counter = match status {
            TransactionStatus::Committed => &self.committed,
            TransactionStatus::RolledBack => &self.rolled_back,
            TransactionStatus::PartiallyRolledBack => &self.partially_rolled_back,
            TransactionStatus::Pending | TransactionStatus::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counts since the orchestrator was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub active: usize,
    pub started: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub partially_rolled_back: u64,
}

#[derive(Clone)]
pub struct Orchestrator {
    db: SecureBackend,
    registry: Arc<Registry>,
    counters: Arc<Counters>,
    chunk_size: usize,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("active", &self.registry.len())
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(db: SecureBackend) -> Self {
        Self {
            db,
            registry: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Rows per backend round trip for [`Self::bulk_insert`].
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn db(&self) -> &SecureBackend {
        &self.db
    }

    /// Authorize, then run `definition` to a terminal status.
    ///
    /// A panicking step or compensation is reported like a failing one.
    ///
    /// # Errors
    /// Only refusals before the first step: [`WorkflowError::InvalidDefinition`],
    /// [`WorkflowError::PermissionDenied`], or [`WorkflowError::Internal`] if the
    /// saga task itself was aborted. Step failures are reported in the result.
    pub async fn execute(
        &self,
        ctx: &CallerContext,
        definition: TransactionDefinition,
    ) -> Result<TransactionResult, WorkflowError> {
        definition.validate()?;
        self.db
            .authorize(ctx, &definition.table, definition.operation)?;

        let id = Uuid::new_v4();
        let progress = Arc::new(Mutex::new(Progress {
            status: TransactionStatus::Pending,
            current_step: None,
            steps_completed: 0,
        }));
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);

        self.registry.insert(
            id,
            ActiveTransaction {
                name: definition.name.clone(),
                started_at: Utc::now(),
                total_steps: definition.steps.len(),
                progress: Arc::clone(&progress),
                cancel: cancel.clone(),
                done: done_rx,
            },
        );
        self.counters.started.fetch_add(1, Ordering::Relaxed);

        let span = tracing::info_span!(
            "saga",
            name = %definition.name,
            transaction_id = %id,
            role = %ctx.role()
        );
        let run = SagaRun {
            id,
            caller: ctx.clone(),
            db: self.db.clone(),
            definition,
            progress,
            cancel,
        };
        let guard = RegistryGuard {
            registry: Arc::clone(&self.registry),
            id,
        };
        let counters = Arc::clone(&self.counters);

        let handle = tokio::spawn(
            async move {
                let result = run.run().await;
                counters.record(result.status);
                drop(guard);
                done_tx.send_replace(Some(result.clone()));
                result
            }
            .instrument(span),
        );

        handle
            .await
            .map_err(|e| WorkflowError::Internal(format!("saga task failed: {e}")))
    }

    /// Force-unwind a running transaction.
    ///
    /// A step already in flight is allowed to finish and is then compensated
    /// along with the others.
    ///
    /// # Errors
    /// [`WorkflowError::UnknownTransaction`] when `id` is not active.
    pub async fn emergency_rollback(&self, id: Uuid) -> Result<TransactionResult, WorkflowError> {
        let (cancel, mut done) = {
            let entry = self
                .registry
                .get(&id)
                .ok_or(WorkflowError::UnknownTransaction(id))?;
            (entry.cancel.clone(), entry.done.clone())
        };
        warn!(transaction_id = %id, "emergency rollback requested");
        cancel.cancel();

        let finished = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| WorkflowError::Internal(format!("transaction {id} ended without a result")))?;
        finished
            .clone()
            .ok_or_else(|| WorkflowError::Internal(format!("transaction {id} ended without a result")))
    }

    /// Force-unwind every active transaction; used on shutdown.
    pub async fn emergency_rollback_all(&self) -> Vec<TransactionResult> {
        let ids: Vec<Uuid> = self.registry.iter().map(|e| *e.key()).collect();
        if ids.is_empty() {
            return Vec::new();
        }
        warn!(count = ids.len(), "rolling back all active transactions");
        let outcomes =
            futures::future::join_all(ids.into_iter().map(|id| self.emergency_rollback(id))).await;
        outcomes.into_iter().filter_map(Result::ok).collect()
    }

    #[must_use]
    pub fn status(&self, id: Uuid) -> Option<TransactionSnapshot> {
        self.registry.get(&id).map(|e| e.snapshot(id))
    }

    #[must_use]
    pub fn active_transactions(&self) -> Vec<TransactionSnapshot> {
        self.registry
            .iter()
            .map(|e| e.value().snapshot(*e.key()))
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            active: self.registry.len(),
            started: self.counters.started.load(Ordering::Relaxed),
            committed: self.counters.committed.load(Ordering::Relaxed),
            rolled_back: self.counters.rolled_back.load(Ordering::Relaxed),
            partially_rolled_back: self.counters.partially_rolled_back.load(Ordering::Relaxed),
        }
    }

    /// Authorize `(table, Insert)` and write `rows` in chunks.
    ///
    /// # Errors
    /// [`WorkflowError::PermissionDenied`] before any write, or
    /// [`WorkflowError::Batch`] when a chunk fails.
    pub async fn bulk_insert<F>(
        &self,
        ctx: &CallerContext,
        table: &str,
        rows: Vec<Record>,
        on_progress: F,
    ) -> Result<BatchOutcome, WorkflowError>
    where
        F: FnMut(BatchProgress) + Send,
    {
        self.db.authorize(ctx, table, Operation::Insert)?;
        info!(table, rows = rows.len(), chunk_size = self.chunk_size, "bulk insert");
        Ok(insert_batch(self.db.raw().as_ref(), table, rows, self.chunk_size, on_progress).await?)
    }
}

struct SagaRun {
    id: Uuid,
    caller: CallerContext,
    db: SecureBackend,
    definition: TransactionDefinition,
    progress: Arc<Mutex<Progress>>,
    cancel: CancellationToken,
}

impl SagaRun {
    fn context(&self, results: &Arc<BTreeMap<String, Value>>) -> StepContext {
        StepContext::new(
            self.id,
            self.caller.clone(),
            self.db.clone(),
            Arc::clone(results),
        )
    }

    fn set_current(&self, step: Option<&str>) {
        self.progress.lock().current_step = step.map(str::to_owned);
    }

    async fn run(self) -> TransactionResult {
        let total_steps = self.definition.steps.len();
        self.progress.lock().status = TransactionStatus::Running;
        info!(steps = total_steps, "transaction started");

        let mut results: BTreeMap<String, Value> = BTreeMap::new();
        let mut completed: Vec<(usize, Value)> = Vec::with_capacity(total_steps);
        let mut failure = None;

        for (index, step) in self.definition.steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                failure = Some(TransactionFailure::emergency());
                break;
            }
            self.set_current(Some(step.name()));
            debug!(step = step.name(), index, "executing step");

            let ctx = self.context(&Arc::new(results.clone()));
            match guarded(|| step.execute(ctx)).await {
                Ok(value) => {
                    results.insert(step.name().to_owned(), value.clone());
                    completed.push((index, value));
                    self.progress.lock().steps_completed = completed.len();
                }
                Err(err) => {
                    warn!(step = step.name(), kind = ?err.kind(), error = %err, "step failed, unwinding");
                    failure = Some(TransactionFailure::from_step(step.name(), &err));
                    break;
                }
            }
        }
        if failure.is_none() && self.cancel.is_cancelled() {
            failure = Some(TransactionFailure::emergency());
        }

        let steps_completed = completed.len();
        let Some(failure) = failure else {
            self.progress.lock().status = TransactionStatus::Committed;
            info!(steps = steps_completed, "transaction committed");
            return TransactionResult {
                transaction_id: self.id,
                name: self.definition.name.clone(),
                status: TransactionStatus::Committed,
                success: true,
                results,
                error: None,
                compensation_failures: Vec::new(),
                steps_completed,
                total_steps,
                compensated: Vec::new(),
            };
        };

        let (compensated, compensation_failures) = self.unwind(completed, &results).await;
        let status = if compensation_failures.is_empty() {
            TransactionStatus::RolledBack
        } else {
            TransactionStatus::PartiallyRolledBack
        };
        self.progress.lock().status = status;
        if compensation_failures.is_empty() {
            info!(steps = steps_completed, "transaction rolled back");
        } else {
            error!(
                steps = steps_completed,
                failed_compensations = compensation_failures.len(),
                "transaction partially rolled back; manual remediation required"
            );
        }

        TransactionResult {
            transaction_id: self.id,
            name: self.definition.name.clone(),
            status,
            success: false,
            results,
            error: Some(failure),
            compensation_failures,
            steps_completed,
            total_steps,
            compensated,
        }
    }

    /// Compensate `completed` in reverse order, collecting failures.
    async fn unwind(
        &self,
        completed: Vec<(usize, Value)>,
        results: &BTreeMap<String, Value>,
    ) -> (Vec<String>, Vec<CompensationFailure>) {
        let snapshot = Arc::new(results.clone());
        let mut compensated = Vec::new();
        let mut failures = Vec::new();

        for (index, value) in completed.into_iter().rev() {
            let Some(step) = self.definition.steps.get(index) else {
                continue;
            };
            if !step.has_compensation() {
                debug!(step = step.name(), "no compensation");
                continue;
            }
            self.set_current(Some(step.name()));
            let ctx = self.context(&snapshot);
            let undo = || {
                step.compensate(ctx, value)
                    .unwrap_or_else(|| futures::future::ok(()).boxed())
            };
            match guarded(undo).await {
                Ok(()) => {
                    info!(step = step.name(), "step compensated");
                    compensated.push(step.name().to_owned());
                }
                Err(err) => {
                    error!(step = step.name(), error = %err, "compensation failed, continuing unwind");
                    failures.push(CompensationFailure {
                        step: step.name().to_owned(),
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
        }
        self.set_current(None);
        (compensated, failures)
    }
}

/// Run a step future, turning a panic while building or polling it into
/// [`StepError::Panicked`].
async fn guarded<T, F>(make: F) -> Result<T, StepError>
where
    F: FnOnce() -> StepFuture<T>,
{
    let future = std::panic::catch_unwind(AssertUnwindSafe(make))
        .map_err(|payload| StepError::Panicked(panic_message(payload.as_ref())))?;
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(StepError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
