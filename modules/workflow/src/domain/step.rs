use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;

use rollcall_db::{DataBackendRef, SecureBackend};
use rollcall_security::CallerContext;

use crate::domain::error::StepError;

pub type StepFuture<T> = BoxFuture<'static, Result<T, StepError>>;

type ExecuteFn = Arc<dyn Fn(StepContext) -> StepFuture<Value> + Send + Sync>;
type CompensateFn = Arc<dyn Fn(StepContext, Value) -> StepFuture<()> + Send + Sync>;

/// What a step sees while it runs.
///
/// `results` is a snapshot of the values captured by the steps that completed
/// before this one, keyed by step name.
#[derive(Clone)]
pub struct StepContext {
    transaction_id: Uuid,
    caller: CallerContext,
    db: SecureBackend,
    results: Arc<BTreeMap<String, Value>>,
}

impl StepContext {
    pub(crate) fn new(
        transaction_id: Uuid,
        caller: CallerContext,
        db: SecureBackend,
        results: Arc<BTreeMap<String, Value>>,
    ) -> Self {
        Self {
            transaction_id,
            caller,
            db,
            results,
        }
    }

    #[must_use]
    pub fn transaction_id(&self) -> Uuid {
        self.transaction_id
    }

    #[must_use]
    pub fn caller(&self) -> &CallerContext {
        &self.caller
    }

    /// Policy-enforcing backend, for steps acting strictly as the caller.
    #[must_use]
    pub fn db(&self) -> &SecureBackend {
        &self.db
    }

    /// Unscoped backend, for cross-caller bookkeeping (capacity reads,
    /// counters, uniqueness checks).
    #[must_use]
    pub fn backend(&self) -> &DataBackendRef {
        self.db.raw()
    }

    #[must_use]
    pub fn result(&self, step: &str) -> Option<&Value> {
        self.results.get(step)
    }

    /// String field `field` of step `step`'s captured result.
    #[must_use]
    pub fn result_str(&self, step: &str, field: &str) -> Option<&str> {
        self.result(step)?.get(field)?.as_str()
    }

    /// Captured result of `step`, or a precondition failure naming it.
    ///
    /// # Errors
    /// Fails when `step` has not recorded a result.
    pub fn require(&self, step: &str) -> Result<&Value, StepError> {
        self.result(step)
            .ok_or_else(|| StepError::precondition(format!("missing result of step '{step}'")))
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("transaction_id", &self.transaction_id)
            .field("caller", &self.caller)
            .field("results", &self.results.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// One named unit of work with an optional undo.
///
/// `compensate` receives the value `execute` returned and only ever runs
/// after `execute` succeeded.
#[derive(Clone)]
pub struct TransactionStep {
    name: String,
    execute: ExecuteFn,
    compensate: Option<CompensateFn>,
}

impl TransactionStep {
    #[must_use]
    pub fn new<F, Fut>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            execute: Arc::new(move |ctx| execute(ctx).boxed()),
            compensate: None,
        }
    }

    #[must_use]
    pub fn with_compensation<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(StepContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.compensate = Some(Arc::new(move |ctx, value| compensate(ctx, value).boxed()));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn has_compensation(&self) -> bool {
        self.compensate.is_some()
    }

    pub(crate) fn execute(&self, ctx: StepContext) -> StepFuture<Value> {
        (self.execute)(ctx)
    }

    pub(crate) fn compensate(&self, ctx: StepContext, value: Value) -> Option<StepFuture<()>> {
        self.compensate.as_ref().map(|f| f(ctx, value))
    }
}

impl fmt::Debug for TransactionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionStep")
            .field("name", &self.name)
            .field("compensable", &self.has_compensation())
            .finish()
    }
}
