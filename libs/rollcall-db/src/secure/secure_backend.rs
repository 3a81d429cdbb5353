//! `SecureBackend`: a [`DataBackend`] wrapper that enforces the access policy
//! on every call.
//!
//! Services receive a `SecureBackend` and pass the [`CallerContext`] per
//! request. Each call authorizes `(role, table, operation)` first; a denied
//! call returns [`ScopeError::Denied`] and never reaches the backend.

use std::sync::Arc;

use uuid::Uuid;

use rollcall_security::{
    AccessDenied, CallerContext, Operation, PolicyEngine, PolicyEngineRef, fields,
};

use crate::backend::{DataBackend, DataBackendRef};
use crate::condition::Condition;
use crate::query::Query;
use crate::record::Record;
use crate::secure::authorize::authorize;
use crate::secure::error::ScopeError;
use crate::secure::select::{Scoped, SecureQuery, SecureQueryExt};

impl SecureQuery<Scoped> {
    /// Execute the query and return all matching rows.
    ///
    /// # Errors
    /// Returns `ScopeError::Backend` if the backend call fails.
    pub async fn all(self, backend: &dyn DataBackend) -> Result<Vec<Record>, ScopeError> {
        Ok(backend.select(&self.inner).await?)
    }

    /// Execute the query and return at most one row.
    ///
    /// # Errors
    /// Returns `ScopeError::Backend` if the backend call fails.
    pub async fn one(self, backend: &dyn DataBackend) -> Result<Option<Record>, ScopeError> {
        let rows = backend.select(&self.inner.limit(1)).await?;
        Ok(rows.into_iter().next())
    }
}

#[derive(Clone)]
pub struct SecureBackend {
    backend: DataBackendRef,
    policy: PolicyEngineRef,
}

impl std::fmt::Debug for SecureBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureBackend").finish_non_exhaustive()
    }
}

impl SecureBackend {
    #[must_use]
    pub fn new(backend: DataBackendRef, policy: PolicyEngineRef) -> Self {
        Self { backend, policy }
    }

    #[must_use]
    pub fn from_parts<B, P>(backend: B, policy: P) -> Self
    where
        B: DataBackend + 'static,
        P: PolicyEngine + 'static,
    {
        Self::new(Arc::new(backend), Arc::new(policy))
    }

    /// The unscoped backend. Callers using it take over responsibility for
    /// authorization.
    #[must_use]
    pub fn raw(&self) -> &DataBackendRef {
        &self.backend
    }

    #[must_use]
    pub fn policy(&self) -> &PolicyEngineRef {
        &self.policy
    }

    /// # Errors
    /// Returns [`AccessDenied`] when the policy refuses the operation.
    pub fn authorize(
        &self,
        ctx: &CallerContext,
        table: &str,
        operation: Operation,
    ) -> Result<(), AccessDenied> {
        authorize(self.policy.as_ref(), ctx, table, operation)
    }

    /// Rows of `query.table` visible to `ctx` that also match `query`.
    ///
    /// # Errors
    /// `Denied` when the caller may not read the table; `Backend` on backend failure.
    pub async fn find(&self, ctx: &CallerContext, query: Query) -> Result<Vec<Record>, ScopeError> {
        self.authorize(ctx, query.table_name(), Operation::Select)?;
        query.secure().scope_with(ctx).all(self.backend.as_ref()).await
    }

    /// # Errors
    /// `Denied` when the caller may not read the table; `Backend` on backend failure.
    pub async fn find_by_id(
        &self,
        ctx: &CallerContext,
        table: &str,
        id: Uuid,
    ) -> Result<Option<Record>, ScopeError> {
        self.authorize(ctx, table, Operation::Select)?;
        Query::table(table)
            .secure()
            .scope_with(ctx)
            .filter(Condition::eq_uuid(fields::ID, id))
            .one(self.backend.as_ref())
            .await
    }

    /// Insert a record the caller would be able to see afterwards.
    ///
    /// # Errors
    /// `Denied` when the caller may not insert, `OutOfScope` when the record
    /// does not satisfy the caller's scope, `Backend` on backend failure.
    pub async fn insert(
        &self,
        ctx: &CallerContext,
        table: &str,
        record: Record,
    ) -> Result<Record, ScopeError> {
        self.authorize(ctx, table, Operation::Insert)?;
        let predicate = ctx.scope_predicate();
        if !predicate.evaluate(&|field: &str| record.get_uuid(field)) {
            tracing::warn!(
                role = %ctx.role(),
                caller_id = %ctx.caller_id(),
                table,
                "insert rejected: record outside caller scope"
            );
            return Err(ScopeError::OutOfScope {
                table: table.to_owned(),
            });
        }
        Ok(self.backend.insert(table, record).await?)
    }

    /// Apply `patch` to the scoped subset of `query`.
    ///
    /// # Errors
    /// `Denied` when the caller may not update; `Backend` on backend failure.
    pub async fn update(
        &self,
        ctx: &CallerContext,
        query: Query,
        patch: Record,
    ) -> Result<Vec<Record>, ScopeError> {
        self.authorize(ctx, query.table_name(), Operation::Update)?;
        let scoped = query.secure().scope_with(ctx).into_inner();
        Ok(self.backend.update(&scoped, patch).await?)
    }

    /// Delete the scoped subset of `query`; returns the number removed.
    ///
    /// # Errors
    /// `Denied` when the caller may not delete; `Backend` on backend failure.
    pub async fn delete(&self, ctx: &CallerContext, query: Query) -> Result<u64, ScopeError> {
        self.authorize(ctx, query.table_name(), Operation::Delete)?;
        let scoped = query.secure().scope_with(ctx).into_inner();
        Ok(self.backend.delete(&scoped).await?)
    }
}
