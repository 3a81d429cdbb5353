use std::marker::PhantomData;

use rollcall_security::CallerContext;

use crate::condition::{Condition, build_scope_condition};
use crate::query::{Direction, Query};

/// Typestate marker: query has not yet been scoped.
/// Cannot execute queries in this state.
#[derive(Debug, Clone, Copy)]
pub struct Unscoped;

/// Typestate marker: query has been scoped to a caller.
#[derive(Debug, Clone, Copy)]
pub struct Scoped;

/// A [`Query`] wrapper that only executes once a caller scope is applied.
#[must_use]
#[derive(Clone, Debug)]
pub struct SecureQuery<S> {
    pub(crate) inner: Query,
    pub(crate) _state: PhantomData<S>,
}

/// Extension trait to convert a [`Query`] into a [`SecureQuery`].
pub trait SecureQueryExt: Sized {
    /// You must call `.scope_with()` before executing the query.
    fn secure(self) -> SecureQuery<Unscoped>;
}

impl SecureQueryExt for Query {
    fn secure(self) -> SecureQuery<Unscoped> {
        SecureQuery {
            inner: self,
            _state: PhantomData,
        }
    }
}

/// Restrict `query` to rows `ctx` may see.
///
/// Side-effect free. The scope is written into a single slot, so scoping an
/// already-scoped query for the same caller yields the same query.
#[must_use]
pub fn scope(query: Query, ctx: &CallerContext) -> Query {
    query.with_scope(build_scope_condition(&ctx.scope_predicate()))
}

impl SecureQuery<Unscoped> {
    /// Apply the caller's scope predicate, transitioning to the `Scoped` state.
    ///
    /// - Administrative roles: no restriction
    /// - Ownership-scoped roles: owner fields, ANDed with location when set
    /// - Consumer-scoped roles: student/user fields
    pub fn scope_with(self, ctx: &CallerContext) -> SecureQuery<Scoped> {
        SecureQuery {
            inner: scope(self.inner, ctx),
            _state: PhantomData,
        }
    }
}

impl SecureQuery<Scoped> {
    /// Narrow a scoped query further; the scope slot is untouched.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.inner = self.inner.filter(condition);
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.inner = self.inner.order_by(field, direction);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.inner = self.inner.limit(limit);
        self
    }

    #[must_use]
    pub fn as_query(&self) -> &Query {
        &self.inner
    }

    #[must_use]
    pub fn into_inner(self) -> Query {
        self.inner
    }
}

impl<S> SecureQuery<S> {
    #[must_use]
    pub fn table_name(&self) -> &str {
        self.inner.table_name()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::record::Record;
    use rollcall_security::{Role, fields};
    use uuid::Uuid;

    #[test]
    fn scoping_twice_is_idempotent() {
        let ctx = CallerContext::new(Role::InstructorCertified, Uuid::new_v4())
            .with_scope(Uuid::new_v4());
        let base = Query::table("sessions").filter(Condition::eq("status", "scheduled"));

        let once = scope(base.clone(), &ctx);
        let twice = scope(once.clone(), &ctx);
        assert_eq!(once, twice);
        assert_eq!(once.filters(), base.filters());
    }

    #[test]
    fn admin_scope_is_unrestricted() {
        let ctx = CallerContext::new(Role::SystemAdmin, Uuid::new_v4());
        let q = scope(Query::table("sessions"), &ctx);
        assert_eq!(q.scope(), Some(&Condition::always()));
        assert!(q.matches(&Record::new()));
    }

    #[test]
    fn consumer_scope_restricts_rows() {
        let me = Uuid::new_v4();
        let ctx = CallerContext::new(Role::InstructorNew, me);
        let q = Query::table("enrollments").secure().scope_with(&ctx);

        let mine = Record::new().with_uuid(fields::STUDENT_ID, me);
        let theirs = Record::new().with_uuid(fields::STUDENT_ID, Uuid::new_v4());
        assert!(q.as_query().matches(&mine));
        assert!(!q.as_query().matches(&theirs));
    }

    #[test]
    fn filter_after_scope_keeps_scope() {
        let ctx = CallerContext::new(Role::InstructorNew, Uuid::new_v4());
        let q = Query::table("enrollments")
            .secure()
            .scope_with(&ctx)
            .filter(Condition::eq("status", "enrolled"))
            .limit(5);
        assert!(q.as_query().scope().is_some());
        assert_eq!(q.as_query().filters().len(), 1);
        assert_eq!(q.as_query().row_limit(), Some(5));
    }
}
