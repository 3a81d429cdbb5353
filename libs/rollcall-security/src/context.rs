use uuid::Uuid;

use crate::predicate::{ScopePredicate, build_scope_predicate};
use crate::role::Role;

/// `CallerContext` carries the already-resolved identity of the caller for one operation.
///
/// The core performs no authentication; the context is created per request
/// and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CallerContext {
    role: Role,
    caller_id: Uuid,
    scope_id: Option<Uuid>,
}

impl CallerContext {
    #[must_use]
    pub fn new(role: Role, caller_id: Uuid) -> Self {
        Self {
            role,
            caller_id,
            scope_id: None,
        }
    }

    /// Restrict the caller to a location/tenant scope.
    #[must_use]
    pub fn with_scope(mut self, scope_id: Uuid) -> Self {
        self.scope_id = Some(scope_id);
        self
    }

    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    #[must_use]
    pub fn caller_id(&self) -> Uuid {
        self.caller_id
    }

    #[inline]
    #[must_use]
    pub fn scope_id(&self) -> Option<Uuid> {
        self.scope_id
    }

    #[must_use]
    pub fn is_administrative(&self) -> bool {
        self.role.is_administrative()
    }

    /// Row predicate this caller is restricted to.
    #[must_use]
    pub fn scope_predicate(&self) -> ScopePredicate {
        build_scope_predicate(self.role, self.caller_id, self.scope_id)
    }
}
