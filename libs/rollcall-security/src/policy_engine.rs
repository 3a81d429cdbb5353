use crate::{AccessMatrix, CallerContext, Operation};

/// Type alias for a reference-counted policy engine.
pub type PolicyEngineRef = std::sync::Arc<dyn PolicyEngine>;

/// Decides whether a caller may perform an operation on a table.
pub trait PolicyEngine: Send + Sync {
    fn allows(&self, ctx: &CallerContext, table: &str, operation: Operation) -> bool;
}

impl PolicyEngine for AccessMatrix {
    fn allows(&self, ctx: &CallerContext, table: &str, operation: Operation) -> bool {
        self.can_access(ctx.role(), table, operation)
    }
}
