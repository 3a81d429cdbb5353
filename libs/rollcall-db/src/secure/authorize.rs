use rollcall_security::{AccessDenied, CallerContext, Operation, PolicyEngine};

/// Check `(role, table, operation)` against the policy before dispatch.
///
/// # Errors
/// Returns [`AccessDenied`] carrying the attempted role, table and operation.
pub fn authorize(
    policy: &dyn PolicyEngine,
    ctx: &CallerContext,
    table: &str,
    operation: Operation,
) -> Result<(), AccessDenied> {
    if policy.allows(ctx, table, operation) {
        tracing::trace!(role = %ctx.role(), table, %operation, "access granted");
        Ok(())
    } else {
        tracing::warn!(
            role = %ctx.role(),
            caller_id = %ctx.caller_id(),
            table,
            %operation,
            "access denied"
        );
        Err(AccessDenied {
            role: ctx.role(),
            table: table.to_owned(),
            operation,
        })
    }
}
