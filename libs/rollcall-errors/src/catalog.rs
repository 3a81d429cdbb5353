//! Static catalog entries for the error taxonomy.

use serde::Serialize;

/// Static error definition from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrDef {
    pub code: &'static str,
    pub title: &'static str,
    /// True when the failure may leave persisted data needing manual repair.
    pub requires_remediation: bool,
}

pub const PERMISSION_DENIED: ErrDef = ErrDef {
    code: "ROLLCALL_PERMISSION_DENIED",
    title: "Permission denied",
    requires_remediation: false,
};

pub const PRECONDITION_FAILED: ErrDef = ErrDef {
    code: "ROLLCALL_PRECONDITION_FAILED",
    title: "Precondition failed",
    requires_remediation: false,
};

pub const BACKEND_ERROR: ErrDef = ErrDef {
    code: "ROLLCALL_BACKEND_ERROR",
    title: "Data backend error",
    requires_remediation: false,
};

pub const COMPENSATION_FAILED: ErrDef = ErrDef {
    code: "ROLLCALL_COMPENSATION_FAILED",
    title: "Compensation failed",
    requires_remediation: true,
};

pub const RECONNECT_EXHAUSTED: ErrDef = ErrDef {
    code: "ROLLCALL_RECONNECT_EXHAUSTED",
    title: "Subscription reconnect exhausted",
    requires_remediation: false,
};

pub const INTERNAL: ErrDef = ErrDef {
    code: "ROLLCALL_INTERNAL",
    title: "Internal error",
    requires_remediation: false,
};

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let all = [
            PERMISSION_DENIED,
            PRECONDITION_FAILED,
            BACKEND_ERROR,
            COMPENSATION_FAILED,
            RECONNECT_EXHAUSTED,
            INTERNAL,
        ];
        let mut codes: Vec<_> = all.iter().map(|d| d.code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn only_compensation_needs_remediation() {
        assert!(COMPENSATION_FAILED.requires_remediation);
        assert!(!PERMISSION_DENIED.requires_remediation);
        assert!(!BACKEND_ERROR.requires_remediation);
    }
}
