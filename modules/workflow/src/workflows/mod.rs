//! Reference workflows built on the saga executor.

pub mod certificate;
pub mod enrollment;
pub mod verification;

use serde_json::Value;
use uuid::Uuid;

use rollcall_security::fields;

/// Record columns the workflows read and write.
pub mod columns {
    pub const SESSION_ID: &str = "session_id";
    pub const ENROLLMENT_ID: &str = "enrollment_id";
    pub const STATUS: &str = "status";
    pub const TITLE: &str = "title";
    pub const CURRENT_ENROLLMENT: &str = "current_enrollment";
    pub const MAX_CAPACITY: &str = "max_capacity";
    pub const VERIFICATION_CODE: &str = "verification_code";
    pub const CERTIFIED_COUNT: &str = "certified_count";
    pub const ENROLLED_AT: &str = "enrolled_at";
    pub const ISSUED_AT: &str = "issued_at";
    pub const CREATED_AT: &str = "created_at";
    pub const KIND: &str = "kind";
    pub const MESSAGE: &str = "message";
    pub const READ: &str = "read";
}

/// `id` of a record captured as a step result.
pub(crate) fn captured_id(value: &Value) -> Option<Uuid> {
    value
        .get(fields::ID)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// UUID field `field` of a captured step result.
pub(crate) fn captured_uuid(value: &Value, field: &str) -> Option<Uuid> {
    value
        .get(field)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}
