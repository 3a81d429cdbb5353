//! Record field names the scope rules are expressed against.

pub const ID: &str = "id";
pub const INSTRUCTOR_ID: &str = "instructor_id";
pub const CREATED_BY: &str = "created_by";
pub const ISSUED_BY: &str = "issued_by";
pub const STUDENT_ID: &str = "student_id";
pub const USER_ID: &str = "user_id";
pub const LOCATION_ID: &str = "location_id";

/// Fields that mark a record as owned by an ownership-scoped caller.
pub const OWNERSHIP_FIELDS: [&str; 3] = [INSTRUCTOR_ID, CREATED_BY, ISSUED_BY];

/// Fields that mark a record as belonging to a consumer-scoped caller.
pub const CONSUMER_FIELDS: [&str; 2] = [STUDENT_ID, USER_ID];
