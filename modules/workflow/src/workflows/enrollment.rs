//! Enroll a student into a session without exceeding its capacity.
//!
//! 1. `validate_capacity` - session exists, is open and has room
//! 2. `check_duplicate` - the student holds no live enrollment for it
//! 3. `create_enrollment` - insert the row (undo: delete it)
//! 4. `increment_enrollment` - guarded `current_enrollment + 1 <= max_capacity`
//!    (undo: decrement, never below zero)
//! 5. `notify` - write the confirmation notification (undo: delete it)
//!
//! Step 1 reads a snapshot; step 4 is the authoritative capacity check, so two
//! enrollments racing for the last seat cannot both commit.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use rollcall_db::{Condition, IncrementOutcome, IncrementSpec, Query, Record};
use rollcall_security::permission::tables;
use rollcall_security::{Operation, fields};

use crate::domain::error::StepError;
use crate::domain::step::{StepContext, TransactionStep};
use crate::domain::transaction::TransactionDefinition;
use crate::workflows::columns::{
    CREATED_AT, CURRENT_ENROLLMENT, ENROLLED_AT, KIND, MAX_CAPACITY, MESSAGE, READ, SESSION_ID,
    STATUS, TITLE,
};
use crate::workflows::{captured_id, captured_uuid};

pub const WORKFLOW_NAME: &str = "enroll_student";

pub const VALIDATE_CAPACITY: &str = "validate_capacity";
pub const CHECK_DUPLICATE: &str = "check_duplicate";
pub const CREATE_ENROLLMENT: &str = "create_enrollment";
pub const INCREMENT_ENROLLMENT: &str = "increment_enrollment";
pub const NOTIFY: &str = "notify";

const CLOSED_SESSION_STATUSES: [&str; 2] = ["cancelled", "completed"];
const CANCELLED: &str = "cancelled";
const ENROLLED: &str = "enrolled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    pub session_id: Uuid,
    pub student_id: Uuid,
}

#[must_use]
pub fn enrollment_transaction(request: EnrollmentRequest) -> TransactionDefinition {
    let EnrollmentRequest {
        session_id,
        student_id,
    } = request;

    TransactionDefinition::new(WORKFLOW_NAME, tables::ENROLLMENTS, Operation::Insert)
        .step(TransactionStep::new(VALIDATE_CAPACITY, move |ctx| {
            validate_capacity(ctx, session_id)
        }))
        .step(TransactionStep::new(CHECK_DUPLICATE, move |ctx| {
            check_duplicate(ctx, session_id, student_id)
        }))
        .step(
            TransactionStep::new(CREATE_ENROLLMENT, move |ctx| {
                create_enrollment(ctx, session_id, student_id)
            })
            .with_compensation(|ctx, created| delete_captured(ctx, tables::ENROLLMENTS, created)),
        )
        .step(
            TransactionStep::new(INCREMENT_ENROLLMENT, move |ctx| {
                increment_enrollment(ctx, session_id)
            })
            .with_compensation(move |ctx, _| decrement_enrollment(ctx, session_id)),
        )
        .step(
            TransactionStep::new(NOTIFY, move |ctx| notify(ctx, session_id, student_id))
                .with_compensation(|ctx, created| {
                    delete_captured(ctx, tables::NOTIFICATIONS, created)
                }),
        )
}

async fn validate_capacity(ctx: StepContext, session_id: Uuid) -> Result<Value, StepError> {
    let session = ctx
        .backend()
        .find_by_id(tables::SESSIONS, session_id)
        .await?
        .ok_or_else(|| StepError::precondition(format!("session {session_id} not found")))?;

    if let Some(status) = session.get_str(STATUS)
        && CLOSED_SESSION_STATUSES.contains(&status)
    {
        return Err(StepError::precondition(format!("session is {status}")));
    }
    let max = session
        .get_i64(MAX_CAPACITY)
        .ok_or_else(|| StepError::precondition("session has no capacity set"))?;
    let current = session.get_i64(CURRENT_ENROLLMENT).unwrap_or(0);
    if current >= max {
        return Err(StepError::precondition(format!(
            "session is full ({current}/{max})"
        )));
    }

    Ok(json!({
        SESSION_ID: session_id,
        TITLE: session.get_str(TITLE),
        (fields::INSTRUCTOR_ID): session.get_str(fields::INSTRUCTOR_ID),
        (fields::LOCATION_ID): session.get_str(fields::LOCATION_ID),
        CURRENT_ENROLLMENT: current,
        MAX_CAPACITY: max,
    }))
}

async fn check_duplicate(
    ctx: StepContext,
    session_id: Uuid,
    student_id: Uuid,
) -> Result<Value, StepError> {
    let existing = ctx
        .backend()
        .select(
            &Query::table(tables::ENROLLMENTS)
                .filter(Condition::eq_uuid(SESSION_ID, session_id))
                .filter(Condition::eq_uuid(fields::STUDENT_ID, student_id))
                .filter(Condition::ne(STATUS, CANCELLED))
                .limit(1),
        )
        .await?;
    if !existing.is_empty() {
        return Err(StepError::precondition(
            "student is already enrolled in this session",
        ));
    }
    Ok(json!({ "duplicate": false }))
}

async fn create_enrollment(
    ctx: StepContext,
    session_id: Uuid,
    student_id: Uuid,
) -> Result<Value, StepError> {
    let session = ctx.require(VALIDATE_CAPACITY)?;
    let mut record = Record::new()
        .with_uuid(SESSION_ID, session_id)
        .with_uuid(fields::STUDENT_ID, student_id)
        .with_uuid(fields::CREATED_BY, ctx.caller().caller_id())
        .with(STATUS, ENROLLED)
        .with(ENROLLED_AT, Utc::now().to_rfc3339());
    for field in [fields::INSTRUCTOR_ID, fields::LOCATION_ID] {
        if let Some(id) = captured_uuid(session, field) {
            record.set_uuid(field, id);
        }
    }

    let stored = ctx.backend().insert(tables::ENROLLMENTS, record).await?;
    tracing::debug!(enrollment_id = ?stored.id(), %session_id, "enrollment created");
    Ok(stored.into_json())
}

async fn increment_enrollment(ctx: StepContext, session_id: Uuid) -> Result<Value, StepError> {
    let spec = IncrementSpec::by(CURRENT_ENROLLMENT, 1).not_above(MAX_CAPACITY);
    match ctx
        .backend()
        .increment(tables::SESSIONS, session_id, &spec)
        .await?
    {
        IncrementOutcome::Applied { value } => Ok(json!({
            SESSION_ID: session_id,
            CURRENT_ENROLLMENT: value,
        })),
        IncrementOutcome::GuardRejected { current } => Err(StepError::precondition(format!(
            "session filled up concurrently ({current} enrolled)"
        ))),
    }
}

async fn decrement_enrollment(ctx: StepContext, session_id: Uuid) -> Result<(), StepError> {
    let spec = IncrementSpec::by(CURRENT_ENROLLMENT, -1).not_below(0);
    match ctx
        .backend()
        .increment(tables::SESSIONS, session_id, &spec)
        .await?
    {
        IncrementOutcome::Applied { .. } => Ok(()),
        IncrementOutcome::GuardRejected { current } => Err(StepError::precondition(format!(
            "enrollment counter cannot be decremented from {current}"
        ))),
    }
}

async fn notify(ctx: StepContext, session_id: Uuid, student_id: Uuid) -> Result<Value, StepError> {
    let title = ctx
        .result_str(VALIDATE_CAPACITY, TITLE)
        .unwrap_or("your session")
        .to_owned();
    let record = Record::new()
        .with_uuid(fields::USER_ID, student_id)
        .with_uuid(SESSION_ID, session_id)
        .with(KIND, "enrollment_confirmed")
        .with(MESSAGE, format!("You are enrolled in {title}"))
        .with(READ, false)
        .with(CREATED_AT, Utc::now().to_rfc3339());
    let stored = ctx.backend().insert(tables::NOTIFICATIONS, record).await?;
    Ok(stored.into_json())
}

/// Delete the row a step inserted, identified by its captured `id`.
pub(crate) async fn delete_captured(
    ctx: StepContext,
    table: &'static str,
    created: Value,
) -> Result<(), StepError> {
    let id = captured_id(&created)
        .ok_or_else(|| StepError::precondition(format!("captured {table} row has no id")))?;
    let removed = ctx.backend().delete_by_id(table, id).await?;
    if removed == 0 {
        tracing::debug!(table, %id, "row already gone");
    }
    Ok(())
}
