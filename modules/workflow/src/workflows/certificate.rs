//! Issue a completion certificate.
//!
//! 1. `validate_completion` - the enrollment exists and is completed
//! 2. `check_existing_certificate` - no live certificate for it yet
//! 3. `generate_verification_code` - draw codes until one is unused, at most
//!    `attempts` backend checks
//! 4. `insert_certificate` - write the certificate (undo: delete it)
//! 5. `increment_roster` - bump the session roster's certified count
//!    (undo: decrement)

use std::sync::Arc;

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
    CERTIFIED_COUNT, ENROLLMENT_ID, ISSUED_AT, SESSION_ID, STATUS, VERIFICATION_CODE,
};
use crate::workflows::enrollment::delete_captured;
use crate::workflows::verification::CodeGenerator;
use crate::workflows::{captured_id, captured_uuid};

pub const WORKFLOW_NAME: &str = "issue_certificate";

pub const VALIDATE_COMPLETION: &str = "validate_completion";
pub const CHECK_EXISTING_CERTIFICATE: &str = "check_existing_certificate";
pub const GENERATE_VERIFICATION_CODE: &str = "generate_verification_code";
pub const INSERT_CERTIFICATE: &str = "insert_certificate";
pub const INCREMENT_ROSTER: &str = "increment_roster";

const COMPLETED: &str = "completed";
const REVOKED: &str = "revoked";
const ACTIVE: &str = "active";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub enrollment_id: Uuid,
}

#[must_use]
pub fn certificate_transaction(
    request: CertificateRequest,
    codes: Arc<dyn CodeGenerator>,
    attempts: u32,
) -> TransactionDefinition {
    let enrollment_id = request.enrollment_id;

    TransactionDefinition::new(WORKFLOW_NAME, tables::CERTIFICATES, Operation::Insert)
        .step(TransactionStep::new(VALIDATE_COMPLETION, move |ctx| {
            validate_completion(ctx, enrollment_id)
        }))
        .step(TransactionStep::new(CHECK_EXISTING_CERTIFICATE, move |ctx| {
            check_existing_certificate(ctx, enrollment_id)
        }))
        .step(TransactionStep::new(GENERATE_VERIFICATION_CODE, move |ctx| {
            generate_verification_code(ctx, Arc::clone(&codes), attempts)
        }))
        .step(
            TransactionStep::new(INSERT_CERTIFICATE, move |ctx| {
                insert_certificate(ctx, enrollment_id)
            })
            .with_compensation(|ctx, created| {
                delete_captured(ctx, tables::CERTIFICATES, created)
            }),
        )
        .step(
            TransactionStep::new(INCREMENT_ROSTER, increment_roster)
                .with_compensation(decrement_roster),
        )
}

async fn validate_completion(ctx: StepContext, enrollment_id: Uuid) -> Result<Value, StepError> {
    let enrollment = ctx
        .backend()
        .find_by_id(tables::ENROLLMENTS, enrollment_id)
        .await?
        .ok_or_else(|| StepError::precondition(format!("enrollment {enrollment_id} not found")))?;

    let status = enrollment.get_str(STATUS).unwrap_or("unknown");
    if status != COMPLETED {
        return Err(StepError::precondition(format!(
            "training not completed (status: {status})"
        )));
    }
    let student_id = enrollment
        .get_uuid(fields::STUDENT_ID)
        .ok_or_else(|| StepError::precondition("enrollment has no student"))?;

    Ok(json!({
        ENROLLMENT_ID: enrollment_id,
        (fields::STUDENT_ID): student_id,
        SESSION_ID: enrollment.get_str(SESSION_ID),
        (fields::LOCATION_ID): enrollment.get_str(fields::LOCATION_ID),
    }))
}

async fn check_existing_certificate(
    ctx: StepContext,
    enrollment_id: Uuid,
) -> Result<Value, StepError> {
    let existing = ctx
        .backend()
        .select(
            &Query::table(tables::CERTIFICATES)
                .filter(Condition::eq_uuid(ENROLLMENT_ID, enrollment_id))
                .filter(Condition::ne(STATUS, REVOKED))
                .limit(1),
        )
        .await?;
    if !existing.is_empty() {
        return Err(StepError::precondition(
            "a certificate was already issued for this enrollment",
        ));
    }
    Ok(json!({ "existing": false }))
}

/// One backend check per attempt; fails after `attempts` collisions.
async fn generate_verification_code(
    ctx: StepContext,
    codes: Arc<dyn CodeGenerator>,
    attempts: u32,
) -> Result<Value, StepError> {
    for attempt in 1..=attempts {
        let code = codes.generate();
        let taken = ctx
            .backend()
            .select(
                &Query::table(tables::CERTIFICATES)
                    .filter(Condition::eq(VERIFICATION_CODE, code.as_str()))
                    .limit(1),
            )
            .await?;
        if taken.is_empty() {
            tracing::debug!(attempt, "verification code generated");
            return Ok(json!({ VERIFICATION_CODE: code, "attempts": attempt }));
        }
        tracing::debug!(attempt, "verification code collision");
    }
    tracing::warn!(attempts, "verification code space exhausted");
    Err(StepError::precondition(format!(
        "no unique verification code after {attempts} attempts"
    )))
}

async fn insert_certificate(ctx: StepContext, enrollment_id: Uuid) -> Result<Value, StepError> {
    let completion = ctx.require(VALIDATE_COMPLETION)?;
    let code = ctx
        .result_str(GENERATE_VERIFICATION_CODE, VERIFICATION_CODE)
        .ok_or_else(|| StepError::precondition("no verification code generated"))?;

    let mut record = Record::new()
        .with_uuid(ENROLLMENT_ID, enrollment_id)
        .with_uuid(fields::ISSUED_BY, ctx.caller().caller_id())
        .with(VERIFICATION_CODE, code)
        .with(STATUS, ACTIVE)
        .with(ISSUED_AT, Utc::now().to_rfc3339());
    for field in [fields::STUDENT_ID, SESSION_ID, fields::LOCATION_ID] {
        if let Some(id) = captured_uuid(completion, field) {
            record.set_uuid(field, id);
        }
    }

    let stored = ctx.backend().insert(tables::CERTIFICATES, record).await?;
    tracing::info!(certificate_id = ?stored.id(), %enrollment_id, "certificate issued");
    Ok(stored.into_json())
}

async fn increment_roster(ctx: StepContext) -> Result<Value, StepError> {
    let session_id = ctx
        .result(VALIDATE_COMPLETION)
        .and_then(|v| captured_uuid(v, SESSION_ID))
        .ok_or_else(|| StepError::precondition("enrollment has no session"))?;
    let roster = ctx
        .backend()
        .select(
            &Query::table(tables::COURSE_ROSTERS)
                .filter(Condition::eq_uuid(SESSION_ID, session_id))
                .limit(1),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| StepError::precondition(format!("no roster for session {session_id}")))?;
    let roster_id = roster
        .id()
        .ok_or_else(|| StepError::precondition("roster row has no id"))?;

    match ctx
        .backend()
        .increment(
            tables::COURSE_ROSTERS,
            roster_id,
            &IncrementSpec::by(CERTIFIED_COUNT, 1),
        )
        .await?
    {
        IncrementOutcome::Applied { value } => Ok(json!({
            (fields::ID): roster_id,
            CERTIFIED_COUNT: value,
        })),
        IncrementOutcome::GuardRejected { current } => Err(StepError::precondition(format!(
            "roster counter rejected update at {current}"
        ))),
    }
}

async fn decrement_roster(ctx: StepContext, captured: Value) -> Result<(), StepError> {
    let roster_id = captured_id(&captured)
        .ok_or_else(|| StepError::precondition("captured roster has no id"))?;
    let spec = IncrementSpec::by(CERTIFIED_COUNT, -1).not_below(0);
    match ctx
        .backend()
        .increment(tables::COURSE_ROSTERS, roster_id, &spec)
        .await?
    {
        IncrementOutcome::Applied { .. } => Ok(()),
        IncrementOutcome::GuardRejected { current } => Err(StepError::precondition(format!(
            "roster counter cannot be decremented from {current}"
        ))),
    }
}
