#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use uuid::Uuid;

use rollcall_db::{MemoryBackend, Record, SecureBackend};
use rollcall_errors::ErrorKind;
use rollcall_security::permission::tables;
use rollcall_security::{AccessMatrix, CallerContext, Role, fields};
use rollcall_workflow::workflows::{certificate, enrollment};
use rollcall_workflow::{
    CertificateRequest, CodeGenerator, EnrollmentRequest, Orchestrator, TransactionStatus,
    WorkflowConfig, WorkflowError, WorkflowService,
};

struct FixedCode(&'static str);

impl CodeGenerator for FixedCode {
    fn generate(&self) -> String {
        self.0.to_owned()
    }
}

fn service(db: &MemoryBackend, config: WorkflowConfig) -> WorkflowService {
    let secure = SecureBackend::from_parts(db.clone(), AccessMatrix::default());
    WorkflowService::new(Orchestrator::new(secure), config)
}

fn seed_session(db: &MemoryBackend, current: i64, max: i64) -> Uuid {
    let id = Uuid::new_v4();
    db.seed(
        tables::SESSIONS,
        [Record::new()
            .with_uuid(fields::ID, id)
            .with_uuid(fields::INSTRUCTOR_ID, Uuid::new_v4())
            .with_uuid(fields::LOCATION_ID, Uuid::new_v4())
            .with("title", "Basic Life Support")
            .with("status", "scheduled")
            .with("current_enrollment", current)
            .with("max_capacity", max)],
    );
    id
}

fn session_count(db: &MemoryBackend, id: Uuid) -> i64 {
    db.rows(tables::SESSIONS)
        .into_iter()
        .find(|r| r.id() == Some(id))
        .and_then(|r| r.get_i64("current_enrollment"))
        .unwrap()
}

fn student() -> CallerContext {
    CallerContext::new(Role::InstructorNew, Uuid::new_v4())
}

#[tokio::test]
async fn enrollment_commits_all_side_effects() {
    let db = MemoryBackend::new();
    let session_id = seed_session(&db, 0, 2);
    let ctx = student();

    let result = service(&db, WorkflowConfig::default())
        .enroll(
            &ctx,
            EnrollmentRequest {
                session_id,
                student_id: ctx.caller_id(),
            },
        )
        .await
        .unwrap();

    assert_eq!(result.status, TransactionStatus::Committed);
    assert_eq!(result.steps_completed, 5);
    assert_eq!(session_count(&db, session_id), 1);

    let enrollments = db.rows(tables::ENROLLMENTS);
    assert_eq!(enrollments.len(), 1);
    assert_eq!(enrollments[0].get_uuid(fields::STUDENT_ID), Some(ctx.caller_id()));
    assert_eq!(enrollments[0].get_str("status"), Some("enrolled"));

    let notifications = db.rows(tables::NOTIFICATIONS);
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].get_uuid(fields::USER_ID), Some(ctx.caller_id()));
    assert_eq!(
        notifications[0].get_str("message"),
        Some("You are enrolled in Basic Life Support")
    );
}

#[tokio::test]
async fn full_session_fails_at_capacity_check_without_side_effects() {
    let db = MemoryBackend::new();
    let session_id = seed_session(&db, 3, 3);
    let ctx = student();

    let result = service(&db, WorkflowConfig::default())
        .enroll(
            &ctx,
            EnrollmentRequest {
                session_id,
                student_id: ctx.caller_id(),
            },
        )
        .await
        .unwrap();

    assert_eq!(result.status, TransactionStatus::RolledBack);
    let error = result.error.unwrap();
    assert_eq!(error.step.as_deref(), Some(enrollment::VALIDATE_CAPACITY));
    assert_eq!(error.kind, ErrorKind::PreconditionFailed);
    assert_eq!(result.steps_completed, 0);

    assert_eq!(db.table_len(tables::ENROLLMENTS), 0);
    assert_eq!(db.table_len(tables::NOTIFICATIONS), 0);
    assert_eq!(session_count(&db, session_id), 3);
    assert_eq!(db.calls().writes(), 0);
}

#[tokio::test]
async fn duplicate_enrollment_is_rejected() {
    let db = MemoryBackend::new();
    let session_id = seed_session(&db, 0, 5);
    let ctx = student();
    let svc = service(&db, WorkflowConfig::default());
    let request = EnrollmentRequest {
        session_id,
        student_id: ctx.caller_id(),
    };

    assert!(svc.enroll(&ctx, request).await.unwrap().success);
    let second = svc.enroll(&ctx, request).await.unwrap();

    assert_eq!(
        second.error.unwrap().step.as_deref(),
        Some(enrollment::CHECK_DUPLICATE)
    );
    assert_eq!(db.table_len(tables::ENROLLMENTS), 1);
    assert_eq!(session_count(&db, session_id), 1);
}

#[tokio::test]
async fn notification_failure_unwinds_counter_and_enrollment() {
    let db = MemoryBackend::new();
    let session_id = seed_session(&db, 1, 4);
    db.fail_writes_to(tables::NOTIFICATIONS);
    let ctx = student();

    let result = service(&db, WorkflowConfig::default())
        .enroll(
            &ctx,
            EnrollmentRequest {
                session_id,
                student_id: ctx.caller_id(),
            },
        )
        .await
        .unwrap();

    assert_eq!(result.status, TransactionStatus::RolledBack);
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::BackendError);
    assert_eq!(
        result.compensated,
        vec![enrollment::INCREMENT_ENROLLMENT, enrollment::CREATE_ENROLLMENT]
    );
    assert_eq!(session_count(&db, session_id), 1);
    assert_eq!(db.table_len(tables::ENROLLMENTS), 0);
}

#[tokio::test]
async fn enrollment_for_unknown_session_fails_cleanly() {
    let db = MemoryBackend::new();
    let ctx = student();
    let result = service(&db, WorkflowConfig::default())
        .enroll(
            &ctx,
            EnrollmentRequest {
                session_id: Uuid::new_v4(),
                student_id: ctx.caller_id(),
            },
        )
        .await
        .unwrap();
    assert_eq!(result.error_kind(), Some(ErrorKind::PreconditionFailed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enrollments_never_overfill_a_session() {
    let db = MemoryBackend::new();
    let svc = service(&db, WorkflowConfig::default());

    for _ in 0..20 {
        let session_id = seed_session(&db, 4, 5);
        let mut handles = Vec::new();
        for _ in 0..2 {
            let svc = svc.clone();
            handles.push(tokio::spawn(async move {
                let ctx = student();
                let request = EnrollmentRequest {
                    session_id,
                    student_id: ctx.caller_id(),
                };
                svc.enroll(&ctx, request).await.unwrap()
            }));
        }
        let mut committed = 0;
        for handle in handles {
            let result = handle.await.unwrap();
            if result.success {
                committed += 1;
            } else {
                assert_eq!(result.error_kind(), Some(ErrorKind::PreconditionFailed));
            }
        }

        assert!(committed <= 1, "both enrollments committed");
        assert!(session_count(&db, session_id) <= 5);
        assert_eq!(session_count(&db, session_id), 4 + committed);
    }
}

fn seed_completed_enrollment(db: &MemoryBackend) -> (Uuid, Uuid) {
    let session_id = Uuid::new_v4();
    let enrollment_id = Uuid::new_v4();
    db.seed(
        tables::ENROLLMENTS,
        [Record::new()
            .with_uuid(fields::ID, enrollment_id)
            .with_uuid("session_id", session_id)
            .with_uuid(fields::STUDENT_ID, Uuid::new_v4())
            .with_uuid(fields::LOCATION_ID, Uuid::new_v4())
            .with("status", "completed")],
    );
    db.seed(
        tables::COURSE_ROSTERS,
        [Record::new()
            .with_uuid("session_id", session_id)
            .with("certified_count", 0)],
    );
    (enrollment_id, session_id)
}

fn provider() -> CallerContext {
    CallerContext::new(Role::Provider, Uuid::new_v4())
}

#[tokio::test]
async fn certificate_issuance_commits() {
    let db = MemoryBackend::new();
    let (enrollment_id, _) = seed_completed_enrollment(&db);
    let ctx = provider();

    let result = service(&db, WorkflowConfig::default())
        .issue_certificate(&ctx, CertificateRequest { enrollment_id })
        .await
        .unwrap();

    assert_eq!(result.status, TransactionStatus::Committed);
    let certs = db.rows(tables::CERTIFICATES);
    assert_eq!(certs.len(), 1);
    let code = certs[0].get_str("verification_code").unwrap();
    assert_eq!(code.len(), 10);
    assert_eq!(certs[0].get_uuid(fields::ISSUED_BY), Some(ctx.caller_id()));
    assert_eq!(
        db.rows(tables::COURSE_ROSTERS)[0].get_i64("certified_count"),
        Some(1)
    );
}

#[tokio::test]
async fn incomplete_training_is_refused() {
    let db = MemoryBackend::new();
    let enrollment_id = Uuid::new_v4();
    db.seed(
        tables::ENROLLMENTS,
        [Record::new()
            .with_uuid(fields::ID, enrollment_id)
            .with("status", "enrolled")],
    );

    let result = service(&db, WorkflowConfig::default())
        .issue_certificate(&provider(), CertificateRequest { enrollment_id })
        .await
        .unwrap();

    assert_eq!(
        result.error.unwrap().step.as_deref(),
        Some(certificate::VALIDATE_COMPLETION)
    );
    assert_eq!(db.table_len(tables::CERTIFICATES), 0);
}

#[tokio::test]
async fn code_generation_is_bounded_by_attempt_cap() {
    let db = MemoryBackend::new();
    let (enrollment_id, _) = seed_completed_enrollment(&db);
    db.seed(
        tables::CERTIFICATES,
        [Record::new().with("verification_code", "AAAAAAAAAA")],
    );
    let config = WorkflowConfig {
        verification_code_attempts: 4,
        ..WorkflowConfig::default()
    };
    let svc = service(&db, config).with_code_generator(Arc::new(FixedCode("AAAAAAAAAA")));

    let before = db.calls();
    let result = svc
        .issue_certificate(&provider(), CertificateRequest { enrollment_id })
        .await
        .unwrap();
    let after = db.calls();

    assert_eq!(result.status, TransactionStatus::RolledBack);
    assert_eq!(
        result.error.unwrap().step.as_deref(),
        Some(certificate::GENERATE_VERIFICATION_CODE)
    );
    // validate_completion + check_existing_certificate + one check per attempt
    assert_eq!(after.select - before.select, 2 + 4);
    assert_eq!(after.writes(), before.writes());
}

#[tokio::test]
async fn missing_roster_deletes_inserted_certificate() {
    let db = MemoryBackend::new();
    let enrollment_id = Uuid::new_v4();
    db.seed(
        tables::ENROLLMENTS,
        [Record::new()
            .with_uuid(fields::ID, enrollment_id)
            .with_uuid("session_id", Uuid::new_v4())
            .with_uuid(fields::STUDENT_ID, Uuid::new_v4())
            .with("status", "completed")],
    );

    let result = service(&db, WorkflowConfig::default())
        .issue_certificate(&provider(), CertificateRequest { enrollment_id })
        .await
        .unwrap();

    assert_eq!(result.status, TransactionStatus::RolledBack);
    assert_eq!(result.compensated, vec![certificate::INSERT_CERTIFICATE]);
    assert_eq!(db.table_len(tables::CERTIFICATES), 0);
}

#[tokio::test]
async fn trainee_cannot_issue_certificates() {
    let db = MemoryBackend::new();
    let (enrollment_id, _) = seed_completed_enrollment(&db);
    let trainee = CallerContext::new(Role::InstructorTrainee, Uuid::new_v4());

    let err = service(&db, WorkflowConfig::default())
        .issue_certificate(&trainee, CertificateRequest { enrollment_id })
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::PermissionDenied(_)));
    assert_eq!(db.calls().total(), 0);
}
