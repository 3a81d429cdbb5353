#![allow(clippy::unwrap_used, clippy::expect_used)]

use rollcall_security::permission::tables;
use rollcall_security::{
    AccessMatrix, AccessRule, CallerContext, Operation, PolicyEngine, Role, ScopePredicate,
};
use uuid::Uuid;

#[test]
fn unlisted_tables_are_denied_for_every_role() {
    let matrix = AccessMatrix::default();
    for table in ["payments", "", "sessions_archive", "SESSIONS"] {
        for role in Role::ALL {
            for op in Operation::ALL {
                assert!(
                    !matrix.can_access(role, table, op),
                    "{role} should not {op} on {table}"
                );
            }
        }
    }
}

#[test]
fn empty_matrix_denies_everything() {
    let matrix = AccessMatrix::deny_all();
    for role in Role::ALL {
        assert!(!matrix.can_access(role, tables::SESSIONS, Operation::Select));
    }
}

#[test]
fn role_missing_from_configured_matrix_is_denied() {
    let matrix = AccessMatrix::new(
        vec![AccessRule::new(
            Role::Provider,
            tables::SESSIONS,
            &[Operation::Select],
        )],
        Vec::new(),
    );
    assert!(matrix.can_access(Role::Provider, tables::SESSIONS, Operation::Select));
    assert!(!matrix.can_access(Role::InstructorCertified, tables::SESSIONS, Operation::Select));
    assert!(!matrix.can_access(Role::Admin, tables::SESSIONS, Operation::Select));
    // Top rank still gets blanket access to tables the matrix knows about.
    assert!(matrix.can_access(Role::SystemAdmin, tables::SESSIONS, Operation::Delete));
}

#[test]
fn matrix_loads_from_config_json() {
    let json = r#"{
        "rules": [
            { "role": "instructor_new", "table": "enrollments", "operations": ["select", "insert"] }
        ],
        "system_tables": ["audit_log"]
    }"#;
    let matrix: AccessMatrix = serde_json::from_str(json).unwrap();
    assert!(matrix.can_access(Role::InstructorNew, "enrollments", Operation::Insert));
    assert!(!matrix.can_access(Role::InstructorNew, "enrollments", Operation::Update));
    assert!(matrix.is_system_table("audit_log"));
    assert!(!matrix.can_access(Role::SystemAdmin, "audit_log", Operation::Delete));
}

#[test]
fn policy_engine_uses_caller_role() {
    let matrix = AccessMatrix::default();
    let trainee = CallerContext::new(Role::InstructorTrainee, Uuid::new_v4());
    let provider = CallerContext::new(Role::Provider, Uuid::new_v4());
    assert!(!matrix.allows(&trainee, tables::CERTIFICATES, Operation::Insert));
    assert!(matrix.allows(&provider, tables::CERTIFICATES, Operation::Insert));
}

#[test]
fn scoped_provider_predicate_shape() {
    let me = Uuid::new_v4();
    let loc = Uuid::new_v4();
    let ctx = CallerContext::new(Role::Provider, me).with_scope(loc);
    match ctx.scope_predicate() {
        ScopePredicate::AllOf { predicates } => assert_eq!(predicates.len(), 2),
        other => panic!("unexpected predicate: {other:?}"),
    }
}
