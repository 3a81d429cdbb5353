//! Saga-style workflow orchestration.
//!
//! The data backend offers no multi-statement transaction, so multi-step
//! workflows are run as sagas: ordered steps, each paired with an optional
//! compensating action that undoes it. A failure at step `k` compensates
//! steps `k-1..=0` in that order. A compensation that itself fails leaves the
//! transaction `PartiallyRolledBack`, which always needs manual remediation.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod config;
pub mod domain;
pub mod service;
pub mod workflows;

pub use config::{BatchConfig, WorkflowConfig};
pub use domain::error::{StepError, WorkflowError};
pub use domain::orchestrator::{Orchestrator, OrchestratorStats};
pub use domain::step::{StepContext, StepFuture, TransactionStep};
pub use domain::transaction::{
    CompensationFailure, TransactionDefinition, TransactionFailure, TransactionResult,
    TransactionSnapshot, TransactionStatus,
};
pub use service::WorkflowService;
pub use workflows::certificate::CertificateRequest;
pub use workflows::enrollment::EnrollmentRequest;
pub use workflows::verification::{CodeGenerator, RandomCodeGenerator};
