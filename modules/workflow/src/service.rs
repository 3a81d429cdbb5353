use std::sync::Arc;

use rollcall_security::CallerContext;

use crate::config::WorkflowConfig;
use crate::domain::error::WorkflowError;
use crate::domain::orchestrator::Orchestrator;
use crate::domain::transaction::TransactionResult;
use crate::workflows::certificate::{CertificateRequest, certificate_transaction};
use crate::workflows::enrollment::{EnrollmentRequest, enrollment_transaction};
use crate::workflows::verification::{CodeGenerator, RandomCodeGenerator};

/// Entry points for the reference workflows.
#[derive(Clone)]
pub struct WorkflowService {
    orchestrator: Orchestrator,
    codes: Arc<dyn CodeGenerator>,
    config: WorkflowConfig,
}

impl std::fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowService")
            .field("orchestrator", &self.orchestrator)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkflowService {
    #[must_use]
    pub fn new(orchestrator: Orchestrator, config: WorkflowConfig) -> Self {
        let codes = Arc::new(RandomCodeGenerator::new(config.verification_code_length));
        Self {
            orchestrator,
            codes,
            config,
        }
    }

    #[must_use]
    pub fn with_code_generator(mut self, codes: Arc<dyn CodeGenerator>) -> Self {
        self.codes = codes;
        self
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Enroll a student, reserving a seat atomically.
    ///
    /// # Errors
    /// Refusals before start; see [`Orchestrator::execute`].
    pub async fn enroll(
        &self,
        ctx: &CallerContext,
        request: EnrollmentRequest,
    ) -> Result<TransactionResult, WorkflowError> {
        self.orchestrator
            .execute(ctx, enrollment_transaction(request))
            .await
    }

    /// Issue a certificate for a completed enrollment.
    ///
    /// # Errors
    /// Refusals before start; see [`Orchestrator::execute`].
    pub async fn issue_certificate(
        &self,
        ctx: &CallerContext,
        request: CertificateRequest,
    ) -> Result<TransactionResult, WorkflowError> {
        let definition = certificate_transaction(
            request,
            Arc::clone(&self.codes),
            self.config.verification_code_attempts,
        );
        self.orchestrator.execute(ctx, definition).await
    }
}
