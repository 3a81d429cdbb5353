use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use rollcall_errors::{ErrorKind, HasErrorKind};
use rollcall_security::Operation;

use crate::domain::error::{StepError, WorkflowError};
use crate::domain::step::TransactionStep;

/// Lifecycle of a transaction record.
///
/// `Pending` and `Running` are transient; the other three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Running,
    Committed,
    RolledBack,
    /// One or more compensations failed; data is known to be inconsistent.
    PartiallyRolledBack,
}

impl TransactionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Committed | Self::RolledBack | Self::PartiallyRolledBack
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::PartiallyRolledBack => "partially_rolled_back",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, ordered list of steps plus the table/operation authorized
/// before the first step runs.
#[derive(Debug, Clone)]
pub struct TransactionDefinition {
    pub name: String,
    pub table: String,
    pub operation: Operation,
    pub steps: Vec<TransactionStep>,
}

impl TransactionDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, table: &str, operation: Operation) -> Self {
        Self {
            name: name.into(),
            table: table.to_owned(),
            operation,
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn step(mut self, step: TransactionStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Reject empty step lists and duplicate step names.
    ///
    /// # Errors
    /// Returns [`WorkflowError::InvalidDefinition`] describing the problem.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidDefinition(format!(
                "'{}' has no steps",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name()) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "'{}' declares step '{}' twice",
                    self.name,
                    step.name()
                )));
            }
        }
        Ok(())
    }
}

/// The failure that ended a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFailure {
    /// Failing step; `None` when the unwind was forced by emergency rollback.
    pub step: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl TransactionFailure {
    pub(crate) fn from_step(step: &str, err: &StepError) -> Self {
        Self {
            step: Some(step.to_owned()),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub(crate) fn emergency() -> Self {
        Self {
            step: None,
            kind: ErrorKind::Internal,
            message: "emergency rollback requested".to_owned(),
        }
    }
}

/// A compensating action that itself failed during an unwind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailure {
    pub step: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub transaction_id: Uuid,
    pub name: String,
    pub status: TransactionStatus,
    pub success: bool,
    /// Captured value of every step that completed, keyed by step name.
    pub results: BTreeMap<String, Value>,
    pub error: Option<TransactionFailure>,
    pub compensation_failures: Vec<CompensationFailure>,
    /// Steps whose `execute` completed, including ones later compensated.
    pub steps_completed: usize,
    pub total_steps: usize,
    /// Names of the compensations that ran, in the order they ran.
    pub compensated: Vec<String>,
}

impl TransactionResult {
    /// Whether the outcome needs manual intervention.
    #[must_use]
    pub fn requires_remediation(&self) -> bool {
        self.status == TransactionStatus::PartiallyRolledBack
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        if self.requires_remediation() {
            return Some(ErrorKind::CompensationFailed);
        }
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Point-in-time view of an active transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionSnapshot {
    pub transaction_id: Uuid,
    pub name: String,
    pub status: TransactionStatus,
    pub current_step: Option<String>,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub started_at: DateTime<Utc>,
    pub rollback_requested: bool,
}
