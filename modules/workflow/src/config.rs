use serde::{Deserialize, Serialize};

use crate::domain::orchestrator::DEFAULT_CHUNK_SIZE;
use crate::workflows::verification::{DEFAULT_CODE_ATTEMPTS, DEFAULT_CODE_LENGTH};

/// Settings for the reference workflows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Characters per certificate verification code.
    pub verification_code_length: usize,
    /// Uniqueness checks before code generation fails outright.
    pub verification_code_attempts: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            verification_code_length: DEFAULT_CODE_LENGTH,
            verification_code_attempts: DEFAULT_CODE_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Rows per backend round trip for batch writes.
    pub chunk_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
