use thiserror::Error;

use crate::infra::error::InfraError;
use crate::infra::llm::LlmError;
use crate::infra::store::StoreError;

use super::planner::PlanError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Short, actionable operator-facing message. Raw internals stay in the
    /// error chain for logs.
    pub fn advice(&self) -> &'static str {
        match self {
            AppError::Plan(PlanError::Collaborator(LlmError::Unconfigured(_))) => {
                "Configure the text model endpoint, then retry outline generation."
            }
            AppError::Plan(_) => "The model endpoint is unreachable; retry outline generation.",
            AppError::Store(_) => "Persistence failed; check the data directory and retry.",
            AppError::Infra(InfraError::Configuration { .. }) => {
                "Fix the configuration file or environment overrides."
            }
            _ => "Unexpected failure; see the log for details.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_advise_fixing_the_config() {
        let err = AppError::from(InfraError::configuration("unknown mode `sideways`"));
        assert_eq!(
            err.advice(),
            "Fix the configuration file or environment overrides."
        );
    }

    #[test]
    fn plan_failures_advise_a_retry() {
        let err = AppError::from(PlanError::Collaborator(LlmError::Transport(
            "connection refused".to_string(),
        )));
        assert_eq!(
            err.advice(),
            "The model endpoint is unreachable; retry outline generation."
        );
    }
}
