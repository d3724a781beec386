use thiserror::Error;

/// Failures surfaced at the command boundary.
///
/// Only `Persistence` aborts a command. `RuleInstall` and `Scheduling` are
/// logged by the controller and the transition still commits.
#[derive(Debug, Error)]
pub enum FocusError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to install blocking rules: {0}")]
    RuleInstall(String),

    #[error("failed to schedule wakeup: {0}")]
    Scheduling(String),

    #[error("state store failure: {0:#}")]
    Persistence(#[source] anyhow::Error),
}

impl FocusError {
    pub fn invalid(message: impl Into<String>) -> Self {
        FocusError::InvalidInput(message.into())
    }

    pub fn is_persistence(&self) -> bool {
        matches!(self, FocusError::Persistence(_))
    }
}

pub type FocusResult<T> = Result<T, FocusError>;
