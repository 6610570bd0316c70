//! Run-level errors and their process exit codes.

use rqg_grammar::GrammarError;
use rqg_runner::RunnerError;
use rqg_schema::SchemaError;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("cancelled")]
    Cancelled,
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Exit codes: 1 fatal configuration, 2 endpoint unreachable,
    /// 3 cancelled, 4 checkpoint corruption.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) | RunError::Grammar(_) | RunError::Schema(_) | RunError::Io(_) => 1,
            RunError::Unreachable(_) => 2,
            RunError::Cancelled => 3,
            RunError::Checkpoint(_) => 4,
        }
    }
}

impl From<RunnerError> for RunError {
    fn from(error: RunnerError) -> Self {
        match error {
            RunnerError::Unreachable(message) => RunError::Unreachable(message),
            RunnerError::Cancelled => RunError::Cancelled,
            RunnerError::Checkpoint(e) => RunError::Checkpoint(e.to_string()),
            RunnerError::Io(e) => RunError::Io(e),
        }
    }
}
