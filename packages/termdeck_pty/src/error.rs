use thiserror::Error;

/// Errors that can occur during process operations
#[derive(Debug, Error)]
pub enum PtyError {
    /// The process could not be started
    #[error("Failed to create PTY: {0}")]
    CreateFailed(String),
    #[error("Failed to write to PTY: {0}")]
    WriteFailed(String),
    #[error("Failed to resize PTY: {0}")]
    ResizeFailed(String),
    #[error("Failed to kill PTY: {0}")]
    KillFailed(String),
    #[error("PTY process has exited")]
    ProcessExited,
}

impl From<anyhow::Error> for PtyError {
    fn from(err: anyhow::Error) -> Self {
        PtyError::CreateFailed(format!("{err:#}"))
    }
}
