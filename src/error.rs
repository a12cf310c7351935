use std::io;
use thiserror::Error;

/// Exit codes used by the `pipeit` binary when it fails before the child
/// process can report its own status.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    InvalidArguments = 1,
    TransportError = 2,
    RuntimeError = 3,
}

impl ReturnCode {
    pub fn as_exit_code(self) -> i32 {
        self as i32
    }
}

/// Main error type for process manager operations
#[derive(Error, Debug)]
pub enum PipeError {
    /// PTY allocation, pipe creation or process spawn failed.
    #[error("failed to {stage}: {source}")]
    Transport {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("no input pipe available")]
    NoInputAvailable,

    #[error("no PTY session active")]
    NoPtySession,

    /// The forceful kill issued by `stop` failed, typically because the
    /// process had already exited. Callers should treat this as informational.
    #[error("failed to terminate process: {0}")]
    ProcessTermination(#[source] nix::Error),

    #[error("process already started")]
    AlreadyStarted,

    #[error("process manager was stopped before the process could start")]
    Cancelled,

    #[error("process not started")]
    NotStarted,

    #[error("failed to wait for process: {0}")]
    Wait(#[source] nix::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid command line arguments: {0}")]
    InvalidArguments(String),
}

impl PipeError {
    pub(crate) fn transport(stage: &'static str, source: impl Into<io::Error>) -> Self {
        PipeError::Transport {
            stage,
            source: source.into(),
        }
    }

    /// Convert error to the appropriate return code
    pub fn to_return_code(&self) -> ReturnCode {
        match self {
            PipeError::InvalidArguments(_) => ReturnCode::InvalidArguments,
            PipeError::Transport { .. } | PipeError::Cancelled | PipeError::AlreadyStarted => {
                ReturnCode::TransportError
            }
            PipeError::NoInputAvailable
            | PipeError::NoPtySession
            | PipeError::ProcessTermination(_)
            | PipeError::NotStarted
            | PipeError::Wait(_)
            | PipeError::Io(_) => ReturnCode::RuntimeError,
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.to_return_code().as_exit_code()
    }
}

/// Result type alias for process manager operations
pub type Result<T> = std::result::Result<T, PipeError>;

impl From<PipeError> for i32 {
    fn from(error: PipeError) -> Self {
        error.exit_code()
    }
}
