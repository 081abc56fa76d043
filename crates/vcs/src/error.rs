use thiserror::Error;

/// The process could not be launched or supervised. A command that ran and
/// exited non-zero is not an error.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn `{command}` in {dir}: {source}")]
    Spawn {
        command: String,
        dir: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Working directory does not exist: {0}")]
    MissingDirectory(String),

    #[error("IO error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("VCS not supported: {0:?}")]
    UnsupportedBackend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, VcsError>;
