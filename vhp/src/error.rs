use vhp_format::{ArchiveError, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Another command is already in flight")]
    Busy,

    #[error("Command was cancelled")]
    Cancelled,

    #[error("The executor's worker thread is no longer running")]
    WorkerUnavailable,

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::Busy => ErrorKind::Busy,
            CommandError::Cancelled => ErrorKind::Cancelled,
            CommandError::WorkerUnavailable => ErrorKind::Io,
            CommandError::Archive(e) => e.kind(),
        }
    }
}
