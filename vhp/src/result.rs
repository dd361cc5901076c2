use std::fmt;
use std::time::Duration;

use crate::{CommandError, CommandId, ErrorKind};

/// Tags the archive operation a [CommandResult] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Extract,
    ExtractDir,
    ExtractFiles,
    RemoveFile,
    Read,
    ReadAllBytes,
    ReadAllText,
    WriteStream,
    WriteAllBytes,
    WriteAllText,
    Save,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        use Operation::*;

        match self {
            Create => "CREATE",
            Extract => "EXTRACT",
            ExtractDir => "EXTRACT_DIR",
            ExtractFiles => "EXTRACT_FILES",
            RemoveFile => "REMOVE_FILE",
            Read => "READ",
            ReadAllBytes => "READ_ALL_BYTES",
            ReadAllText => "READ_ALL_TEXT",
            WriteStream => "WRITE_STREAM",
            WriteAllBytes => "WRITE_ALL_BYTES",
            WriteAllText => "WRITE_ALL_TEXT",
            Save => "SAVE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data returned by the read operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Text(String),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Bytes(x) => x,
            Payload::Text(x) => x.as_bytes(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(x) => Some(x),
            Payload::Bytes(_) => None,
        }
    }
}

/// The outcome of one command.
///
/// Exactly one of three things is true: it succeeded, it was cancelled, or it failed and
/// carries an error. Results for rejected commands have no operation or command id.
#[derive(Debug)]
pub struct CommandResult {
    command: Option<CommandId>,
    operation: Option<Operation>,
    success: bool,
    cancelled: bool,
    error: Option<CommandError>,
    payload: Option<Payload>,
    elapsed: Option<Duration>,
}

impl CommandResult {
    fn new(operation: Option<Operation>) -> CommandResult {
        CommandResult {
            command: None,
            operation,
            success: false,
            cancelled: false,
            error: None,
            payload: None,
            elapsed: None,
        }
    }

    pub fn succeeded(operation: Operation) -> CommandResult {
        CommandResult {
            success: true,
            ..CommandResult::new(Some(operation))
        }
    }

    pub fn with_payload(operation: Operation, payload: Payload) -> CommandResult {
        CommandResult {
            success: true,
            payload: Some(payload),
            ..CommandResult::new(Some(operation))
        }
    }

    pub fn failed(operation: Option<Operation>, error: CommandError) -> CommandResult {
        CommandResult {
            error: Some(error),
            ..CommandResult::new(operation)
        }
    }

    pub fn cancelled(operation: Operation) -> CommandResult {
        CommandResult {
            cancelled: true,
            error: Some(CommandError::Cancelled),
            ..CommandResult::new(Some(operation))
        }
    }

    /// The synchronous rejection handed back when another command is in flight.
    pub fn busy() -> CommandResult {
        CommandResult::failed(None, CommandError::Busy)
    }

    pub(crate) fn for_command(mut self, command: CommandId, elapsed: Duration) -> CommandResult {
        self.command = Some(command);
        self.elapsed = Some(elapsed);
        self
    }

    #[inline(always)]
    pub fn is_success(&self) -> bool {
        self.success
    }

    #[inline(always)]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    #[inline(always)]
    pub fn is_busy(&self) -> bool {
        matches!(self.error, Some(CommandError::Busy))
    }

    pub fn command(&self) -> Option<CommandId> {
        self.command
    }

    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    pub fn error(&self) -> Option<&CommandError> {
        self.error.as_ref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(CommandError::kind)
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn into_payload(self) -> Option<Payload> {
        self.payload
    }

    /// Time between acceptance and completion, or cancellation.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operation = self.operation.map(|x| x.as_str()).unwrap_or("UNKNOWN");

        match (&self.error, self.cancelled) {
            (_, true) => write!(f, "{}: cancelled", operation),
            (Some(e), _) => write!(f, "{}: failed: {}", operation, e),
            (None, _) => write!(f, "{}: ok", operation),
        }
    }
}
