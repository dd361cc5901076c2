//! Runs [ArchiveHandle][vhp_format::ArchiveHandle] operations on a background worker.
//!
//! A [CommandExecutor] accepts one command at a time. Each accepted command runs on the
//! executor's worker thread and its outcome is delivered exactly once, as a
//! [CommandResult], to the listener registered at construction.

mod error;
mod executor;
mod result;

pub use error::CommandError;
pub use executor::{CommandExecutor, CommandId, ExecutorState};
pub use result::{CommandResult, Operation, Payload};

pub use vhp_format::{
    ArchiveError, ArchiveHandle, DirId, ErrorKind, FileId, HandleOptions, Tree,
};
