use std::fmt;
use std::path::PathBuf;

use crate::path::IntoNameError;

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Coarse classification of every failure the engine and its executors report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A virtual path or container did not resolve.
    NotFound,
    /// A write targeted an existing entry without override permission.
    AlreadyExists,
    /// The host filesystem failed.
    Io,
    /// The container header or index is corrupt or unrecognized.
    Format,
    /// A single-call read exceeded the size cap.
    ResourceLimit,
    /// A name cannot be stored in the tree.
    InvalidName,
    /// An executor rejected the command because another one is in flight.
    Busy,
    /// The caller aborted the operation.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ErrorKind::*;

        let s = match self {
            NotFound => "not found",
            AlreadyExists => "already exists",
            Io => "I/O error",
            Format => "format error",
            ResourceLimit => "resource limit exceeded",
            InvalidName => "invalid name",
            Busy => "busy",
            Cancelled => "cancelled",
        };

        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Path not found in archive. Path: '{0}'")]
    NotFoundInArchive(String),

    #[error("Directory node {0} does not exist in this tree")]
    UnknownDirectory(usize),

    #[error("File node {0} does not exist in this tree")]
    UnknownFile(usize),

    #[error("Container does not exist. Path: '{}'", .0.display())]
    MissingContainer(PathBuf),

    #[error("No container has been created or read yet")]
    NoContainer,

    #[error("An entry with this name already exists. Path: '{0}'")]
    AlreadyExists(String),

    #[error("Invalid entry name '{1}'")]
    InvalidName(#[source] IntoNameError, String),

    #[error("Reading from host failed. Path: '{}'", .1.display())]
    ReadFailed(#[source] std::io::Error, PathBuf),

    #[error("Writing to host failed. Path: '{}'", .1.display())]
    WriteFailed(#[source] std::io::Error, PathBuf),

    #[error("Creating directory failed. Path: '{}'", .1.display())]
    CreateDirFailed(#[source] std::io::Error, PathBuf),

    #[error("Scanning source directory failed. Path: '{}'", .1.display())]
    ScanFailed(#[source] walkdir::Error, PathBuf),

    #[error("Replacing container failed. Path: '{}'", .1.display())]
    PersistFailed(#[source] std::io::Error, PathBuf),

    #[error("Could not read header. Is this a valid VHP container?")]
    InvalidHeader(#[source] std::io::Error),

    #[error("Invalid index (the data that describes the directory tree is invalid).")]
    InvalidIndex(#[source] std::io::Error),

    #[error("Content of '{0}' is not valid UTF-8")]
    InvalidText(String, #[source] std::string::FromUtf8Error),

    #[error("'{path}' is {length} bytes, which exceeds the single read limit of {limit} bytes")]
    ReadLimitExceeded { path: String, length: u64, limit: u64 },

    #[error("Operation was cancelled")]
    Cancelled,
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        use ArchiveError::*;

        match self {
            NotFoundInArchive(_) | UnknownDirectory(_) | UnknownFile(_) | MissingContainer(_)
            | NoContainer => ErrorKind::NotFound,
            AlreadyExists(_) => ErrorKind::AlreadyExists,
            InvalidName(..) => ErrorKind::InvalidName,
            ReadFailed(..) | WriteFailed(..) | CreateDirFailed(..) | ScanFailed(..)
            | PersistFailed(..) => ErrorKind::Io,
            InvalidHeader(_) | InvalidIndex(_) | InvalidText(..) => ErrorKind::Format,
            ReadLimitExceeded { .. } => ErrorKind::ResourceLimit,
            Cancelled => ErrorKind::Cancelled,
        }
    }
}
