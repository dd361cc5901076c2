//! Herein lies the brains of the `vhp` container format.
//!
//! An [ArchiveHandle][ArchiveHandle] owns one container: the in-memory [Tree][Tree]
//! parsed from its index, the workspace used to stage new content, and the options
//! controlling chunked copies and autosave.

mod archive;
mod de;
mod error;
mod fs;
mod header;
mod interrupt;
mod meta;
pub mod path;
mod record;
mod ser;
mod tree;
mod workspace;

pub use archive::{ArchiveHandle, HandleOptions, DEFAULT_BUFFER_SIZE, READ_LIMIT};
pub use error::{ArchiveError, ErrorKind, Result};
pub use header::VERSION;
pub use interrupt::Interrupt;
pub use path::IntoNameError;
pub use tree::{DirId, Directory, File, FileId, Tree};
