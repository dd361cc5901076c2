//! Host filesystem helpers: scanning source trees and chunked copies.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::path::IntoNameError;
use crate::tree::{Content, DirId, Tree};
use crate::{ArchiveError, Interrupt, Result};

pub(crate) enum CopyError {
    Read(std::io::Error),
    Write(std::io::Error),
    Cancelled,
}

impl CopyError {
    pub(crate) fn into_archive_error(self, source: &Path, target: &Path) -> ArchiveError {
        match self {
            CopyError::Read(e) => ArchiveError::ReadFailed(e, source.to_path_buf()),
            CopyError::Write(e) => ArchiveError::WriteFailed(e, target.to_path_buf()),
            CopyError::Cancelled => ArchiveError::Cancelled,
        }
    }
}

/// Copy `reader` into `writer` through a buffer of `buffer_size` bytes, polling
/// `interrupt` before every chunk.
///
/// When `expected` is given, ending early is a read error.
pub(crate) fn copy_chunked<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    interrupt: &Interrupt,
    expected: Option<u64>,
) -> std::result::Result<u64, CopyError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    loop {
        if interrupt.is_triggered() {
            return Err(CopyError::Cancelled);
        }

        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };

        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        total += n as u64;
    }

    match expected {
        Some(expected) if expected != total => Err(CopyError::Read(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("expected {} bytes of content, found {}", expected, total),
        ))),
        _ => Ok(total),
    }
}

/// The entry name a host path will have inside the tree.
pub(crate) fn host_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|x| x.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ArchiveError::InvalidName(
                IntoNameError::UnrepresentableStr,
                path.to_string_lossy().into_owned(),
            )
        })
}

fn require(path: &Path, is_dir: bool) -> Result<std::fs::Metadata> {
    let meta =
        std::fs::metadata(path).map_err(|e| ArchiveError::ReadFailed(e, path.to_path_buf()))?;

    let matches = if is_dir { meta.is_dir() } else { meta.is_file() };
    if !matches {
        let msg = if is_dir {
            "not a directory"
        } else {
            "not a regular file"
        };
        return Err(ArchiveError::ReadFailed(
            std::io::Error::new(ErrorKind::InvalidInput, msg),
            path.to_path_buf(),
        ));
    }

    Ok(meta)
}

/// Add a single host file below `parent`, keeping a reference to its host path.
pub(crate) fn add_host_file(tree: &mut Tree, parent: DirId, path: &Path) -> Result<()> {
    let meta = require(path, false)?;
    let name = host_name(path)?;
    tree.add_file(parent, &name, meta.len(), Content::Host(path.to_path_buf()))?;
    Ok(())
}

/// Add everything inside the host directory `source` below `parent`, sorted by name.
///
/// Entries that are neither regular files nor directories are skipped.
pub(crate) fn scan_directory(tree: &mut Tree, parent: DirId, source: &Path) -> Result<()> {
    require(source, true)?;

    let mut dirs: HashMap<PathBuf, DirId> = HashMap::new();
    dirs.insert(source.to_path_buf(), parent);

    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| ArchiveError::ScanFailed(e, source.to_path_buf()))?;
        let path = entry.path();

        let dir = match path.parent().and_then(|p| dirs.get(p)) {
            Some(v) => *v,
            None => continue,
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            let id = tree.add_directory(dir, &host_name(path)?)?;
            dirs.insert(path.to_path_buf(), id);
        } else if file_type.is_file() {
            let meta = entry
                .metadata()
                .map_err(|e| ArchiveError::ScanFailed(e, source.to_path_buf()))?;
            tree.add_file(
                dir,
                &host_name(path)?,
                meta.len(),
                Content::Host(path.to_path_buf()),
            )?;
        } else {
            tracing::warn!(
                path = %path.display(),
                "skipping entry that is neither a file nor a directory"
            );
        }
    }

    Ok(())
}
