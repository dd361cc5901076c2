use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;

use tempfile::TempPath;

use crate::fs::copy_chunked;
use crate::{ArchiveError, Interrupt, Result};

/// Staging area for content that has not been committed to a container yet.
///
/// Every staged blob is a uniquely named file that is deleted once its [TempPath] drops.
#[derive(Debug, Clone)]
pub(crate) struct Workspace {
    path: PathBuf,
}

impl Workspace {
    pub(crate) fn new(path: PathBuf) -> Workspace {
        Workspace { path }
    }

    pub(crate) fn stage<R: Read + ?Sized>(
        &self,
        reader: &mut R,
        buffer_size: usize,
        interrupt: &Interrupt,
    ) -> Result<(u64, TempPath)> {
        std::fs::create_dir_all(&self.path)
            .map_err(|e| ArchiveError::CreateDirFailed(e, self.path.clone()))?;

        let (file, temp_path) = tempfile::Builder::new()
            .prefix("stage-")
            .suffix(".part")
            .tempfile_in(&self.path)
            .map_err(|e| ArchiveError::WriteFailed(e, self.path.clone()))?
            .into_parts();

        let mut writer = BufWriter::with_capacity(buffer_size, file);
        let length = copy_chunked(reader, &mut writer, buffer_size, interrupt, None)
            .map_err(|e| e.into_archive_error(&self.path, &temp_path))?;
        writer
            .flush()
            .map_err(|e| ArchiveError::WriteFailed(e, temp_path.to_path_buf()))?;

        tracing::debug!(path = %temp_path.display(), length, "staged content");
        Ok((length, temp_path))
    }
}
