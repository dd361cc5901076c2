use std::fs::File as HostFile;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use memmap2::MmapOptions;

use crate::{
    de::DeserializeOwned,
    fs::{self, copy_chunked},
    header::VhpHeader,
    meta::ContainerIndex,
    path::{self as vpath, IntoNameError},
    ser::Serialize,
    tree::{Content, DirId, File, FileId, Tree},
    workspace::Workspace,
    ArchiveError, Interrupt, Result,
};

/// Chunk size used for streaming copies unless configured otherwise.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Largest file that can be read in a single call. Bigger files must be extracted.
pub const READ_LIMIT: u64 = 1 << 30;

/// Configuration for an [ArchiveHandle].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleOptions {
    /// Where `create` and `save` write the container.
    pub container_path: PathBuf,
    /// Staging directory for uncommitted content. Do not store anything else here.
    pub workspace_path: PathBuf,
    /// Size in bytes of the buffer used for every chunked copy.
    pub buffer_size: usize,
    /// Rewrite the container after every write or removal.
    pub autosave: bool,
}

impl HandleOptions {
    pub fn new<C: Into<PathBuf>, W: Into<PathBuf>>(container_path: C, workspace_path: W) -> Self {
        HandleOptions {
            container_path: container_path.into(),
            workspace_path: workspace_path.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            autosave: true,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }
}

/// What to put back when an autosave fails after a tree edit.
enum Undo {
    Insert(FileId),
    Replace(FileId, u64, Content),
    Remove(FileId, File, usize),
}

#[derive(Debug)]
struct Container {
    path: PathBuf,
    file: HostFile,
    header: VhpHeader,
}

impl Container {
    /// Open a container and parse its header and index. File data is left on disk.
    fn open(path: &Path) -> Result<(Container, Tree)> {
        let file = HostFile::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ArchiveError::MissingContainer(path.to_path_buf()),
            _ => ArchiveError::ReadFailed(e, path.to_path_buf()),
        })?;
        let file_len = file
            .metadata()
            .map_err(|e| ArchiveError::ReadFailed(e, path.to_path_buf()))?
            .len();

        let mut reader = BufReader::new(&file);
        let header = VhpHeader::deserialize_owned(&mut reader).map_err(ArchiveError::InvalidHeader)?;

        match header.container_len() {
            Some(len) if len <= file_len => {}
            _ => {
                return Err(ArchiveError::InvalidHeader(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "container is shorter than its header declares",
                )))
            }
        }

        let mut index_reader = (&mut reader).take(header.index_len);
        let index =
            ContainerIndex::deserialize_owned(&mut index_reader).map_err(ArchiveError::InvalidIndex)?;
        if index_reader.limit() != 0 {
            return Err(ArchiveError::InvalidIndex(std::io::Error::new(
                ErrorKind::InvalidData,
                "trailing bytes after index",
            )));
        }

        let tree = index
            .into_tree(header.data_len)
            .map_err(ArchiveError::InvalidIndex)?;
        drop(reader);

        Ok((
            Container {
                path: path.to_path_buf(),
                file,
                header,
            },
            tree,
        ))
    }

    fn data_reader(&self, offset: u64, length: u64) -> Result<impl Read + '_> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(self.header.data_start() + offset))
            .map_err(|e| ArchiveError::ReadFailed(e, self.path.clone()))?;
        Ok(file.take(length))
    }

    fn read_data(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(vec![]);
        }

        // Safety: the mapping is copied out before returning and the container is only
        // ever replaced by renaming a new file over it, never modified in place.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(self.header.data_start() + offset)
                .len(length as usize)
                .map(&self.file)
        }
        .map_err(|e| ArchiveError::ReadFailed(e, self.path.clone()))?;

        Ok(mmap.to_vec())
    }
}

/// One open container: its tree, the workspace staging its edits, and its options.
///
/// A handle is a single-owner object. Mutating calls take `&mut self`, so sharing one
/// between threads requires external serialization.
#[derive(Debug)]
pub struct ArchiveHandle {
    options: HandleOptions,
    tree: Tree,
    container: Option<Container>,
    workspace: Workspace,
    interrupt: Interrupt,
    dirty: bool,
}

impl ArchiveHandle {
    pub fn new(options: HandleOptions) -> ArchiveHandle {
        let workspace = Workspace::new(options.workspace_path.clone());

        ArchiveHandle {
            options,
            tree: Tree::new(),
            container: None,
            workspace,
            interrupt: Interrupt::new(),
            dirty: false,
        }
    }

    #[inline(always)]
    pub fn options(&self) -> &HandleOptions {
        &self.options
    }

    #[inline(always)]
    pub fn autosave(&self) -> bool {
        self.options.autosave
    }

    #[inline(always)]
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    #[inline(always)]
    pub fn root(&self) -> DirId {
        self.tree.root()
    }

    /// Path of the container the committed file data is currently read from.
    pub fn source_path(&self) -> Option<&Path> {
        self.container.as_ref().map(|c| c.path.as_path())
    }

    /// True when the tree has edits that have not been saved yet.
    #[inline(always)]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Install the flag that chunked copies poll for cancellation.
    pub fn set_interrupt(&mut self, interrupt: Interrupt) {
        self.interrupt = interrupt;
    }

    #[inline(always)]
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Swap in a freshly scanned tree and save it. On failure the previous tree and
    /// container come back.
    fn replace_and_save(&mut self, tree: Tree) -> Result<()> {
        let previous_tree = std::mem::replace(&mut self.tree, tree);
        let previous_container = self.container.take();
        let was_dirty = std::mem::replace(&mut self.dirty, true);

        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "create failed, keeping previous tree");
            self.tree = previous_tree;
            self.container = previous_container;
            self.dirty = was_dirty;
            return Err(e);
        }
        Ok(())
    }

    /// Pack every file and directory inside `source` into a new container.
    pub fn create<P: AsRef<Path>>(&mut self, source: P) -> Result<()> {
        let source = source.as_ref();
        let mut tree = Tree::new();
        let root = tree.root();
        fs::scan_directory(&mut tree, root, source)?;

        tracing::info!(
            source = %source.display(),
            files = tree.file_count(),
            bytes = tree.total_length(),
            "creating container"
        );

        self.replace_and_save(tree)
    }

    /// Pack a selection of host directories and files into a new container.
    ///
    /// Each directory becomes a child of the root, named after its last path component,
    /// and each file lands directly in the root.
    pub fn create_from<D, F>(&mut self, directories: &[D], files: &[F]) -> Result<()>
    where
        D: AsRef<Path>,
        F: AsRef<Path>,
    {
        let mut tree = Tree::new();
        let root = tree.root();

        for dir in directories {
            let dir = dir.as_ref();
            let name = fs::host_name(dir)?;
            let id = tree.add_directory(root, &name)?;
            fs::scan_directory(&mut tree, id, dir)?;
        }

        for file in files {
            fs::add_host_file(&mut tree, root, file.as_ref())?;
        }

        tracing::info!(
            directories = directories.len(),
            files = tree.file_count(),
            bytes = tree.total_length(),
            "creating container from selection"
        );

        self.replace_and_save(tree)
    }

    /// Load the tree of an existing container. Only the header and index are read.
    ///
    /// Any unsaved edits and staged content of the previous tree are discarded.
    pub fn read<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let (container, tree) = Container::open(path)?;

        tracing::info!(
            path = %path.display(),
            files = tree.file_count(),
            directories = tree.directory_count(),
            "read container index"
        );

        self.container = Some(container);
        self.tree = tree;
        self.dirty = false;
        Ok(())
    }

    fn resolve_file(&self, path: &str, start: Option<DirId>) -> Result<FileId> {
        self.tree
            .resolve_file(start, path)
            .ok_or_else(|| ArchiveError::NotFoundInArchive(path.to_string()))
    }

    fn resolve_directory(&self, path: &str, start: Option<DirId>) -> Result<DirId> {
        self.tree
            .resolve_directory(start, path)
            .ok_or_else(|| ArchiveError::NotFoundInArchive(path.to_string()))
    }

    pub fn file_exists(&self, path: &str, start: Option<DirId>) -> bool {
        self.tree.resolve_file(start, path).is_some()
    }

    fn content_path(&self, file: &File) -> PathBuf {
        match &file.content {
            Content::Container { .. } => self
                .container
                .as_ref()
                .map(|c| c.path.clone())
                .unwrap_or_default(),
            Content::Staged(path) => path.to_path_buf(),
            Content::Host(path) => path.clone(),
        }
    }

    fn open_content(&self, file: &File) -> Result<Box<dyn Read + '_>> {
        match &file.content {
            Content::Container { offset } => {
                let container = self.container.as_ref().ok_or(ArchiveError::NoContainer)?;
                Ok(Box::new(container.data_reader(*offset, file.length())?))
            }
            Content::Staged(path) => open_host(path, file.length()),
            Content::Host(path) => open_host(path, file.length()),
        }
    }

    fn extract_file_to(&self, file: &File, target: &Path) -> Result<()> {
        self.interrupt.check()?;

        let mut reader = self.open_content(file)?;
        let out = HostFile::create(target)
            .map_err(|e| ArchiveError::WriteFailed(e, target.to_path_buf()))?;
        let mut writer = BufWriter::with_capacity(self.options.buffer_size, out);

        copy_chunked(
            &mut reader,
            &mut writer,
            self.options.buffer_size,
            &self.interrupt,
            Some(file.length()),
        )
        .map_err(|e| e.into_archive_error(&self.content_path(file), target))?;

        writer
            .flush()
            .map_err(|e| ArchiveError::WriteFailed(e, target.to_path_buf()))
    }

    fn extract_contents(&self, dir: DirId, dest: &Path) -> Result<()> {
        std::fs::create_dir_all(dest)
            .map_err(|e| ArchiveError::CreateDirFailed(e, dest.to_path_buf()))?;

        let directory = self.tree.checked_directory(dir)?;

        for id in directory.files() {
            let file = self.tree.checked_file(*id)?;
            self.extract_file_to(file, &dest.join(file.name()))?;
        }

        for id in directory.directories() {
            let child = self.tree.checked_directory(*id)?;
            self.extract_contents(*id, &dest.join(child.name()))?;
        }

        Ok(())
    }

    /// Recreate the whole tree inside `dest`.
    pub fn extract<P: AsRef<Path>>(&self, dest: P) -> Result<()> {
        let start = Instant::now();
        self.extract_contents(self.tree.root(), dest.as_ref())?;
        tracing::info!(
            dest = %dest.as_ref().display(),
            files = self.tree.file_count(),
            elapsed = ?start.elapsed(),
            "extracted container"
        );
        Ok(())
    }

    /// Recreate the directory at `path` as `dest/<name>`. The root extracts its contents
    /// straight into `dest`.
    pub fn extract_directory<P: AsRef<Path>>(&self, path: &str, dest: P) -> Result<()> {
        let id = self.resolve_directory(path, None)?;
        self.extract_directory_node(id, dest)
    }

    pub fn extract_directory_node<P: AsRef<Path>>(&self, id: DirId, dest: P) -> Result<()> {
        let dest = dest.as_ref();
        let directory = self.tree.checked_directory(id)?;

        match directory.parent() {
            None => self.extract_contents(id, dest),
            Some(_) => self.extract_contents(id, &dest.join(directory.name())),
        }
    }

    /// Extract the files at `paths` flat into `dest`.
    ///
    /// Every path is resolved before anything is written. Files sharing a name overwrite
    /// each other in list order.
    pub fn extract_files<S, P>(&self, paths: &[S], dest: P) -> Result<()>
    where
        S: AsRef<str>,
        P: AsRef<Path>,
    {
        let ids = paths
            .iter()
            .map(|p| self.resolve_file(p.as_ref(), None))
            .collect::<Result<Vec<_>>>()?;
        self.extract_file_nodes(&ids, dest)
    }

    pub fn extract_file_nodes<P: AsRef<Path>>(&self, ids: &[FileId], dest: P) -> Result<()> {
        let dest = dest.as_ref();
        let files = ids
            .iter()
            .map(|id| self.tree.checked_file(*id))
            .collect::<Result<Vec<_>>>()?;

        std::fs::create_dir_all(dest)
            .map_err(|e| ArchiveError::CreateDirFailed(e, dest.to_path_buf()))?;

        for file in files {
            self.extract_file_to(file, &dest.join(file.name()))?;
        }

        Ok(())
    }

    /// Read one file completely. Fails for files over [READ_LIMIT].
    pub fn read_all_bytes(&self, path: &str, start: Option<DirId>) -> Result<Vec<u8>> {
        let id = self.resolve_file(path, start)?;
        self.read_file(id)
    }

    pub fn read_all_text(&self, path: &str, start: Option<DirId>) -> Result<String> {
        let bytes = self.read_all_bytes(path, start)?;
        String::from_utf8(bytes).map_err(|e| ArchiveError::InvalidText(path.to_string(), e))
    }

    pub fn read_file(&self, id: FileId) -> Result<Vec<u8>> {
        let file = self.tree.checked_file(id)?;

        if file.length() > READ_LIMIT {
            return Err(ArchiveError::ReadLimitExceeded {
                path: self.tree.path_of_file(id).unwrap_or_default(),
                length: file.length(),
                limit: READ_LIMIT,
            });
        }

        match &file.content {
            Content::Container { offset } => self
                .container
                .as_ref()
                .ok_or(ArchiveError::NoContainer)?
                .read_data(*offset, file.length()),
            _ => {
                let source = self.content_path(file);
                let mut reader = self.open_content(file)?;
                let mut buf = Vec::with_capacity(file.length() as usize);
                copy_chunked(
                    &mut reader,
                    &mut buf,
                    self.options.buffer_size,
                    &self.interrupt,
                    Some(file.length()),
                )
                .map_err(|e| e.into_archive_error(&source, &source))?;
                Ok(buf)
            }
        }
    }

    /// Insert or replace the file `name` in `dir` with everything `reader` yields.
    ///
    /// The content is staged in the workspace. With autosave on, the container is
    /// rewritten before returning; otherwise the edit waits for [save][Self::save].
    pub fn write_stream<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
        name: &str,
        dir: DirId,
        override_existing: bool,
    ) -> Result<FileId> {
        self.tree.checked_directory(dir)?;
        vpath::validate_name(name).map_err(|e| ArchiveError::InvalidName(e, name.to_string()))?;

        let existing = self.tree.find_file(dir, name);
        let taken = match existing {
            Some(_) => !override_existing,
            None => self.tree.find_directory(dir, name).is_some(),
        };
        if taken {
            return Err(ArchiveError::AlreadyExists(vpath::join(
                &self.tree.path_of_directory(dir),
                name,
            )));
        }

        let (length, staged) =
            self.workspace
                .stage(reader, self.options.buffer_size, &self.interrupt)?;

        let (id, undo) = match existing.and_then(|id| self.tree.file_mut(id).map(|f| (id, f))) {
            Some((id, file)) => {
                let (old_length, old_content) = file.replace(length, Content::Staged(staged));
                (id, Undo::Replace(id, old_length, old_content))
            }
            None => {
                let id = self
                    .tree
                    .add_file(dir, name, length, Content::Staged(staged))?;
                (id, Undo::Insert(id))
            }
        };

        tracing::debug!(name, %dir, length, replaced = existing.is_some(), "wrote file");
        self.changed(undo)?;
        Ok(id)
    }

    pub fn write_all_bytes(
        &mut self,
        data: &[u8],
        name: &str,
        dir: DirId,
        override_existing: bool,
    ) -> Result<FileId> {
        let mut data = data;
        self.write_stream(&mut data, name, dir, override_existing)
    }

    pub fn write_all_text(
        &mut self,
        content: &str,
        name: &str,
        dir: DirId,
        override_existing: bool,
    ) -> Result<FileId> {
        self.write_all_bytes(content.as_bytes(), name, dir, override_existing)
    }

    /// Write to a full virtual path, creating missing parent directories.
    pub fn write_all_bytes_at(
        &mut self,
        data: &[u8],
        path: &str,
        override_existing: bool,
    ) -> Result<FileId> {
        let (parents, name) = vpath::split_last(path)
            .ok_or_else(|| ArchiveError::InvalidName(IntoNameError::EmptyName, path.to_string()))?;

        if !override_existing && self.tree.resolve_file(None, path).is_some() {
            return Err(ArchiveError::AlreadyExists(path.to_string()));
        }

        let mark = self.tree.directory_mark();
        let mut dir = Ok(self.tree.root());
        for parent in parents {
            dir = dir.and_then(|d| self.tree.ensure_directory(d, parent));
        }
        let written = dir.and_then(|dir| self.write_all_bytes(data, name, dir, override_existing));

        if written.is_err() {
            self.tree.rollback_directories(mark);
        }
        written
    }

    /// Detach the file at `path`. Durable only after the next save.
    pub fn remove_file(&mut self, path: &str, start: Option<DirId>) -> Result<()> {
        let id = self.resolve_file(path, start)?;
        self.remove_file_node(id)
    }

    pub fn remove_file_node(&mut self, id: FileId) -> Result<()> {
        let (file, position) = self
            .tree
            .detach_file(id)
            .ok_or(ArchiveError::UnknownFile(id.get()))?;
        self.changed(Undo::Remove(id, file, position))
    }

    /// Record an edit. With autosave on, a failed save reverts the edit so the tree
    /// keeps matching the container on disk.
    fn changed(&mut self, undo: Undo) -> Result<()> {
        let was_dirty = std::mem::replace(&mut self.dirty, true);
        if !self.options.autosave {
            return Ok(());
        }

        let result = self.save();
        if let Err(e) = &result {
            tracing::warn!(error = %e, "autosave failed, reverting edit");
            match undo {
                Undo::Insert(id) => {
                    self.tree.remove_file(id);
                }
                Undo::Replace(id, length, content) => {
                    if let Some(file) = self.tree.file_mut(id) {
                        file.replace(length, content);
                    }
                }
                Undo::Remove(id, file, position) => self.tree.reattach_file(id, file, position),
            }
            self.dirty = was_dirty;
        }
        result
    }

    /// Write the tree and all of its content to a fresh container that replaces the
    /// configured container path.
    ///
    /// The new container is assembled in a temporary file next to the target and renamed
    /// over it only once complete, so an interrupted save leaves the old one intact.
    pub fn save(&mut self) -> Result<()> {
        self.interrupt.check()?;
        let start = Instant::now();
        let target = self.options.container_path.clone();
        let buffer_size = self.options.buffer_size;

        let (index, order) = ContainerIndex::from_tree(&self.tree);
        let mut index_bytes = vec![];
        index
            .write(&mut index_bytes)
            .map_err(|e| ArchiveError::WriteFailed(e, target.clone()))?;

        let data_len: u64 = order
            .iter()
            .filter_map(|id| self.tree.file(*id))
            .map(|f| f.length())
            .sum();
        let header = VhpHeader::new(index_bytes.len() as u64, data_len);

        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| ArchiveError::CreateDirFailed(e, dir.clone()))?;

        let temp = tempfile::Builder::new()
            .prefix(".vhp-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| ArchiveError::WriteFailed(e, dir.clone()))?;
        let temp_path = temp.path().to_path_buf();
        let write_failed = |e: std::io::Error| ArchiveError::WriteFailed(e, temp_path.clone());

        {
            let mut writer = BufWriter::with_capacity(buffer_size, temp.as_file());
            header.write(&mut writer).map_err(write_failed)?;
            writer.write_all(&index_bytes).map_err(write_failed)?;

            for id in order.iter() {
                let file = self.tree.checked_file(*id)?;
                let mut reader = self.open_content(file)?;
                copy_chunked(
                    &mut reader,
                    &mut writer,
                    buffer_size,
                    &self.interrupt,
                    Some(file.length()),
                )
                .map_err(|e| e.into_archive_error(&self.content_path(file), &temp_path))?;
            }

            writer.flush().map_err(write_failed)?;
        }
        temp.as_file().sync_all().map_err(write_failed)?;

        let file = temp
            .persist(&target)
            .map_err(|e| ArchiveError::PersistFailed(e.error, target.clone()))?;
        drop(file);

        let file =
            HostFile::open(&target).map_err(|e| ArchiveError::ReadFailed(e, target.clone()))?;

        // Every file now lives in the new container; dropping the old contents also
        // clears their staged copies from the workspace.
        let mut offset = 0u64;
        for id in order {
            if let Some(file) = self.tree.file_mut(id) {
                let length = file.length();
                file.replace(length, Content::Container { offset });
                offset += length;
            }
        }

        self.container = Some(Container {
            path: target.clone(),
            file,
            header,
        });
        self.dirty = false;

        tracing::info!(
            path = %target.display(),
            files = self.tree.file_count(),
            bytes = data_len,
            elapsed = ?start.elapsed(),
            "saved container"
        );
        Ok(())
    }
}

/// Open a staged or host file, refusing it if its size no longer matches the tree.
fn open_host<'a>(path: &Path, length: u64) -> Result<Box<dyn Read + 'a>> {
    let read_failed = |e: std::io::Error| ArchiveError::ReadFailed(e, path.to_path_buf());
    let file = HostFile::open(path).map_err(read_failed)?;
    let actual = file.metadata().map_err(read_failed)?.len();
    if actual != length {
        return Err(read_failed(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("expected {} bytes, found {}", length, actual),
        )));
    }
    Ok(Box::new(file.take(length)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind as Kind;

    fn options(dir: &Path) -> HandleOptions {
        HandleOptions::new(dir.join("test.vhp"), dir.join("workspace"))
    }

    fn source_tree(dir: &Path) -> PathBuf {
        let source = dir.join("source");
        std::fs::create_dir_all(source.join("a")).unwrap();
        std::fs::write(source.join("a/b.txt"), "hi").unwrap();
        std::fs::write(source.join("c.txt"), "bye").unwrap();
        source
    }

    #[test]
    fn create_then_read_text() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());

        let mut handle = ArchiveHandle::new(options(dir.path()));
        handle.create(&source).unwrap();
        assert!(!handle.is_dirty());

        let mut reader = ArchiveHandle::new(options(dir.path()));
        reader.read(dir.path().join("test.vhp")).unwrap();

        let tree = reader.tree();
        let root = tree.directory(tree.root()).unwrap();
        assert_eq!(root.directories().len(), 1);
        assert_eq!(root.files().len(), 1);
        let a = tree.directory(root.directories()[0]).unwrap();
        assert_eq!(a.name(), "a");
        assert_eq!(tree.file(a.files()[0]).unwrap().name(), "b.txt");
        assert_eq!(tree.file(root.files()[0]).unwrap().name(), "c.txt");

        assert_eq!(reader.read_all_text("a/b.txt", None).unwrap(), "hi");
        assert_eq!(reader.read_all_bytes("c.txt", None).unwrap(), b"bye");
    }

    #[test]
    fn read_missing_container() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = ArchiveHandle::new(options(dir.path()));
        let err = handle.read(dir.path().join("nope.vhp")).unwrap_err();
        assert_eq!(err.kind(), Kind::NotFound);
    }

    #[test]
    fn read_garbage_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.vhp");
        std::fs::write(&path, b"this is not a container, just some text").unwrap();

        let mut handle = ArchiveHandle::new(options(dir.path()));
        assert_eq!(handle.read(&path).unwrap_err().kind(), Kind::Format);
    }

    #[test]
    fn truncated_container_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let mut handle = ArchiveHandle::new(options(dir.path()));
        handle.create(&source).unwrap();

        let path = dir.path().join("test.vhp");
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        let mut reader = ArchiveHandle::new(options(dir.path()));
        assert_eq!(reader.read(&path).unwrap_err().kind(), Kind::Format);
    }

    #[test]
    fn unresolved_paths_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let mut handle = ArchiveHandle::new(options(dir.path()));
        handle.create(&source).unwrap();

        for err in [
            handle.read_all_bytes("a/missing.txt", None).unwrap_err(),
            handle.read_all_text("A/b.txt", None).unwrap_err(),
            handle
                .extract_directory("nope", dir.path().join("out"))
                .unwrap_err(),
            handle
                .extract_files(&["c.txt", "zzz"], dir.path().join("out"))
                .unwrap_err(),
        ] {
            assert_eq!(err.kind(), Kind::NotFound);
        }

        // Nothing is written when one of the requested files is missing.
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn start_node_scopes_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let mut handle = ArchiveHandle::new(options(dir.path()));
        handle.create(&source).unwrap();

        let a = handle.tree().resolve_directory(None, "a").unwrap();
        assert_eq!(handle.read_all_text("b.txt", Some(a)).unwrap(), "hi");
        assert!(handle.file_exists("b.txt", Some(a)));
        assert!(!handle.file_exists("b.txt", None));
    }

    #[test]
    fn override_protection_keeps_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let mut handle = ArchiveHandle::new(options(dir.path()));
        handle.create(&source).unwrap();
        let root = handle.root();

        let err = handle
            .write_all_text("changed", "c.txt", root, false)
            .unwrap_err();
        assert_eq!(err.kind(), Kind::AlreadyExists);
        assert_eq!(handle.read_all_text("c.txt", None).unwrap(), "bye");

        handle
            .write_all_text("changed", "c.txt", root, true)
            .unwrap();
        assert_eq!(handle.read_all_text("c.txt", None).unwrap(), "changed");
    }

    #[test]
    fn deferred_edits_need_save() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let opts = options(dir.path()).with_autosave(false);
        let container = opts.container_path.clone();

        let mut handle = ArchiveHandle::new(opts.clone());
        handle.create(&source).unwrap();
        handle.remove_file("c.txt", None).unwrap();
        handle
            .write_all_text("new", "d.txt", handle.root(), false)
            .unwrap();
        assert!(handle.is_dirty());

        // The staged content is readable before it is committed.
        assert_eq!(handle.read_all_text("d.txt", None).unwrap(), "new");

        let mut persisted = ArchiveHandle::new(opts.clone());
        persisted.read(&container).unwrap();
        assert!(persisted.file_exists("c.txt", None));
        assert!(!persisted.file_exists("d.txt", None));

        handle.save().unwrap();
        persisted.read(&container).unwrap();
        assert!(!persisted.file_exists("c.txt", None));
        assert_eq!(persisted.read_all_text("d.txt", None).unwrap(), "new");
        assert_eq!(persisted.read_all_text("a/b.txt", None).unwrap(), "hi");

        // Committed content no longer occupies the workspace.
        let staged = std::fs::read_dir(dir.path().join("workspace"))
            .unwrap()
            .count();
        assert_eq!(staged, 0);
    }

    #[test]
    fn autosave_persists_removal() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let opts = options(dir.path());
        let mut handle = ArchiveHandle::new(opts.clone());
        handle.create(&source).unwrap();
        handle.remove_file("a/b.txt", None).unwrap();
        assert!(!handle.is_dirty());

        let mut persisted = ArchiveHandle::new(opts);
        persisted.read(dir.path().join("test.vhp")).unwrap();
        assert!(!persisted.file_exists("a/b.txt", None));
        assert!(persisted.tree().resolve_directory(None, "a").is_some());
    }

    #[test]
    fn write_at_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = ArchiveHandle::new(options(dir.path()));
        handle
            .write_all_bytes_at(b"\x00\x01", "x/y/z.bin", false)
            .unwrap();
        assert_eq!(handle.read_all_bytes("x/y/z.bin", None).unwrap(), b"\x00\x01");
        assert_eq!(
            handle
                .write_all_bytes_at(b"", "x/y/z.bin", false)
                .unwrap_err()
                .kind(),
            Kind::AlreadyExists
        );
        assert_eq!(
            handle.write_all_bytes_at(b"", "//", false).unwrap_err().kind(),
            Kind::InvalidName
        );
    }

    #[test]
    fn cannot_shadow_directory_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let mut handle = ArchiveHandle::new(options(dir.path()));
        handle.create(&source).unwrap();
        let root = handle.root();
        assert_eq!(
            handle.write_all_text("x", "a", root, true).unwrap_err().kind(),
            Kind::AlreadyExists
        );
    }

    #[test]
    fn interrupted_save_keeps_old_container() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let opts = options(dir.path()).with_autosave(false);
        let mut handle = ArchiveHandle::new(opts.clone());
        handle.create(&source).unwrap();
        let before = std::fs::read(&opts.container_path).unwrap();

        handle.remove_file("c.txt", None).unwrap();
        let interrupt = Interrupt::new();
        handle.set_interrupt(interrupt.clone());
        interrupt.trigger();
        assert_eq!(handle.save().unwrap_err().kind(), Kind::Cancelled);

        assert_eq!(std::fs::read(&opts.container_path).unwrap(), before);
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".vhp-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn create_from_selection() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let mut handle = ArchiveHandle::new(options(dir.path()));
        handle
            .create_from(&[source.join("a")], &[source.join("c.txt")])
            .unwrap();

        assert_eq!(handle.read_all_text("a/b.txt", None).unwrap(), "hi");
        assert_eq!(handle.read_all_text("c.txt", None).unwrap(), "bye");

        let err = handle
            .create_from(&[source.join("missing")], &[] as &[PathBuf])
            .unwrap_err();
        assert_eq!(err.kind(), Kind::Io);
    }

    #[test]
    fn read_limit_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sparse");
        std::fs::create_dir_all(&source).unwrap();
        let big = HostFile::create(source.join("big.bin")).unwrap();
        big.set_len(READ_LIMIT + 1).unwrap();
        drop(big);

        let mut tree = Tree::new();
        let root = tree.root();
        fs::scan_directory(&mut tree, root, &source).unwrap();

        let mut handle = ArchiveHandle::new(options(dir.path()));
        handle.tree = tree;
        let err = handle.read_all_bytes("big.bin", None).unwrap_err();
        assert_eq!(err.kind(), Kind::ResourceLimit);
    }

    #[test]
    fn failed_autosave_reverts_edits() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let mut handle = ArchiveHandle::new(options(dir.path()));
        handle.create(&source).unwrap();
        let root = handle.root();

        // A non-empty directory in place of the container makes every rename fail.
        let container = dir.path().join("test.vhp");
        std::fs::remove_file(&container).unwrap();
        std::fs::create_dir_all(container.join("blocker")).unwrap();

        let err = handle.write_all_text("new", "d.txt", root, false).unwrap_err();
        assert_eq!(err.kind(), Kind::Io);
        assert!(!handle.file_exists("d.txt", None));

        assert!(handle.write_all_text("changed", "c.txt", root, true).is_err());
        assert_eq!(handle.read_all_text("c.txt", None).unwrap(), "bye");

        assert!(handle.remove_file("c.txt", None).is_err());
        assert_eq!(handle.read_all_text("c.txt", None).unwrap(), "bye");
        let names = handle
            .tree()
            .directory(root)
            .unwrap()
            .files()
            .iter()
            .map(|id| handle.tree().file(*id).unwrap().name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["c.txt"]);

        assert!(handle.write_all_bytes_at(b"z", "x/y/z.bin", false).is_err());
        assert!(handle.tree().resolve_directory(None, "x").is_none());
        assert_eq!(handle.tree().directory_count(), 2);

        assert!(handle.create(&source).is_err());
        assert_eq!(handle.source_path(), Some(container.as_path()));
        assert_eq!(handle.tree().file_count(), 2);
        assert_eq!(handle.read_all_text("a/b.txt", None).unwrap(), "hi");

        assert!(!handle.is_dirty());
        let staged = std::fs::read_dir(dir.path().join("workspace"))
            .unwrap()
            .count();
        assert_eq!(staged, 0);
    }

    #[test]
    fn resized_host_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());

        let mut tree = Tree::new();
        let root = tree.root();
        fs::scan_directory(&mut tree, root, &source).unwrap();
        let mut handle = ArchiveHandle::new(options(dir.path()));
        handle.tree = tree;

        std::fs::write(source.join("a/b.txt"), "hi, but longer now").unwrap();
        std::fs::write(source.join("c.txt"), "b").unwrap();

        assert_eq!(handle.save().unwrap_err().kind(), Kind::Io);
        assert!(!dir.path().join("test.vhp").exists());
        assert_eq!(handle.read_all_bytes("a/b.txt", None).unwrap_err().kind(), Kind::Io);
        assert_eq!(handle.read_all_bytes("c.txt", None).unwrap_err().kind(), Kind::Io);
        assert_eq!(
            handle.extract(dir.path().join("out")).unwrap_err().kind(),
            Kind::Io
        );
    }

    #[test]
    fn extract_variants() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_tree(dir.path());
        let mut handle = ArchiveHandle::new(options(dir.path()).with_buffer_size(1));
        handle.create(&source).unwrap();

        let all = dir.path().join("all");
        handle.extract(&all).unwrap();
        assert_eq!(std::fs::read_to_string(all.join("a/b.txt")).unwrap(), "hi");
        assert_eq!(std::fs::read_to_string(all.join("c.txt")).unwrap(), "bye");

        let sub = dir.path().join("sub");
        handle.extract_directory("a", &sub).unwrap();
        assert_eq!(std::fs::read_to_string(sub.join("a/b.txt")).unwrap(), "hi");

        let flat = dir.path().join("flat");
        handle.extract_files(&["a/b.txt", "c.txt"], &flat).unwrap();
        assert_eq!(std::fs::read_to_string(flat.join("b.txt")).unwrap(), "hi");
        assert_eq!(std::fs::read_to_string(flat.join("c.txt")).unwrap(), "bye");
    }
}
