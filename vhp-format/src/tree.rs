use std::fmt;
use std::path::PathBuf;

use crate::path;
use crate::{ArchiveError, Result};

/// Stable handle to a directory node. Directory nodes are never freed while the tree lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirId(pub(crate) usize);

/// Stable handle to a file node. A removed file's handle never resolves again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub(crate) usize);

impl DirId {
    pub fn get(self) -> usize {
        self.0
    }
}

impl FileId {
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Where the bytes of a file currently live.
#[derive(Debug)]
pub(crate) enum Content {
    /// Committed to the open container, relative to the start of its data region.
    Container { offset: u64 },
    /// Staged in the workspace and not yet committed.
    Staged(tempfile::TempPath),
    /// Still on the host, waiting for the first save after a create.
    Host(PathBuf),
}

#[derive(Debug)]
pub struct Directory {
    name: String,
    parent: Option<DirId>,
    directories: Vec<DirId>,
    files: Vec<FileId>,
}

impl Directory {
    /// The root directory is the only one with an empty name.
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn parent(&self) -> Option<DirId> {
        self.parent
    }

    #[inline(always)]
    pub fn directories(&self) -> &[DirId] {
        &self.directories
    }

    #[inline(always)]
    pub fn files(&self) -> &[FileId] {
        &self.files
    }
}

#[derive(Debug)]
pub struct File {
    name: String,
    parent: DirId,
    length: u64,
    pub(crate) content: Content,
}

impl File {
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn parent(&self) -> DirId {
        self.parent
    }

    /// The exact length of the content in bytes.
    #[inline(always)]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Offset into the container's data region, if the content has been committed.
    pub fn offset(&self) -> Option<u64> {
        match self.content {
            Content::Container { offset } => Some(offset),
            _ => None,
        }
    }

    /// True when the content only exists outside the container and needs a save.
    pub fn is_pending(&self) -> bool {
        !matches!(self.content, Content::Container { .. })
    }

    /// Swap in new content, handing back the previous length and content.
    pub(crate) fn replace(&mut self, length: u64, content: Content) -> (u64, Content) {
        let length = std::mem::replace(&mut self.length, length);
        (length, std::mem::replace(&mut self.content, content))
    }
}

/// The directory graph of one container, stored as an arena indexed by [DirId] and [FileId].
///
/// Parents are stored as ids, so upward navigation never owns anything.
#[derive(Debug)]
pub struct Tree {
    directories: Vec<Directory>,
    files: Vec<Option<File>>,
}

impl Default for Tree {
    fn default() -> Self {
        Tree::new()
    }
}

impl Tree {
    pub fn new() -> Tree {
        Tree {
            directories: vec![Directory {
                name: String::new(),
                parent: None,
                directories: vec![],
                files: vec![],
            }],
            files: vec![],
        }
    }

    #[inline(always)]
    pub fn root(&self) -> DirId {
        DirId(0)
    }

    pub fn directory(&self, id: DirId) -> Option<&Directory> {
        self.directories.get(id.0)
    }

    pub fn file(&self, id: FileId) -> Option<&File> {
        self.files.get(id.0).and_then(|x| x.as_ref())
    }

    pub(crate) fn file_mut(&mut self, id: FileId) -> Option<&mut File> {
        self.files.get_mut(id.0).and_then(|x| x.as_mut())
    }

    pub(crate) fn checked_directory(&self, id: DirId) -> Result<&Directory> {
        self.directory(id)
            .ok_or(ArchiveError::UnknownDirectory(id.0))
    }

    pub(crate) fn checked_file(&self, id: FileId) -> Result<&File> {
        self.file(id).ok_or(ArchiveError::UnknownFile(id.0))
    }

    /// Every live file, in arena order.
    pub fn iter_files(&self) -> impl Iterator<Item = (FileId, &File)> {
        self.files
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|f| (FileId(i), f)))
    }

    pub fn file_count(&self) -> usize {
        self.iter_files().count()
    }

    pub fn directory_count(&self) -> usize {
        self.directories.len()
    }

    /// Sum of the declared lengths of every live file.
    pub fn total_length(&self) -> u64 {
        self.iter_files().map(|(_, f)| f.length).sum()
    }

    pub fn find_directory(&self, parent: DirId, name: &str) -> Option<DirId> {
        self.directory(parent)?
            .directories
            .iter()
            .copied()
            .find(|id| self.directories[id.0].name == name)
    }

    pub fn find_file(&self, parent: DirId, name: &str) -> Option<FileId> {
        self.directory(parent)?
            .files
            .iter()
            .copied()
            .find(|id| self.file(*id).map(|f| f.name == name).unwrap_or(false))
    }

    fn ensure_free(&self, parent: DirId, name: &str) -> Result<()> {
        path::validate_name(name).map_err(|e| ArchiveError::InvalidName(e, name.to_string()))?;
        self.checked_directory(parent)?;

        if self.find_directory(parent, name).is_some() || self.find_file(parent, name).is_some() {
            return Err(ArchiveError::AlreadyExists(path::join(
                &self.path_of_directory(parent),
                name,
            )));
        }

        Ok(())
    }

    pub fn add_directory(&mut self, parent: DirId, name: &str) -> Result<DirId> {
        self.ensure_free(parent, name)?;

        let id = DirId(self.directories.len());
        self.directories.push(Directory {
            name: name.to_string(),
            parent: Some(parent),
            directories: vec![],
            files: vec![],
        });
        self.directories[parent.0].directories.push(id);
        tracing::trace!("mkdir: {} in {}", name, parent);
        Ok(id)
    }

    /// Returns the child directory `name`, creating it if missing.
    pub fn ensure_directory(&mut self, parent: DirId, name: &str) -> Result<DirId> {
        match self.find_directory(parent, name) {
            Some(id) => Ok(id),
            None => self.add_directory(parent, name),
        }
    }

    pub(crate) fn add_file(
        &mut self,
        parent: DirId,
        name: &str,
        length: u64,
        content: Content,
    ) -> Result<FileId> {
        self.ensure_free(parent, name)?;

        let id = FileId(self.files.len());
        self.files.push(Some(File {
            name: name.to_string(),
            parent,
            length,
            content,
        }));
        self.directories[parent.0].files.push(id);
        tracing::trace!("insert: {} ({} bytes) in {}", name, length, parent);
        Ok(id)
    }

    /// Detach a file from its parent. The returned node owns any staged content.
    pub fn remove_file(&mut self, id: FileId) -> Option<File> {
        self.detach_file(id).map(|(file, _)| file)
    }

    /// Like [remove_file][Self::remove_file], also returning the file's position among
    /// its siblings so it can be put back with [reattach_file][Self::reattach_file].
    pub(crate) fn detach_file(&mut self, id: FileId) -> Option<(File, usize)> {
        let file = self.files.get_mut(id.0)?.take()?;
        let siblings = &mut self.directories[file.parent.0].files;
        let position = siblings.iter().position(|x| *x == id).unwrap_or(siblings.len());
        siblings.retain(|x| *x != id);
        tracing::trace!("remove: {} from {}", file.name, file.parent);
        Some((file, position))
    }

    pub(crate) fn reattach_file(&mut self, id: FileId, file: File, position: usize) {
        let siblings = &mut self.directories[file.parent.0].files;
        siblings.insert(position.min(siblings.len()), id);
        tracing::trace!("restore: {} in {}", file.name, file.parent);
        if let Some(slot) = self.files.get_mut(id.0) {
            *slot = Some(file);
        }
    }

    /// Number of directory nodes allocated so far. Pass it to
    /// [rollback_directories][Self::rollback_directories] to undo later additions.
    pub(crate) fn directory_mark(&self) -> usize {
        self.directories.len()
    }

    /// Drop every directory added after `mark`. Those directories must hold no files.
    pub(crate) fn rollback_directories(&mut self, mark: usize) {
        while self.directories.len() > mark.max(1) {
            let id = DirId(self.directories.len() - 1);
            if let Some(dir) = self.directories.pop() {
                if let Some(parent) = dir.parent.and_then(|p| self.directories.get_mut(p.0)) {
                    parent.directories.retain(|x| *x != id);
                }
                tracing::trace!("rmdir: {} from {:?}", dir.name, dir.parent);
            }
        }
    }

    /// Resolve a `/`-delimited path to a directory, starting at `start` or the root.
    ///
    /// An empty path resolves to the start directory itself.
    pub fn resolve_directory(&self, start: Option<DirId>, path: &str) -> Option<DirId> {
        let start = start.unwrap_or_else(|| self.root());
        self.directory(start)?;

        let result = path::segments(path).try_fold(start, |dir, name| self.find_directory(dir, name));
        tracing::trace!("resolve_directory {:?} from {}: {:?}", path, start, result);
        result
    }

    /// Resolve a `/`-delimited path to a file, starting at `start` or the root.
    pub fn resolve_file(&self, start: Option<DirId>, path: &str) -> Option<FileId> {
        let (parents, name) = path::split_last(path)?;
        let start = start.unwrap_or_else(|| self.root());
        self.directory(start)?;

        let dir = parents
            .into_iter()
            .try_fold(start, |dir, name| self.find_directory(dir, name))?;
        let result = self.find_file(dir, name);
        tracing::trace!("resolve_file {:?} from {}: {:?}", path, start, result);
        result
    }

    /// Full virtual path of a directory, relative to the root. The root itself is `""`.
    pub fn path_of_directory(&self, id: DirId) -> String {
        let mut parts = vec![];
        let mut cursor = self.directory(id);

        while let Some(dir) = cursor {
            if dir.parent.is_none() {
                break;
            }
            parts.push(dir.name.as_str());
            cursor = dir.parent.and_then(|p| self.directory(p));
        }

        parts.reverse();
        parts.join("/")
    }

    pub fn path_of_file(&self, id: FileId) -> Option<String> {
        let file = self.file(id)?;
        Some(path::join(&self.path_of_directory(file.parent), &file.name))
    }
}
