use std::io::ErrorKind;

use crate::record::{DirectoryRecord, FileRecord, Record, RecordIndex};
use crate::tree::{Content, DirId, FileId, Tree};

/// The serialized form of a [Tree]: a flat record list whose directories refer to
/// their children by [RecordIndex].
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ContainerIndex {
    pub(crate) root: Vec<RecordIndex>,
    pub(crate) records: Vec<Record>,
}

fn invalid(msg: String) -> std::io::Error {
    std::io::Error::new(ErrorKind::InvalidData, msg)
}

impl ContainerIndex {
    #[inline(always)]
    pub(crate) fn record(&self, index: RecordIndex) -> Option<&Record> {
        self.records.get(index.slot())
    }

    /// Flatten a tree, laying out file data contiguously in record order.
    ///
    /// Returns the index together with the files in the order their data must be written.
    pub(crate) fn from_tree(tree: &Tree) -> (ContainerIndex, Vec<FileId>) {
        let mut index = ContainerIndex::default();
        let mut order = vec![];
        let mut next_offset = 0u64;

        index.root = index.flatten(tree, tree.root(), &mut order, &mut next_offset);

        tracing::debug!(
            records = index.records.len(),
            files = order.len(),
            data_len = next_offset,
            "flattened tree"
        );

        (index, order)
    }

    fn flatten(
        &mut self,
        tree: &Tree,
        dir: DirId,
        order: &mut Vec<FileId>,
        next_offset: &mut u64,
    ) -> Vec<RecordIndex> {
        let mut entries = vec![];
        let directory = match tree.directory(dir) {
            Some(v) => v,
            None => return entries,
        };

        for id in directory.files() {
            if let Some(file) = tree.file(*id) {
                self.records.push(Record::File(FileRecord {
                    name: file.name().to_string(),
                    length: file.length(),
                    offset: *next_offset,
                }));
                *next_offset += file.length();
                order.push(*id);
                entries.push(self.last_index());
            }
        }

        for id in directory.directories() {
            if let Some(child) = tree.directory(*id) {
                self.records.push(Record::Directory(DirectoryRecord {
                    name: child.name().to_string(),
                    entries: vec![],
                }));
                let slot = self.records.len() - 1;
                entries.push(self.last_index());

                let child_entries = self.flatten(tree, *id, order, next_offset);
                if let Some(record) = self.records[slot].as_directory_mut() {
                    record.entries = child_entries;
                }
            }
        }

        entries
    }

    #[inline(always)]
    fn last_index(&self) -> RecordIndex {
        RecordIndex::from_slot(self.records.len() - 1)
    }

    /// Rebuild the tree, checking every structural rule of the format.
    ///
    /// Each record must be reachable from the root exactly once, names must be valid and
    /// unique per directory, and file extents must lie inside a data region of
    /// `data_len` bytes without overlapping.
    pub(crate) fn into_tree(self, data_len: u64) -> std::io::Result<Tree> {
        let mut tree = Tree::new();
        let mut seen = vec![false; self.records.len()];
        let mut extents = vec![];
        let mut stack = vec![(tree.root(), self.root.clone())];

        while let Some((parent, entries)) = stack.pop() {
            for index in entries {
                let record = self
                    .record(index)
                    .ok_or_else(|| invalid(format!("record index {} out of range", index.get())))?;

                if std::mem::replace(&mut seen[index.slot()], true) {
                    return Err(invalid(format!(
                        "record {} is referenced more than once",
                        index.get()
                    )));
                }

                match record {
                    Record::File(file) => {
                        let end = file.offset.checked_add(file.length).ok_or_else(|| {
                            invalid(format!("extent of '{}' overflows", file.name))
                        })?;
                        if end > data_len {
                            return Err(invalid(format!(
                                "extent of '{}' ends at {} beyond data region of {} bytes",
                                file.name, end, data_len
                            )));
                        }
                        if file.length > 0 {
                            extents.push((file.offset, end));
                        }

                        tree.add_file(
                            parent,
                            &file.name,
                            file.length,
                            Content::Container {
                                offset: file.offset,
                            },
                        )
                        .map_err(|e| invalid(e.to_string()))?;
                    }
                    Record::Directory(dir) => {
                        let id = tree
                            .add_directory(parent, &dir.name)
                            .map_err(|e| invalid(e.to_string()))?;
                        stack.push((id, dir.entries.clone()));
                    }
                }
            }
        }

        if let Some(slot) = seen.iter().position(|x| !x) {
            return Err(invalid(format!(
                "record '{}' is not reachable from the root",
                self.records[slot].name()
            )));
        }

        extents.sort_unstable();
        if extents.windows(2).any(|w| w[1].0 < w[0].1) {
            return Err(invalid("file extents overlap".to_string()));
        }

        Ok(tree)
    }
}
