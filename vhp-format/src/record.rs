use std::num::NonZeroU64;

/// 1-based position of a record inside [ContainerIndex::records][crate::meta::ContainerIndex].
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct RecordIndex(NonZeroU64);

impl RecordIndex {
    pub(crate) fn new(value: u64) -> std::io::Result<RecordIndex> {
        match NonZeroU64::new(value) {
            Some(v) => Ok(RecordIndex(v)),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "record index must not be zero",
            )),
        }
    }

    pub(crate) fn from_slot(slot: usize) -> RecordIndex {
        RecordIndex(NonZeroU64::MIN.saturating_add(slot as u64))
    }

    pub(crate) fn get(self) -> u64 {
        self.0.get()
    }

    /// Zero-based slot in the record list.
    pub(crate) fn slot(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Record {
    File(FileRecord),
    Directory(DirectoryRecord),
}

impl Record {
    #[inline(always)]
    pub(crate) fn name(&self) -> &str {
        match self {
            Record::File(file) => &file.name,
            Record::Directory(dir) => &dir.name,
        }
    }

    #[inline(always)]
    pub(crate) fn as_directory_mut(&mut self) -> Option<&mut DirectoryRecord> {
        match self {
            Record::Directory(dir) => Some(dir),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DirectoryRecord {
    /// The name of the directory, never containing a separator.
    pub(crate) name: String,

    /// Indices of the records directly inside this directory.
    pub(crate) entries: Vec<RecordIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileRecord {
    pub(crate) name: String,

    /// The exact length of the data as written.
    pub(crate) length: u64,

    /// The position of the data, relative to the start of the data region.
    pub(crate) offset: u64,
}
