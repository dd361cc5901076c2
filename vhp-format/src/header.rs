#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VhpHeader {
    pub(crate) magic_bytes: [u8; 4],
    pub(crate) version: u8,
    pub(crate) index_len: u64,
    pub(crate) data_len: u64,
}

impl VhpHeader {
    pub const SIZE: u64 = 32;
}

// Make some attempt to not accidentally load plain text files,
// and also make it break almost immediately in any UTF-8 compliant text parser.
pub(crate) const MAGIC_BYTES: &[u8; 4] = b"\xffVHP";
pub const VERSION: u8 = 1;

impl VhpHeader {
    pub(crate) fn new(index_len: u64, data_len: u64) -> VhpHeader {
        VhpHeader {
            magic_bytes: *MAGIC_BYTES,
            version: VERSION,
            index_len,
            data_len,
        }
    }

    /// Absolute position of the first byte of the data region.
    pub(crate) fn data_start(&self) -> u64 {
        Self::SIZE + self.index_len
    }

    /// Total length the header claims, or `None` if it does not fit in a u64.
    pub(crate) fn container_len(&self) -> Option<u64> {
        Self::SIZE
            .checked_add(self.index_len)?
            .checked_add(self.data_len)
    }
}
