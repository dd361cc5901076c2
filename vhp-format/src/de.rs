use std::io::{ErrorKind, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::{
    header::{VhpHeader, MAGIC_BYTES, VERSION},
    meta::ContainerIndex,
    record::{DirectoryRecord, FileRecord, Record, RecordIndex},
};

/// Upper bound for a single stored name. Anything larger is a corrupt index.
const MAX_NAME_LEN: u64 = 64 * 1024;

/// Cap on up-front allocation for length-prefixed lists read from untrusted input.
const MAX_PREALLOC: u64 = 4096;

fn invalid_data<E>(error: E) -> std::io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    std::io::Error::new(ErrorKind::InvalidData, error)
}

pub(crate) trait DeserializeOwned {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self>
    where
        Self: Sized;
}

impl<T: DeserializeOwned> DeserializeOwned for Vec<T> {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self>
    where
        Self: Sized,
    {
        let len = reader.read_u64::<LittleEndian>()?;
        let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC) as usize);
        for _ in 0..len {
            buf.push(T::deserialize_owned(reader)?);
        }
        Ok(buf)
    }
}

impl DeserializeOwned for String {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self>
    where
        Self: Sized,
    {
        let len = reader.read_u64::<LittleEndian>()?;
        if len > MAX_NAME_LEN {
            return Err(invalid_data(format!("name length {} is too large", len)));
        }

        let mut buf = Vec::with_capacity(len as usize);
        reader.take(len).read_to_end(&mut buf)?;
        if buf.len() as u64 != len {
            return Err(ErrorKind::UnexpectedEof.into());
        }

        String::from_utf8(buf).map_err(invalid_data)
    }
}

impl DeserializeOwned for RecordIndex {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        RecordIndex::new(reader.read_u64::<LittleEndian>()?)
    }
}

impl DeserializeOwned for FileRecord {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let name = String::deserialize_owned(reader)?;
        let length = reader.read_u64::<LittleEndian>()?;
        let offset = reader.read_u64::<LittleEndian>()?;

        Ok(FileRecord {
            name,
            length,
            offset,
        })
    }
}

impl DeserializeOwned for DirectoryRecord {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let name = String::deserialize_owned(reader)?;
        let entries = <Vec<RecordIndex>>::deserialize_owned(reader)?;

        Ok(DirectoryRecord { name, entries })
    }
}

impl DeserializeOwned for Record {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let ty = reader.read_u8()?;
        match ty {
            0 => Ok(Record::File(FileRecord::deserialize_owned(reader)?)),
            1 => Ok(Record::Directory(DirectoryRecord::deserialize_owned(
                reader,
            )?)),
            _ => Err(invalid_data(format!(
                "invalid or unsupported record type: {}",
                ty
            ))),
        }
    }
}

impl DeserializeOwned for VhpHeader {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut magic_bytes = [0u8; 4];
        reader.read_exact(&mut magic_bytes)?;

        if &magic_bytes != MAGIC_BYTES {
            return Err(invalid_data("Magic bytes invalid"));
        }

        let version = reader.read_u8()?;
        if version != VERSION {
            return Err(invalid_data(format!(
                "unsupported container version: {}",
                version
            )));
        }

        reader.read_exact(&mut [0u8; 3])?; // skip reserved1
        let index_len = reader.read_u64::<LittleEndian>()?;
        let data_len = reader.read_u64::<LittleEndian>()?;
        reader.read_exact(&mut [0u8; 8])?; // skip reserved2

        tracing::debug!(version, index_len, data_len, "deserialized VhpHeader");

        Ok(VhpHeader {
            magic_bytes,
            version,
            index_len,
            data_len,
        })
    }
}

impl DeserializeOwned for ContainerIndex {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let root = <Vec<RecordIndex>>::deserialize_owned(reader)?;
        let records = <Vec<Record>>::deserialize_owned(reader)?;

        tracing::debug!(
            root = root.len(),
            records = records.len(),
            "deserialized ContainerIndex"
        );

        Ok(ContainerIndex { root, records })
    }
}
