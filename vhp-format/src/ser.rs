use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::{
    header::VhpHeader,
    meta::ContainerIndex,
    record::{DirectoryRecord, FileRecord, Record, RecordIndex},
};

pub(crate) trait Serialize {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()>;
}

impl<T: Serialize> Serialize for Vec<T> {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u64::<LittleEndian>(self.len() as u64)?;
        for item in self.iter() {
            item.write(writer)?;
        }
        Ok(())
    }
}

impl Serialize for String {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u64::<LittleEndian>(self.len() as u64)?;
        writer.write_all(self.as_bytes())
    }
}

impl Serialize for RecordIndex {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u64::<LittleEndian>(self.get())
    }
}

impl Serialize for FileRecord {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        // Record id - 0 for file
        writer.write_u8(0x0)?;

        self.name.write(writer)?;
        writer.write_u64::<LittleEndian>(self.length)?;
        writer.write_u64::<LittleEndian>(self.offset)
    }
}

impl Serialize for DirectoryRecord {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        // Record id - 1 for directory
        writer.write_u8(0x1)?;

        self.name.write(writer)?;
        self.entries.write(writer)
    }
}

impl Serialize for Record {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Record::File(file) => file.write(writer),
            Record::Directory(directory) => directory.write(writer),
        }
    }
}

impl Serialize for VhpHeader {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.magic_bytes)?;
        writer.write_u8(self.version)?;
        writer.write_all(&[0u8; 3])?; // reserved1
        writer.write_u64::<LittleEndian>(self.index_len)?;
        writer.write_u64::<LittleEndian>(self.data_len)?;
        writer.write_all(&[0u8; 8]) // reserved2
    }
}

impl Serialize for ContainerIndex {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        self.root.write(writer)?;
        self.records.write(writer)
    }
}
