use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use byteorder::{BigEndian, ByteOrder};

use super::Region;
use crate::error::HddError;

/// Maximum number of partitions in a disklabel.
pub const MAX_PARTITIONS: usize = 8;

/// On-disk size of a disklabel, including trailing padding.
pub const DISKLABEL_SIZE: usize = 0x600;

/// Access-control pair attached to each partition (unused here).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct PartitionAcl {
    pub laid: u64,
    pub rights: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct PartitionEntry {
    /// First sector, relative to the table that lists it.
    pub start: u64,
    /// Length in sectors.
    pub size: u64,
    pub acl: [PartitionAcl; 8],
}

impl PartitionEntry {
    pub const SIZE: usize = 0x90;

    pub const fn region(&self) -> Region {
        Region::new(self.start, self.size)
    }
}

/// PS3 disklabel, used both for the whole disk and inside VFLASH.
#[derive(Debug, Clone, Default, BinRead, BinWrite)]
#[brw(big)]
pub struct DiskLabel {
    pub reserved1: [u8; 16],
    pub magic1: u64,
    pub magic2: u64,
    pub reserved2: u64,
    pub reserved3: u64,
    pub partitions: [PartitionEntry; MAX_PARTITIONS],
}

impl DiskLabel {
    pub const MAGIC1: u64 = 0x0FAC_E0FF;
    pub const MAGIC2: u64 = 0xDEAD_FACE;

    const MAGIC1_OFFSET: usize = 0x10;
    const MAGIC2_OFFSET: usize = 0x18;
    const ENCODED_SIZE: usize = 0x30 + MAX_PARTITIONS * PartitionEntry::SIZE;

    /// Check a decrypted buffer for the two disklabel magics.
    pub fn has_magic(buf: &[u8]) -> bool {
        buf.len() >= Self::MAGIC2_OFFSET + 8
            && BigEndian::read_u64(&buf[Self::MAGIC1_OFFSET..]) == Self::MAGIC1
            && BigEndian::read_u64(&buf[Self::MAGIC2_OFFSET..]) == Self::MAGIC2
    }

    /// Parse a disklabel from a decrypted buffer.
    pub fn parse(buf: &[u8]) -> Result<Self, HddError> {
        if buf.len() < Self::ENCODED_SIZE {
            return Err(HddError::corrupt(format!(
                "disklabel needs {} bytes, got {}",
                Self::ENCODED_SIZE,
                buf.len()
            )));
        }
        if !Self::has_magic(buf) {
            return Err(HddError::corrupt("disklabel magic mismatch"));
        }

        let mut cursor = Cursor::new(buf);
        Self::read(&mut cursor).map_err(|e| HddError::corrupt(format!("Failed to read disklabel: {e}")))
    }

    /// Build an empty label with valid magics.
    pub fn new() -> Self {
        Self {
            magic1: Self::MAGIC1,
            magic2: Self::MAGIC2,
            ..Self::default()
        }
    }

    /// Serialize to a zero-padded `DISKLABEL_SIZE` buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, HddError> {
        let mut cursor = Cursor::new(Vec::with_capacity(DISKLABEL_SIZE));
        self.write(&mut cursor)
            .map_err(|e| HddError::corrupt(format!("Failed to write disklabel: {e}")))?;

        let mut out = cursor.into_inner();
        out.resize(DISKLABEL_SIZE, 0);
        Ok(out)
    }

    /// Partitions with a non-zero start, in table order.
    pub fn present_partitions(&self) -> impl Iterator<Item = &PartitionEntry> {
        self.partitions.iter().filter(|p| p.start != 0)
    }
}
