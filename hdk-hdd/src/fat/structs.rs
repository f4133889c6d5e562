//! On-disk FAT structures: boot sector and 32-byte directory records.

use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use enumflags2::{BitFlags, bitflags};
use serde::Serialize;

use crate::error::HddError;

/// Size of one directory record.
pub const DIR_RECORD_SIZE: usize = 0x20;

/// Attribute byte value that marks a long-name fragment.
pub const ATTR_LONG_NAME: u8 = 0x0F;

/// First name byte of a deleted record.
pub const DELETED_MARKER: u8 = 0xE5;

/// First name byte standing in for a real leading 0xE5.
pub const KANJI_E5_MARKER: u8 = 0x05;

/// Flag in an LFN ordinal that marks the last (first stored) fragment.
pub const LFN_LAST_FRAGMENT: u8 = 0x40;

/// Characters carried by one LFN fragment.
pub const LFN_CHARS_PER_FRAGMENT: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    /// Entries at or above this value end a chain.
    pub const fn end_of_chain(self) -> u32 {
        match self {
            Self::Fat12 => 0x0FF8,
            Self::Fat16 => 0xFFF8,
            Self::Fat32 => 0x0FFF_FFF8,
        }
    }

    pub const fn bad_cluster(self) -> u32 {
        match self {
            Self::Fat12 => 0x0FF7,
            Self::Fat16 => 0xFFF7,
            Self::Fat32 => 0x0FFF_FFF7,
        }
    }

    pub const fn bits(self) -> u32 {
        match self {
            Self::Fat12 => 12,
            Self::Fat16 => 16,
            Self::Fat32 => 32,
        }
    }
}

/// BIOS parameter block, including the FAT32 extension fields.
///
/// For FAT12/16 volumes the fields from `fat_size32` on overlay the
/// extended boot record and are meaningless.
#[derive(Debug, Clone, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct BootSector {
    pub jump: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_entries: u16,
    pub total_sectors16: u16,
    pub media: u8,
    pub fat_size16: u16,
    pub sectors_per_track: u16,
    pub heads: u16,
    pub hidden_sectors: u32,
    pub total_sectors32: u32,
    pub fat_size32: u32,
    pub ext_flags: u16,
    pub fs_version: u16,
    pub root_cluster: u32,
    pub fs_info_sector: u16,
    pub backup_boot_sector: u16,
}

impl BootSector {
    pub const SIZE: usize = 0x200;

    pub fn parse(buf: &[u8]) -> Result<Self, HddError> {
        let mut cursor = Cursor::new(buf);
        Self::read(&mut cursor).map_err(|e| HddError::corrupt(format!("Failed to read FAT boot sector: {e}")))
    }

    pub const fn total_sectors(&self) -> u64 {
        if self.total_sectors16 != 0 {
            self.total_sectors16 as u64
        } else {
            self.total_sectors32 as u64
        }
    }

    pub const fn fat_size_sectors(&self) -> u64 {
        if self.fat_size16 != 0 {
            self.fat_size16 as u64
        } else {
            self.fat_size32 as u64
        }
    }

    pub const fn root_dir_sectors(&self) -> u64 {
        if self.bytes_per_sector == 0 {
            return 0;
        }
        let bps = self.bytes_per_sector as u64;
        (self.root_entries as u64 * DIR_RECORD_SIZE as u64 + bps - 1) / bps
    }

    /// Number of data clusters, from the standard formula.
    pub const fn data_clusters(&self) -> u64 {
        let meta = self.reserved_sectors as u64
            + self.fat_count as u64 * self.fat_size_sectors()
            + self.root_dir_sectors();
        if self.sectors_per_cluster == 0 || self.total_sectors() <= meta {
            return 0;
        }
        (self.total_sectors() - meta) / self.sectors_per_cluster as u64
    }

    /// FAT width: FAT32 when the 16-bit FAT size is zero, otherwise by cluster count.
    pub const fn fat_type(&self) -> FatType {
        if self.fat_size16 == 0 {
            return FatType::Fat32;
        }
        match self.data_clusters() {
            0..4085 => FatType::Fat12,
            4085..65525 => FatType::Fat16,
            _ => FatType::Fat32,
        }
    }
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FatAttribute {
    ReadOnly = 0x01,
    Hidden = 0x02,
    System = 0x04,
    VolumeId = 0x08,
    Directory = 0x10,
    Archive = 0x20,
}

/// NT case bits in byte 0x0C of a short record.
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CaseFlag {
    LowerBase = 0x08,
    LowerExt = 0x10,
}

/// 8.3 directory record.
#[derive(Debug, Clone, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct ShortDirRecord {
    pub name: [u8; 11],
    pub attributes: u8,
    pub case: u8,
    pub ctime_ms: u8,
    pub ctime: u16,
    pub cdate: u16,
    pub adate: u16,
    pub cluster_hi: u16,
    pub mtime: u16,
    pub mdate: u16,
    pub cluster_lo: u16,
    pub size: u32,
}

impl ShortDirRecord {
    pub fn parse(buf: &[u8]) -> Result<Self, HddError> {
        Self::read(&mut Cursor::new(buf))
            .map_err(|e| HddError::corrupt(format!("Failed to read FAT directory record: {e}")))
    }

    pub fn attribute_flags(&self) -> BitFlags<FatAttribute> {
        BitFlags::from_bits_truncate(self.attributes)
    }

    pub fn case_flags(&self) -> BitFlags<CaseFlag> {
        BitFlags::from_bits_truncate(self.case)
    }

    /// Start cluster. The high word is only meaningful on FAT32.
    pub const fn start_cluster(&self, fat_type: FatType) -> u32 {
        match fat_type {
            FatType::Fat32 => ((self.cluster_hi as u32) << 16) | self.cluster_lo as u32,
            FatType::Fat12 | FatType::Fat16 => self.cluster_lo as u32,
        }
    }
}

/// Long-name fragment record.
#[derive(Debug, Clone, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct LfnRecord {
    pub ordinal: u8,
    pub name1: [u16; 5],
    pub attributes: u8,
    pub kind: u8,
    pub checksum: u8,
    pub name2: [u16; 6],
    pub first_cluster: u16,
    pub name3: [u16; 2],
}

impl LfnRecord {
    pub fn parse(buf: &[u8]) -> Result<Self, HddError> {
        Self::read(&mut Cursor::new(buf))
            .map_err(|e| HddError::corrupt(format!("Failed to read LFN record: {e}")))
    }

    /// Position of this fragment in the name, starting at 1.
    pub const fn sequence(&self) -> u8 {
        self.ordinal & 0x1F
    }

    pub const fn is_last(&self) -> bool {
        self.ordinal & LFN_LAST_FRAGMENT != 0
    }

    pub fn chars(&self) -> [u16; LFN_CHARS_PER_FRAGMENT] {
        let mut out = [0u16; LFN_CHARS_PER_FRAGMENT];
        out[..5].copy_from_slice(&self.name1);
        out[5..11].copy_from_slice(&self.name2);
        out[11..].copy_from_slice(&self.name3);
        out
    }
}
