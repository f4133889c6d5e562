//! PS3 disklabel decoding and region discovery.
//!
//! The outer disklabel at sector 0 lists up to eight regions. Each present
//! region is scanned for a nested disklabel (the VFLASH area and its FAT
//! volumes), a UFS2 superblock (`dev_hdd0`) or a FAT32 FSInfo sector
//! (`dev_hdd1`).

pub mod structs;


use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;

use crate::device::DiskIo;
use crate::error::HddError;
use crate::ufs::structs::{SBLOCK_UFS2, Superblock};
use hdk_secure::SECTOR_SIZE;

pub use structs::{DISKLABEL_SIZE, DiskLabel, MAX_PARTITIONS, PartitionAcl, PartitionEntry};

/// Sectors read from the start of each region for probing.
pub const SCAN_SECTORS: u64 = 144;

const FSINFO_SIG_1: u32 = 0x4161_5252;
const FSINFO_SIG_2: u32 = 0x6141_7272;
const FSINFO_SIG_2_OFFSET: usize = 484;

/// A contiguous run of sectors on the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Region {
    pub start: u64,
    pub size: u64,
}

impl Region {
    pub const fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    /// Regions with a zero start are absent.
    pub const fn is_present(&self) -> bool {
        self.start != 0
    }

    pub const fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    pub const fn contains(&self, sector: u64) -> bool {
        sector >= self.start && sector < self.end()
    }

    pub const fn byte_offset(&self) -> u64 {
        self.start * SECTOR_SIZE as u64
    }

    pub const fn byte_len(&self) -> u64 {
        self.size * SECTOR_SIZE as u64
    }
}

/// Regions located on a device. Fields left at zero were not found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegionTable {
    /// The VFLASH area as a whole.
    pub vflash: Region,
    /// First entry of the nested VFLASH table, which holds no filesystem.
    pub vflash_system: Region,
    /// `dev_flash` (FAT16).
    pub flash: Region,
    /// `dev_flash2` (FAT16).
    pub flash2: Region,
    /// `dev_flash3` (FAT12).
    pub flash3: Region,
    /// `dev_hdd0` (UFS2 game data).
    pub hdd0: Region,
    /// `dev_hdd1` (FAT32 swap).
    pub hdd1: Region,
}

/// Scan every present partition of `label` and record what it holds.
///
/// # Errors
///
/// Returns an error if reading a scan window fails.
pub fn discover<I: DiskIo + ?Sized>(io: &mut I, label: &DiskLabel) -> Result<RegionTable, HddError> {
    let mut table = RegionTable::default();

    for entry in label.present_partitions() {
        let region = entry.region();
        let window_len = SCAN_SECTORS.min(region.size) as usize * SECTOR_SIZE;
        let window = io.read_bytes(region.byte_offset(), window_len)?;

        detect_vflash(&mut table, region, &window)?;
        if detect_ufs2(&window) {
            table.hdd0 = region;
        }
        if detect_fat32_swap(&window) {
            table.hdd1 = region;
        }
    }

    #[cfg(feature = "logging")]
    {
        tracing::debug!(?table, "region discovery finished");
    }

    Ok(table)
}

fn detect_vflash(table: &mut RegionTable, region: Region, window: &[u8]) -> Result<(), HddError> {
    if !DiskLabel::has_magic(window) {
        return Ok(());
    }

    let nested = DiskLabel::parse(window)?;
    let sub = |index: usize| {
        let entry = &nested.partitions[index];
        Region::new(entry.start + region.start, entry.size)
    };

    table.vflash = region;
    table.vflash_system = sub(0);
    table.flash = sub(1);
    table.flash2 = sub(2);
    table.flash3 = sub(3);
    Ok(())
}

fn detect_ufs2(window: &[u8]) -> bool {
    let magic_offset = SBLOCK_UFS2 as usize + Superblock::MAGIC_OFFSET;
    window.len() >= magic_offset + 4 && BigEndian::read_u32(&window[magic_offset..]) == Superblock::MAGIC
}

fn detect_fat32_swap(window: &[u8]) -> bool {
    if window.len() < 2 * SECTOR_SIZE {
        return false;
    }
    let info = &window[SECTOR_SIZE..2 * SECTOR_SIZE];
    LittleEndian::read_u32(&info[0..]) == FSINFO_SIG_1
        && LittleEndian::read_u32(&info[FSINFO_SIG_2_OFFSET..]) == FSINFO_SIG_2
}
