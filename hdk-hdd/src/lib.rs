//! Offline read/write access to encrypted PlayStation 3 hard drives.
//!
//! This crate decrypts a raw drive or image sector by sector, locates the
//! volumes listed in its disklabel and mounts them: the UFS2 game data
//! partition, the FAT32 swap area and the FAT VFLASH volumes of NOR models.
//! Files can be listed, copied out to the host and overwritten in place
//! with same-sized content.

pub mod device;
pub mod error;
pub mod fat;
pub mod fs;
pub mod hdd;
pub mod keys;
pub mod partition;
pub mod ufs;

// Re-export main types for convenience
pub use device::{BlockDevice, CipherContext, DeviceType, DiskIo, HddDevice};
pub use error::HddError;
pub use fs::{CopyReport, Entry, EntryKind, ExtractOptions, ExtractOptionsBuilder, Filesystem, FsKind};
pub use hdd::{Hdd, SectorBase, Volume, VolumeInfo, hexdump};
pub use keys::HddKeys;
pub use partition::{Region, RegionTable};

#[cfg(test)]
mod testutil;
