//! High-level access to a PS3 drive by volume name.

use std::fmt::{self, Write as _};
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use hdk_secure::SECTOR_SIZE;
use serde::Serialize;

use crate::device::{BlockDevice, DeviceType, HddDevice};
use crate::error::HddError;
use crate::fat::FatVolume;
use crate::fs::{CopyReport, Entry, ExtractOptions, Filesystem, FsKind, copy_to_host};
use crate::keys::HddKeys;
use crate::partition::{Region, RegionTable};
use crate::ufs::UfsVolume;

/// A mountable volume of a PS3 drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Volume {
    /// UFS2 game and user data.
    Hdd0,
    /// FAT32 swap area.
    Hdd1,
    /// FAT16 firmware.
    Flash,
    /// FAT16 configuration.
    Flash2,
    /// FAT12.
    Flash3,
}

impl Volume {
    pub const ALL: [Self; 5] = [Self::Hdd0, Self::Hdd1, Self::Flash, Self::Flash2, Self::Flash3];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Hdd0 => "dev_hdd0",
            Self::Hdd1 => "dev_hdd1",
            Self::Flash => "dev_flash",
            Self::Flash2 => "dev_flash2",
            Self::Flash3 => "dev_flash3",
        }
    }

    pub const fn region(self, table: &RegionTable) -> Region {
        match self {
            Self::Hdd0 => table.hdd0,
            Self::Hdd1 => table.hdd1,
            Self::Flash => table.flash,
            Self::Flash2 => table.flash2,
            Self::Flash3 => table.flash3,
        }
    }

    const fn is_ufs(self) -> bool {
        matches!(self, Self::Hdd0)
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Volume {
    type Err = HddError;

    /// Accepts `dev_hdd0` or the short form `hdd0`, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim_matches('/').to_ascii_lowercase();
        let short = lower.strip_prefix("dev_").unwrap_or(&lower);
        Self::ALL
            .into_iter()
            .find(|v| v.name().strip_prefix("dev_") == Some(short))
            .ok_or_else(|| HddError::VolumeUnavailable(format!("{s} (unknown volume name)")))
    }
}

/// Summary of one volume for listing.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeInfo {
    pub volume: Volume,
    pub region: Region,
    /// `None` if the volume could not be mounted.
    pub kind: Option<FsKind>,
    pub free_bytes: Option<u64>,
}

/// Where a raw sector number counts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorBase {
    Absolute,
    Volume(Volume),
}

/// An opened drive with its volumes discovered.
pub struct Hdd<D: BlockDevice> {
    device: HddDevice<D>,
}

impl<D: BlockDevice> Hdd<D> {
    /// Detect the layout of `inner` and locate its volumes.
    pub fn open(inner: D, keys: &HddKeys) -> Result<Self, HddError> {
        Ok(Self {
            device: HddDevice::open(inner, keys)?,
        })
    }

    pub fn device(&self) -> &HddDevice<D> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut HddDevice<D> {
        &mut self.device
    }

    pub fn into_inner(self) -> D {
        self.device.into_inner()
    }

    pub const fn device_type(&self) -> DeviceType {
        self.device.device_type()
    }

    pub const fn regions(&self) -> &RegionTable {
        self.device.regions()
    }

    fn region(&self, volume: Volume) -> Result<Region, HddError> {
        let region = volume.region(self.device.regions());
        if !region.is_present() {
            return Err(HddError::VolumeUnavailable(volume.name().to_string()));
        }
        Ok(region)
    }

    /// Mount `volume` and run `f` against it.
    pub fn with_filesystem<R>(
        &mut self,
        volume: Volume,
        f: impl FnOnce(&mut dyn Filesystem) -> Result<R, HddError>,
    ) -> Result<R, HddError> {
        let region = self.region(volume)?;
        if volume.is_ufs() {
            let mut fs = UfsVolume::open(&mut self.device, region)?;
            f(&mut fs)
        } else {
            let mut fs = FatVolume::open(&mut self.device, region)?;
            f(&mut fs)
        }
    }

    /// Every volume found on the drive, with its filesystem and free space.
    pub fn volumes(&mut self) -> Vec<VolumeInfo> {
        let mut infos = Vec::new();
        for volume in Volume::ALL {
            let region = volume.region(self.device.regions());
            if !region.is_present() {
                continue;
            }

            let mounted = self.with_filesystem(volume, |fs| Ok((fs.kind(), fs.free_bytes()?)));
            let (kind, free_bytes) = match mounted {
                Ok((kind, free)) => (Some(kind), Some(free)),
                Err(_e) => {
                    #[cfg(feature = "logging")]
                    {
                        tracing::warn!(%volume, error = %_e, "volume could not be mounted");
                    }
                    (None, None)
                }
            };

            infos.push(VolumeInfo {
                volume,
                region,
                kind,
                free_bytes,
            });
        }
        infos
    }

    /// Sorted listing of a directory.
    pub fn list_dir(&mut self, volume: Volume, path: &str) -> Result<Vec<Entry>, HddError> {
        self.with_filesystem(volume, |fs| fs.list(path))
    }

    /// Resolve a path without listing it.
    pub fn stat(&mut self, volume: Volume, path: &str) -> Result<Entry, HddError> {
        self.with_filesystem(volume, |fs| fs.lookup(path, false))
    }

    /// Physical addresses of an entry's data.
    pub fn address_list(&mut self, volume: Volume, path: &str) -> Result<Vec<u64>, HddError> {
        self.with_filesystem(volume, |fs| {
            let entry = fs.lookup(path, true)?;
            fs.address_list(&entry)
        })
    }

    /// Copy a file or tree from a volume to the host.
    pub fn copy(
        &mut self,
        volume: Volume,
        path: &str,
        dest: &Path,
        options: &ExtractOptions,
    ) -> Result<CopyReport, HddError> {
        self.with_filesystem(volume, |fs| copy_to_host(fs, path, dest, options))
    }

    /// Overwrite an existing file in place with `len` bytes from `src`.
    ///
    /// # Errors
    ///
    /// [`HddError::SizeMismatch`] unless `len` equals the current file size;
    /// nothing is written in that case.
    pub fn replace(
        &mut self,
        volume: Volume,
        path: &str,
        src: &mut dyn Read,
        len: u64,
    ) -> Result<u64, HddError> {
        let written = self.with_filesystem(volume, |fs| {
            let target = fs.lookup(path, true)?;
            if !target.is_file() {
                return Err(HddError::NotAFile(path.to_string()));
            }
            if target.size != len {
                return Err(HddError::SizeMismatch {
                    path: path.to_string(),
                    expected: target.size,
                    actual: len,
                });
            }
            fs.write_file(&target, src)
        })?;
        self.device.flush()?;

        #[cfg(feature = "logging")]
        {
            tracing::info!(%volume, path, bytes = written, "replaced file");
        }

        Ok(written)
    }

    fn absolute_sector(&self, base: SectorBase, start: u64, count: u64) -> Result<u64, HddError> {
        match base {
            SectorBase::Absolute => Ok(start),
            SectorBase::Volume(volume) => {
                let region = self.region(volume)?;
                match start.checked_add(count) {
                    Some(end) if end <= region.size => Ok(region.start + start),
                    _ => Err(HddError::OutOfRange(format!(
                        "sectors {start:#X}+{count:#X} outside {volume} ({:#X} sectors)",
                        region.size
                    ))),
                }
            }
        }
    }

    /// Read and decrypt `count` sectors.
    pub fn read_sectors(&mut self, base: SectorBase, start: u64, count: u64) -> Result<Vec<u8>, HddError> {
        let sector = self.absolute_sector(base, start, count)?;
        self.device.read_sectors(sector, count)
    }

    /// Encrypt and write whole sectors.
    pub fn write_sectors(&mut self, base: SectorBase, start: u64, data: &[u8]) -> Result<(), HddError> {
        let count = (data.len() / SECTOR_SIZE) as u64;
        let sector = self.absolute_sector(base, start, count)?;
        self.device.write_sectors(sector, data)?;
        self.device.flush()
    }
}

/// Canonical hex dump: offset, 16 hex bytes split in two groups, ASCII.
pub fn hexdump(data: &[u8], base_offset: u64) -> String {
    let mut out = String::new();
    for (i, line) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08X}  ", base_offset + (i * 16) as u64);
        for col in 0..16 {
            match line.get(col) {
                Some(b) => {
                    let _ = write!(out, "{b:02X} ");
                }
                None => out.push_str("   "),
            }
            if col == 7 {
                out.push(' ');
            }
        }
        out.push(' ');
        out.extend(line.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }
    out
}
