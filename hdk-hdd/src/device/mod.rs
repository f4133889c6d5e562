//! Encrypted block device: layout detection, sector I/O and unaligned
//! byte-range I/O over a raw drive or image.

mod context;

#[cfg(test)]
mod tests;

use std::io::{self, Read, Seek, SeekFrom, Write};

use hdk_secure::SECTOR_SIZE;

use crate::error::HddError;
use crate::keys::HddKeys;
use crate::partition::{self, DISKLABEL_SIZE, DiskLabel, RegionTable};

pub use context::{CipherContext, DeviceType};

const SECTOR: u64 = SECTOR_SIZE as u64;

/// Raw, unencrypted-view access to a drive or image by byte offset.
///
/// Implemented for every `Read + Write + Seek`, so a `File` or a
/// `Cursor<Vec<u8>>` can back an [`HddDevice`] directly.
pub trait BlockDevice {
    fn read_raw(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
    fn write_raw(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;
    fn flush_raw(&mut self) -> io::Result<()>;
}

impl<T: Read + Write + Seek> BlockDevice for T {
    fn read_raw(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }

    fn write_raw(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(buf)
    }

    fn flush_raw(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// Plaintext byte-addressed access used by the filesystem drivers.
pub trait DiskIo {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), HddError>;
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), HddError>;

    fn read_bytes(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, HddError> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

/// A detected PS3 drive: the raw device plus its cipher context and regions.
pub struct HddDevice<D: BlockDevice> {
    inner: D,
    context: CipherContext,
    label: DiskLabel,
    regions: RegionTable,
}

impl<D: BlockDevice> HddDevice<D> {
    /// Detect the device layout, read the disklabel and discover regions.
    ///
    /// # Arguments
    ///
    /// * `inner` - Raw drive or image.
    /// * `keys` - Key material for this console.
    ///
    /// # Errors
    ///
    /// [`HddError::WrongKey`] if the keys do not decrypt a disklabel under any
    /// known layout; I/O errors from the underlying device.
    pub fn open(mut inner: D, keys: &HddKeys) -> Result<Self, HddError> {
        let mut sector0 = [0u8; SECTOR_SIZE];
        let mut sector8 = [0u8; SECTOR_SIZE];
        inner.read_raw(0, &mut sector0)?;
        inner.read_raw(8 * SECTOR, &mut sector8)?;

        let device_type = DeviceType::detect(&sector0, &sector8, keys)?;

        #[cfg(feature = "logging")]
        {
            tracing::info!(%device_type, "detected PS3 drive layout");
        }

        let mut device = Self::from_context(inner, CipherContext::new(device_type, keys));
        let raw_label = device.read_bytes(0, DISKLABEL_SIZE)?;
        let label = DiskLabel::parse(&raw_label)?;

        if device_type.has_vflash() {
            device.context.set_vflash_range(label.partitions[0].region());
        }

        device.regions = partition::discover(&mut device, &label)?;
        device.label = label;
        Ok(device)
    }

    /// Wrap a device with an already known cipher context, skipping detection
    /// and region discovery.
    pub fn from_context(inner: D, context: CipherContext) -> Self {
        Self {
            inner,
            context,
            label: DiskLabel::default(),
            regions: RegionTable::default(),
        }
    }

    pub const fn device_type(&self) -> DeviceType {
        self.context.device_type()
    }

    pub const fn context(&self) -> &CipherContext {
        &self.context
    }

    pub const fn label(&self) -> &DiskLabel {
        &self.label
    }

    pub const fn regions(&self) -> &RegionTable {
        &self.regions
    }

    pub fn into_inner(self) -> D {
        self.inner
    }

    /// Read and decrypt `count` sectors starting at absolute sector `start`.
    pub fn read_sectors(&mut self, start: u64, count: u64) -> Result<Vec<u8>, HddError> {
        let len = usize::try_from(count)
            .ok()
            .and_then(|count| count.checked_mul(SECTOR_SIZE))
            .ok_or_else(|| HddError::OutOfRange(format!("{count:#X} sectors")))?;
        let mut buf = vec![0u8; len];
        self.read_sectors_into(start, &mut buf)?;
        Ok(buf)
    }

    /// Read and decrypt whole sectors into `buf`, whose length must be a
    /// multiple of the sector size.
    pub fn read_sectors_into(&mut self, start: u64, buf: &mut [u8]) -> Result<(), HddError> {
        check_sector_aligned(buf.len())?;
        let offset = sector_offset(start, buf.len())?;
        self.inner.read_raw(offset, buf)?;
        self.context.decrypt(start, buf)
    }

    /// Encrypt and write whole sectors starting at absolute sector `start`.
    pub fn write_sectors(&mut self, start: u64, data: &[u8]) -> Result<(), HddError> {
        check_sector_aligned(data.len())?;
        let offset = sector_offset(start, data.len())?;
        let mut buf = data.to_vec();
        self.context.encrypt(start, &mut buf)?;
        self.inner.write_raw(offset, &buf)?;
        Ok(())
    }

    /// Read `len` plaintext bytes at an arbitrary byte offset.
    pub fn read_bytes(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, HddError> {
        DiskIo::read_bytes(self, offset, len)
    }

    /// Write plaintext bytes at an arbitrary byte offset, preserving the
    /// untouched parts of partially covered sectors.
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<(), HddError> {
        self.write_at(offset, data)
    }

    pub fn flush(&mut self) -> Result<(), HddError> {
        self.inner.flush_raw()?;
        Ok(())
    }
}

impl<D: BlockDevice> DiskIo for HddDevice<D> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), HddError> {
        if buf.is_empty() {
            return Ok(());
        }

        let mut sector = offset / SECTOR;
        let head = (offset % SECTOR) as usize;
        let mut pos = 0;

        // Leading partial sector
        if head != 0 || buf.len() < SECTOR_SIZE {
            let mut tmp = [0u8; SECTOR_SIZE];
            self.read_sectors_into(sector, &mut tmp)?;
            let n = (SECTOR_SIZE - head).min(buf.len());
            buf[..n].copy_from_slice(&tmp[head..head + n]);
            pos = n;
            sector += 1;
        }

        // Whole sectors
        let full = (buf.len() - pos) / SECTOR_SIZE;
        if full > 0 {
            let end = pos + full * SECTOR_SIZE;
            self.read_sectors_into(sector, &mut buf[pos..end])?;
            pos = end;
            sector += full as u64;
        }

        // Trailing partial sector
        if pos < buf.len() {
            let mut tmp = [0u8; SECTOR_SIZE];
            self.read_sectors_into(sector, &mut tmp)?;
            let n = buf.len() - pos;
            buf[pos..].copy_from_slice(&tmp[..n]);
        }

        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), HddError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut sector = offset / SECTOR;
        let head = (offset % SECTOR) as usize;
        let mut pos = 0;

        if head != 0 || data.len() < SECTOR_SIZE {
            let mut tmp = [0u8; SECTOR_SIZE];
            self.read_sectors_into(sector, &mut tmp)?;
            let n = (SECTOR_SIZE - head).min(data.len());
            tmp[head..head + n].copy_from_slice(&data[..n]);
            self.write_sectors(sector, &tmp)?;
            pos = n;
            sector += 1;
        }

        let full = (data.len() - pos) / SECTOR_SIZE;
        if full > 0 {
            let end = pos + full * SECTOR_SIZE;
            self.write_sectors(sector, &data[pos..end])?;
            pos = end;
            sector += full as u64;
        }

        if pos < data.len() {
            let mut tmp = [0u8; SECTOR_SIZE];
            self.read_sectors_into(sector, &mut tmp)?;
            let n = data.len() - pos;
            tmp[..n].copy_from_slice(&data[pos..]);
            self.write_sectors(sector, &tmp)?;
        }

        Ok(())
    }
}

fn check_sector_aligned(len: usize) -> Result<(), HddError> {
    if len % SECTOR_SIZE != 0 {
        return Err(HddError::OutOfRange(format!(
            "{len} bytes is not a whole number of sectors"
        )));
    }
    Ok(())
}

/// Byte offset of sector `start`, checked so the whole `len`-byte run is addressable.
fn sector_offset(start: u64, len: usize) -> Result<u64, HddError> {
    start
        .checked_mul(SECTOR)
        .filter(|offset| offset.checked_add(len as u64).is_some())
        .ok_or_else(|| HddError::OutOfRange(format!("sector {start:#X} beyond addressable range")))
}
