use std::fmt;

use hdk_secure::{AesCbcSectorCipher, AesXtsSectorCipher, SECTOR_SIZE, SectorCipher, swap_halfwords};
use serde::Serialize;

use crate::error::HddError;
use crate::keys::HddKeys;
use crate::partition::{DiskLabel, Region};

/// Sector holding the nested VFLASH disklabel on NOR models.
const VFLASH_LABEL_SECTOR: u64 = 8;

/// Encryption layout of a console drive.
///
/// | Type | ATA layer | VFLASH layer | Models |
/// |------|-----------|--------------|--------|
/// | `FatNand` | AES-192-CBC | none | CECHA/B/C/E/G |
/// | `FatNor` | AES-192-CBC | AES-128-XTS | CECHH/J/K/L/M/P/Q |
/// | `SlimNor` | AES-128-XTS | AES-128-XTS | CECH-20xx and later |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceType {
    FatNand,
    FatNor,
    SlimNor,
}

impl DeviceType {
    /// Identify the layout from raw (still swapped and encrypted) sectors 0 and 8.
    ///
    /// # Errors
    ///
    /// Returns [`HddError::WrongKey`] when no layout decrypts to a disklabel.
    pub fn detect(
        sector0: &[u8; SECTOR_SIZE],
        sector8: &[u8; SECTOR_SIZE],
        keys: &HddKeys,
    ) -> Result<Self, HddError> {
        let ata_cbc = keys.ata_cbc();

        let mut label = *sector0;
        swap_halfwords(&mut label);
        ata_cbc.decrypt_sectors(0, &mut label)?;

        if DiskLabel::has_magic(&label) {
            let mut nested = *sector8;
            swap_halfwords(&mut nested);
            ata_cbc.decrypt_sectors(VFLASH_LABEL_SECTOR, &mut nested)?;
            keys.encdec_xts()
                .decrypt_sectors(VFLASH_LABEL_SECTOR, &mut nested)?;

            return Ok(if DiskLabel::has_magic(&nested) {
                Self::FatNor
            } else {
                Self::FatNand
            });
        }

        let mut label = *sector0;
        swap_halfwords(&mut label);
        keys.ata_xts().decrypt_sectors(0, &mut label)?;

        if DiskLabel::has_magic(&label) {
            return Ok(Self::SlimNor);
        }

        Err(HddError::WrongKey)
    }

    /// Whether the first partition is a VFLASH region with its own cipher layer.
    pub const fn has_vflash(self) -> bool {
        matches!(self, Self::FatNor | Self::SlimNor)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::FatNand => "FAT/NAND",
            Self::FatNor => "FAT/NOR",
            Self::SlimNor => "SLIM/NOR",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum AtaLayer {
    Cbc(AesCbcSectorCipher),
    Xts(AesXtsSectorCipher),
}

impl AtaLayer {
    fn cipher(&self) -> &dyn SectorCipher {
        match self {
            Self::Cbc(c) => c,
            Self::Xts(c) => c,
        }
    }
}

struct VflashLayer {
    cipher: AesXtsSectorCipher,
    range: Region,
}

/// Cipher state for one device, fixed once the device type is known.
///
/// Converts between raw medium bytes and plaintext: byte swap, then the
/// ATA layer, then the VFLASH layer for sectors inside the VFLASH range.
pub struct CipherContext {
    device_type: DeviceType,
    ata: AtaLayer,
    vflash: Option<VflashLayer>,
}

impl CipherContext {
    pub fn new(device_type: DeviceType, keys: &HddKeys) -> Self {
        let ata = match device_type {
            DeviceType::FatNand | DeviceType::FatNor => AtaLayer::Cbc(keys.ata_cbc()),
            DeviceType::SlimNor => AtaLayer::Xts(keys.ata_xts()),
        };
        let vflash = device_type.has_vflash().then(|| VflashLayer {
            cipher: keys.encdec_xts(),
            range: Region::default(),
        });

        Self {
            device_type,
            ata,
            vflash,
        }
    }

    pub const fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Set the sectors covered by the VFLASH layer. No-op on `FatNand`.
    pub fn set_vflash_range(&mut self, range: Region) {
        if let Some(layer) = self.vflash.as_mut() {
            layer.range = range;
        }
    }

    pub fn vflash_range(&self) -> Option<Region> {
        self.vflash.as_ref().map(|layer| layer.range)
    }

    /// Raw sectors starting at `first_sector` to plaintext, in place.
    pub fn decrypt(&self, first_sector: u64, data: &mut [u8]) -> Result<(), HddError> {
        swap_halfwords(data);
        self.ata.cipher().decrypt_sectors(first_sector, data)?;
        if let Some((layer, span, sector)) = self.vflash_span(first_sector, data.len()) {
            layer.cipher.decrypt_sectors(sector, &mut data[span])?;
        }
        Ok(())
    }

    /// Plaintext sectors starting at `first_sector` to raw, in place.
    pub fn encrypt(&self, first_sector: u64, data: &mut [u8]) -> Result<(), HddError> {
        if let Some((layer, span, sector)) = self.vflash_span(first_sector, data.len()) {
            layer.cipher.encrypt_sectors(sector, &mut data[span])?;
        }
        self.ata.cipher().encrypt_sectors(first_sector, data)?;
        swap_halfwords(data);
        Ok(())
    }

    /// Byte span of a buffer that falls inside the VFLASH range, with its first sector.
    fn vflash_span(
        &self,
        first_sector: u64,
        len: usize,
    ) -> Option<(&VflashLayer, std::ops::Range<usize>, u64)> {
        let layer = self.vflash.as_ref()?;
        if !layer.range.is_present() {
            return None;
        }

        let sectors = (len / SECTOR_SIZE) as u64;
        let lo = first_sector.max(layer.range.start);
        let hi = (first_sector + sectors).min(layer.range.end());
        if lo >= hi {
            return None;
        }

        let from = (lo - first_sector) as usize * SECTOR_SIZE;
        let to = (hi - first_sector) as usize * SECTOR_SIZE;
        Some((layer, from..to, lo))
    }
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherContext")
            .field("device_type", &self.device_type)
            .field("vflash_range", &self.vflash_range())
            .finish_non_exhaustive()
    }
}
