use std::fmt;

use aes::{Aes128, Aes192};
use cbc::cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, InnerIvInit, KeyInit};
use thiserror::Error;
use xts_mode::{Xts128, get_tweak_default};

/// Size of a single addressable sector in bytes.
pub const SECTOR_SIZE: usize = 512;

const ZERO_IV: [u8; 16] = [0u8; 16];

#[derive(Debug, Error)]
pub enum SectorCipherError {
    #[error("Buffer length {len} is not a multiple of the 512-byte sector size")]
    Misaligned { len: usize },
    #[error("Cipher operation failed: {0}")]
    Cipher(&'static str),
}

/// A cipher that transforms whole sectors in place.
///
/// `first_sector` is the absolute sector number of the first sector in
/// `data`; consecutive sectors follow it. Implementations that do not key
/// on the sector number ignore it.
pub trait SectorCipher {
    fn encrypt_sectors(&self, first_sector: u64, data: &mut [u8]) -> Result<(), SectorCipherError>;
    fn decrypt_sectors(&self, first_sector: u64, data: &mut [u8]) -> Result<(), SectorCipherError>;
}

fn check_aligned(data: &[u8]) -> Result<(), SectorCipherError> {
    if data.len() % SECTOR_SIZE != 0 {
        return Err(SectorCipherError::Misaligned { len: data.len() });
    }
    Ok(())
}

// ---- AES-192-CBC, zero IV per sector ----

/// AES-192 in CBC mode where every sector is an independent message with
/// an all-zero IV. Used as the ATA layer on the original NAND/NOR models.
#[derive(Clone)]
pub struct AesCbcSectorCipher {
    cipher: Aes192,
}

impl AesCbcSectorCipher {
    pub const KEY_SIZE: usize = 24;

    pub fn new(key: &[u8; Self::KEY_SIZE]) -> Self {
        Self {
            cipher: Aes192::new(key.into()),
        }
    }
}

impl fmt::Debug for AesCbcSectorCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesCbcSectorCipher").finish_non_exhaustive()
    }
}

impl SectorCipher for AesCbcSectorCipher {
    fn encrypt_sectors(&self, _first_sector: u64, data: &mut [u8]) -> Result<(), SectorCipherError> {
        check_aligned(data)?;
        for sector in data.chunks_exact_mut(SECTOR_SIZE) {
            cbc::Encryptor::<Aes192>::inner_iv_init(self.cipher.clone(), (&ZERO_IV).into())
                .encrypt_padded_mut::<NoPadding>(sector, SECTOR_SIZE)
                .map_err(|_| SectorCipherError::Cipher("cbc encrypt failed"))?;
        }
        Ok(())
    }

    fn decrypt_sectors(&self, _first_sector: u64, data: &mut [u8]) -> Result<(), SectorCipherError> {
        check_aligned(data)?;
        for sector in data.chunks_exact_mut(SECTOR_SIZE) {
            cbc::Decryptor::<Aes192>::inner_iv_init(self.cipher.clone(), (&ZERO_IV).into())
                .decrypt_padded_mut::<NoPadding>(sector)
                .map_err(|_| SectorCipherError::Cipher("cbc decrypt failed"))?;
        }
        Ok(())
    }
}

// ---- AES-128-XTS, tweak = sector number ----

/// AES-128 in XTS mode with the absolute sector number as the tweak,
/// encoded little-endian (dm-crypt `plain64`).
pub struct AesXtsSectorCipher {
    xts: Xts128<Aes128>,
}

impl AesXtsSectorCipher {
    pub const KEY_SIZE: usize = 16;

    /// # Arguments
    ///
    /// * `data_key` - Key for the data blocks.
    /// * `tweak_key` - Key used to encrypt the tweak.
    pub fn new(data_key: &[u8; Self::KEY_SIZE], tweak_key: &[u8; Self::KEY_SIZE]) -> Self {
        Self {
            xts: Xts128::new(Aes128::new(data_key.into()), Aes128::new(tweak_key.into())),
        }
    }
}

impl fmt::Debug for AesXtsSectorCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesXtsSectorCipher").finish_non_exhaustive()
    }
}

impl SectorCipher for AesXtsSectorCipher {
    fn encrypt_sectors(&self, first_sector: u64, data: &mut [u8]) -> Result<(), SectorCipherError> {
        check_aligned(data)?;
        self.xts
            .encrypt_area(data, SECTOR_SIZE, u128::from(first_sector), get_tweak_default);
        Ok(())
    }

    fn decrypt_sectors(&self, first_sector: u64, data: &mut [u8]) -> Result<(), SectorCipherError> {
        check_aligned(data)?;
        self.xts
            .decrypt_area(data, SECTOR_SIZE, u128::from(first_sector), get_tweak_default);
        Ok(())
    }
}
