//! Sector-level cryptography for PlayStation 3 storage.
//!
//! The console encrypts its hard drive in 512-byte sectors, either with
//! AES-CBC (IV reset to zero for every sector) or with AES-XTS (tweak is
//! the absolute sector number). Raw sectors are additionally stored with
//! every 16-bit halfword byte-swapped.

pub mod sector;
pub mod swap;

pub use sector::{AesCbcSectorCipher, AesXtsSectorCipher, SECTOR_SIZE, SectorCipher, SectorCipherError};
pub use swap::swap_halfwords;
