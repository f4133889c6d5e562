use hdk_secure::{AesCbcSectorCipher, AesXtsSectorCipher};
use serde::Deserialize;

use crate::error::HddError;

/// Per-console key material for the two encryption layers.
///
/// Deriving these from the console's root key happens elsewhere; this type
/// only carries the result. Only a prefix of each key is used: 24 bytes of
/// `ata_k1` for CBC devices, 16 bytes of each key for XTS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HddKeys {
    pub ata_k1: [u8; 32],
    pub ata_k2: [u8; 32],
    pub encdec_k1: [u8; 32],
    pub encdec_k2: [u8; 32],
}

#[derive(Deserialize)]
struct HexKeys {
    ata_k1: String,
    ata_k2: String,
    encdec_k1: String,
    encdec_k2: String,
}

impl HddKeys {
    /// Size of the binary key blob in bytes.
    pub const SIZE: usize = 0x80;

    /// Parse the 128-byte blob `ata_k1 || ata_k2 || encdec_k1 || encdec_k2`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, HddError> {
        if buf.len() != Self::SIZE {
            return Err(HddError::InvalidKeys(format!(
                "expected {} bytes, got {}",
                Self::SIZE,
                buf.len()
            )));
        }

        let mut keys = Self::default();
        keys.ata_k1.copy_from_slice(&buf[0x00..0x20]);
        keys.ata_k2.copy_from_slice(&buf[0x20..0x40]);
        keys.encdec_k1.copy_from_slice(&buf[0x40..0x60]);
        keys.encdec_k2.copy_from_slice(&buf[0x60..0x80]);
        Ok(keys)
    }

    /// Parse a JSON document with hex-encoded `ata_k1`, `ata_k2`,
    /// `encdec_k1` and `encdec_k2` fields.
    ///
    /// Keys shorter than 32 bytes are zero-padded.
    pub fn from_json(text: &str) -> Result<Self, HddError> {
        let hex_keys: HexKeys =
            serde_json::from_str(text).map_err(|e| HddError::InvalidKeys(e.to_string()))?;

        Ok(Self {
            ata_k1: decode_key("ata_k1", &hex_keys.ata_k1)?,
            ata_k2: decode_key("ata_k2", &hex_keys.ata_k2)?,
            encdec_k1: decode_key("encdec_k1", &hex_keys.encdec_k1)?,
            encdec_k2: decode_key("encdec_k2", &hex_keys.encdec_k2)?,
        })
    }

    /// Parse either key format: JSON if the data starts with `{`, else the
    /// raw 128-byte blob.
    pub fn parse(data: &[u8]) -> Result<Self, HddError> {
        match data.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => {
                let text = std::str::from_utf8(data)
                    .map_err(|e| HddError::InvalidKeys(format!("key file is not UTF-8: {e}")))?;
                Self::from_json(text)
            }
            _ => Self::from_bytes(data),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0x00..0x20].copy_from_slice(&self.ata_k1);
        out[0x20..0x40].copy_from_slice(&self.ata_k2);
        out[0x40..0x60].copy_from_slice(&self.encdec_k1);
        out[0x60..0x80].copy_from_slice(&self.encdec_k2);
        out
    }

    pub(crate) fn ata_cbc(&self) -> AesCbcSectorCipher {
        AesCbcSectorCipher::new(&prefix(&self.ata_k1))
    }

    pub(crate) fn ata_xts(&self) -> AesXtsSectorCipher {
        AesXtsSectorCipher::new(&prefix(&self.ata_k1), &prefix(&self.ata_k2))
    }

    pub(crate) fn encdec_xts(&self) -> AesXtsSectorCipher {
        AesXtsSectorCipher::new(&prefix(&self.encdec_k1), &prefix(&self.encdec_k2))
    }
}

fn prefix<const N: usize>(key: &[u8; 32]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&key[..N]);
    out
}

fn decode_key(name: &str, value: &str) -> Result<[u8; 32], HddError> {
    let bytes = hex::decode(value.trim())
        .map_err(|e| HddError::InvalidKeys(format!("{name}: {e}")))?;
    if bytes.len() > 32 {
        return Err(HddError::InvalidKeys(format!(
            "{name}: expected at most 32 bytes, got {}",
            bytes.len()
        )));
    }

    let mut key = [0u8; 32];
    key[..bytes.len()].copy_from_slice(&bytes);
    Ok(key)
}
