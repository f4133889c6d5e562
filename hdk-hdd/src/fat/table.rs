use byteorder::{ByteOrder, LittleEndian};

use super::structs::FatType;
use crate::error::HddError;

/// First cluster number that addresses the data area.
pub const FIRST_DATA_CLUSTER: u32 = 2;

/// Decode entry `index` of a raw FAT.
///
/// FAT12 packs two entries into three bytes: an even index takes the low
/// 12 bits of the little-endian halfword at `index * 3 / 2`, an odd index
/// the high 12 bits. Returns `None` if the table is too short.
pub fn decode_entry(fat_type: FatType, table: &[u8], index: u32) -> Option<u32> {
    let index = index as usize;
    match fat_type {
        FatType::Fat12 => {
            let offset = index * 3 / 2;
            let raw = LittleEndian::read_u16(table.get(offset..offset + 2)?);
            Some(if index % 2 == 0 {
                u32::from(raw & 0x0FFF)
            } else {
                u32::from(raw >> 4)
            })
        }
        FatType::Fat16 => {
            let offset = index * 2;
            Some(u32::from(LittleEndian::read_u16(table.get(offset..offset + 2)?)))
        }
        FatType::Fat32 => {
            let offset = index * 4;
            Some(LittleEndian::read_u32(table.get(offset..offset + 4)?) & 0x0FFF_FFFF)
        }
    }
}

/// Data clusters a FAT of `fat_bytes` bytes has entries for.
pub fn addressable_clusters(fat_type: FatType, fat_bytes: u64) -> u32 {
    let entries = fat_bytes.saturating_mul(8) / u64::from(fat_type.bits());
    let clusters = entries.saturating_sub(u64::from(FIRST_DATA_CLUSTER));
    u32::try_from(clusters).unwrap_or(u32::MAX)
}

/// In-memory copy of the first FAT of a volume.
#[derive(Debug, Clone)]
pub struct FatTable {
    fat_type: FatType,
    bytes: Vec<u8>,
    data_clusters: u32,
}

impl FatTable {
    /// `data_clusters` is capped at the number of clusters `bytes` can describe.
    pub fn new(fat_type: FatType, bytes: Vec<u8>, data_clusters: u32) -> Self {
        let data_clusters = data_clusters.min(addressable_clusters(fat_type, bytes.len() as u64));
        Self {
            fat_type,
            bytes,
            data_clusters,
        }
    }

    pub const fn fat_type(&self) -> FatType {
        self.fat_type
    }

    pub const fn data_clusters(&self) -> u32 {
        self.data_clusters
    }

    pub fn entry(&self, index: u32) -> Option<u32> {
        decode_entry(self.fat_type, &self.bytes, index)
    }

    fn is_data_cluster(&self, cluster: u32) -> bool {
        cluster >= FIRST_DATA_CLUSTER && cluster - FIRST_DATA_CLUSTER < self.data_clusters
    }

    /// Follow the chain starting at `start` until an end-of-chain marker.
    ///
    /// # Errors
    ///
    /// [`HddError::Corrupt`] if the chain leaves the data area, hits a free
    /// or bad cluster, or is longer than the volume (a loop).
    pub fn chain(&self, start: u32) -> Result<Vec<u32>, HddError> {
        let eoc = self.fat_type.end_of_chain();
        let mut clusters = Vec::new();
        let mut cluster = start;

        loop {
            if !self.is_data_cluster(cluster) {
                return Err(HddError::corrupt(format!(
                    "cluster {cluster:#X} outside data area in chain from {start:#X}"
                )));
            }
            if clusters.len() >= self.data_clusters as usize {
                return Err(HddError::corrupt(format!("cluster chain from {start:#X} loops")));
            }
            clusters.push(cluster);

            let next = self.entry(cluster).ok_or_else(|| {
                HddError::corrupt(format!("cluster {cluster:#X} beyond end of FAT"))
            })?;

            if next >= eoc {
                break;
            }
            if next == self.fat_type.bad_cluster() {
                return Err(HddError::corrupt(format!(
                    "bad cluster marker after {cluster:#X} in chain from {start:#X}"
                )));
            }
            cluster = next;
        }

        Ok(clusters)
    }

    /// Count of zero entries across the data clusters.
    pub fn free_clusters(&self) -> u64 {
        (FIRST_DATA_CLUSTER..FIRST_DATA_CLUSTER.saturating_add(self.data_clusters))
            .filter(|&c| self.entry(c) == Some(0))
            .count() as u64
    }
}
