use std::io::{Read, Write};

use super::dir::{DirEntry, fat_to_unix, parse_directory};
use super::structs::{BootSector, DIR_RECORD_SIZE, FatType};
use super::table::{FIRST_DATA_CLUSTER, FatTable, addressable_clusters};
use crate::device::DiskIo;
use crate::error::HddError;
use crate::fs::{Entry, EntryKind, Filesystem, FsKind, join_path, path_components};
use crate::partition::Region;

/// Byte layout of a FAT volume, relative to the start of its region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatGeometry {
    pub fat_type: FatType,
    pub cluster_size: u64,
    pub fat_offset: u64,
    pub fat_size: u64,
    /// Fixed root directory area (FAT12/16 only).
    pub root_offset: u64,
    pub root_size: u64,
    pub data_offset: u64,
    pub data_clusters: u32,
    /// First cluster of the root directory on FAT32, else 0.
    pub root_cluster: u32,
}

impl FatGeometry {
    pub fn from_boot_sector(boot: &BootSector) -> Result<Self, HddError> {
        let bps = u64::from(boot.bytes_per_sector);
        if bps == 0
            || !bps.is_power_of_two()
            || boot.sectors_per_cluster == 0
            || boot.fat_count == 0
            || boot.fat_size_sectors() == 0
        {
            return Err(HddError::corrupt("invalid FAT boot sector parameters"));
        }

        let fat_type = boot.fat_type();
        let fat_offset = u64::from(boot.reserved_sectors) * bps;
        let fat_size = boot.fat_size_sectors() * bps;
        let root_offset = fat_offset + u64::from(boot.fat_count) * fat_size;
        let root_size = match fat_type {
            FatType::Fat32 => 0,
            FatType::Fat12 | FatType::Fat16 => u64::from(boot.root_entries) * DIR_RECORD_SIZE as u64,
        };
        // A BPB claiming more clusters than its FAT can map is cut to the FAT
        let data_clusters = u32::try_from(boot.data_clusters())
            .unwrap_or(u32::MAX)
            .min(addressable_clusters(fat_type, fat_size));

        Ok(Self {
            fat_type,
            cluster_size: u64::from(boot.sectors_per_cluster) * bps,
            fat_offset,
            fat_size,
            root_offset,
            root_size,
            data_offset: root_offset + boot.root_dir_sectors() * bps,
            data_clusters,
            root_cluster: match fat_type {
                FatType::Fat32 => boot.root_cluster,
                FatType::Fat12 | FatType::Fat16 => 0,
            },
        })
    }

    /// Offset of a data cluster relative to the volume start.
    pub const fn cluster_offset(&self, cluster: u32) -> u64 {
        self.data_offset + (cluster - FIRST_DATA_CLUSTER) as u64 * self.cluster_size
    }
}

/// Storage backing a directory or file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterList {
    /// The FAT12/16 root directory area.
    FixedRoot,
    Chain(Vec<u32>),
}

/// A mounted FAT12/16/32 volume.
pub struct FatVolume<'d, I: DiskIo + ?Sized> {
    io: &'d mut I,
    base: u64,
    boot: BootSector,
    geometry: FatGeometry,
    table: FatTable,
}

impl<'d, I: DiskIo + ?Sized> FatVolume<'d, I> {
    /// Mount the FAT volume occupying `region`, loading its first FAT.
    ///
    /// # Errors
    ///
    /// [`HddError::Corrupt`] if the boot sector is unusable.
    pub fn open(io: &'d mut I, region: Region) -> Result<Self, HddError> {
        let base = region.byte_offset();
        let raw = io.read_bytes(base, BootSector::SIZE)?;
        let boot = BootSector::parse(&raw)?;
        let geometry = FatGeometry::from_boot_sector(&boot)?;

        let fat = io.read_bytes(base + geometry.fat_offset, geometry.fat_size as usize)?;
        let table = FatTable::new(geometry.fat_type, fat, geometry.data_clusters);

        #[cfg(feature = "logging")]
        {
            tracing::debug!(
                fat_type = ?geometry.fat_type,
                cluster_size = geometry.cluster_size,
                data_clusters = geometry.data_clusters,
                "mounted FAT volume at sector {:#X}",
                region.start
            );
        }

        Ok(Self {
            io,
            base,
            boot,
            geometry,
            table,
        })
    }

    pub const fn boot_sector(&self) -> &BootSector {
        &self.boot
    }

    pub const fn geometry(&self) -> &FatGeometry {
        &self.geometry
    }

    pub const fn table(&self) -> &FatTable {
        &self.table
    }

    /// Storage for a start cluster. Zero names the root directory.
    pub fn cluster_list(&self, start: u32) -> Result<ClusterList, HddError> {
        match (self.geometry.fat_type, start) {
            (FatType::Fat12 | FatType::Fat16, 0) => Ok(ClusterList::FixedRoot),
            (FatType::Fat32, 0) => self.table.chain(self.geometry.root_cluster).map(ClusterList::Chain),
            _ => self.table.chain(start).map(ClusterList::Chain),
        }
    }

    /// Raw records of the directory starting at `start`.
    fn directory_bytes(&mut self, start: u32) -> Result<Vec<u8>, HddError> {
        match self.cluster_list(start)? {
            ClusterList::FixedRoot => self
                .io
                .read_bytes(self.base + self.geometry.root_offset, self.geometry.root_size as usize),
            ClusterList::Chain(clusters) => {
                let cluster_size = self.geometry.cluster_size as usize;
                let mut data = vec![0u8; clusters.len() * cluster_size];
                for (chunk, &cluster) in data.chunks_exact_mut(cluster_size).zip(&clusters) {
                    self.io
                        .read_at(self.base + self.geometry.cluster_offset(cluster), chunk)?;
                }
                Ok(data)
            }
        }
    }

    /// Parsed entries of the directory starting at cluster `start`.
    pub fn directory(&mut self, start: u32) -> Result<Vec<DirEntry>, HddError> {
        let data = self.directory_bytes(start)?;
        parse_directory(&data, self.geometry.fat_type)
    }

    fn root_node(&self) -> u64 {
        u64::from(self.geometry.root_cluster)
    }

    fn to_entry(&self, dir_entry: &DirEntry, parent: u64) -> Entry {
        let record = &dir_entry.record;
        Entry {
            name: dir_entry.name.clone(),
            kind: if dir_entry.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            size: u64::from(record.size),
            atime: fat_to_unix(0, record.adate),
            mtime: fat_to_unix(record.mtime, record.mdate),
            ctime: fat_to_unix(record.ctime, record.cdate),
            node: u64::from(dir_entry.start_cluster),
            parent,
            link_target: None,
        }
    }

    fn node_cluster(node: u64) -> Result<u32, HddError> {
        u32::try_from(node).map_err(|_| HddError::OutOfRange(format!("cluster {node:#X}")))
    }

    /// Data clusters of a file, checked against its recorded size.
    fn file_clusters(&self, file: &Entry) -> Result<Vec<u32>, HddError> {
        if !file.is_file() {
            return Err(HddError::NotAFile(file.name.clone()));
        }
        if file.size == 0 {
            return Ok(Vec::new());
        }

        let clusters = match self.cluster_list(Self::node_cluster(file.node)?)? {
            ClusterList::Chain(clusters) => clusters,
            ClusterList::FixedRoot => return Err(HddError::NotAFile(file.name.clone())),
        };

        let capacity = clusters.len() as u64 * self.geometry.cluster_size;
        if capacity < file.size {
            return Err(HddError::corrupt(format!(
                "{}: chain holds {capacity} bytes, file is {}",
                file.name, file.size
            )));
        }
        Ok(clusters)
    }
}

impl<I: DiskIo + ?Sized> Filesystem for FatVolume<'_, I> {
    fn kind(&self) -> FsKind {
        match self.geometry.fat_type {
            FatType::Fat12 => FsKind::Fat12,
            FatType::Fat16 => FsKind::Fat16,
            FatType::Fat32 => FsKind::Fat32,
        }
    }

    fn root(&mut self) -> Result<Entry, HddError> {
        Ok(Entry {
            name: "/".to_string(),
            kind: EntryKind::Directory,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            node: self.root_node(),
            parent: self.root_node(),
            link_target: None,
        })
    }

    fn lookup(&mut self, path: &str, _follow: bool) -> Result<Entry, HddError> {
        let mut current = self.root()?;
        let mut walked = String::from("/");

        for component in path_components(path) {
            if !current.is_dir() {
                return Err(HddError::NotADirectory(walked));
            }
            walked = join_path(&walked, component);

            let entries = self.directory(Self::node_cluster(current.node)?)?;
            let found = entries
                .iter()
                .find(|e| e.matches(component))
                .ok_or_else(|| HddError::NotFound(walked.clone()))?;

            // ".." records pointing at the root store cluster 0
            let parent = current.node;
            current = self.to_entry(found, parent);
            if current.is_dir() && current.node == 0 {
                current.node = self.root_node();
            }
        }

        Ok(current)
    }

    fn read_dir(&mut self, dir: &Entry) -> Result<Vec<Entry>, HddError> {
        if !dir.is_dir() {
            return Err(HddError::NotADirectory(dir.name.clone()));
        }
        let entries = self.directory(Self::node_cluster(dir.node)?)?;
        Ok(entries.iter().map(|e| self.to_entry(e, dir.node)).collect())
    }

    fn follow(&mut self, entry: &Entry) -> Result<Entry, HddError> {
        Ok(entry.clone())
    }

    fn address_list(&mut self, entry: &Entry) -> Result<Vec<u64>, HddError> {
        if entry.is_file() && entry.size == 0 && entry.node == 0 {
            return Ok(Vec::new());
        }
        Ok(match self.cluster_list(Self::node_cluster(entry.node)?)? {
            ClusterList::FixedRoot => vec![0],
            ClusterList::Chain(clusters) => clusters.into_iter().map(u64::from).collect(),
        })
    }

    fn read_file(&mut self, file: &Entry, out: &mut dyn Write) -> Result<u64, HddError> {
        let clusters = self.file_clusters(file)?;
        let mut buf = vec![0u8; self.geometry.cluster_size as usize];
        let mut remaining = file.size;

        for cluster in clusters {
            if remaining == 0 {
                break;
            }
            let n = remaining.min(self.geometry.cluster_size) as usize;
            self.io
                .read_at(self.base + self.geometry.cluster_offset(cluster), &mut buf[..n])?;
            out.write_all(&buf[..n])?;
            remaining -= n as u64;
        }

        Ok(file.size)
    }

    fn write_file(&mut self, file: &Entry, src: &mut dyn Read) -> Result<u64, HddError> {
        let clusters = self.file_clusters(file)?;
        let mut buf = vec![0u8; self.geometry.cluster_size as usize];
        let mut remaining = file.size;

        for cluster in clusters {
            if remaining == 0 {
                break;
            }
            let n = remaining.min(self.geometry.cluster_size) as usize;
            src.read_exact(&mut buf[..n])?;
            self.io
                .write_at(self.base + self.geometry.cluster_offset(cluster), &buf[..n])?;
            remaining -= n as u64;
        }

        #[cfg(feature = "logging")]
        {
            tracing::debug!(name = %file.name, bytes = file.size, "rewrote FAT file in place");
        }

        Ok(file.size)
    }

    fn free_bytes(&mut self) -> Result<u64, HddError> {
        Ok(self.table.free_clusters() * self.geometry.cluster_size)
    }
}
