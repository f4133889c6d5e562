//! In-memory disks and filesystem images shared by the unit tests.

use std::collections::HashMap;
use std::io::Cursor;

use binrw::BinWrite;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::device::{CipherContext, DeviceType, DiskIo};
use crate::error::HddError;
use crate::fat::FatGeometry;
use crate::fat::structs::{BootSector, FatType, LfnRecord, ShortDirRecord};
use crate::keys::HddKeys;
use crate::partition::{DiskLabel, PartitionEntry, Region};
use crate::ufs::structs::{CsumTotal, DirentType, FileType, Inode, ROOTINO, SBLOCK_UFS2, Superblock};

pub const SECTOR: usize = 512;

pub const TEST_KEYS: HddKeys = HddKeys {
    ata_k1: [0x11; 32],
    ata_k2: [0x22; 32],
    encdec_k1: [0x33; 32],
    encdec_k2: [0x44; 32],
};

/// Plaintext disk held in memory.
pub struct MemoryDisk {
    pub data: Vec<u8>,
}

impl MemoryDisk {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl DiskIo for MemoryDisk {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), HddError> {
        let start = offset as usize;
        let src = self
            .data
            .get(start..start + buf.len())
            .ok_or_else(|| HddError::OutOfRange(format!("read at {offset:#X}")))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), HddError> {
        let start = offset as usize;
        let dst = self
            .data
            .get_mut(start..start + data.len())
            .ok_or_else(|| HddError::OutOfRange(format!("write at {offset:#X}")))?;
        dst.copy_from_slice(data);
        Ok(())
    }
}

/// 2021-06-15 12:34:56 in FAT encoding, and the same instant in Unix seconds.
pub const FAT_DATE: u16 = ((2021 - 1980) << 9) | (6 << 5) | 15;
pub const FAT_TIME: u16 = (12 << 11) | (34 << 5) | (56 / 2);
pub const FAT_UNIX: i64 = 1_623_760_496;

/// A freshly formatted FAT volume of the smallest size for its type.
pub struct FatImage {
    pub bytes: Vec<u8>,
    pub boot: BootSector,
    pub geometry: FatGeometry,
}

impl FatImage {
    pub fn new(fat_type: FatType) -> Self {
        let mut boot = BootSector {
            jump: [0xEB, 0x3C, 0x90],
            oem_name: *b"PS3     ",
            bytes_per_sector: SECTOR as u16,
            sectors_per_cluster: 1,
            reserved_sectors: 1,
            fat_count: 2,
            media: 0xF8,
            ..BootSector::default()
        };
        match fat_type {
            FatType::Fat12 => {
                boot.root_entries = 16;
                boot.fat_size16 = 1;
                boot.total_sectors16 = 1 + 2 + 1 + 100;
            }
            FatType::Fat16 => {
                boot.root_entries = 512;
                boot.fat_size16 = 17;
                boot.total_sectors16 = 1 + 34 + 32 + 4200;
            }
            FatType::Fat32 => {
                boot.reserved_sectors = 2;
                boot.fat_size32 = 1;
                boot.root_cluster = 2;
                boot.fs_info_sector = 1;
                boot.total_sectors32 = 2 + 2 + 100;
            }
        }

        let geometry = FatGeometry::from_boot_sector(&boot).unwrap();
        assert_eq!(geometry.fat_type, fat_type);

        let mut bytes = vec![0u8; boot.total_sectors() as usize * SECTOR];
        boot.write(&mut Cursor::new(&mut bytes[..])).unwrap();
        bytes[510] = 0x55;
        bytes[511] = 0xAA;

        if fat_type == FatType::Fat32 {
            let info = &mut bytes[SECTOR..2 * SECTOR];
            LittleEndian::write_u32(&mut info[0..], 0x4161_5252);
            LittleEndian::write_u32(&mut info[484..], 0x6141_7272);
        }

        let mut image = Self {
            bytes,
            boot,
            geometry,
        };
        image.set_fat(0, 0x0FFF_FF00 | 0xF8);
        image.set_fat(1, 0x0FFF_FFFF);
        if fat_type == FatType::Fat32 {
            image.set_fat(2, 0x0FFF_FFFF);
        }
        image
    }

    /// Set entry `index` in every FAT copy.
    pub fn set_fat(&mut self, index: u32, value: u32) {
        let index = index as usize;
        for copy in 0..u64::from(self.boot.fat_count) {
            let base = (self.geometry.fat_offset + copy * self.geometry.fat_size) as usize;
            let fat = &mut self.bytes[base..base + self.geometry.fat_size as usize];
            match self.geometry.fat_type {
                FatType::Fat12 => {
                    let offset = index * 3 / 2;
                    let raw = LittleEndian::read_u16(&fat[offset..]);
                    let value = value as u16 & 0x0FFF;
                    let packed = if index % 2 == 0 {
                        (raw & 0xF000) | value
                    } else {
                        (raw & 0x000F) | (value << 4)
                    };
                    LittleEndian::write_u16(&mut fat[offset..], packed);
                }
                FatType::Fat16 => LittleEndian::write_u16(&mut fat[index * 2..], value as u16),
                FatType::Fat32 => LittleEndian::write_u32(&mut fat[index * 4..], value & 0x0FFF_FFFF),
            }
        }
    }

    /// Link `clusters` into a chain ending in an end-of-chain marker.
    pub fn chain(&mut self, clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = clusters.last() {
            self.set_fat(last, 0x0FFF_FFFF);
        }
    }

    pub fn write_cluster(&mut self, cluster: u32, data: &[u8]) {
        assert!(data.len() as u64 <= self.geometry.cluster_size);
        let offset = self.geometry.cluster_offset(cluster) as usize;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn cluster(&self, cluster: u32) -> &[u8] {
        let offset = self.geometry.cluster_offset(cluster) as usize;
        &self.bytes[offset..offset + self.geometry.cluster_size as usize]
    }

    /// Write raw records into the root directory.
    pub fn write_root(&mut self, records: &[[u8; 32]]) {
        let data = records.concat();
        match self.geometry.fat_type {
            FatType::Fat32 => self.write_cluster(self.geometry.root_cluster, &data),
            FatType::Fat12 | FatType::Fat16 => {
                assert!(data.len() as u64 <= self.geometry.root_size);
                let offset = self.geometry.root_offset as usize;
                self.bytes[offset..offset + data.len()].copy_from_slice(&data);
            }
        }
    }

    /// Store `data` in consecutive clusters from `first`, linking the chain.
    pub fn write_file_data(&mut self, first: u32, data: &[u8]) -> Vec<u32> {
        let cluster_size = self.geometry.cluster_size as usize;
        let count = data.len().div_ceil(cluster_size).max(1) as u32;
        let clusters: Vec<u32> = (first..first + count).collect();
        for (chunk, &cluster) in data.chunks(cluster_size).zip(&clusters) {
            self.write_cluster(cluster, chunk);
        }
        self.chain(&clusters);
        clusters
    }
}

/// Encode an 8.3 name such as `README.TXT` into its 11-byte form.
pub fn short_name(name: &str) -> [u8; 11] {
    let mut raw = [b' '; 11];
    let (base, ext) = match name.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() => (base, ext),
        _ => (name, ""),
    };
    raw[..base.len()].copy_from_slice(base.as_bytes());
    raw[8..8 + ext.len()].copy_from_slice(ext.as_bytes());
    raw
}

pub fn short_record(name: &[u8; 11], attributes: u8, cluster: u32, size: u32) -> [u8; 32] {
    let record = ShortDirRecord {
        name: *name,
        attributes,
        ctime: FAT_TIME,
        cdate: FAT_DATE,
        adate: FAT_DATE,
        cluster_hi: (cluster >> 16) as u16,
        mtime: FAT_TIME,
        mdate: FAT_DATE,
        cluster_lo: cluster as u16,
        size,
        ..ShortDirRecord::default()
    };
    let mut out = [0u8; 32];
    record.write(&mut Cursor::new(&mut out[..])).unwrap();
    out
}

/// LFN fragments for `long`, in on-disk order (last fragment first).
pub fn lfn_records(long: &str, short: &[u8; 11]) -> Vec<[u8; 32]> {
    let checksum = crate::fat::dir::lfn_checksum(short);
    let mut units: Vec<u16> = long.encode_utf16().collect();
    let count = units.len().div_ceil(13);
    if units.len() % 13 != 0 {
        units.push(0x0000);
    }
    units.resize(count * 13, 0xFFFF);

    (0..count)
        .rev()
        .map(|i| {
            let chars = &units[i * 13..(i + 1) * 13];
            let mut ordinal = (i + 1) as u8;
            if i + 1 == count {
                ordinal |= 0x40;
            }
            let record = LfnRecord {
                ordinal,
                name1: chars[0..5].try_into().unwrap(),
                attributes: 0x0F,
                kind: 0,
                checksum,
                name2: chars[5..11].try_into().unwrap(),
                first_cluster: 0,
                name3: chars[11..13].try_into().unwrap(),
            };
            let mut out = [0u8; 32];
            record.write(&mut Cursor::new(&mut out[..])).unwrap();
            out
        })
        .collect()
}

pub const UFS_BSIZE: usize = 4096;
pub const UFS_FSIZE: usize = 512;
pub const UFS_FRAG: u64 = 8;
pub const UFS_MTIME: i64 = 1_600_000_000;
const UFS_IPG: u32 = 64;
const UFS_FPG: i32 = 2048;
const UFS_IBLKNO: i32 = 144;
const UFS_DBLKNO: u64 = 176;

/// A small single-cylinder-group UFS2 filesystem.
pub struct UfsImage {
    pub bytes: Vec<u8>,
    pub sb: Superblock,
    next_ino: u32,
    next_fragment: u64,
    dirs: HashMap<u32, Vec<(u32, DirentType, String)>>,
}

impl UfsImage {
    pub fn new() -> Self {
        let mut volname = [0u8; 32];
        volname[..4].copy_from_slice(b"hdd0");

        let sb = Superblock {
            sblkno: 128,
            cblkno: 136,
            iblkno: UFS_IBLKNO,
            dblkno: UFS_DBLKNO as i32,
            ncg: 1,
            bsize: UFS_BSIZE as i32,
            fsize: UFS_FSIZE as i32,
            frag: UFS_FRAG as i32,
            bmask: !(UFS_BSIZE as i32 - 1),
            fmask: !(UFS_FSIZE as i32 - 1),
            bshift: 12,
            fshift: 9,
            fragshift: 3,
            fsbtodb: 0,
            sbsize: 2048,
            nindir: (UFS_BSIZE / 8) as i32,
            inopb: (UFS_BSIZE / Inode::SIZE) as u32,
            ipg: UFS_IPG,
            fpg: UFS_FPG,
            fsmnt: [0; 468],
            volname,
            cstotal: CsumTotal {
                nbfree: 100,
                ..CsumTotal::default()
            },
            time: UFS_MTIME,
            size: i64::from(UFS_FPG),
            dsize: i64::from(UFS_FPG),
            flags: 0,
            contigsumsize: 0,
            maxsymlinklen: Inode::INLINE_SIZE as i32,
            maxfilesize: u64::MAX >> 1,
            qbmask: (UFS_BSIZE - 1) as u64,
            qfmask: (UFS_FSIZE - 1) as u64,
            magic: Superblock::MAGIC,
        };

        let mut bytes = vec![0u8; UFS_FPG as usize * UFS_FSIZE];
        let sb_offset = SBLOCK_UFS2 as usize;
        bytes[sb_offset..sb_offset + Superblock::SIZE].copy_from_slice(&sb.to_bytes().unwrap());

        let mut image = Self {
            bytes,
            sb,
            next_ino: ROOTINO + 1,
            next_fragment: UFS_DBLKNO,
            dirs: HashMap::new(),
        };
        image.init_dir(ROOTINO, ROOTINO);
        image
    }

    fn inode_offset(&self, ino: u32) -> usize {
        UFS_IBLKNO as usize * UFS_FSIZE + ino as usize * Inode::SIZE
    }

    pub fn write_inode(&mut self, ino: u32, inode: &Inode) {
        let offset = self.inode_offset(ino);
        self.bytes[offset..offset + Inode::SIZE].copy_from_slice(&inode.to_bytes().unwrap());
    }

    pub fn inode(&self, ino: u32) -> Inode {
        let offset = self.inode_offset(ino);
        Inode::parse(&self.bytes[offset..offset + Inode::SIZE]).unwrap()
    }

    /// Allocate a full block, returning its fragment address.
    pub fn alloc_block(&mut self) -> u64 {
        let address = self.next_fragment;
        self.next_fragment += UFS_FRAG;
        assert!((self.next_fragment as usize) * UFS_FSIZE <= self.bytes.len(), "test image full");
        address
    }

    pub fn block_mut(&mut self, address: u64) -> &mut [u8] {
        let offset = address as usize * UFS_FSIZE;
        &mut self.bytes[offset..offset + UFS_BSIZE]
    }

    fn alloc_ino(&mut self) -> u32 {
        let ino = self.next_ino;
        self.next_ino += 1;
        assert!(ino < UFS_IPG);
        ino
    }

    fn base_inode(file_type: FileType, perms: u16) -> Inode {
        Inode {
            mode: u16::from(file_type) | perms,
            nlink: 1,
            blksize: UFS_BSIZE as u32,
            atime: UFS_MTIME,
            mtime: UFS_MTIME,
            ctime: UFS_MTIME,
            ..Inode::default()
        }
    }

    fn init_dir(&mut self, ino: u32, parent: u32) {
        let block = self.alloc_block();
        let mut inode = Self::base_inode(FileType::Directory, 0o755);
        inode.db[0] = block as i64;
        inode.blocks = UFS_FRAG;
        self.write_inode(ino, &inode);
        self.dirs.insert(
            ino,
            vec![
                (ino, DirentType::Directory, ".".to_string()),
                (parent, DirentType::Directory, "..".to_string()),
            ],
        );
        self.flush_dir(ino);
    }

    /// Serialize a directory into its single block, 512-byte chunked.
    fn flush_dir(&mut self, ino: u32) {
        let records = self.dirs[&ino].clone();
        let mut data = Vec::new();
        let mut last_start = 0;
        for (child, kind, name) in &records {
            let reclen = (8 + name.len() + 1).div_ceil(4) * 4;
            if data.len() / 512 != (data.len() + reclen - 1) / 512 {
                let pad = 512 - data.len() % 512;
                let prev_len = BigEndian::read_u16(&data[last_start + 4..]);
                BigEndian::write_u16(&mut data[last_start + 4..], prev_len + pad as u16);
                data.resize(data.len() + pad, 0);
            }
            last_start = data.len();
            data.extend_from_slice(&child.to_be_bytes());
            data.extend_from_slice(&(reclen as u16).to_be_bytes());
            data.push((*kind).into());
            data.push(name.len() as u8);
            data.extend_from_slice(name.as_bytes());
            data.resize(last_start + reclen, 0);
        }
        let size = data.len().div_ceil(512) * 512;
        let tail = (size - last_start) as u16;
        BigEndian::write_u16(&mut data[last_start + 4..], tail);
        data.resize(size, 0);
        assert!(size <= UFS_BSIZE);

        let mut inode = self.inode(ino);
        inode.size = size as u64;
        self.write_inode(ino, &inode);
        let block = inode.db[0] as u64;
        self.block_mut(block)[..size].copy_from_slice(&data);
    }

    fn link(&mut self, dir: u32, ino: u32, kind: DirentType, name: &str) {
        self.dirs
            .get_mut(&dir)
            .expect("parent is a directory")
            .push((ino, kind, name.to_string()));
        self.flush_dir(dir);
    }

    pub fn add_dir(&mut self, parent: u32, name: &str) -> u32 {
        let ino = self.alloc_ino();
        self.init_dir(ino, parent);
        self.link(parent, ino, DirentType::Directory, name);
        ino
    }

    /// Store a regular file in whole blocks, using the single indirect
    /// block past the twelfth.
    pub fn add_file(&mut self, dir: u32, name: &str, data: &[u8]) -> u32 {
        let ino = self.alloc_ino();
        let mut inode = Self::base_inode(FileType::Regular, 0o644);
        inode.size = data.len() as u64;

        let mut indirect = None;
        for (lbn, chunk) in data.chunks(UFS_BSIZE).enumerate() {
            let block = self.alloc_block();
            self.block_mut(block)[..chunk.len()].copy_from_slice(chunk);
            inode.blocks += UFS_FRAG;

            if lbn < 12 {
                inode.db[lbn] = block as i64;
            } else {
                let table = *indirect.get_or_insert_with(|| {
                    let table = self.alloc_block();
                    inode.ib[0] = table as i64;
                    table
                });
                let slot = (lbn - 12) * 8;
                BigEndian::write_u64(&mut self.block_mut(table)[slot..], block);
            }
        }

        self.write_inode(ino, &inode);
        self.link(dir, ino, DirentType::Regular, name);
        ino
    }

    /// A symlink with its target stored inline in the inode.
    pub fn add_symlink(&mut self, dir: u32, name: &str, target: &str) -> u32 {
        assert!(target.len() <= Inode::INLINE_SIZE);
        let ino = self.alloc_ino();
        let mut inode = Self::base_inode(FileType::Symlink, 0o777);
        inode.size = target.len() as u64;

        let mut inline = [0u8; Inode::INLINE_SIZE];
        inline[..target.len()].copy_from_slice(target.as_bytes());
        let words: Vec<i64> = inline.chunks_exact(8).map(BigEndian::read_i64).collect();
        inode.db.copy_from_slice(&words[..12]);
        inode.ib.copy_from_slice(&words[12..]);

        self.write_inode(ino, &inode);
        self.link(dir, ino, DirentType::Symlink, name);
        ino
    }
}

/// A plaintext drive under construction, encrypted at the end.
pub struct DiskImage {
    pub plain: Vec<u8>,
    pub label: DiskLabel,
    next_sector: u64,
}

impl DiskImage {
    pub fn new() -> Self {
        Self {
            plain: vec![0u8; 8 * SECTOR],
            label: DiskLabel::new(),
            next_sector: 8,
        }
    }

    /// Append `contents` as partition `index`.
    pub fn add_partition(&mut self, index: usize, contents: &[u8]) -> Region {
        let start = self.next_sector;
        let size = (contents.len().div_ceil(SECTOR) as u64).max(1);
        let offset = start as usize * SECTOR;
        self.plain.resize(offset + size as usize * SECTOR, 0);
        self.plain[offset..offset + contents.len()].copy_from_slice(contents);
        self.label.partitions[index] = PartitionEntry {
            start,
            size,
            ..PartitionEntry::default()
        };
        self.next_sector = (start + size).div_ceil(8) * 8;
        Region::new(start, size)
    }

    pub fn encrypt(mut self, device_type: DeviceType) -> Vec<u8> {
        let label = self.label.to_bytes().unwrap();
        self.plain[..label.len()].copy_from_slice(&label);

        let mut context = CipherContext::new(device_type, &TEST_KEYS);
        context.set_vflash_range(self.label.partitions[0].region());
        context.encrypt(0, &mut self.plain).unwrap();
        self.plain
    }
}

/// VFLASH contents: a nested disklabel, an empty system region and up to
/// three FAT volumes at 8-sector-aligned offsets.
pub fn vflash_contents(volumes: &[&[u8]]) -> Vec<u8> {
    let mut nested = DiskImage::new();
    nested.add_partition(0, &[0u8; 8 * SECTOR]);
    for (i, volume) in volumes.iter().enumerate() {
        nested.add_partition(i + 1, volume);
    }
    let label = nested.label.to_bytes().unwrap();
    nested.plain[..label.len()].copy_from_slice(&label);
    nested.plain
}
