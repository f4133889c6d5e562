//! On-disk UFS2 structures. All fields are big-endian.

use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::HddError;

/// Byte offset of the superblock from the start of the partition.
pub const SBLOCK_UFS2: u64 = 65536;

/// Inode number of the root directory.
pub const ROOTINO: u32 = 2;

/// Direct block pointers per inode.
pub const NDADDR: usize = 12;

/// Indirect block pointers per inode (single, double, triple).
pub const NIADDR: usize = 3;

/// Mask selecting the file type bits of `di_mode`.
pub const IFMT: u16 = 0o170000;

/// Summary counters for the whole filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct CsumTotal {
    pub ndir: i64,
    pub nbfree: i64,
    pub nifree: i64,
    pub nffree: i64,
    pub numclusters: i64,
    pub spare: [i64; 3],
}

/// The fields of `struct fs` this driver uses, at their UFS2 offsets.
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(big)]
pub struct Superblock {
    #[brw(pad_before = 0x08)]
    pub sblkno: i32,
    pub cblkno: i32,
    pub iblkno: i32,
    pub dblkno: i32,
    #[brw(pad_before = 0x14)]
    pub ncg: u32,
    pub bsize: i32,
    pub fsize: i32,
    pub frag: i32,
    #[brw(pad_before = 0x0C)]
    pub bmask: i32,
    pub fmask: i32,
    pub bshift: i32,
    pub fshift: i32,
    #[brw(pad_before = 0x08)]
    pub fragshift: i32,
    pub fsbtodb: i32,
    pub sbsize: i32,
    #[brw(pad_before = 0x08)]
    pub nindir: i32,
    pub inopb: u32,
    #[brw(pad_before = 0x3C)]
    pub ipg: u32,
    pub fpg: i32,
    #[brw(pad_before = 0x14)]
    pub fsmnt: [u8; 468],
    pub volname: [u8; 32],
    #[brw(pad_before = 0x128)]
    pub cstotal: CsumTotal,
    pub time: i64,
    pub size: i64,
    pub dsize: i64,
    #[brw(pad_before = 0xD8)]
    pub flags: i32,
    pub contigsumsize: i32,
    pub maxsymlinklen: i32,
    #[brw(pad_before = 0x04)]
    pub maxfilesize: u64,
    pub qbmask: u64,
    pub qfmask: u64,
    #[brw(pad_before = 0x14)]
    pub magic: u32,
}

impl Superblock {
    pub const SIZE: usize = 0x560;
    pub const MAGIC: u32 = 0x1954_0119;
    pub const MAGIC_OFFSET: usize = 0x55C;

    /// Parse and sanity-check a superblock.
    pub fn parse(buf: &[u8]) -> Result<Self, HddError> {
        let sb = Self::read(&mut Cursor::new(buf))
            .map_err(|e| HddError::corrupt(format!("Failed to read UFS2 superblock: {e}")))?;

        if sb.magic != Self::MAGIC {
            return Err(HddError::corrupt(format!(
                "UFS2 superblock magic {:#010X}, expected {:#010X}",
                sb.magic,
                Self::MAGIC
            )));
        }

        let power_of_two = |v: i32| v > 0 && (v as u32).is_power_of_two();
        if !power_of_two(sb.bsize)
            || !power_of_two(sb.fsize)
            || sb.fsize > sb.bsize
            || sb.ipg == 0
            || sb.fpg <= 0
            || sb.nindir <= 0
            || sb.bshift < 0
            || sb.iblkno < 0
        {
            return Err(HddError::corrupt("UFS2 superblock geometry out of range"));
        }

        Ok(sb)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HddError> {
        let mut out = vec![0u8; Self::SIZE];
        self.write(&mut Cursor::new(&mut out[..]))
            .map_err(|e| HddError::corrupt(format!("Failed to write UFS2 superblock: {e}")))?;
        Ok(out)
    }

    /// Volume name up to the first NUL.
    pub fn volume_name(&self) -> String {
        let end = self.volname.iter().position(|&b| b == 0).unwrap_or(self.volname.len());
        String::from_utf8_lossy(&self.volname[..end]).into_owned()
    }
}

/// File type bits of `di_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum FileType {
    Fifo = 0o010000,
    CharDevice = 0o020000,
    Directory = 0o040000,
    BlockDevice = 0o060000,
    Regular = 0o100000,
    Symlink = 0o120000,
    Socket = 0o140000,
    Whiteout = 0o160000,
}

/// `d_type` of a directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DirentType {
    Unknown = 0,
    Fifo = 1,
    CharDevice = 2,
    Directory = 4,
    BlockDevice = 6,
    Regular = 8,
    Symlink = 10,
    Socket = 12,
    Whiteout = 14,
}

/// 256-byte UFS2 dinode.
#[derive(Debug, Clone, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct Inode {
    pub mode: u16,
    pub nlink: i16,
    pub uid: u32,
    pub gid: u32,
    pub blksize: u32,
    pub size: u64,
    pub blocks: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub birthtime: i64,
    pub mtimensec: i32,
    pub atimensec: i32,
    pub ctimensec: i32,
    pub birthnsec: i32,
    pub generation: i32,
    pub kernflags: u32,
    pub flags: u32,
    pub extsize: i32,
    pub extb: [i64; 2],
    pub db: [i64; NDADDR],
    pub ib: [i64; NIADDR],
    pub spare: [i64; 3],
}

impl Inode {
    pub const SIZE: usize = 256;
    /// Offset of `db`, where inline data starts.
    pub const INLINE_OFFSET: usize = 112;
    /// Bytes of inline data held in `db` and `ib`.
    pub const INLINE_SIZE: usize = (NDADDR + NIADDR) * 8;

    pub fn parse(buf: &[u8]) -> Result<Self, HddError> {
        Self::read(&mut Cursor::new(buf))
            .map_err(|e| HddError::corrupt(format!("Failed to read UFS2 inode: {e}")))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HddError> {
        let mut cursor = Cursor::new(Vec::with_capacity(Self::SIZE));
        self.write(&mut cursor)
            .map_err(|e| HddError::corrupt(format!("Failed to write UFS2 inode: {e}")))?;
        Ok(cursor.into_inner())
    }

    /// `None` for type bits this driver does not know.
    pub fn file_type(&self) -> Option<FileType> {
        FileType::try_from(self.mode & IFMT).ok()
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(FileType::Directory)
    }

    pub fn is_regular(&self) -> bool {
        self.file_type() == Some(FileType::Regular)
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == Some(FileType::Symlink)
    }

    /// Data stored in the pointer area rather than in blocks.
    pub const fn has_inline_data(&self) -> bool {
        self.blocks == 0
    }

    /// The pointer area reinterpreted as raw bytes.
    pub fn inline_bytes(&self) -> [u8; Self::INLINE_SIZE] {
        let mut out = [0u8; Self::INLINE_SIZE];
        for (chunk, ptr) in out.chunks_exact_mut(8).zip(self.db.iter().chain(&self.ib)) {
            chunk.copy_from_slice(&ptr.to_be_bytes());
        }
        out
    }
}

/// Fixed header of a directory record; the name follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct DirectHeader {
    pub ino: u32,
    pub reclen: u16,
    pub kind: u8,
    pub namlen: u8,
}

impl DirectHeader {
    pub const SIZE: usize = 8;

    pub fn dirent_type(&self) -> DirentType {
        DirentType::try_from(self.kind).unwrap_or(DirentType::Unknown)
    }
}
