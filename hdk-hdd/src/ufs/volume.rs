use std::collections::HashSet;
use std::io::{Cursor, Read, Write};

use binrw::BinRead;
use byteorder::{BigEndian, ByteOrder};

use super::structs::{
    DirectHeader, DirentType, FileType, Inode, NDADDR, ROOTINO, SBLOCK_UFS2, Superblock,
};
use crate::device::DiskIo;
use crate::error::HddError;
use crate::fs::{Entry, EntryKind, Filesystem, FsKind, path_components};
use crate::partition::Region;

/// Symlink hops allowed while resolving one path.
pub const MAX_SYMLINK_HOPS: usize = 40;

/// One live record of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRecord {
    pub ino: u32,
    pub kind: DirentType,
    pub name: String,
}

/// Parse the records of a directory's data, stopping after `size` bytes.
///
/// Records with inode 0 are unused space and skipped.
///
/// # Errors
///
/// [`HddError::Corrupt`] on a zero record length or a record running past
/// the directory size.
pub fn parse_directory(data: &[u8], size: u64) -> Result<Vec<DirRecord>, HddError> {
    let end = (size.min(data.len() as u64)) as usize;
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < end {
        if offset + DirectHeader::SIZE > end {
            return Err(HddError::corrupt(format!(
                "directory record at {offset:#X} truncated"
            )));
        }
        let header = DirectHeader::read(&mut Cursor::new(&data[offset..]))
            .map_err(|e| HddError::corrupt(format!("Failed to read directory record: {e}")))?;

        if header.reclen == 0 {
            return Err(HddError::corrupt(format!(
                "zero-length directory record at {offset:#X}"
            )));
        }

        let name_start = offset + DirectHeader::SIZE;
        let name_end = name_start + usize::from(header.namlen);
        if name_end > end {
            return Err(HddError::corrupt(format!(
                "directory record name at {offset:#X} runs past the directory"
            )));
        }

        if header.ino != 0 {
            records.push(DirRecord {
                ino: header.ino,
                kind: header.dirent_type(),
                name: String::from_utf8_lossy(&data[name_start..name_end]).into_owned(),
            });
        }

        offset += usize::from(header.reclen);
    }

    Ok(records)
}

/// Accumulates block addresses until they span the file size.
struct BlockList {
    size: u64,
    bsize: u64,
    fsize: u64,
    bshift: u32,
    addresses: Vec<u64>,
    covered: u64,
}

impl BlockList {
    /// Push the address of the next logical block; true once the file is covered.
    fn push(&mut self, address: u64) -> bool {
        let lbn = self.addresses.len() as u64;
        self.addresses.push(address);
        self.covered += block_size(self.size, lbn, self.bsize, self.fsize, self.bshift);
        self.covered >= self.size
    }
}

/// Allocated size of logical block `lbn` of a file of `size` bytes. Only
/// the last direct block may be a partial run of fragments.
pub fn block_size(size: u64, lbn: u64, bsize: u64, fsize: u64, bshift: u32) -> u64 {
    if lbn >= NDADDR as u64 || size >= (lbn + 1) << bshift {
        bsize
    } else {
        (size % bsize).div_ceil(fsize) * fsize
    }
}

/// A mounted UFS2 volume.
pub struct UfsVolume<'d, I: DiskIo + ?Sized> {
    io: &'d mut I,
    base: u64,
    sb: Superblock,
}

impl<'d, I: DiskIo + ?Sized> UfsVolume<'d, I> {
    /// Mount the UFS2 filesystem in `region`.
    ///
    /// # Errors
    ///
    /// [`HddError::Corrupt`] if the superblock is missing or unusable.
    pub fn open(io: &'d mut I, region: Region) -> Result<Self, HddError> {
        let base = region.byte_offset();
        let raw = io.read_bytes(base + SBLOCK_UFS2, Superblock::SIZE)?;
        let sb = Superblock::parse(&raw)?;

        #[cfg(feature = "logging")]
        {
            tracing::debug!(
                bsize = sb.bsize,
                fsize = sb.fsize,
                ncg = sb.ncg,
                ipg = sb.ipg,
                volname = %sb.volume_name(),
                "mounted UFS2 volume at sector {:#X}",
                region.start
            );
        }

        Ok(Self { io, base, sb })
    }

    pub const fn superblock(&self) -> &Superblock {
        &self.sb
    }

    fn fsize(&self) -> u64 {
        self.sb.fsize as u64
    }

    fn bsize(&self) -> u64 {
        self.sb.bsize as u64
    }

    /// Byte offset of a fragment address.
    fn fragment_offset(&self, address: u64) -> u64 {
        self.base + address * self.fsize()
    }

    fn inode_offset(&self, ino: u32) -> u64 {
        let ipg = u64::from(self.sb.ipg);
        let ino = u64::from(ino);
        let fsize = self.fsize();
        self.base
            + self.sb.iblkno as u64 * fsize
            + (ino / ipg) * self.sb.fpg as u64 * fsize
            + (ino % ipg) * Inode::SIZE as u64
    }

    pub fn read_inode(&mut self, ino: u32) -> Result<Inode, HddError> {
        let raw = self.io.read_bytes(self.inode_offset(ino), Inode::SIZE)?;
        Inode::parse(&raw)
    }

    /// Pointers held in an indirect block. A hole yields all zeros.
    fn read_pointer_block(&mut self, address: u64) -> Result<Vec<u64>, HddError> {
        let count = self.sb.nindir as usize;
        if address == 0 {
            return Ok(vec![0; count]);
        }
        let raw = self.io.read_bytes(self.fragment_offset(address), count * 8)?;
        Ok(raw.chunks_exact(8).map(BigEndian::read_u64).collect())
    }

    /// Walk one pointer tree of depth `level` into `list`.
    fn expand(&mut self, list: &mut BlockList, address: u64, level: usize) -> Result<bool, HddError> {
        if level == 0 {
            return Ok(list.push(address));
        }
        for pointer in self.read_pointer_block(address)? {
            if self.expand(list, pointer, level - 1)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fragment addresses of each logical block of `inode`, in order, with
    /// 0 for holes. Empty for inline data.
    pub fn block_list(&mut self, inode: &Inode) -> Result<Vec<u64>, HddError> {
        if inode.size == 0 || inode.has_inline_data() {
            return Ok(Vec::new());
        }

        let mut list = BlockList {
            size: inode.size,
            bsize: self.bsize(),
            fsize: self.fsize(),
            bshift: self.sb.bshift as u32,
            addresses: Vec::new(),
            covered: 0,
        };

        for &address in &inode.db {
            if list.push(address as u64) {
                return Ok(list.addresses);
            }
        }
        for (depth, &address) in inode.ib.iter().enumerate() {
            if self.expand(&mut list, address as u64, depth + 1)? {
                return Ok(list.addresses);
            }
        }

        Err(HddError::corrupt(format!(
            "inode of {} bytes exceeds the addressable block range",
            inode.size
        )))
    }

    fn block_len(&self, inode: &Inode, lbn: usize) -> u64 {
        block_size(inode.size, lbn as u64, self.bsize(), self.fsize(), self.sb.bshift as u32)
    }

    /// Stream an inode's data to `out`.
    fn copy_data(&mut self, inode: &Inode, out: &mut dyn Write) -> Result<u64, HddError> {
        if inode.has_inline_data() {
            let data = self.inline_data(inode)?;
            out.write_all(&data)?;
            return Ok(data.len() as u64);
        }

        let blocks = self.block_list(inode)?;
        let mut buf = vec![0u8; self.bsize() as usize];
        let mut remaining = inode.size;

        for (lbn, address) in blocks.into_iter().enumerate() {
            let n = remaining.min(self.block_len(inode, lbn)) as usize;
            if address == 0 {
                buf[..n].fill(0);
            } else {
                self.io.read_at(self.fragment_offset(address), &mut buf[..n])?;
            }
            out.write_all(&buf[..n])?;
            remaining -= n as u64;
        }

        Ok(inode.size)
    }

    fn inline_data(&self, inode: &Inode) -> Result<Vec<u8>, HddError> {
        let size = inode.size as usize;
        if size > Inode::INLINE_SIZE {
            return Err(HddError::corrupt(format!(
                "inline data of {size} bytes exceeds the inode pointer area"
            )));
        }
        Ok(inode.inline_bytes()[..size].to_vec())
    }

    fn read_data(&mut self, inode: &Inode) -> Result<Vec<u8>, HddError> {
        let mut data = Vec::with_capacity(inode.size as usize);
        self.copy_data(inode, &mut data)?;
        Ok(data)
    }

    /// Live records of the directory `ino`.
    pub fn directory(&mut self, ino: u32) -> Result<Vec<DirRecord>, HddError> {
        let inode = self.read_inode(ino)?;
        if !inode.is_dir() {
            return Err(HddError::NotADirectory(format!("inode {ino}")));
        }
        let data = self.read_data(&inode)?;
        parse_directory(&data, inode.size)
    }

    /// Target path of a symlink inode.
    pub fn read_link(&mut self, inode: &Inode) -> Result<String, HddError> {
        let data = self.read_data(inode)?;
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Ok(String::from_utf8_lossy(&data[..end]).into_owned())
    }

    /// Resolve `path` starting at directory `start`, returning the
    /// containing directory and the inode found.
    fn resolve(
        &mut self,
        start: u32,
        path: &str,
        follow_last: bool,
        hops: &mut usize,
    ) -> Result<(u32, u32), HddError> {
        let mut dir = if path.starts_with('/') { ROOTINO } else { start };
        let mut found = (dir, dir);
        let components: Vec<&str> = path_components(path).collect();

        for (i, component) in components.iter().enumerate() {
            let record = self
                .directory(dir)
                .map_err(|e| match e {
                    HddError::NotADirectory(_) => HddError::NotADirectory(path.to_string()),
                    other => other,
                })?
                .into_iter()
                .find(|r| r.name == *component)
                .ok_or_else(|| HddError::NotFound(path.to_string()))?;

            let last = i + 1 == components.len();
            found = if last && !follow_last {
                (dir, record.ino)
            } else {
                self.follow_links(dir, record.ino, path, hops)?
            };
            dir = found.1;
        }

        Ok(found)
    }

    /// Follow `ino` (found in directory `parent`) through any symlinks.
    fn follow_links(
        &mut self,
        mut parent: u32,
        mut ino: u32,
        path: &str,
        hops: &mut usize,
    ) -> Result<(u32, u32), HddError> {
        let mut visited = HashSet::new();

        loop {
            let inode = self.read_inode(ino)?;
            if !inode.is_symlink() {
                return Ok((parent, ino));
            }
            if !visited.insert(ino) || *hops >= MAX_SYMLINK_HOPS {
                return Err(HddError::RecursiveSymlink(path.to_string()));
            }
            *hops += 1;

            let target = self.read_link(&inode)?;

            #[cfg(feature = "logging")]
            {
                tracing::trace!(ino, %target, "following symlink");
            }

            (parent, ino) = self.resolve(parent, &target, false, hops)?;
        }
    }

    fn entry(&mut self, name: String, ino: u32, parent: u32) -> Result<Entry, HddError> {
        let inode = self.read_inode(ino)?;
        let kind = match inode.file_type() {
            Some(FileType::Directory) => EntryKind::Directory,
            Some(FileType::Regular) => EntryKind::File,
            Some(FileType::Symlink) => EntryKind::Symlink,
            _ => EntryKind::Other,
        };
        let link_target = match kind {
            EntryKind::Symlink => Some(self.read_link(&inode)?),
            _ => None,
        };

        Ok(Entry {
            name,
            kind,
            size: inode.size,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
            node: u64::from(ino),
            parent: u64::from(parent),
            link_target,
        })
    }

    fn node_ino(node: u64) -> Result<u32, HddError> {
        u32::try_from(node).map_err(|_| HddError::OutOfRange(format!("inode {node}")))
    }

    fn file_inode(&mut self, file: &Entry) -> Result<Inode, HddError> {
        let inode = self.read_inode(Self::node_ino(file.node)?)?;
        if !inode.is_regular() {
            return Err(HddError::NotAFile(file.name.clone()));
        }
        Ok(inode)
    }
}

impl<I: DiskIo + ?Sized> Filesystem for UfsVolume<'_, I> {
    fn kind(&self) -> FsKind {
        FsKind::Ufs2
    }

    fn root(&mut self) -> Result<Entry, HddError> {
        self.entry("/".to_string(), ROOTINO, ROOTINO)
    }

    fn lookup(&mut self, path: &str, follow: bool) -> Result<Entry, HddError> {
        let mut hops = 0;
        let (parent, ino) = self.resolve(ROOTINO, path, follow, &mut hops)?;
        let name = path_components(path).last().unwrap_or("/").to_string();
        self.entry(name, ino, parent)
    }

    fn read_dir(&mut self, dir: &Entry) -> Result<Vec<Entry>, HddError> {
        let ino = Self::node_ino(dir.node)?;
        let records = self.directory(ino).map_err(|e| match e {
            HddError::NotADirectory(_) => HddError::NotADirectory(dir.name.clone()),
            other => other,
        })?;

        records
            .into_iter()
            .map(|record| self.entry(record.name, record.ino, ino))
            .collect()
    }

    fn follow(&mut self, entry: &Entry) -> Result<Entry, HddError> {
        if !entry.is_symlink() {
            return Ok(entry.clone());
        }
        let mut hops = 0;
        let (parent, ino) = self.follow_links(
            Self::node_ino(entry.parent)?,
            Self::node_ino(entry.node)?,
            &entry.name,
            &mut hops,
        )?;
        self.entry(entry.name.clone(), ino, parent)
    }

    fn address_list(&mut self, entry: &Entry) -> Result<Vec<u64>, HddError> {
        let inode = self.read_inode(Self::node_ino(entry.node)?)?;
        self.block_list(&inode)
    }

    fn read_file(&mut self, file: &Entry, out: &mut dyn Write) -> Result<u64, HddError> {
        let inode = self.file_inode(file)?;
        self.copy_data(&inode, out)
    }

    fn write_file(&mut self, file: &Entry, src: &mut dyn Read) -> Result<u64, HddError> {
        let ino = Self::node_ino(file.node)?;
        let inode = self.file_inode(file)?;

        if inode.has_inline_data() {
            let mut data = vec![0u8; self.inline_data(&inode)?.len()];
            src.read_exact(&mut data)?;
            let offset = self.inode_offset(ino) + Inode::INLINE_OFFSET as u64;
            self.io.write_at(offset, &data)?;
            return Ok(data.len() as u64);
        }

        let blocks = self.block_list(&inode)?;
        let mut buf = vec![0u8; self.bsize() as usize];
        let mut remaining = inode.size;

        for (lbn, address) in blocks.into_iter().enumerate() {
            let n = remaining.min(self.block_len(&inode, lbn)) as usize;
            src.read_exact(&mut buf[..n])?;
            if address == 0 {
                if buf[..n].iter().any(|&b| b != 0) {
                    return Err(HddError::OutOfRange(format!(
                        "{}: block {lbn} is a hole and cannot hold data",
                        file.name
                    )));
                }
            } else {
                self.io.write_at(self.fragment_offset(address), &buf[..n])?;
            }
            remaining -= n as u64;
        }

        #[cfg(feature = "logging")]
        {
            tracing::debug!(name = %file.name, ino, bytes = inode.size, "rewrote UFS2 file in place");
        }

        Ok(inode.size)
    }

    fn free_bytes(&mut self) -> Result<u64, HddError> {
        Ok(self.sb.cstotal.nbfree.max(0) as u64 * self.bsize())
    }
}
