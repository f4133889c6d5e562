//! Filesystem-independent view of a volume, shared by the FAT and UFS2
//! drivers, plus tree walking and host extraction on top of it.

mod extract;
mod walk;

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};

use serde::Serialize;

use crate::error::HddError;

pub use extract::{
    CopyFailure, CopyReport, ExtractOptions, ExtractOptionsBuilder, copy_to_host, destination_path,
    sanitize_component,
};
pub use walk::{TreeWalker, WalkItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FsKind {
    Fat12,
    Fat16,
    Fat32,
    Ufs2,
}

impl FsKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fat12 => "FAT12",
            Self::Fat16 => "FAT16",
            Self::Fat32 => "FAT32",
            Self::Ufs2 => "UFS2",
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// One directory entry, resolved against its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    /// Unix seconds.
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    /// Start cluster on FAT, inode number on UFS2.
    pub node: u64,
    /// `node` of the directory holding this entry.
    pub parent: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    pub fn is_dot(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// Operations every volume driver provides.
///
/// Paths are absolute, `/`-separated and relative to the volume root.
pub trait Filesystem {
    fn kind(&self) -> FsKind;

    fn root(&mut self) -> Result<Entry, HddError>;

    /// Resolve `path`. Symlinks in intermediate components are always
    /// followed; the final component only when `follow` is set.
    fn lookup(&mut self, path: &str, follow: bool) -> Result<Entry, HddError>;

    /// Entries of a directory in on-disk order, including `.` and `..`.
    fn read_dir(&mut self, dir: &Entry) -> Result<Vec<Entry>, HddError>;

    /// Resolve a symlink chain to its final target. Other entries are
    /// returned unchanged.
    fn follow(&mut self, entry: &Entry) -> Result<Entry, HddError>;

    /// Physical addresses making up an entry's data: clusters on FAT
    /// (0 for the fixed root directory), fragment addresses on UFS2 (0 for a hole).
    fn address_list(&mut self, entry: &Entry) -> Result<Vec<u64>, HddError>;

    /// Stream a file's contents to `out`, returning the bytes written.
    fn read_file(&mut self, file: &Entry, out: &mut dyn Write) -> Result<u64, HddError>;

    /// Overwrite a file in place with exactly `file.size` bytes from `src`.
    fn write_file(&mut self, file: &Entry, src: &mut dyn Read) -> Result<u64, HddError>;

    fn free_bytes(&mut self) -> Result<u64, HddError>;

    /// Sorted listing of the directory at `path`.
    fn list(&mut self, path: &str) -> Result<Vec<Entry>, HddError> {
        let dir = self.lookup(path, true)?;
        if !dir.is_dir() {
            return Err(HddError::NotADirectory(path.to_string()));
        }
        let mut entries = self.read_dir(&dir)?;
        sort_entries(&mut entries);
        Ok(entries)
    }
}

/// Listing order: `.`, then `..`, then byte-wise lexicographic.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let rank = |name: &str| match name {
        "." => 0,
        ".." => 1,
        _ => 2,
    };
    rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
}

pub fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by(|a, b| compare_names(&a.name, &b.name));
}

/// Non-empty path components, without `.`.
pub(crate) fn path_components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}

/// Join a parent volume path and a child name.
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}
