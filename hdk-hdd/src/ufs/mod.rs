//! UFS2 driver for `dev_hdd0`.
//!
//! Only the pieces needed to list, read and overwrite existing files are
//! implemented: the superblock, inodes, block pointer trees and directory
//! records. Allocation is never touched.

pub mod structs;
mod volume;


pub use structs::{Inode, ROOTINO, Superblock};
pub use volume::{DirRecord, MAX_SYMLINK_HOPS, UfsVolume, block_size, parse_directory};
