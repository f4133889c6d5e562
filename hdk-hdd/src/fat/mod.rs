//! FAT12/16/32 driver for the VFLASH volumes and the `dev_hdd1` swap area.

pub mod dir;
pub mod structs;
pub mod table;
mod volume;


pub use dir::DirEntry;
pub use structs::FatType;
pub use table::FatTable;
pub use volume::{ClusterList, FatGeometry, FatVolume};
