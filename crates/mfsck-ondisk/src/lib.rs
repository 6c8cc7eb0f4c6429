#![forbid(unsafe_code)]
//! On-disk format parsing for Minix v1/v2 filesystem structures.
//!
//! Pure parsing crate with no I/O and no side effects. Decodes byte slices into
//! typed views of the superblock, inodes (both layout variants), directory
//! entries, and the allocation bitmaps, and re-encodes them for write-back.

pub mod bitmap;
pub mod dir;
pub mod inode;
pub mod sb;

pub use bitmap::Bitmap;
pub use dir::{DirEntry, DirFmt, clear_entry_ino, probe_dirsize};
pub use inode::{Inode, InodeTable, decode_zone_slots, encode_zone_slots};
pub use sb::{Superblock, Variant};
