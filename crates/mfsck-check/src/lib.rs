#![forbid(unsafe_code)]
//! Two-pass structural verifier for Minix v1/v2 filesystems.
//!
//! Pass one walks the directory tree from the root inode, validating every
//! zone pointer it resolves and reconstructing per-inode and per-zone
//! reference counts. Pass two reconciles those counts against the on-disk
//! bitmaps and link counts. Every discrepancy is routed through a repair
//! arbiter that is read-only, automatic, or interactive.
//!
//! All mutable checker state lives in one [`CheckSession`] threaded through
//! both passes; nothing is process-global.

pub mod arbiter;
mod reconcile;
mod resolve;
mod session;
mod summary;
mod walk;

pub use arbiter::{DefaultsPrompter, Prompter, RepairMode, ScriptedPrompter};
pub use session::{CheckSession, read_superblock};
pub use summary::UsageSummary;

use mfsck_block::BlockIoError;
use mfsck_types::ParseError;
use thiserror::Error;

/// Fatal conditions; everything correctable is handled inside the session.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("unable to read super-block")]
    SuperblockRead(#[source] BlockIoError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unable to read {what}")]
    TableRead {
        what: &'static str,
        #[source]
        source: BlockIoError,
    },

    #[error("unable to write {what}")]
    TableWrite {
        what: &'static str,
        #[source]
        source: BlockIoError,
    },

    #[error("root inode isn't a directory")]
    RootNotDirectory,

    #[error("internal error: walked inode {ino} which is not a directory")]
    NotDirectory { ino: u32 },
}

/// Behavior switches mirrored from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    /// List every file visited with inode number, mode, and link count.
    pub list: bool,
    /// Verbose output (the `list` prefix columns).
    pub verbose: bool,
    /// Print superblock info after loading the tables.
    pub show_super: bool,
    /// Warn about allocated-but-cleared inodes retaining a non-zero mode.
    pub warn_mode: bool,
}
