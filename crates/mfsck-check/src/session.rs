//! The check session: every piece of mutable checker state in one place.
//!
//! Owns the decoded superblock, both allocation bitmaps, the inode table,
//! the reconstructed count tables, the display path stack, the repair policy,
//! and the `changed` / `errors_uncorrected` flags. The walker and reconciler
//! are implemented on this type in sibling modules.

use crate::arbiter::{Prompter, RepairMode, arbitrate};
use crate::{CheckError, CheckOptions};
use mfsck_block::{BlockIoError, ByteDevice, block_offset};
use mfsck_ondisk::{Bitmap, DirFmt, InodeTable, Superblock, Variant, probe_dirsize};
use mfsck_types::{BLOCK_SIZE, MAX_NAME_DEPTH, ROOT_INO, SUPERBLOCK_BLOCK};
use tracing::debug;

/// Read and validate the superblock. Called before the session is built so
/// the driver can take the clean-filesystem early exit.
pub fn read_superblock(dev: &dyn ByteDevice) -> Result<Superblock, CheckError> {
    let mut buf = vec![0_u8; BLOCK_SIZE];
    dev.read_exact_at(block_offset(SUPERBLOCK_BLOCK), &mut buf)
        .map_err(CheckError::SuperblockRead)?;
    let sb = Superblock::parse(&buf)?;
    sb.validate()?;
    Ok(sb)
}

/// Bounded display stack for the path of the file being checked.
///
/// Components beyond [`MAX_NAME_DEPTH`] are walked but not displayed.
#[derive(Debug, Default)]
pub(crate) struct PathStack {
    names: Vec<Vec<u8>>,
    depth: usize,
}

impl PathStack {
    pub(crate) fn push(&mut self, name: &[u8]) {
        if self.depth < MAX_NAME_DEPTH {
            self.names.push(name.to_vec());
        }
        self.depth += 1;
    }

    pub(crate) fn pop(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth < MAX_NAME_DEPTH {
            self.names.pop();
        }
    }

    pub(crate) fn display(&self) -> String {
        if self.names.is_empty() {
            return "/".to_owned();
        }
        let mut out = String::new();
        for name in &self.names {
            out.push('/');
            out.push_str(&String::from_utf8_lossy(name));
        }
        out
    }
}

/// Per-kind file tallies accumulated during the walk.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FileTally {
    pub regular: u32,
    pub directory: u32,
    pub chardev: u32,
    pub blockdev: u32,
    pub symlinks: u32,
    /// Directory entries that named an already-counted inode.
    pub links: u32,
    /// Every directory entry naming a valid inode.
    pub total: u32,
}

pub struct CheckSession<'d> {
    dev: &'d dyn ByteDevice,
    pub(crate) sb: Superblock,
    pub(crate) variant: Variant,
    pub(crate) dirfmt: DirFmt,
    pub(crate) inode_map: Bitmap,
    pub(crate) zone_map: Bitmap,
    pub(crate) inodes: InodeTable,
    /// Directory references per inode; index 0 unused. Saturates at 255.
    pub(crate) inode_count: Vec<u8>,
    /// Data-map claims per physical zone. Saturates at 255.
    pub(crate) zone_count: Vec<u8>,
    pub(crate) path: PathStack,
    pub(crate) tally: FileTally,
    mode: RepairMode,
    prompter: Box<dyn Prompter>,
    pub(crate) opts: CheckOptions,
    changed: bool,
    errors_uncorrected: bool,
}

impl<'d> CheckSession<'d> {
    /// Load the bitmaps and inode table, resolve the directory entry
    /// geometry, and report layout warnings. Table read failures are fatal.
    pub fn load(
        dev: &'d dyn ByteDevice,
        sb: Superblock,
        mode: RepairMode,
        prompter: Box<dyn Prompter>,
        opts: CheckOptions,
    ) -> Result<Self, CheckError> {
        let variant = sb.variant();

        let mut imap = vec![0_u8; usize::from(sb.imap_blocks) * BLOCK_SIZE];
        dev.read_exact_at(block_offset(sb.imap_start()), &mut imap)
            .map_err(|source| CheckError::TableRead {
                what: "inode map",
                source,
            })?;

        let mut zmap = vec![0_u8; usize::from(sb.zmap_blocks) * BLOCK_SIZE];
        dev.read_exact_at(block_offset(sb.zmap_start()), &mut zmap)
            .map_err(|source| CheckError::TableRead {
                what: "zone map",
                source,
            })?;

        let mut table = vec![0_u8; sb.inode_blocks() as usize * BLOCK_SIZE];
        dev.read_exact_at(block_offset(sb.inode_table_start()), &mut table)
            .map_err(|source| CheckError::TableRead {
                what: "inode table",
                source,
            })?;
        let inodes = InodeTable::parse(variant, u32::from(sb.ninodes), &table)?;

        let ninodes = u32::from(sb.ninodes);
        let zones = sb.zone_count();
        debug!(
            target: "mfsck::check",
            ninodes,
            zones,
            first_zone = sb.first_zone(),
            ?variant,
            "tables loaded"
        );

        let mut session = Self {
            dev,
            dirfmt: sb.default_dirfmt(),
            variant,
            inode_map: Bitmap::from_bytes(imap),
            zone_map: Bitmap::from_bytes(zmap),
            inodes,
            inode_count: vec![0_u8; ninodes as usize + 1],
            zone_count: vec![0_u8; zones as usize],
            path: PathStack::default(),
            tally: FileTally::default(),
            mode,
            prompter,
            opts,
            changed: false,
            errors_uncorrected: false,
            sb,
        };

        if session.sb.norm_first_zone() != session.sb.first_zone() {
            println!("Warning: Firstzone != Norm_firstzone");
            session.errors_uncorrected = true;
        }

        session.resolve_dirfmt();

        if session.opts.show_super {
            session.print_super_info();
        }

        Ok(session)
    }

    /// Probe the root directory's first data block for the actual entry
    /// size; keep the magic-implied default when the probe finds nothing.
    fn resolve_dirfmt(&mut self) {
        let root_zone = self
            .inodes
            .get(ROOT_INO)
            .map(|inode| inode.zones[0])
            .unwrap_or(0);
        let mut blk = vec![0_u8; BLOCK_SIZE];
        self.read_block(root_zone, &mut blk);
        if let Some(fmt) = probe_dirsize(&blk) {
            self.dirfmt = fmt;
        }
        debug!(
            target: "mfsck::check",
            namelen = self.dirfmt.namelen,
            dirsize = self.dirfmt.dirsize,
            "directory entry geometry resolved"
        );
    }

    fn print_super_info(&self) {
        println!("{} inodes", self.sb.ninodes);
        println!("{} blocks", self.zones());
        println!(
            "Firstdatazone={} ({})",
            self.sb.first_zone(),
            self.sb.norm_first_zone()
        );
        println!("Zonesize={}", BLOCK_SIZE << self.sb.log_zone_size);
        println!("Maxsize={}", self.sb.max_size);
        println!("Filesystem state={}", self.sb.state);
        println!("namelen={}", self.dirfmt.namelen);
        println!();
    }

    // ── Geometry shorthands ─────────────────────────────────────────────────

    pub(crate) fn ninodes(&self) -> u32 {
        u32::from(self.sb.ninodes)
    }

    pub(crate) fn zones(&self) -> u32 {
        self.sb.zone_count()
    }

    pub(crate) fn first_zone(&self) -> u32 {
        self.sb.first_zone()
    }

    #[must_use]
    pub fn changed(&self) -> bool {
        self.changed
    }

    #[must_use]
    pub fn errors_uncorrected(&self) -> bool {
        self.errors_uncorrected
    }

    pub(crate) fn mark_changed(&mut self) {
        self.changed = true;
    }

    pub(crate) fn mark_uncorrected(&mut self) {
        self.errors_uncorrected = true;
    }

    // ── Bitmap views ────────────────────────────────────────────────────────

    pub(crate) fn inode_in_use(&self, ino: u32) -> bool {
        self.inode_map.get(ino)
    }

    /// Zone-map bit `j` covers physical zone `first_data_zone + j - 1`.
    pub(crate) fn zone_in_use(&self, zone: u32) -> bool {
        self.zone_map.get(zone - self.first_zone() + 1)
    }

    pub(crate) fn mark_inode(&mut self, ino: u32) {
        self.inode_map.set(ino);
        self.changed = true;
    }

    pub(crate) fn unmark_inode(&mut self, ino: u32) {
        self.inode_map.clear(ino);
        self.changed = true;
    }

    pub(crate) fn mark_zone(&mut self, zone: u32) {
        let bit = zone - self.first_zone() + 1;
        self.zone_map.set(bit);
        self.changed = true;
    }

    pub(crate) fn unmark_zone(&mut self, zone: u32) {
        let bit = zone - self.first_zone() + 1;
        self.zone_map.clear(bit);
        self.changed = true;
    }

    // ── Forgiving block I/O ─────────────────────────────────────────────────

    /// Read block `nr` into `buf`. Block 0 and unreadable blocks read as
    /// zeroes; a failed read is an uncorrected error, not a fatal one.
    pub(crate) fn read_block(&mut self, nr: u32, buf: &mut [u8]) {
        if nr == 0 {
            buf.fill(0);
            return;
        }
        match self.dev.read_exact_at(block_offset(nr), buf) {
            Ok(()) => {}
            Err(BlockIoError::OutOfBounds { .. }) => {
                println!(
                    "Read error: unable to seek to block in file '{}'",
                    self.path.display()
                );
                buf.fill(0);
                self.errors_uncorrected = true;
            }
            Err(_) => {
                println!("Read error: bad block in file '{}'", self.path.display());
                buf.fill(0);
                self.errors_uncorrected = true;
            }
        }
    }

    /// Write block `nr`. Refuses block numbers outside the data region; a
    /// failed write is an uncorrected error and the walk continues.
    pub(crate) fn write_block(&mut self, nr: u32, buf: &[u8]) {
        if nr == 0 {
            return;
        }
        if nr < self.first_zone() || nr >= self.zones() {
            println!("Internal error: trying to write bad block");
            println!("Write request ignored");
            self.errors_uncorrected = true;
            return;
        }
        if self.dev.write_all_at(block_offset(nr), buf).is_err() {
            println!("Write error: bad block in file '{}'", self.path.display());
            self.errors_uncorrected = true;
        }
    }

    /// Probe a zone to distinguish media-bad from logically unused.
    pub(crate) fn bad_zone(&self, nr: u32) -> bool {
        let mut buf = vec![0_u8; BLOCK_SIZE];
        self.dev
            .read_exact_at(block_offset(nr), &mut buf)
            .is_err()
    }

    // ── Repair arbitration ──────────────────────────────────────────────────

    /// Route one proposed fix through the arbiter, tracking the sticky
    /// uncorrected-error flag.
    pub(crate) fn ask(&mut self, question: &str, default_yes: bool) -> bool {
        let verdict = arbitrate(self.mode, self.prompter.as_mut(), question, default_yes);
        if verdict.uncorrected {
            self.errors_uncorrected = true;
        }
        if verdict.accepted {
            debug!(target: "mfsck::check", question, "repair accepted");
        }
        verdict.accepted
    }

    pub(crate) fn repairs(&self) -> bool {
        self.mode.repairs()
    }

    // ── Driver ──────────────────────────────────────────────────────────────

    /// Run both passes: account the root inode's zones, walk the tree, then
    /// reconcile counts against the bitmaps and link counts.
    pub fn check(&mut self) -> Result<(), CheckError> {
        self.check_root()?;
        self.inode_count.fill(0);
        self.zone_count.fill(0);
        self.check_zones(ROOT_INO);
        self.recursive_check(ROOT_INO)?;
        self.check_counts();
        debug!(
            target: "mfsck::check",
            changed = self.changed,
            errors_uncorrected = self.errors_uncorrected,
            files = self.tally.total,
            "check complete"
        );
        Ok(())
    }

    // ── Write-back ──────────────────────────────────────────────────────────

    /// Write the superblock with VALID set and ERROR reflecting the outcome.
    pub fn flush_super(&mut self) -> Result<(), CheckError> {
        self.sb.set_state(self.errors_uncorrected);
        self.dev
            .write_all_at(block_offset(SUPERBLOCK_BLOCK), self.sb.encoded())
            .map_err(|source| CheckError::TableWrite {
                what: "super-block",
                source,
            })
    }

    /// Write the superblock, both bitmaps, and the whole inode table.
    pub fn flush_tables(&mut self) -> Result<(), CheckError> {
        self.flush_super()?;
        self.dev
            .write_all_at(block_offset(self.sb.imap_start()), self.inode_map.as_bytes())
            .map_err(|source| CheckError::TableWrite {
                what: "inode map",
                source,
            })?;
        self.dev
            .write_all_at(block_offset(self.sb.zmap_start()), self.zone_map.as_bytes())
            .map_err(|source| CheckError::TableWrite {
                what: "zone map",
                source,
            })?;
        self.dev
            .write_all_at(
                block_offset(self.sb.inode_table_start()),
                &self.inodes.encode(),
            )
            .map_err(|source| CheckError::TableWrite {
                what: "inode table",
                source,
            })?;
        debug!(target: "mfsck::check", "tables flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_stack_displays_root_and_components() {
        let mut path = PathStack::default();
        assert_eq!(path.display(), "/");
        path.push(b"usr");
        path.push(b"bin");
        assert_eq!(path.display(), "/usr/bin");
        path.pop();
        assert_eq!(path.display(), "/usr");
        path.pop();
        assert_eq!(path.display(), "/");
    }

    #[test]
    fn path_stack_caps_displayed_depth() {
        let mut path = PathStack::default();
        for _ in 0..MAX_NAME_DEPTH + 10 {
            path.push(b"d");
        }
        assert_eq!(path.display().len(), 2 * MAX_NAME_DEPTH);
        for _ in 0..MAX_NAME_DEPTH + 10 {
            path.pop();
        }
        assert_eq!(path.display(), "/");
    }
}
