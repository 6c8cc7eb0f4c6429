//! Recursive directory walk and zone accounting.
//!
//! The walk starts at the root inode and visits each inode's data exactly
//! once: re-entering an inode is prevented by the first-visit guard on
//! `inode_count`, which also breaks cycles formed by corrupt `..` entries
//! and keeps hard links from being re-walked.

use crate::CheckError;
use crate::session::CheckSession;
use mfsck_ondisk::{DirEntry, Inode, clear_entry_ino, decode_zone_slots, encode_zone_slots};
use mfsck_types::{BLOCK_SIZE, DIRECT_ZONES, FileKind, ROOT_INO};

impl CheckSession<'_> {
    /// Count one directory reference to `ino` and return a copy of the
    /// inode. On the first reference, classify the file by mode and verify
    /// the inode bitmap agrees the inode is in use.
    pub(crate) fn get_inode(&mut self, ino: u32) -> Option<Inode> {
        if ino == 0 || ino > self.ninodes() {
            return None;
        }
        self.tally.total += 1;
        let inode = *self.inodes.get(ino)?;

        if self.inode_count[ino as usize] == 0 {
            if !self.inode_in_use(ino) {
                println!(
                    "Inode {ino} marked unused, but used for file '{}'",
                    self.path.display()
                );
                if self.repairs() {
                    if self.ask("Mark in use", true) {
                        self.mark_inode(ino);
                    }
                } else {
                    self.mark_uncorrected();
                }
            }
            match inode.kind() {
                FileKind::Directory => self.tally.directory += 1,
                FileKind::Regular => self.tally.regular += 1,
                FileKind::CharDev => self.tally.chardev += 1,
                FileKind::BlockDev => self.tally.blockdev += 1,
                FileKind::Symlink => self.tally.symlinks += 1,
                FileKind::Socket | FileKind::Fifo => {}
                FileKind::Unknown => {
                    println!(
                        "The file `{}' has mode {:05o}",
                        self.path.display(),
                        inode.mode
                    );
                }
            }
        } else {
            self.tally.links += 1;
        }

        if self.inode_count[ino as usize] == u8::MAX {
            println!("Warning: inode count too big.");
            self.mark_uncorrected();
        } else {
            self.inode_count[ino as usize] += 1;
        }

        Some(inode)
    }

    // ── Zone accountant ─────────────────────────────────────────────────────

    /// Record that the zone in `slot` is claimed by the current file.
    /// Detects double allocation (offering to clear this reference) and
    /// bitmap desync (offering to set the bit), then bumps the saturating
    /// per-zone count. Returns the zone, or 0 if empty/removed.
    fn add_zone(&mut self, slot: &mut u32, corrected: &mut bool) -> u32 {
        let mut block = self.check_zone_nr(slot, corrected);
        if block == 0 {
            return 0;
        }
        if self.zone_count[block as usize] > 0 {
            print!(
                "Block has been used before. Now in file `{}'.",
                self.path.display()
            );
            if self.ask("Clear", true) {
                *slot = 0;
                *corrected = true;
                block = 0;
            }
        }
        if block == 0 {
            return 0;
        }
        if !self.zone_in_use(block) {
            print!(
                "Block {block} in file `{}' is marked not in use.",
                self.path.display()
            );
            if self.ask("Correct", true) {
                self.mark_zone(block);
            }
        }
        let count = self.zone_count[block as usize];
        self.zone_count[block as usize] = count.saturating_add(1);
        block
    }

    /// Account an indirect block and every pointer it contains. The block is
    /// rewritten if any contained pointer was zeroed.
    fn add_zone_ind(&mut self, slot: &mut u32, corrected: &mut bool) {
        let block = self.add_zone(slot, corrected);
        if block == 0 {
            return;
        }
        let mut buf = vec![0_u8; BLOCK_SIZE];
        self.read_block(block, &mut buf);
        let mut slots = decode_zone_slots(self.variant, &buf);
        let mut block_changed = false;
        for entry in &mut slots {
            self.add_zone(entry, &mut block_changed);
        }
        if block_changed {
            encode_zone_slots(self.variant, &slots, &mut buf);
            self.write_block(block, &buf);
        }
    }

    fn add_zone_dind(&mut self, slot: &mut u32, corrected: &mut bool) {
        let block = self.add_zone(slot, corrected);
        if block == 0 {
            return;
        }
        let mut buf = vec![0_u8; BLOCK_SIZE];
        self.read_block(block, &mut buf);
        let mut slots = decode_zone_slots(self.variant, &buf);
        let mut block_changed = false;
        for entry in &mut slots {
            self.add_zone_ind(entry, &mut block_changed);
        }
        if block_changed {
            encode_zone_slots(self.variant, &slots, &mut buf);
            self.write_block(block, &buf);
        }
    }

    fn add_zone_tind(&mut self, slot: &mut u32, corrected: &mut bool) {
        let block = self.add_zone(slot, corrected);
        if block == 0 {
            return;
        }
        let mut buf = vec![0_u8; BLOCK_SIZE];
        self.read_block(block, &mut buf);
        let mut slots = decode_zone_slots(self.variant, &buf);
        let mut block_changed = false;
        for entry in &mut slots {
            self.add_zone_dind(entry, &mut block_changed);
        }
        if block_changed {
            encode_zone_slots(self.variant, &slots, &mut buf);
            self.write_block(block, &buf);
        }
    }

    /// Account every zone claimed by `ino`'s data map, once per inode.
    pub(crate) fn check_zones(&mut self, ino: u32) {
        if ino == 0 || ino > self.ninodes() {
            return;
        }
        // Already counted this file via another link.
        if self.inode_count[ino as usize] > 1 {
            return;
        }
        let Some(inode) = self.inodes.get(ino).copied() else {
            return;
        };
        if !inode.holds_zones() {
            return;
        }

        let mut zones = inode.zones;
        let mut inode_changed = false;
        for idx in 0..DIRECT_ZONES as usize {
            self.add_zone(&mut zones[idx], &mut inode_changed);
        }
        self.add_zone_ind(&mut zones[7], &mut inode_changed);
        self.add_zone_dind(&mut zones[8], &mut inode_changed);
        if self.variant.has_triple_indirect() {
            self.add_zone_tind(&mut zones[9], &mut inode_changed);
        }
        if inode_changed {
            if let Some(stored) = self.inodes.get_mut(ino) {
                stored.zones = zones;
            }
            self.mark_changed();
        }
    }

    // ── Directory walk ──────────────────────────────────────────────────────

    /// Check one directory entry of `dir_ino` at byte `offset`.
    pub(crate) fn check_file(&mut self, dir_ino: u32, offset: u32) -> Result<(), CheckError> {
        let block = self.map_block(dir_ino, offset / BLOCK_SIZE as u32);
        let mut buf = vec![0_u8; BLOCK_SIZE];
        self.read_block(block, &mut buf);

        let entry_off = offset as usize % BLOCK_SIZE;
        let Ok(entry) = DirEntry::parse(&buf, entry_off, self.dirfmt) else {
            // Entries never straddle a block; both standard entry sizes
            // divide the block size.
            return Ok(());
        };

        let mut ino = u32::from(entry.ino);
        if ino > self.ninodes() {
            print!(
                "The directory '{}' contains a bad inode number for file '{}'.",
                self.path.display(),
                entry.name_display()
            );
            if self.ask(" Remove", true) {
                clear_entry_ino(&mut buf, entry_off);
                self.write_block(block, &buf);
            }
            ino = 0;
        }

        self.path.push(entry.name());
        let inode = self.get_inode(ino);
        self.path.pop();

        if offset == 0 {
            if inode.is_none() || !entry.is_dot() {
                println!("{}: bad directory: '.' isn't first", self.path.display());
                self.mark_uncorrected();
            } else {
                return Ok(());
            }
        }
        if offset as usize == self.dirfmt.dirsize {
            if inode.is_none() || !entry.is_dotdot() {
                println!("{}: bad directory: '..' isn't second", self.path.display());
                self.mark_uncorrected();
            } else {
                return Ok(());
            }
        }
        let Some(inode) = inode else {
            return Ok(());
        };

        self.path.push(entry.name());
        if self.opts.list {
            self.list_entry(ino, &inode);
        }
        self.check_zones(ino);
        // First visit only: a re-entry here can only come from a corrupt
        // `.`/`..` entry or a hard link to a directory, and either would
        // recurse forever.
        if inode.is_dir() && self.inode_count[ino as usize] == 1 {
            self.recursive_check(ino)?;
        }
        self.path.pop();
        Ok(())
    }

    fn list_entry(&self, ino: u32, inode: &Inode) {
        if self.opts.verbose {
            print!("{ino:6} {:07o} {:3} ", inode.mode, inode.nlinks);
        }
        print!("{}", self.path.display());
        if inode.is_dir() {
            println!(":");
        } else {
            println!();
        }
    }

    /// Walk every entry of directory `ino`.
    pub(crate) fn recursive_check(&mut self, ino: u32) -> Result<(), CheckError> {
        let Some(dir) = self.inodes.get(ino).copied() else {
            return Err(CheckError::NotDirectory { ino });
        };
        if !dir.is_dir() {
            return Err(CheckError::NotDirectory { ino });
        }
        let dirsize = self.dirfmt.dirsize as u32;
        if dir.size < 2 * dirsize {
            print!("{}: bad directory: size < 32", self.path.display());
            self.mark_uncorrected();
        }
        let mut offset = 0;
        while offset < dir.size {
            self.check_file(ino, offset)?;
            offset += dirsize;
        }
        Ok(())
    }

    /// The root inode must be a directory; anything else is fatal.
    pub(crate) fn check_root(&self) -> Result<(), CheckError> {
        match self.inodes.get(ROOT_INO) {
            Some(inode) if inode.is_dir() => Ok(()),
            _ => Err(CheckError::RootNotDirectory),
        }
    }
}
