//! Reconciliation: compare reconstructed counts against the on-disk state.
//!
//! Two sweeps. Inodes: bitmap bit vs reference count, link count vs
//! reference count, and (under the warn-mode flag) stale modes on cleared
//! inodes. Zones: bitmap bit vs claim count, probing apparently-leaked zones
//! to leave media-bad ones alone.

use crate::session::CheckSession;

impl CheckSession<'_> {
    pub(crate) fn check_counts(&mut self) {
        for ino in 1..=self.ninodes() {
            let Some(inode) = self.inodes.get(ino).copied() else {
                continue;
            };

            if !self.inode_in_use(ino) && inode.mode != 0 && self.opts.warn_mode {
                print!("Inode {ino} mode not cleared.");
                if self.ask("Clear", true) {
                    if let Some(stored) = self.inodes.get_mut(ino) {
                        stored.mode = 0;
                    }
                    self.mark_changed();
                }
            }

            let count = self.inode_count[ino as usize];
            if count == 0 {
                if !self.inode_in_use(ino) {
                    continue;
                }
                print!("Inode {ino} not used, marked used in the bitmap.");
                if self.ask("Clear", true) {
                    self.unmark_inode(ino);
                }
                continue;
            }

            if !self.inode_in_use(ino) {
                print!("Inode {ino} used, marked unused in the bitmap.");
                if self.ask("Set", true) {
                    self.mark_inode(ino);
                }
            }

            if inode.nlinks != u16::from(count) {
                print!(
                    "Inode {ino} (mode = {:07o}), i_nlinks={}, counted={count}.",
                    inode.mode, inode.nlinks
                );
                if self.ask("Set i_nlinks to count", true) {
                    if let Some(stored) = self.inodes.get_mut(ino) {
                        stored.nlinks = u16::from(count);
                    }
                    self.mark_changed();
                }
            }
        }

        for zone in self.first_zone()..self.zones() {
            let count = self.zone_count[zone as usize];
            if self.zone_in_use(zone) == (count > 0) {
                continue;
            }
            if count == 0 {
                // Marked allocated but unclaimed: unless the zone is
                // unreadable media, offer to free it.
                if self.bad_zone(zone) {
                    continue;
                }
                print!("Zone {zone}: marked in use, no file uses it.");
                if self.ask("Unmark", true) {
                    self.unmark_zone(zone);
                }
                continue;
            }
            // Claimed but unmarked: the accountant already offered to set
            // the bit at first touch, so this is diagnostic only.
            println!("Zone {zone}: not in use, counted={count}");
        }
    }
}
