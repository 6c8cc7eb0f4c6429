//! Zone pointer validation and logical-to-physical block mapping.
//!
//! Every slot read passes through `check_zone_nr` before it is followed, so
//! the walker never recurses into an out-of-range zone, and an accepted
//! repair touches only the one block that carried the bad slot.

use crate::session::CheckSession;
use mfsck_types::{BLOCK_SIZE, DIRECT_ZONES};
use mfsck_ondisk::{decode_zone_slots, encode_zone_slots};

impl CheckSession<'_> {
    /// Validate one zone slot. Returns the slot value when it is 0 or within
    /// `[first_data_zone, zones)`; otherwise offers to zero the slot and
    /// returns 0. `corrected` records an accepted repair so the caller can
    /// flush the containing block.
    pub(crate) fn check_zone_nr(&mut self, slot: &mut u32, corrected: &mut bool) -> u32 {
        if *slot == 0 {
            return 0;
        }
        if *slot < self.first_zone() {
            print!("Zone nr < FIRSTZONE in file `{}'.", self.path.display());
        } else if *slot >= self.zones() {
            print!("Zone nr >= ZONES in file `{}'.", self.path.display());
        } else {
            return *slot;
        }
        if self.ask("Remove block", true) {
            *slot = 0;
            *corrected = true;
        }
        0
    }

    /// Validate a slot stored in the inode itself; an accepted repair patches
    /// the inode table and marks the filesystem changed.
    pub(crate) fn check_inode_slot(&mut self, ino: u32, idx: usize) -> u32 {
        let Some(inode) = self.inodes.get(ino) else {
            return 0;
        };
        let mut slot = inode.zones[idx];
        let mut corrected = false;
        let result = self.check_zone_nr(&mut slot, &mut corrected);
        if corrected {
            if let Some(inode) = self.inodes.get_mut(ino) {
                inode.zones[idx] = slot;
            }
            self.mark_changed();
        }
        result
    }

    /// Read an indirect block, validate the slot at `idx`, and rewrite the
    /// block if that slot was repaired.
    fn resolve_in_block(&mut self, block: u32, idx: u32) -> u32 {
        let mut buf = vec![0_u8; BLOCK_SIZE];
        self.read_block(block, &mut buf);
        let mut slots = decode_zone_slots(self.variant, &buf);
        let mut corrected = false;
        let result = self.check_zone_nr(&mut slots[idx as usize], &mut corrected);
        if corrected {
            encode_zone_slots(self.variant, &slots, &mut buf);
            self.write_block(block, &buf);
        }
        result
    }

    /// Map a zero-based logical block index within `ino` to a physical zone
    /// number. 0 means the slot is empty or was zeroed by an accepted repair.
    pub(crate) fn map_block(&mut self, ino: u32, blknr: u32) -> u32 {
        let ppb = self.variant.ptrs_per_block();
        if blknr < DIRECT_ZONES {
            return self.check_inode_slot(ino, blknr as usize);
        }
        let mut k = blknr - DIRECT_ZONES;
        if k < ppb {
            let block = self.check_inode_slot(ino, 7);
            return self.resolve_in_block(block, k);
        }
        k -= ppb;
        if k < ppb * ppb {
            let block = self.check_inode_slot(ino, 8);
            let block = self.resolve_in_block(block, k / ppb);
            return self.resolve_in_block(block, k % ppb);
        }
        if !self.variant.has_triple_indirect() {
            return 0;
        }
        k -= ppb * ppb;
        if k >= ppb * ppb * ppb {
            return 0;
        }
        let block = self.check_inode_slot(ino, 9);
        let block = self.resolve_in_block(block, k / (ppb * ppb));
        let block = self.resolve_in_block(block, (k / ppb) % ppb);
        self.resolve_in_block(block, k % ppb)
    }
}
