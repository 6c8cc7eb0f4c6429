#![forbid(unsafe_code)]
//! Fixture support: build Minix v1/v2 images in memory.
//!
//! [`ImageBuilder`] produces structurally consistent filesystems (correct
//! bitmaps, link counts, and `.`/`..` wiring) through files, directories,
//! and arbitrarily deep indirect chains, plus targeted corruption helpers
//! so the conformance suite can break one invariant at a time.
//!
//! Builder misuse (allocating past the fixture's geometry, names longer
//! than the entry format) panics: fixtures are deterministic and a bad one
//! should fail the test loudly.

use mfsck_block::MemByteDevice;
use mfsck_ondisk::{DirFmt, Inode, Variant};
use mfsck_types::{
    BITS_PER_BLOCK, BLOCK_SIZE, DIRECT_ZONES, MINIX_MAGIC_V1_N14, MINIX_MAGIC_V1_N30,
    MINIX_MAGIC_V2_N14, MINIX_MAGIC_V2_N30, ROOT_INO, STATE_VALID_FS, write_le_u16, write_le_u32,
};

/// Fixed mtime stamped into fixture inodes.
const FIXTURE_TIME: u32 = 0x5F5E_1000;

pub struct ImageBuilder {
    variant: Variant,
    dirfmt: DirFmt,
    ninodes: u16,
    zones: u32,
    imap_blocks: u16,
    zmap_blocks: u16,
    first_zone: u32,
    image: Vec<u8>,
    next_ino: u32,
    next_zone: u32,
}

impl ImageBuilder {
    /// Create an image with a root directory. `namelen` must be 14 or 30.
    #[must_use]
    pub fn new(variant: Variant, ninodes: u16, zones: u32, namelen: usize) -> Self {
        let magic = match (variant, namelen) {
            (Variant::V1, 14) => MINIX_MAGIC_V1_N14,
            (Variant::V1, 30) => MINIX_MAGIC_V1_N30,
            (Variant::V2, 14) => MINIX_MAGIC_V2_N14,
            (Variant::V2, 30) => MINIX_MAGIC_V2_N30,
            _ => panic!("unsupported name length {namelen}"),
        };

        let inode_blocks = u32::from(ninodes).div_ceil(variant.inodes_per_block());
        let imap_blocks = (u32::from(ninodes) + 1).div_ceil(BITS_PER_BLOCK) as u16;

        // The zone map must cover `zones - first_zone + 1` bits, but
        // `first_zone` depends on the map size; grow until it fits.
        let mut zmap_blocks = 1_u16;
        loop {
            let first = 2 + u32::from(imap_blocks) + u32::from(zmap_blocks) + inode_blocks;
            if u32::from(zmap_blocks) * BITS_PER_BLOCK >= zones.saturating_sub(first) + 1 {
                break;
            }
            zmap_blocks += 1;
        }
        let first_zone = 2 + u32::from(imap_blocks) + u32::from(zmap_blocks) + inode_blocks;
        assert!(
            first_zone < zones,
            "fixture geometry leaves no data zones ({first_zone} >= {zones})"
        );

        let mut image = vec![0_u8; zones as usize * BLOCK_SIZE];

        // Superblock at block 1.
        let sb = BLOCK_SIZE;
        write_le_u16(&mut image, sb, ninodes);
        write_le_u16(&mut image, sb + 2, if zones <= 0xFFFF { zones as u16 } else { 0 });
        write_le_u16(&mut image, sb + 4, imap_blocks);
        write_le_u16(&mut image, sb + 6, zmap_blocks);
        write_le_u16(&mut image, sb + 8, first_zone as u16);
        write_le_u16(&mut image, sb + 10, 0); // log_zone_size
        let max_size = match variant {
            Variant::V1 => 0x1008_1C00,
            Variant::V2 => 0x7FFF_FFFF,
        };
        write_le_u32(&mut image, sb + 12, max_size);
        write_le_u16(&mut image, sb + 16, magic);
        write_le_u16(&mut image, sb + 18, STATE_VALID_FS);
        write_le_u32(&mut image, sb + 20, zones);

        let mut builder = Self {
            variant,
            dirfmt: DirFmt::for_namelen(namelen),
            ninodes,
            zones,
            imap_blocks,
            zmap_blocks,
            first_zone,
            image,
            next_ino: 1,
            next_zone: first_zone,
        };

        // Bit 0 of each map is conventionally set.
        builder.set_imap_bit(0, true);
        builder.set_zmap_raw_bit(0, true);

        // Root directory: ".", "..", both naming inode 1.
        let root = builder.alloc_inode(0o040_755, 2);
        assert_eq!(root, ROOT_INO);
        let zone = builder.alloc_zone();
        builder.write_raw_entry(zone, 0, ROOT_INO as u16, b".");
        builder.write_raw_entry(zone, builder.dirfmt.dirsize, ROOT_INO as u16, b"..");
        let mut inode = builder.read_inode(root);
        inode.zones[0] = zone;
        inode.size = 2 * builder.dirfmt.dirsize as u32;
        builder.write_inode(root, &inode);

        builder
    }

    // ── Geometry accessors ──────────────────────────────────────────────────

    #[must_use]
    pub fn first_zone(&self) -> u32 {
        self.first_zone
    }

    #[must_use]
    pub fn dirfmt(&self) -> DirFmt {
        self.dirfmt
    }

    fn inode_table_start(&self) -> u32 {
        2 + u32::from(self.imap_blocks) + u32::from(self.zmap_blocks)
    }

    fn inode_offset(&self, ino: u32) -> usize {
        assert!(ino >= 1 && u32::from(self.ninodes) >= ino, "inode {ino} out of range");
        self.inode_table_start() as usize * BLOCK_SIZE
            + (ino as usize - 1) * self.variant.inode_size()
    }

    // ── Raw access ──────────────────────────────────────────────────────────

    #[must_use]
    pub fn read_inode(&self, ino: u32) -> Inode {
        let offset = self.inode_offset(ino);
        let size = self.variant.inode_size();
        Inode::parse(self.variant, &self.image[offset..offset + size])
            .expect("fixture inode bytes")
    }

    pub fn write_inode(&mut self, ino: u32, inode: &Inode) {
        let offset = self.inode_offset(ino);
        let size = self.variant.inode_size();
        inode.encode(self.variant, &mut self.image[offset..offset + size]);
    }

    /// Write one packed directory entry into a data zone.
    pub fn write_raw_entry(&mut self, zone: u32, entry_offset: usize, ino: u16, name: &[u8]) {
        assert!(name.len() <= self.dirfmt.namelen, "name too long for fixture");
        let base = zone as usize * BLOCK_SIZE + entry_offset;
        write_le_u16(&mut self.image, base, ino);
        self.image[base + 2..base + 2 + self.dirfmt.namelen].fill(0);
        self.image[base + 2..base + 2 + name.len()].copy_from_slice(name);
    }

    pub fn set_imap_bit(&mut self, n: u32, on: bool) {
        let byte = 2 * BLOCK_SIZE + (n / 8) as usize;
        if on {
            self.image[byte] |= 1 << (n % 8);
        } else {
            self.image[byte] &= !(1 << (n % 8));
        }
    }

    /// Raw zone-map bit; bit `j` covers physical zone `first_zone + j - 1`.
    pub fn set_zmap_raw_bit(&mut self, n: u32, on: bool) {
        let byte = (2 + usize::from(self.imap_blocks)) * BLOCK_SIZE + (n / 8) as usize;
        if on {
            self.image[byte] |= 1 << (n % 8);
        } else {
            self.image[byte] &= !(1 << (n % 8));
        }
    }

    pub fn set_zone_allocated(&mut self, zone: u32, on: bool) {
        self.set_zmap_raw_bit(zone - self.first_zone + 1, on);
    }

    // ── Allocation ──────────────────────────────────────────────────────────

    pub fn alloc_inode(&mut self, mode: u16, nlinks: u16) -> u32 {
        let ino = self.next_ino;
        assert!(
            ino <= u32::from(self.ninodes),
            "fixture inode table exhausted"
        );
        self.next_ino += 1;
        self.set_imap_bit(ino, true);
        let inode = Inode {
            mode,
            nlinks,
            uid: 0,
            gid: 0,
            size: 0,
            atime: if self.variant == Variant::V2 { FIXTURE_TIME } else { 0 },
            mtime: FIXTURE_TIME,
            ctime: if self.variant == Variant::V2 { FIXTURE_TIME } else { 0 },
            zones: [0; 10],
        };
        self.write_inode(ino, &inode);
        ino
    }

    pub fn alloc_zone(&mut self) -> u32 {
        let zone = self.next_zone;
        assert!(zone < self.zones, "fixture data zones exhausted");
        self.next_zone += 1;
        self.set_zone_allocated(zone, true);
        zone
    }

    // ── Zone mapping ────────────────────────────────────────────────────────

    fn slot_at(&self, block: u32, idx: u32) -> u32 {
        let base = block as usize * BLOCK_SIZE;
        match self.variant {
            Variant::V1 => {
                let off = base + 2 * idx as usize;
                u32::from(u16::from_le_bytes([self.image[off], self.image[off + 1]]))
            }
            Variant::V2 => {
                let off = base + 4 * idx as usize;
                u32::from_le_bytes([
                    self.image[off],
                    self.image[off + 1],
                    self.image[off + 2],
                    self.image[off + 3],
                ])
            }
        }
    }

    fn set_slot(&mut self, block: u32, idx: u32, value: u32) {
        let base = block as usize * BLOCK_SIZE;
        match self.variant {
            Variant::V1 => write_le_u16(&mut self.image, base + 2 * idx as usize, value as u16),
            Variant::V2 => write_le_u32(&mut self.image, base + 4 * idx as usize, value),
        }
    }

    fn ensure_block_slot(&mut self, block: u32, idx: u32) -> u32 {
        let current = self.slot_at(block, idx);
        if current != 0 {
            return current;
        }
        let zone = self.alloc_zone();
        self.set_slot(block, idx, zone);
        zone
    }

    /// Map `logical` block of `ino` to `zone`, allocating indirect blocks on
    /// demand; the builder-side mirror of the checker's pointer resolver.
    pub fn map_in(&mut self, ino: u32, logical: u32, zone: u32) {
        let ppb = self.variant.ptrs_per_block();
        let mut inode = self.read_inode(ino);

        if logical < DIRECT_ZONES {
            inode.zones[logical as usize] = zone;
            self.write_inode(ino, &inode);
            return;
        }
        let mut k = logical - DIRECT_ZONES;

        if k < ppb {
            if inode.zones[7] == 0 {
                inode.zones[7] = self.alloc_zone();
            }
            let ind = inode.zones[7];
            self.write_inode(ino, &inode);
            self.set_slot(ind, k, zone);
            return;
        }
        k -= ppb;

        if k < ppb * ppb {
            if inode.zones[8] == 0 {
                inode.zones[8] = self.alloc_zone();
            }
            let dind = inode.zones[8];
            self.write_inode(ino, &inode);
            let ind = self.ensure_block_slot(dind, k / ppb);
            self.set_slot(ind, k % ppb, zone);
            return;
        }
        assert!(
            self.variant.has_triple_indirect(),
            "triple indirect mapping needs a v2 fixture"
        );
        k -= ppb * ppb;

        if inode.zones[9] == 0 {
            inode.zones[9] = self.alloc_zone();
        }
        let tind = inode.zones[9];
        self.write_inode(ino, &inode);
        let dind = self.ensure_block_slot(tind, k / (ppb * ppb));
        let ind = self.ensure_block_slot(dind, (k / ppb) % ppb);
        self.set_slot(ind, k % ppb, zone);
    }

    // ── Tree construction ───────────────────────────────────────────────────

    /// Append an entry to a directory without touching any link count.
    pub fn add_entry(&mut self, dir: u32, ino: u32, name: &[u8]) {
        let mut inode = self.read_inode(dir);
        let offset = inode.size as usize;
        let block_idx = offset / BLOCK_SIZE;
        assert!(
            block_idx < DIRECT_ZONES as usize,
            "fixture directories stay within direct zones"
        );
        if inode.zones[block_idx] == 0 {
            inode.zones[block_idx] = self.alloc_zone();
        }
        let zone = inode.zones[block_idx];
        inode.size += self.dirfmt.dirsize as u32;
        self.write_inode(dir, &inode);
        self.write_raw_entry(zone, offset % BLOCK_SIZE, ino as u16, name);
    }

    /// Create a regular file with `data_blocks` mapped data zones.
    pub fn add_file(&mut self, parent: u32, name: &[u8], data_blocks: u32) -> u32 {
        let ino = self.alloc_inode(0o100_644, 1);
        for logical in 0..data_blocks {
            let zone = self.alloc_zone();
            self.fill_zone(zone, (logical % 251) as u8 + 1);
            self.map_in(ino, logical, zone);
        }
        let mut inode = self.read_inode(ino);
        inode.size = data_blocks * BLOCK_SIZE as u32;
        self.write_inode(ino, &inode);
        self.add_entry(parent, ino, name);
        ino
    }

    /// Create a subdirectory wired with `.`/`..`; bumps the parent's link
    /// count for the child's `..`.
    pub fn add_dir(&mut self, parent: u32, name: &[u8]) -> u32 {
        let ino = self.alloc_inode(0o040_755, 2);
        let zone = self.alloc_zone();
        self.write_raw_entry(zone, 0, ino as u16, b".");
        self.write_raw_entry(zone, self.dirfmt.dirsize, parent as u16, b"..");
        let mut inode = self.read_inode(ino);
        inode.zones[0] = zone;
        inode.size = 2 * self.dirfmt.dirsize as u32;
        self.write_inode(ino, &inode);

        self.add_entry(parent, ino, name);
        let mut parent_inode = self.read_inode(parent);
        parent_inode.nlinks += 1;
        self.write_inode(parent, &parent_inode);
        ino
    }

    /// Add a hard link: a second entry naming `ino`, bumping its link count.
    pub fn add_link(&mut self, dir: u32, ino: u32, name: &[u8]) {
        self.add_entry(dir, ino, name);
        let mut inode = self.read_inode(ino);
        inode.nlinks += 1;
        self.write_inode(ino, &inode);
    }

    // ── Corruption helpers ──────────────────────────────────────────────────

    pub fn set_inode_zone(&mut self, ino: u32, slot: usize, value: u32) {
        let mut inode = self.read_inode(ino);
        inode.zones[slot] = value;
        self.write_inode(ino, &inode);
    }

    pub fn set_nlinks(&mut self, ino: u32, nlinks: u16) {
        let mut inode = self.read_inode(ino);
        inode.nlinks = nlinks;
        self.write_inode(ino, &inode);
    }

    pub fn set_mode(&mut self, ino: u32, mode: u16) {
        let mut inode = self.read_inode(ino);
        inode.mode = mode;
        self.write_inode(ino, &inode);
    }

    pub fn fill_zone(&mut self, zone: u32, byte: u8) {
        let base = zone as usize * BLOCK_SIZE;
        self.image[base..base + BLOCK_SIZE].fill(byte);
    }

    // ── Output ──────────────────────────────────────────────────────────────

    #[must_use]
    pub fn into_image(self) -> Vec<u8> {
        self.image
    }

    #[must_use]
    pub fn device(&self) -> MemByteDevice {
        MemByteDevice::new(self.image.clone())
    }
}
