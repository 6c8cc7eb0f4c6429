use mfsck_types::{
    BLOCK_SIZE, FileKind, ParseError, read_le_u16, read_le_u32, write_le_u16, write_le_u32,
};
use serde::{Deserialize, Serialize};

use crate::sb::Variant;

/// Uniform in-memory inode covering both on-disk layouts.
///
/// v1 stores a single timestamp (kept in `mtime`), an 8-bit link count, and
/// 16-bit zone slots; v2 widens everything and adds the triple-indirect slot.
/// Both layouts decode losslessly into this struct, so the whole inode table
/// can be held decoded and re-encoded byte-identically at flush time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub mode: u16,
    pub nlinks: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    /// Slot 9 is unused on v1.
    pub zones: [u32; 10],
}

impl Inode {
    pub fn parse(variant: Variant, bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < variant.inode_size() {
            return Err(ParseError::InsufficientData {
                needed: variant.inode_size(),
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mut zones = [0_u32; 10];
        match variant {
            Variant::V1 => {
                for (i, slot) in zones.iter_mut().take(9).enumerate() {
                    *slot = u32::from(read_le_u16(bytes, 14 + 2 * i)?);
                }
                Ok(Self {
                    mode: read_le_u16(bytes, 0)?,
                    nlinks: u16::from(bytes[13]),
                    uid: u32::from(read_le_u16(bytes, 2)?),
                    gid: u32::from(bytes[12]),
                    size: read_le_u32(bytes, 4)?,
                    atime: 0,
                    mtime: read_le_u32(bytes, 8)?,
                    ctime: 0,
                    zones,
                })
            }
            Variant::V2 => {
                for (i, slot) in zones.iter_mut().enumerate() {
                    *slot = read_le_u32(bytes, 24 + 4 * i)?;
                }
                Ok(Self {
                    mode: read_le_u16(bytes, 0)?,
                    nlinks: read_le_u16(bytes, 2)?,
                    uid: u32::from(read_le_u16(bytes, 4)?),
                    gid: u32::from(read_le_u16(bytes, 6)?),
                    size: read_le_u32(bytes, 8)?,
                    atime: read_le_u32(bytes, 12)?,
                    mtime: read_le_u32(bytes, 16)?,
                    ctime: read_le_u32(bytes, 20)?,
                    zones,
                })
            }
        }
    }

    /// Encode into `bytes`, which must hold at least `variant.inode_size()`.
    ///
    /// Values that came from narrow on-disk fields (v1 uid/gid/nlinks, 16-bit
    /// zone slots) are masked back down; the checker never widens them beyond
    /// their origin.
    pub fn encode(&self, variant: Variant, bytes: &mut [u8]) {
        match variant {
            Variant::V1 => {
                write_le_u16(bytes, 0, self.mode);
                write_le_u16(bytes, 2, (self.uid & 0xFFFF) as u16);
                write_le_u32(bytes, 4, self.size);
                write_le_u32(bytes, 8, self.mtime);
                bytes[12] = (self.gid & 0xFF) as u8;
                bytes[13] = (self.nlinks & 0xFF) as u8;
                for (i, slot) in self.zones.iter().take(9).enumerate() {
                    write_le_u16(bytes, 14 + 2 * i, (*slot & 0xFFFF) as u16);
                }
            }
            Variant::V2 => {
                write_le_u16(bytes, 0, self.mode);
                write_le_u16(bytes, 2, self.nlinks);
                write_le_u16(bytes, 4, (self.uid & 0xFFFF) as u16);
                write_le_u16(bytes, 6, (self.gid & 0xFFFF) as u16);
                write_le_u32(bytes, 8, self.size);
                write_le_u32(bytes, 12, self.atime);
                write_le_u32(bytes, 16, self.mtime);
                write_le_u32(bytes, 20, self.ctime);
                for (i, slot) in self.zones.iter().enumerate() {
                    write_le_u32(bytes, 24 + 4 * i, *slot);
                }
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    /// File types whose zone slots carry data to account for.
    #[must_use]
    pub fn holds_zones(&self) -> bool {
        matches!(
            self.kind(),
            FileKind::Regular | FileKind::Directory | FileKind::Symlink
        )
    }
}

/// The whole inode table, decoded once and held 1-based.
///
/// Index 0 is the reserved null inode and has no on-disk storage; inode `i`
/// lives at byte offset `(i - 1) * inode_size` in the table region.
#[derive(Debug, Clone)]
pub struct InodeTable {
    variant: Variant,
    inodes: Vec<Inode>,
}

impl InodeTable {
    pub fn parse(variant: Variant, ninodes: u32, buffer: &[u8]) -> Result<Self, ParseError> {
        let size = variant.inode_size();
        let mut inodes = Vec::with_capacity(ninodes as usize);
        for i in 0..ninodes as usize {
            let offset = i * size;
            let bytes = mfsck_types::ensure_slice(buffer, offset, size)?;
            inodes.push(Inode::parse(variant, bytes)?);
        }
        Ok(Self { variant, inodes })
    }

    #[must_use]
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Number of inodes in the table (the valid range is `1..=len`).
    #[must_use]
    pub fn len(&self) -> u32 {
        self.inodes.len() as u32
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    #[must_use]
    pub fn get(&self, ino: u32) -> Option<&Inode> {
        if ino == 0 {
            return None;
        }
        self.inodes.get(ino as usize - 1)
    }

    pub fn get_mut(&mut self, ino: u32) -> Option<&mut Inode> {
        if ino == 0 {
            return None;
        }
        self.inodes.get_mut(ino as usize - 1)
    }

    /// Re-encode the table to its on-disk region, padded to whole blocks.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let size = self.variant.inode_size();
        let blocks = (self.inodes.len() as u32).div_ceil(self.variant.inodes_per_block());
        let mut buffer = vec![0_u8; blocks as usize * BLOCK_SIZE];
        for (i, inode) in self.inodes.iter().enumerate() {
            inode.encode(self.variant, &mut buffer[i * size..(i + 1) * size]);
        }
        buffer
    }
}

// ── Indirect block slot codecs ──────────────────────────────────────────────

/// Decode one indirect block into zone slot values (512 u16s on v1,
/// 256 u32s on v2).
#[must_use]
pub fn decode_zone_slots(variant: Variant, block: &[u8]) -> Vec<u32> {
    let count = variant.ptrs_per_block() as usize;
    let mut slots = Vec::with_capacity(count);
    match variant {
        Variant::V1 => {
            for i in 0..count {
                slots.push(u32::from(u16::from_le_bytes([
                    block[2 * i],
                    block[2 * i + 1],
                ])));
            }
        }
        Variant::V2 => {
            for i in 0..count {
                slots.push(u32::from_le_bytes([
                    block[4 * i],
                    block[4 * i + 1],
                    block[4 * i + 2],
                    block[4 * i + 3],
                ]));
            }
        }
    }
    slots
}

/// Encode zone slot values back into an indirect block buffer.
pub fn encode_zone_slots(variant: Variant, slots: &[u32], block: &mut [u8]) {
    match variant {
        Variant::V1 => {
            for (i, slot) in slots.iter().enumerate() {
                write_le_u16(block, 2 * i, (*slot & 0xFFFF) as u16);
            }
        }
        Variant::V2 => {
            for (i, slot) in slots.iter().enumerate() {
                write_le_u32(block, 4 * i, *slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_v1_bytes() -> Vec<u8> {
        let mut bytes = vec![0_u8; 32];
        write_le_u16(&mut bytes, 0, 0o100_644); // mode
        write_le_u16(&mut bytes, 2, 1000); // uid
        write_le_u32(&mut bytes, 4, 2048); // size
        write_le_u32(&mut bytes, 8, 0x5F00_0000); // time
        bytes[12] = 5; // gid
        bytes[13] = 2; // nlinks
        write_le_u16(&mut bytes, 14, 8); // zone[0]
        write_le_u16(&mut bytes, 16, 9); // zone[1]
        write_le_u16(&mut bytes, 28, 40); // zone[7] = indirect
        bytes
    }

    #[test]
    fn v1_inode_round_trips() {
        let bytes = sample_v1_bytes();
        let inode = Inode::parse(Variant::V1, &bytes).expect("parse");
        assert_eq!(inode.mode, 0o100_644);
        assert_eq!(inode.nlinks, 2);
        assert_eq!(inode.uid, 1000);
        assert_eq!(inode.gid, 5);
        assert_eq!(inode.size, 2048);
        assert_eq!(inode.zones[0], 8);
        assert_eq!(inode.zones[7], 40);
        assert_eq!(inode.zones[9], 0);

        let mut out = vec![0_u8; 32];
        inode.encode(Variant::V1, &mut out);
        assert_eq!(out, bytes);
    }

    #[test]
    fn v2_inode_round_trips() {
        let mut bytes = vec![0_u8; 64];
        write_le_u16(&mut bytes, 0, 0o040_755);
        write_le_u16(&mut bytes, 2, 3); // nlinks
        write_le_u16(&mut bytes, 4, 0);
        write_le_u16(&mut bytes, 6, 100);
        write_le_u32(&mut bytes, 8, 96);
        write_le_u32(&mut bytes, 12, 1);
        write_le_u32(&mut bytes, 16, 2);
        write_le_u32(&mut bytes, 20, 3);
        write_le_u32(&mut bytes, 24, 77); // zone[0]
        write_le_u32(&mut bytes, 60, 123); // zone[9] = triple indirect

        let inode = Inode::parse(Variant::V2, &bytes).expect("parse");
        assert_eq!(inode.kind(), mfsck_types::FileKind::Directory);
        assert_eq!(inode.nlinks, 3);
        assert_eq!(inode.zones[0], 77);
        assert_eq!(inode.zones[9], 123);

        let mut out = vec![0_u8; 64];
        inode.encode(Variant::V2, &mut out);
        assert_eq!(out, bytes);
    }

    #[test]
    fn table_is_one_based_and_encodes_padded() {
        let mut region = vec![0_u8; 2 * 32];
        sample_v1_bytes()
            .iter()
            .enumerate()
            .for_each(|(i, b)| region[i] = *b);

        let table = InodeTable::parse(Variant::V1, 2, &region).expect("parse");
        assert_eq!(table.len(), 2);
        assert!(table.get(0).is_none());
        assert_eq!(table.get(1).expect("inode 1").nlinks, 2);
        assert!(table.get(3).is_none());

        // Two inodes still occupy one whole table block.
        let encoded = table.encode();
        assert_eq!(encoded.len(), BLOCK_SIZE);
        assert_eq!(&encoded[..32], &region[..32]);
    }

    #[test]
    fn zone_slot_codec_round_trips_both_widths() {
        for variant in [Variant::V1, Variant::V2] {
            let mut block = vec![0_u8; BLOCK_SIZE];
            let mut slots = decode_zone_slots(variant, &block);
            assert_eq!(slots.len(), variant.ptrs_per_block() as usize);
            assert!(slots.iter().all(|s| *s == 0));

            slots[0] = 9;
            slots[17] = 900;
            let last = slots.len() - 1;
            slots[last] = 1234;
            encode_zone_slots(variant, &slots, &mut block);
            assert_eq!(decode_zone_slots(variant, &block), slots);
        }
    }

    #[test]
    fn holds_zones_only_for_data_bearing_kinds() {
        let mut inode = Inode::parse(Variant::V1, &sample_v1_bytes()).expect("parse");
        assert!(inode.holds_zones());
        inode.mode = 0o020_600; // character device
        assert!(!inode.holds_zones());
        inode.mode = 0o120_777; // symlink
        assert!(inode.holds_zones());
    }
}
