use mfsck_types::{
    BITS_PER_BLOCK, BLOCK_SIZE, MINIX_MAGIC_V1_N14, MINIX_MAGIC_V1_N30, MINIX_MAGIC_V2_N14,
    MINIX_MAGIC_V2_N30, ParseError, STATE_ERROR_FS, STATE_VALID_FS, V1_INODE_SIZE,
    V1_INODES_PER_BLOCK, V2_INODE_SIZE, V2_INODES_PER_BLOCK, read_le_u16, read_le_u32,
    write_le_u16,
};
use serde::{Deserialize, Serialize};

use crate::dir::DirFmt;

// Superblock field offsets within block 1.
const OFF_NINODES: usize = 0;
const OFF_NZONES: usize = 2;
const OFF_IMAP_BLOCKS: usize = 4;
const OFF_ZMAP_BLOCKS: usize = 6;
const OFF_FIRSTDATAZONE: usize = 8;
const OFF_LOG_ZONE_SIZE: usize = 10;
const OFF_MAX_SIZE: usize = 12;
const OFF_MAGIC: usize = 16;
const OFF_STATE: usize = 18;
const OFF_ZONES_V2: usize = 20;

/// Inode layout variant, selected by the superblock magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    /// 32-byte inodes, 16-bit zone slots, 9 slots (7 direct + ind + dind).
    V1,
    /// 64-byte inodes, 32-bit zone slots, 10 slots (adds triple indirect).
    V2,
}

impl Variant {
    #[must_use]
    pub fn inode_size(self) -> usize {
        match self {
            Self::V1 => V1_INODE_SIZE,
            Self::V2 => V2_INODE_SIZE,
        }
    }

    #[must_use]
    pub fn inodes_per_block(self) -> u32 {
        match self {
            Self::V1 => V1_INODES_PER_BLOCK,
            Self::V2 => V2_INODES_PER_BLOCK,
        }
    }

    /// Zone slots in the on-disk inode.
    #[must_use]
    pub fn zone_slots(self) -> usize {
        match self {
            Self::V1 => 9,
            Self::V2 => 10,
        }
    }

    /// Zone pointers held by one indirect block.
    #[must_use]
    pub fn ptrs_per_block(self) -> u32 {
        match self {
            Self::V1 => (BLOCK_SIZE / 2) as u32,
            Self::V2 => (BLOCK_SIZE / 4) as u32,
        }
    }

    #[must_use]
    pub fn has_triple_indirect(self) -> bool {
        matches!(self, Self::V2)
    }
}

/// Decoded Minix superblock plus the raw block it came from.
///
/// The raw block is retained so that write-back preserves every byte the
/// checker does not own; only the `state` field is ever patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub ninodes: u16,
    pub nzones: u16,
    pub imap_blocks: u16,
    pub zmap_blocks: u16,
    pub first_data_zone: u16,
    pub log_zone_size: u16,
    pub max_size: u32,
    pub magic: u16,
    pub state: u16,
    /// v2 zone count; raw field value even on v1 images.
    pub zones_v2: u32,

    variant: Variant,
    namelen: usize,

    #[serde(skip)]
    raw: Vec<u8>,
}

impl Superblock {
    /// Decode block 1. Unknown magics are fatal; everything else is recorded
    /// as-is and validated separately by [`Superblock::validate`].
    pub fn parse(block: &[u8]) -> Result<Self, ParseError> {
        if block.len() < BLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: BLOCK_SIZE,
                offset: 0,
                actual: block.len(),
            });
        }

        let magic = read_le_u16(block, OFF_MAGIC)?;
        let (variant, namelen) = match magic {
            MINIX_MAGIC_V1_N14 => (Variant::V1, 14),
            MINIX_MAGIC_V1_N30 => (Variant::V1, 30),
            MINIX_MAGIC_V2_N14 => (Variant::V2, 14),
            MINIX_MAGIC_V2_N30 => (Variant::V2, 30),
            actual => return Err(ParseError::UnknownMagic { actual }),
        };

        Ok(Self {
            ninodes: read_le_u16(block, OFF_NINODES)?,
            nzones: read_le_u16(block, OFF_NZONES)?,
            imap_blocks: read_le_u16(block, OFF_IMAP_BLOCKS)?,
            zmap_blocks: read_le_u16(block, OFF_ZMAP_BLOCKS)?,
            first_data_zone: read_le_u16(block, OFF_FIRSTDATAZONE)?,
            log_zone_size: read_le_u16(block, OFF_LOG_ZONE_SIZE)?,
            max_size: read_le_u32(block, OFF_MAX_SIZE)?,
            magic,
            state: read_le_u16(block, OFF_STATE)?,
            zones_v2: read_le_u32(block, OFF_ZONES_V2)?,
            variant,
            namelen,
            raw: block[..BLOCK_SIZE].to_vec(),
        })
    }

    #[must_use]
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Directory entry geometry implied by the magic. May be overridden by
    /// probing the root directory (see [`crate::dir::probe_dirsize`]).
    #[must_use]
    pub fn default_dirfmt(&self) -> DirFmt {
        DirFmt::for_namelen(self.namelen)
    }

    /// Total zone count: `s_zones` on v2, `s_nzones` on v1.
    #[must_use]
    pub fn zone_count(&self) -> u32 {
        match self.variant {
            Variant::V1 => u32::from(self.nzones),
            Variant::V2 => self.zones_v2,
        }
    }

    #[must_use]
    pub fn first_zone(&self) -> u32 {
        u32::from(self.first_data_zone)
    }

    /// Blocks occupied by the inode table.
    #[must_use]
    pub fn inode_blocks(&self) -> u32 {
        u32::from(self.ninodes).div_ceil(self.variant.inodes_per_block())
    }

    /// Where the first data zone should be, given the on-disk layout:
    /// boot block, superblock, both bitmaps, inode table.
    #[must_use]
    pub fn norm_first_zone(&self) -> u32 {
        2 + u32::from(self.imap_blocks) + u32::from(self.zmap_blocks) + self.inode_blocks()
    }

    /// First block of the inode bitmap.
    #[must_use]
    pub fn imap_start(&self) -> u32 {
        2
    }

    /// First block of the zone bitmap.
    #[must_use]
    pub fn zmap_start(&self) -> u32 {
        2 + u32::from(self.imap_blocks)
    }

    /// First block of the inode table.
    #[must_use]
    pub fn inode_table_start(&self) -> u32 {
        2 + u32::from(self.imap_blocks) + u32::from(self.zmap_blocks)
    }

    /// Structural sanity: zone size and bitmap coverage. Violations are fatal
    /// for the whole run.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.log_zone_size != 0 {
            return Err(ParseError::InvalidField {
                field: "s_log_zone_size",
                reason: "only 1k blocks/zones supported",
            });
        }
        let imap_bits = u32::from(self.imap_blocks) * BITS_PER_BLOCK;
        if imap_bits < u32::from(self.ninodes) + 1 {
            return Err(ParseError::InvalidField {
                field: "s_imap_blocks",
                reason: "inode bitmap cannot cover all inodes",
            });
        }
        let zmap_bits = u32::from(self.zmap_blocks) * BITS_PER_BLOCK;
        if zmap_bits < self.zone_count().saturating_sub(self.first_zone()) + 1 {
            return Err(ParseError::InvalidField {
                field: "s_zmap_blocks",
                reason: "zone bitmap cannot cover all data zones",
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn state_valid(&self) -> bool {
        self.state & STATE_VALID_FS != 0
    }

    #[must_use]
    pub fn state_error(&self) -> bool {
        self.state & STATE_ERROR_FS != 0
    }

    /// Record the outcome of a check: VALID is always set once a full pass
    /// has run; ERROR reflects whether anything was left uncorrected.
    pub fn set_state(&mut self, errors_uncorrected: bool) {
        self.state |= STATE_VALID_FS;
        if errors_uncorrected {
            self.state |= STATE_ERROR_FS;
        } else {
            self.state &= !STATE_ERROR_FS;
        }
        write_le_u16(&mut self.raw, OFF_STATE, self.state);
    }

    /// The block image to write back, with any `set_state` patch applied.
    #[must_use]
    pub fn encoded(&self) -> &[u8] {
        &self.raw
    }
}
