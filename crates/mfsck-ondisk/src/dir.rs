use mfsck_types::{BLOCK_SIZE, ParseError, ensure_slice, read_le_u16, write_le_u16};
use serde::{Deserialize, Serialize};

/// Directory entry geometry: the name-field width and the packed entry size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirFmt {
    pub namelen: usize,
    pub dirsize: usize,
}

impl DirFmt {
    #[must_use]
    pub fn for_namelen(namelen: usize) -> Self {
        Self {
            namelen,
            dirsize: namelen + 2,
        }
    }
}

/// One packed directory entry: a 16-bit inode number followed by a
/// NUL-padded (not necessarily NUL-terminated) name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u16,
    raw_name: Vec<u8>,
}

impl DirEntry {
    /// Decode the entry at `offset` within a directory data block. Entries
    /// never straddle a block, so the whole entry must fit.
    pub fn parse(block: &[u8], offset: usize, fmt: DirFmt) -> Result<Self, ParseError> {
        let ino = read_le_u16(block, offset)?;
        let raw_name = ensure_slice(block, offset + 2, fmt.namelen)?.to_vec();
        Ok(Self { ino, raw_name })
    }

    /// Name bytes up to the first NUL.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        let end = self
            .raw_name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.raw_name.len());
        &self.raw_name[..end]
    }

    #[must_use]
    pub fn name_display(&self) -> String {
        String::from_utf8_lossy(self.name()).into_owned()
    }

    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.name() == b"."
    }

    #[must_use]
    pub fn is_dotdot(&self) -> bool {
        self.name() == b".."
    }
}

/// Zero an entry's inode number in place (the repair for a bad entry).
pub fn clear_entry_ino(block: &mut [u8], offset: usize) {
    write_le_u16(block, offset, 0);
}

/// Probe the root directory's first data block for the actual entry size.
///
/// Scans for the string `".."` at entry offsets 16, 32, 64, … (the name field
/// starts 2 bytes into the entry); the first hit wins. Returns `None` when no
/// offset matches, in which case the caller keeps the geometry implied by the
/// superblock magic.
#[must_use]
pub fn probe_dirsize(root_block: &[u8]) -> Option<DirFmt> {
    let mut size = 16;
    while size < BLOCK_SIZE {
        if root_block.len() >= size + 5
            && root_block[size + 2] == b'.'
            && root_block[size + 3] == b'.'
            && root_block[size + 4] == 0
        {
            return Some(DirFmt {
                namelen: size - 2,
                dirsize: size,
            });
        }
        size <<= 1;
    }
    None
}
