//! Usage summary printed after the check (and serializable for `--json`).

use crate::session::CheckSession;
use serde::Serialize;
use std::fmt;

/// Post-check usage report.
///
/// `links` and `files` discount the `.` and `..` entries every directory
/// contributes (`2 * directories - 1`), matching what an operator thinks of
/// as "files on the disk".
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub inodes_used: u32,
    pub inodes_total: u32,
    pub inode_percent: u32,
    pub zones_used: u32,
    pub zones_total: u32,
    pub zone_percent: u32,
    pub regular: u32,
    pub directories: u32,
    pub chardevs: u32,
    pub blockdevs: u32,
    pub links: i64,
    pub symlinks: u32,
    pub files: i64,
}

impl CheckSession<'_> {
    #[must_use]
    pub fn summary(&self) -> UsageSummary {
        let ninodes = self.ninodes();
        let mut inodes_free = 0_u32;
        for ino in 1..=ninodes {
            if !self.inode_in_use(ino) {
                inodes_free += 1;
            }
        }
        let inodes_used = ninodes - inodes_free;

        let zones = self.zones();
        let mut zones_free = 0_u32;
        for zone in self.first_zone()..zones {
            if !self.zone_in_use(zone) {
                zones_free += 1;
            }
        }
        let zones_used = zones - zones_free;

        let dir_dots = 2 * i64::from(self.tally.directory) - 1;
        UsageSummary {
            inodes_used,
            inodes_total: ninodes,
            inode_percent: percent(inodes_used, ninodes),
            zones_used,
            zones_total: zones,
            zone_percent: percent(zones_used, zones),
            regular: self.tally.regular,
            directories: self.tally.directory,
            chardevs: self.tally.chardev,
            blockdevs: self.tally.blockdev,
            links: i64::from(self.tally.links) - dir_dots,
            symlinks: self.tally.symlinks,
            files: i64::from(self.tally.total) - dir_dots,
        }
    }
}

fn percent(used: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    ((u64::from(used) * 100) / u64::from(total)) as u32
}

impl fmt::Display for UsageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(
            f,
            "{:6} inodes used ({:2}%) {:6} total",
            self.inodes_used, self.inode_percent, self.inodes_total
        )?;
        writeln!(
            f,
            "{:6}  zones used ({:2}%) {:6} total",
            self.zones_used, self.zone_percent, self.zones_total
        )?;
        writeln!(f)?;
        writeln!(f, "{:6} regular files", self.regular)?;
        writeln!(f, "{:6} directories", self.directories)?;
        writeln!(f, "{:6} character device files", self.chardevs)?;
        writeln!(f, "{:6} block device files", self.blockdevs)?;
        writeln!(f, "{:6} links", self.links)?;
        writeln!(f, "{:6} symbolic links", self.symlinks)?;
        writeln!(f, "------")?;
        writeln!(f, "{:6} files", self.files)
    }
}
