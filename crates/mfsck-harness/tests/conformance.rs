#![forbid(unsafe_code)]
//! Conformance suite: end-to-end checks over built fixture images.
//!
//! Each test constructs a filesystem with one deliberate defect (or none),
//! runs a full check session against it, and asserts the outcome flags,
//! the on-image repairs, and that untouched images stay untouched.

use mfsck_block::MemByteDevice;
use mfsck_check::{CheckOptions, CheckSession, DefaultsPrompter, RepairMode, read_superblock};
use mfsck_harness::ImageBuilder;
use mfsck_ondisk::{Inode, Superblock, Variant};
use mfsck_types::{BLOCK_SIZE, ROOT_INO, STATE_ERROR_FS, STATE_VALID_FS};

fn session<'d>(
    dev: &'d MemByteDevice,
    mode: RepairMode,
    opts: CheckOptions,
) -> CheckSession<'d> {
    let sb = read_superblock(dev).expect("superblock");
    CheckSession::load(dev, sb, mode, Box::new(DefaultsPrompter), opts).expect("load tables")
}

/// Run a full check and flush the way the driver would. Returns
/// `(changed, errors_uncorrected)`.
fn run(dev: &MemByteDevice, mode: RepairMode) -> (bool, bool) {
    run_with(dev, mode, CheckOptions::default())
}

fn run_with(dev: &MemByteDevice, mode: RepairMode, opts: CheckOptions) -> (bool, bool) {
    let mut s = session(dev, mode, opts);
    s.check().expect("check");
    let outcome = (s.changed(), s.errors_uncorrected());
    if s.changed() {
        s.flush_tables().expect("flush tables");
    } else if mode.repairs() {
        s.flush_super().expect("flush super-block");
    }
    outcome
}

fn parse_sb(image: &[u8]) -> Superblock {
    Superblock::parse(&image[BLOCK_SIZE..2 * BLOCK_SIZE]).expect("superblock")
}

fn inode_from(image: &[u8], ino: u32) -> Inode {
    let sb = parse_sb(image);
    let size = sb.variant().inode_size();
    let offset = sb.inode_table_start() as usize * BLOCK_SIZE + (ino as usize - 1) * size;
    Inode::parse(sb.variant(), &image[offset..offset + size]).expect("inode bytes")
}

fn zone_allocated(image: &[u8], zone: u32) -> bool {
    let sb = parse_sb(image);
    let bit = zone - sb.first_zone() + 1;
    let byte = sb.zmap_start() as usize * BLOCK_SIZE + (bit / 8) as usize;
    (image[byte] >> (bit % 8)) & 1 == 1
}

fn inode_allocated(image: &[u8], ino: u32) -> bool {
    let sb = parse_sb(image);
    let byte = sb.imap_start() as usize * BLOCK_SIZE + (ino / 8) as usize;
    (image[byte] >> (ino % 8)) & 1 == 1
}

// ── S1 / P1: a pristine image is a no-op ────────────────────────────────────

#[test]
fn clean_v1_image_is_a_noop() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    builder.add_file(ROOT_INO, b"hello", 1);
    let dev = builder.device();
    let before = dev.snapshot();

    let mut s = session(&dev, RepairMode::ReadOnly, CheckOptions::default());
    s.check().expect("check");
    assert!(!s.changed());
    assert!(!s.errors_uncorrected());

    let summary = s.summary();
    assert_eq!(summary.regular, 1);
    assert_eq!(summary.directories, 1);
    assert_eq!(summary.files, 2, "root + one file, dot entries discounted");
    drop(s);

    assert_eq!(dev.snapshot(), before, "read-only run must not write");
}

#[test]
fn clean_v1_namelen30_image_probes_its_dirsize() {
    let mut builder = ImageBuilder::new(Variant::V1, 64, 400, 30);
    builder.add_dir(ROOT_INO, b"a-rather-long-directory-name");
    let dev = builder.device();
    let (changed, uncorrected) = run(&dev, RepairMode::ReadOnly);
    assert!(!changed);
    assert!(!uncorrected, "32-byte entries must decode cleanly");
}

// ── S2 / P2: out-of-range indirect pointer is zeroed, then stays clean ──────

#[test]
fn out_of_range_indirect_slot_is_removed() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    let file = builder.add_file(ROOT_INO, b"data", 1);
    builder.set_inode_zone(file, 7, 59_999); // out of range for 360 zones
    let dev = builder.device();

    let (changed, uncorrected) = run(&dev, RepairMode::Automatic);
    assert!(changed);
    assert!(!uncorrected);

    let after = dev.snapshot();
    assert_eq!(inode_from(&after, file).zones[7], 0, "slot zeroed");
    let sb = parse_sb(&after);
    assert_eq!(sb.state & (STATE_VALID_FS | STATE_ERROR_FS), STATE_VALID_FS);

    // P2: a second run over the repaired image reports nothing.
    assert_eq!(run(&dev, RepairMode::Automatic), (false, false));
}

#[test]
fn out_of_range_slot_on_v2_is_removed() {
    let mut builder = ImageBuilder::new(Variant::V2, 64, 2000, 14);
    let file = builder.add_file(ROOT_INO, b"data", 1);
    builder.set_inode_zone(file, 7, 99_999);
    let dev = builder.device();

    let (changed, uncorrected) = run(&dev, RepairMode::Automatic);
    assert!(changed);
    assert!(!uncorrected);
    assert_eq!(inode_from(&dev.snapshot(), file).zones[7], 0);
}

#[test]
fn below_first_zone_direct_slot_is_removed() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    let file = builder.add_file(ROOT_INO, b"data", 1);
    builder.set_inode_zone(file, 1, 3); // inside the metadata region
    let dev = builder.device();

    let (changed, uncorrected) = run(&dev, RepairMode::Automatic);
    assert!(changed);
    assert!(!uncorrected);
    assert_eq!(inode_from(&dev.snapshot(), file).zones[1], 0);
}

// ── S3 / P4: double-allocated zone ──────────────────────────────────────────

#[test]
fn doubly_claimed_zone_keeps_first_owner() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    let first = builder.add_file(ROOT_INO, b"first", 1);
    let shared = builder.read_inode(first).zones[0];

    let second = builder.add_file(ROOT_INO, b"second", 0);
    builder.set_inode_zone(second, 0, shared);
    let mut inode = builder.read_inode(second);
    inode.size = BLOCK_SIZE as u32;
    builder.write_inode(second, &inode);
    let dev = builder.device();

    let (changed, uncorrected) = run(&dev, RepairMode::Automatic);
    assert!(changed);
    assert!(!uncorrected);

    let after = dev.snapshot();
    assert_eq!(
        inode_from(&after, second).zones[0],
        0,
        "second claimant loses the zone"
    );
    assert_eq!(inode_from(&after, first).zones[0], shared);
    assert!(zone_allocated(&after, shared), "zone stays allocated");

    assert_eq!(run(&dev, RepairMode::Automatic), (false, false));
}

// ── S4 / P6: missing `..` is reported, image untouched read-only ────────────

#[test]
fn missing_dotdot_is_uncorrected_and_image_untouched() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    let sub = builder.add_dir(ROOT_INO, b"sub");
    let zone = builder.read_inode(sub).zones[0];
    let dirsize = builder.dirfmt().dirsize;
    builder.write_raw_entry(zone, dirsize, ROOT_INO as u16, b"x");
    let dev = builder.device();
    let before = dev.snapshot();

    let (changed, uncorrected) = run(&dev, RepairMode::ReadOnly);
    assert!(!changed);
    assert!(uncorrected, "'..' isn't second must leave exit code 4");
    assert_eq!(dev.snapshot(), before, "read-only run never writes");
}

// ── S5: link count mismatch ─────────────────────────────────────────────────

#[test]
fn nlinks_mismatch_is_rewritten_to_counted_value() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    let file = builder.add_file(ROOT_INO, b"file", 1);
    builder.add_link(ROOT_INO, file, b"file2");
    builder.set_nlinks(file, 1); // two entries, claims one
    let dev = builder.device();

    let (changed, uncorrected) = run(&dev, RepairMode::Automatic);
    assert!(changed);
    assert!(!uncorrected);
    assert_eq!(inode_from(&dev.snapshot(), file).nlinks, 2);

    assert_eq!(run(&dev, RepairMode::Automatic), (false, false));
}

// ── S6: v2 triple indirect ──────────────────────────────────────────────────

#[test]
fn v2_file_spanning_triple_indirect_checks_clean() {
    let mut builder = ImageBuilder::new(Variant::V2, 64, 2000, 14);
    let file = builder.add_file(ROOT_INO, b"sparse", 2);

    // Map blocks in the single, double, and triple indirect regions; the
    // image stays small because only the touched chain blocks exist.
    let ppb = 256_u32;
    let logicals = [
        7,
        7 + ppb,
        7 + ppb + ppb * ppb,
        7 + ppb + ppb * ppb + 2 * ppb + 3,
    ];
    for logical in logicals {
        let zone = builder.alloc_zone();
        builder.fill_zone(zone, 0xEE);
        builder.map_in(file, logical, zone);
    }
    let last = logicals[logicals.len() - 1];
    let mut inode = builder.read_inode(file);
    inode.size = (last + 1) * BLOCK_SIZE as u32;
    builder.write_inode(file, &inode);
    let dev = builder.device();
    let before = dev.snapshot();

    let (changed, uncorrected) = run(&dev, RepairMode::ReadOnly);
    assert!(!changed, "every chain and data zone accounted exactly once");
    assert!(!uncorrected);
    assert_eq!(dev.snapshot(), before);

    assert_eq!(run(&dev, RepairMode::Automatic), (false, false));
}

// ── P5: no directory is entered twice ───────────────────────────────────────

#[test]
fn hard_linked_directory_is_walked_once() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    let sub = builder.add_dir(ROOT_INO, b"sub");
    builder.add_file(sub, b"inner", 2);
    builder.add_link(ROOT_INO, sub, b"sub2");
    let dev = builder.device();

    // A second walk of `sub` would claim every zone twice and surface
    // double-allocation errors; clean flags prove the recursion guard held.
    let (changed, uncorrected) = run(&dev, RepairMode::ReadOnly);
    assert!(!changed);
    assert!(!uncorrected);
}

// ── Bitmap reconciliation ───────────────────────────────────────────────────

#[test]
fn orphan_inode_bit_is_cleared() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    builder.add_file(ROOT_INO, b"kept", 1);
    let orphan = builder.alloc_inode(0o100_644, 1);
    let dev = builder.device();

    let (changed, uncorrected) = run(&dev, RepairMode::Automatic);
    assert!(changed);
    assert!(!uncorrected);
    assert!(!inode_allocated(&dev.snapshot(), orphan));
}

#[test]
fn referenced_inode_with_clear_bit_is_marked() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    let file = builder.add_file(ROOT_INO, b"file", 1);
    builder.set_imap_bit(file, false);
    let dev = builder.device();

    let (changed, uncorrected) = run(&dev, RepairMode::Automatic);
    assert!(changed);
    assert!(!uncorrected);
    assert!(inode_allocated(&dev.snapshot(), file));

    assert_eq!(run(&dev, RepairMode::Automatic), (false, false));
}

#[test]
fn claimed_zone_with_clear_bit_is_marked_during_walk() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    let file = builder.add_file(ROOT_INO, b"file", 1);
    let zone = builder.read_inode(file).zones[0];
    builder.set_zone_allocated(zone, false);
    let dev = builder.device();

    let (changed, uncorrected) = run(&dev, RepairMode::Automatic);
    assert!(changed);
    assert!(!uncorrected);
    assert!(zone_allocated(&dev.snapshot(), zone));
}

#[test]
fn leaked_zone_bit_is_cleared() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    builder.add_file(ROOT_INO, b"file", 1);
    let leaked = builder.alloc_zone(); // marked allocated, never referenced
    let dev = builder.device();

    let (changed, uncorrected) = run(&dev, RepairMode::Automatic);
    assert!(changed);
    assert!(!uncorrected);
    assert!(!zone_allocated(&dev.snapshot(), leaked));
}

#[test]
fn read_only_leaves_bitmap_desync_as_uncorrected() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    builder.add_file(ROOT_INO, b"file", 1);
    builder.alloc_zone();
    let dev = builder.device();
    let before = dev.snapshot();

    let (changed, uncorrected) = run(&dev, RepairMode::ReadOnly);
    assert!(!changed);
    assert!(uncorrected);
    assert_eq!(dev.snapshot(), before);
}

// ── Stale modes on cleared inodes (-m) ──────────────────────────────────────

#[test]
fn stale_mode_cleared_under_warn_flag() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    let stale = builder.alloc_inode(0o100_644, 1);
    builder.set_imap_bit(stale, false);
    let dev = builder.device();

    let opts = CheckOptions {
        warn_mode: true,
        ..CheckOptions::default()
    };
    let (changed, uncorrected) = run_with(&dev, RepairMode::Automatic, opts);
    assert!(changed);
    assert!(!uncorrected);
    assert_eq!(inode_from(&dev.snapshot(), stale).mode, 0);
}

#[test]
fn stale_mode_ignored_without_warn_flag() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    let stale = builder.alloc_inode(0o100_644, 1);
    builder.set_imap_bit(stale, false);
    let dev = builder.device();

    let (changed, uncorrected) = run(&dev, RepairMode::Automatic);
    assert!(!changed);
    assert!(!uncorrected);
    assert_eq!(inode_from(&dev.snapshot(), stale).mode, 0o100_644);
}

// ── Directory entry repairs ─────────────────────────────────────────────────

#[test]
fn bad_inode_number_in_entry_is_zeroed_in_place() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    builder.add_entry(ROOT_INO, 200, b"junk"); // ninodes is 96
    let dev = builder.device();

    let (changed, uncorrected) = run(&dev, RepairMode::Automatic);
    // The entry is rewritten directly in its directory block; the original
    // tool does not raise the changed flag for this repair.
    assert!(!changed);
    assert!(!uncorrected);

    let after = dev.snapshot();
    let root_zone = inode_from(&after, ROOT_INO).zones[0] as usize;
    let entry_ino = u16::from_le_bytes([
        after[root_zone * BLOCK_SIZE + 32],
        after[root_zone * BLOCK_SIZE + 33],
    ]);
    assert_eq!(entry_ino, 0, "entry inode number zeroed");
}

#[test]
fn bad_inode_number_read_only_is_reported_only() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    builder.add_entry(ROOT_INO, 200, b"junk");
    let dev = builder.device();
    let before = dev.snapshot();

    let (changed, uncorrected) = run(&dev, RepairMode::ReadOnly);
    assert!(!changed);
    assert!(uncorrected);
    assert_eq!(dev.snapshot(), before);
}

// ── Saturating reference counts ─────────────────────────────────────────────

#[test]
fn inode_count_saturates_and_flags_uncorrected() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    let file = builder.add_file(ROOT_INO, b"popular", 0);
    for i in 0..300_u32 {
        let name = format!("l{i}");
        builder.add_link(ROOT_INO, file, name.as_bytes());
    }
    let dev = builder.device();

    let (changed, uncorrected) = run(&dev, RepairMode::ReadOnly);
    assert!(!changed);
    assert!(uncorrected, "count past 255 must not wrap silently");
}

// ── Fatal conditions ────────────────────────────────────────────────────────

#[test]
fn unknown_magic_is_fatal() {
    let builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    let mut image = builder.into_image();
    image[BLOCK_SIZE + 16] = 0xAA;
    image[BLOCK_SIZE + 17] = 0x55;
    let dev = MemByteDevice::new(image);
    assert!(read_superblock(&dev).is_err());
}

#[test]
fn root_inode_must_be_a_directory() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    builder.set_mode(ROOT_INO, 0o100_644);
    let dev = builder.device();

    let mut s = session(&dev, RepairMode::ReadOnly, CheckOptions::default());
    assert!(s.check().is_err());
}

// ── Superblock state write-back ─────────────────────────────────────────────

#[test]
fn declined_repairs_set_the_error_state_bit() {
    let mut builder = ImageBuilder::new(Variant::V1, 96, 360, 14);
    builder.add_file(ROOT_INO, b"file", 1);
    builder.alloc_zone(); // leak that read-only mode cannot fix
    let dev = builder.device();

    // Automatic mode with a default-no question does not exist in this
    // fixture, so emulate the driver: uncorrected outcome, super flushed.
    let mut s = session(&dev, RepairMode::ReadOnly, CheckOptions::default());
    s.check().expect("check");
    assert!(s.errors_uncorrected());
    s.flush_super().expect("flush super");
    drop(s);

    let sb = parse_sb(&dev.snapshot());
    assert!(sb.state_valid());
    assert!(sb.state_error());
}
