#![forbid(unsafe_code)]
//! `mfsck`: file system consistency checker for Minix v1/v2 filesystems.
//!
//! Sequencing: parse flags, refuse mounted devices, open the image, decode
//! the superblock (taking the clean early exit when permitted), load the
//! tables, walk and reconcile, report, and flush whatever changed. Exit
//! codes: 0 clean, +3 changes written, +4 errors uncorrected, 8 fatal,
//! 16 usage error.

mod term;

use anyhow::{Context, Result, bail};
use clap::Parser;
use clap::error::ErrorKind;
use mfsck_block::FileByteDevice;
use mfsck_check::{
    CheckOptions, CheckSession, DefaultsPrompter, Prompter, RepairMode, read_superblock,
};
use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use term::{RawModeGuard, SavedTermios, TerminalPrompter, spawn_signal_restore};

const EXIT_FATAL: i32 = 8;
const EXIT_USAGE: i32 = 16;

#[derive(Parser, Debug)]
#[command(
    name = "mfsck",
    version,
    about = "File system consistency checker for Minix filesystems"
)]
struct Cli {
    /// List every file visited, with inode number, mode, and link count
    #[arg(short = 'l')]
    list: bool,

    /// Automatic repair: accept the default answer to every question
    #[arg(short = 'a', overrides_with = "interactive")]
    automatic: bool,

    /// Interactive repair (requires a terminal on stdin and stdout)
    #[arg(short = 'r', overrides_with = "automatic")]
    interactive: bool,

    /// Verbose summary (accepted for compatibility; on by default)
    #[arg(short = 'v')]
    verbose: bool,

    /// Print super-block information before checking
    #[arg(short = 's')]
    show_super: bool,

    /// Warn about allocated-but-cleared inodes retaining a non-zero mode
    #[arg(short = 'm')]
    warn_mode: bool,

    /// Force the check even if the filesystem is marked valid
    /// (accepted for compatibility; on by default)
    #[arg(short = 'f')]
    force: bool,

    /// Print the summary as JSON instead of the text table
    #[arg(long)]
    json: bool,

    /// Block device or image file to check
    device: PathBuf,
}

fn main() {
    std::process::exit(real_main());
}

fn real_main() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("MFSCK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EXIT_USAGE,
            };
            let _ = err.print();
            return code;
        }
    };

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("mfsck: {err:#}");
            EXIT_FATAL
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    // Both default on in this lineage of the tool; the flags stay accepted.
    let _ = (cli.verbose, cli.force);
    let (verbose, force) = (true, true);

    let repair = cli.automatic || cli.interactive;
    let mode = if cli.interactive {
        RepairMode::Interactive
    } else if cli.automatic {
        RepairMode::Automatic
    } else {
        RepairMode::ReadOnly
    };
    let device_display = cli.device.display().to_string();

    if is_mounted(&cli.device) {
        print!("{device_display} is mounted.\t ");
        let cont = if io::stdin().is_terminal() && io::stdout().is_terminal() {
            confirm_mounted_check(mode)
        } else {
            false
        };
        if !cont {
            println!("check aborted.");
            return Ok(0);
        }
    }

    if mode == RepairMode::Interactive
        && (!io::stdin().is_terminal() || !io::stdout().is_terminal())
    {
        bail!("need terminal for interactive repairs");
    }

    let dev = FileByteDevice::open(&cli.device, repair)
        .with_context(|| format!("unable to open '{device_display}'"))?;

    let sb = read_superblock(&dev)?;

    // Clean filesystems are skipped unless forced.
    if sb.state_valid() && !sb.state_error() && !force {
        if repair {
            println!("{device_display} is clean, no check.");
        }
        return Ok(0);
    } else if force {
        println!("Forcing filesystem check on {device_display}.");
    } else if repair {
        println!("Filesystem on {device_display} is dirty, needs checking.");
    }

    let prompter: Box<dyn Prompter> = if mode == RepairMode::Interactive {
        Box::new(TerminalPrompter)
    } else {
        Box::new(DefaultsPrompter)
    };
    let opts = CheckOptions {
        list: cli.list,
        verbose,
        show_super: cli.show_super,
        warn_mode: cli.warn_mode,
    };
    let mut session = CheckSession::load(&dev, sb, mode, prompter, opts)?;

    // Terminal restoration must survive fatal signals from here on.
    let saved: SavedTermios = Arc::new(Mutex::new(None));
    spawn_signal_restore(saved.clone())?;
    let raw_guard = if mode == RepairMode::Interactive {
        Some(RawModeGuard::enter(saved)?)
    } else {
        None
    };

    session.check()?;

    if verbose {
        let summary = session.summary();
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("serialize summary")?
            );
        } else {
            print!("{summary}");
        }
    }

    if session.changed() {
        session.flush_tables()?;
        println!("----------------------------");
        println!("FILE SYSTEM HAS BEEN CHANGED");
        println!("----------------------------");
    } else if repair {
        session.flush_super()?;
    }

    drop(raw_guard);

    let mut retcode = 0;
    if session.changed() {
        retcode += 3;
    }
    if session.errors_uncorrected() {
        retcode += 4;
    }
    Ok(retcode)
}

/// Best-effort mounted-device detection via the host mount table.
fn is_mounted(device: &Path) -> bool {
    let Ok(mounts) = fs::read_to_string("/proc/mounts") else {
        return false;
    };
    let device = device.to_string_lossy();
    mounts
        .lines()
        .any(|line| line.split_whitespace().next() == Some(device.as_ref()))
}

/// The pre-check "really continue?" question for mounted devices. The
/// terminal is still in canonical mode here, so a line read is fine.
fn confirm_mounted_check(mode: RepairMode) -> bool {
    match mode {
        RepairMode::ReadOnly | RepairMode::Automatic => {
            println!();
            false
        }
        RepairMode::Interactive => {
            print!("Do you really want to continue (n/y)? ");
            let _ = io::stdout().flush();
            let mut line = String::new();
            if io::stdin().lock().read_line(&mut line).is_err() {
                return false;
            }
            matches!(line.trim_start().as_bytes().first(), Some(b'y' | b'Y'))
        }
    }
}
