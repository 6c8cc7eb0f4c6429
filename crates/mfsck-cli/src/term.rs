//! Terminal state management for interactive repairs.
//!
//! Interactive runs put the terminal in raw/no-echo mode so answers are
//! single keystrokes. The original state must come back on every exit path:
//! normal return, fatal error, and fatal signal. The saved termios lives in
//! a shared slot so both the RAII guard and the signal watcher can restore
//! it; whoever gets there first takes it.

use anyhow::{Context, Result, anyhow};
use mfsck_check::Prompter;
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;

pub type SavedTermios = Arc<Mutex<Option<Termios>>>;

fn restore(saved: &SavedTermios) {
    if let Ok(mut slot) = saved.lock() {
        if let Some(original) = slot.take() {
            let _ = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &original);
        }
    }
}

/// Watch for fatal signals; on delivery, restore the terminal and re-raise
/// the signal with its default disposition so the parent sees the real
/// cause of death. In-memory repairs are deliberately not flushed: a
/// half-written pass is not written at all.
pub fn spawn_signal_restore(saved: SavedTermios) -> Result<()> {
    let mut signals =
        Signals::new([SIGINT, SIGQUIT, SIGTERM]).context("unable to install signal handlers")?;
    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            restore(&saved);
            let _ = signal_hook::low_level::emulate_default_handler(signal);
        }
    });
    Ok(())
}

/// RAII raw-mode guard: disables canonical input and echo on entry, restores
/// the saved state on drop.
pub struct RawModeGuard {
    saved: SavedTermios,
}

impl RawModeGuard {
    pub fn enter(saved: SavedTermios) -> Result<Self> {
        let stdin = io::stdin();
        let original = termios::tcgetattr(&stdin).context("tcgetattr on stdin")?;
        let mut raw = original.clone();
        raw.local_flags
            .remove(LocalFlags::ICANON | LocalFlags::ECHO);
        termios::tcsetattr(&stdin, SetArg::TCSANOW, &raw).context("tcsetattr on stdin")?;
        *saved
            .lock()
            .map_err(|_| anyhow!("terminal state lock poisoned"))? = Some(original);
        Ok(Self { saved })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        restore(&self.saved);
    }
}

/// Single-keystroke console prompter for interactive repairs.
///
/// Prints `"<question> (y/n)? "` with the default answer first, reads one
/// character at a time until `Y`, `N`, space, or newline, and echoes the
/// decision (the terminal itself is not echoing). EOF silently takes the
/// default.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&mut self, question: &str, default_yes: bool) -> bool {
        if default_yes {
            print!("{question} (y/n)? ");
        } else {
            print!("{question} (n/y)? ");
        }

        let mut answer = default_yes;
        loop {
            let _ = io::stdout().flush();
            let mut byte = [0_u8; 1];
            match io::stdin().read(&mut byte) {
                Ok(0) | Err(_) => return default_yes,
                Ok(_) => {}
            }
            match byte[0].to_ascii_uppercase() {
                b'Y' => {
                    answer = true;
                    break;
                }
                b'N' => {
                    answer = false;
                    break;
                }
                b' ' | b'\r' | b'\n' => break,
                _ => {}
            }
        }

        if answer {
            println!("y");
        } else {
            println!("n");
        }
        answer
    }
}
