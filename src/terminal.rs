//! Raw terminal mode with panic-safe cleanup.
//!
//! Raw mode lets the recorder see single key presses (`q`, Escape) without
//! waiting for Enter. Output post-processing is turned back on afterwards so
//! log lines written while recording still start at column zero.

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, IsTerminal};
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};

/// Static flag to track if raw mode is active (for panic handler)
pub(crate) static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Guard that ensures terminal is restored to normal mode on drop.
/// This handles both normal exits and panics.
pub struct RawModeGuard {
    /// Whether this guard is responsible for cleanup
    active: bool,
}

impl RawModeGuard {
    /// Enter raw mode and return a guard that will restore it on drop.
    ///
    /// # Errors
    /// Returns an error if stdin is not a terminal or enabling raw mode fails
    pub fn enter() -> io::Result<Self> {
        if !io::stdin().is_terminal() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stdin is not a terminal",
            ));
        }

        install_panic_hook();

        enable_raw_mode()?;
        RAW_MODE_ACTIVE.store(true, Ordering::SeqCst);
        restore_output_processing();

        Ok(Self { active: true })
    }

    /// Manually exit raw mode without dropping the guard.
    /// After calling this, the guard's drop will be a no-op.
    pub fn exit(&mut self) -> io::Result<()> {
        if self.active {
            self.active = false;
            RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
            disable_raw_mode()?;
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
            let _ = disable_raw_mode();
        }
    }
}

/// Re-enable `OPOST | ONLCR` so `\n` still returns the carriage.
#[cfg(unix)]
fn restore_output_processing() {
    // SAFETY: termios is plain data; fd 0 is checked to be a terminal by the caller.
    unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(libc::STDIN_FILENO, &mut termios) != 0 {
            return;
        }
        termios.c_oflag |= libc::OPOST | libc::ONLCR;
        if libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &termios) != 0 {
            log::debug!("Could not restore terminal output processing");
        }
    }
}

#[cfg(not(unix))]
fn restore_output_processing() {}

/// Install a panic hook that restores terminal state before panicking.
pub(crate) fn install_panic_hook() {
    static HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

    if HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    let original_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        if RAW_MODE_ACTIVE.load(Ordering::SeqCst) {
            let _ = disable_raw_mode();
            RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
        }
        original_hook(panic_info);
    }));
}
