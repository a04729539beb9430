//! Stop requests: the quit key and Ctrl+C.
//!
//! The capture loop polls a [`StopSignal`] once per frame with a short,
//! bounded wait. [`KeyboardStop`] reads single key presses from the terminal
//! in raw mode and also honours the process-wide Ctrl+C flag.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::terminal::RawModeGuard;

/// Why the operator wants to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    /// `q`, `Q` or Escape
    QuitKey,
    /// Ctrl+C, either as a key press in raw mode or as SIGINT
    Interrupt,
}

/// Source of stop requests polled by the capture loop.
pub trait StopSignal {
    /// Prepare to receive input. Called once before the first frame.
    fn arm(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Wait at most `wait` for a stop request.
    fn poll(&mut self, wait: Duration) -> Option<StopRequest>;

    /// Give input back. Called once during teardown.
    fn disarm(&mut self) {}
}

static CTRLC_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Check if Ctrl+C has been received.
pub fn ctrlc_received() -> bool {
    CTRLC_RECEIVED.load(Ordering::SeqCst)
}

/// Set up the Ctrl+C handler.
///
/// This should be called once at program startup.
pub fn setup_ctrlc_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        CTRLC_RECEIVED.store(true, Ordering::SeqCst);
        eprintln!("\nReceived Ctrl+C, stopping recording...");
    })
}

/// Map a key press to a stop request.
pub fn classify_key(key: &KeyEvent) -> Option<StopRequest> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match key.code {
        KeyCode::Char('c') | KeyCode::Char('C')
            if key.modifiers.contains(KeyModifiers::CONTROL) =>
        {
            Some(StopRequest::Interrupt)
        }
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(StopRequest::QuitKey),
        _ => None,
    }
}

/// Quit key from the terminal plus Ctrl+C.
///
/// Without a terminal (stdin redirected, running under a service manager)
/// only Ctrl+C stops the recording and `poll` simply sleeps for `wait`.
#[derive(Default)]
pub struct KeyboardStop {
    guard: Option<RawModeGuard>,
}

impl KeyboardStop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether key presses are being read.
    pub fn is_interactive(&self) -> bool {
        self.guard.as_ref().is_some_and(RawModeGuard::is_active)
    }

    fn read_keys(&mut self, wait: Duration) -> io::Result<Option<StopRequest>> {
        let mut timeout = wait;
        while event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if let Some(request) = classify_key(&key) {
                    return Ok(Some(request));
                }
            }
            // Drain anything else already queued without waiting again
            timeout = Duration::ZERO;
        }
        Ok(None)
    }
}

impl StopSignal for KeyboardStop {
    fn arm(&mut self) -> io::Result<()> {
        if self.guard.is_none() {
            self.guard = Some(RawModeGuard::enter()?);
            log::info!("Press 'q' or Esc to stop recording");
        }
        Ok(())
    }

    fn poll(&mut self, wait: Duration) -> Option<StopRequest> {
        if ctrlc_received() {
            return Some(StopRequest::Interrupt);
        }
        if !self.is_interactive() {
            thread::sleep(wait);
            return ctrlc_received().then_some(StopRequest::Interrupt);
        }
        match self.read_keys(wait) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Keyboard input failed, only Ctrl+C will stop: {}", e);
                self.disarm();
                None
            }
        }
    }

    fn disarm(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            if let Err(e) = guard.exit() {
                log::warn!("Failed to restore terminal: {}", e);
            }
        }
    }
}

impl Drop for KeyboardStop {
    fn drop(&mut self) {
        self.disarm();
    }
}
