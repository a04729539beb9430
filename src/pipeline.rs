//! Child process management for the external media programs.
//!
//! Camera capture (`gst-launch-1.0`, `ffmpeg`), encoding (`ffmpeg`) and the
//! preview window (`mpv`) all run as child processes exchanging raw video
//! over pipes. This module handles spawning, monitoring, and terminating them.

use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long a child gets to exit on its own before it is killed.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that can occur during pipeline operations
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Executable not found on PATH
    #[error("{program} not found. Please install it and make sure it is on PATH")]
    NotFound { program: String },
    /// Failed to spawn the process
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// Process exited with non-zero status
    #[error("{program} exited with code {exit_code:?}\n{stderr}")]
    ProcessFailed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    /// I/O error during pipeline operation
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which end of the child the caller talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeMode {
    /// Caller reads raw frames from the child's stdout
    ReadStdout,
    /// Caller writes raw frames into the child's stdin
    WriteStdin,
}

/// Represents a running media process
pub struct Pipeline {
    /// Program name, used in logs and errors
    program: String,
    /// The child process
    child: Child,
    /// Handle for the stderr reader thread
    stderr_thread: Option<JoinHandle<Vec<String>>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("program", &self.program)
            .field("pid", &self.child.id())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Spawn `program` with the given arguments.
    ///
    /// # Arguments
    /// * `program` - Executable name, resolved through PATH
    /// * `args` - Command-line arguments
    /// * `mode` - Which standard stream is piped to the caller
    ///
    /// # Returns
    /// A running `Pipeline` or an error
    pub fn spawn<S: AsRef<str>>(
        program: &str,
        args: &[S],
        mode: PipeMode,
    ) -> Result<Self, PipelineError> {
        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(|a| AsRef::<str>::as_ref(a)));
        match mode {
            PipeMode::ReadStdout => cmd.stdin(Stdio::null()).stdout(Stdio::piped()),
            PipeMode::WriteStdin => cmd.stdin(Stdio::piped()).stdout(Stdio::null()),
        };
        cmd.stderr(Stdio::piped());

        // Own process group: a terminal Ctrl+C reaches only the recorder,
        // which stops its children itself so the output gets finalized
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        log::debug!("Spawning {} {}", program, join_args(args));

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::NotFound {
                    program: program.to_string(),
                }
            } else {
                PipelineError::SpawnFailed {
                    program: program.to_string(),
                    source: e,
                }
            }
        })?;

        // Drain stderr so the child never blocks on a full pipe
        let stderr = child.stderr.take();
        let tag = program.to_string();
        let stderr_thread = stderr.map(|stderr| {
            thread::spawn(move || {
                let reader = BufReader::new(stderr);
                let mut lines = Vec::new();
                for line in reader.lines() {
                    match line {
                        Ok(l) => {
                            log::debug!("[{}] {}", tag, l);
                            lines.push(l);
                        }
                        Err(_) => break,
                    }
                }
                lines
            })
        });

        Ok(Pipeline {
            program: program.to_string(),
            child,
            stderr_thread,
        })
    }

    /// Take the stdout pipe (only present in [`PipeMode::ReadStdout`]).
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stdin pipe (only present in [`PipeMode::WriteStdin`]).
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Exit status if the process has already exited.
    pub fn try_exit_status(&mut self) -> Result<Option<ExitStatus>, PipelineError> {
        Ok(self.child.try_wait()?)
    }

    /// Wait for the process to complete and return the exit status.
    pub fn wait(&mut self) -> Result<ExitStatus, PipelineError> {
        Ok(self.child.wait()?)
    }

    /// Wait up to `timeout` for the process to exit on its own, then fall back
    /// to [`Pipeline::shutdown`].
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<ExitStatus, PipelineError> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            if start.elapsed() > timeout {
                log::warn!("{} did not exit within {:?}, interrupting", self.program, timeout);
                return self.shutdown();
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    /// Request a graceful shutdown of the process.
    ///
    /// This sends SIGINT to the child and waits for it to terminate.
    /// If it doesn't exit within [`SHUTDOWN_TIMEOUT`], it is killed.
    pub fn shutdown(&mut self) -> Result<ExitStatus, PipelineError> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }

        #[cfg(unix)]
        {
            // SAFETY: plain signal delivery to our own child's pid.
            unsafe {
                let pid = self.child.id() as i32;
                libc::kill(pid, libc::SIGINT);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }

        let start = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start.elapsed() > SHUTDOWN_TIMEOUT {
                        let _ = self.child.kill();
                        return Ok(self.child.wait()?);
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(PipelineError::Io(e)),
            }
        }
    }

    /// Get the collected stderr output after the process has finished.
    pub fn take_stderr_output(&mut self) -> Vec<String> {
        self.stderr_thread
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    }

    /// Turn a finished process into an error if it failed.
    pub fn check_status(&mut self, status: ExitStatus) -> Result<(), PipelineError> {
        if status.success() {
            return Ok(());
        }
        Err(PipelineError::ProcessFailed {
            program: self.program.clone(),
            exit_code: status.code(),
            stderr: self.take_stderr_output().join("\n"),
        })
    }

    /// Get the process ID of the child.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Ensure the process is terminated when Pipeline is dropped
        if self.is_running() {
            let _ = self.shutdown();
        }
    }
}

/// Render an argument list for logs.
pub fn join_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| {
            let a = AsRef::<str>::as_ref(a);
            if a.contains(' ') || a.contains('(') {
                format!("'{}'", a)
            } else {
                a.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
