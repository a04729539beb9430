//! Camera capture over a raw-video pipe.

use std::io::{ErrorKind, Read};
use std::process::ChildStdout;

use super::descriptor::CaptureCommand;
use super::source::FrameSource;
use super::types::{CameraError, CameraSettings, Frame, Resolution};
use crate::pipeline::{PipeMode, Pipeline, SHUTDOWN_TIMEOUT};

/// Log a frame counter every this many frames.
const LOG_INTERVAL: u64 = 150;

/// Camera capture handle.
///
/// Runs the capture command as a child process and reads packed BGR frames of
/// the configured resolution from its stdout. Use `open()` to start it.
pub struct CameraCapture {
    /// Running capture process
    pipeline: Pipeline,
    /// Raw frame stream
    stdout: Option<ChildStdout>,
    /// Size of every frame on the pipe
    resolution: Resolution,
    /// Frames read so far
    frame_count: u64,
    /// Set once `release()` has run
    released: bool,
}

impl std::fmt::Debug for CameraCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraCapture")
            .field("pipeline", &self.pipeline)
            .field("resolution", &self.resolution)
            .field("frame_count", &self.frame_count)
            .finish_non_exhaustive()
    }
}

impl CameraCapture {
    /// Open a camera with the specified settings.
    ///
    /// # Errors
    /// * `CameraError::InvalidResolution` - If the capture size is zero
    /// * `CameraError::OpenFailed` - If the capture program cannot be started
    /// * `CameraError::StreamFailed` - If it exits right away
    pub fn open(settings: &CameraSettings) -> Result<Self, CameraError> {
        if settings.resolution.is_empty() {
            return Err(CameraError::InvalidResolution(settings.resolution));
        }

        let command = CaptureCommand::for_camera(settings);
        log::info!(
            "Opening {} camera @ {} {} fps",
            settings.backend,
            settings.resolution,
            settings.fps
        );
        Self::spawn(&command, settings.resolution)
    }

    /// Run `command` and read frames of `resolution` from its stdout.
    fn spawn(command: &CaptureCommand, resolution: Resolution) -> Result<Self, CameraError> {
        log::debug!("Capture command: {}", command);

        let mut pipeline = Pipeline::spawn(command.program, &command.args, PipeMode::ReadStdout)?;

        if let Some(status) = pipeline.try_exit_status()? {
            pipeline
                .check_status(status)
                .map_err(|e| CameraError::StreamFailed(e.to_string()))?;
        }

        let stdout = pipeline.take_stdout();
        Ok(Self {
            pipeline,
            stdout,
            resolution,
            frame_count: 0,
            released: false,
        })
    }

    /// A stream that ends before its first frame usually means the capture
    /// program failed; its exit status and stderr say why.
    fn check_startup(&mut self) -> Result<(), CameraError> {
        let status = self.pipeline.wait_timeout(SHUTDOWN_TIMEOUT)?;
        self.pipeline
            .check_status(status)
            .map_err(|e| CameraError::StreamFailed(e.to_string()))
    }
}

impl FrameSource for CameraCapture {
    fn read_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut data = vec![0u8; self.resolution.frame_len()];
        let filled = read_full(stdout, &mut data).map_err(CameraError::ReadFailed)?;
        if filled == 0 {
            self.stdout = None;
            if self.frame_count == 0 {
                self.check_startup()?;
            }
            log::info!("Camera stream ended after {} frames", self.frame_count);
            return Ok(None);
        }
        if filled < data.len() {
            return Err(CameraError::TruncatedFrame {
                expected: data.len(),
                got: filled,
            });
        }

        self.frame_count += 1;
        if self.frame_count % LOG_INTERVAL == 0 {
            log::debug!("Frames captured: {}", self.frame_count);
        }

        Ok(Frame::from_bgr(self.resolution.width, self.resolution.height, data))
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn release(&mut self) -> Result<(), CameraError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        log::info!(
            "Closing camera. Total frames captured: {}",
            self.frame_count
        );
        // Closing our end first unblocks a writer stuck on a full pipe
        self.stdout = None;
        self.pipeline
            .shutdown()
            .map_err(CameraError::ReleaseFailed)?;
        Ok(())
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("Error releasing camera: {}", e);
        }
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
///
/// Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::types::CameraBackend;

    #[test]
    fn test_read_full_collects_split_reads() {
        // A reader that hands out one byte at a time
        struct Trickle(Vec<u8>);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.0.is_empty() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.0.remove(0);
                Ok(1)
            }
        }

        let mut reader = Trickle(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 3];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_open_rejects_empty_resolution() {
        let settings = CameraSettings {
            resolution: Resolution::new(0, 0),
            ..CameraSettings::default()
        };
        match CameraCapture::open(&settings) {
            Err(CameraError::InvalidResolution(res)) => assert!(res.is_empty()),
            other => panic!("Expected InvalidResolution, got {:?}", other.map(|_| ())),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_program_failing_at_startup_reports_its_exit() {
        let command = CaptureCommand {
            program: "false",
            args: Vec::new(),
        };
        let mut camera = match CameraCapture::spawn(&command, Resolution::new(4, 4)) {
            Ok(camera) => camera,
            Err(CameraError::StreamFailed(message)) => {
                assert!(message.contains("false"));
                return;
            }
            Err(e) => panic!("Expected StreamFailed, got {}", e),
        };
        match camera.read_frame() {
            Err(CameraError::StreamFailed(message)) => {
                assert!(message.contains("false exited with code Some(1)"));
            }
            other => panic!("Expected StreamFailed, got {:?}", other.map(|_| ())),
        }
        assert!(camera.release().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_program_exiting_cleanly_ends_stream() {
        let command = CaptureCommand {
            program: "true",
            args: Vec::new(),
        };
        let mut camera = CameraCapture::spawn(&command, Resolution::new(4, 4)).unwrap();
        assert!(matches!(camera.read_frame(), Ok(None)));
        assert!(matches!(camera.read_frame(), Ok(None)));
        assert!(camera.release().is_ok());
    }

    #[test]
    fn test_open_missing_device_fails_or_ends_empty() {
        // Either the capture program is missing (open fails) or the device is
        // missing (stream ends without a frame). Both must surface before any
        // frame is produced.
        let settings = CameraSettings {
            backend: CameraBackend::V4l2,
            device: "/dev/undistort-recorder-missing".to_string(),
            resolution: Resolution::new(4, 4),
            ..CameraSettings::default()
        };
        if let Ok(mut camera) = CameraCapture::open(&settings) {
            assert!(!matches!(camera.read_frame(), Ok(Some(_))));
            camera.release().unwrap();
            assert!(camera.release().is_ok());
        }
    }
}
