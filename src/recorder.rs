//! The capture loop: read, undistort, write, show, check for stop.
//!
//! One thread drives everything. Collaborators come from a
//! [`DeviceFactory`] and are owned by a [`Session`] that releases each of
//! them exactly once, whichever way the run ends.

use std::fmt;
use std::thread;
use std::time::Duration;

use crate::calibration::{self, CalibrationData};
use crate::camera::{CameraError, Frame, FrameSource, Resolution};
use crate::config::{EndOfStreamPolicy, RecorderConfig};
use crate::devices::DeviceFactory;
use crate::display::{DisplayError, FrameDisplay};
use crate::error::RecorderError;
use crate::hotkeys::{StopRequest, StopSignal};
use crate::sink::{FrameSink, SinkError, SinkSpec};

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Running,
    Terminating,
    Closed,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Initializing => "initializing",
            LoopState::Running => "running",
            LoopState::Terminating => "terminating",
            LoopState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Why a successful run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Quit key or Ctrl+C
    UserRequested(StopRequest),
    /// The preview window was closed
    PreviewClosed,
    /// The camera stream ended on its own
    EndOfStream,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::UserRequested(StopRequest::QuitKey) => write!(f, "quit key pressed"),
            StopReason::UserRequested(StopRequest::Interrupt) => write!(f, "interrupted"),
            StopReason::PreviewClosed => write!(f, "preview window closed"),
            StopReason::EndOfStream => write!(f, "camera stream ended"),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_written: u64,
    pub stop_reason: StopReason,
    pub resolution: Resolution,
}

/// Collaborators of one run. Each is released at most once.
#[derive(Default)]
pub struct Session {
    camera: Option<Box<dyn FrameSource>>,
    sink: Option<Box<dyn FrameSink>>,
    display: Option<Box<dyn FrameDisplay>>,
}

impl Session {
    /// Release camera, sink and display, in that order.
    ///
    /// Failing to close the sink is returned since the video may be
    /// incomplete; the other failures are only logged.
    pub fn release(&mut self) -> Result<(), RecorderError> {
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.release() {
                log::error!("Error releasing camera: {}", e);
            }
        }
        let mut result = Ok(());
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.release() {
                log::error!("Error closing video output: {}", e);
                result = Err(RecorderError::FrameWrite(e));
            }
        }
        if let Some(mut display) = self.display.take() {
            if let Err(e) = display.release() {
                log::warn!("Error closing preview window: {}", e);
            }
        }
        result
    }
}

/// Close the preview after a failure, keeping the recording alive.
fn drop_display(display: &mut Option<Box<dyn FrameDisplay>>) {
    if let Some(mut display) = display.take() {
        if let Err(e) = display.release() {
            log::debug!("Error closing preview window: {}", e);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("{}", e);
        }
    }
}

/// Orchestrates one recording from calibration to saved video.
pub struct CaptureLoop {
    config: RecorderConfig,
    state: LoopState,
}

impl CaptureLoop {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            state: LoopState::Closed,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    fn transition(&mut self, next: LoopState) {
        log::debug!("Capture loop {} -> {}", self.state, next);
        self.state = next;
    }

    /// Record until stopped.
    ///
    /// Loads calibration, opens the camera, grabs a first frame, opens the
    /// output sized to that frame and (optionally) the preview, then loops.
    /// Every opened collaborator is released before this returns, on success
    /// and on every error path.
    pub fn run(
        &mut self,
        devices: &mut dyn DeviceFactory,
        stop: &mut dyn StopSignal,
    ) -> Result<RunSummary, RecorderError> {
        self.transition(LoopState::Initializing);
        let mut session = Session::default();

        let result = self.record(&mut session, devices, stop);

        self.transition(LoopState::Terminating);
        stop.disarm();
        let released = session.release();
        self.transition(LoopState::Closed);

        let summary = match (result, released) {
            (Err(e), _) => return Err(e),
            (Ok(_), Err(e)) => return Err(e),
            (Ok(summary), Ok(())) => summary,
        };

        log::info!(
            "Recording stopped ({}): {} frames written to {}",
            summary.stop_reason,
            summary.frames_written,
            self.config.output.path.display()
        );

        if summary.stop_reason == StopReason::EndOfStream
            && self.config.recording.end_of_stream == EndOfStreamPolicy::Failure
        {
            return Err(RecorderError::StreamEnded {
                frames_written: summary.frames_written,
            });
        }
        Ok(summary)
    }

    fn load_calibration(&self) -> Result<CalibrationData, RecorderError> {
        let path = &self.config.calibration_path;
        calibration::load(path).map_err(|source| RecorderError::CalibrationOpen {
            path: path.clone(),
            source,
        })
    }

    fn record(
        &mut self,
        session: &mut Session,
        devices: &mut dyn DeviceFactory,
        stop: &mut dyn StopSignal,
    ) -> Result<RunSummary, RecorderError> {
        let calibration = self.load_calibration()?;

        let camera = session.camera.insert(
            devices
                .open_camera(&self.config.camera)
                .map_err(RecorderError::CameraOpen)?,
        );

        let mut frame = match camera.read_frame() {
            Ok(Some(frame)) if !frame.is_empty() => frame,
            Ok(Some(_)) => {
                return Err(RecorderError::EmptyFrame {
                    detail: "first frame has no pixels".to_string(),
                })
            }
            Ok(None) => {
                return Err(RecorderError::EmptyFrame {
                    detail: "stream ended before the first frame".to_string(),
                })
            }
            Err(e @ CameraError::StreamFailed(_)) => return Err(RecorderError::CameraOpen(e)),
            Err(e) => {
                return Err(RecorderError::EmptyFrame {
                    detail: e.to_string(),
                })
            }
        };
        let resolution = frame.resolution();
        log::info!("First frame {}", resolution);

        let map = calibration.undistort_map(resolution, self.config.alpha)?;

        let output = &self.config.output;
        let spec = SinkSpec::new(output.path.clone(), output.codec, output.fps, resolution);
        let sink = session.sink.insert(devices.open_sink(spec).map_err(|source| {
            RecorderError::SinkOpen {
                path: output.path.clone(),
                source,
            }
        })?);

        if self.config.display.enabled {
            match devices.open_display(&self.config.display, resolution, self.config.camera.fps) {
                Ok(display) => session.display = Some(display),
                Err(e) => log::warn!("{}; recording without preview", e),
            }
        }

        if let Err(e) = stop.arm() {
            log::warn!("Quit key unavailable ({}); press Ctrl+C to stop", e);
        }

        self.transition(LoopState::Running);

        let output_path = self.config.output.path.clone();
        let key_poll = self.config.recording.key_poll;
        let throttle = self.config.recording.throttle;
        let mut corrected = Frame::black(resolution);
        let mut frames_written = 0u64;

        let stop_reason = loop {
            if frame.resolution() != resolution {
                return Err(RecorderError::FrameSize {
                    expected: resolution,
                    actual: frame.resolution(),
                });
            }
            if frame.data.len() != resolution.frame_len() {
                return Err(RecorderError::FrameRead(CameraError::TruncatedFrame {
                    expected: resolution.frame_len(),
                    got: frame.data.len(),
                }));
            }
            map.remap(&frame, &mut corrected)?;
            sink.write(&corrected).map_err(|e| match e {
                // Encoder died before taking a frame
                SinkError::Pipeline(_) => RecorderError::SinkOpen {
                    path: output_path.clone(),
                    source: e,
                },
                e => RecorderError::FrameWrite(e),
            })?;
            frames_written += 1;

            match session.display.as_mut().map(|d| d.show(&corrected)) {
                None | Some(Ok(())) => {}
                Some(Err(DisplayError::Closed)) => break StopReason::PreviewClosed,
                Some(Err(e)) => {
                    log::warn!("{}; continuing without preview", e);
                    drop_display(&mut session.display);
                }
            }

            if let Some(request) = stop.poll(key_poll) {
                break StopReason::UserRequested(request);
            }
            if let Some(pause) = throttle {
                thread::sleep(pause);
            }

            frame = match camera.read_frame() {
                Ok(Some(next)) => next,
                // A stop requested while the read blocked wins over end of stream
                Ok(None) => match stop.poll(Duration::ZERO) {
                    Some(request) => break StopReason::UserRequested(request),
                    None => break StopReason::EndOfStream,
                },
                Err(e) => return Err(RecorderError::FrameRead(e)),
            };
        };

        Ok(RunSummary {
            frames_written,
            stop_reason,
            resolution,
        })
    }
}
