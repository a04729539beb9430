//! Video file output.
//!
//! Corrected frames are piped as raw BGR into an `ffmpeg` child process that
//! encodes them and writes the container. The sink is bound to the size of
//! the first captured frame for its whole lifetime.

use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::ChildStdin;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::camera::{Frame, FrameFormat, Resolution, FFMPEG};
use crate::pipeline::{PipeMode, Pipeline, PipelineError};

/// How long the encoder gets to finalize the container after input ends.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// Video codec, selected by its fourcc tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Codec {
    /// MPEG-4 Part 2 (XVID)
    Xvid,
    /// H.264 (avc1)
    Avc1,
    /// Motion JPEG
    Mjpg,
}

impl Codec {
    /// Four character code as written in the container.
    pub fn fourcc(self) -> &'static str {
        match self {
            Codec::Xvid => "XVID",
            Codec::Avc1 => "avc1",
            Codec::Mjpg => "MJPG",
        }
    }

    /// Parse a fourcc tag, ignoring case.
    pub fn from_fourcc(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "xvid" | "divx" | "mp4v" => Some(Codec::Xvid),
            "avc1" | "h264" | "x264" => Some(Codec::Avc1),
            "mjpg" | "mjpeg" => Some(Codec::Mjpg),
            _ => None,
        }
    }

    /// Container extensions this codec can be stored in.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Codec::Xvid => &["avi", "mkv"],
            Codec::Avc1 => &["mp4", "mov", "mkv"],
            Codec::Mjpg => &["avi", "mkv", "mov"],
        }
    }

    pub fn supports_extension(self, extension: &str) -> bool {
        self.extensions()
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }

    /// Encoder arguments for ffmpeg.
    pub fn ffmpeg_args(self) -> &'static [&'static str] {
        match self {
            Codec::Xvid => &["-c:v", "mpeg4", "-vtag", "xvid", "-q:v", "5"],
            Codec::Avc1 => &[
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-tag:v",
                "avc1",
                "-movflags",
                "+faststart",
            ],
            Codec::Mjpg => &["-c:v", "mjpeg", "-q:v", "3"],
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fourcc())
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Codec::from_fourcc(s.trim())
            .ok_or_else(|| format!("unknown codec '{}' (expected XVID, avc1 or MJPG)", s))
    }
}

impl TryFrom<String> for Codec {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Errors that can occur while writing video.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Codec cannot be stored in the requested container
    #[error("Codec {codec} cannot be written to a '{extension}' file")]
    Unsupported { codec: Codec, extension: String },
    /// Output parameters are unusable
    #[error("Invalid output: {0}")]
    InvalidSpec(String),
    /// Encoder process could not be started
    #[error("Failed to start encoder: {0}")]
    Pipeline(#[from] PipelineError),
    /// Frame does not match the size the sink was opened with
    #[error("Frame size {actual} does not match output size {expected}")]
    SizeMismatch {
        expected: Resolution,
        actual: Resolution,
    },
    /// Writing into the encoder failed
    #[error("Encoder pipe: {0}")]
    Write(#[source] std::io::Error),
    /// Write after release
    #[error("Video output is closed")]
    Closed,
    /// Encoder did not finish cleanly
    #[error("Encoder failed: {0}")]
    EncoderFailed(#[source] PipelineError),
}

/// Everything needed to open a video output.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSpec {
    pub path: PathBuf,
    pub codec: Codec,
    pub fps: f64,
    pub resolution: Resolution,
}

impl SinkSpec {
    pub fn new(path: impl Into<PathBuf>, codec: Codec, fps: f64, resolution: Resolution) -> Self {
        Self {
            path: path.into(),
            codec,
            fps,
            resolution,
        }
    }

    /// Check that the encoder can be initialised with these parameters.
    pub fn validate(&self) -> Result<(), SinkError> {
        if self.resolution.is_empty() {
            return Err(SinkError::InvalidSpec(format!(
                "frame size {} is empty",
                self.resolution
            )));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(SinkError::InvalidSpec(format!(
                "frame rate {} must be positive",
                self.fps
            )));
        }
        let extension = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if !self.codec.supports_extension(extension) {
            return Err(SinkError::Unsupported {
                codec: self.codec,
                extension: extension.to_string(),
            });
        }
        Ok(())
    }

    /// Full ffmpeg argument list: raw BGR on stdin, encoded file out.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-f",
            "rawvideo",
            "-pix_fmt",
            FrameFormat::Bgr.raw_video_name(),
            "-s",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(self.resolution.to_string());
        args.push("-r".to_string());
        args.push(self.fps.to_string());
        args.push("-i".to_string());
        args.push("-".to_string());
        args.extend(self.codec.ffmpeg_args().iter().map(|s| s.to_string()));
        args.push(self.path.to_string_lossy().into_owned());
        args
    }
}

/// A consumer that stores frames as video.
pub trait FrameSink {
    /// Append one frame. Frames must all have the size the sink was opened with.
    fn write(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// Frame size fixed at open time.
    fn resolution(&self) -> Resolution;

    /// Number of frames accepted so far.
    fn frames_written(&self) -> u64;

    /// Flush and close the output. Calling it again is a no-op.
    fn release(&mut self) -> Result<(), SinkError>;
}

/// Reject frames whose size differs from the sink's.
pub fn check_frame(expected: Resolution, frame: &Frame) -> Result<(), SinkError> {
    let actual = frame.resolution();
    if actual != expected || frame.data.len() != expected.frame_len() {
        return Err(SinkError::SizeMismatch { expected, actual });
    }
    Ok(())
}

/// ffmpeg-backed video writer.
pub struct VideoWriter {
    spec: SinkSpec,
    pipeline: Pipeline,
    stdin: Option<ChildStdin>,
    frames_written: u64,
    released: bool,
}

impl fmt::Debug for VideoWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoWriter")
            .field("spec", &self.spec)
            .field("frames_written", &self.frames_written)
            .finish_non_exhaustive()
    }
}

impl VideoWriter {
    /// Start the encoder.
    ///
    /// # Errors
    /// * `SinkError::Unsupported` / `InvalidSpec` - If the parameters are unusable
    /// * `SinkError::Pipeline` - If ffmpeg is missing or exits right away
    pub fn open(spec: SinkSpec) -> Result<Self, SinkError> {
        spec.validate()?;

        log::info!(
            "Writing {} @ {} fps ({}) to {}",
            spec.resolution,
            spec.fps,
            spec.codec,
            spec.path.display()
        );

        Self::start(FFMPEG, spec)
    }

    /// Feed `program` (an ffmpeg-compatible encoder) with raw frames.
    fn start(program: &str, spec: SinkSpec) -> Result<Self, SinkError> {
        let mut pipeline = Pipeline::spawn(program, &spec.ffmpeg_args(), PipeMode::WriteStdin)?;
        if let Some(status) = pipeline.try_exit_status()? {
            pipeline.check_status(status)?;
            return Err(SinkError::InvalidSpec(format!(
                "{} exited before receiving frames",
                program
            )));
        }

        let stdin = pipeline.take_stdin();
        Ok(Self {
            spec,
            pipeline,
            stdin,
            frames_written: 0,
            released: false,
        })
    }

    /// The encoder closed its input. Its exit status says why; before the
    /// first frame that means it never started.
    fn encoder_gone(&mut self) -> SinkError {
        self.stdin = None;
        self.released = true;
        let failure = match self.pipeline.wait_timeout(FINALIZE_TIMEOUT) {
            Ok(status) => match self.pipeline.check_status(status) {
                Err(e) => e,
                Ok(()) => PipelineError::Io(ErrorKind::BrokenPipe.into()),
            },
            Err(e) => e,
        };
        if self.frames_written == 0 {
            SinkError::Pipeline(failure)
        } else {
            SinkError::EncoderFailed(failure)
        }
    }
}

impl FrameSink for VideoWriter {
    fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
        check_frame(self.spec.resolution, frame)?;
        let stdin = self.stdin.as_mut().ok_or(SinkError::Closed)?;
        match stdin.write_all(&frame.data) {
            Ok(()) => {
                self.frames_written += 1;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Err(self.encoder_gone()),
            Err(e) => Err(SinkError::Write(e)),
        }
    }

    fn resolution(&self) -> Resolution {
        self.spec.resolution
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn release(&mut self) -> Result<(), SinkError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if let Some(mut stdin) = self.stdin.take() {
            // The encoder may already be gone; its exit status says why
            if let Err(e) = stdin.flush() {
                if e.kind() != ErrorKind::BrokenPipe {
                    log::warn!("Failed to flush encoder input: {}", e);
                }
            }
        }

        let status = self
            .pipeline
            .wait_timeout(FINALIZE_TIMEOUT)
            .map_err(SinkError::EncoderFailed)?;
        self.pipeline
            .check_status(status)
            .map_err(SinkError::EncoderFailed)?;

        log::info!(
            "Video saved to {} ({} frames)",
            self.spec.path.display(),
            self.frames_written
        );
        Ok(())
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("Error closing video output: {}", e);
        }
    }
}
