//! The frame source abstraction the capture loop reads from.

use super::types::{CameraError, Frame, Resolution};

/// A blocking stream of camera frames.
pub trait FrameSource {
    /// Block until the next frame is available.
    ///
    /// Returns `Ok(None)` when the stream has ended and `Err` when reading
    /// failed. There is no timeout and no retry.
    fn read_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Size of the frames this source produces.
    fn resolution(&self) -> Resolution;

    /// Stop the stream and free the device. Calling it again is a no-op.
    fn release(&mut self) -> Result<(), CameraError>;
}
