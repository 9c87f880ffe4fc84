//! rollcall-hw: Webcam capture.
//!
//! V4L2 access via the `v4l` crate; every frame is delivered as packed RGB.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError, FrameSource};
