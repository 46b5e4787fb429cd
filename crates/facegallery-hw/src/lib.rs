//! facegallery-hw: Webcam capture for training.
//!
//! Opens a V4L2 device, negotiates YUYV or MJPEG and hands out RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
