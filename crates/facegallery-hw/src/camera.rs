//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("frame conversion failed: {0}")]
    Frame(#[from] frame::FrameError),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, converted to RGB on capture.
    Yuyv,
    /// Motion-JPEG, decoded per frame.
    Mjpeg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(PixelFormat::Yuyv)
        } else if fourcc == FourCC::new(b"MJPG") {
            Some(PixelFormat::Mjpeg)
        } else {
            None
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Prefer YUYV; many webcams only reach 640x480 at a usable rate in MJPEG.
        let mut negotiated = None;
        for fourcc in [FourCC::new(b"YUYV"), FourCC::new(b"MJPG")] {
            let mut fmt = device
                .format()
                .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
            fmt.fourcc = fourcc;
            fmt.width = REQUESTED_WIDTH;
            fmt.height = REQUESTED_HEIGHT;

            match device.set_format(&fmt) {
                Ok(actual) => {
                    if let Some(pixel_format) = PixelFormat::from_fourcc(actual.fourcc) {
                        negotiated = Some((actual, pixel_format));
                        break;
                    }
                    tracing::debug!(requested = ?fourcc, got = ?actual.fourcc, "driver substituted format");
                }
                Err(e) => tracing::debug!(requested = ?fourcc, error = %e, "format rejected"),
            }
        }

        let (fmt, pixel_format) = negotiated.ok_or_else(|| {
            CameraError::FormatNegotiationFailed("device supports neither YUYV nor MJPG".into())
        })?;

        tracing::info!(width = fmt.width, height = fmt.height, ?pixel_format, "negotiated format");

        Ok(Self {
            device,
            width: fmt.width,
            height: fmt.height,
            pixel_format,
        })
    }

    /// Start a capture stream yielding RGB frames.
    pub fn stream(&self) -> Result<FrameStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        Ok(FrameStream { camera: self, stream })
    }

    fn to_rgb(&self, buf: &[u8]) -> Result<(Vec<u8>, u32, u32), CameraError> {
        match self.pixel_format {
            PixelFormat::Yuyv => Ok((frame::yuyv_to_rgb(buf, self.width, self.height)?, self.width, self.height)),
            PixelFormat::Mjpeg => Ok(frame::mjpeg_to_rgb(buf)?),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// Live capture stream bound to a [`Camera`].
pub struct FrameStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl FrameStream<'_> {
    /// Dequeue the next buffer and convert it to RGB.
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let (data, width, height) = self.camera.to_rgb(buf)?;

        Ok(Frame {
            data,
            width,
            height,
            sequence,
        })
    }

    /// Skip dark frames, giving up after `max_attempts` dequeues.
    pub fn next_lit_frame(&mut self, max_attempts: usize) -> Result<Frame, CameraError> {
        for _ in 0..max_attempts {
            let frame = self.next_frame()?;
            if !frame.is_dark() {
                return Ok(frame);
            }
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
        }
        Err(CameraError::CaptureFailed(format!(
            "no usable frame in {max_attempts} attempts (all dark)"
        )))
    }
}
