use anyhow::{Context, Result};
use image::{ImageBuffer, RgbImage};
use tracing::{debug, info, warn};

use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    Camera,
};

use crate::error::CaptureError;

/// A sequential source of fixed-size color frames.
///
/// `next_frame` blocks until a frame is available and returns `Ok(None)` once
/// the stream is exhausted. There is no seeking and no backpressure beyond
/// the blocking read.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
    fn resolution(&self) -> (u32, u32);
}

/// A sink the controller mirrors frames into (raw capture, stabilized output).
pub trait FrameSink {
    fn write(&mut self, frame: &RgbImage) -> Result<()>;
}

/// Live camera source backed by nokhwa.
pub struct CameraSource {
    camera: Camera,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl CameraSource {
    /// Opens the camera, requesting the configured capture size. An
    /// unavailable camera is fatal (`CaptureError::SourceUnavailable`).
    pub fn new(device: &str, width: u32, height: u32) -> Result<Self, CaptureError> {
        let index = if let Some(num) = device.strip_prefix("/dev/video") {
            CameraIndex::Index(num.parse().unwrap_or(0))
        } else if let Ok(num) = device.parse::<u32>() {
            CameraIndex::Index(num)
        } else {
            CameraIndex::Index(0)
        };

        let format = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, 30);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

        let mut camera = Camera::new(index, requested)
            .map_err(|e| CaptureError::SourceUnavailable(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| CaptureError::SourceUnavailable(e.to_string()))?;

        let resolution = camera.resolution();
        let (actual_w, actual_h) = (resolution.width(), resolution.height());
        if (actual_w, actual_h) != (width, height) {
            warn!(
                "Camera negotiated {}x{} instead of requested {}x{}",
                actual_w, actual_h, width, height
            );
        }
        info!("Opened video source {} ({}x{})", device, actual_w, actual_h);

        Ok(Self {
            camera,
            width: actual_w,
            height: actual_h,
            frame_count: 0,
        })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let frame = match self.camera.frame() {
            Ok(frame) => frame,
            Err(e) => {
                // A failed read ends the stream rather than aborting the run.
                warn!("Camera read failed, treating as end of stream: {}", e);
                return Ok(None);
            }
        };

        let rgb = frame
            .decode_image::<RgbFormat>()
            .context("Failed to decode camera frame")?;

        let buffer: RgbImage = ImageBuffer::from_raw(self.width, self.height, rgb.into_raw())
            .context("Camera frame did not match the negotiated resolution")?;

        self.frame_count += 1;
        debug!("Captured frame {} ({}x{})", self.frame_count, self.width, self.height);
        Ok(Some(buffer))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!("Failed to stop camera stream: {}", e);
        } else {
            info!("Camera stream stopped");
        }
    }
}

/// In-memory source over a pre-built frame sequence. Useful for replaying
/// recorded sessions and for driving the pipeline in tests.
pub struct MemorySource {
    frames: std::collections::VecDeque<RgbImage>,
    width: u32,
    height: u32,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>, width: u32, height: u32) -> Self {
        Self {
            frames: frames.into(),
            width,
            height,
        }
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frames.pop_front())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Writes frames as a numbered PNG sequence (`{prefix}_{index}.png`).
pub struct PngSequenceSink {
    prefix: String,
    index: usize,
}

impl PngSequenceSink {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            index: 0,
        }
    }
}

impl FrameSink for PngSequenceSink {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let path = format!("{}_{}.png", self.prefix, self.index);
        frame
            .save(&path)
            .map_err(|source| CaptureError::ImageWrite {
                path: path.clone().into(),
                source,
            })?;
        self.index += 1;
        Ok(())
    }
}
