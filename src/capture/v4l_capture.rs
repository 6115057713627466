use super::CaptureSource;
use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

/// Webcam frames in RGB order, scaled to the requested size
pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl WebcamCapture {
    pub fn new(device_index: u32, width: u32, height: u32) -> Result<Self> {
        tracing::info!("Opening webcam {} for {}x{} frames", device_index, width, height);

        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);
        let mut camera = Camera::new(CameraIndex::Index(device_index), requested)
            .context("Failed to open camera")?;
        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        let native = camera.resolution();
        tracing::debug!(
            "Camera streams at {}x{}",
            native.width(),
            native.height()
        );

        Ok(Self {
            camera,
            width,
            height,
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<RgbImage> {
        let buffer = self.camera.frame().context("Failed to capture frame")?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;

        let (width, height) = (decoded.width(), decoded.height());
        let frame = RgbImage::from_raw(width, height, decoded.into_raw())
            .context("Decoded frame has an unexpected buffer size")?;

        if frame.dimensions() == (self.width, self.height) {
            Ok(frame)
        } else {
            Ok(imageops::resize(
                &frame,
                self.width,
                self.height,
                imageops::FilterType::Triangle,
            ))
        }
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
