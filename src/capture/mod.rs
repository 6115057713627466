mod v4l_capture;

pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use image::RgbImage;

/// Source of full-resolution frames for the mask pipeline
pub trait CaptureSource {
    /// Capture a single frame at [`resolution`](Self::resolution)
    fn capture_frame(&mut self) -> Result<RgbImage>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}
