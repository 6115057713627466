use super::error::{Result, SegmentationError};
use super::preprocess::Roi;
use image::{imageops, GrayImage};
use imageproc::filter::box_filter;

/// Upscales the low-resolution mask into the region of interest of the
/// full-frame mask
#[derive(Debug, Clone)]
pub struct MaskCompositor {
    roi: Roi,
    blur_radius: u32,
}

impl MaskCompositor {
    /// `blur_kernel` is the side of the square box blur and must be odd
    pub fn new(roi: Roi, blur_kernel: u32) -> Result<Self> {
        if blur_kernel == 0 || blur_kernel % 2 == 0 {
            return Err(SegmentationError::InvalidConfig(format!(
                "blur kernel must be odd and positive, got {blur_kernel}"
            )));
        }
        Ok(Self {
            roi,
            blur_radius: blur_kernel / 2,
        })
    }

    /// Resize, blur and write `small` into `mask`; pixels outside the region
    /// of interest are left alone
    pub fn composite(&self, small: &GrayImage, mask: &mut GrayImage) -> Result<()> {
        let _span = tracing::debug_span!("composite").entered();

        let Roi {
            x,
            y,
            width,
            height,
        } = self.roi;
        if x + width > mask.width() || y + height > mask.height() {
            return Err(SegmentationError::Precondition(format!(
                "region of interest {width}x{height}+{x}+{y} exceeds mask {:?}",
                mask.dimensions()
            )));
        }

        let upscaled = imageops::resize(small, width, height, imageops::FilterType::Triangle);
        let blurred = if self.blur_radius > 0 {
            box_filter(&upscaled, self.blur_radius, self.blur_radius)
        } else {
            upscaled
        };

        imageops::replace(mask, &blurred, x as i64, y as i64);
        Ok(())
    }
}
