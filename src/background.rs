use anyhow::{Context, Result};
use image::{imageops, GrayImage, Rgb, RgbImage};
use std::path::Path;

/// What replaces the background behind the person
#[derive(Debug, Clone)]
pub enum Background {
    Solid(Rgb<u8>),
    Image(RgbImage),
}

impl Background {
    /// Load an image file and scale it to the frame size
    pub fn load<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading background from {}", path.display());

        let image = image::open(path)
            .with_context(|| format!("Failed to open background image {}", path.display()))?
            .to_rgb8();

        let image = if image.dimensions() != (width, height) {
            imageops::resize(&image, width, height, imageops::FilterType::Lanczos3)
        } else {
            image
        };

        Ok(Self::Image(image))
    }

    fn pixel(&self, x: u32, y: u32) -> Rgb<u8> {
        match self {
            Background::Solid(colour) => *colour,
            Background::Image(image) => *image.get_pixel(x, y),
        }
    }
}

/// Blend `frame` over `background` using a person mask
///
/// Mask value 0 keeps the frame pixel, 255 takes the background pixel,
/// values in between mix linearly.
pub fn composite(frame: &RgbImage, background: &Background, mask: &GrayImage) -> Result<RgbImage> {
    let _span = tracing::debug_span!("composite_background").entered();

    let (width, height) = frame.dimensions();
    if mask.dimensions() != (width, height) {
        anyhow::bail!(
            "mask is {:?} but frame is {width}x{height}",
            mask.dimensions()
        );
    }
    if let Background::Image(image) = background {
        if image.dimensions() != (width, height) {
            anyhow::bail!(
                "background is {:?} but frame is {width}x{height}",
                image.dimensions()
            );
        }
    }

    Ok(RgbImage::from_fn(width, height, |x, y| {
        let alpha = mask.get_pixel(x, y).0[0] as u16;
        let fg = frame.get_pixel(x, y).0;
        let bg = background.pixel(x, y).0;

        Rgb(std::array::from_fn(|c| {
            ((fg[c] as u16 * (255 - alpha) + bg[c] as u16 * alpha + 127) / 255) as u8
        }))
    }))
}

/// Render the mask as a grayscale frame (person dark, background light)
pub fn mask_preview(mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| {
        let value = mask.get_pixel(x, y).0[0];
        Rgb([value, value, value])
    })
}
