use super::error::{Result, SegmentationError};
use super::model::Normalization;
use super::types::{BilateralParams, ChannelOrder};
use image::{imageops, RgbImage};
use ndarray::ArrayViewMut4;

/// Region of the frame handed to the network
///
/// Always spans the full frame height and is centred horizontally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    /// Centre a full-height region whose width is `frame_height / aspect_ratio`
    ///
    /// `aspect_ratio` is the network input's width over height.
    pub fn centered(frame_width: u32, frame_height: u32, aspect_ratio: f32) -> Result<Self> {
        if frame_width == 0 || frame_height == 0 {
            return Err(SegmentationError::InvalidConfig(format!(
                "frame size {frame_width}x{frame_height} is empty"
            )));
        }
        if !aspect_ratio.is_finite() || aspect_ratio <= 0.0 {
            return Err(SegmentationError::InvalidConfig(format!(
                "input aspect ratio {aspect_ratio} is not usable"
            )));
        }

        let scaled = frame_height as f32 / aspect_ratio;
        let width = scaled as u32;
        if width == 0 || width > frame_width {
            return Err(SegmentationError::InvalidConfig(format!(
                "region of interest {width}x{frame_height} does not fit a {frame_width}x{frame_height} frame"
            )));
        }

        Ok(Self {
            x: ((frame_width as f32 - scaled) / 2.0) as u32,
            y: 0,
            width,
            height: frame_height,
        })
    }
}

/// Turns full camera frames into normalized NHWC network input
pub struct Preprocessor {
    roi: Roi,
    target_width: u32,
    target_height: u32,
    channel_order: ChannelOrder,
    normalization: Normalization,
    denoise: Option<BilateralParams>,
}

impl Preprocessor {
    pub fn new(
        roi: Roi,
        target_width: u32,
        target_height: u32,
        channel_order: ChannelOrder,
        normalization: Normalization,
        denoise: Option<BilateralParams>,
    ) -> Self {
        Self {
            roi,
            target_width,
            target_height,
            channel_order,
            normalization,
            denoise,
        }
    }

    /// Fill `input` from `frame`
    ///
    /// Steps:
    /// 1. Crop to the region of interest
    /// 2. Resize to the network input size
    /// 3. Reorder channels to RGB
    /// 4. Bilateral denoise (when enabled)
    /// 5. Convert to float with the family's scaling and offset
    pub fn preprocess(&self, frame: &RgbImage, mut input: ArrayViewMut4<'_, f32>) -> Result<()> {
        let _span = tracing::debug_span!("preprocess").entered();

        let expected = (1, self.target_height as usize, self.target_width as usize, 3);
        if input.dim() != expected {
            return Err(SegmentationError::Precondition(format!(
                "input tensor is {:?}, preprocessing produces {:?}",
                input.dim(),
                expected
            )));
        }

        let Roi {
            x,
            y,
            width,
            height,
        } = self.roi;
        let cropped = imageops::crop_imm(frame, x, y, width, height).to_image();

        let mut resized = if cropped.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                &cropped,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        } else {
            cropped
        };

        if self.channel_order == ChannelOrder::Bgr {
            for pixel in resized.pixels_mut() {
                pixel.0.swap(0, 2);
            }
        }

        let rgb = match &self.denoise {
            Some(params) => bilateral_filter(&resized, params),
            None => resized,
        };

        let norm = self.normalization;
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for (c, &value) in pixel.0.iter().enumerate() {
                input[[0, y as usize, x as usize, c]] = norm.apply(value);
            }
        }

        Ok(())
    }
}

const MIN_SIGMA: f32 = 0.01;

/// Edge-preserving smoothing of an RGB image
///
/// Each output pixel is a weighted mean over a circular window of
/// `diameter / 2` radius. Weights are Gaussian in spatial distance and in
/// the L1 colour distance to the centre pixel. Borders are clamped.
pub fn bilateral_filter(image: &RgbImage, params: &BilateralParams) -> RgbImage {
    let radius = (params.diameter / 2) as i64;
    if radius == 0 {
        return image.clone();
    }

    // squaring anything smaller underflows and poisons the weights with NaN
    let sigma_space = params.sigma_space.max(MIN_SIGMA);
    let sigma_color = params.sigma_color.max(MIN_SIGMA);
    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let color_coeff = -0.5 / (sigma_color * sigma_color);

    let mut window = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let dist2 = (dx * dx + dy * dy) as f32;
            if dist2 <= (radius * radius) as f32 {
                window.push((dx, dy, (dist2 * space_coeff).exp()));
            }
        }
    }

    let color_weight: Vec<f32> = (0..=255 * 3)
        .map(|d: u32| ((d * d) as f32 * color_coeff).exp())
        .collect();

    let (width, height) = image.dimensions();
    let (max_x, max_y) = (width as i64 - 1, height as i64 - 1);

    RgbImage::from_fn(width, height, |x, y| {
        let centre = image.get_pixel(x, y).0;
        let mut acc = [0f32; 3];
        let mut total = 0f32;

        for &(dx, dy, space_weight) in &window {
            let nx = (x as i64 + dx).clamp(0, max_x) as u32;
            let ny = (y as i64 + dy).clamp(0, max_y) as u32;
            let neighbour = image.get_pixel(nx, ny).0;

            let diff: u32 = centre
                .iter()
                .zip(neighbour.iter())
                .map(|(&a, &b)| a.abs_diff(b) as u32)
                .sum();
            let weight = space_weight * color_weight[diff as usize];

            for c in 0..3 {
                acc[c] += weight * neighbour[c] as f32;
            }
            total += weight;
        }

        image::Rgb(acc.map(|v| (v / total).round().clamp(0.0, 255.0) as u8))
    })
}
