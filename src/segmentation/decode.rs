use super::error::{Result, SegmentationError};
use super::model::{ModelFamily, DEEPLAB_LABELS, DEEPLAB_PERSON_CLASS};
use image::GrayImage;
use ndarray::{ArrayView1, ArrayView4, Axis};

/// Mask value for a person pixel
pub const FOREGROUND: u8 = 0;
/// Mask value for a background pixel
pub const BACKGROUND: u8 = 255;

/// Bits of the new decision kept by the temporal blend
pub const DECISION_MASK: u8 = 0xE0;
/// Right shift applied to the previous byte by the temporal blend
pub const HISTORY_SHIFT: u32 = 3;

/// Fold a fresh per-pixel decision into the previous mask byte.
///
/// The top three bits come from the decision, the rest is the previous value
/// decayed by [`HISTORY_SHIFT`] bits, so a flipped pixel settles over a few
/// frames instead of jumping.
pub fn temporal_blend(decision: u8, previous: u8) -> u8 {
    (decision & DECISION_MASK) | (previous >> HISTORY_SHIFT)
}

/// Interprets raw network output as a person/background mask
#[derive(Debug, Clone)]
pub struct MaskDecoder {
    family: ModelFamily,
    probability_threshold: f32,
}

impl MaskDecoder {
    pub fn new(family: ModelFamily, probability_threshold: f32) -> Self {
        Self {
            family,
            probability_threshold,
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    /// Blend this frame's decisions into `mask`.
    ///
    /// Returns `false` without touching `mask` for [`ModelFamily::Unknown`];
    /// the previous contents are left as they were.
    pub fn decode(&self, output: ArrayView4<'_, f32>, mask: &mut GrayImage) -> Result<bool> {
        let _span = tracing::debug_span!("decode", family = %self.family).entered();

        if !self.family.is_decodable() {
            return Ok(false);
        }

        let (batch, height, width, channels) = output.dim();
        if batch != 1 {
            return Err(SegmentationError::Precondition(format!(
                "output batch must be 1, got {batch}"
            )));
        }
        if mask.dimensions() != (width as u32, height as u32) {
            return Err(SegmentationError::Precondition(format!(
                "mask is {:?}, output tensor is {width}x{height}",
                mask.dimensions()
            )));
        }

        // the person index is only meaningful in the Pascal VOC label order
        let required = match self.family {
            ModelFamily::DeepLab if channels == DEEPLAB_LABELS.len() => None,
            ModelFamily::DeepLab => Some("21"),
            ModelFamily::BodyPix | ModelFamily::MLKitSelfie if channels == 1 => None,
            ModelFamily::BodyPix | ModelFamily::MLKitSelfie => Some("1"),
            ModelFamily::GoogleMeetSegmentation if channels == 2 => None,
            ModelFamily::GoogleMeetSegmentation => Some("2"),
            ModelFamily::Unknown => None,
        };
        if let Some(required) = required {
            return Err(SegmentationError::Precondition(format!(
                "{} output needs {required} channels, got {channels}",
                self.family
            )));
        }

        let plane = output.index_axis(Axis(0), 0);
        for (scores, pixel) in plane.lanes(Axis(2)).into_iter().zip(mask.pixels_mut()) {
            let decision = if self.is_person(scores) {
                FOREGROUND
            } else {
                BACKGROUND
            };
            pixel.0[0] = temporal_blend(decision, pixel.0[0]);
        }

        Ok(true)
    }

    fn is_person(&self, scores: ArrayView1<'_, f32>) -> bool {
        match self.family {
            ModelFamily::DeepLab => argmax(scores) == DEEPLAB_PERSON_CLASS,
            ModelFamily::BodyPix | ModelFamily::MLKitSelfie => {
                scores[0] > self.probability_threshold
            }
            ModelFamily::GoogleMeetSegmentation => {
                let (background, person) = softmax2(scores[0], scores[1]);
                // ties go to background
                background < person
            }
            ModelFamily::Unknown => false,
        }
    }
}

/// Index of the first maximum
fn argmax(scores: ArrayView1<'_, f32>) -> usize {
    scores
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
        .0
}

fn softmax2(a: f32, b: f32) -> (f32, f32) {
    let max = a.max(b);
    let (ea, eb) = ((a - max).exp(), (b - max).exp());
    let sum = ea + eb;
    (ea / sum, eb / sum)
}
