//! Real-time person segmentation for virtual camera backgrounds.
//!
//! [`segmentation::MaskPipeline`] turns camera frames into a full-frame
//! person mask using a pre-trained segmentation network; [`background`]
//! composites the person over a replacement background.

pub mod background;
pub mod segmentation;

#[cfg(feature = "camera")]
pub mod capture;
#[cfg(feature = "camera")]
pub mod output;
