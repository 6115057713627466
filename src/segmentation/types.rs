use std::io::{self, Write};
use std::path::PathBuf;
use tracing::Level;

/// Byte order of the three colour channels in incoming frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    /// Blue, green, red (OpenCV-style sources)
    #[default]
    Bgr,
    /// Red, green, blue
    Rgb,
}

/// Edge-preserving denoise parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BilateralParams {
    /// Neighbourhood diameter in pixels
    pub diameter: u32,
    pub sigma_color: f32,
    pub sigma_space: f32,
}

impl Default for BilateralParams {
    fn default() -> Self {
        Self {
            diameter: 5,
            sigma_color: 100.0,
            sigma_space: 100.0,
        }
    }
}

/// Tunable constants of the mask pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct MaskTuning {
    /// Single-channel models: a pixel is a person when its probability is
    /// strictly above this value
    pub probability_threshold: f32,
    /// Side length of the square box blur applied to the upscaled mask (odd)
    pub blur_kernel: u32,
    /// Bilateral denoise before inference; `None` skips it
    pub denoise: Option<BilateralParams>,
}

impl Default for MaskTuning {
    fn default() -> Self {
        Self {
            probability_threshold: 0.65,
            blur_kernel: 5,
            denoise: Some(BilateralParams::default()),
        }
    }
}

/// Construction-time options of a [`MaskPipeline`](super::MaskPipeline)
#[derive(Debug, Clone)]
pub struct SegmentationConfig {
    /// Path to the ONNX model
    pub model_file: PathBuf,
    /// Worker threads for the inference engine
    pub threads: usize,
    /// Full frame width
    pub width: u32,
    /// Full frame height
    pub height: u32,
    /// Emit debug-level diagnostics
    pub debug: bool,
    pub channel_order: ChannelOrder,
    /// Allow FP16 execution providers when available
    pub reduced_precision: bool,
    pub tuning: MaskTuning,
}

impl SegmentationConfig {
    pub fn new(model_file: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            model_file: model_file.into(),
            threads: 2,
            width,
            height,
            debug: false,
            channel_order: ChannelOrder::default(),
            reduced_precision: true,
            tuning: MaskTuning::default(),
        }
    }
}

/// Receives pipeline diagnostics as leveled, pre-formatted messages
pub trait DebugSink: Send + Sync {
    fn emit(&self, level: Level, message: &str);
}

/// Default sink: forwards everything to `tracing`
///
/// Until a global subscriber is installed, messages go straight to stderr
/// instead of being dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DebugSink for TracingSink {
    fn emit(&self, level: Level, message: &str) {
        if !tracing::dispatcher::has_been_set() {
            let _ = write_unrouted(level, message, &mut std::io::stderr().lock());
            return;
        }
        match level {
            Level::ERROR => tracing::error!("{message}"),
            Level::WARN => tracing::warn!("{message}"),
            Level::INFO => tracing::info!("{message}"),
            Level::DEBUG => tracing::debug!("{message}"),
            _ => tracing::trace!("{message}"),
        }
    }
}

fn write_unrouted(level: Level, message: &str, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{:>5} {message}", level.as_str())
}

/// Instrumentation points of a single `compute_mask` call
///
/// Notifications are fire-and-forget; the pipeline never looks at what an
/// observer does with them.
pub trait FrameObserver {
    /// Input tensor is filled, inference not yet started
    fn on_preprocessed(&mut self) {}

    /// Forward pass finished
    fn on_inferred(&mut self) {}

    /// Low-resolution mask has been decoded
    fn on_mask_decoded(&mut self) {}
}

/// Observer that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl FrameObserver for NoopObserver {}
