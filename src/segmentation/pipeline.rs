use super::compositor::MaskCompositor;
use super::decode::MaskDecoder;
use super::error::{Result, SegmentationError};
use super::model::ModelFamily;
use super::preprocess::{Preprocessor, Roi};
use super::session::{InferenceBackend, InferenceSession, TensorShape};
use super::types::{DebugSink, FrameObserver, NoopObserver, SegmentationConfig, TracingSink};
use image::{GrayImage, Luma, RgbImage};
use std::sync::Arc;
use tracing::Level;

/// Per-frame person mask computation
///
/// Owns at most one loaded network. [`initialize`](Self::initialize) builds
/// the session and everything derived from it; [`shutdown`](Self::shutdown)
/// releases it. Both may be repeated freely.
///
/// The mask covers the whole frame: 0 marks the person, 255 the background.
/// Outside the region of interest it stays 255.
pub struct MaskPipeline {
    sink: Arc<dyn DebugSink>,
    state: Option<ActiveSession>,
}

struct ActiveSession {
    config: SegmentationConfig,
    family: ModelFamily,
    session: InferenceSession,
    preprocessor: Preprocessor,
    decoder: MaskDecoder,
    compositor: MaskCompositor,
    roi: Roi,
    mask: GrayImage,
    // Survives across frames: the temporal blend reads last frame's bytes.
    small_mask: GrayImage,
}

fn emit(sink: &dyn DebugSink, debug: bool, level: Level, message: &str) {
    // warnings and errors are never suppressed
    if level <= Level::WARN || debug {
        sink.emit(level, message);
    }
}

impl MaskPipeline {
    /// Pipeline reporting through [`TracingSink`]; without a global
    /// subscriber its diagnostics are written to stderr
    pub fn new() -> Self {
        Self {
            sink: Arc::new(TracingSink),
            state: None,
        }
    }

    /// Route diagnostics to `sink` instead of `tracing`
    pub fn with_debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Load the configured ONNX model, replacing any current session
    pub fn initialize(&mut self, config: SegmentationConfig) -> Result<()> {
        self.shutdown();

        let family = ModelFamily::classify(&config.model_file);
        let session =
            InferenceSession::open(&config.model_file, config.threads, config.reduced_precision)?;
        self.install(config, family, session)
    }

    /// Same as [`initialize`](Self::initialize) with a caller-supplied engine.
    ///
    /// The model family is still taken from `config.model_file`.
    pub fn initialize_with_backend(
        &mut self,
        config: SegmentationConfig,
        backend: Box<dyn InferenceBackend>,
    ) -> Result<()> {
        self.shutdown();

        let family = ModelFamily::classify(&config.model_file);
        self.install(config, family, InferenceSession::from_backend(backend))
    }

    fn install(
        &mut self,
        config: SegmentationConfig,
        family: ModelFamily,
        session: InferenceSession,
    ) -> Result<()> {
        let sink = self.sink.as_ref();
        let input = session.input_shape();
        let output = session.output_shape();

        emit(
            sink,
            config.debug,
            Level::DEBUG,
            &format!(
                "model family {family}: input tensor {:?}, output tensor {:?}",
                input.dims(),
                output.dims()
            ),
        );

        if !family.is_decodable() {
            emit(
                sink,
                config.debug,
                Level::WARN,
                &format!(
                    "Unknown model type '{}', mask will not be updated",
                    config.model_file.display()
                ),
            );
        }

        if input.channels != 3 {
            return Err(SegmentationError::Precondition(format!(
                "model input must have 3 colour channels, got {}",
                input.channels
            )));
        }

        let roi = Roi::centered(config.width, config.height, input.aspect_ratio())?;
        let preprocessor = Preprocessor::new(
            roi,
            input.width as u32,
            input.height as u32,
            config.channel_order,
            family.normalization(),
            config.tuning.denoise,
        );
        let decoder = MaskDecoder::new(family, config.tuning.probability_threshold);
        let compositor = MaskCompositor::new(roi, config.tuning.blur_kernel)?;

        let mask = GrayImage::from_pixel(config.width, config.height, Luma([255]));
        let small_mask = GrayImage::from_pixel(output.width as u32, output.height as u32, Luma([255]));

        emit(
            sink,
            config.debug,
            Level::DEBUG,
            &format!(
                "region of interest {}x{} at x={}, mask {}x{}",
                roi.width, roi.height, roi.x, config.width, config.height
            ),
        );

        self.state = Some(ActiveSession {
            config,
            family,
            session,
            preprocessor,
            decoder,
            compositor,
            roi,
            mask,
            small_mask,
        });
        Ok(())
    }

    pub fn compute_mask(&mut self, frame: &RgbImage) -> Result<&GrayImage> {
        self.compute_mask_with(frame, &mut NoopObserver)
    }

    /// Run one frame through the pipeline and return the updated mask.
    ///
    /// On any error the previous mask is kept untouched.
    pub fn compute_mask_with(
        &mut self,
        frame: &RgbImage,
        observer: &mut dyn FrameObserver,
    ) -> Result<&GrayImage> {
        let _span = tracing::debug_span!("compute_mask").entered();

        let state = self.state.as_mut().ok_or(SegmentationError::NotInitialized)?;
        let expected = (state.config.width, state.config.height);
        if frame.dimensions() != expected {
            return Err(SegmentationError::Precondition(format!(
                "frame is {:?}, pipeline configured for {:?}",
                frame.dimensions(),
                expected
            )));
        }

        state
            .preprocessor
            .preprocess(frame, state.session.input_view_mut())?;
        observer.on_preprocessed();

        state.session.run()?;
        observer.on_inferred();

        let decoded = state
            .decoder
            .decode(state.session.output_view(), &mut state.small_mask)?;
        if !decoded {
            emit(
                self.sink.as_ref(),
                state.config.debug,
                Level::DEBUG,
                "Unknown model type, mask not decoded",
            );
        }
        observer.on_mask_decoded();

        state.compositor.composite(&state.small_mask, &mut state.mask)?;
        Ok(&state.mask)
    }

    /// Release the network and all buffers. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if let Some(mut state) = self.state.take() {
            emit(
                self.sink.as_ref(),
                state.config.debug,
                Level::DEBUG,
                "dropping inference context",
            );
            state.session.close();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// The full-frame mask from the last successful frame
    pub fn mask(&self) -> Option<&GrayImage> {
        self.state.as_ref().map(|s| &s.mask)
    }

    pub fn family(&self) -> Option<ModelFamily> {
        self.state.as_ref().map(|s| s.family)
    }

    pub fn roi(&self) -> Option<Roi> {
        self.state.as_ref().map(|s| s.roi)
    }

    pub fn input_shape(&self) -> Option<TensorShape> {
        self.state.as_ref().map(|s| s.session.input_shape())
    }

    pub fn output_shape(&self) -> Option<TensorShape> {
        self.state.as_ref().map(|s| s.session.output_shape())
    }
}

impl Default for MaskPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MaskPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
