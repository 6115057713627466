use super::error::{Result, SegmentationError};
use ndarray::{Array4, ArrayView4, ArrayViewMut4};
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

/// Spatial layout of a `[1, height, width, channels]` float tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl TensorShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Validate engine-reported dimensions.
    ///
    /// Rank must be 4 and batch 1 (a dynamic batch is pinned to 1). Spatial
    /// and channel dimensions must be known.
    pub fn from_dims(dims: &[i64]) -> Result<Self> {
        let [batch, height, width, channels] = dims else {
            return Err(SegmentationError::Precondition(format!(
                "expected a rank-4 NHWC tensor, got dims {dims:?}"
            )));
        };

        if *batch != 1 && *batch != -1 {
            return Err(SegmentationError::Precondition(format!(
                "batch dimension must be 1, got {batch}"
            )));
        }

        let known = |d: i64| usize::try_from(d).ok().filter(|&d| d > 0);
        match (known(*height), known(*width), known(*channels)) {
            (Some(h), Some(w), Some(c)) => Ok(Self::new(h, w, c)),
            _ => Err(SegmentationError::Precondition(format!(
                "tensor dimensions must be static and positive, got {dims:?}"
            ))),
        }
    }

    pub fn dims(&self) -> (usize, usize, usize, usize) {
        (1, self.height, self.width, self.channels)
    }

    pub fn pixels(&self) -> usize {
        self.height * self.width
    }

    /// Width over height
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// A tensor-inference engine driving one loaded network
///
/// Implementations read the NHWC input buffer and fill the NHWC output buffer
/// in a single forward pass. Calls are serialized by the owning session.
pub trait InferenceBackend: Send {
    fn input_shape(&self) -> TensorShape;

    fn output_shape(&self) -> TensorShape;

    fn run(&mut self, input: ArrayView4<'_, f32>, output: ArrayViewMut4<'_, f32>) -> Result<()>;
}

/// ONNX Runtime backend
pub struct OrtBackend {
    session: Session,
    input: TensorShape,
    output: TensorShape,
}

impl OrtBackend {
    /// Load an ONNX model and build its runtime session.
    ///
    /// With `reduced_precision`, TensorRT (FP16) and CUDA providers are
    /// registered ahead of the CPU fallback.
    pub fn open(model_path: &Path, threads: usize, reduced_precision: bool) -> Result<Self> {
        if !model_path.is_file() {
            return Err(SegmentationError::load(model_path, "model file not found"));
        }

        tracing::info!("Loading model from {}", model_path.display());

        let mut builder = Session::builder()
            .map_err(|e| SegmentationError::load(model_path, e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| SegmentationError::load(model_path, e))?
            .with_intra_threads(threads.max(1))
            .map_err(|e| SegmentationError::load(model_path, e))?;

        if reduced_precision {
            builder = builder
                .with_execution_providers([
                    TensorRTExecutionProvider::default().with_fp16(true).build(),
                    CUDAExecutionProvider::default().build(),
                ])
                .map_err(|e| SegmentationError::load(model_path, e))?;
        }

        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| SegmentationError::load(model_path, e))?;

        let input_dims: Option<Vec<i64>> = session
            .inputs
            .first()
            .and_then(|input| input.input_type.tensor_shape())
            .map(|shape| shape.iter().copied().collect());
        let output_dims: Option<Vec<i64>> = session
            .outputs
            .first()
            .and_then(|output| output.output_type.tensor_shape())
            .map(|shape| shape.iter().copied().collect());

        let input = TensorShape::from_dims(&input_dims.ok_or_else(|| {
            SegmentationError::Precondition("model has no tensor input".into())
        })?)?;
        let output = TensorShape::from_dims(&output_dims.ok_or_else(|| {
            SegmentationError::Precondition("model has no tensor output".into())
        })?)?;

        tracing::info!("Model loaded successfully");

        Ok(Self {
            session,
            input,
            output,
        })
    }
}

impl InferenceBackend for OrtBackend {
    fn input_shape(&self) -> TensorShape {
        self.input
    }

    fn output_shape(&self) -> TensorShape {
        self.output
    }

    fn run(&mut self, input: ArrayView4<'_, f32>, mut output: ArrayViewMut4<'_, f32>) -> Result<()> {
        let _span = tracing::debug_span!("inference").entered();

        let tensor = Tensor::from_array(input.to_owned()).map_err(SegmentationError::inference)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(SegmentationError::inference)?;

        let (_shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
            SegmentationError::Precondition(format!("output tensor is not f32: {e}"))
        })?;

        let dest = output.as_slice_mut().ok_or_else(|| {
            SegmentationError::Precondition("output buffer is not contiguous".into())
        })?;
        if data.len() != dest.len() {
            return Err(SegmentationError::Precondition(format!(
                "engine produced {} values, buffer holds {}",
                data.len(),
                dest.len()
            )));
        }
        dest.copy_from_slice(data);

        Ok(())
    }
}

/// A loaded network together with its input and output buffers
///
/// Buffers live exactly as long as the engine; [`close`](Self::close) drops
/// both and may be called any number of times.
pub struct InferenceSession {
    backend: Option<Box<dyn InferenceBackend>>,
    input: Array4<f32>,
    output: Array4<f32>,
}

impl InferenceSession {
    pub fn open(model_path: &Path, threads: usize, reduced_precision: bool) -> Result<Self> {
        let backend = OrtBackend::open(model_path, threads, reduced_precision)?;
        Ok(Self::from_backend(Box::new(backend)))
    }

    /// Wrap an already constructed engine and allocate its buffers
    pub fn from_backend(backend: Box<dyn InferenceBackend>) -> Self {
        let input = Array4::zeros(backend.input_shape().dims());
        let output = Array4::zeros(backend.output_shape().dims());
        Self {
            backend: Some(backend),
            input,
            output,
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn input_shape(&self) -> TensorShape {
        let (_, height, width, channels) = self.input.dim();
        TensorShape::new(height, width, channels)
    }

    pub fn output_shape(&self) -> TensorShape {
        let (_, height, width, channels) = self.output.dim();
        TensorShape::new(height, width, channels)
    }

    pub fn input_view(&self) -> ArrayView4<'_, f32> {
        self.input.view()
    }

    pub fn input_view_mut(&mut self) -> ArrayViewMut4<'_, f32> {
        self.input.view_mut()
    }

    pub fn output_view(&self) -> ArrayView4<'_, f32> {
        self.output.view()
    }

    /// One forward pass over the current input contents
    pub fn run(&mut self) -> Result<()> {
        let backend = self
            .backend
            .as_mut()
            .ok_or(SegmentationError::NotInitialized)?;
        backend.run(self.input.view(), self.output.view_mut())
    }

    pub fn close(&mut self) {
        if self.backend.take().is_some() {
            self.input = Array4::zeros((0, 0, 0, 0));
            self.output = Array4::zeros((0, 0, 0, 0));
        }
    }
}
