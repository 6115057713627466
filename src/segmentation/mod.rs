mod compositor;
mod decode;
pub mod error;
mod model;
mod pipeline;
mod preprocess;
mod session;
pub mod types;

pub use compositor::MaskCompositor;
pub use decode::{temporal_blend, MaskDecoder, BACKGROUND, DECISION_MASK, FOREGROUND, HISTORY_SHIFT};
pub use error::SegmentationError;
pub use model::{ModelFamily, Normalization, DEEPLAB_LABELS, DEEPLAB_PERSON_CLASS};
pub use pipeline::MaskPipeline;
pub use preprocess::{bilateral_filter, Preprocessor, Roi};
pub use session::{InferenceBackend, InferenceSession, OrtBackend, TensorShape};
pub use types::{
    BilateralParams, ChannelOrder, DebugSink, FrameObserver, MaskTuning, NoopObserver,
    SegmentationConfig, TracingSink,
};
