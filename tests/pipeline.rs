mod common;

use backdrop::segmentation::{
    DebugSink, FrameObserver, MaskPipeline, ModelFamily, Roi, SegmentationConfig,
    SegmentationError, TensorShape, DEEPLAB_PERSON_CLASS,
};
use common::{grey_frame, ScriptedBackend, FRAME_HEIGHT, FRAME_WIDTH};
use image::{GrayImage, RgbImage};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tracing::Level;

fn config(model: &str) -> SegmentationConfig {
    SegmentationConfig::new(model, FRAME_WIDTH, FRAME_HEIGHT)
}

fn roi_value(mask: &GrayImage, roi: Roi) -> u8 {
    mask.get_pixel(roi.x + roi.width / 2, roi.height / 2).0[0]
}

fn outside_roi_is_opaque(mask: &GrayImage, roi: Roi) -> bool {
    mask.enumerate_pixels()
        .filter(|(x, _, _)| *x < roi.x || *x >= roi.x + roi.width)
        .all(|(_, _, p)| p.0[0] == 255)
}

#[derive(Default)]
struct Recorder(Vec<&'static str>);

impl FrameObserver for Recorder {
    fn on_preprocessed(&mut self) {
        self.0.push("preprocessed");
    }

    fn on_inferred(&mut self) {
        self.0.push("inferred");
    }

    fn on_mask_decoded(&mut self) {
        self.0.push("mask_decoded");
    }
}

#[derive(Default)]
struct CollectingSink(Mutex<Vec<(Level, String)>>);

impl DebugSink for CollectingSink {
    fn emit(&self, level: Level, message: &str) {
        self.0.lock().unwrap().push((level, message.to_string()));
    }
}

#[test]
fn setup_derives_roi_and_initial_mask() -> anyhow::Result<()> {
    let mut pipeline = MaskPipeline::new();
    pipeline.initialize_with_backend(
        config("deeplabv3_257.onnx"),
        Box::new(ScriptedBackend::deeplab(DEEPLAB_PERSON_CLASS)),
    )?;

    assert_eq!(pipeline.family(), Some(ModelFamily::DeepLab));
    assert_eq!(pipeline.input_shape(), Some(TensorShape::new(16, 16, 3)));
    assert_eq!(pipeline.output_shape(), Some(TensorShape::new(8, 8, 21)));
    assert_eq!(
        pipeline.roi(),
        Some(Roi {
            x: 8,
            y: 0,
            width: 48,
            height: 48
        })
    );

    let mask = pipeline.mask().unwrap();
    assert_eq!(mask.dimensions(), (FRAME_WIDTH, FRAME_HEIGHT));
    assert!(mask.pixels().all(|p| p.0[0] == 255));
    Ok(())
}

#[test]
fn unknown_model_runs_but_never_updates_mask() -> anyhow::Result<()> {
    let backend = ScriptedBackend::probability(0.99);
    let runs = backend.runs.clone();

    let mut pipeline = MaskPipeline::new();
    pipeline.initialize_with_backend(config("robust_video_matting.onnx"), Box::new(backend))?;
    assert_eq!(pipeline.family(), Some(ModelFamily::Unknown));

    let frame = grey_frame();
    for _ in 0..5 {
        let mask = pipeline.compute_mask(&frame)?;
        assert!(mask.pixels().all(|p| p.0[0] == 255));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 5);
    Ok(())
}

#[test]
fn static_person_converges_under_temporal_blend() -> anyhow::Result<()> {
    let mut pipeline = MaskPipeline::new();
    pipeline.initialize_with_backend(
        config("deeplabv3_257.onnx"),
        Box::new(ScriptedBackend::deeplab(DEEPLAB_PERSON_CLASS)),
    )?;
    let roi = pipeline.roi().unwrap();

    let frame = grey_frame();
    let mut history = Vec::new();
    for _ in 0..5 {
        let mask = pipeline.compute_mask(&frame)?;
        assert!(outside_roi_is_opaque(mask, roi));
        history.push(roi_value(mask, roi));
    }

    assert_eq!(history, vec![31, 3, 0, 0, 0]);
    Ok(())
}

#[test]
fn static_background_stays_opaque() -> anyhow::Result<()> {
    let mut pipeline = MaskPipeline::new();
    pipeline.initialize_with_backend(
        config("deeplabv3_257.onnx"),
        Box::new(ScriptedBackend::deeplab(0)),
    )?;

    let frame = grey_frame();
    for _ in 0..3 {
        let mask = pipeline.compute_mask(&frame)?;
        assert!(mask.pixels().all(|p| p.0[0] == 255));
    }
    Ok(())
}

#[test]
fn selfie_probability_above_threshold_is_person() -> anyhow::Result<()> {
    let mut pipeline = MaskPipeline::new();
    pipeline.initialize_with_backend(
        config("selfie_segmentation.onnx"),
        Box::new(ScriptedBackend::probability(0.7)),
    )?;
    let roi = pipeline.roi().unwrap();

    let mask = pipeline.compute_mask(&grey_frame())?;
    assert_eq!(roi_value(mask, roi), 31);
    Ok(())
}

#[test]
fn meet_logits_decode_through_pipeline() -> anyhow::Result<()> {
    let output = TensorShape::new(4, 8, 2);
    let values: Vec<f32> = (0..output.pixels()).flat_map(|_| [-2.0, 2.0]).collect();
    let backend = ScriptedBackend::new(TensorShape::new(8, 16, 3), output, values);

    let mut pipeline = MaskPipeline::new();
    pipeline.initialize_with_backend(config("segm_lite_v681.onnx"), Box::new(backend))?;
    assert_eq!(pipeline.family(), Some(ModelFamily::GoogleMeetSegmentation));

    // wide input: height / 2 columns, centred
    let roi = pipeline.roi().unwrap();
    assert_eq!((roi.x, roi.width, roi.height), (20, 24, 48));

    let mask = pipeline.compute_mask(&grey_frame())?;
    assert_eq!(roi_value(mask, roi), 31);
    assert!(outside_roi_is_opaque(mask, roi));
    Ok(())
}

#[test]
fn shutdown_and_reinitialize_are_idempotent() -> anyhow::Result<()> {
    let first = ScriptedBackend::deeplab(DEEPLAB_PERSON_CLASS);
    let first_drops = first.drops.clone();
    let second = ScriptedBackend::deeplab(DEEPLAB_PERSON_CLASS);
    let second_drops = second.drops.clone();

    let mut pipeline = MaskPipeline::new();
    pipeline.initialize_with_backend(config("deeplabv3.onnx"), Box::new(first))?;
    pipeline.initialize_with_backend(config("deeplabv3.onnx"), Box::new(second))?;
    assert_eq!(first_drops.load(Ordering::SeqCst), 1);
    assert_eq!(second_drops.load(Ordering::SeqCst), 0);

    let roi = pipeline.roi().unwrap();
    let mask = pipeline.compute_mask(&grey_frame())?;
    assert_eq!(roi_value(mask, roi), 31);

    pipeline.shutdown();
    pipeline.shutdown();
    assert_eq!(second_drops.load(Ordering::SeqCst), 1);
    assert!(!pipeline.is_initialized());
    assert!(pipeline.mask().is_none());
    assert!(matches!(
        pipeline.compute_mask(&grey_frame()),
        Err(SegmentationError::NotInitialized)
    ));
    Ok(())
}

#[test]
fn inference_failure_keeps_last_good_mask() -> anyhow::Result<()> {
    let backend = ScriptedBackend::deeplab(DEEPLAB_PERSON_CLASS);
    let fail = backend.fail.clone();

    let mut pipeline = MaskPipeline::new();
    pipeline.initialize_with_backend(config("deeplabv3.onnx"), Box::new(backend))?;
    let roi = pipeline.roi().unwrap();
    let before = pipeline.compute_mask(&grey_frame())?.clone();

    fail.store(true, Ordering::SeqCst);
    let mut recorder = Recorder::default();
    let result = pipeline.compute_mask_with(&grey_frame(), &mut recorder);
    assert!(matches!(result, Err(SegmentationError::Inference(_))));
    assert_eq!(recorder.0, vec!["preprocessed"]);
    assert_eq!(pipeline.mask(), Some(&before));

    // the session is still usable once the engine recovers
    fail.store(false, Ordering::SeqCst);
    let mask = pipeline.compute_mask(&grey_frame())?;
    assert_eq!(roi_value(mask, roi), 3);
    Ok(())
}

#[test]
fn observer_sees_stages_in_order() -> anyhow::Result<()> {
    let mut pipeline = MaskPipeline::new();
    pipeline.initialize_with_backend(
        config("body-pix.onnx"),
        Box::new(ScriptedBackend::probability(0.2)),
    )?;

    let mut recorder = Recorder::default();
    pipeline.compute_mask_with(&grey_frame(), &mut recorder)?;
    assert_eq!(recorder.0, vec!["preprocessed", "inferred", "mask_decoded"]);
    Ok(())
}

#[test]
fn wrong_frame_size_is_rejected() -> anyhow::Result<()> {
    let mut pipeline = MaskPipeline::new();
    pipeline.initialize_with_backend(
        config("body-pix.onnx"),
        Box::new(ScriptedBackend::probability(0.9)),
    )?;

    let result = pipeline.compute_mask(&RgbImage::new(FRAME_WIDTH / 2, FRAME_HEIGHT));
    assert!(matches!(result, Err(SegmentationError::Precondition(_))));
    assert!(pipeline.mask().unwrap().pixels().all(|p| p.0[0] == 255));
    Ok(())
}

#[test]
fn unknown_model_is_reported_as_warning() -> anyhow::Result<()> {
    let sink = Arc::new(CollectingSink::default());
    let mut pipeline = MaskPipeline::new().with_debug_sink(sink.clone());
    pipeline.initialize_with_backend(
        config("mystery.onnx"),
        Box::new(ScriptedBackend::probability(0.9)),
    )?;
    pipeline.compute_mask(&grey_frame())?;

    let messages = sink.0.lock().unwrap();
    assert!(messages
        .iter()
        .any(|(level, msg)| *level == Level::WARN && msg.contains("mystery.onnx")));
    // debug output is off by default
    assert!(messages.iter().all(|(level, _)| *level != Level::DEBUG));
    Ok(())
}

#[test]
fn debug_flag_enables_diagnostics() -> anyhow::Result<()> {
    let sink = Arc::new(CollectingSink::default());
    let mut pipeline = MaskPipeline::new().with_debug_sink(sink.clone());
    let mut cfg = config("deeplabv3.onnx");
    cfg.debug = true;
    pipeline.initialize_with_backend(cfg, Box::new(ScriptedBackend::deeplab(0)))?;
    pipeline.shutdown();

    let messages = sink.0.lock().unwrap();
    assert!(messages
        .iter()
        .any(|(level, msg)| *level == Level::DEBUG && msg.contains("input tensor")));
    assert!(messages
        .iter()
        .any(|(_, msg)| msg.contains("dropping inference context")));
    Ok(())
}

#[test]
fn setup_errors_leave_no_session() {
    let mut pipeline = MaskPipeline::new();

    // a square input needs a 48-pixel wide region in a 40-pixel frame
    let narrow = SegmentationConfig::new("deeplabv3.onnx", 40, 48);
    let result = pipeline.initialize_with_backend(
        narrow,
        Box::new(ScriptedBackend::deeplab(DEEPLAB_PERSON_CLASS)),
    );
    assert!(matches!(result, Err(SegmentationError::InvalidConfig(_))));
    assert!(!pipeline.is_initialized());

    let grey_input = ScriptedBackend::new(
        TensorShape::new(16, 16, 1),
        TensorShape::new(8, 8, 1),
        vec![0.0; 64],
    );
    let result = pipeline.initialize_with_backend(config("selfie.onnx"), Box::new(grey_input));
    assert!(matches!(result, Err(SegmentationError::Precondition(_))));
    assert!(!pipeline.is_initialized());

    let mut even_blur = config("selfie.onnx");
    even_blur.tuning.blur_kernel = 4;
    let result = pipeline
        .initialize_with_backend(even_blur, Box::new(ScriptedBackend::probability(0.5)));
    assert!(matches!(result, Err(SegmentationError::InvalidConfig(_))));
}

#[test]
fn missing_model_file_fails_to_load() {
    let mut pipeline = MaskPipeline::new();
    let result = pipeline.initialize(config("/nonexistent/models/deeplabv3.onnx"));
    assert!(matches!(result, Err(SegmentationError::Load { .. })));
    assert!(!pipeline.is_initialized());
}
