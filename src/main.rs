use anyhow::{Context, Result};
use backdrop::background::{self, Background};
use backdrop::capture::{CaptureSource, WebcamCapture};
use backdrop::output::{OutputSink, V4L2Output};
use backdrop::segmentation::{
    BilateralParams, ChannelOrder, FrameObserver, MaskPipeline, MaskTuning, SegmentationConfig,
};
use clap::Parser;
use image::Rgb;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Segmentation model (ONNX). The family is taken from the file name:
    /// body-pix, deeplab, segm_ (Google Meet) or selfie
    #[arg(short, long)]
    model: PathBuf,

    /// Inference worker threads
    #[arg(short, long, default_value_t = 2)]
    threads: usize,

    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Frame width
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Frame height
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Replacement background image; solid green when omitted
    #[arg(short, long)]
    background: Option<PathBuf>,

    /// Show the mask instead of the composited video
    #[arg(long)]
    show_mask: bool,

    /// Skip bilateral denoising before inference
    #[arg(long)]
    no_denoise: bool,

    /// Person probability threshold for single-channel models
    #[arg(long, default_value_t = 0.65)]
    threshold: f32,

    /// Disable FP16 execution providers
    #[arg(long)]
    full_precision: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn segmentation_config(&self) -> SegmentationConfig {
        SegmentationConfig {
            threads: self.threads,
            debug: self.debug,
            // nokhwa decodes to RGB
            channel_order: ChannelOrder::Rgb,
            reduced_precision: !self.full_precision,
            tuning: MaskTuning {
                probability_threshold: self.threshold,
                denoise: (!self.no_denoise).then(BilateralParams::default),
                ..MaskTuning::default()
            },
            ..SegmentationConfig::new(&self.model, self.width, self.height)
        }
    }
}

/// Accumulates time spent in each pipeline stage
#[derive(Default)]
struct StageTimer {
    mark: Option<Instant>,
    preprocess: Duration,
    inference: Duration,
    decode: Duration,
}

impl StageTimer {
    fn start(&mut self) {
        self.mark = Some(Instant::now());
    }

    fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = self.mark.map(|m| now - m).unwrap_or_default();
        self.mark = Some(now);
        elapsed
    }
}

impl FrameObserver for StageTimer {
    fn on_preprocessed(&mut self) {
        self.preprocess += self.lap();
    }

    fn on_inferred(&mut self) {
        self.inference += self.lap();
    }

    fn on_mask_decoded(&mut self) {
        self.decode += self.lap();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Backdrop starting");
    tracing::info!("Frames: {}x{} at {} fps", args.width, args.height, args.fps);

    let mut capture = WebcamCapture::new(args.input_device, args.width, args.height)
        .context("Failed to initialize webcam capture")?;

    let mut output = V4L2Output::new(&args.output_device, args.width, args.height)
        .context("Failed to initialize v4l2loopback output")?;

    let background = match &args.background {
        Some(path) => Background::load(path, args.width, args.height)?,
        None => Background::Solid(Rgb([0, 177, 64])),
    };

    let mut pipeline = MaskPipeline::new();
    pipeline
        .initialize(args.segmentation_config())
        .context("Failed to load segmentation model")?;
    if let Some(family) = pipeline.family() {
        tracing::info!("Segmentation model loaded ({})", family);
    }

    run_pipeline(
        &mut capture,
        &mut output,
        &mut pipeline,
        &background,
        args.fps,
        args.show_mask,
    )?;

    pipeline.shutdown();
    Ok(())
}

fn run_pipeline<C, O>(
    capture: &mut C,
    output: &mut O,
    pipeline: &mut MaskPipeline,
    background: &Background,
    target_fps: u32,
    show_mask: bool,
) -> Result<()>
where
    C: CaptureSource,
    O: OutputSink,
{
    let frame_duration = Duration::from_secs_f32(1.0 / target_fps.max(1) as f32);
    let mut frame_count = 0u64;
    let mut stages = StageTimer::default();
    let mut total_capture_time = Duration::ZERO;
    let mut total_composite_time = Duration::ZERO;
    let mut total_output_time = Duration::ZERO;

    tracing::info!("Starting main pipeline loop, show_mask={}", show_mask);
    tracing::info!("Press Ctrl+C to stop");

    loop {
        let loop_start = Instant::now();

        let frame = capture
            .capture_frame()
            .context("Failed to capture frame")?;
        total_capture_time += loop_start.elapsed();

        stages.start();
        let mask = pipeline
            .compute_mask_with(&frame, &mut stages)
            .context("Failed to compute mask")?;

        let composite_start = Instant::now();
        let output_frame = if show_mask {
            background::mask_preview(mask)
        } else {
            background::composite(&frame, background, mask)?
        };
        total_composite_time += composite_start.elapsed();

        let output_start = Instant::now();
        output
            .write_frame(&output_frame)
            .context("Failed to write frame")?;
        total_output_time += output_start.elapsed();

        frame_count += 1;

        if frame_count % 30 == 0 {
            let avg_ms = |total: Duration| total.as_secs_f64() * 1000.0 / frame_count as f64;
            let parts = [
                avg_ms(total_capture_time),
                avg_ms(stages.preprocess),
                avg_ms(stages.inference),
                avg_ms(stages.decode),
                avg_ms(total_composite_time),
                avg_ms(total_output_time),
            ];
            let total_ms: f64 = parts.iter().sum();

            tracing::info!(
                "Frame {}: capture={:.1}ms, prep={:.1}ms, infer={:.1}ms, decode={:.1}ms, composite={:.1}ms, output={:.1}ms, fps={:.1}",
                frame_count,
                parts[0],
                parts[1],
                parts[2],
                parts[3],
                parts[4],
                parts[5],
                1000.0 / total_ms
            );
        }

        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }
}
