#![allow(dead_code)]

use backdrop::segmentation::{InferenceBackend, SegmentationError, TensorShape};
use image::{Rgb, RgbImage};
use ndarray::{ArrayView4, ArrayViewMut4};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub const FRAME_WIDTH: u32 = 64;
pub const FRAME_HEIGHT: u32 = 48;

/// Engine double producing a fixed output tensor
pub struct ScriptedBackend {
    pub input: TensorShape,
    pub output: TensorShape,
    pub values: Vec<f32>,
    pub fail: Arc<AtomicBool>,
    pub runs: Arc<AtomicUsize>,
    pub drops: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(input: TensorShape, output: TensorShape, values: Vec<f32>) -> Self {
        assert_eq!(values.len(), output.pixels() * output.channels);
        Self {
            input,
            output,
            values,
            fail: Arc::new(AtomicBool::new(false)),
            runs: Arc::new(AtomicUsize::new(0)),
            drops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 16x16 RGB input, 8x8 single-channel output with every pixel at `p`
    pub fn probability(p: f32) -> Self {
        let output = TensorShape::new(8, 8, 1);
        Self::new(TensorShape::new(16, 16, 3), output, vec![p; output.pixels()])
    }

    /// 16x16 RGB input, 8x8 DeepLab output where every pixel wins `class`
    pub fn deeplab(class: usize) -> Self {
        let output = TensorShape::new(8, 8, 21);
        let mut values = vec![0.0; output.pixels() * 21];
        for pixel in 0..output.pixels() {
            values[pixel * 21 + class] = 1.0;
        }
        Self::new(TensorShape::new(16, 16, 3), output, values)
    }

    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }
}

impl InferenceBackend for ScriptedBackend {
    fn input_shape(&self) -> TensorShape {
        self.input
    }

    fn output_shape(&self) -> TensorShape {
        self.output
    }

    fn run(
        &mut self,
        _input: ArrayView4<'_, f32>,
        mut output: ArrayViewMut4<'_, f32>,
    ) -> Result<(), SegmentationError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SegmentationError::Inference("scripted failure".into()));
        }
        for (dest, value) in output.iter_mut().zip(&self.values) {
            *dest = *value;
        }
        Ok(())
    }
}

impl Drop for ScriptedBackend {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn grey_frame() -> RgbImage {
    RgbImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Rgb([90, 120, 150]))
}
