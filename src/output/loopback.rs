use super::OutputSink;
use anyhow::{bail, Context, Result};
use image::RgbImage;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// v4l2loopback virtual camera fed with YUYV frames
pub struct V4L2Output {
    _device: Device,
    file: File,
    width: u32,
    height: u32,
    yuyv: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        check_width(width)?;
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let requested = Format::new(width, height, FourCC::new(b"YUYV"));
        let actual = Output::set_format(&device, &requested)
            .context("Failed to set YUYV output format")?;
        if (actual.width, actual.height) != (width, height) {
            tracing::warn!(
                "Loopback device accepted {}x{} instead of {}x{}",
                actual.width,
                actual.height,
                width,
                height
            );
        }

        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        Ok(Self {
            _device: device,
            file,
            width,
            height,
            yuyv: Vec::with_capacity((width * height * 2) as usize),
        })
    }
}

/// YUYV shares chroma between horizontal pixel pairs
fn check_width(width: u32) -> Result<()> {
    if width == 0 || width % 2 != 0 {
        bail!("YUYV output needs a positive even width, got {width}");
    }
    Ok(())
}

/// Pack RGB pixels pairwise into YUYV 4:2:2; the width must be even
fn pack_yuyv(frame: &RgbImage, out: &mut Vec<u8>) {
    out.clear();
    for pair in frame.as_raw().chunks_exact(6) {
        let (y0, u0, v0) = yuv([pair[0], pair[1], pair[2]]);
        let (y1, u1, v1) = yuv([pair[3], pair[4], pair[5]]);
        out.extend_from_slice(&[y0, ((u0 + u1) / 2) as u8, y1, ((v0 + v1) / 2) as u8]);
    }
}

/// Full-range BT.601 in 8.8 fixed point
fn yuv([r, g, b]: [u8; 3]) -> (u8, i32, i32) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = (77 * r + 150 * g + 29 * b + 128) >> 8;
    let u = ((-43 * r - 85 * g + 128 * b + 128) >> 8) + 128;
    let v = ((128 * r - 107 * g - 21 * b + 128) >> 8) + 128;
    (y.clamp(0, 255) as u8, u.clamp(0, 255), v.clamp(0, 255))
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let resized;
        let frame = if frame.dimensions() != (self.width, self.height) {
            resized = image::imageops::resize(
                frame,
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            );
            &resized
        } else {
            frame
        };

        pack_yuyv(frame, &mut self.yuyv);
        self.file
            .write_all(&self.yuyv)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
