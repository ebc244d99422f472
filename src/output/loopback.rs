use super::{composite, DisplaySurface};
use crate::render::Backdrop;
use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{imageops, RgbImage, RgbaImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        // Announce the frame format so readers of the loopback device agree
        // with the raw YUYV frames written below
        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let requested = Format::new(width, height, FourCC::new(b"YUYV"));
        let applied = Output::set_format(&device, &requested)
            .context("Failed to set v4l2loopback output format")?;
        if applied.width != width || applied.height != height {
            tracing::warn!(
                "v4l2loopback accepted {}x{} instead of {}x{}",
                applied.width,
                applied.height,
                width,
                height
            );
        }

        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            width: applied.width,
            height: applied.height,
        })
    }
}

/// Convert an RGB frame to packed YUV 4:2:2 (YUYV)
fn rgb_to_yuyv(rgb_image: &RgbImage) -> Vec<u8> {
    let (width, height) = rgb_image.dimensions();
    let mut yuyv = Vec::with_capacity((width * height * 2) as usize);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let left = rgb_image.get_pixel(x, y);
            let right = if x + 1 < width {
                rgb_image.get_pixel(x + 1, y)
            } else {
                left
            };

            let (y0, u0, v0) = rgb_to_yuv(left.0);
            let (y1, u1, v1) = rgb_to_yuv(right.0);

            // chroma is shared by the pixel pair
            yuyv.extend_from_slice(&[
                y0,
                ((u0 as u16 + u1 as u16) / 2) as u8,
                y1,
                ((v0 as u16 + v1 as u16) / 2) as u8,
            ]);
        }
    }

    yuyv
}

/// BT.601 RGB to YUV
fn rgb_to_yuv([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

#[async_trait(?Send)]
impl DisplaySurface for V4L2Output {
    async fn present(&mut self, frame: &RgbaImage, backdrop: Backdrop) -> Result<()> {
        let _span = tracing::debug_span!("present").entered();

        let flat = composite(frame, backdrop);
        let flat = if flat.dimensions() != (self.width, self.height) {
            imageops::resize(&flat, self.width, self.height, imageops::FilterType::Triangle)
        } else {
            flat
        };

        self.file
            .write_all(&rgb_to_yuyv(&flat))
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
