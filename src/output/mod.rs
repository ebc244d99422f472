mod loopback;

pub use loopback::V4L2Output;

use crate::render::{unit_to_u8, Backdrop};
use anyhow::Result;
use async_trait::async_trait;
use image::{Rgb, RgbImage, RgbaImage};

/// Trait for display destinations
#[async_trait(?Send)]
pub trait DisplaySurface {
    /// Show a rendered frame over `backdrop`
    async fn present(&mut self, frame: &RgbaImage, backdrop: Backdrop) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);
}

/// Flatten an RGBA frame over its backdrop.
///
/// Surfaces without an alpha channel show a transparent backdrop as black.
pub fn composite(frame: &RgbaImage, backdrop: Backdrop) -> RgbImage {
    let Rgb(bg) = match backdrop {
        Backdrop::Solid(color) => color,
        Backdrop::Transparent => Rgb([0, 0, 0]),
    };

    RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let [r, g, b, a] = frame.get_pixel(x, y).0;
        let alpha = a as f32 / 255.0;
        let blend = |fg: u8, bg: u8| unit_to_u8((fg as f32 * alpha + bg as f32 * (1.0 - alpha)) / 255.0);
        Rgb([blend(r, bg[0]), blend(g, bg[1]), blend(b, bg[2])])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn opaque_pixels_ignore_backdrop() {
        let frame = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255]));
        let out = composite(&frame, Backdrop::Solid(Rgb([120, 255, 155])));
        assert_eq!(out.get_pixel(1, 1).0, [10, 20, 30]);
    }

    #[test]
    fn transparent_pixels_show_backdrop() {
        let frame = RgbaImage::from_pixel(1, 1, Rgba([255, 0, 0, 0]));
        let green = composite(&frame, Backdrop::Solid(Rgb([120, 255, 155])));
        assert_eq!(green.get_pixel(0, 0).0, [120, 255, 155]);

        let black = composite(&frame, Backdrop::Transparent);
        assert_eq!(black.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn half_alpha_blends() {
        let frame = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 128]));
        let out = composite(&frame, Backdrop::Solid(Rgb([0, 0, 0])));
        assert_eq!(out.get_pixel(0, 0).0, [128, 128, 128]);
    }
}
