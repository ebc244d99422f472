use anyhow::{ensure, Result};
use image::{Rgba, RgbaImage};

use super::nhwc_view;
use crate::tensor::Tensor;

/// Number of side-by-side bands in a hidden-state mosaic.
const BANDS: usize = 4;

/// Map a tanh-range activation to an 8-bit grey level.
///
/// Rounds to nearest, so 0.0 maps to 128 rather than the truncated 127.
pub fn hidden_intensity(value: f32) -> u8 {
    ((value + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8
}

/// Tile every channel of a `[1, H, W, C]` hidden state into one grey image.
///
/// Channels are split into 4 equal bands. Within a band the `C / 4` channel
/// maps are stacked top to bottom; the bands sit left to right. The result is
/// `4W` wide and `H * C / 4` tall, fully opaque.
pub fn render_hidden(state: &Tensor) -> Result<RgbaImage> {
    let view = nhwc_view(state, 0, "hidden state")?;
    let (_, height, width, channels) = view.dim();
    ensure!(
        channels > 0 && channels % BANDS == 0,
        "hidden state channels must be a non-zero multiple of {BANDS}, got {channels}"
    );
    ensure!(height > 0 && width > 0, "hidden state has empty spatial size");

    let per_band = channels / BANDS;
    let out_width = (width * BANDS) as u32;
    let out_height = (height * per_band) as u32;

    Ok(RgbaImage::from_fn(out_width, out_height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let channel = (x / width) * per_band + y / height;
        let v = hidden_intensity(view[[0, y % height, x % width, channel]]);
        Rgba([v, v, v, 255])
    }))
}
