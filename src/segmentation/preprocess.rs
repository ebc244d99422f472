use anyhow::{ensure, Context, Result};
use image::{imageops, RgbImage};
use ndarray::{Array4, ArrayD, ArrayViewD, Ix4};

/// Preprocessor for converting camera images to frame tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Preprocess an RGB image into a normalized NHWC frame tensor
    ///
    /// Steps:
    /// 1. Resize to the session resolution
    /// 2. Convert to float and normalize to [0, 1]
    ///
    /// Returns: Array4<f32> with shape [1, height, width, 3]
    pub fn frame_tensor(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if image.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            image
        };

        let (width, height) = source.dimensions();
        Array4::from_shape_fn((1, height as usize, width as usize, 3), |(_, y, x, c)| {
            source.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        })
    }
}

/// `[1, H, W, C]` → `[1, C, H, W]`, contiguous.
pub fn nhwc_to_nchw(view: ArrayViewD<'_, f32>) -> Result<Array4<f32>> {
    let view = view
        .into_dimensionality::<Ix4>()
        .context("expected a rank 4 NHWC tensor")?;
    Ok(view.permuted_axes([0, 3, 1, 2]).as_standard_layout().into_owned())
}

/// `[1, C, H, W]` → `[1, H, W, C]`, contiguous.
pub fn nchw_to_nhwc(view: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>> {
    let view = view
        .into_dimensionality::<Ix4>()
        .context("expected a rank 4 NCHW tensor")?;
    ensure!(view.shape()[0] == 1, "batch must be 1, got {}", view.shape()[0]);
    Ok(view
        .permuted_axes([0, 2, 3, 1])
        .as_standard_layout()
        .into_owned()
        .into_dyn())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn frame_tensor_is_normalized_nhwc() {
        let mut image = RgbImage::new(4, 2);
        image.put_pixel(3, 1, Rgb([255, 0, 51]));

        let tensor = Preprocessor::new(4, 2).frame_tensor(&image);
        assert_eq!(tensor.shape(), &[1, 2, 4, 3]);
        assert_eq!(tensor[[0, 1, 3, 0]], 1.0);
        assert_eq!(tensor[[0, 1, 3, 1]], 0.0);
        assert!((tensor[[0, 1, 3, 2]] - 0.2).abs() < 1e-6);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn frame_tensor_resizes_to_target() {
        let image = RgbImage::from_pixel(64, 48, Rgb([128, 128, 128]));
        let tensor = Preprocessor::new(32, 24).frame_tensor(&image);
        assert_eq!(tensor.shape(), &[1, 24, 32, 3]);
    }

    #[test]
    fn layout_conversions_invert_each_other() {
        let nhwc = Array4::from_shape_fn((1, 2, 3, 4), |(_, y, x, c)| (y * 100 + x * 10 + c) as f32);
        let nchw = nhwc_to_nchw(nhwc.view().into_dyn()).unwrap();
        assert_eq!(nchw.shape(), &[1, 4, 2, 3]);
        assert_eq!(nchw[[0, 3, 1, 2]], 123.0);

        let back = nchw_to_nhwc(nchw.view().into_dyn()).unwrap();
        assert_eq!(back, nhwc.into_dyn());
    }

    #[test]
    fn layout_rejects_wrong_rank() {
        let flat = ArrayD::<f32>::zeros(ndarray::IxDyn(&[3, 3]));
        assert!(nhwc_to_nchw(flat.view()).is_err());
        assert!(nchw_to_nhwc(flat.view()).is_err());
    }
}
