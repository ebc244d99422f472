//! Turn inference outputs into displayable RGBA frames.

mod mosaic;

pub use mosaic::{hidden_intensity, render_hidden};

use std::fmt;

use anyhow::{bail, ensure, Context, Result};
use image::{Rgb, Rgba, RgbaImage};
use ndarray::{ArrayView4, Ix4};

use crate::state::RecurrentState;
use crate::tensor::Tensor;

/// What the display shows each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum ViewMode {
    /// Foreground and alpha over a white backdrop
    #[default]
    #[value(name = "plain-white")]
    PlainWhite,
    /// Foreground and alpha over a green backdrop
    #[value(name = "plain-green")]
    PlainGreen,
    /// Alpha matte as a white silhouette
    #[value(name = "alpha-only")]
    AlphaOnly,
    /// Foreground colour, fully opaque
    #[value(name = "foreground-only")]
    ForegroundOnly,
    #[value(name = "hidden-1")]
    Hidden1,
    #[value(name = "hidden-2")]
    Hidden2,
    #[value(name = "hidden-3")]
    Hidden3,
    #[value(name = "hidden-4")]
    Hidden4,
}

/// Colour the output surface shows behind the rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backdrop {
    Solid(Rgb<u8>),
    Transparent,
}

impl ViewMode {
    pub const ALL: [ViewMode; 8] = [
        ViewMode::PlainWhite,
        ViewMode::PlainGreen,
        ViewMode::AlphaOnly,
        ViewMode::ForegroundOnly,
        ViewMode::Hidden1,
        ViewMode::Hidden2,
        ViewMode::Hidden3,
        ViewMode::Hidden4,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ViewMode::PlainWhite => "plain-white",
            ViewMode::PlainGreen => "plain-green",
            ViewMode::AlphaOnly => "alpha-only",
            ViewMode::ForegroundOnly => "foreground-only",
            ViewMode::Hidden1 => "hidden-1",
            ViewMode::Hidden2 => "hidden-2",
            ViewMode::Hidden3 => "hidden-3",
            ViewMode::Hidden4 => "hidden-4",
        }
    }

    pub fn backdrop(self) -> Backdrop {
        match self {
            ViewMode::PlainWhite => Backdrop::Solid(Rgb([255, 255, 255])),
            ViewMode::PlainGreen => Backdrop::Solid(Rgb([120, 255, 155])),
            ViewMode::AlphaOnly => Backdrop::Solid(Rgb([0, 0, 0])),
            ViewMode::ForegroundOnly
            | ViewMode::Hidden1
            | ViewMode::Hidden2
            | ViewMode::Hidden3
            | ViewMode::Hidden4 => Backdrop::Transparent,
        }
    }

    /// Zero-based hidden state index for the mosaic modes.
    pub fn hidden_index(self) -> Option<usize> {
        match self {
            ViewMode::Hidden1 => Some(0),
            ViewMode::Hidden2 => Some(1),
            ViewMode::Hidden3 => Some(2),
            ViewMode::Hidden4 => Some(3),
            _ => None,
        }
    }

    /// Hand each output to whoever needs it under this mode.
    ///
    /// The returned source carries exactly what the renderer will consume.
    /// Outputs the mode does not display come back in `unused` for the caller
    /// to release. Hidden states are only borrowed: they still belong to the
    /// caller and move into the recurrent store afterwards.
    pub fn route<'a>(self, fgr: Tensor, pha: Tensor, next: &'a RecurrentState) -> Routed<'a> {
        match self {
            ViewMode::PlainWhite | ViewMode::PlainGreen => Routed {
                source: RenderSource::Matte { fgr, pha },
                unused: Vec::new(),
            },
            ViewMode::AlphaOnly => Routed {
                source: RenderSource::Alpha { pha },
                unused: vec![fgr],
            },
            ViewMode::ForegroundOnly => Routed {
                source: RenderSource::Foreground { fgr },
                unused: vec![pha],
            },
            ViewMode::Hidden1 | ViewMode::Hidden2 | ViewMode::Hidden3 | ViewMode::Hidden4 => {
                let index = self.hidden_index().unwrap_or_default();
                Routed {
                    source: RenderSource::Hidden {
                        state: next.get(index),
                    },
                    unused: vec![fgr, pha],
                }
            }
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tensors the renderer needs for one frame.
#[derive(Debug)]
pub enum RenderSource<'a> {
    Matte { fgr: Tensor, pha: Tensor },
    Alpha { pha: Tensor },
    Foreground { fgr: Tensor },
    Hidden { state: &'a Tensor },
}

/// Result of [`ViewMode::route`].
#[derive(Debug)]
pub struct Routed<'a> {
    pub source: RenderSource<'a>,
    pub unused: Vec<Tensor>,
}

/// Render one frame. Owned tensors in `source` are released on return.
pub fn render(source: RenderSource<'_>) -> Result<RgbaImage> {
    let _span = tracing::debug_span!("render").entered();

    match source {
        RenderSource::Matte { fgr, pha } => render_matte(Some(&fgr), Some(&pha)),
        RenderSource::Alpha { pha } => render_matte(None, Some(&pha)),
        RenderSource::Foreground { fgr } => render_matte(Some(&fgr), None),
        RenderSource::Hidden { state } => render_hidden(state),
    }
}

/// Convert a unit-range value to an 8-bit channel.
pub fn unit_to_u8(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

fn render_matte(fgr: Option<&Tensor>, pha: Option<&Tensor>) -> Result<RgbaImage> {
    let fgr = fgr.map(|t| nhwc_view(t, 3, "fgr")).transpose()?;
    let pha = pha.map(|t| nhwc_view(t, 1, "pha")).transpose()?;

    let (height, width) = match (&fgr, &pha) {
        (Some(f), Some(p)) => {
            let fdim = (f.shape()[1], f.shape()[2]);
            let pdim = (p.shape()[1], p.shape()[2]);
            ensure!(
                fdim == pdim,
                "fgr is {}x{} but pha is {}x{}",
                fdim.1,
                fdim.0,
                pdim.1,
                pdim.0
            );
            fdim
        }
        (Some(f), None) => (f.shape()[1], f.shape()[2]),
        (None, Some(p)) => (p.shape()[1], p.shape()[2]),
        (None, None) => bail!("nothing to render"),
    };

    Ok(RgbaImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = match &fgr {
            Some(f) => [0, 1, 2].map(|c| unit_to_u8(f[[0, y, x, c]])),
            None => [255, 255, 255],
        };
        let a = match &pha {
            Some(p) => unit_to_u8(p[[0, y, x, 0]]),
            None => 255,
        };
        Rgba([r, g, b, a])
    }))
}

/// View `tensor` as `[1, H, W, channels]`.
pub(crate) fn nhwc_view<'a>(
    tensor: &'a Tensor,
    channels: usize,
    name: &str,
) -> Result<ArrayView4<'a, f32>> {
    let view = tensor
        .view()
        .into_dimensionality::<Ix4>()
        .with_context(|| format!("{name} must be rank 4, got shape {:?}", tensor.shape()))?;

    let shape = view.shape();
    ensure!(shape[0] == 1, "{name} batch must be 1, got {}", shape[0]);
    if channels > 0 {
        ensure!(
            shape[3] == channels,
            "{name} must have {channels} channels, got {}",
            shape[3]
        );
    }
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorLedger;
    use clap::ValueEnum;
    use ndarray::Array4;

    fn next_state(ledger: &TensorLedger) -> RecurrentState {
        RecurrentState::new(
            ledger.track(Array4::<f32>::zeros((1, 4, 4, 4))),
            ledger.track(Array4::<f32>::zeros((1, 2, 2, 8))),
            ledger.track(Array4::<f32>::zeros((1, 2, 2, 12))),
            ledger.track(Array4::<f32>::zeros((1, 1, 1, 16))),
        )
    }

    #[test]
    fn alpha_only_renders_white_silhouette() {
        let ledger = TensorLedger::new();
        let pha = ledger.track(Array4::from_elem((1, 3, 5, 1), 0.5f32));

        let image = render(RenderSource::Alpha { pha }).unwrap();
        assert_eq!(image.dimensions(), (5, 3));
        for pixel in image.pixels() {
            assert_eq!(pixel.0, [255, 255, 255, 128]);
        }
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn foreground_only_is_opaque() {
        let ledger = TensorLedger::new();
        let mut data = Array4::<f32>::zeros((1, 2, 2, 3));
        data[[0, 1, 0, 0]] = 1.0;
        data[[0, 1, 0, 2]] = 0.2;
        let fgr = ledger.track(data);

        let image = render(RenderSource::Foreground { fgr }).unwrap();
        assert_eq!(image.get_pixel(0, 1).0, [255, 0, 51, 255]);
        assert_eq!(image.get_pixel(1, 1).0, [0, 0, 0, 255]);
    }

    #[test]
    fn matte_combines_colour_and_alpha() {
        let ledger = TensorLedger::new();
        let fgr = ledger.track(Array4::from_elem((1, 2, 3, 3), 1.0f32));
        let pha = ledger.track(Array4::from_elem((1, 2, 3, 1), 0.0f32));

        let image = render(RenderSource::Matte { fgr, pha }).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(2, 1).0, [255, 255, 255, 0]);
    }

    #[test]
    fn matte_rejects_mismatched_sizes() {
        let ledger = TensorLedger::new();
        let fgr = ledger.track(Array4::<f32>::zeros((1, 2, 3, 3)));
        let pha = ledger.track(Array4::<f32>::zeros((1, 4, 3, 1)));

        assert!(render(RenderSource::Matte { fgr, pha }).is_err());
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn route_hands_unused_outputs_back() {
        let ledger = TensorLedger::new();
        let next = next_state(&ledger);

        for mode in ViewMode::ALL {
            let fgr = ledger.track(Array4::<f32>::zeros((1, 4, 4, 3)));
            let pha = ledger.track(Array4::<f32>::zeros((1, 4, 4, 1)));
            let Routed { source, unused } = mode.route(fgr, pha, &next);

            let expected_unused = match mode {
                ViewMode::PlainWhite | ViewMode::PlainGreen => 0,
                ViewMode::AlphaOnly | ViewMode::ForegroundOnly => 1,
                _ => 2,
            };
            assert_eq!(unused.len(), expected_unused, "{mode}");
            ledger.release_all(unused);
            render(source).unwrap();
        }

        // only the borrowed hidden states remain
        assert_eq!(ledger.outstanding(), 4);
    }

    #[test]
    fn hidden_modes_borrow_the_selected_state() {
        let ledger = TensorLedger::new();
        let next = next_state(&ledger);
        let fgr = ledger.track(Array4::<f32>::zeros((1, 4, 4, 3)));
        let pha = ledger.track(Array4::<f32>::zeros((1, 4, 4, 1)));

        let routed = ViewMode::Hidden3.route(fgr, pha, &next);
        match routed.source {
            RenderSource::Hidden { state } => assert_eq!(state.shape(), &[1, 2, 2, 12]),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn mode_names_parse() {
        for mode in ViewMode::ALL {
            assert_eq!(ViewMode::from_str(mode.as_str(), false), Ok(mode));
        }
        assert_eq!(ViewMode::default(), ViewMode::PlainWhite);
    }

    #[test]
    fn backdrops_follow_mode() {
        assert_eq!(
            ViewMode::PlainGreen.backdrop(),
            Backdrop::Solid(Rgb([120, 255, 155]))
        );
        assert_eq!(ViewMode::AlphaOnly.backdrop(), Backdrop::Solid(Rgb([0, 0, 0])));
        assert_eq!(ViewMode::Hidden2.backdrop(), Backdrop::Transparent);
    }
}
