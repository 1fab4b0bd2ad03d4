use anyhow::Result;
use image::{GrayImage, Rgb, RgbImage};
use tracing::{debug, info};

use crate::background::{BackgroundModel, SHADOW_LABEL};
use crate::candidates::Candidate;
use crate::error::CaptureError;
use crate::mask_ops::{self, FillOutcome};

/// Mask post-processing knobs, one per configuration flag.
#[derive(Clone, Debug)]
pub struct SegmenterConfig {
    pub blur: u32,
    pub min_size: u32,
    pub remove_shadows: bool,
    pub fill_holes: bool,
    pub use_contour: bool,
    /// When set, the simplified contour mask of frame `i` is written to
    /// `{prefix}_{i}.png`.
    pub contours_prefix: Option<String>,
}

/// Per-frame background subtraction plus mask post-processing. The background
/// model is shared, incrementally updated state owned by the caller.
pub fn segment_frame(
    model: &mut BackgroundModel,
    frame: &RgbImage,
    frame_index: usize,
    config: &SegmenterConfig,
) -> Result<Candidate> {
    let (width, height) = frame.dimensions();
    let surface = width * height;

    let raw_mask = model.apply(frame);
    let mut mask = raw_mask.clone();

    if config.remove_shadows {
        for pixel in mask.pixels_mut() {
            if pixel.0[0] == SHADOW_LABEL {
                pixel.0[0] = 0;
            }
        }
    }

    // The blur spreads surviving foreground into pixels lost to noise; the
    // threshold then folds anything touched back into the mask.
    if config.blur > 0 {
        mask = mask_ops::box_blur(&mask, config.blur);
    }
    mask = mask_ops::threshold_binary(&mask, 0);

    let mut score = mask_ops::count_nonzero(&mask);
    debug!("Frame {}: starting with a score of {}", frame_index, score);

    if config.fill_holes && score != surface {
        match mask_ops::fill_holes(&mask) {
            FillOutcome::Filled { mask: filled, score: filled_score } => {
                mask = filled;
                score = filled_score;
                debug!("Frame {}: hole fill improved score to {}", frame_index, score);
            }
            FillOutcome::NoSeedCorner => {
                debug!("Frame {}: hole fill skipped, no background corner to seed", frame_index);
            }
            FillOutcome::Overfilled => {
                debug!("Frame {}: hole fill rejected, result overfilled", frame_index);
            }
            FillOutcome::NoBackgroundCorner => {
                debug!("Frame {}: hole fill rejected, no background corner left", frame_index);
            }
        }
    }

    if config.use_contour {
        mask = mask_ops::simplify_to_hulls(&mask, config.min_size);
        score = mask_ops::count_nonzero(&mask);

        if let Some(prefix) = &config.contours_prefix {
            let path = format!("{}_{}.png", prefix, frame_index);
            info!("Writing contours to {}", path);
            mask.save(&path).map_err(|source| CaptureError::ImageWrite {
                path: path.into(),
                source,
            })?;
        }
    }

    let color_mask = broadcast_mask(&mask);
    let extracted = apply_mask(frame, &mask);

    Ok(Candidate {
        score,
        color_mask,
        mask,
        raw_mask,
        extracted,
        frame_index,
    })
}

fn broadcast_mask(mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| {
        let v = mask.get_pixel(x, y)[0];
        Rgb([v, v, v])
    })
}

/// Pixelwise AND of the broadcast mask with the color frame.
fn apply_mask(frame: &RgbImage, mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let m = mask.get_pixel(x, y)[0];
        let p = frame.get_pixel(x, y);
        Rgb([p[0] & m, p[1] & m, p[2] & m])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SegmenterConfig {
        SegmenterConfig {
            blur: 0,
            min_size: 0,
            remove_shadows: false,
            fill_holes: false,
            use_contour: false,
            contours_prefix: None,
        }
    }

    fn warmed_up_model(background: &RgbImage) -> BackgroundModel {
        let mut model = BackgroundModel::new(background.width(), background.height());
        for _ in 0..60 {
            model.apply(background);
        }
        model
    }

    #[test]
    fn score_stays_within_surface() {
        let background = RgbImage::from_pixel(8, 8, Rgb([20, 20, 20]));
        let mut model = warmed_up_model(&background);
        let candidate = segment_frame(&mut model, &background, 0, &config()).unwrap();
        assert!(candidate.score <= 64);
    }

    #[test]
    fn new_object_scores_near_its_area() {
        let background = RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]));
        let mut model = warmed_up_model(&background);

        let mut with_object = background.clone();
        for y in 4..8 {
            for x in 4..8 {
                with_object.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let candidate = segment_frame(&mut model, &with_object, 0, &config()).unwrap();
        assert_eq!(candidate.score, 16);
        assert_eq!(candidate.mask.get_pixel(5, 5)[0], 255);
        assert_eq!(candidate.extracted.get_pixel(5, 5), &Rgb([255, 255, 255]));
        assert_eq!(candidate.extracted.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn shadow_removal_drops_shadow_label() {
        let background = RgbImage::from_pixel(4, 4, Rgb([200, 200, 200]));
        let mut model = warmed_up_model(&background);

        let shadowed = RgbImage::from_pixel(4, 4, Rgb([100, 100, 100]));
        let mut cfg = config();
        cfg.remove_shadows = true;
        let candidate = segment_frame(&mut model, &shadowed, 0, &cfg).unwrap();
        assert_eq!(candidate.score, 0);

        // Without removal the shadow pixels binarize to foreground.
        let mut model = warmed_up_model(&background);
        let candidate = segment_frame(&mut model, &shadowed, 0, &config()).unwrap();
        assert_eq!(candidate.score, 16);
    }

    #[test]
    fn raw_mask_is_preserved_before_postprocessing() {
        let background = RgbImage::from_pixel(6, 6, Rgb([50, 50, 50]));
        let mut model = warmed_up_model(&background);
        let mut cfg = config();
        cfg.blur = 3;
        let mut with_dot = background.clone();
        with_dot.put_pixel(3, 3, Rgb([255, 255, 255]));
        let candidate = segment_frame(&mut model, &with_dot, 0, &cfg).unwrap();
        // Raw mask keeps the single-pixel detection; blur spread the final one.
        assert_eq!(candidate.raw_mask.get_pixel(3, 3)[0], 255);
        assert!(candidate.score > 1);
    }
}
