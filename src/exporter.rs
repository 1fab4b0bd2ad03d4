use anyhow::Result;
use image::{Rgba, RgbaImage};
use tracing::{debug, info};

use crate::candidates::Candidate;
use crate::error::CaptureError;
use crate::mask_ops;

/// Output destinations for the ranked candidate set. Paths are templated by
/// rank index: `{prefix}_{rank}.png`.
#[derive(Clone, Debug, Default)]
pub struct ExportConfig {
    pub objects_prefix: Option<String>,
    pub masks_prefix: Option<String>,
    /// Connected components smaller than this are treated as noise.
    pub min_size: u32,
}

/// Cleans and writes the kept candidates in rank order. Returns the number of
/// object images written.
pub fn export(candidates: &mut [Candidate], config: &ExportConfig) -> Result<usize> {
    let mut written = 0;

    for (rank, candidate) in candidates.iter_mut().enumerate() {
        info!(
            "Candidate {}: frame {} with score {}",
            rank, candidate.frame_index, candidate.score
        );

        if config.min_size > 0 {
            remove_small_components(candidate, config.min_size);
        }

        let object = compose_rgba(candidate);

        if let Some(prefix) = &config.objects_prefix {
            let path = format!("{}_{}.png", prefix, rank);
            info!("Writing object to {}", path);
            object.save(&path).map_err(|source| CaptureError::ImageWrite {
                path: path.into(),
                source,
            })?;
            written += 1;
        }
        if let Some(prefix) = &config.masks_prefix {
            let path = format!("{}_{}.png", prefix, rank);
            info!("Writing mask to {}", path);
            candidate
                .raw_mask
                .save(&path)
                .map_err(|source| CaptureError::ImageWrite {
                    path: path.into(),
                    source,
                })?;
        }
    }

    Ok(written)
}

/// Zeroes every connected component smaller than `min_size` in the binary
/// mask and the extracted image. The background component is left alone.
pub fn remove_small_components(candidate: &mut Candidate, min_size: u32) {
    let components = mask_ops::connected_components(&candidate.mask);
    let doomed: Vec<bool> = components
        .sizes
        .iter()
        .enumerate()
        .map(|(label, &size)| label != 0 && size < min_size)
        .collect();

    let removed = doomed.iter().filter(|&&d| d).count();
    if removed == 0 {
        return;
    }
    debug!("Removing {} noise components below {} pixels", removed, min_size);

    let width = components.width;
    for (i, &label) in components.labels.iter().enumerate() {
        if doomed[label as usize] {
            let (x, y) = (i as u32 % width, i as u32 / width);
            candidate.mask.put_pixel(x, y, image::Luma([0]));
            candidate.extracted.put_pixel(x, y, image::Rgb([0, 0, 0]));
        }
    }
    candidate.score = mask_ops::count_nonzero(&candidate.mask);
}

/// 4-channel compose: extracted color plus the cleaned binary mask as alpha.
fn compose_rgba(candidate: &Candidate) -> RgbaImage {
    RgbaImage::from_fn(candidate.mask.width(), candidate.mask.height(), |x, y| {
        let c = candidate.extracted.get_pixel(x, y);
        let a = candidate.mask.get_pixel(x, y)[0];
        Rgba([c[0], c[1], c[2], a])
    })
}
