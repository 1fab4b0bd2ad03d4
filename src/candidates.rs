use image::{GrayImage, RgbImage};
use tracing::debug;

/// One stabilized-and-segmented frame, eligible for ranking and export.
pub struct Candidate {
    /// Foreground pixel count of the final binary mask.
    pub score: u32,
    /// The binary mask broadcast to three channels.
    pub color_mask: RgbImage,
    /// Final binary mask (0/255).
    pub mask: GrayImage,
    /// Raw background-model output, before any post-processing.
    pub raw_mask: GrayImage,
    /// The color frame with everything outside the mask zeroed.
    pub extracted: RgbImage,
    /// Index of the source frame within the stabilized sequence.
    pub frame_index: usize,
}

/// Filters and ranks segmented frames, keeping the top `keep` by score.
///
/// A full-surface score means the background model flagged the whole image as
/// foreground; such frames are only trusted past the warm-up portion of the
/// sequence (or as the very last frame). Zero-score frames carry no object
/// and are never kept.
pub fn select(
    mut segmented: Vec<Candidate>,
    surface: u32,
    warmup_fraction: f64,
    keep: usize,
) -> Vec<Candidate> {
    let total = segmented.len();
    let warmup_end = total as f64 * warmup_fraction;

    segmented.retain(|c| {
        if c.score == 0 {
            return false;
        }
        c.score != surface || c.frame_index as f64 > warmup_end || c.frame_index + 1 == total
    });
    debug!("{}/{} frames survived the surface guard", segmented.len(), total);

    // Stable sort keeps earlier frames ahead on ties.
    segmented.sort_by(|a, b| b.score.cmp(&a.score));
    segmented.truncate(keep);
    segmented
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(score: u32, frame_index: usize) -> Candidate {
        Candidate {
            score,
            color_mask: RgbImage::new(1, 1),
            mask: GrayImage::new(1, 1),
            raw_mask: GrayImage::new(1, 1),
            extracted: RgbImage::new(1, 1),
            frame_index,
        }
    }

    #[test]
    fn ranked_by_descending_score_and_truncated() {
        let all = vec![candidate(5, 0), candidate(20, 1), candidate(10, 2), candidate(15, 3)];
        let kept = select(all, 100, 0.9, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 20);
        assert_eq!(kept[1].score, 15);
    }

    #[test]
    fn ties_keep_original_order() {
        let all = vec![candidate(10, 0), candidate(10, 1), candidate(10, 2)];
        let kept = select(all, 100, 0.9, 3);
        let indices: Vec<usize> = kept.iter().map(|c| c.frame_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn full_surface_scores_rejected_before_warmup() {
        let surface = 100;
        // 8 frames all claiming the whole surface; warm-up cutoff is 7.2.
        let all: Vec<Candidate> = (0..8).map(|i| candidate(surface, i)).collect();
        let kept = select(all, surface, 0.9, 3);
        // Indices 0..7 of 8 frames: warmup_end = 7.2, so only the final frame
        // (index 7, via the last-frame exemption) survives.
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].frame_index, 7);
    }

    #[test]
    fn full_surface_score_accepted_past_warmup() {
        let surface = 100;
        let mut all: Vec<Candidate> = (0..10).map(|i| candidate(0, i)).collect();
        all.push(candidate(surface, 10));
        all.push(candidate(40, 11));
        let kept = select(all, surface, 0.8, 5);
        // warmup_end = 9.6; index 10 clears it, zero scores never do.
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, surface);
        assert_eq!(kept[1].score, 40);
    }

    #[test]
    fn empty_when_nothing_survives() {
        let all: Vec<Candidate> = (0..5).map(|i| candidate(0, i)).collect();
        assert!(select(all, 100, 0.9, 3).is_empty());
    }
}
