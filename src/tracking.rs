use image::{GrayImage, ImageBuffer, Luma, RgbImage};

const LK_WINDOW_SIZE: usize = 15;
const CORNER_BLOCK_HALF: i32 = 1;

/// A salient point tracked from the previous frame into the current one.
/// `valid` is false when the flow system was degenerate or the tracked
/// position left the image.
#[derive(Clone, Debug)]
pub struct TrackedPoint {
    pub from: (f32, f32),
    pub to: (f32, f32),
    pub valid: bool,
}

pub fn to_grayscale(rgb: &RgbImage) -> GrayImage {
    ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
        let p = rgb.get_pixel(x, y);
        let gray = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
        Luma([gray as u8])
    })
}

/// Shi-Tomasi corner detection: minimum eigenvalue of the structure tensor
/// over a small block, thresholded relative to the strongest response, with
/// greedy minimum-distance suppression.
pub fn detect_features(
    gray: &GrayImage,
    max_corners: usize,
    quality_level: f32,
    min_distance: f32,
) -> Vec<(f32, f32)> {
    let (width, height) = gray.dimensions();
    if width < 4 || height < 4 {
        return Vec::new();
    }

    let mut responses: Vec<(f32, u32, u32)> = Vec::new();
    let mut max_response = 0.0f32;

    for y in 2..height - 2 {
        for x in 2..width - 2 {
            let mut sxx = 0.0f32;
            let mut syy = 0.0f32;
            let mut sxy = 0.0f32;

            for by in -CORNER_BLOCK_HALF..=CORNER_BLOCK_HALF {
                for bx in -CORNER_BLOCK_HALF..=CORNER_BLOCK_HALF {
                    let px = (x as i32 + bx) as u32;
                    let py = (y as i32 + by) as u32;
                    let ix = (pixel(gray, px + 1, py) - pixel(gray, px - 1, py)) / 2.0;
                    let iy = (pixel(gray, px, py + 1) - pixel(gray, px, py - 1)) / 2.0;
                    sxx += ix * ix;
                    syy += iy * iy;
                    sxy += ix * iy;
                }
            }

            // Minimum eigenvalue of [[sxx, sxy], [sxy, syy]].
            let diff = sxx - syy;
            let min_eig = (sxx + syy - (diff * diff + 4.0 * sxy * sxy).sqrt()) / 2.0;
            if min_eig > 0.0 {
                responses.push((min_eig, x, y));
                if min_eig > max_response {
                    max_response = min_eig;
                }
            }
        }
    }

    if responses.is_empty() {
        return Vec::new();
    }

    let threshold = max_response * quality_level;
    responses.retain(|&(r, _, _)| r >= threshold);
    responses.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let min_dist_sq = min_distance * min_distance;
    let mut corners: Vec<(f32, f32)> = Vec::new();
    for &(_, x, y) in &responses {
        if corners.len() >= max_corners {
            break;
        }
        let (fx, fy) = (x as f32, y as f32);
        let far_enough = corners.iter().all(|&(cx, cy)| {
            let dx = cx - fx;
            let dy = cy - fy;
            dx * dx + dy * dy >= min_dist_sq
        });
        if far_enough {
            corners.push((fx, fy));
        }
    }

    corners
}

/// Tracks each point from `prev` into `cur` with single-level Lucas-Kanade.
pub fn track_features(prev: &GrayImage, cur: &GrayImage, points: &[(f32, f32)]) -> Vec<TrackedPoint> {
    let (width, height) = prev.dimensions();
    points
        .iter()
        .map(|&(px, py)| {
            let flow = lucas_kanade_at(prev, cur, px.round() as i64, py.round() as i64);
            match flow {
                Some((u, v)) => {
                    let to = (px + u, py + v);
                    let in_bounds =
                        to.0 >= 0.0 && to.1 >= 0.0 && to.0 < width as f32 && to.1 < height as f32;
                    TrackedPoint {
                        from: (px, py),
                        to,
                        valid: in_bounds,
                    }
                }
                None => TrackedPoint {
                    from: (px, py),
                    to: (px, py),
                    valid: false,
                },
            }
        })
        .collect()
}

/// Solves the 2x2 Lucas-Kanade system over a window centered on (x, y).
/// Returns `None` when the structure tensor is singular.
fn lucas_kanade_at(prev: &GrayImage, cur: &GrayImage, x: i64, y: i64) -> Option<(f32, f32)> {
    let (width, height) = prev.dimensions();
    let half = (LK_WINDOW_SIZE / 2) as i64;

    let mut sum_ix2 = 0.0f32;
    let mut sum_iy2 = 0.0f32;
    let mut sum_ixy = 0.0f32;
    let mut sum_ixt = 0.0f32;
    let mut sum_iyt = 0.0f32;

    for wy in -half..=half {
        for wx in -half..=half {
            let px = x + wx;
            let py = y + wy;
            if px < 1 || py < 1 || px >= width as i64 - 1 || py >= height as i64 - 1 {
                continue;
            }
            let (px, py) = (px as u32, py as u32);

            let ix = (pixel(prev, px + 1, py) - pixel(prev, px - 1, py)) / 2.0;
            let iy = (pixel(prev, px, py + 1) - pixel(prev, px, py - 1)) / 2.0;
            let it = pixel(cur, px, py) - pixel(prev, px, py);

            sum_ix2 += ix * ix;
            sum_iy2 += iy * iy;
            sum_ixy += ix * iy;
            sum_ixt += ix * it;
            sum_iyt += iy * it;
        }
    }

    let det = sum_ix2 * sum_iy2 - sum_ixy * sum_ixy;
    if det.abs() < 1e-6 {
        return None;
    }

    let u = (sum_iy2 * (-sum_ixt) - sum_ixy * (-sum_iyt)) / det;
    let v = (sum_ix2 * (-sum_iyt) - sum_ixy * (-sum_ixt)) / det;
    Some((u, v))
}

fn pixel(img: &GrayImage, x: u32, y: u32) -> f32 {
    if x < img.width() && y < img.height() {
        img.get_pixel(x, y)[0] as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn checkerboard(w: u32, h: u32, cell: u32) -> GrayImage {
        ImageBuffer::from_fn(w, h, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn grayscale_weights_green_above_red() {
        let rgb = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 255, 0])
            }
        });
        let gray = to_grayscale(&rgb);
        assert!(gray.get_pixel(0, 0)[0] < gray.get_pixel(1, 0)[0]);
    }

    #[test]
    fn flat_image_has_no_features() {
        let gray = GrayImage::from_pixel(64, 64, Luma([128]));
        assert!(detect_features(&gray, 200, 0.01, 10.0).is_empty());
    }

    #[test]
    fn checkerboard_has_features_spaced_apart() {
        let gray = checkerboard(64, 64, 8);
        let corners = detect_features(&gray, 200, 0.01, 10.0);
        assert!(!corners.is_empty());
        for (i, &(ax, ay)) in corners.iter().enumerate() {
            for &(bx, by) in &corners[i + 1..] {
                let d2 = (ax - bx).powi(2) + (ay - by).powi(2);
                assert!(d2 >= 100.0, "corners closer than min distance");
            }
        }
    }

    #[test]
    fn static_frames_track_with_zero_flow() {
        let gray = checkerboard(64, 64, 8);
        let corners = detect_features(&gray, 50, 0.01, 10.0);
        let tracked = track_features(&gray, &gray, &corners);
        for point in tracked.iter().filter(|p| p.valid) {
            assert!((point.to.0 - point.from.0).abs() < 0.5);
            assert!((point.to.1 - point.from.1).abs() < 0.5);
        }
    }
}
