use image::{GrayImage, Luma};

/// Number of foreground (non-zero) pixels in a mask.
pub fn count_nonzero(mask: &GrayImage) -> u32 {
    mask.as_raw().iter().filter(|&&v| v != 0).count() as u32
}

/// Normalized box blur with a `size`-by-`size` kernel, border clamped,
/// OpenCV-style rounding. `size` of 0 or 1 is a no-op.
pub fn box_blur(mask: &GrayImage, size: u32) -> GrayImage {
    if size <= 1 {
        return mask.clone();
    }
    let (width, height) = mask.dimensions();
    let half = (size / 2) as i64;
    let lo = -half;
    let hi = size as i64 - 1 - half;
    let area = size * size;

    let mut out = GrayImage::new(width, height);
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let mut sum = 0u32;
            for ky in lo..=hi {
                for kx in lo..=hi {
                    let px = (x + kx).clamp(0, width as i64 - 1) as u32;
                    let py = (y + ky).clamp(0, height as i64 - 1) as u32;
                    sum += mask.get_pixel(px, py)[0] as u32;
                }
            }
            out.put_pixel(x as u32, y as u32, Luma([((sum + area / 2) / area) as u8]));
        }
    }
    out
}

/// Binarizes a mask: values above `threshold` become 255, the rest 0.
pub fn threshold_binary(mask: &GrayImage, threshold: u8) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut out = GrayImage::new(width, height);
    for (dst, src) in out.pixels_mut().zip(mask.pixels()) {
        dst.0[0] = if src.0[0] > threshold { 255 } else { 0 };
    }
    out
}

/// The four image corners, in probing order.
fn corners(width: u32, height: u32) -> [(u32, u32); 4] {
    [
        (0, 0),
        (0, height - 1),
        (width - 1, 0),
        (width - 1, height - 1),
    ]
}

/// Outcome of the hole-filling heuristic. Only `Filled` replaces the mask;
/// every rejection keeps the original.
pub enum FillOutcome {
    Filled { mask: GrayImage, score: u32 },
    /// No corner was background, so there was nowhere to seed the fill.
    NoSeedCorner,
    /// The filled mask covered 90% or more of the surface.
    Overfilled,
    /// Filling left no background corner at all. In practice the seed corner
    /// always ends up in the flood-filled exterior and so stays background in
    /// the result; the rejection exists as explicit policy, not a reachable
    /// state.
    NoBackgroundCorner,
}

/// Closes background holes fully enclosed by foreground: flood-fills the
/// exterior from the first background corner, then unions the complement of
/// the exterior with the mask. The result is accepted only while it stays
/// under 90% of the surface and keeps at least one background corner.
pub fn fill_holes(mask: &GrayImage) -> FillOutcome {
    let (width, height) = mask.dimensions();
    let surface = width * height;

    let mut exterior = mask.clone();
    let seed = corners(width, height)
        .into_iter()
        .find(|&(x, y)| exterior.get_pixel(x, y)[0] == 0);
    let Some(seed) = seed else {
        return FillOutcome::NoSeedCorner;
    };
    flood_fill(&mut exterior, seed, 255);

    // Everything the fill could not reach is either foreground or a hole.
    let mut filled = GrayImage::new(width, height);
    for (dst, (m, e)) in filled
        .pixels_mut()
        .zip(mask.pixels().zip(exterior.pixels()))
    {
        dst.0[0] = m.0[0] | !e.0[0];
    }

    let score = count_nonzero(&filled);
    if score as f64 >= surface as f64 * 0.9 {
        return FillOutcome::Overfilled;
    }
    // The seed corner is part of the exterior, so `mask | !exterior` is
    // always 0 there and this check cannot fail today.
    let has_background_corner = corners(width, height)
        .into_iter()
        .any(|(x, y)| filled.get_pixel(x, y)[0] == 0);
    if !has_background_corner {
        return FillOutcome::NoBackgroundCorner;
    }

    FillOutcome::Filled { mask: filled, score }
}

/// 4-connected flood fill: repaints the region of pixels sharing the seed's
/// value with `value`.
pub fn flood_fill(mask: &mut GrayImage, seed: (u32, u32), value: u8) {
    let (width, height) = mask.dimensions();
    let target = mask.get_pixel(seed.0, seed.1)[0];
    if target == value {
        return;
    }

    let mut stack = vec![seed];
    while let Some((x, y)) = stack.pop() {
        if mask.get_pixel(x, y)[0] != target {
            continue;
        }
        mask.put_pixel(x, y, Luma([value]));
        if x > 0 {
            stack.push((x - 1, y));
        }
        if x + 1 < width {
            stack.push((x + 1, y));
        }
        if y > 0 {
            stack.push((x, y - 1));
        }
        if y + 1 < height {
            stack.push((x, y + 1));
        }
    }
}

/// 8-connected component labeling of a binary mask. Label 0 is background.
pub struct Components {
    pub labels: Vec<u32>,
    /// Pixel count per label, indexed by label; `sizes[0]` counts background.
    pub sizes: Vec<u32>,
    pub width: u32,
    pub height: u32,
}

pub fn connected_components(mask: &GrayImage) -> Components {
    let (width, height) = mask.dimensions();
    let mut labels = vec![0u32; (width * height) as usize];
    let mut sizes = vec![0u32];
    let mut next_label = 1u32;

    let at = |x: u32, y: u32| (y * width + x) as usize;

    for sy in 0..height {
        for sx in 0..width {
            if mask.get_pixel(sx, sy)[0] == 0 {
                sizes[0] += 1;
                continue;
            }
            if labels[at(sx, sy)] != 0 {
                continue;
            }

            let label = next_label;
            next_label += 1;
            sizes.push(0);

            let mut stack = vec![(sx, sy)];
            labels[at(sx, sy)] = label;
            while let Some((x, y)) = stack.pop() {
                sizes[label as usize] += 1;
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let nx = x as i64 + dx;
                        let ny = y as i64 + dy;
                        if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                            continue;
                        }
                        let (nx, ny) = (nx as u32, ny as u32);
                        if mask.get_pixel(nx, ny)[0] != 0 && labels[at(nx, ny)] == 0 {
                            labels[at(nx, ny)] = label;
                            stack.push((nx, ny));
                        }
                    }
                }
            }
        }
    }

    Components {
        labels,
        sizes,
        width,
        height,
    }
}

/// Replaces every component larger than `min_size` pixels with its rasterized
/// convex hull; everything else is dropped.
pub fn simplify_to_hulls(mask: &GrayImage, min_size: u32) -> GrayImage {
    let (width, height) = mask.dimensions();
    let components = connected_components(mask);

    let mut points_per_label: Vec<Vec<(i64, i64)>> = vec![Vec::new(); components.sizes.len()];
    for y in 0..height {
        for x in 0..width {
            let label = components.labels[(y * width + x) as usize];
            if label != 0 && components.sizes[label as usize] > min_size {
                points_per_label[label as usize].push((x as i64, y as i64));
            }
        }
    }

    let mut out = GrayImage::new(width, height);
    for points in points_per_label.iter().filter(|p| !p.is_empty()) {
        let hull = convex_hull(points);
        fill_convex_polygon(&mut out, &hull, 255);
    }
    out
}

/// Andrew's monotone chain. Input need not be sorted; output is in
/// counter-clockwise order without the repeated first point.
pub fn convex_hull(points: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let mut pts: Vec<(i64, i64)> = points.to_vec();
    pts.sort_unstable();
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let cross = |o: (i64, i64), a: (i64, i64), b: (i64, i64)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };

    let mut hull: Vec<(i64, i64)> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Scanline fill of a convex polygon.
pub fn fill_convex_polygon(mask: &mut GrayImage, hull: &[(i64, i64)], value: u8) {
    if hull.is_empty() {
        return;
    }
    if hull.len() < 3 {
        for &(x, y) in hull {
            if x >= 0 && y >= 0 && (x as u32) < mask.width() && (y as u32) < mask.height() {
                mask.put_pixel(x as u32, y as u32, Luma([value]));
            }
        }
        return;
    }

    let y_min = hull.iter().map(|p| p.1).min().unwrap().max(0);
    let y_max = hull.iter().map(|p| p.1).max().unwrap().min(mask.height() as i64 - 1);

    for y in y_min..=y_max {
        let mut x_min = i64::MAX;
        let mut x_max = i64::MIN;
        let n = hull.len();
        for i in 0..n {
            let (x0, y0) = hull[i];
            let (x1, y1) = hull[(i + 1) % n];
            if (y0 <= y && y <= y1) || (y1 <= y && y <= y0) {
                let x = if y0 == y1 {
                    x_min = x_min.min(x0.min(x1));
                    x_max = x_max.max(x0.max(x1));
                    continue;
                } else {
                    x0 + (x1 - x0) * (y - y0) / (y1 - y0)
                };
                x_min = x_min.min(x);
                x_max = x_max.max(x);
            }
        }
        if x_min > x_max {
            continue;
        }
        for x in x_min.max(0)..=x_max.min(mask.width() as i64 - 1) {
            mask.put_pixel(x as u32, y as u32, Luma([value]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> GrayImage {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        GrayImage::from_fn(width, height, |x, y| {
            let c = rows[y as usize].as_bytes()[x as usize];
            Luma([if c == b'#' { 255 } else { 0 }])
        })
    }

    #[test]
    fn blur_then_threshold_recovers_isolated_pixels() {
        let mut mask = GrayImage::new(9, 9);
        mask.put_pixel(4, 4, Luma([255]));
        let blurred = box_blur(&mask, 3);
        let binary = threshold_binary(&blurred, 0);
        // The 3x3 neighborhood of the lone pixel is foreground now.
        assert_eq!(binary.get_pixel(3, 4)[0], 255);
        assert_eq!(binary.get_pixel(5, 5)[0], 255);
        assert_eq!(binary.get_pixel(0, 0)[0], 0);
        assert!(count_nonzero(&binary) >= 9);
    }

    #[test]
    fn fill_closes_enclosed_hole_and_never_lowers_score() {
        let mask = mask_from(&[
            "........",
            ".######.",
            ".#....#.",
            ".#....#.",
            ".######.",
            "........",
        ]);
        let before = count_nonzero(&mask);
        match fill_holes(&mask) {
            FillOutcome::Filled { mask: filled, score } => {
                assert!(score >= before);
                // The hole interior is now foreground.
                assert_eq!(filled.get_pixel(3, 2)[0], 255);
                // The exterior stayed background.
                assert_eq!(filled.get_pixel(0, 0)[0], 0);
            }
            _ => panic!("fill should have been accepted"),
        }
    }

    #[test]
    fn fill_rejected_when_result_covers_surface() {
        // A full-width band: filling the single background region above it
        // would swallow nearly the whole image.
        let mask = mask_from(&[
            "........",
            "########",
            "########",
            "########",
            "########",
            "########",
            "########",
            "########",
            "########",
            "########",
        ]);
        assert!(matches!(fill_holes(&mask), FillOutcome::Overfilled));
    }

    #[test]
    fn fill_needs_a_background_seed_corner() {
        let mask = GrayImage::from_pixel(4, 4, Luma([255]));
        assert!(matches!(fill_holes(&mask), FillOutcome::NoSeedCorner));
    }

    #[test]
    fn flood_fill_stops_at_foreground() {
        let mut mask = mask_from(&[
            "....#...",
            "....#...",
            "....#...",
            "....#...",
        ]);
        flood_fill(&mut mask, (0, 0), 200);
        assert_eq!(mask.get_pixel(3, 3)[0], 200);
        // The wall and everything right of it are untouched.
        assert_eq!(mask.get_pixel(4, 0)[0], 255);
        assert_eq!(mask.get_pixel(6, 2)[0], 0);
    }

    #[test]
    fn components_are_counted_with_sizes() {
        let mask = mask_from(&[
            "##......",
            "##......",
            ".....#..",
            "........",
        ]);
        let components = connected_components(&mask);
        assert_eq!(components.sizes.len(), 3);
        let mut object_sizes: Vec<u32> = components.sizes[1..].to_vec();
        object_sizes.sort_unstable();
        assert_eq!(object_sizes, vec![1, 4]);
        assert_eq!(components.sizes[0], 32 - 5);
    }

    #[test]
    fn diagonal_pixels_form_one_component() {
        let mask = mask_from(&[
            "#...",
            ".#..",
            "..#.",
        ]);
        let components = connected_components(&mask);
        assert_eq!(components.sizes.len(), 2);
        assert_eq!(components.sizes[1], 3);
    }

    #[test]
    fn hull_of_l_shape_is_filled_triangle_superset() {
        let mask = mask_from(&[
            "#.......",
            "#.......",
            "#.......",
            "#.......",
            "#.......",
            "#.......",
            "#.......",
            "########",
        ]);
        let before = count_nonzero(&mask);
        let simplified = simplify_to_hulls(&mask, 0);
        assert!(count_nonzero(&simplified) >= before);
        // A point inside the hull of the L but outside the L itself.
        assert_eq!(simplified.get_pixel(2, 6)[0], 255);
    }

    #[test]
    fn small_components_dropped_by_hull_simplification() {
        let mask = mask_from(&[
            "##......",
            "##......",
            ".....#..",
            "........",
        ]);
        let simplified = simplify_to_hulls(&mask, 2);
        assert_eq!(simplified.get_pixel(5, 2)[0], 0);
        assert_eq!(simplified.get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn convex_hull_of_square_has_four_vertices() {
        let points = vec![(0, 0), (4, 0), (4, 4), (0, 4), (2, 2), (1, 3)];
        let hull = convex_hull(&points);
        assert_eq!(hull.len(), 4);
    }
}
