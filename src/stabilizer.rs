use anyhow::Result;
use image::{Rgb, RgbImage};
use tracing::{debug, info, warn};

use crate::source::FrameSink;
use crate::tracking::{self, TrackedPoint};

const MAX_CORNERS: usize = 200;
const QUALITY_LEVEL: f32 = 0.01;
const MIN_DISTANCE: f32 = 10.0;

/// Why a frame was left out of the stabilized sequence. All of these are
/// recoverable; the frame is simply dropped and alignment continues from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NoTrackableFeatures,
    TransformEstimationFailed,
    DegenerateWarp,
}

/// 2D similarity transform: rotation + translation + uniform scale, stored as
/// the top two rows [[a, -b, tx], [b, a, ty]] of a homogeneous matrix.
#[derive(Clone, Copy, Debug)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    fn as_matrix(&self) -> [[f32; 3]; 3] {
        [
            [self.a, -self.b, self.tx],
            [self.b, self.a, self.ty],
            [0.0, 0.0, 1.0],
        ]
    }

    pub fn rotation(&self) -> f32 {
        self.b.atan2(self.a)
    }
}

/// Closed-form least-squares similarity fit over point correspondences.
/// Fails with fewer than two pairs or a degenerate point spread.
pub fn estimate_similarity(pairs: &[((f32, f32), (f32, f32))]) -> Option<Similarity> {
    let n = pairs.len();
    if n < 2 {
        return None;
    }
    let inv_n = 1.0 / n as f32;

    let (mut pcx, mut pcy, mut qcx, mut qcy) = (0.0f32, 0.0, 0.0, 0.0);
    for &((px, py), (qx, qy)) in pairs {
        pcx += px;
        pcy += py;
        qcx += qx;
        qcy += qy;
    }
    pcx *= inv_n;
    pcy *= inv_n;
    qcx *= inv_n;
    qcy *= inv_n;

    let mut norm = 0.0f32;
    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    for &((px, py), (qx, qy)) in pairs {
        let (px, py) = (px - pcx, py - pcy);
        let (qx, qy) = (qx - qcx, qy - qcy);
        norm += px * px + py * py;
        dot += px * qx + py * qy;
        cross += px * qy - py * qx;
    }
    if norm < 1e-6 {
        return None;
    }

    let a = dot / norm;
    let b = cross / norm;
    Some(Similarity {
        a,
        b,
        tx: qcx - (a * pcx - b * pcy),
        ty: qcy - (b * pcx + a * pcy),
    })
}

/// Extremes of the cumulative translation seen during one stabilization run.
/// Reported so a caller could crop away the borders the alignment introduces;
/// the crop itself is intentionally not applied here.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TranslationBounds {
    pub min_dx: f32,
    pub max_dx: f32,
    pub min_dy: f32,
    pub max_dy: f32,
}

/// Cumulative alignment from the first frame of a batch to the current one.
/// Identity at the start of each stabilization run.
pub struct TransformAccumulator {
    matrix: [[f32; 3]; 3],
    acc_dx: f32,
    acc_dy: f32,
    bounds: TranslationBounds,
}

impl TransformAccumulator {
    pub fn new() -> Self {
        Self {
            matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            acc_dx: 0.0,
            acc_dy: 0.0,
            bounds: TranslationBounds::default(),
        }
    }

    /// Composes a per-pair transform into the accumulator and updates the
    /// cumulative translation extremes.
    pub fn compose(&mut self, t: &Similarity) {
        self.matrix = mat_mul(&self.matrix, &t.as_matrix());

        self.acc_dx += t.tx;
        self.bounds.max_dx = self.bounds.max_dx.max(self.acc_dx);
        self.bounds.min_dx = self.bounds.min_dx.min(self.acc_dx);

        self.acc_dy += t.ty;
        self.bounds.max_dy = self.bounds.max_dy.max(self.acc_dy);
        self.bounds.min_dy = self.bounds.min_dy.min(self.acc_dy);
    }

    /// Top two rows of the accumulated matrix with every entry rounded.
    pub fn rounded_affine(&self) -> [[f32; 3]; 2] {
        let mut affine = [[0.0f32; 3]; 2];
        for (row, out) in self.matrix.iter().take(2).zip(affine.iter_mut()) {
            for (value, slot) in row.iter().zip(out.iter_mut()) {
                *slot = value.round();
            }
        }
        affine
    }

    pub fn bounds(&self) -> TranslationBounds {
        self.bounds
    }
}

impl Default for TransformAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

fn mat_mul(a: &[[f32; 3]; 3], b: &[[f32; 3]; 3]) -> [[f32; 3]; 3] {
    let mut out = [[0.0f32; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, slot) in row.iter_mut().enumerate() {
            *slot = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Resamples `src` through the affine (mapping source to destination) with
/// nearest-neighbor interpolation. Uncovered pixels stay black. `None` when
/// the affine is not invertible.
pub fn warp_affine(src: &RgbImage, affine: &[[f32; 3]; 2], width: u32, height: u32) -> Option<RgbImage> {
    let [[m00, m01, m02], [m10, m11, m12]] = *affine;
    let det = m00 * m11 - m01 * m10;
    if det.abs() < 1e-6 {
        return None;
    }

    let inv00 = m11 / det;
    let inv01 = -m01 / det;
    let inv10 = -m10 / det;
    let inv11 = m00 / det;
    let inv02 = -(inv00 * m02 + inv01 * m12);
    let inv12 = -(inv10 * m02 + inv11 * m12);

    let mut out = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    for y in 0..height {
        for x in 0..width {
            let sx = (inv00 * x as f32 + inv01 * y as f32 + inv02).round();
            let sy = (inv10 * x as f32 + inv11 * y as f32 + inv12).round();
            if sx >= 0.0 && sy >= 0.0 && (sx as u32) < src.width() && (sy as u32) < src.height() {
                out.put_pixel(x, y, *src.get_pixel(sx as u32, sy as u32));
            }
        }
    }
    Some(out)
}

/// Output of one stabilization run.
pub struct Stabilized {
    pub frames: Vec<RgbImage>,
    pub bounds: TranslationBounds,
    pub skipped: usize,
}

/// Aligns a frame sequence against jitter using sparse feature tracking and
/// accumulated similarity transforms. Frame 0 is the reference and is always
/// emitted unchanged.
pub struct Stabilizer {
    width: u32,
    height: u32,
}

impl Stabilizer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn stabilize(
        &self,
        frames: &[RgbImage],
        mut sink: Option<&mut (dyn FrameSink + '_)>,
    ) -> Result<Stabilized> {
        let mut acc = TransformAccumulator::new();
        let mut stabilized = Vec::with_capacity(frames.len());
        let mut skipped = 0usize;

        let Some(first) = frames.first() else {
            return Ok(Stabilized {
                frames: stabilized,
                bounds: acc.bounds(),
                skipped,
            });
        };

        stabilized.push(first.clone());
        let mut prev_gray = tracking::to_grayscale(first);

        for (index, cur) in frames.iter().enumerate().skip(1) {
            let cur_gray = tracking::to_grayscale(cur);

            match self.align_pair(&prev_gray, &cur_gray, cur, &mut acc) {
                Ok(frame) => {
                    if let Some(sink) = sink.as_deref_mut() {
                        sink.write(&frame)?;
                    }
                    stabilized.push(frame);
                }
                Err(reason) => {
                    skipped += 1;
                    warn!("Stabilizer dropped frame {}: {:?}", index, reason);
                }
            }

            // Alignment always continues from the latest frame, emitted or not.
            prev_gray = cur_gray;
        }

        info!(
            "Stabilized {}/{} frames ({} dropped)",
            stabilized.len(),
            frames.len(),
            skipped
        );
        Ok(Stabilized {
            frames: stabilized,
            bounds: acc.bounds(),
            skipped,
        })
    }

    /// One per-pair alignment step: emit a frame or skip it. The accumulator
    /// is only touched when a usable transform was estimated.
    fn align_pair(
        &self,
        prev_gray: &image::GrayImage,
        cur_gray: &image::GrayImage,
        cur: &RgbImage,
        acc: &mut TransformAccumulator,
    ) -> Result<RgbImage, SkipReason> {
        let corners = tracking::detect_features(prev_gray, MAX_CORNERS, QUALITY_LEVEL, MIN_DISTANCE);
        if corners.is_empty() {
            return Err(SkipReason::NoTrackableFeatures);
        }

        let tracked = tracking::track_features(prev_gray, cur_gray, &corners);
        let pairs: Vec<_> = tracked
            .iter()
            .filter(|p| p.valid)
            .map(|p: &TrackedPoint| (p.from, p.to))
            .collect();

        let transform = estimate_similarity(&pairs).ok_or(SkipReason::TransformEstimationFailed)?;

        if transform.tx == 0.0 && transform.ty == 0.0 {
            // A transform with exactly zero translation composes into a
            // nonsense accumulated matrix; pass the frame through untouched.
            debug!("Zero-translation transform, passing frame through");
            return Ok(cur.clone());
        }

        acc.compose(&transform);
        debug!(
            "Composed transform a={:.4} b={:.4} t=({:.2}, {:.2})",
            transform.a, transform.b, transform.tx, transform.ty
        );

        warp_affine(cur, &acc.rounded_affine(), self.width, self.height)
            .ok_or(SkipReason::DegenerateWarp)
    }
}
