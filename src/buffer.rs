use image::RgbImage;
use std::collections::VecDeque;
use tracing::debug;

/// Bounded frame buffer for one capture session, with a running count of
/// consecutive "stable" frames (trailing frames whose pairwise diff stayed
/// under the stability threshold).
///
/// Created on trigger, discarded after one processing cycle.
pub struct SessionBuffer {
    frames: VecDeque<RgbImage>,
    capacity: usize,
    required_stable: usize,
    /// Absolute diff threshold, `surface * stability_ratio`.
    stability_threshold: f64,
    stable_run: usize,
}

impl SessionBuffer {
    pub fn new(capacity: usize, required_stable: usize, surface: u32, stability_ratio: f64) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity + 1),
            capacity,
            required_stable,
            stability_threshold: surface as f64 * stability_ratio,
            stable_run: 0,
        }
    }

    /// Appends a frame, updating the stable-run counter against the previous
    /// frame. At capacity the oldest frame is evicted (sliding window).
    pub fn push(&mut self, frame: RgbImage) {
        if self.required_stable > 0 {
            if let Some(last) = self.frames.back() {
                let diff = frame_diff(last, &frame);
                if diff <= self.stability_threshold {
                    self.stable_run += 1;
                } else {
                    self.stable_run = 0;
                }
                debug!(
                    "Frame diff {:.1} <? {:.1}, stable run {}",
                    diff, self.stability_threshold, self.stable_run
                );
            }
        }

        self.frames.push_back(frame);
        if self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    /// True once the buffer is full and enough trailing frames were stable.
    pub fn is_ready(&self) -> bool {
        self.frames.len() == self.capacity && self.stable_run >= self.required_stable
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn stable_run(&self) -> usize {
        self.stable_run
    }

    /// Consumes the buffer, yielding the frames in capture order.
    pub fn into_frames(self) -> Vec<RgbImage> {
        self.frames.into()
    }
}

/// L2 norm of the pixelwise difference between two equally sized frames.
pub fn frame_diff(a: &RgbImage, b: &RgbImage) -> f64 {
    let sum: f64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum();
    sum.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(w: u32, h: u32, v: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([v, v, v]))
    }

    #[test]
    fn identical_frames_keep_increasing_stable_run() {
        let mut buf = SessionBuffer::new(10, 3, 16, 0.1);
        let mut last_run = 0;
        for i in 0..6 {
            buf.push(solid(4, 4, 100));
            if i > 0 {
                assert!(buf.stable_run() > last_run);
            }
            last_run = buf.stable_run();
        }
        // 6 pushes, 5 comparisons, all stable.
        assert_eq!(buf.stable_run(), 5);
    }

    #[test]
    fn unstable_frame_resets_run() {
        let mut buf = SessionBuffer::new(10, 2, 16, 0.1);
        buf.push(solid(4, 4, 100));
        buf.push(solid(4, 4, 100));
        assert_eq!(buf.stable_run(), 1);
        buf.push(solid(4, 4, 0));
        assert_eq!(buf.stable_run(), 0);
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut buf = SessionBuffer::new(3, 100, 16, 0.1);
        for _ in 0..5 {
            buf.push(solid(4, 4, 7));
        }
        assert_eq!(buf.len(), 3);
        assert!(!buf.is_ready());
    }

    #[test]
    fn ready_needs_capacity_and_stability() {
        let mut buf = SessionBuffer::new(3, 2, 16, 0.5);
        buf.push(solid(4, 4, 10));
        buf.push(solid(4, 4, 10));
        assert!(!buf.is_ready());
        buf.push(solid(4, 4, 10));
        assert!(buf.is_ready());
    }

    #[test]
    fn diff_of_identical_frames_is_zero() {
        let a = solid(8, 8, 42);
        assert_eq!(frame_diff(&a, &a.clone()), 0.0);
    }
}
