use image::{GrayImage, Luma, RgbImage};

pub const SHADOW_LABEL: u8 = 127;
pub const FOREGROUND_LABEL: u8 = 255;

const MAX_COMPONENTS: usize = 4;
const DEFAULT_LEARNING_RATE: f32 = 0.05;
const BACKGROUND_PORTION: f32 = 0.7;
const MATCH_SIGMAS: f32 = 2.5;
const INITIAL_VARIANCE: f32 = 15.0;
const MIN_VARIANCE: f32 = 4.0;
const SHADOW_RATIO_LOW: f32 = 0.25;
const SHADOW_RATIO_HIGH: f32 = 0.95;

/// One adaptive color mode of a pixel: a weighted spherical Gaussian.
#[derive(Clone, Copy, Debug)]
struct Mode {
    weight: f32,
    mean: [f32; 3],
    variance: f32,
}

impl Mode {
    fn from_pixel(pixel: [f32; 3], weight: f32) -> Self {
        Self {
            weight,
            mean: pixel,
            variance: INITIAL_VARIANCE,
        }
    }

    fn matches(&self, pixel: [f32; 3]) -> bool {
        let limit = MATCH_SIGMAS * self.variance.sqrt();
        self.mean
            .iter()
            .zip(pixel.iter())
            .all(|(m, p)| (p - m).abs() <= limit)
    }

    fn update(&mut self, pixel: [f32; 3], learning_rate: f32) {
        self.weight += learning_rate * (1.0 - self.weight);

        let mut dist_sq = 0.0;
        for (m, p) in self.mean.iter_mut().zip(pixel.iter()) {
            let d = p - *m;
            *m += learning_rate * d;
            dist_sq += d * d;
        }
        self.variance += learning_rate * (dist_sq / 3.0 - self.variance);
        self.variance = self.variance.max(MIN_VARIANCE);
    }

    fn decay(&mut self, learning_rate: f32) {
        self.weight *= 1.0 - learning_rate;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Label {
    Background,
    Shadow,
    Foreground,
}

/// The per-pixel mixture. Modes stay sorted by descending weight; the leading
/// modes covering `BACKGROUND_PORTION` of cumulative weight count as
/// background.
#[derive(Clone, Default)]
struct PixelModel {
    modes: Vec<Mode>,
}

impl PixelModel {
    fn observe(&mut self, pixel: [f32; 3], learning_rate: f32) -> Label {
        let matched = self.modes.iter().position(|m| m.matches(pixel));

        let label = match matched {
            Some(idx) => {
                self.modes[idx].update(pixel, learning_rate);
                if self.is_background_mode(idx) {
                    Label::Background
                } else if self.looks_like_shadow(pixel) {
                    Label::Shadow
                } else {
                    Label::Foreground
                }
            }
            None => {
                if self.modes.len() < MAX_COMPONENTS {
                    self.modes.push(Mode::from_pixel(pixel, learning_rate));
                } else {
                    // Replace the least probable mode.
                    let last = self.modes.len() - 1;
                    self.modes[last] = Mode::from_pixel(pixel, learning_rate);
                }
                if self.looks_like_shadow(pixel) {
                    Label::Shadow
                } else {
                    Label::Foreground
                }
            }
        };

        for (i, mode) in self.modes.iter_mut().enumerate() {
            if Some(i) != matched {
                mode.decay(learning_rate);
            }
        }
        self.modes.retain(|m| m.weight > 0.001);
        self.modes
            .sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));

        label
    }

    fn is_background_mode(&self, idx: usize) -> bool {
        let mut cumulative = 0.0;
        for (i, mode) in self.modes.iter().enumerate() {
            cumulative += mode.weight;
            if i == idx {
                return cumulative > BACKGROUND_PORTION;
            }
            if cumulative > BACKGROUND_PORTION {
                break;
            }
        }
        false
    }

    /// A foreground pixel that is a darkened copy of an established
    /// background color reads as a cast shadow.
    fn looks_like_shadow(&self, pixel: [f32; 3]) -> bool {
        let mut cumulative = 0.0;
        for mode in &self.modes {
            cumulative += mode.weight;

            let mean_sq: f32 = mode.mean.iter().map(|m| m * m).sum();
            if mean_sq > 1.0 {
                let dot: f32 = mode.mean.iter().zip(pixel.iter()).map(|(m, p)| m * p).sum();
                let ratio = dot / mean_sq;
                if (SHADOW_RATIO_LOW..=SHADOW_RATIO_HIGH).contains(&ratio) {
                    let dist_sq: f32 = mode
                        .mean
                        .iter()
                        .zip(pixel.iter())
                        .map(|(m, p)| {
                            let d = p - ratio * m;
                            d * d
                        })
                        .sum();
                    if dist_sq <= MATCH_SIGMAS * MATCH_SIGMAS * mode.variance * 3.0 {
                        return true;
                    }
                }
            }

            if cumulative > BACKGROUND_PORTION {
                break;
            }
        }
        false
    }
}

/// Incremental per-pixel background classifier. Created once per process and
/// updated with every observed frame; it is never reset between capture
/// sessions, so later sessions start with an already warmed-up model.
pub struct BackgroundModel {
    models: Vec<PixelModel>,
    width: u32,
    height: u32,
    learning_rate: f32,
    frame_count: u64,
}

impl BackgroundModel {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            models: vec![PixelModel::default(); (width * height) as usize],
            width,
            height,
            learning_rate: DEFAULT_LEARNING_RATE,
            frame_count: 0,
        }
    }

    /// Updates the model with `frame` and returns the raw label mask:
    /// 0 background, 127 shadow, 255 foreground.
    pub fn apply(&mut self, frame: &RgbImage) -> GrayImage {
        self.frame_count += 1;
        let mut mask = GrayImage::new(self.width, self.height);

        for y in 0..self.height {
            for x in 0..self.width {
                let p = frame.get_pixel(x, y);
                let pixel = [p[0] as f32, p[1] as f32, p[2] as f32];
                let idx = (y * self.width + x) as usize;

                let value = match self.models[idx].observe(pixel, self.learning_rate) {
                    Label::Background => 0,
                    Label::Shadow => SHADOW_LABEL,
                    Label::Foreground => FOREGROUND_LABEL,
                };
                mask.put_pixel(x, y, Luma([value]));
            }
        }

        mask
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}
