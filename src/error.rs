use std::path::PathBuf;
use thiserror::Error;

/// Fatal pipeline errors. Everything recoverable (dropped stabilizer frames,
/// rejected hole fills, empty candidate sets) is modeled as data, not as an
/// error: see `stabilizer::SkipReason` and `mask_ops::FillOutcome`.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The frame source could not be opened at startup.
    #[error("video source unavailable: {0}")]
    SourceUnavailable(String),

    /// An output image could not be written.
    #[error("failed to write image to {path}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}
