pub mod background;
pub mod buffer;
pub mod candidates;
pub mod cli;
pub mod controller;
pub mod error;
pub mod exporter;
pub mod mask_ops;
pub mod segmenter;
pub mod source;
pub mod stabilizer;
pub mod tracking;
