use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "shakecap")]
#[command(about = "Detect and capture objects being shaken in front of the camera")]
#[command(long_about = "Buffers frames from a camera during a shake gesture, stabilizes the \
sequence against jitter, separates the moving object from the learned background, and exports \
the best captures as transparent PNGs.")]
pub struct Args {
    #[arg(long = "source", default_value = "0", help = "Video source (camera index or /dev/videoN)")]
    pub source: String,

    #[arg(long = "dump-raw", help = "Write the raw captured frames to this prefix")]
    pub dump_raw: Option<String>,

    #[arg(long = "dump-stabilized", help = "Write the stabilized frames to this prefix")]
    pub dump_stabilized: Option<String>,

    #[arg(long = "contours-prefix", help = "Write per-frame contour masks to this prefix")]
    pub contours_prefix: Option<String>,

    #[arg(long = "objects-prefix", help = "Write captured objects to this prefix")]
    pub objects_prefix: Option<String>,

    #[arg(long = "masks-prefix", help = "Write raw captured masks to this prefix")]
    pub masks_prefix: Option<String>,

    #[arg(long = "keep", default_value = "3", help = "Keep the N objects with the best score")]
    pub keep: usize,

    #[arg(long = "width", default_value = "320", help = "Video width")]
    pub width: u32,

    #[arg(long = "height", default_value = "200", help = "Video height")]
    pub height: u32,

    #[arg(long = "blur", default_value = "15", help = "Blur radius for mask smoothing")]
    pub blur: u32,

    #[arg(
        long = "min-size",
        default_value = "100",
        help = "Connected components with fewer pixels are treated as noise"
    )]
    pub min_size: u32,

    #[arg(
        long = "buffer",
        default_value = "60",
        help = "Number of frames to capture before processing"
    )]
    pub buffer: usize,

    #[arg(
        long = "buffer-stable-frames",
        default_value = "0",
        help = "Number of consecutive stable frames required before processing"
    )]
    pub buffer_stable_frames: usize,

    #[arg(
        long = "buffer-stability",
        default_value = "0.1",
        help = "Max proportion of the image that can change for a frame to count as stable"
    )]
    pub buffer_stability: f64,

    #[arg(
        long = "buffer-init",
        default_value = "0.9",
        help = "Proportion of frames reserved for background-model warm-up, in ]0, 1["
    )]
    pub buffer_init: f64,

    #[arg(long = "fill", overrides_with = "no_fill", help = "Attempt to remove holes from the captured mask")]
    pub fill: bool,
    #[arg(long = "no-fill", help = "Do not attempt to remove holes (default)")]
    pub no_fill: bool,

    #[arg(
        long = "remove-shadows",
        overrides_with = "no_remove_shadows",
        help = "Pixels that look like shadows are not part of the extracted object"
    )]
    pub remove_shadows: bool,
    #[arg(long = "no-remove-shadows", help = "Keep shadow pixels in the extracted object (default)")]
    pub no_remove_shadows: bool,

    #[arg(long = "use-contour", overrides_with = "no_use_contour", help = "Simplify masks to convex hulls of their contours")]
    pub use_contour: bool,
    #[arg(long = "no-use-contour", help = "Keep masks as-is (default)")]
    pub no_use_contour: bool,

    #[arg(long = "autostart", overrides_with = "no_autostart", help = "Start capturing immediately (default)")]
    pub autostart: bool,
    #[arg(long = "no-autostart", help = "Wait for an explicit trigger")]
    pub no_autostart: bool,

    #[arg(long = "stabilize", overrides_with = "no_stabilize", help = "Stabilize the buffered sequence (default)")]
    pub stabilize: bool,
    #[arg(long = "no-stabilize", help = "Skip stabilization")]
    pub no_stabilize: bool,

    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help = "Increase verbosity level (use multiple times for more verbose output)"
    )]
    pub verbose: u8,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Warm-up fraction clamped into the open interval the selector expects.
    pub fn buffer_init(&self) -> f64 {
        self.buffer_init.clamp(0.01, 0.99)
    }

    pub fn fill_holes(&self) -> bool {
        self.fill && !self.no_fill
    }

    pub fn remove_shadows_enabled(&self) -> bool {
        self.remove_shadows && !self.no_remove_shadows
    }

    pub fn use_contour_enabled(&self) -> bool {
        self.use_contour && !self.no_use_contour
    }

    pub fn autostart_enabled(&self) -> bool {
        !self.no_autostart
    }

    pub fn stabilize_enabled(&self) -> bool {
        !self.no_stabilize
    }

    pub fn setup_logging(&self) {
        use tracing_subscriber::{EnvFilter, FmtSubscriber};

        let level = match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
            )
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}
