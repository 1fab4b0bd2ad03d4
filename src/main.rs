use anyhow::{Context, Result};
use tracing::{error, info};

use shakecap::cli::Args;
use shakecap::controller::{CaptureController, ControllerConfig};
use shakecap::exporter::ExportConfig;
use shakecap::segmenter::SegmenterConfig;
use shakecap::source::{CameraSource, PngSequenceSink};

fn main() {
    let args = Args::parse_args();
    args.setup_logging();

    info!("Starting shakecap with {:?}", args);

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let source = CameraSource::new(&args.source, args.width, args.height)
        .context("Unable to open video source")?;

    let controller_config = ControllerConfig {
        buffer_capacity: args.buffer,
        required_stable_frames: args.buffer_stable_frames,
        stability_ratio: args.buffer_stability,
        warmup_fraction: args.buffer_init(),
        keep: args.keep,
        stabilize: args.stabilize_enabled(),
        autostart: args.autostart_enabled(),
    };
    let segmenter_config = SegmenterConfig {
        blur: args.blur,
        min_size: args.min_size,
        remove_shadows: args.remove_shadows_enabled(),
        fill_holes: args.fill_holes(),
        use_contour: args.use_contour_enabled(),
        contours_prefix: args.contours_prefix.clone(),
    };
    let export_config = ExportConfig {
        objects_prefix: args.objects_prefix.clone(),
        masks_prefix: args.masks_prefix.clone(),
        min_size: args.min_size,
    };

    let mut controller =
        CaptureController::new(source, controller_config, segmenter_config, export_config);
    if let Some(prefix) = &args.dump_raw {
        controller = controller.with_raw_sink(Box::new(PngSequenceSink::new(prefix.clone())));
    }
    if let Some(prefix) = &args.dump_stabilized {
        controller = controller.with_stabilized_sink(Box::new(PngSequenceSink::new(prefix.clone())));
    }

    controller.run()
}
