use anyhow::Result;
use image::RgbImage;
use std::sync::mpsc::Receiver;
use tracing::{debug, info};

use crate::background::BackgroundModel;
use crate::buffer::SessionBuffer;
use crate::candidates;
use crate::exporter::{self, ExportConfig};
use crate::segmenter::{self, SegmenterConfig};
use crate::source::{FrameSink, FrameSource};
use crate::stabilizer::Stabilizer;

/// Events from the outside world (a preview window, a signal handler).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    /// Start (or restart) a capture session.
    Trigger,
    /// Abort an in-progress buffering phase, discarding the partial buffer.
    Cancel,
    /// Stop the whole run.
    Quit,
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub buffer_capacity: usize,
    pub required_stable_frames: usize,
    pub stability_ratio: f64,
    /// Fraction of the sequence reserved for background-model warm-up; the
    /// candidate surface-guard keys off this.
    pub warmup_fraction: f64,
    pub keep: usize,
    pub stabilize: bool,
    pub autostart: bool,
}

/// Top-level state machine: Idle until triggered, Buffering until the session
/// buffer is full and stable, then one Processing cycle
/// (stabilize → segment → rank → export) before returning to Idle.
///
/// Strictly sequential; the only suspension point is the blocking frame read.
pub struct CaptureController<S: FrameSource> {
    source: S,
    config: ControllerConfig,
    segmenter_config: SegmenterConfig,
    export_config: ExportConfig,
    /// Outlives every session: never reset between triggers.
    background: BackgroundModel,
    stabilizer: Stabilizer,
    events: Option<Receiver<ControlEvent>>,
    raw_sink: Option<Box<dyn FrameSink>>,
    stabilized_sink: Option<Box<dyn FrameSink>>,
    width: u32,
    height: u32,
}

impl<S: FrameSource> CaptureController<S> {
    pub fn new(
        source: S,
        config: ControllerConfig,
        segmenter_config: SegmenterConfig,
        export_config: ExportConfig,
    ) -> Self {
        let (width, height) = source.resolution();
        Self {
            source,
            config,
            segmenter_config,
            export_config,
            background: BackgroundModel::new(width, height),
            stabilizer: Stabilizer::new(width, height),
            events: None,
            raw_sink: None,
            stabilized_sink: None,
            width,
            height,
        }
    }

    pub fn with_events(mut self, events: Receiver<ControlEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_raw_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.raw_sink = Some(sink);
        self
    }

    pub fn with_stabilized_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.stabilized_sink = Some(sink);
        self
    }

    /// Runs until the source is exhausted or a `Quit` event arrives. The
    /// source handle is released when the controller is dropped.
    pub fn run(&mut self) -> Result<()> {
        let mut armed = self.config.autostart;
        let mut buffer: Option<SessionBuffer> = None;

        loop {
            if let Some(events) = &self.events {
                while let Ok(event) = events.try_recv() {
                    match event {
                        ControlEvent::Trigger => armed = true,
                        ControlEvent::Cancel => {
                            armed = false;
                            if buffer.take().is_some() {
                                info!("Capture cancelled, discarding partial buffer");
                            }
                        }
                        ControlEvent::Quit => {
                            info!("Quit requested");
                            return Ok(());
                        }
                    }
                }
            }
            if armed {
                armed = false;
                info!("Capture triggered");
                buffer = Some(self.new_session_buffer());
            }

            let Some(frame) = self.source.next_frame()? else {
                info!("No more frames");
                // A partially filled buffer is still worth one processing pass.
                if let Some(session) = buffer.take() {
                    if !session.is_empty() {
                        self.process(session.into_frames())?;
                    }
                }
                return Ok(());
            };

            if let Some(sink) = self.raw_sink.as_deref_mut() {
                sink.write(&frame)?;
            }

            let Some(session) = buffer.as_mut() else {
                debug!("Idle, proceeding");
                continue;
            };

            session.push(frame);
            debug!(
                "Got {}/{} frames, {}/{} stable",
                session.len(),
                self.config.buffer_capacity,
                session.stable_run(),
                self.config.required_stable_frames
            );

            if session.is_ready() {
                let session = buffer.take().unwrap();
                self.process(session.into_frames())?;
                // Back to Idle, re-armable by the next trigger.
            }
        }
    }

    fn new_session_buffer(&self) -> SessionBuffer {
        SessionBuffer::new(
            self.config.buffer_capacity,
            self.config.required_stable_frames,
            self.width * self.height,
            self.config.stability_ratio,
        )
    }

    /// One processing cycle over a completed session buffer.
    fn process(&mut self, frames: Vec<RgbImage>) -> Result<()> {
        info!("Capture complete, processing {} frames", frames.len());

        let frames = if self.config.stabilize {
            let stabilized = self
                .stabilizer
                .stabilize(&frames, self.stabilized_sink.as_deref_mut())?;
            // Enough to crop the aligned batch to its common area; the crop
            // itself is deliberately not applied.
            info!("Cumulative translation bounds: {:?}", stabilized.bounds);
            stabilized.frames
        } else {
            frames
        };

        info!("Removing background from {} frames", frames.len());
        let mut segmented = Vec::with_capacity(frames.len());
        for (index, frame) in frames.iter().enumerate() {
            segmented.push(segmenter::segment_frame(
                &mut self.background,
                frame,
                index,
                &self.segmenter_config,
            )?);
        }

        let surface = self.width * self.height;
        let mut kept = candidates::select(
            segmented,
            surface,
            self.config.warmup_fraction,
            self.config.keep,
        );
        if kept.is_empty() {
            info!("No candidate cleared the surface guard; nothing to export");
            return Ok(());
        }

        let written = exporter::export(&mut kept, &self.export_config)?;
        info!("Processing cycle done, {} object captures written", written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use image::Rgb;
    use std::sync::mpsc;

    fn config(capacity: usize) -> ControllerConfig {
        ControllerConfig {
            buffer_capacity: capacity,
            required_stable_frames: 0,
            stability_ratio: 0.1,
            warmup_fraction: 0.9,
            keep: 3,
            stabilize: false,
            autostart: true,
        }
    }

    fn segmenter_config() -> SegmenterConfig {
        SegmenterConfig {
            blur: 0,
            min_size: 0,
            remove_shadows: false,
            fill_holes: false,
            use_contour: false,
            contours_prefix: None,
        }
    }

    fn solid_frames(count: usize, value: u8) -> Vec<RgbImage> {
        (0..count)
            .map(|_| RgbImage::from_pixel(8, 8, Rgb([value, value, value])))
            .collect()
    }

    #[test]
    fn run_stops_on_source_exhaustion() {
        let source = MemorySource::new(solid_frames(5, 10), 8, 8);
        let mut controller = CaptureController::new(
            source,
            config(3),
            segmenter_config(),
            ExportConfig::default(),
        );
        controller.run().unwrap();
    }

    #[test]
    fn quit_event_stops_the_run_immediately() {
        let source = MemorySource::new(solid_frames(1000, 10), 8, 8);
        let (tx, rx) = mpsc::channel();
        tx.send(ControlEvent::Quit).unwrap();
        let mut controller = CaptureController::new(
            source,
            config(10),
            segmenter_config(),
            ExportConfig::default(),
        )
        .with_events(rx);
        controller.run().unwrap();
    }

    #[test]
    fn without_autostart_frames_pass_by_idle() {
        let source = MemorySource::new(solid_frames(5, 10), 8, 8);
        let mut cfg = config(3);
        cfg.autostart = false;
        let mut controller =
            CaptureController::new(source, cfg, segmenter_config(), ExportConfig::default());
        // No trigger ever arrives; the run just drains the source.
        controller.run().unwrap();
        assert_eq!(controller.background.frame_count(), 0);
    }

    #[test]
    fn buffered_frames_feed_the_background_model() {
        let source = MemorySource::new(solid_frames(6, 10), 8, 8);
        let mut controller = CaptureController::new(
            source,
            config(4),
            segmenter_config(),
            ExportConfig::default(),
        );
        controller.run().unwrap();
        // The first session processed 4 frames; the remaining 2 drained
        // through the idle state since nothing re-armed the controller.
        assert_eq!(controller.background.frame_count(), 4);
    }

    #[test]
    fn cancel_discards_pending_capture() {
        let source = MemorySource::new(solid_frames(4, 10), 8, 8);
        let (tx, rx) = mpsc::channel();
        tx.send(ControlEvent::Trigger).unwrap();
        tx.send(ControlEvent::Cancel).unwrap();
        let mut cfg = config(100);
        cfg.autostart = false;
        let mut controller =
            CaptureController::new(source, cfg, segmenter_config(), ExportConfig::default())
                .with_events(rx);
        controller.run().unwrap();
        // The trigger was cancelled before any frame was buffered, so the
        // remaining frames drained through the idle state untouched.
        assert_eq!(controller.background.frame_count(), 0);
    }
}
