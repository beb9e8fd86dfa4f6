//! Recording session: configure, record for a fixed duration, shut down.
//!
//! The control thread owns everything except the camera stream, which is
//! handed to a scoped producer thread for the duration of the recording
//! loop. Frames move through the bounded [`frame_queue`] into the
//! [`FrameSink`]; the sensor sampler and cancel signal are polled between
//! frames.

use crate::avi::FrameSink;
use crate::cancel::{CancelSignal, Never};
use crate::exposure::{DeviceProbe, ExposureCalibrator, ExposureMode};
use crate::preview::{NoPreview, PreviewSink};
use crate::producer::{FrameProducer, ProducerEnd, ProducerReport};
use crate::queue::{frame_queue, Poll, DEFAULT_CAPACITY};
use crate::sensor::{SensorReading, SensorSampler};
use crate::traits::{CameraDevice, CameraError, ExposureStep, Format};
use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Session tuning fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Wall-clock recording length.
    pub duration: Duration,
    /// Frame queue depth.
    pub queue_capacity: usize,
    /// Driver buffers requested for the capture stream.
    pub buffer_count: u32,
    /// Every n-th written frame goes to the preview; zero disables it.
    pub preview_every: u64,
    /// Longest wait for a frame before re-checking the clock.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(600),
            queue_capacity: DEFAULT_CAPACITY,
            buffer_count: 4,
            preview_every: 2,
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// Why the recording loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The configured duration elapsed.
    DurationElapsed,
    /// The operator asked to stop.
    Cancelled,
    /// An error or panic inside the loop.
    Failed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DurationElapsed => write!(f, "duration elapsed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// What a finished session did.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Frames handed to the sink.
    pub frames_written: u64,
    /// Frames read from the camera.
    pub frames_captured: u64,
    /// Frames discarded on a full queue.
    pub frames_dropped: u64,
    /// Time from loop start to loop exit.
    pub elapsed: Duration,
    /// How the loop ended.
    pub stop_reason: StopReason,
    /// How the capture thread ended; a camera that dies early does not end
    /// the session.
    pub producer_end: ProducerEnd,
    /// Exposure used for the recording.
    pub exposure: ExposureStep,
    /// Files produced by the sink.
    pub outputs: Vec<PathBuf>,
    /// Sensor readings collected.
    pub readings: usize,
}

impl SessionSummary {
    /// Frames written per second of recording.
    #[allow(clippy::cast_precision_loss)]
    pub fn achieved_fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_written as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stopped:          {}", self.stop_reason)?;
        writeln!(f, "Camera:           {}", self.producer_end)?;
        writeln!(f, "Frames written:   {}", self.frames_written)?;
        writeln!(f, "Frames captured:  {}", self.frames_captured)?;
        writeln!(f, "Frames dropped:   {}", self.frames_dropped)?;
        writeln!(f, "Elapsed:          {:.2} s", self.elapsed.as_secs_f64())?;
        writeln!(f, "Achieved rate:    {:.2} fps", self.achieved_fps())?;
        writeln!(f, "Exposure:         {}", self.exposure)?;
        writeln!(f, "Sensor readings:  {}", self.readings)?;
        for output in &self.outputs {
            writeln!(f, "Output:           {}", output.display())?;
        }
        Ok(())
    }
}

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Camera configuration or streaming failed.
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    /// The output could not be created.
    #[error("Output error: {0}")]
    Output(#[from] io::Error),
    /// The producer thread could not be started.
    #[error("Failed to spawn capture thread: {0}")]
    Spawn(io::Error),
    /// The session was already shut down.
    #[error("Session already shut down")]
    ShutDown,
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Owns the camera and every session resource through one recording.
pub struct SessionController<D: CameraDevice> {
    camera: Option<D>,
    config: SessionConfig,
    sink: Option<Box<dyn FrameSink>>,
    preview: Box<dyn PreviewSink>,
    cancel: Box<dyn CancelSignal>,
    sensor: Option<SensorSampler>,
    running: AtomicBool,
    readings: Vec<SensorReading>,
    outputs: Vec<PathBuf>,
    shut_down: bool,
}

impl<D: CameraDevice> SessionController<D> {
    /// Session over an opened camera, with no preview, cancel or sensor.
    pub fn new(camera: D, config: SessionConfig) -> Self {
        Self {
            camera: Some(camera),
            config,
            sink: None,
            preview: Box::new(NoPreview),
            cancel: Box::new(Never),
            sensor: None,
            running: AtomicBool::new(false),
            readings: Vec::new(),
            outputs: Vec::new(),
            shut_down: false,
        }
    }

    /// Show every n-th frame on `preview`.
    #[must_use]
    pub fn with_preview<P: PreviewSink + 'static>(mut self, preview: P) -> Self {
        self.preview = Box::new(preview);
        self
    }

    /// Stop early when `cancel` fires.
    #[must_use]
    pub fn with_cancel<C: CancelSignal + 'static>(mut self, cancel: C) -> Self {
        self.cancel = Box::new(cancel);
        self
    }

    /// Sample the environment sensor while recording.
    #[must_use]
    pub fn with_sensor(mut self, sensor: SensorSampler) -> Self {
        self.sensor = Some(sensor);
        self
    }

    /// Configure the camera, open the sink and record until the duration
    /// elapses or the operator cancels.
    ///
    /// A camera that stops delivering frames does not end the session: the
    /// sensor keeps being sampled until one of the exits above.
    ///
    /// `open_sink` receives the format the driver actually applied.
    /// Resources are released before returning on every path.
    pub fn run<F, S>(
        &mut self,
        requested: &Format,
        exposure: &ExposureMode,
        open_sink: F,
    ) -> Result<SessionSummary>
    where
        F: FnOnce(&Format) -> io::Result<S>,
        S: FrameSink + 'static,
    {
        let result = self
            .prepare(requested, exposure, open_sink)
            .and_then(|(format, step)| self.record(&format, step));
        self.shutdown();

        let mut summary = result?;
        summary.outputs.clone_from(&self.outputs);
        summary.readings = self.readings.len();
        info!(
            frames = summary.frames_written,
            dropped = summary.frames_dropped,
            fps = format_args!("{:.2}", summary.achieved_fps()),
            reason = %summary.stop_reason,
            "session finished"
        );
        Ok(summary)
    }

    fn prepare<F, S>(
        &mut self,
        requested: &Format,
        exposure: &ExposureMode,
        open_sink: F,
    ) -> Result<(Format, ExposureStep)>
    where
        F: FnOnce(&Format) -> io::Result<S>,
        S: FrameSink + 'static,
    {
        let camera = self.camera.as_mut().ok_or(SessionError::ShutDown)?;

        let applied = camera.set_format(requested)?;
        if !applied.same_resolution(requested) {
            warn!(
                requested_width = requested.width,
                requested_height = requested.height,
                width = applied.width,
                height = applied.height,
                "driver applied a different resolution"
            );
        }
        info!(
            width = applied.width,
            height = applied.height,
            fourcc = %applied.fourcc,
            "capture format set"
        );

        let step = match exposure {
            ExposureMode::Fixed { step, settle } => {
                camera.set_exposure(*step)?;
                info!(exposure = %step, "fixed exposure applied");
                if !settle.is_zero() {
                    thread::sleep(*settle);
                }
                *step
            }
            ExposureMode::Auto(tuning) => {
                let outcome = {
                    let mut probe =
                        DeviceProbe::new(&mut *camera, applied.clone(), self.config.buffer_count);
                    ExposureCalibrator::new(tuning.clone()).calibrate(&mut probe)?
                };
                camera.set_exposure(outcome.exposure)?;
                outcome.exposure
            }
        };

        if let Some(sensor) = self.sensor.as_mut() {
            if let Err(err) = sensor.start() {
                warn!(%err, "failed to start sensor, continuing without readings");
            }
        }

        self.sink = Some(Box::new(open_sink(&applied)?));
        Ok((applied, step))
    }

    fn record(&mut self, format: &Format, exposure: ExposureStep) -> Result<SessionSummary> {
        let Self {
            camera,
            config,
            sink,
            preview,
            cancel,
            sensor,
            running,
            ..
        } = self;
        let camera = camera.as_mut().ok_or(SessionError::ShutDown)?;
        let sink = sink.as_mut().ok_or(SessionError::ShutDown)?;
        let running: &AtomicBool = running;

        let stream = camera.create_stream(config.buffer_count)?;
        let (tx, rx) = frame_queue(config.queue_capacity);
        running.store(true, Ordering::Release);

        let started = Instant::now();
        let deadline = started + config.duration;
        info!(
            duration_s = config.duration.as_secs_f64(),
            queue = config.queue_capacity,
            "recording started"
        );

        thread::scope(|scope| -> Result<SessionSummary> {
            let _stop = StopOnExit(running);
            let producer = thread::Builder::new()
                .name("frame-producer".to_owned())
                .spawn_scoped(scope, move || FrameProducer::new(stream, tx).run(running))
                .map_err(SessionError::Spawn)?;

            let mut written = 0u64;
            let mut camera_ended = false;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| loop {
                match rx.next_timeout(config.poll_interval) {
                    Poll::Frame(frame) => {
                        if let Err(err) = sink.write_frame(&frame) {
                            error!(%err, sequence = frame.metadata.sequence, "frame write failed");
                            break StopReason::Failed(err.to_string());
                        }
                        written += 1;
                        if config.preview_every > 0 && written % config.preview_every == 0 {
                            preview.show(&frame, format);
                        }
                    }
                    Poll::Empty => {}
                    Poll::Closed => {
                        if !camera_ended {
                            camera_ended = true;
                            warn!(
                                frames = written,
                                "camera stopped, recording continues until the duration ends"
                            );
                        }
                        thread::sleep(config.poll_interval);
                    }
                }

                if Instant::now() >= deadline {
                    break StopReason::DurationElapsed;
                }
                if cancel.cancel_requested() {
                    break StopReason::Cancelled;
                }
                if let Some(sampler) = sensor.as_mut() {
                    sampler.poll();
                }
            }));
            let stop_reason = outcome.unwrap_or_else(|payload| {
                let reason = panic_message(payload.as_ref());
                error!(%reason, "recording loop panicked");
                StopReason::Failed(format!("panic: {reason}"))
            });
            let elapsed = started.elapsed();

            running.store(false, Ordering::Release);
            let report = producer.join().unwrap_or_else(|_| {
                error!("capture thread panicked");
                ProducerReport {
                    end: ProducerEnd::ReadFailed("capture thread panicked".to_owned()),
                    ..ProducerReport::default()
                }
            });
            debug!(
                left_in_queue = rx.len(),
                end = %report.end,
                "capture thread joined"
            );

            Ok(SessionSummary {
                frames_written: written,
                frames_captured: report.captured,
                frames_dropped: rx.stats().dropped,
                elapsed,
                stop_reason,
                producer_end: report.end,
                exposure,
                outputs: Vec::new(),
                readings: 0,
            })
        })
    }

    /// Release every resource: camera, output, preview, sensor.
    ///
    /// Runs automatically at the end of [`Self::run`] and on drop; later
    /// calls do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.running.store(false, Ordering::Release);

        if self.camera.take().is_some() {
            debug!("camera released");
        }
        if let Some(mut sink) = self.sink.take() {
            match sink.finish() {
                Ok(paths) => self.outputs.extend(paths),
                Err(err) => error!(%err, "failed to finalize output"),
            }
        }
        self.preview.close();
        if let Some(sensor) = self.sensor.take() {
            self.readings = sensor.finish();
        }
        info!("session shut down");
    }

    /// Take ownership of the collected readings.
    pub fn take_readings(&mut self) -> Vec<SensorReading> {
        std::mem::take(&mut self.readings)
    }
}

/// Clears the running flag when the recording scope is left, so the scope
/// never waits on a producer that was not told to stop.
struct StopOnExit<'a>(&'a AtomicBool);

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

impl<D: CameraDevice> Drop for SessionController<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
