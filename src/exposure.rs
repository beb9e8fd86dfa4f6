//! Closed-loop exposure calibration from brightness histograms.
//!
//! Before recording, the camera is stepped through exposure values until the
//! central region of the image is neither clipped nor crushed and its mean
//! luminance sits in a target band. The result is applied once and kept for
//! the whole session.

use crate::traits::{CameraDevice, CaptureStream, ExposureStep, Format, Result};
use image::{GenericImageView, GrayImage};
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Luminance bins `[0, DARK_BINS)` count as dark.
const DARK_BINS: usize = 64;
/// Luminance bins `[BRIGHT_FROM, 256)` count as bright.
const BRIGHT_FROM: usize = 192;

/// How exposure is chosen before recording starts.
#[derive(Debug, Clone, PartialEq)]
pub enum ExposureMode {
    /// Apply a fixed step, then give the camera time to settle focus and gain.
    Fixed {
        /// Step to apply.
        step: ExposureStep,
        /// Pause after applying it.
        settle: Duration,
    },
    /// Run the calibrator.
    Auto(CalibrationConfig),
}

/// Tuning for [`ExposureCalibrator`].
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationConfig {
    /// Upper bound on measurement rounds.
    pub max_attempts: u32,
    /// Fraction of width and height forming the measured central region.
    pub center_ratio: f64,
    /// Wait after each exposure change before grabbing a frame.
    pub settle: Duration,
    /// Dark pixel fraction above which exposure is increased.
    pub dark_limit: f64,
    /// Bright pixel fraction above which exposure is decreased.
    pub bright_limit: f64,
    /// Acceptable mean luminance.
    pub target_mean: RangeInclusive<f64>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            center_ratio: 0.7,
            settle: Duration::from_millis(500),
            dark_limit: 0.3,
            bright_limit: 0.2,
            target_mean: 90.0..=150.0,
        }
    }
}

/// Brightness statistics of one measured region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrightnessStats {
    /// Average luminance.
    pub mean: f64,
    /// Fraction of pixels below 64.
    pub dark_fraction: f64,
    /// Fraction of pixels at or above 192.
    pub bright_fraction: f64,
}

impl BrightnessStats {
    /// Measure the centred region covering `center_ratio` of each dimension.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn measure(luma: &GrayImage, center_ratio: f64) -> Self {
        let ratio = center_ratio.clamp(0.0, 1.0);
        let (width, height) = luma.dimensions();
        let crop_w = (f64::from(width) * ratio) as u32;
        let crop_h = (f64::from(height) * ratio) as u32;
        let x = (width - crop_w) / 2;
        let y = (height - crop_h) / 2;

        let mut histogram = [0u64; 256];
        for (_, _, pixel) in luma.view(x, y, crop_w, crop_h).pixels() {
            if let Some(bin) = histogram.get_mut(usize::from(pixel.0[0])) {
                *bin += 1;
            }
        }

        let total: u64 = histogram.iter().sum();
        if total == 0 {
            return Self {
                mean: 0.0,
                dark_fraction: 0.0,
                bright_fraction: 0.0,
            };
        }

        let weighted: u64 = histogram
            .iter()
            .zip(0u64..)
            .map(|(count, level)| count * level)
            .sum();
        let dark: u64 = histogram.iter().take(DARK_BINS).sum();
        let bright: u64 = histogram.iter().skip(BRIGHT_FROM).sum();

        let total = total as f64;
        Self {
            mean: weighted as f64 / total,
            dark_fraction: dark as f64 / total,
            bright_fraction: bright as f64 / total,
        }
    }
}

/// One calibration round as observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureState {
    /// Exposure in effect for the measured frame.
    pub exposure: ExposureStep,
    /// Average luminance of the central region.
    pub mean_brightness: f64,
    /// Fraction of dark pixels.
    pub dark_fraction: f64,
    /// Fraction of bright pixels.
    pub bright_fraction: f64,
    /// Round number, starting at 1.
    pub attempt: u32,
}

/// Decision taken after a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    /// Shorten the exposure.
    Darker,
    /// Lengthen the exposure.
    Brighter,
    /// Keep the current exposure and stop.
    Converged,
}

/// Result of a calibration run.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOutcome {
    /// Exposure to keep for the session.
    pub exposure: ExposureStep,
    /// Rounds performed.
    pub attempts: u32,
    /// Whether the target band was reached.
    pub converged: bool,
    /// Last successful measurement, if any.
    pub last: Option<ExposureState>,
}

/// Something the calibrator can drive: apply an exposure, look at a frame.
pub trait ExposureTarget {
    /// Apply an exposure step.
    fn apply_exposure(&mut self, step: ExposureStep) -> Result<()>;

    /// Capture one frame and return its luminance.
    fn grab_luma(&mut self) -> Result<GrayImage>;
}

/// Drives exposure calibration on a real camera device.
///
/// A short-lived stream is opened per grab so exposure can be changed on
/// the device between measurements.
pub struct DeviceProbe<'a, D> {
    device: &'a mut D,
    format: Format,
    buffer_count: u32,
}

impl<'a, D: CameraDevice> DeviceProbe<'a, D> {
    /// Probe `device`, interpreting frames with the applied `format`.
    pub fn new(device: &'a mut D, format: Format, buffer_count: u32) -> Self {
        Self {
            device,
            format,
            buffer_count,
        }
    }
}

impl<D: CameraDevice> ExposureTarget for DeviceProbe<'_, D> {
    fn apply_exposure(&mut self, step: ExposureStep) -> Result<()> {
        self.device.set_exposure(step)
    }

    fn grab_luma(&mut self) -> Result<GrayImage> {
        let mut stream = self.device.create_stream(self.buffer_count)?;
        let frame = stream.next_frame()?;
        frame.luma(&self.format)
    }
}

/// One-shot closed-loop exposure controller.
#[derive(Debug, Clone, Default)]
pub struct ExposureCalibrator {
    config: CalibrationConfig,
}

impl ExposureCalibrator {
    /// Create a calibrator with the given tuning.
    pub const fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    /// Decide how to move exposure given a measurement.
    ///
    /// Clipping is checked before crushing, and both before the mean.
    pub fn decide(&self, stats: &BrightnessStats) -> Adjustment {
        if stats.bright_fraction > self.config.bright_limit {
            Adjustment::Darker
        } else if stats.dark_fraction > self.config.dark_limit {
            Adjustment::Brighter
        } else if self.config.target_mean.contains(&stats.mean) {
            Adjustment::Converged
        } else if stats.mean < *self.config.target_mean.start() {
            Adjustment::Brighter
        } else {
            Adjustment::Darker
        }
    }

    /// Run calibration starting from exposure 0.
    ///
    /// Returns the last exposure tried. A failed frame grab ends calibration
    /// early with the exposure in effect; failing to apply an exposure is an
    /// error.
    pub fn calibrate<T: ExposureTarget + ?Sized>(&self, target: &mut T) -> Result<CalibrationOutcome> {
        let mut exposure = ExposureStep::NEUTRAL;
        let mut outcome = CalibrationOutcome {
            exposure,
            attempts: 0,
            converged: false,
            last: None,
        };

        for attempt in 1..=self.config.max_attempts {
            target.apply_exposure(exposure)?;
            if !self.config.settle.is_zero() {
                std::thread::sleep(self.config.settle);
            }
            outcome.exposure = exposure;
            outcome.attempts = attempt;

            let luma = match target.grab_luma() {
                Ok(luma) => luma,
                Err(err) => {
                    warn!(%err, %exposure, "frame grab failed, stopping calibration");
                    return Ok(outcome);
                }
            };

            let stats = BrightnessStats::measure(&luma, self.config.center_ratio);
            let state = ExposureState {
                exposure,
                mean_brightness: stats.mean,
                dark_fraction: stats.dark_fraction,
                bright_fraction: stats.bright_fraction,
                attempt,
            };
            info!(
                attempt,
                %exposure,
                mean = format_args!("{:.1}", stats.mean),
                dark = format_args!("{:.2}", stats.dark_fraction),
                bright = format_args!("{:.2}", stats.bright_fraction),
                "exposure measurement"
            );
            outcome.last = Some(state);

            match self.decide(&stats) {
                Adjustment::Converged => {
                    outcome.converged = true;
                    break;
                }
                Adjustment::Brighter => exposure = exposure.brighter(),
                Adjustment::Darker => exposure = exposure.darker(),
            }
            debug!(next = %exposure, "adjusting exposure");
        }

        info!(
            exposure = %outcome.exposure,
            attempts = outcome.attempts,
            converged = outcome.converged,
            "exposure calibration finished"
        );
        Ok(outcome)
    }
}
