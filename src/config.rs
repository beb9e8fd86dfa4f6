//! Command-line configuration.

use crate::exposure::{CalibrationConfig, ExposureMode};
use crate::queue::DEFAULT_CAPACITY;
use crate::sensor::{SamplerConfig, DEFAULT_BAUD_RATE};
use crate::session::SessionConfig;
use crate::traits::{ExposureStep, Format, FourCC};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Capture pixel formats that can be recorded.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion JPEG.
    Mjpg,
    /// Packed YUV 4:2:2.
    Yuyv,
    /// 8-bit greyscale.
    Grey,
}

impl From<PixelFormat> for FourCC {
    fn from(format: PixelFormat) -> Self {
        match format {
            PixelFormat::Mjpg => Self::MJPG,
            PixelFormat::Yuyv => Self::YUYV,
            PixelFormat::Grey => Self::GREY,
        }
    }
}

/// Fixed-duration recording with environment logging.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Camera index (/dev/videoN).
    #[arg(long, default_value_t = 0)]
    pub camera: u32,
    /// Requested frame width.
    #[arg(long, default_value_t = 2592)]
    pub width: u32,
    /// Requested frame height.
    #[arg(long, default_value_t = 1944)]
    pub height: u32,
    /// Capture pixel format.
    #[arg(long, value_enum, default_value_t = PixelFormat::Mjpg)]
    pub pixel_format: PixelFormat,
    /// Fixed exposure step; 2^step seconds.
    #[arg(
        long,
        default_value_t = -7,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i32).range(-10..=10)
    )]
    pub exposure: i32,
    /// Calibrate exposure from image brightness instead of using --exposure.
    #[arg(long, conflicts_with = "exposure")]
    pub auto_exposure: bool,
    /// Seconds to wait after applying a fixed exposure.
    #[arg(long, default_value_t = 2.5)]
    pub settle: f64,
    /// Nominal frame rate written into the video header.
    #[arg(long, default_value_t = 20.0)]
    pub fps: f64,
    /// Recording length in seconds.
    #[arg(long, default_value_t = 600)]
    pub duration: u64,
    /// Directory for the video and report files.
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,
    /// Video file name prefix, followed by a timestamp.
    #[arg(long, default_value = "video_")]
    pub prefix: String,
    /// Sensor serial port; discovered automatically when omitted.
    #[arg(long)]
    pub serial_port: Option<String>,
    /// Sensor link speed.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud_rate: u32,
    /// Minimum seconds between sensor readings.
    #[arg(long, default_value_t = 5.0)]
    pub sensor_interval: f64,
    /// Record video only.
    #[arg(long)]
    pub no_sensor: bool,
    /// Frame queue depth between capture and disk.
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pub queue_capacity: usize,
    /// Driver buffers for the capture stream.
    #[arg(long, default_value_t = 4)]
    pub buffers: u32,
    /// Debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl Args {
    /// Requested capture format.
    pub fn format(&self) -> Format {
        Format::new(self.width, self.height, self.pixel_format.into())
    }

    /// How exposure is chosen before recording.
    pub fn exposure_mode(&self) -> ExposureMode {
        if self.auto_exposure {
            ExposureMode::Auto(CalibrationConfig::default())
        } else {
            ExposureMode::Fixed {
                step: ExposureStep::new(self.exposure),
                settle: seconds(self.settle),
            }
        }
    }

    /// Session timing and buffering.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            duration: Duration::from_secs(self.duration),
            queue_capacity: self.queue_capacity,
            buffer_count: self.buffers,
            ..SessionConfig::default()
        }
    }

    /// Sensor rate limiting.
    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            min_interval: seconds(self.sensor_interval),
            ..SamplerConfig::default()
        }
    }
}
