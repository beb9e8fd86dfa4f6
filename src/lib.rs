//! TrackBox capture: fixed-duration V4L2 recording with environment logging.
//!
//! A capture thread polls the camera into a bounded, drop-on-full queue while
//! the control thread writes frames to an AVI file, samples a serial
//! temperature/humidity sensor, and enforces the session duration. Camera
//! operations go through traits so the pipeline can be tested against a mock
//! device.

pub mod avi;
pub mod cancel;
pub mod config;
pub mod device;
pub mod exposure;
pub mod output;
pub mod preview;
pub mod producer;
pub mod queue;
pub mod report;
pub mod sensor;
pub mod session;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use avi::{AviWriter, FrameSink};
pub use device::V4L2Device;
pub use exposure::{CalibrationConfig, ExposureCalibrator, ExposureMode};
pub use sensor::{SensorReading, SensorSampler, SerialSensorLink};
pub use session::{SessionConfig, SessionController, SessionSummary, StopReason};
pub use traits::{
    CameraDevice, CaptureStream, DeviceCapabilities, ExposureStep, Format, FourCC, Frame,
    FrameMetadata,
};
