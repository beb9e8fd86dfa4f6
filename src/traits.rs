//! Core traits and types for camera abstraction.

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use std::time::Duration;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// GREY pixel format (8-bit luminance).
    pub const GREY: Self = Self::new(b"GREY");

    /// Bytes per pixel for packed formats, `None` for compressed ones.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> Option<u32> {
        match &self.0 {
            b"YUYV" => Some(2),
            b"RGB3" => Some(3),
            b"GREY" => Some(1),
            _ => None,
        }
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride). Zero for compressed formats.
    pub stride: u32,
    /// Total frame size in bytes (upper bound for compressed formats).
    pub size: u32,
}

impl Format {
    /// Create a new format specification.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let (stride, size) = match fourcc.bytes_per_pixel() {
            Some(bpp) => (width * bpp, width * bpp * height),
            None => (0, width * height),
        };
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }

    /// Whether the width and height match another format.
    #[must_use]
    pub const fn same_resolution(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// The meaningful part of the buffer, as reported by the driver.
    ///
    /// Drivers may hand out buffers larger than the encoded image; a zero
    /// `bytes_used` means the whole buffer is valid.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let used = self.metadata.bytes_used as usize;
        if used == 0 {
            return &self.data;
        }
        self.data.get(..used).unwrap_or(&self.data)
    }

    /// Extract an 8-bit luminance image from this frame.
    ///
    /// Packed formats honour the stride in `format`; MJPEG frames are
    /// decoded and their own dimensions are used.
    pub fn luma(&self, format: &Format) -> Result<GrayImage> {
        let payload = self.payload();
        let width = format.width;
        let height = format.height;

        match format.fourcc {
            FourCC::YUYV => {
                let rows = packed_rows(payload, format, 2)?;
                let plane: Vec<u8> = rows.into_iter().step_by(2).collect();
                GrayImage::from_raw(width, height, plane)
                    .ok_or_else(|| short_payload(payload.len(), format))
            }
            FourCC::GREY => {
                let plane = packed_rows(payload, format, 1)?;
                GrayImage::from_raw(width, height, plane)
                    .ok_or_else(|| short_payload(payload.len(), format))
            }
            FourCC::RGB3 => {
                let rgb = packed_rows(payload, format, 3)?;
                let image = RgbImage::from_raw(width, height, rgb)
                    .ok_or_else(|| short_payload(payload.len(), format))?;
                Ok(DynamicImage::ImageRgb8(image).to_luma8())
            }
            FourCC::MJPG => Ok(image::load_from_memory_with_format(payload, ImageFormat::Jpeg)?
                .to_luma8()),
            _ => Err(CameraError::FormatNotSupported(format.clone())),
        }
    }
}

/// Copy the visible bytes of each row, dropping stride padding.
fn packed_rows(payload: &[u8], format: &Format, bytes_per_pixel: usize) -> Result<Vec<u8>> {
    let row_bytes = format.width as usize * bytes_per_pixel;
    let stride = (format.stride as usize).max(row_bytes);
    if row_bytes == 0 {
        return Err(short_payload(payload.len(), format));
    }

    let rows: Vec<u8> = payload
        .chunks(stride)
        .take(format.height as usize)
        .flat_map(|row| row.iter().take(row_bytes).copied())
        .collect();

    if rows.len() == row_bytes * format.height as usize {
        Ok(rows)
    } else {
        Err(short_payload(payload.len(), format))
    }
}

fn short_payload(len: usize, format: &Format) -> CameraError {
    CameraError::FrameDecode(format!(
        "{len} byte payload is too short for {}x{} {}",
        format.width, format.height, format.fourcc
    ))
}

/// Logical exposure setting in whole steps.
///
/// Step `e` corresponds to an exposure time of `2^e` seconds; the usable
/// range is `[-10, 10]` and every constructor clamps into it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExposureStep(i32);

impl ExposureStep {
    /// Shortest exposure.
    pub const MIN: Self = Self(-10);
    /// Longest exposure.
    pub const MAX: Self = Self(10);
    /// Starting point for calibration.
    pub const NEUTRAL: Self = Self(0);

    /// Create a step, clamped into `[-10, 10]`.
    #[must_use]
    pub fn new(value: i32) -> Self {
        Self(value.clamp(Self::MIN.0, Self::MAX.0))
    }

    /// The raw step value.
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }

    /// One step longer, saturating at [`Self::MAX`].
    #[must_use]
    pub fn brighter(self) -> Self {
        Self::new(self.0 + 1)
    }

    /// One step shorter, saturating at [`Self::MIN`].
    #[must_use]
    pub fn darker(self) -> Self {
        Self::new(self.0 - 1)
    }

    /// Exposure time in V4L2 `exposure_absolute` units (100 µs).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn absolute_units(self) -> i64 {
        let units = 10_000.0_f64 * 2.0_f64.powi(self.0);
        (units.round() as i64).max(1)
    }
}

impl std::fmt::Display for ExposureStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Device with given index was not found.
    #[error("Device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Requested format is not supported.
    #[error("Format not supported: {0:?}")]
    FormatNotSupported(Format),
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// A device control could not be applied.
    #[error("Control error: {0}")]
    ControlFailed(String),
    /// Frame contents could not be interpreted.
    #[error("Frame decode error: {0}")]
    FrameDecode(String),
    /// Compressed frame decoding failed.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Abstraction over camera device operations.
pub trait CameraDevice {
    /// The stream type returned by `create_stream`.
    ///
    /// Streams are handed to the producer thread, hence `Send`.
    type Stream<'a>: CaptureStream + Send
    where
        Self: 'a;

    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Get current format.
    fn format(&self) -> Result<Format>;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> Result<Format>;

    /// Switch to manual exposure and apply the given step.
    fn set_exposure(&mut self, step: ExposureStep) -> Result<()>;

    /// Create a capture stream with the specified number of buffers.
    fn create_stream(&mut self, buffer_count: u32) -> Result<Self::Stream<'_>>;
}

/// Abstraction over capture stream operations.
pub trait CaptureStream {
    /// Capture the next frame from the stream, blocking until one arrives.
    fn next_frame(&mut self) -> Result<Frame>;
}
