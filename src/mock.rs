//! Mock device implementation for testing without hardware.

use crate::traits::{
    CameraDevice, CameraError, CaptureStream, DeviceCapabilities, ExposureStep, Format, FourCC,
    Frame, FrameMetadata, Result,
};
use std::time::{Duration, Instant};

/// Mock device for testing without hardware.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    format: Format,
    frame_count: u32,
    pattern: TestPattern,
    exposure: ExposureStep,
    exposure_history: Vec<ExposureStep>,
    frame_interval: Option<Duration>,
    fail_after: Option<u32>,
    max_resolution: Option<(u32, u32)>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: Format::new(640, 480, FourCC::YUYV),
            frame_count: 0,
            pattern: TestPattern::ColorBars,
            exposure: ExposureStep::NEUTRAL,
            exposure_history: Vec::new(),
            frame_interval: None,
            fail_after: None,
            max_resolution: None,
        }
    }

    /// Default pattern for streams created from this device.
    #[must_use]
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Pace frames at the given rate instead of returning them immediately.
    #[must_use]
    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_interval = Some(Duration::from_secs_f64(1.0 / fps));
        self
    }

    /// Fail every read after `frames` frames have been delivered.
    #[must_use]
    pub fn with_fail_after(mut self, frames: u32) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Clamp requested resolutions the way a real driver would.
    #[must_use]
    pub fn with_max_resolution(mut self, width: u32, height: u32) -> Self {
        self.max_resolution = Some((width, height));
        self
    }

    /// Currently applied exposure.
    #[must_use]
    pub const fn exposure(&self) -> ExposureStep {
        self.exposure
    }

    /// Every exposure applied so far, in order.
    #[must_use]
    pub fn exposure_history(&self) -> &[ExposureStep] {
        &self.exposure_history
    }
}

impl CameraDevice for MockDevice {
    type Stream<'a> = MockStream<'a>;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self) -> Result<Format> {
        Ok(self.format.clone())
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let (width, height) = match self.max_resolution {
            Some((max_w, max_h)) => (format.width.min(max_w), format.height.min(max_h)),
            None => (format.width, format.height),
        };
        self.format = Format::new(width, height, format.fourcc);
        Ok(self.format.clone())
    }

    fn set_exposure(&mut self, step: ExposureStep) -> Result<()> {
        self.exposure = step;
        self.exposure_history.push(step);
        Ok(())
    }

    fn create_stream(&mut self, _buffer_count: u32) -> Result<Self::Stream<'_>> {
        let pattern = self.pattern;
        Ok(MockStream {
            device: self,
            pattern,
            next_due: None,
        })
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Flat grey scene whose luminance follows the applied exposure:
    /// `Y = base + gain * exposure`, saturating at 0 and 255.
    Lit {
        /// Luminance at exposure step 0.
        base: u8,
        /// Luminance change per exposure step.
        gain: i32,
    },
}

/// Mock capture stream for testing.
pub struct MockStream<'a> {
    device: &'a mut MockDevice,
    pattern: TestPattern,
    next_due: Option<Instant>,
}

impl MockStream<'_> {
    fn pace(&mut self) {
        let Some(interval) = self.device.frame_interval else {
            return;
        };
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + interval);
    }
}

impl CaptureStream for MockStream<'_> {
    fn next_frame(&mut self) -> Result<Frame> {
        if let Some(limit) = self.device.fail_after {
            if self.device.frame_count >= limit {
                return Err(CameraError::StreamError("mock stream exhausted".to_owned()));
            }
        }
        self.pace();

        let format = &self.device.format;
        let data = generate_test_frame(format, self.pattern, self.device.exposure);

        let seq = self.device.frame_count;
        self.device.frame_count += 1;

        Ok(Frame {
            data,
            metadata: FrameMetadata {
                sequence: seq,
                timestamp: Duration::from_millis(u64::from(seq) * 33), // ~30fps
                bytes_used: format.size,
            },
        })
    }
}

/// Generate test frame data based on pattern.
fn generate_test_frame(format: &Format, pattern: TestPattern, exposure: ExposureStep) -> Vec<u8> {
    let size = (format.width * format.height * 2) as usize; // YUYV = 2 bytes/pixel
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => {
            generate_color_bars(&mut data, format.width, format.height);
        }
        TestPattern::Lit { base, gain } => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let y = (i32::from(base) + gain * exposure.value()).clamp(0, 255) as u8;
            generate_solid(&mut data, y, 128, 128);
        }
    }

    data
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if offset + 3 < data.len() {
                data[offset] = y_val;
                data[offset + 1] = u_val;
                data[offset + 2] = y_val;
                data[offset + 3] = v_val;
            }
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for chunk in data.chunks_exact_mut(4) {
        chunk.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.capabilities().can_stream);
    }

    #[test]
    fn test_mock_device_format() {
        let mut device = MockDevice::new();
        let format = device.format().expect("format should succeed");
        assert_eq!(format.width, 640);
        assert_eq!(format.height, 480);

        let new_format = Format::new(1280, 720, FourCC::YUYV);
        let actual = device.set_format(&new_format).expect("set_format should succeed");
        assert_eq!(actual.width, 1280);
        assert_eq!(actual.height, 720);
    }

    #[test]
    fn test_mock_device_clamps_resolution() {
        let mut device = MockDevice::new().with_max_resolution(1920, 1080);
        let actual = device
            .set_format(&Format::new(2592, 1944, FourCC::YUYV))
            .expect("set_format should succeed");
        assert_eq!((actual.width, actual.height), (1920, 1080));
    }

    #[test]
    fn test_mock_stream_capture() {
        let mut device = MockDevice::new();
        let mut stream = device.create_stream(4).expect("create_stream should succeed");

        let frame1 = stream.next_frame().expect("next_frame should succeed");
        assert_eq!(frame1.metadata.sequence, 0);
        assert!(!frame1.data.is_empty());

        let frame2 = stream.next_frame().expect("next_frame should succeed");
        assert_eq!(frame2.metadata.sequence, 1);
    }

    #[test]
    fn test_mock_stream_fails_after_limit() {
        let mut device = MockDevice::new().with_fail_after(2);
        let mut stream = device.create_stream(4).expect("create_stream should succeed");

        assert!(stream.next_frame().is_ok());
        assert!(stream.next_frame().is_ok());
        assert!(stream.next_frame().is_err());
    }

    #[test]
    fn test_lit_pattern_follows_exposure() {
        let format = Format::new(64, 64, FourCC::YUYV);
        let lit = TestPattern::Lit { base: 40, gain: 12 };

        let dark = generate_test_frame(&format, lit, ExposureStep::NEUTRAL);
        assert_eq!(dark[0], 40);

        let bright = generate_test_frame(&format, lit, ExposureStep::new(5));
        assert_eq!(bright[0], 100);

        let saturated = generate_test_frame(&format, lit, ExposureStep::MAX);
        assert_eq!(saturated[0], 160);
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars, ExposureStep::NEUTRAL);

        assert_eq!(data.len(), (640 * 480 * 2) as usize);

        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }
}
