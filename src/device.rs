//! V4L2 device implementation using the v4l crate.

use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    CameraDevice, CameraError, CaptureStream, DeviceCapabilities, ExposureStep, Format, FourCC,
    Frame, FrameMetadata, Result,
};
use std::time::Duration;
use tracing::{debug, warn};

/// `V4L2_CID_EXPOSURE_AUTO`
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
/// `V4L2_CID_EXPOSURE_ABSOLUTE`
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
/// `V4L2_EXPOSURE_MANUAL`
const EXPOSURE_MANUAL: i64 = 1;

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    device: Device,
    capabilities: DeviceCapabilities,
    /// Driver-reported `exposure_absolute` bounds, when the control exists.
    exposure_range: Option<(i64, i64)>,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        if !std::path::Path::new(&format!("/dev/video{index}")).exists() {
            return Err(CameraError::DeviceNotFound(index));
        }

        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        let exposure_range = device
            .query_controls()
            .map_err(|err| debug!(%err, "control enumeration failed"))
            .ok()
            .and_then(|controls| {
                controls
                    .into_iter()
                    .find(|desc| desc.id == CID_EXPOSURE_ABSOLUTE)
                    .map(|desc| (desc.minimum, desc.maximum))
            });

        if exposure_range.is_none() {
            warn!(index, "device reports no exposure_absolute control");
        }

        Ok(Self {
            device,
            capabilities,
            exposure_range,
        })
    }
}

impl CameraDevice for V4L2Device {
    type Stream<'a> = V4L2Stream<'a>;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self) -> Result<Format> {
        let fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn set_exposure(&mut self, step: ExposureStep) -> Result<()> {
        // Drivers without an auto-exposure menu reject this; the absolute
        // control below is the one that matters.
        if let Err(err) = self.device.set_control(Control {
            id: CID_EXPOSURE_AUTO,
            value: Value::Integer(EXPOSURE_MANUAL),
        }) {
            debug!(%err, "exposure_auto not settable");
        }

        let units = match self.exposure_range {
            Some((min, max)) => step.absolute_units().clamp(min, max),
            None => step.absolute_units(),
        };
        debug!(%step, units, "applying exposure");

        self.device
            .set_control(Control {
                id: CID_EXPOSURE_ABSOLUTE,
                value: Value::Integer(units),
            })
            .map_err(|err| CameraError::ControlFailed(format!("exposure {step}: {err}")))
    }

    fn create_stream(&mut self, buffer_count: u32) -> Result<Self::Stream<'_>> {
        let stream = Stream::with_buffers(&self.device, Type::VideoCapture, buffer_count)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        Ok(V4L2Stream { stream })
    }
}

/// V4L2 capture stream wrapping mmap-based streaming.
pub struct V4L2Stream<'a> {
    stream: Stream<'a>,
}

impl CaptureStream for V4L2Stream<'_> {
    fn next_frame(&mut self) -> Result<Frame> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        // V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let data = buf.get(..used).unwrap_or(buf).to_vec();

        Ok(Frame {
            data,
            metadata: FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        })
    }
}
