//! Temperature/humidity sampling over a line-oriented serial link.
//!
//! The sensor board prints lines such as `Temp: 23.5 C, Humid: 55.0 %`. The
//! recording loop polls far more often than the board produces lines, so the
//! sampler rate-limits itself and treats every failure (timeout, noise,
//! unparseable text) as "no reading this time".

use chrono::{DateTime, Local};
use serde::Serialize;
use serialport::{ClearBuffer, SerialPort, SerialPortType, UsbPortInfo};
use std::io::{BufRead, BufReader, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Default link speed.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// How long a line read waits before giving up.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// USB vendor id of WCH (CH340 bridges).
const WCH_VENDOR_ID: u16 = 0x1a86;

/// Error type for sensor operations.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    /// The serial port could not be opened or configured.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    /// Reading or writing the link failed (including timeouts).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The link returned end-of-file.
    #[error("Sensor link closed")]
    Closed,
    /// No decoder produced text.
    #[error("Undecodable sensor line ({0} bytes)")]
    Undecodable(usize),
    /// Text did not match the expected two-field pattern.
    #[error("Malformed sensor line: {0:?}")]
    Malformed(String),
}

/// Result type for sensor operations.
pub type Result<T> = std::result::Result<T, SensorError>;

/// Commands understood by the sensor board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCommand {
    /// Begin streaming readings.
    Start,
    /// Stop streaming readings.
    Stop,
}

impl SensorCommand {
    /// Wire form, newline terminated.
    pub const fn line(self) -> &'static [u8] {
        match self {
            Self::Start => b"START\n",
            Self::Stop => b"STOP\n",
        }
    }
}

/// One timestamped sensor sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    /// Wall-clock time of sampling, `HH:MM:SS`.
    #[serde(rename = "Time")]
    pub timestamp: String,
    /// Temperature in °C.
    #[serde(rename = "Temperature (°C)")]
    pub temperature: f64,
    /// Relative humidity in %.
    #[serde(rename = "Humidity (%)")]
    pub humidity: f64,
}

/// A line-oriented link to the sensor board.
pub trait SensorLink {
    /// Discard everything received but not yet read.
    fn clear_input(&mut self) -> Result<()>;

    /// Read bytes up to and including the next newline.
    fn read_line(&mut self) -> Result<Vec<u8>>;

    /// Send a command line.
    fn send(&mut self, command: SensorCommand) -> Result<()>;
}

/// [`SensorLink`] over a serial port.
pub struct SerialSensorLink {
    reader: BufReader<Box<dyn SerialPort>>,
    name: String,
}

impl SerialSensorLink {
    /// Open `path` at `baud_rate`; reads give up after `timeout`.
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud_rate).timeout(timeout).open()?;
        info!(port = path, baud_rate, "sensor link open");
        Ok(Self {
            reader: BufReader::new(port),
            name: path.to_owned(),
        })
    }

    /// Port name this link was opened on.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SensorLink for SerialSensorLink {
    fn clear_input(&mut self) -> Result<()> {
        let buffered = self.reader.buffer().len();
        self.reader.consume(buffered);
        self.reader.get_ref().clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line)? == 0 {
            return Err(SensorError::Closed);
        }
        Ok(line)
    }

    fn send(&mut self, command: SensorCommand) -> Result<()> {
        let port = self.reader.get_mut();
        port.write_all(command.line())?;
        port.flush()?;
        Ok(())
    }
}

/// Pick the serial port the sensor board is most likely attached to.
///
/// Prefers CH340 / generic USB-serial bridges and falls back to the first
/// port listed. Returns `None` when no port exists.
pub fn discover_port() -> Option<String> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(err) => {
            warn!(%err, "serial port enumeration failed");
            return None;
        }
    };

    for port in &ports {
        debug!(port = %port.port_name, kind = ?port.port_type, "found serial port");
    }

    let chosen = ports
        .iter()
        .find(|port| matches!(&port.port_type, SerialPortType::UsbPort(usb) if is_usb_serial_bridge(usb)))
        .or_else(|| ports.first())?;
    info!(port = %chosen.port_name, "selected sensor port");
    Some(chosen.port_name.clone())
}

fn is_usb_serial_bridge(usb: &UsbPortInfo) -> bool {
    usb.vid == WCH_VENDOR_ID
        || [usb.product.as_deref(), usb.manufacturer.as_deref()]
            .into_iter()
            .flatten()
            .map(str::to_uppercase)
            .any(|text| text.contains("CH340") || text.contains("USB-SERIAL"))
}

type Decoder = fn(&[u8]) -> Option<String>;

/// Text decoders tried in order until one succeeds.
const DECODERS: [(&str, Decoder); 3] = [
    ("utf-8", decode_utf8),
    ("ascii", decode_ascii),
    ("latin-1", decode_latin1),
];

fn decode_utf8(bytes: &[u8]) -> Option<String> {
    std::str::from_utf8(bytes).ok().map(str::to_owned)
}

/// ASCII with every non-ASCII byte dropped; fails if nothing is left.
fn decode_ascii(bytes: &[u8]) -> Option<String> {
    let text: String = bytes
        .iter()
        .filter(|byte| byte.is_ascii())
        .map(|&byte| char::from(byte))
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

fn decode_latin1(bytes: &[u8]) -> Option<String> {
    Some(bytes.iter().map(|&byte| char::from(byte)).collect())
}

/// Decode a raw line, trimming surrounding whitespace and line endings.
pub fn decode_line(bytes: &[u8]) -> Option<String> {
    DECODERS.iter().find_map(|(name, decode)| {
        decode(bytes).map(|text| {
            trace!(encoding = name, "decoded sensor line");
            text.trim().to_owned()
        })
    })
}

/// Parse `"<label>: <value> <unit>, <label>: <value> <unit>"` into
/// `(temperature, humidity)`.
pub fn parse_sensor_line(line: &str) -> Result<(f64, f64)> {
    let malformed = || SensorError::Malformed(line.to_owned());

    if !line.contains(':') || !line.contains(',') {
        return Err(malformed());
    }

    let mut fields = line.split(", ");
    let temperature = fields.next().and_then(field_value).ok_or_else(malformed)?;
    let humidity = fields.next().and_then(field_value).ok_or_else(malformed)?;
    Ok((temperature, humidity))
}

/// `"Temp: 23.5 C"` -> `23.5`
fn field_value(field: &str) -> Option<f64> {
    let value = field.rsplit(": ").next()?.split(' ').next()?;
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Tuning for [`SensorSampler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Minimum time between two recorded readings.
    pub min_interval: Duration,
    /// Delay before trying again after a failed attempt.
    pub retry_interval: Duration,
    /// Pause between opening the link and sending `START`.
    pub link_settle: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            retry_interval: Duration::from_secs(1),
            link_settle: Duration::from_secs(2),
        }
    }
}

/// Rate-limited reader that accumulates [`SensorReading`]s.
pub struct SensorSampler {
    link: Box<dyn SensorLink>,
    config: SamplerConfig,
    last_sample: Option<Instant>,
    retry_at: Option<Instant>,
    readings: Vec<SensorReading>,
}

impl SensorSampler {
    /// Create a sampler over `link`.
    pub fn new<L: SensorLink + 'static>(link: L, config: SamplerConfig) -> Self {
        Self {
            link: Box::new(link),
            config,
            last_sample: None,
            retry_at: None,
            readings: Vec::new(),
        }
    }

    /// Give the board time to boot, then ask it to start streaming.
    pub fn start(&mut self) -> Result<()> {
        if !self.config.link_settle.is_zero() {
            std::thread::sleep(self.config.link_settle);
        }
        self.link.send(SensorCommand::Start)
    }

    /// Sample now if the rate limit allows.
    pub fn poll(&mut self) -> Option<SensorReading> {
        self.poll_at(Instant::now(), Local::now())
    }

    /// Sample at the given instant if the rate limit allows.
    ///
    /// Returns the new reading, or `None` when rate limited or when the
    /// attempt failed (the failure is logged).
    pub fn poll_at(&mut self, now: Instant, wall_clock: DateTime<Local>) -> Option<SensorReading> {
        let min_interval = self.config.min_interval;
        if self
            .last_sample
            .is_some_and(|last| now.saturating_duration_since(last) < min_interval)
        {
            return None;
        }
        if self.retry_at.is_some_and(|at| now < at) {
            return None;
        }

        match self.sample() {
            Ok((temperature, humidity)) => {
                let reading = SensorReading {
                    timestamp: wall_clock.format("%H:%M:%S").to_string(),
                    temperature,
                    humidity,
                };
                debug!(temperature, humidity, "sensor reading");
                self.readings.push(reading.clone());
                self.last_sample = Some(now);
                self.retry_at = None;
                Some(reading)
            }
            Err(err) => {
                warn!(%err, "sensor sample skipped");
                self.retry_at = Some(now + self.config.retry_interval);
                None
            }
        }
    }

    fn sample(&mut self) -> Result<(f64, f64)> {
        self.link.clear_input()?;
        let raw = self.link.read_line()?;
        let line = decode_line(&raw).ok_or(SensorError::Undecodable(raw.len()))?;
        parse_sensor_line(&line)
    }

    /// Readings recorded so far, oldest first.
    pub fn readings(&self) -> &[SensorReading] {
        &self.readings
    }

    /// Send `STOP`, close the link and hand back the readings.
    pub fn finish(mut self) -> Vec<SensorReading> {
        if let Err(err) = self.link.send(SensorCommand::Stop) {
            warn!(%err, "failed to send STOP to sensor");
        }
        info!(readings = self.readings.len(), "sensor link closed");
        self.readings
    }
}
