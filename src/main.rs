//! TrackBox recorder: capture video for a fixed time while logging the sensor.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tracing::{info, warn, Level};
use trackbox_capture::cancel::KeyPress;
use trackbox_capture::config::Args;
use trackbox_capture::output::{next_free_path, session_stem, STAMP_FORMAT};
use trackbox_capture::report::{CsvChartExporter, ReportExporter};
use trackbox_capture::sensor::{discover_port, DEFAULT_READ_TIMEOUT};
use trackbox_capture::{
    AviWriter, CameraDevice, SensorSampler, SerialSensorLink, SessionController, V4L2Device,
};

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    let camera = V4L2Device::open(args.camera)
        .with_context(|| format!("failed to open camera {}", args.camera))?;
    println!("Device: {}", camera.capabilities().card);
    println!("Driver: {}", camera.capabilities().driver);

    let started = Local::now();
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;
    let video_path = next_free_path(
        &args
            .output_dir
            .join(format!("{}.avi", session_stem(&args.prefix, &started))),
    );

    let mut session =
        SessionController::new(camera, args.session_config()).with_cancel(KeyPress::default());
    if let Some(sensor) = open_sensor(&args) {
        session = session.with_sensor(sensor);
    }

    println!(
        "Recording {} s to {} (q + Enter stops early)",
        args.duration,
        video_path.display()
    );
    let fps = args.fps;
    let summary = session
        .run(&args.format(), &args.exposure_mode(), |format| {
            AviWriter::create(&video_path, format, fps)
        })
        .context("recording failed")?;
    print!("{summary}");

    let readings = session.take_readings();
    let exporter = CsvChartExporter::new(
        args.output_dir.clone(),
        format!("temp_humid_{}", started.format(STAMP_FORMAT)),
    );
    for path in exporter
        .export(&readings)
        .context("failed to write sensor report")?
    {
        println!("Report: {}", path.display());
    }

    Ok(())
}

/// Open the sensor link, or `None` to record without readings.
fn open_sensor(args: &Args) -> Option<SensorSampler> {
    if args.no_sensor {
        info!("sensor disabled");
        return None;
    }

    let Some(port) = args.serial_port.clone().or_else(discover_port) else {
        warn!("no serial port found, recording without sensor readings");
        return None;
    };

    match SerialSensorLink::open(&port, args.baud_rate, DEFAULT_READ_TIMEOUT) {
        Ok(link) => {
            info!(port = link.name(), baud = args.baud_rate, "sensor link open");
            Some(SensorSampler::new(link, args.sampler_config()))
        }
        Err(err) => {
            warn!(%err, port = %port, "sensor unavailable, recording without sensor readings");
            None
        }
    }
}
