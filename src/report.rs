//! Post-session temperature/humidity report: CSV table and SVG chart.

use crate::output::next_free_path;
use crate::sensor::SensorReading;
use plotters::prelude::*;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

const CHART_TITLE: &str = "Temperature & Humidity Over Time";
const CHART_SIZE: (u32, u32) = (1200, 600);
const TEMPERATURE_COLOR: RGBColor = RGBColor(0x8B, 0x00, 0x00);
const HUMIDITY_COLOR: RGBColor = RGBColor(0x87, 0xCE, 0xEB);
/// At most this many time labels along the x axis.
const MAX_TIME_LABELS: usize = 12;

/// Error type for report generation.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Writing the table failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// Rendering the chart failed.
    #[error("Chart error: {0}")]
    Chart(String),
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for report generation.
pub type Result<T> = std::result::Result<T, ReportError>;

fn chart_error<E: std::fmt::Display>(err: E) -> ReportError {
    ReportError::Chart(err.to_string())
}

/// Turns the session's sensor log into files.
pub trait ReportExporter {
    /// Write the report; returns the files created. An empty log creates
    /// nothing.
    fn export(&self, readings: &[SensorReading]) -> Result<Vec<PathBuf>>;
}

/// Writes `<stem>.csv` and `<stem>.svg` into a directory.
#[derive(Debug, Clone)]
pub struct CsvChartExporter {
    dir: PathBuf,
    stem: String,
}

impl CsvChartExporter {
    /// Exporter writing `<dir>/<stem>.csv` and `<dir>/<stem>.svg`.
    pub fn new<P: Into<PathBuf>, S: Into<String>>(dir: P, stem: S) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
        }
    }

    fn path(&self, extension: &str) -> PathBuf {
        next_free_path(&self.dir.join(format!("{}.{extension}", self.stem)))
    }
}

impl ReportExporter for CsvChartExporter {
    fn export(&self, readings: &[SensorReading]) -> Result<Vec<PathBuf>> {
        if readings.is_empty() {
            info!("no sensor readings recorded, skipping report");
            return Ok(Vec::new());
        }

        let table = self.path("csv");
        write_table(&table, readings)?;
        info!(path = %table.display(), rows = readings.len(), "sensor table saved");

        let chart = self.path("svg");
        draw_chart(&chart, readings)?;
        info!(path = %chart.display(), "sensor chart saved");

        Ok(vec![table, chart])
    }
}

fn write_table(path: &Path, readings: &[SensorReading]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for reading in readings {
        writer.serialize(reading)?;
    }
    writer.flush()?;
    Ok(())
}

/// Shared y range for both series with a little headroom.
fn value_range(readings: &[SensorReading]) -> std::ops::Range<f64> {
    let (low, high) = readings
        .iter()
        .flat_map(|r| [r.temperature, r.humidity])
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), v| {
            (low.min(v), high.max(v))
        });
    let pad = ((high - low) * 0.1).max(1.0);
    (low - pad)..(high + pad)
}

fn draw_chart(path: &Path, readings: &[SensorReading]) -> Result<()> {
    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(chart_error)?;

    let last = readings.len().saturating_sub(1).max(1);
    let mut chart = ChartBuilder::on(&root)
        .caption(CHART_TITLE, ("sans-serif", 28).into_font())
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(60)
        .build_cartesian_2d(0..last, value_range(readings))
        .map_err(chart_error)?;

    let time_label = |index: &usize| {
        readings
            .get(*index)
            .map(|r| r.timestamp.clone())
            .unwrap_or_default()
    };
    chart
        .configure_mesh()
        .x_desc("Time")
        .y_desc("Value")
        .x_labels(readings.len().min(MAX_TIME_LABELS))
        .x_label_formatter(&time_label)
        .draw()
        .map_err(chart_error)?;

    let series: [(&str, RGBColor, fn(&SensorReading) -> f64); 2] = [
        ("Temperature (°C)", TEMPERATURE_COLOR, |r| r.temperature),
        ("Humidity (%)", HUMIDITY_COLOR, |r| r.humidity),
    ];
    for (label, color, value) in series {
        chart
            .draw_series(LineSeries::new(
                readings.iter().enumerate().map(|(i, r)| (i, value(r))),
                color.stroke_width(2),
            ))
            .map_err(chart_error)?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        chart
            .draw_series(
                readings
                    .iter()
                    .enumerate()
                    .map(|(i, r)| Circle::new((i, value(r)), 3, color.filled())),
            )
            .map_err(chart_error)?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(chart_error)?;
    root.present().map_err(chart_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(timestamp: &str, temperature: f64, humidity: f64) -> SensorReading {
        SensorReading {
            timestamp: timestamp.to_owned(),
            temperature,
            humidity,
        }
    }

    #[test]
    fn test_empty_log_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exporter = CsvChartExporter::new(dir.path(), "temp_humid_20240309_0705");

        let files = exporter.export(&[]).expect("export");

        assert!(files.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).expect("read_dir").count(), 0);
    }

    #[test]
    fn test_table_and_chart_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exporter = CsvChartExporter::new(dir.path(), "temp_humid_20240309_0705");
        let readings = [
            reading("07:05:00", 23.5, 55.0),
            reading("07:05:05", 23.6, 54.5),
            reading("07:05:10", 23.8, 54.0),
        ];

        let files = exporter.export(&readings).expect("export");
        assert_eq!(
            files,
            vec![
                dir.path().join("temp_humid_20240309_0705.csv"),
                dir.path().join("temp_humid_20240309_0705.svg"),
            ]
        );

        let table = std::fs::read_to_string(&files[0]).expect("read csv");
        let mut lines = table.lines();
        assert_eq!(lines.next(), Some("Time,Temperature (°C),Humidity (%)"));
        assert_eq!(lines.next(), Some("07:05:00,23.5,55.0"));
        assert_eq!(table.lines().count(), 4);

        let chart = std::fs::read_to_string(&files[1]).expect("read svg");
        assert!(chart.contains("<svg"));
    }

    #[test]
    fn test_single_reading_chart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exporter = CsvChartExporter::new(dir.path(), "one");
        let files = exporter
            .export(&[reading("12:00:00", 20.0, 20.0)])
            .expect("export");
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_value_range_has_headroom() {
        let range = value_range(&[reading("a", 20.0, 60.0)]);
        assert!(range.start < 20.0);
        assert!(range.end > 60.0);
    }
}
