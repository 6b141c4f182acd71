//! History export

use anyhow::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use super::ExportFormat;
use crate::db::StoredFix;

const CSV_HEADER: &str = "id,timestamp,latitude,longitude,speed,activity,is_anomaly,created_at";

/// Writes stored fixes as JSON lines or CSV
pub struct DataExporter {
    format: ExportFormat,
}

impl DataExporter {
    pub fn new(format: ExportFormat) -> Self {
        Self { format }
    }

    /// Write `rows` to `writer`, returning the number of records written.
    pub fn write_rows<W: Write>(&self, rows: &[StoredFix], writer: &mut W) -> Result<usize> {
        if self.format == ExportFormat::Csv {
            writeln!(writer, "{}", CSV_HEADER)?;
        }

        for row in rows {
            match self.format {
                ExportFormat::Json => {
                    serde_json::to_writer(&mut *writer, row)?;
                    writeln!(writer)?;
                }
                ExportFormat::Csv => {
                    writeln!(
                        writer,
                        "{},{},{},{},{},{},{},{}",
                        row.id,
                        row.fix.timestamp,
                        row.fix.lat,
                        row.fix.lon,
                        row.fix.speed,
                        row.activity.map(|a| a.as_str()).unwrap_or(""),
                        row.is_anomaly,
                        row.created_at
                    )?;
                }
            }
        }

        writer.flush()?;
        Ok(rows.len())
    }

    /// Write `rows` to a new file at `path`.
    pub fn export_file(&self, rows: &[StoredFix], path: &Path) -> Result<usize> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(path)?);
        let count = self.write_rows(rows, &mut writer)?;
        info!("Exported {} fixes to {:?} as {:?}", count, path, self.format);
        Ok(count)
    }
}
