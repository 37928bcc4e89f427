//! CSV tick log for testing fan curves

use crate::control::{TickEvent, TickSink};
use crate::errors::Result;
use log::{info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const HEADER: &str = "timestamp,cpu_c,gpu_c,source,max_temp_c,target_duty,applied_duty,applied,reason,on_battery";

/// Appends one CSV line per tick.
pub struct CsvSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl CsvSink {
    /// Create or truncate `path` and write the header.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", HEADER)?;
        writer.flush()?;

        info!("Logging fan ticks to: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
        })
    }

    fn write_line(writer: &mut BufWriter<File>, event: &TickEvent) -> std::io::Result<()> {
        let reason = serde_json::to_value(event.reason)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{}",
            event.at.format("%Y-%m-%d %H:%M:%S%.3f"),
            field(event.cpu_c),
            field(event.gpu_c),
            field(event.source),
            field(event.max_temp_c),
            field(event.target_duty),
            field(event.applied_duty),
            event.applied,
            reason,
            event.on_battery
        )?;
        writer.flush()
    }
}

fn field<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

impl TickSink for CsvSink {
    fn record(&mut self, event: &TickEvent) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = Self::write_line(writer, event) {
            warn!("Failed to log fan data to {}, disabling: {}", self.path.display(), e);
            self.writer = None;
        }
    }
}
