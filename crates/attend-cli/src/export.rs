//! Attendance export formats.

use attend_store::ledger::{DATE_FORMAT, TIME_FORMAT};
use attend_store::AttendanceEvent;
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

pub fn render(events: &[AttendanceEvent], format: ExportFormat) -> anyhow::Result<String> {
    match format {
        ExportFormat::Csv => export_csv(events),
        ExportFormat::Json => export_json(events),
    }
}

/// `name,date,time` rows, same column order as the ledger table.
pub fn export_csv(events: &[AttendanceEvent]) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["name", "date", "time"])?;
    for event in events {
        let date = event.date.format(DATE_FORMAT).to_string();
        let time = event.time.format(TIME_FORMAT).to_string();
        wtr.write_record([event.identity.as_str(), date.as_str(), time.as_str()])?;
    }
    let bytes = wtr.into_inner().map_err(|e| anyhow::anyhow!("failed to flush CSV: {e}"))?;
    Ok(String::from_utf8(bytes)?)
}

pub fn export_json(events: &[AttendanceEvent]) -> anyhow::Result<String> {
    serde_json::to_string_pretty(events)
        .map_err(|e| anyhow::anyhow!("failed to serialize attendance to JSON: {e}"))
}
