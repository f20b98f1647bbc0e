// src/reporting/mod.rs
//! Report export
//!
//! Writes a finished `ScanResult` as plain JSON, SARIF 2.1.0 or JUnit XML.

pub mod cicd;

pub use cicd::{JunitReport, ReportFormat, SarifReport};

use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

use crate::models::ScanResult;

/// Writes `result` to `path` in `format`. `duration_secs` only feeds the
/// JUnit suite time.
pub fn write_report(result: &ScanResult, format: ReportFormat, path: &Path, duration_secs: f64) -> Result<()> {
    match format {
        ReportFormat::Json => {
            let json = serde_json::to_string_pretty(result).context("Failed to serialize scan result")?;
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        }
        ReportFormat::Sarif => {
            SarifReport::from_result(result, env!("CARGO_PKG_VERSION")).write_to_file(path)?;
        }
        ReportFormat::Junit => {
            JunitReport::from_result(result, duration_secs).write_to_file(path)?;
        }
    }
    info!("Wrote {} report to {}", format.extension(), path.display());
    Ok(())
}
