//! Delimited-text and JSON output of analysis results

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use crate::analysis::AnalysisReport;
use crate::error::AnalyticsResult;
use crate::matrix::CohortMatrix;
use crate::rfm::{customers_in_segment, RfmRecord, Segment};

/// Write `(cohort, offset, value)` rows
pub fn write_matrix_csv<W: Write>(matrix: &CohortMatrix, writer: W) -> AnalyticsResult<()> {
    write_rows_csv(&matrix.cells(), writer)
}

pub fn write_rfm_csv<W: Write>(records: &[&RfmRecord], writer: W) -> AnalyticsResult<()> {
    write_rows_csv(records, writer)
}

/// Serialize each item as one CSV row, header taken from the field names
pub fn write_rows_csv<T: Serialize, W: Write>(rows: &[T], writer: W) -> AnalyticsResult<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_report_json<W: Write>(report: &AnalysisReport, writer: W) -> AnalyticsResult<()> {
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}

/// Write every table of a report into `output_dir`.
///
/// When `segment` is given, the RFM file only lists that segment's
/// customers. Returns the paths written.
pub fn write_outputs(
    report: &AnalysisReport,
    output_dir: &Path,
    segment: Option<Segment>,
    include_json: bool,
) -> crate::Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let mut written = Vec::new();

    let path = output_dir.join("retention.csv");
    write_matrix_csv(&report.retention, create(&path)?)?;
    written.push(path);

    let path = output_dir.join("cumulative_revenue.csv");
    write_matrix_csv(&report.cumulative_revenue, create(&path)?)?;
    written.push(path);

    let path = output_dir.join("sales_by_period.csv");
    write_rows_csv(&report.sales_by_period, create(&path)?)?;
    written.push(path);

    let records = report.rfm.records();
    if !records.is_empty() {
        let (path, selected) = match segment {
            Some(segment) => (
                output_dir.join(format!("rfm_{}.csv", slug(segment.as_str()))),
                customers_in_segment(records, segment),
            ),
            None => (output_dir.join("rfm.csv"), records.iter().collect()),
        };
        write_rfm_csv(&selected, create(&path)?)?;
        written.push(path);
    }

    if include_json {
        let path = output_dir.join("report.json");
        write_report_json(report, create(&path)?)?;
        written.push(path);
    }

    info!(files = written.len(), dir = %output_dir.display(), "Outputs written");
    Ok(written)
}

fn create(path: &Path) -> crate::Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn slug(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}
