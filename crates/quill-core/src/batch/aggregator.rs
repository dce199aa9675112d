//! Output assembly: the enriched table with its result column and summary rows.

use crate::batch::types::{RowStatus, RowTask, StatusCounts};
use crate::error::{EnrichError, Result};
use crate::table::InputTable;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Upper bound for a column's display width, in characters.
pub const MAX_COLUMN_WIDTH: usize = 60;

/// Padding added to the widest cell of a column.
const COLUMN_PADDING: usize = 2;

/// Metadata appended below the data rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryMetadata {
    /// When the batch finished.
    pub completed_at: DateTime<Utc>,
    /// Model that produced the results.
    pub model: String,
    /// Per-status row counts.
    pub counts: StatusCounts,
}

impl SummaryMetadata {
    /// Label/value pairs in output order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Completed At", self.completed_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("Model", self.model.clone()),
            ("Success", self.counts.success.to_string()),
            ("Failed", self.counts.failed.to_string()),
            ("Skipped", self.counts.skipped.to_string()),
            ("Errored", self.counts.errored.to_string()),
        ]
    }
}

/// The augmented artifact of one batch.
///
/// Holds every original column unchanged plus one appended result column, the status
/// of each row, summary metadata and display widths per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTable {
    /// Original headers followed by the result column header.
    pub headers: Vec<String>,
    /// Original cells followed by the result cell, one row per input row.
    pub rows: Vec<Vec<String>>,
    /// Terminal status of each row.
    pub statuses: Vec<RowStatus>,
    /// Summary written below the data.
    pub summary: SummaryMetadata,
    /// Display width of each column, in characters.
    pub column_widths: Vec<usize>,
    /// Number of original columns.
    pub original_columns: usize,
}

impl EnrichedTable {
    /// Header of the result column for `model`.
    pub fn result_column_name(model: &str) -> String {
        format!("AI Result ({model})")
    }

    /// Assemble the artifact from the input table and its settled tasks.
    ///
    /// # Errors
    ///
    /// Returns `EnrichError::Serialization` when the tasks do not map one-to-one onto
    /// the input rows or a task is still pending.
    pub fn assemble(table: &InputTable, tasks: &[RowTask], model: &str, completed_at: DateTime<Utc>) -> Result<Self> {
        if tasks.len() != table.len() {
            return Err(EnrichError::Serialization(format!(
                "{} settled rows for {} input rows",
                tasks.len(),
                table.len()
            )));
        }

        let mut cells: Vec<Option<(RowStatus, String)>> = vec![None; table.len()];
        for task in tasks {
            if !task.is_settled() {
                return Err(EnrichError::Serialization(format!("Row {} never settled", task.index)));
            }
            let slot = cells
                .get_mut(task.output.row)
                .ok_or_else(|| EnrichError::Serialization(format!("Row {} is out of range", task.output.row)))?;
            if slot.is_some() {
                return Err(EnrichError::Serialization(format!("Row {} written twice", task.output.row)));
            }
            *slot = Some((task.status, task.result.clone().unwrap_or_default()));
        }

        let original_columns = table.headers.len();
        let mut headers = table.headers.clone();
        headers.push(Self::result_column_name(model));

        let mut rows = Vec::with_capacity(table.len());
        let mut statuses = Vec::with_capacity(table.len());
        for (row, cell) in table.rows.iter().zip(cells) {
            let (status, result) = cell.unwrap_or((RowStatus::Pending, String::new()));
            let mut out = row.clone();
            out.resize(original_columns, String::new());
            out.push(result);
            rows.push(out);
            statuses.push(status);
        }

        let column_widths = headers
            .iter()
            .enumerate()
            .map(|(c, header)| column_width(header, rows.iter().map(|r: &Vec<String>| r[c].as_str())))
            .collect();
        let summary =
            SummaryMetadata { completed_at, model: model.to_string(), counts: StatusCounts::from_tasks(tasks) };

        debug!(rows = rows.len(), columns = headers.len(), "Assembled enriched table");

        Ok(Self { headers, rows, statuses, summary, column_widths, original_columns })
    }

    /// Index of the result column.
    pub fn result_column(&self) -> usize {
        self.original_columns
    }

    /// Result cell of every row, in order.
    pub fn result_cells(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.get(self.original_columns).map_or("", String::as_str)).collect()
    }

    /// Summary rows, padded to the table width.
    pub fn summary_rows(&self) -> Vec<Vec<String>> {
        let width = self.headers.len().max(2);
        self.summary
            .entries()
            .into_iter()
            .map(|(label, value)| {
                let mut row = vec![label.to_string(), value];
                row.resize(width, String::new());
                row
            })
            .collect()
    }

    /// The input table this artifact was built from, without the result column.
    pub fn original_table(&self) -> InputTable {
        InputTable::new(
            self.headers[..self.original_columns].to_vec(),
            self.rows.iter().map(|r| r[..self.original_columns].to_vec()).collect(),
        )
    }

    /// Write the artifact as CSV: headers, data rows, a blank separator row, then the
    /// summary rows.
    ///
    /// # Errors
    ///
    /// Returns error if writing fails.
    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<()> {
        let width = self.headers.len().max(2);
        let mut csv_writer = csv::WriterBuilder::new().flexible(false).from_writer(writer);

        csv_writer.write_record(&self.headers)?;
        for row in &self.rows {
            csv_writer.write_record(row)?;
        }
        csv_writer.write_record(vec![""; width])?;
        for row in self.summary_rows() {
            csv_writer.write_record(&row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Write the artifact as a CSV file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.to_csv_writer(std::io::BufWriter::new(file))
    }

    /// Serialize the artifact as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `EnrichError::Serialization` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EnrichError::Serialization(e.to_string()))
    }

    /// Write the artifact as a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or writing fails.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// `min(max(header, widest line) + padding, MAX_COLUMN_WIDTH)`.
fn column_width<'a>(header: &str, cells: impl Iterator<Item = &'a str>) -> usize {
    let widest = cells
        .flat_map(str::lines)
        .map(|line| line.chars().count())
        .chain(std::iter::once(header.chars().count()))
        .max()
        .unwrap_or(0);
    (widest + COLUMN_PADDING).min(MAX_COLUMN_WIDTH)
}
