//! Tabular input for batch enrichment.
//!
//! An [`InputTable`] is an ordered sequence of records sharing one header row.

use crate::config::FieldMapping;
use crate::error::{EnrichError, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Ordered records with named fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputTable {
    /// Column names.
    pub headers: Vec<String>,
    /// Data rows, each with one value per header.
    pub rows: Vec<Vec<String>>,
}

/// Column positions of the mapped fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldColumns {
    /// Index of the primary (content) column.
    pub primary: usize,
    /// Index of the secondary (heading) column.
    pub secondary: usize,
}

impl InputTable {
    /// Create a table from headers and rows.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Read a CSV document with a header row.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);

        let headers = csv_reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut rows = Vec::new();
        for record in csv_reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    /// Read a CSV file with a header row.
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EnrichError::Validation(format!("File not found: {}", path.display())));
        }
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column by case-insensitive name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = name.trim();
        self.headers.iter().position(|h| h.trim().eq_ignore_ascii_case(wanted))
    }

    /// Named fields of row `index`, in column order.
    pub fn record(&self, index: usize) -> Vec<(String, String)> {
        self.rows
            .get(index)
            .map(|row| self.headers.iter().cloned().zip(row.iter().cloned()).collect())
            .unwrap_or_default()
    }

    /// Check the table can be enriched and locate the mapped columns.
    ///
    /// # Errors
    ///
    /// Returns `EnrichError::Validation` when the table is empty, exceeds `row_limit`,
    /// lacks a mapped column, or has a row whose width differs from the header.
    pub fn validate(&self, fields: &FieldMapping, row_limit: usize) -> Result<FieldColumns> {
        if self.headers.is_empty() {
            return Err(EnrichError::Validation("Input has no header row".to_string()));
        }
        if self.rows.is_empty() {
            return Err(EnrichError::Validation("Input has no data rows".to_string()));
        }
        if self.rows.len() > row_limit {
            return Err(EnrichError::Validation(format!(
                "Input has {} rows, more than the batch size limit of {}",
                self.rows.len(),
                row_limit
            )));
        }

        let primary = self.require_column(&fields.primary)?;
        let secondary = self.require_column(&fields.secondary)?;

        if let Some((index, row)) = self.rows.iter().enumerate().find(|(_, r)| r.len() != self.headers.len()) {
            return Err(EnrichError::Validation(format!(
                "Row {} has {} fields, expected {}",
                index + 1,
                row.len(),
                self.headers.len()
            )));
        }

        Ok(FieldColumns { primary, secondary })
    }

    fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            EnrichError::Validation(format!(
                "Missing required column '{}' (found: {})",
                name,
                self.headers.join(", ")
            ))
        })
    }
}
