//! Row-oriented result table backed by flat CSV files.
//!
//! Rows are keyed by a stable index (their position in the input file), so
//! writes from out-of-order completions land in the right place and the
//! output preserves the input order.

use csv::{ReaderBuilder, WriterBuilder};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Sampling bookkeeping columns dropped before a run.
pub const SAMPLING_COLUMNS: [&str; 5] = [
    "Task ID temp",
    "Bin_Size of ontology ABox",
    "Bin_Avg Min Explanation Size",
    "strata",
    "split",
];

#[derive(Debug, Clone, PartialEq)]
struct TableRow {
    index: usize,
    cells: HashMap<String, String>,
}

/// In-memory table with ordered columns and index-keyed rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    headers: Vec<String>,
    rows: Vec<TableRow>,
    positions: HashMap<usize, usize>,
}

impl ResultTable {
    /// Create an empty table with the given columns.
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Read a CSV file with a header row.
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to open '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_reader(file)
    }

    /// Read CSV from any reader. Row indices are 0-based positions.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut table = Self::with_columns(headers.clone());
        for (position, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                Error::Validation(format!("failed to parse CSV row {}: {}", position + 1, e))
            })?;
            let cells = headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.clone(), v.to_string()))
                .collect();
            table.push_row(position, cells)?;
        }
        Ok(table)
    }

    /// Append a row. Fails if the index is already present.
    pub fn push_row(&mut self, index: usize, cells: HashMap<String, String>) -> Result<()> {
        if self.positions.contains_key(&index) {
            return Err(Error::validation(format!("duplicate row index {}", index)));
        }
        for column in cells.keys() {
            self.ensure_column(column);
        }
        self.positions.insert(index, self.rows.len());
        self.rows.push(TableRow { index, cells });
        Ok(())
    }

    /// Write the table as CSV with its column order.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = WriterBuilder::new().from_writer(writer);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(
                self.headers
                    .iter()
                    .map(|h| row.cells.get(h).map(String::as_str).unwrap_or("")),
            )?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the table to a CSV file, creating parent directories.
    pub fn write_csv_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        self.write_csv(file)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    /// Add a column (empty for every row) if it does not exist yet.
    pub fn ensure_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.headers.push(column.to_string());
        }
    }

    /// Remove the named columns that exist; returns the ones removed.
    pub fn drop_columns(&mut self, columns: &[&str]) -> Vec<String> {
        let removed: Vec<String> = self
            .headers
            .iter()
            .filter(|h| columns.contains(&h.as_str()))
            .cloned()
            .collect();
        if removed.is_empty() {
            return removed;
        }
        self.headers.retain(|h| !removed.contains(h));
        for row in &mut self.rows {
            for column in &removed {
                row.cells.remove(column);
            }
        }
        removed
    }

    /// Drop the sampling bookkeeping columns.
    pub fn clean_input(&mut self) -> Vec<String> {
        self.drop_columns(&SAMPLING_COLUMNS)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row indices in table order.
    pub fn indices(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.index).collect()
    }

    pub fn contains_index(&self, index: usize) -> bool {
        self.positions.contains_key(&index)
    }

    pub fn get(&self, index: usize, column: &str) -> Option<&str> {
        let position = *self.positions.get(&index)?;
        self.rows[position].cells.get(column).map(String::as_str)
    }

    /// Set a cell, adding the column if needed.
    pub fn set(&mut self, index: usize, column: &str, value: impl Into<String>) -> Result<()> {
        let position = *self
            .positions
            .get(&index)
            .ok_or_else(|| Error::Internal(format!("no row with index {}", index)))?;
        self.ensure_column(column);
        self.rows[position]
            .cells
            .insert(column.to_string(), value.into());
        Ok(())
    }

    /// Values of a column in table order (empty string for missing cells).
    pub fn column(&self, column: &str) -> Vec<&str> {
        self.rows
            .iter()
            .map(|r| r.cells.get(column).map(String::as_str).unwrap_or(""))
            .collect()
    }

    /// Columns ending with the given suffix, in header order.
    pub fn columns_with_suffix(&self, suffix: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|h| h.ends_with(suffix))
            .cloned()
            .collect()
    }

    /// Keep only rows matching the predicate.
    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(usize, &dyn Fn(&str) -> Option<String>) -> bool,
    {
        self.rows.retain(|row| {
            let lookup = |column: &str| row.cells.get(column).cloned();
            keep(row.index, &lookup)
        });
        self.reindex_positions();
    }

    /// First `n` rows, indices unchanged.
    pub fn head(&self, n: usize) -> Self {
        let mut table = Self::with_columns(self.headers.clone());
        for row in self.rows.iter().take(n) {
            table.positions.insert(row.index, table.rows.len());
            table.rows.push(row.clone());
        }
        table
    }

    /// Rows with the given indices, in table order, indices unchanged.
    pub fn subset(&self, indices: &[usize]) -> Self {
        let mut table = Self::with_columns(self.headers.clone());
        for row in self.rows.iter().filter(|r| indices.contains(&r.index)) {
            table.positions.insert(row.index, table.rows.len());
            table.rows.push(row.clone());
        }
        table
    }

    fn reindex_positions(&mut self) {
        self.positions = self
            .rows
            .iter()
            .enumerate()
            .map(|(position, row)| (row.index, position))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    const SAMPLE: &str = "Question,Root Entity,Answer Type,strata\n\
                          Is A a B?,a,BIN,1_2\n\
                          Who is C?,c,MC,3_4\n";

    #[test]
    fn test_read_and_write_preserves_order() {
        let mut table = ResultTable::from_reader(SAMPLE.as_bytes()).unwrap();
        table.set(1, "gpt_response", "c_1900").unwrap();
        table.set(0, "gpt_response", "TRUE").unwrap();

        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "Question,Root Entity,Answer Type,strata,gpt_response\n\
             Is A a B?,a,BIN,1_2,TRUE\n\
             Who is C?,c,MC,3_4,c_1900\n"
        );
    }

    #[test]
    fn test_clean_input_drops_sampling_columns() {
        let mut table = ResultTable::from_reader(SAMPLE.as_bytes()).unwrap();
        let removed = table.clean_input();

        assert_eq!(removed, vec!["strata".to_string()]);
        assert!(!table.has_column("strata"));
        assert_eq!(table.get(0, "strata"), None);
    }

    #[test]
    fn test_subset_keeps_original_indices() {
        let table = ResultTable::from_reader(SAMPLE.as_bytes()).unwrap();
        let subset = table.subset(&[1]);

        assert_eq!(subset.indices(), vec![1]);
        assert_eq!(subset.get(1, "Root Entity"), Some("c"));
        assert!(!subset.contains_index(0));
    }

    #[test]
    fn test_retain_rows_and_head() {
        let mut table = ResultTable::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(table.head(1).indices(), vec![0]);

        table.retain_rows(|_, cell| cell("Root Entity").as_deref() == Some("c"));
        assert_eq!(table.indices(), vec![1]);
        assert_eq!(table.get(1, "Question"), Some("Who is C?"));
    }

    #[test]
    fn test_set_unknown_index_fails() {
        let mut table = ResultTable::from_reader(SAMPLE.as_bytes()).unwrap();
        assert!(table.set(7, "x", "y").is_err());
    }

    #[test]
    fn test_write_csv_path_creates_parent() {
        let dir = tempdir().expect("tempdir should be created");
        let path = dir.path().join("nested").join("out.csv");
        let table = ResultTable::from_reader(SAMPLE.as_bytes()).unwrap();

        table.write_csv_path(&path).unwrap();
        let reread = ResultTable::from_csv_path(&path).unwrap();
        assert_eq!(reread.len(), 2);
        assert_eq!(reread.headers(), table.headers());
    }
}
