//! Result output
//!
//! One row per retired session, preceded by a key/value header and the
//! column list.

pub mod delimited;
pub mod memory;

pub use delimited::DelimitedWriter;
pub use memory::MemoryWriter;

use anyhow::Result;

/// One output row: column name → formatted value, in emission order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultRow {
    values: Vec<(String, String)>,
}

impl ResultRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.values.push((column.into(), value.into()));
    }

    /// First value recorded for `column`
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Destination for profiling results
pub trait ResultWriter: Send {
    /// Header lines (`Key=Value`), written once before any row
    fn write_header(&mut self, lines: &[String]) -> Result<()>;

    /// Output columns, set once after the header
    fn set_columns(&mut self, columns: &[String]) -> Result<()>;

    fn write_row(&mut self, row: &ResultRow) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup_returns_first_value() {
        let mut row = ResultRow::new();
        row.push("Method", "saxpy_Fiji");
        row.push("Wavefronts", "1");
        row.push("Wavefronts", "2");

        assert_eq!(row.get("Wavefronts"), Some("1"));
        assert_eq!(row.get("VGPRs"), None);
        assert_eq!(row.len(), 3);
        assert_eq!(
            row.columns().collect::<Vec<_>>(),
            vec!["Method", "Wavefronts", "Wavefronts"]
        );
    }
}
