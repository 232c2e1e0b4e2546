//! Delimited result file
//!
//! Header lines are prefixed with `#`, followed by one line naming the
//! columns and one line per row, all joined with the list separator.

use super::{ResultRow, ResultWriter};
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct DelimitedWriter<W: Write + Send> {
    out: W,
    separator: char,
    columns: Vec<String>,
    rows: u64,
    path: Option<PathBuf>,
}

impl DelimitedWriter<BufWriter<File>> {
    /// Create (truncate) the result file at `path`
    pub fn create(path: &Path, separator: char) -> Result<Self> {
        info!("Writing counter results to {}", path.display());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;

        let mut writer = Self::new(BufWriter::new(file), separator);
        writer.path = Some(path.to_path_buf());
        Ok(writer)
    }
}

impl<W: Write + Send> DelimitedWriter<W> {
    pub fn new(out: W, separator: char) -> Self {
        Self {
            out,
            separator,
            columns: Vec::new(),
            rows: 0,
            path: None,
        }
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// The underlying sink. A `BufWriter` sink still flushes itself on drop.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn join<'a>(&self, fields: impl Iterator<Item = &'a str>) -> String {
        let mut sep = [0u8; 4];
        let sep = self.separator.encode_utf8(&mut sep);
        fields.collect::<Vec<_>>().join(sep)
    }
}

impl<W: Write + Send> ResultWriter for DelimitedWriter<W> {
    fn write_header(&mut self, lines: &[String]) -> Result<()> {
        for line in lines {
            writeln!(self.out, "#{}", line).context("Failed to write result header")?;
        }
        Ok(())
    }

    fn set_columns(&mut self, columns: &[String]) -> Result<()> {
        if !self.columns.is_empty() {
            bail!("Result columns already set");
        }
        self.columns = columns.to_vec();
        let line = self.join(self.columns.iter().map(String::as_str));
        writeln!(self.out, "{}", line).context("Failed to write column row")?;
        Ok(())
    }

    fn write_row(&mut self, row: &ResultRow) -> Result<()> {
        if let Some(unknown) = row.columns().find(|c| !self.columns.iter().any(|k| k == c)) {
            bail!("Row has a value for unknown column {}", unknown);
        }

        let line = self.join(self.columns.iter().map(|c| row.get(c).unwrap_or("")));
        writeln!(self.out, "{}", line).context("Failed to write result row")?;
        self.rows += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush().context("Failed to flush result file")?;
        if let Some(path) = &self.path {
            debug!("Flushed {} rows to {}", self.rows, path.display());
        }
        Ok(())
    }
}
