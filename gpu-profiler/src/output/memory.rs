//! In-memory result sink

use super::{ResultRow, ResultWriter};
use anyhow::Result;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Captured {
    header: Vec<String>,
    columns: Vec<String>,
    rows: Vec<ResultRow>,
}

/// Keeps everything written to it. Clones share the same storage, so a
/// handle kept by the caller observes rows written by the profiler.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    inner: Arc<Mutex<Captured>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn captured(&self) -> MutexGuard<'_, Captured> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn header(&self) -> Vec<String> {
        self.captured().header.clone()
    }

    pub fn columns(&self) -> Vec<String> {
        self.captured().columns.clone()
    }

    pub fn rows(&self) -> Vec<ResultRow> {
        self.captured().rows.clone()
    }

    pub fn row_count(&self) -> usize {
        self.captured().rows.len()
    }
}

impl ResultWriter for MemoryWriter {
    fn write_header(&mut self, lines: &[String]) -> Result<()> {
        self.captured().header.extend_from_slice(lines);
        Ok(())
    }

    fn set_columns(&mut self, columns: &[String]) -> Result<()> {
        self.captured().columns = columns.to_vec();
        Ok(())
    }

    fn write_row(&mut self, row: &ResultRow) -> Result<()> {
        self.captured().rows.push(row.clone());
        Ok(())
    }
}
