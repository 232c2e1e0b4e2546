//! Finalizer symbol tables
//!
//! The finalizer interception layer records which executable symbol each
//! kernel code handle belongs to and the name of each symbol. Kernel names
//! are resolved through both maps.

use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Code handle → symbol handle → name lookup
pub trait FinalizerMetadata: Send + Sync {
    fn symbol_for_code(&self, code_handle: u64) -> Option<u64>;
    fn symbol_name(&self, symbol_handle: u64) -> Option<String>;

    /// Kernel name for a dispatch's kernel object, if both lookups succeed
    fn kernel_name(&self, code_handle: u64) -> Option<String> {
        let symbol = self.symbol_for_code(code_handle)?;
        let name = self.symbol_name(symbol)?;
        debug!(
            "Lookup: code handle {:#x}, symbol handle {:#x}, name {}",
            code_handle, symbol, name
        );
        Some(name)
    }
}

/// Symbol tables populated as executables are finalized and loaded
#[derive(Debug, Default)]
pub struct FinalizerInfo {
    code_to_symbol: RwLock<HashMap<u64, u64>>,
    symbol_to_name: RwLock<HashMap<u64, String>>,
}

impl FinalizerInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_code_symbol(&self, code_handle: u64, symbol_handle: u64) {
        self.code_to_symbol
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(code_handle, symbol_handle);
    }

    pub fn record_symbol_name(&self, symbol_handle: u64, name: impl Into<String>) {
        self.symbol_to_name
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(symbol_handle, name.into());
    }
}

impl FinalizerMetadata for FinalizerInfo {
    fn symbol_for_code(&self, code_handle: u64) -> Option<u64> {
        self.code_to_symbol
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&code_handle)
            .copied()
    }

    fn symbol_name(&self, symbol_handle: u64) -> Option<String> {
        self.symbol_to_name
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&symbol_handle)
            .cloned()
    }
}
