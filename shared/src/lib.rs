//! Shared types and utilities for Kernscope
//!
//! This crate contains the binary decoders for kernel dispatch packets and
//! compiled kernel descriptors, the kernel launch record, counter value types,
//! and small utilities used by the profiler core and the CLI.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{code_object::*, counter::*, packet::*, record::*, DecodeError};
