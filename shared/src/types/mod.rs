//! Data types exchanged between the dispatch interception layer and the
//! counter capture core.

pub mod code_object;
pub mod counter;
pub mod packet;
pub mod record;

use thiserror::Error;

/// Failure to decode one of the runtime's binary structures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{what} truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}
