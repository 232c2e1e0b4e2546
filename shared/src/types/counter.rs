//! Hardware counter value types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared data type of a hardware counter.
///
/// The counter engine reports types as raw codes; only the four numeric kinds
/// below are understood by result emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterType {
    Float32,
    Float64,
    Uint32,
    Uint64,
}

impl CounterType {
    /// Raw type code as reported by the counter engine
    pub const fn code(self) -> u32 {
        match self {
            CounterType::Float32 => 0,
            CounterType::Float64 => 1,
            CounterType::Uint32 => 2,
            CounterType::Uint64 => 3,
        }
    }

    /// Map a raw type code, `None` for kinds emission does not handle
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(CounterType::Float32),
            1 => Some(CounterType::Float64),
            2 => Some(CounterType::Uint32),
            3 => Some(CounterType::Uint64),
            _ => None,
        }
    }
}

impl fmt::Display for CounterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CounterType::Float32 => "float32",
            CounterType::Float64 => "float64",
            CounterType::Uint32 => "uint32",
            CounterType::Uint64 => "uint64",
        };
        f.write_str(name)
    }
}

/// A single sampled counter value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CounterValue {
    Float32(f32),
    Float64(f64),
    Uint32(u32),
    Uint64(u64),
}

impl CounterValue {
    pub fn counter_type(&self) -> CounterType {
        match self {
            CounterValue::Float32(_) => CounterType::Float32,
            CounterValue::Float64(_) => CounterType::Float64,
            CounterValue::Uint32(_) => CounterType::Uint32,
            CounterValue::Uint64(_) => CounterType::Uint64,
        }
    }

    /// Convert a raw reading into the requested type (truncating for integers)
    pub fn from_f64(kind: CounterType, raw: f64) -> Self {
        match kind {
            CounterType::Float32 => CounterValue::Float32(raw as f32),
            CounterType::Float64 => CounterValue::Float64(raw),
            CounterType::Uint32 => CounterValue::Uint32(raw as u32),
            CounterType::Uint64 => CounterValue::Uint64(raw as u64),
        }
    }

    /// Result-file formatting: `%8u`, `%lu` and `%12.2f`
    pub fn format(&self) -> String {
        match self {
            CounterValue::Uint32(v) => format!("{:>8}", v),
            CounterValue::Uint64(v) => format!("{}", v),
            CounterValue::Float32(v) => format!("{:>12.2}", v),
            CounterValue::Float64(v) => format!("{:>12.2}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes() {
        for kind in [
            CounterType::Float32,
            CounterType::Float64,
            CounterType::Uint32,
            CounterType::Uint64,
        ] {
            assert_eq!(CounterType::from_code(kind.code()), Some(kind));
        }
        assert_eq!(CounterType::from_code(4), None);
    }

    #[test]
    fn test_format_widths() {
        assert_eq!(CounterValue::Uint32(42).format(), "      42");
        assert_eq!(CounterValue::Uint64(123456789012).format(), "123456789012");
        assert_eq!(CounterValue::Float64(3.14159).format(), "        3.14");
        assert_eq!(CounterValue::Float32(0.5).format(), "        0.50");
    }

    #[test]
    fn test_from_f64_truncates_integers() {
        assert_eq!(
            CounterValue::from_f64(CounterType::Uint32, 7.9),
            CounterValue::Uint32(7)
        );
        assert_eq!(
            CounterValue::from_f64(CounterType::Float64, 7.9).counter_type(),
            CounterType::Float64
        );
    }

    #[test]
    fn test_counter_type_serde_names() {
        let json = serde_json::to_string(&CounterType::Uint64).unwrap();
        assert_eq!(json, "\"uint64\"");
    }
}
