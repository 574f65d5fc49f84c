//! Common types used throughout pagepool
//!
//! This module contains shared type definitions, type aliases,
//! and the non-fatal diagnostics surfaced alongside results.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

/// Generic key-value map with string keys and values
pub type StringMap = HashMap<String, String>;

// ============================================================================
// Backoff Type
// ============================================================================

/// Type of backoff for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    #[default]
    Exponential,
}

// ============================================================================
// Warnings
// ============================================================================

/// A non-fatal diagnostic raised while paginating or collecting.
///
/// Warnings never abort an operation. They are logged via `tracing` at the
/// site where they occur and returned next to the value they describe, so
/// callers can inspect fallback behavior deterministically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A resolved page budget exceeds the internal safety ceiling.
    /// Iteration proceeds with the requested budget.
    PageBudgetAboveCeiling {
        /// Resolved number of pages
        pages: u32,
        /// The safety ceiling it exceeds
        ceiling: u32,
    },
    /// An item in a page failed to decode into the requested model type
    /// and was dropped from the modeled collection.
    ItemDecode {
        /// Index of the item within the flattened result
        index: usize,
        /// Decode failure detail
        message: String,
    },
    /// Items whose shape did not match the collection target were dropped.
    ShapeMismatch {
        /// Number of items dropped
        dropped: usize,
    },
    /// A timestamp-cursor round produced a page without the configured
    /// timestamp, ending the outer iteration.
    MissingTimestamp {
        /// The key path that failed to resolve
        key: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::PageBudgetAboveCeiling { pages, ceiling } => {
                write!(f, "page budget {pages} exceeds safety ceiling {ceiling}")
            }
            Warning::ItemDecode { index, message } => {
                write!(f, "item {index} failed to decode: {message}")
            }
            Warning::ShapeMismatch { dropped } => {
                write!(f, "{dropped} item(s) dropped for mismatched shape")
            }
            Warning::MissingTimestamp { key } => {
                write!(f, "no timestamp found under '{key}'")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_type_serde() {
        let backoff: BackoffType = serde_json::from_str("\"exponential\"").unwrap();
        assert_eq!(backoff, BackoffType::Exponential);

        let json = serde_json::to_string(&BackoffType::Constant).unwrap();
        assert_eq!(json, "\"constant\"");
    }

    #[test]
    fn test_backoff_type_default() {
        assert_eq!(BackoffType::default(), BackoffType::Exponential);
    }

    #[test]
    fn test_warning_display() {
        let warning = Warning::PageBudgetAboveCeiling {
            pages: 2000,
            ceiling: 1000,
        };
        assert_eq!(
            warning.to_string(),
            "page budget 2000 exceeds safety ceiling 1000"
        );

        let warning = Warning::MissingTimestamp {
            key: "from".to_string(),
        };
        assert_eq!(warning.to_string(), "no timestamp found under 'from'");
    }
}
