//! Deterministic last-resort estimates.

use std::collections::HashMap;

/// Source name carried by mock resolutions.
pub const MOCK_SOURCE: &str = "mock";

/// Estimate returned for identifiers with no table entry, in USD.
pub const DEFAULT_MOCK_VALUE: f64 = 1_000_000_000.0;

/// Built-in estimates, in USD.
const BUILTIN: &[(&str, f64)] = &[
    ("AAPL", 3_400_000_000_000.0),
    ("MSFT", 3_100_000_000_000.0),
    ("GOOGL", 2_100_000_000_000.0),
    ("AMZN", 1_900_000_000_000.0),
    ("NVDA", 3_000_000_000_000.0),
    ("TSLA", 700_000_000_000.0),
    // NAICS sectors and industries
    ("5112", 240_000_000_000.0),
    ("5182", 310_000_000_000.0),
    ("3341", 180_000_000_000.0),
    ("52", 4_600_000_000_000.0),
    ("62", 3_200_000_000_000.0),
    ("software", 650_000_000_000.0),
    ("cloud computing", 680_000_000_000.0),
    ("electric vehicles", 500_000_000_000.0),
    ("semiconductors", 600_000_000_000.0),
];

/// Table of fixed estimates used when no provider can answer.
///
/// Lookups are case-insensitive. The same identifier always yields the same
/// value, so a mock answer is stable across calls and processes.
#[derive(Clone, Debug, PartialEq)]
pub struct MockTable {
    values: HashMap<String, f64>,
    default_value: f64,
}

impl Default for MockTable {
    fn default() -> Self {
        Self {
            values: BUILTIN
                .iter()
                .map(|(id, value)| (id.to_lowercase(), *value))
                .collect(),
            default_value: DEFAULT_MOCK_VALUE,
        }
    }
}

impl MockTable {
    /// Create a table with the built-in estimates.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with no entries, answering `default_value` for everything.
    #[must_use]
    pub fn empty(default_value: f64) -> Self {
        Self {
            values: HashMap::new(),
            default_value,
        }
    }

    /// Adds or replaces the estimate for `identifier`.
    #[must_use]
    pub fn with_value(mut self, identifier: &str, value: f64) -> Self {
        self.values.insert(identifier.trim().to_lowercase(), value);
        self
    }

    /// Returns the estimate for `identifier`.
    #[must_use]
    pub fn value_for(&self, identifier: &str) -> f64 {
        self.values
            .get(&identifier.trim().to_lowercase())
            .copied()
            .unwrap_or(self.default_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup_is_case_insensitive() {
        let table = MockTable::new();
        assert_eq!(table.value_for("AAPL"), 3_400_000_000_000.0);
        assert_eq!(table.value_for("aapl"), 3_400_000_000_000.0);
        assert_eq!(table.value_for(" Cloud Computing "), 680_000_000_000.0);
    }

    #[test]
    fn test_unknown_identifier_gets_default() {
        let table = MockTable::new();
        assert_eq!(table.value_for("ZZZZ"), DEFAULT_MOCK_VALUE);
        assert_eq!(table.value_for("ZZZZ"), table.value_for("ZZZZ"));
    }

    #[test]
    fn test_custom_table() {
        let table = MockTable::empty(5.0).with_value("fred_GDP", 27.4e12);
        assert_eq!(table.value_for("FRED_GDP"), 27.4e12);
        assert_eq!(table.value_for("AAPL"), 5.0);
    }
}
