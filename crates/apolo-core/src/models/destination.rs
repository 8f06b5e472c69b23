//! Destination model
//!
//! A named set of number prefixes. Rating bindings reference destinations
//! by ID and the rate engine picks the binding whose destination has the
//! longest prefix matching the dialed number.

use serde::{Deserialize, Serialize};

/// Destination ID matching every number with a zero-length prefix
pub const ANY_DESTINATION: &str = "*any";

/// Destination entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Destination {
    /// Destination identifier (e.g., "DST_1002", "PE_MOBILE")
    pub id: String,

    /// Number prefixes belonging to this destination
    #[serde(default)]
    pub prefixes: Vec<String>,
}

impl Destination {
    pub fn new(id: impl Into<String>, prefixes: &[&str]) -> Self {
        Self {
            id: id.into(),
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Normalize a dialed number before prefix matching
    ///
    /// Strips surrounding whitespace and a leading `+`.
    pub fn normalize_number(number: &str) -> &str {
        let trimmed = number.trim();
        trimmed.strip_prefix('+').unwrap_or(trimmed)
    }

    /// Length of the longest prefix of `number` contained in this destination
    ///
    /// `*any` matches everything with length 0; `None` means no match.
    pub fn longest_match(&self, number: &str) -> Option<usize> {
        if self.id == ANY_DESTINATION {
            return Some(0);
        }
        let normalized = Self::normalize_number(number);
        self.prefixes
            .iter()
            .filter(|p| !p.is_empty() && normalized.starts_with(p.as_str()))
            .map(|p| p.len())
            .max()
    }
}
