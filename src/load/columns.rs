//! Column-name validation against the target table
//!
//! Unknown names are reported together with the closest target columns so a
//! typo in a header or `--columns` list is easy to spot.

use std::collections::HashSet;

use strsim::jaro_winkler;

use crate::error::{Result, TabportError};

/// Suggests target columns for names that do not exist
pub struct ColumnMatcher {
    /// Similarity threshold (0.0-1.0) for suggesting a column
    pub similarity_threshold: f64,
}

impl Default for ColumnMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
        }
    }
}

impl ColumnMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            similarity_threshold: threshold,
        }
    }

    /// Lowercase, `_`/`-`/space folded away
    pub fn normalize(name: &str) -> String {
        name.chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(|c| c.to_lowercase())
            .collect()
    }

    /// Between 0.0 and 1.0, higher is more similar
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let a = Self::normalize(a);
        let b = Self::normalize(b);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let score = jaro_winkler(&a, &b);

        // `qty` vs `qty_total`
        let bonus = if a.contains(&b) || b.contains(&a) {
            let diff = (a.len() as f64 - b.len() as f64).abs();
            (1.0 - diff / a.len().max(b.len()) as f64) * 0.1
        } else {
            0.0
        };
        (score + bonus).min(1.0)
    }

    pub fn best_match<'a>(&self, name: &str, candidates: &'a [String]) -> Option<&'a String> {
        candidates
            .iter()
            .map(|c| (c, self.similarity(name, c)))
            .filter(|(_, score)| *score >= self.similarity_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(c, _)| c)
    }

    /// Fail with `UnknownColumn` when any of `names` is not a target column
    pub fn validate(&self, table: &str, names: &[String], target: &[String]) -> Result<()> {
        let known: HashSet<&str> = target.iter().map(String::as_str).collect();
        let unknown: Vec<String> = names
            .iter()
            .filter(|n| !known.contains(n.as_str()))
            .cloned()
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }

        let suggestions = unknown
            .iter()
            .filter_map(|n| self.best_match(n, target).map(|m| (n.clone(), m.clone())))
            .collect();
        Err(TabportError::UnknownColumn {
            table: table.to_string(),
            columns: unknown,
            suggestions,
        })
    }
}
