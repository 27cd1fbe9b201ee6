use async_trait::async_trait;
use rapidfuzz::fuzz;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::debug;

use super::{string_list, ToolArguments, ToolError, ToolFunction};
use crate::search::data_loader::{SubstitutionRecord, INGREDIENT_FIELD};

/// Minimum similarity score for a table row to count as a match.
pub const MATCH_THRESHOLD: f64 = 80.0;

/// Indel similarity scaled to `[0, 100]`: `200 * lcs / (len_a + len_b)` over
/// characters. Two empty strings score 100.
pub fn fuzzy_ratio(a: &str, b: &str) -> f64 {
    // rapidfuzz normalizes to [0, 1]
    100.0 * fuzz::ratio(a.chars(), b.chars())
}

fn is_similar(a: &str, b: &str) -> bool {
    fuzzy_ratio(&a.to_lowercase(), &b.to_lowercase()) >= MATCH_THRESHOLD
}

/// Rows whose ingredient resembles any requested ingredient, deduplicated in
/// first-seen order. With no match at all the result is a single
/// `{"substitute": "remove ingredient"}` record.
pub fn substitution_filter(table: &[SubstitutionRecord], to_replace: &[String]) -> Vec<SubstitutionRecord> {
    let mut seen = HashSet::new();
    let mut matches = Vec::new();

    for ingredient in to_replace {
        for record in table {
            let Some(name) = record.get(INGREDIENT_FIELD).and_then(Value::as_str) else {
                continue;
            };
            if !is_similar(name, ingredient) {
                continue;
            }
            // BTreeMap keys are sorted, so equal records serialize identically.
            let key = serde_json::to_string(record).unwrap_or_default();
            if seen.insert(key) {
                matches.push(record.clone());
            }
        }
    }

    if matches.is_empty() {
        let mut fallback = SubstitutionRecord::new();
        fallback.insert("substitute".to_string(), json!("remove ingredient"));
        matches.push(fallback);
    }
    matches
}

/// The `substitution_filter` tool over a loaded table.
pub struct SubstitutionFilter {
    table: Vec<SubstitutionRecord>,
}

impl SubstitutionFilter {
    pub fn new(table: Vec<SubstitutionRecord>) -> Self {
        Self { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[async_trait]
impl ToolFunction for SubstitutionFilter {
    async fn call(&self, arguments: &ToolArguments) -> Result<Value, ToolError> {
        let to_replace = string_list(arguments, "to_replace")?;
        let matches = substitution_filter(&self.table, &to_replace);
        debug!(requested = ?to_replace, matches = matches.len(), "Substitution lookup");
        serde_json::to_value(matches).map_err(|e| ToolError::Failed(e.to_string()))
    }
}
