//! Coverage Analyzer
//!
//! Works out, for every board the matcher proposed, which demand channel types
//! it was never matched against. Boards that satisfy more types sort first.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::schema::CoverageRecord;

/// Channel types a single board fails to satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardCoverage {
    pub id: String,
    /// Alphabetically ordered.
    pub not_satisfied: Vec<String>,
}

impl BoardCoverage {
    pub fn satisfies_all(&self) -> bool {
        self.not_satisfied.is_empty()
    }
}

/// Stateless analyzer over matcher coverage records.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoverageAnalyzer;

impl CoverageAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Distinct non-empty channel types across `records`, alphabetically.
    pub fn universe(records: &[CoverageRecord]) -> BTreeSet<String> {
        records
            .iter()
            .filter_map(|r| channel_type_of(r))
            .map(str::to_string)
            .collect()
    }

    /// Per-board unsatisfied channel types, ascending by how many are missing.
    ///
    /// Boards tie in first-encounter order. Records with an empty or missing
    /// channel type are ignored entirely, as are board references without an id.
    pub fn analyze(&self, records: &[CoverageRecord]) -> Vec<BoardCoverage> {
        let universe = Self::universe(records);

        let mut order: Vec<String> = Vec::new();
        let mut satisfied: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut skipped_untyped = 0usize;

        for record in records {
            let Some(channel_type) = channel_type_of(record) else {
                skipped_untyped += 1;
                continue;
            };
            for board in &record.matched_board {
                let Some(id) = board.id.as_deref() else {
                    tracing::debug!("Skipping board reference without id for '{}'", channel_type);
                    continue;
                };
                satisfied
                    .entry(id.to_string())
                    .or_insert_with(|| {
                        order.push(id.to_string());
                        BTreeSet::new()
                    })
                    .insert(channel_type.to_string());
            }
        }

        if skipped_untyped > 0 {
            tracing::debug!("Ignored {} coverage records without a channel type", skipped_untyped);
        }

        let mut result: Vec<BoardCoverage> = order
            .into_iter()
            .map(|id| {
                let matched = &satisfied[&id];
                let not_satisfied = universe
                    .iter()
                    .filter(|t| !matched.contains(*t))
                    .cloned()
                    .collect();
                BoardCoverage { id, not_satisfied }
            })
            .collect();

        // Stable: equal counts keep first-encounter order.
        result.sort_by_key(|c| c.not_satisfied.len());

        tracing::info!(
            "Coverage analysis: {} boards over {} channel types",
            result.len(),
            universe.len()
        );
        result
    }
}

fn channel_type_of(record: &CoverageRecord) -> Option<&str> {
    record
        .channel_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
