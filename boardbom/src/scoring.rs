//! Score Merger
//!
//! Folds per-category scored match lists into one entry per board, summing
//! the scores, and picks out the boards that clear the good-match threshold.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::schema::{
    de_opt_string, de_string_or_null, de_vec_or_null, lenient_f64, scalar_attributes,
    AttributeValue,
};

/// Category names assigned to score groups by position.
pub const DEFAULT_CATEGORIES: &[&str] = &["CPU", "Hard Disk", "Memory", "Slots"];

/// Category used for groups beyond the configured names.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Default minimum total score for a good match (exclusive).
pub const DEFAULT_GOOD_MATCH_THRESHOLD: f64 = 2.4;

/// A board scored against one demand by the matcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoredMatch {
    #[serde(default, deserialize_with = "de_opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de_string_or_null")]
    pub reason: String,
    #[serde(default, deserialize_with = "de_string_or_null")]
    pub original: String,
    #[serde(default)]
    pub score: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScoredMatch {
    /// Numeric score: booleans count as 1/0, anything unreadable as 0.
    pub fn numeric_score(&self) -> f64 {
        match &self.score {
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            other => lenient_f64(other).unwrap_or(0.0),
        }
    }
}

/// Scored matches for one category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreGroup {
    #[serde(default, alias = "kkrr", deserialize_with = "de_vec_or_null")]
    pub matches: Vec<ScoredMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetail {
    pub category: String,
    pub score: f64,
    pub reason: String,
    pub original: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedBoard {
    pub id: String,
    pub details: Vec<ScoreDetail>,
    pub total_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreMerge {
    /// Every board, in first-encounter order.
    pub merged: Vec<MergedBoard>,
    /// Boards above the threshold, best first.
    pub good_match: Vec<MergedBoard>,
}

#[derive(Debug, Clone)]
pub struct ScoreMerger {
    categories: Vec<String>,
    threshold: f64,
}

impl Default for ScoreMerger {
    fn default() -> Self {
        Self::new(DEFAULT_GOOD_MATCH_THRESHOLD)
    }
}

impl ScoreMerger {
    pub fn new(threshold: f64) -> Self {
        Self {
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            threshold,
        }
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn category(&self, index: usize) -> &str {
        self.categories
            .get(index)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_CATEGORY)
    }

    pub fn merge(&self, groups: &[ScoreGroup]) -> ScoreMerge {
        let mut merged: Vec<MergedBoard> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (position, group) in groups.iter().enumerate() {
            let category = self.category(position);
            for m in &group.matches {
                let Some(id) = m.id.as_deref() else {
                    tracing::warn!("Skipping scored match without board id for '{}'", m.original);
                    continue;
                };
                let at = *index.entry(id.to_string()).or_insert_with(|| {
                    merged.push(MergedBoard {
                        id: id.to_string(),
                        details: Vec::new(),
                        total_score: 0.0,
                    });
                    merged.len() - 1
                });

                let score = m.numeric_score();
                let board = &mut merged[at];
                board.total_score += score;
                board.details.push(ScoreDetail {
                    category: category.to_string(),
                    score,
                    reason: m.reason.clone(),
                    original: m.original.clone(),
                    attributes: scalar_attributes(&m.extra, &[]),
                });
            }
        }

        let mut good_match: Vec<MergedBoard> = merged
            .iter()
            .filter(|b| b.total_score > self.threshold)
            .cloned()
            .collect();
        good_match.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));

        tracing::info!(
            "Score merge: {} boards, {} above {}",
            merged.len(),
            good_match.len(),
            self.threshold
        );
        ScoreMerge { merged, good_match }
    }
}
