//! Price Reconciler
//!
//! Compares the coverage-optimized allocation (one row may batch several
//! demands under one board) against the price-optimized allocation (one row
//! per demand) and keeps whichever is cheaper for each batch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::schema::{de_string_or_null, MatchedBoardRow};
use crate::selection::{SelectedBoard, SelectionRow, UnmatchedDemand};

/// An upstream failure recorded against a demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(default, deserialize_with = "de_string_or_null")]
    pub original: String,
    #[serde(default, deserialize_with = "de_string_or_null")]
    pub reason: String,
}

/// Both allocations and the upstream errors, as read from one JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileInput {
    #[serde(default)]
    pub selection: Vec<SelectionRow>,
    #[serde(default)]
    pub per_demand: Vec<MatchedBoardRow>,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
}

/// A single demand priced from the per-demand allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedLine {
    pub id: Option<String>,
    pub original: String,
    pub quantity: u32,
    pub price_cny: f64,
    pub total_amount_cny: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_degree: Option<f64>,
}

/// A row that carries no quantity is priced as one unit, and the line says so.
impl From<&MatchedBoardRow> for PricedLine {
    fn from(row: &MatchedBoardRow) -> Self {
        Self {
            id: row.id.clone(),
            original: row.original.clone(),
            quantity: row.quantity.max(1),
            price_cny: row.price_cny,
            total_amount_cny: row.effective_total(),
            reason: row.reason.clone(),
            description: row.description.clone(),
            match_degree: row.match_degree,
        }
    }
}

/// A line of the final bill of materials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BomRow {
    /// One board serving one or more demands.
    Batch(SelectedBoard),
    /// One demand priced individually.
    Single(PricedLine),
    Unmatched(UnmatchedDemand),
    Error(ErrorEntry),
}

impl BomRow {
    /// Amount this line contributes to the BOM total.
    pub fn total_amount_cny(&self) -> f64 {
        match self {
            BomRow::Batch(b) => b.total_amount_cny,
            BomRow::Single(s) => s.total_amount_cny,
            BomRow::Unmatched(_) | BomRow::Error(_) => 0.0,
        }
    }

    pub fn board_id(&self) -> Option<&str> {
        match self {
            BomRow::Batch(b) => Some(b.id.as_str()),
            BomRow::Single(s) => s.id.as_deref(),
            BomRow::Unmatched(_) | BomRow::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, BomRow::Error(_))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PriceReconciler;

impl PriceReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Reconciles allocation `a` against per-demand allocation `b`, then
    /// appends `errors`.
    ///
    /// A batch of more than one demand switches to `b` only when every one of
    /// its demands has a priced row in `b` and their sum is strictly lower.
    /// A `b` row whose total (after the unit-price fallback) is zero or
    /// negative counts as unpriced, and its batch is kept as is.
    pub fn reconcile(
        &self,
        a: &[SelectionRow],
        b: &[MatchedBoardRow],
        errors: &[ErrorEntry],
    ) -> Vec<BomRow> {
        // First row per demand wins.
        let mut by_original: HashMap<&str, &MatchedBoardRow> = HashMap::new();
        for row in b {
            by_original.entry(row.original.as_str()).or_insert(row);
        }

        let mut result = Vec::with_capacity(a.len() + errors.len());
        let mut switched = 0usize;

        for row in a {
            let board = match row {
                SelectionRow::Unmatched(u) => {
                    result.push(BomRow::Unmatched(u.clone()));
                    continue;
                }
                SelectionRow::Board(board) => board,
            };

            if board.details.len() <= 1 {
                result.push(BomRow::Batch(board.clone()));
                continue;
            }

            match Self::priced_alternative(board, &by_original) {
                Some((lines, total_b)) if total_b < board.total_amount_cny => {
                    tracing::debug!(
                        "Board {}: per-demand pricing {} beats batch {}",
                        board.id,
                        total_b,
                        board.total_amount_cny
                    );
                    switched += 1;
                    result.extend(lines.into_iter().map(BomRow::Single));
                }
                _ => result.push(BomRow::Batch(board.clone())),
            }
        }

        result.extend(errors.iter().cloned().map(BomRow::Error));

        tracing::info!(
            "Reconciliation: {} batch(es) switched to per-demand pricing, {} error(s) carried",
            switched,
            errors.len()
        );
        result
    }

    pub fn reconcile_input(&self, input: &ReconcileInput) -> Vec<BomRow> {
        self.reconcile(&input.selection, &input.per_demand, &input.errors)
    }

    /// Per-demand lines for every demand in `board`, with their summed total,
    /// or `None` when any demand lacks a usable priced row.
    fn priced_alternative(
        board: &SelectedBoard,
        by_original: &HashMap<&str, &MatchedBoardRow>,
    ) -> Option<(Vec<PricedLine>, f64)> {
        let mut lines = Vec::with_capacity(board.details.len());
        let mut total = 0.0;
        for detail in &board.details {
            let Some(row) = by_original.get(detail.original.as_str()) else {
                tracing::debug!(
                    "Board {}: no per-demand price for '{}', keeping batch",
                    board.id,
                    detail.original
                );
                return None;
            };
            let line = PricedLine::from(*row);
            if line.total_amount_cny <= 0.0 {
                tracing::warn!(
                    "Per-demand row for '{}' has no price, keeping batch {}",
                    detail.original,
                    board.id
                );
                return None;
            }
            total += line.total_amount_cny;
            lines.push(line);
        }
        Some((lines, total))
    }
}
