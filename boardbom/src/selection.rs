//! Demand Coverage Selector
//!
//! Greedy set cover over every candidate board: boards that cover more
//! demands are taken first, cheaper boards win ties, and each demand is
//! claimed by exactly one selected board or reported as unmatched.
//!
//! # Algorithm
//!
//! ```text
//! groups ──▶ aggregate per board id ──▶ sort (coverage desc, price asc)
//!                                              │
//!                                              ▼
//!                         walk: accept board if it adds an unclaimed demand,
//!                               then mark all of its demands claimed
//!                                              │
//!                                              ▼
//!                         unmatched pass: every demand nobody claimed
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::price::round2;
use crate::schema::{de_string_or_null, CandidateGroup, MatchedBoardRow, NO_BOARD_REASON};

/// How boards are ranked during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Single pass over boards sorted by coverage count, then unit price.
    #[default]
    CoverageFirst,
    /// Repeatedly take the board with the lowest unit price per newly
    /// covered demand.
    CostPerDemand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionOptions {
    pub strategy: SelectionStrategy,
    /// Count distinct demands per board rather than raw row frequency.
    pub dedupe_coverage_count: bool,
    /// Emit rows for demands no selected board covers.
    pub emit_unmatched: bool,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::CoverageFirst,
            dedupe_coverage_count: true,
            emit_unmatched: true,
        }
    }
}

/// One demand served by a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandDetail {
    pub original: String,
    #[serde(default, deserialize_with = "de_string_or_null")]
    pub reason: String,
    #[serde(
        default,
        deserialize_with = "de_string_or_null",
        skip_serializing_if = "String::is_empty"
    )]
    pub description: String,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub total_amount_cny: f64,
}

impl DemandDetail {
    fn from_row(row: &MatchedBoardRow) -> Self {
        let quantity = row.quantity.max(1);
        let total = if row.total_amount_cny > 0.0 {
            row.total_amount_cny
        } else {
            row.price_cny * f64::from(quantity)
        };
        Self {
            original: row.original.clone(),
            reason: row.reason.clone(),
            description: row.description.clone(),
            quantity,
            total_amount_cny: round2(total),
        }
    }
}

/// Outcome recorded on a selection row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStatus {
    #[default]
    Selected,
}

/// A board accepted into the selection, with the demands it claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedBoard {
    pub id: String,
    #[serde(default)]
    pub status: SelectionStatus,
    pub price_cny: f64,
    pub quantity: u32,
    pub total_amount_cny: f64,
    #[serde(default)]
    pub coverage_count: usize,
    #[serde(default)]
    pub details: Vec<DemandDetail>,
}

impl SelectedBoard {
    pub fn covered_demands(&self) -> impl Iterator<Item = &str> {
        self.details.iter().map(|d| d.original.as_str())
    }
}

/// A demand with no board, carried through so it is never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedDemand {
    pub original: String,
    #[serde(default, deserialize_with = "de_string_or_null")]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionRow {
    Board(SelectedBoard),
    Unmatched(UnmatchedDemand),
}

impl SelectionRow {
    pub fn as_board(&self) -> Option<&SelectedBoard> {
        match self {
            SelectionRow::Board(b) => Some(b),
            SelectionRow::Unmatched(_) => None,
        }
    }

    pub fn as_unmatched(&self) -> Option<&UnmatchedDemand> {
        match self {
            SelectionRow::Board(_) => None,
            SelectionRow::Unmatched(u) => Some(u),
        }
    }
}

/// Everything the matcher proposed for a single board id.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardTally {
    pub id: String,
    /// Unit price of the first row seen for this board.
    pub price_cny: f64,
    pub total_amount_cny: f64,
    /// Raw number of rows naming this board.
    pub hits: usize,
    /// One entry per distinct demand, in encounter order.
    pub details: Vec<DemandDetail>,
}

impl BoardTally {
    pub fn coverage_count(&self, dedupe: bool) -> usize {
        if dedupe {
            self.details.len()
        } else {
            self.hits
        }
    }
}

/// Per-board tallies in first-encounter order, plus every demand seen.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub tallies: Vec<BoardTally>,
    /// Every demand text seen, in encounter order, with the reason from its
    /// first "no board found" row (if any).
    pub demands: Vec<(String, Option<String>)>,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DemandCoverageSelector {
    options: SelectionOptions,
}

impl DemandCoverageSelector {
    pub fn new(options: SelectionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SelectionOptions {
        &self.options
    }

    /// Folds every group's rows into per-board tallies.
    pub fn aggregate(groups: &[CandidateGroup]) -> Aggregation {
        let mut aggregation = Aggregation::default();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut demand_index: HashMap<String, usize> = HashMap::new();

        for row in groups.iter().flat_map(|g| g.matched_board.iter()) {
            let original = row.original.trim();
            if original.is_empty() {
                tracing::warn!("Skipping matched row without demand text (board {:?})", row.id);
                aggregation.skipped_rows += 1;
                continue;
            }

            let slot = *demand_index.entry(original.to_string()).or_insert_with(|| {
                aggregation.demands.push((original.to_string(), None));
                aggregation.demands.len() - 1
            });

            let Some(id) = row.id.as_deref() else {
                if row.is_no_board() {
                    let reason = &mut aggregation.demands[slot].1;
                    if reason.is_none() {
                        *reason = Some(row.reason.trim().to_string());
                    }
                } else {
                    tracing::warn!("Skipping matched row without board id for '{}'", original);
                    aggregation.skipped_rows += 1;
                }
                continue;
            };

            let at = *index.entry(id.to_string()).or_insert_with(|| {
                aggregation.tallies.push(BoardTally {
                    id: id.to_string(),
                    price_cny: row.price_cny,
                    total_amount_cny: 0.0,
                    hits: 0,
                    details: Vec::new(),
                });
                aggregation.tallies.len() - 1
            });

            let tally = &mut aggregation.tallies[at];
            tally.hits += 1;
            if !tally.details.iter().any(|d| d.original == original) {
                let mut detail = DemandDetail::from_row(row);
                detail.original = original.to_string();
                tally.total_amount_cny = round2(tally.total_amount_cny + detail.total_amount_cny);
                tally.details.push(detail);
            }
        }

        aggregation
    }

    /// Selects boards so that every demand is claimed at most once.
    pub fn select(&self, groups: &[CandidateGroup]) -> Vec<SelectionRow> {
        let aggregation = Self::aggregate(groups);
        let dedupe = self.options.dedupe_coverage_count;

        let order = match self.options.strategy {
            SelectionStrategy::CoverageFirst => coverage_first_order(&aggregation.tallies, dedupe),
            SelectionStrategy::CostPerDemand => cost_per_demand_order(&aggregation.tallies),
        };

        let mut claimed: HashSet<&str> = HashSet::new();
        let mut rows = Vec::new();

        for at in order {
            let tally = &aggregation.tallies[at];
            let fresh: Vec<&DemandDetail> = tally
                .details
                .iter()
                .filter(|d| !claimed.contains(d.original.as_str()))
                .collect();
            if fresh.is_empty() {
                continue;
            }

            let quantity = fresh.iter().map(|d| d.quantity).sum();
            let total = round2(fresh.iter().map(|d| d.total_amount_cny).sum());
            let details: Vec<DemandDetail> = fresh.into_iter().cloned().collect();

            // Claim every demand the board covers, not only the new ones.
            claimed.extend(tally.details.iter().map(|d| d.original.as_str()));

            tracing::debug!(
                "Selected board {} for {} demand(s), total {}",
                tally.id,
                details.len(),
                total
            );
            rows.push(SelectionRow::Board(SelectedBoard {
                id: tally.id.clone(),
                status: SelectionStatus::Selected,
                price_cny: tally.price_cny,
                quantity,
                total_amount_cny: total,
                coverage_count: tally.coverage_count(dedupe),
                details,
            }));
        }

        let boards = rows.len();
        let mut unmatched = 0usize;
        if self.options.emit_unmatched {
            for (original, reason) in &aggregation.demands {
                if claimed.contains(original.as_str()) {
                    continue;
                }
                unmatched += 1;
                rows.push(SelectionRow::Unmatched(UnmatchedDemand {
                    original: original.clone(),
                    reason: reason.clone().unwrap_or_else(|| NO_BOARD_REASON.to_string()),
                }));
            }
        }

        tracing::info!(
            "Selection: {} of {} boards chosen, {} unmatched demand(s), {} row(s) skipped",
            boards,
            aggregation.tallies.len(),
            unmatched,
            aggregation.skipped_rows
        );
        rows
    }
}

fn coverage_first_order(tallies: &[BoardTally], dedupe: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..tallies.len()).collect();
    // Stable: full ties keep first-encounter order.
    order.sort_by(|&a, &b| {
        let (ta, tb) = (&tallies[a], &tallies[b]);
        tb.coverage_count(dedupe)
            .cmp(&ta.coverage_count(dedupe))
            .then_with(|| ta.price_cny.total_cmp(&tb.price_cny))
    });
    order
}

fn cost_per_demand_order(tallies: &[BoardTally]) -> Vec<usize> {
    let mut claimed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<usize> = (0..tallies.len()).collect();
    let mut order = Vec::with_capacity(tallies.len());

    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for (slot, &at) in remaining.iter().enumerate() {
            let tally = &tallies[at];
            let fresh = tally
                .details
                .iter()
                .filter(|d| !claimed.contains(d.original.as_str()))
                .count();
            if fresh == 0 {
                continue;
            }
            let ratio = tally.price_cny / fresh as f64;
            let better = match best {
                None => true,
                Some((best_slot, best_fresh, best_ratio)) => {
                    let best_tally = &tallies[remaining[best_slot]];
                    ratio
                        .total_cmp(&best_ratio)
                        .then_with(|| best_fresh.cmp(&fresh))
                        .then_with(|| tally.price_cny.total_cmp(&best_tally.price_cny))
                        == Ordering::Less
                }
            };
            if better {
                best = Some((slot, fresh, ratio));
            }
        }

        let Some((slot, _, _)) = best else {
            break;
        };
        let at = remaining.remove(slot);
        claimed.extend(tallies[at].details.iter().map(|d| d.original.as_str()));
        order.push(at);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: Option<&str>, original: &str, price: f64) -> MatchedBoardRow {
        MatchedBoardRow {
            id: id.map(str::to_string),
            original: original.to_string(),
            price_cny: price,
            quantity: 1,
            total_amount_cny: price,
            reason: "matched".to_string(),
            ..MatchedBoardRow::default()
        }
    }

    fn board_ids(rows: &[SelectionRow]) -> Vec<&str> {
        rows.iter().filter_map(SelectionRow::as_board).map(|b| b.id.as_str()).collect()
    }

    /// Demands {A,B,C}; X covers {A,B} @100, Y covers {B,C} @60, Z covers {C} @10.
    fn three_demand_groups() -> Vec<CandidateGroup> {
        vec![
            CandidateGroup::new(vec![row(Some("X"), "A", 100.0)]),
            CandidateGroup::new(vec![row(Some("X"), "B", 100.0), row(Some("Y"), "B", 60.0)]),
            CandidateGroup::new(vec![row(Some("Y"), "C", 60.0), row(Some("Z"), "C", 10.0)]),
        ]
    }

    fn assert_exactly_once(rows: &[SelectionRow], demands: &[&str]) {
        let mut seen: Vec<&str> = Vec::new();
        for r in rows {
            match r {
                SelectionRow::Board(b) => seen.extend(b.covered_demands()),
                SelectionRow::Unmatched(u) => seen.push(u.original.as_str()),
            }
        }
        seen.sort_unstable();
        let mut expected = demands.to_vec();
        expected.sort_unstable();
        assert_eq!(seen, expected, "every demand exactly once");
    }

    #[test]
    fn test_equal_coverage_cheaper_first() {
        let groups = vec![CandidateGroup::new(vec![
            row(Some("boardA"), "d1", 100.0),
            row(Some("boardA"), "d2", 100.0),
            row(Some("boardA"), "d3", 100.0),
            row(Some("boardB"), "d1", 50.0),
            row(Some("boardB"), "d2", 50.0),
            row(Some("boardB"), "d3", 50.0),
        ])];

        let rows = DemandCoverageSelector::default().select(&groups);

        assert_eq!(board_ids(&rows), vec!["boardB"]);
        let b = rows[0].as_board().unwrap();
        assert_eq!(b.coverage_count, 3);
        assert_eq!(b.quantity, 3);
        assert_eq!(b.total_amount_cny, 150.0);
    }

    #[test]
    fn test_coverage_first_walk() {
        let rows = DemandCoverageSelector::default().select(&three_demand_groups());

        // Y and X both cover two demands; Y is cheaper so it goes first.
        assert_eq!(board_ids(&rows), vec!["Y", "X"]);
        let x = rows[1].as_board().unwrap();
        assert_eq!(x.covered_demands().collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(x.coverage_count, 2);
        assert_exactly_once(&rows, &["A", "B", "C"]);
    }

    #[test]
    fn test_cost_per_demand_walk() {
        let selector = DemandCoverageSelector::new(SelectionOptions {
            strategy: SelectionStrategy::CostPerDemand,
            ..SelectionOptions::default()
        });
        let rows = selector.select(&three_demand_groups());

        // Cheapest per new demand goes first: Z at 10, then X at 50 (Y at 60).
        assert_eq!(board_ids(&rows), vec!["Z", "X"]);
        let x = rows[1].as_board().unwrap();
        assert_eq!(x.covered_demands().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_exactly_once(&rows, &["A", "B", "C"]);
    }

    #[test]
    fn test_selected_rows_carry_status() {
        let rows = DemandCoverageSelector::default().select(&three_demand_groups());

        let value = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(value["kind"], "board");
        assert_eq!(value["status"], "selected");
        assert!(rows
            .iter()
            .filter_map(SelectionRow::as_board)
            .all(|b| b.status == SelectionStatus::Selected));
    }

    #[test]
    fn test_all_demands_claimed_blocks_residual_overlap() {
        // P covers {A,B}; Q covers {B} only and must be skipped.
        let groups = vec![CandidateGroup::new(vec![
            row(Some("P"), "A", 10.0),
            row(Some("P"), "B", 10.0),
            row(Some("Q"), "B", 1.0),
        ])];

        let rows = DemandCoverageSelector::default().select(&groups);
        assert_eq!(board_ids(&rows), vec!["P"]);
    }

    #[test]
    fn test_unmatched_pass() {
        let groups = vec![
            CandidateGroup::new(vec![row(Some("X"), "A", 5.0)]),
            CandidateGroup::new(vec![MatchedBoardRow::no_board("B")]),
            CandidateGroup::new(vec![row(None, "C", 0.0)]),
        ];

        let rows = DemandCoverageSelector::default().select(&groups);

        assert_eq!(board_ids(&rows), vec!["X"]);
        let unmatched: Vec<&UnmatchedDemand> =
            rows.iter().filter_map(SelectionRow::as_unmatched).collect();
        assert_eq!(unmatched.len(), 2);
        assert_eq!(unmatched[0].original, "B");
        assert_eq!(unmatched[0].reason, NO_BOARD_REASON);
        assert_eq!(unmatched[1].original, "C");
        assert_exactly_once(&rows, &["A", "B", "C"]);
    }

    #[test]
    fn test_sentinel_for_demand_covered_elsewhere_is_not_unmatched() {
        let groups = vec![
            CandidateGroup::new(vec![MatchedBoardRow::no_board("A")]),
            CandidateGroup::new(vec![row(Some("X"), "A", 5.0)]),
        ];

        let rows = DemandCoverageSelector::default().select(&groups);
        assert_eq!(rows.len(), 1);
        assert_exactly_once(&rows, &["A"]);
    }

    #[test]
    fn test_unmatched_pass_disabled() {
        let selector = DemandCoverageSelector::new(SelectionOptions {
            emit_unmatched: false,
            ..SelectionOptions::default()
        });
        let groups = vec![CandidateGroup::new(vec![MatchedBoardRow::no_board("B")])];
        assert!(selector.select(&groups).is_empty());
    }

    #[test]
    fn test_dedupe_changes_ranking() {
        // R is proposed three times for the same demand; S covers two demands.
        let groups = vec![CandidateGroup::new(vec![
            row(Some("R"), "A", 1.0),
            row(Some("R"), "A", 1.0),
            row(Some("R"), "A", 1.0),
            row(Some("S"), "A", 9.0),
            row(Some("S"), "B", 9.0),
        ])];

        let deduped = DemandCoverageSelector::default().select(&groups);
        assert_eq!(board_ids(&deduped), vec!["S"]);

        let raw = DemandCoverageSelector::new(SelectionOptions {
            dedupe_coverage_count: false,
            ..SelectionOptions::default()
        })
        .select(&groups);
        assert_eq!(board_ids(&raw), vec!["R", "S"]);
        assert_exactly_once(&raw, &["A", "B"]);
    }

    #[test]
    fn test_aggregate_totals_and_details() {
        let mut priced = row(Some("X"), "A", 20.0);
        priced.quantity = 3;
        priced.total_amount_cny = 0.0;
        let groups = vec![CandidateGroup::new(vec![
            priced,
            row(Some("X"), "B", 20.0),
            row(Some("X"), "A", 20.0),
        ])];

        let aggregation = DemandCoverageSelector::aggregate(&groups);
        let x = &aggregation.tallies[0];

        assert_eq!(x.hits, 3);
        assert_eq!(x.details.len(), 2);
        assert_eq!(x.details[0].quantity, 3);
        assert_eq!(x.details[0].total_amount_cny, 60.0);
        assert_eq!(x.total_amount_cny, 80.0);
    }

    #[test]
    fn test_quantity_times_price_matches_total() {
        let mut a = row(Some("X"), "A", 12.5);
        a.quantity = 4;
        a.total_amount_cny = 50.0;
        let mut b = row(Some("X"), "B", 12.5);
        b.quantity = 2;
        b.total_amount_cny = 25.0;

        let rows = DemandCoverageSelector::default().select(&[CandidateGroup::new(vec![a, b])]);
        let x = rows[0].as_board().unwrap();
        assert!((f64::from(x.quantity) * x.price_cny - x.total_amount_cny).abs() < 0.01);
    }

    #[test]
    fn test_rows_without_demand_text_are_skipped() {
        let groups = vec![CandidateGroup::new(vec![row(Some("X"), "  ", 5.0)])];
        let aggregation = DemandCoverageSelector::aggregate(&groups);
        assert!(aggregation.tallies.is_empty());
        assert_eq!(aggregation.skipped_rows, 1);
    }

    #[test]
    fn test_selection_row_json_shape() {
        let rows = DemandCoverageSelector::default().select(&three_demand_groups());
        let value = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(value["kind"], "board");
        assert_eq!(value["id"], "Y");
        assert!(value["details"].is_array());
    }
}
