//! Property tests for stage invariants over generated inputs

use boardbom::schema::BoardRef;
use boardbom::sizing::units_needed;
use boardbom::{
    BomRow, CandidateGroup, CoverageAnalyzer, CoverageRecord, DemandCoverageSelector,
    MatchedBoardRow, PriceReconciler, SelectionOptions, SelectionRow, SelectionStrategy,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

const CHANNEL_TYPES: [&str; 4] = [
    "canBusChannels",
    "serialPortChannels",
    "encoderChannels",
    "afdxChannels",
];

fn demand(i: usize) -> String {
    format!("demand-{}", i)
}

/// Builds one group per demand from an offer table: `offers[d][b]` is the
/// quantity board `b` is offered at for demand `d`, or `None`.
fn build_groups(prices: &[u32], offers: &[Vec<Option<u32>>]) -> (Vec<CandidateGroup>, Vec<String>) {
    let mut groups = Vec::new();
    let mut demands = Vec::new();
    for (d, row) in offers.iter().enumerate() {
        let original = demand(d);
        demands.push(original.clone());

        let mut rows: Vec<MatchedBoardRow> = row
            .iter()
            .enumerate()
            .filter_map(|(b, offer)| offer.map(|quantity| (b, quantity)))
            .map(|(b, quantity)| {
                let price = f64::from(prices[b]);
                MatchedBoardRow {
                    id: Some(format!("board-{}", b)),
                    original: original.clone(),
                    price_cny: price,
                    quantity,
                    total_amount_cny: price * f64::from(quantity),
                    reason: "generated".to_string(),
                    ..MatchedBoardRow::default()
                }
            })
            .collect();
        if rows.is_empty() {
            rows.push(MatchedBoardRow::no_board(original));
        }
        groups.push(CandidateGroup::new(rows));
    }
    (groups, demands)
}

/// Up to eight demands offered a subset of up to six boards.
fn arb_groups() -> impl Strategy<Value = (Vec<CandidateGroup>, Vec<String>)> {
    (1usize..=6)
        .prop_flat_map(|boards| {
            (
                prop::collection::vec(1u32..500, boards),
                prop::collection::vec(
                    prop::collection::vec(prop::option::of(1u32..=3), boards),
                    1..=8,
                ),
            )
        })
        .prop_map(|(prices, offers)| build_groups(&prices, &offers))
}

fn arb_selection_options() -> impl Strategy<Value = SelectionOptions> {
    (
        prop_oneof![
            Just(SelectionStrategy::CoverageFirst),
            Just(SelectionStrategy::CostPerDemand),
        ],
        any::<bool>(),
    )
        .prop_map(|(strategy, dedupe)| SelectionOptions {
            strategy,
            dedupe_coverage_count: dedupe,
            emit_unmatched: true,
        })
}

/// Coverage records for every channel type over five boards.
fn arb_coverage_records() -> impl Strategy<Value = Vec<CoverageRecord>> {
    prop::collection::vec(prop::collection::vec(any::<bool>(), 5), CHANNEL_TYPES.len()).prop_map(
        |table| {
            CHANNEL_TYPES
                .iter()
                .zip(table)
                .map(|(channel_type, boards)| CoverageRecord {
                    channel_type: Some(channel_type.to_string()),
                    matched_board: boards
                        .iter()
                        .enumerate()
                        .filter(|(_, offered)| **offered)
                        .map(|(b, _)| BoardRef {
                            id: Some(format!("board-{}", b)),
                        })
                        .collect(),
                })
                .collect()
        },
    )
}

fn claimed_demands(rows: &[SelectionRow]) -> Vec<String> {
    let mut seen = Vec::new();
    for row in rows {
        match row {
            SelectionRow::Board(b) => seen.extend(b.covered_demands().map(str::to_string)),
            SelectionRow::Unmatched(u) => seen.push(u.original.clone()),
        }
    }
    seen.sort();
    seen
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn test_every_demand_claimed_exactly_once(
        (groups, mut demands) in arb_groups(),
        options in arb_selection_options(),
    ) {
        demands.sort();

        let rows = DemandCoverageSelector::new(options.clone()).select(&groups);
        prop_assert_eq!(claimed_demands(&rows), demands, "with {:?}", options);
    }

    #[test]
    fn test_reconciliation_keeps_every_demand(
        (groups, mut demands) in arb_groups(),
        drop_quantities in any::<bool>(),
    ) {
        demands.sort();

        let selection = DemandCoverageSelector::default().select(&groups);
        let per_demand: Vec<MatchedBoardRow> = groups
            .iter()
            .filter_map(|g| g.matched_board.first())
            .filter(|row| row.id.is_some())
            .cloned()
            .map(|mut row| {
                // Rows sized without a channel count carry neither quantity nor total.
                if drop_quantities {
                    row.quantity = 0;
                    row.total_amount_cny = 0.0;
                }
                row
            })
            .collect();

        let bom = PriceReconciler::new().reconcile(&selection, &per_demand, &[]);
        prop_assert!(bom.len() >= selection.len());

        let mut seen: Vec<String> = Vec::new();
        for row in &bom {
            match row {
                BomRow::Batch(b) => seen.extend(b.covered_demands().map(str::to_string)),
                BomRow::Single(line) => {
                    let expected = f64::from(line.quantity) * line.price_cny;
                    prop_assert!(
                        (expected - line.total_amount_cny).abs() < 1e-6,
                        "{}: {} x {} != {}",
                        line.original,
                        line.quantity,
                        line.price_cny,
                        line.total_amount_cny
                    );
                    seen.push(line.original.clone());
                }
                BomRow::Unmatched(u) => seen.push(u.original.clone()),
                BomRow::Error(_) => {}
            }
        }
        seen.sort();
        prop_assert_eq!(seen, demands);

        let before: f64 = selection
            .iter()
            .filter_map(SelectionRow::as_board)
            .map(|b| b.total_amount_cny)
            .sum();
        let after: f64 = bom.iter().map(BomRow::total_amount_cny).sum();
        prop_assert!(after <= before + 1e-6, "{} > {}", after, before);
    }

    #[test]
    fn test_coverage_partitions_universe(records in arb_coverage_records()) {
        let universe = CoverageAnalyzer::universe(&records);
        let coverage = CoverageAnalyzer::new().analyze(&records);

        for entry in &coverage {
            let satisfied: BTreeSet<&str> = records
                .iter()
                .filter(|r| {
                    r.matched_board
                        .iter()
                        .any(|b| b.id.as_deref() == Some(entry.id.as_str()))
                })
                .filter_map(|r| r.channel_type.as_deref())
                .collect();
            prop_assert_eq!(
                entry.not_satisfied.len() + satisfied.len(),
                universe.len(),
                "board {}",
                &entry.id
            );
        }

        let lengths: Vec<usize> = coverage.iter().map(|c| c.not_satisfied.len()).collect();
        prop_assert!(lengths.windows(2).all(|w| w[0] <= w[1]));

        prop_assert_eq!(coverage, CoverageAnalyzer::new().analyze(&records));
    }
}

#[test]
fn test_units_needed_matches_ceiling() {
    for board in 1..=16u32 {
        let mut previous = 0;
        for requirement in 0..=64u32 {
            let q = units_needed(f64::from(requirement), f64::from(board));
            assert_eq!(q, requirement.div_ceil(board));
            assert!(q >= previous);
            previous = q;
        }
    }
}
