//! Pipeline orchestration shared by the CLI and library users.
//! Every stage is a pure function of its input snapshot.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

use crate::coverage::{BoardCoverage, CoverageAnalyzer};
use crate::matrix::{BoardRecord, ChannelMatrixProjector, ChannelMatrixRow};
use crate::reconcile::{BomRow, ErrorEntry, PriceReconciler};
use crate::schema::{CandidateAssignment, CandidateGroup, CoverageRecord, Demand, MatchedBoardRow};
use crate::scoring::DEFAULT_GOOD_MATCH_THRESHOLD;
use crate::selection::{DemandCoverageSelector, SelectionOptions, SelectionRow, SelectionStrategy};
use crate::sizing::{QuantitySizer, SizedRow, SizingOptions, ZeroBoardCountPolicy};

#[derive(Debug, thiserror::Error)]
pub enum BomError {
    #[error("Missing required input: {0}")]
    MissingInput(&'static str),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Switches for a pipeline run (CLI flags or a JSON config file).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineOptions {
    pub zero_board_count_policy: ZeroBoardCountPolicy,
    pub enable_description_fallback: bool,
    pub dedupe_coverage_count: bool,
    pub emit_unmatched: bool,
    pub selection_strategy: SelectionStrategy,
    pub good_match_threshold: f64,
    pub normalize_groups: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            zero_board_count_policy: ZeroBoardCountPolicy::UseRequirement,
            enable_description_fallback: true,
            dedupe_coverage_count: true,
            emit_unmatched: true,
            selection_strategy: SelectionStrategy::CoverageFirst,
            good_match_threshold: DEFAULT_GOOD_MATCH_THRESHOLD,
            normalize_groups: true,
        }
    }
}

impl PipelineOptions {
    /// Loads options from a JSON file; omitted keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, BomError> {
        let content = std::fs::read_to_string(path)?;
        let options: PipelineOptions = serde_json::from_str(&content)
            .map_err(|e| BomError::Config(format!("{}: {}", path.display(), e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), BomError> {
        if !self.good_match_threshold.is_finite() {
            return Err(BomError::Config(
                "good_match_threshold must be a finite number".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sizing(&self) -> SizingOptions {
        SizingOptions {
            zero_board_count_policy: self.zero_board_count_policy,
            enable_description_fallback: self.enable_description_fallback,
        }
    }

    pub fn selection(&self) -> SelectionOptions {
        SelectionOptions {
            strategy: self.selection_strategy,
            dedupe_coverage_count: self.dedupe_coverage_count,
            emit_unmatched: self.emit_unmatched,
        }
    }
}

/// One pipeline run's input snapshot.
///
/// `coverage_records`, `requirements`, `candidates` and `groups` are required;
/// leaving any of them out is a contract violation. `errors` and `boards`
/// default to empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineInput {
    #[serde(default)]
    pub coverage_records: Option<Vec<CoverageRecord>>,
    #[serde(default)]
    pub requirements: Option<Vec<Demand>>,
    #[serde(default)]
    pub candidates: Option<Vec<CandidateAssignment>>,
    #[serde(default)]
    pub groups: Option<Vec<CandidateGroup>>,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    #[serde(default)]
    pub boards: Vec<BoardRecord>,
}

impl PipelineInput {
    pub fn from_json_file(path: &Path) -> Result<Self, BomError> {
        load_json(path)
    }
}

/// Totals over the final bill of materials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomSummary {
    pub board_lines: usize,
    pub unmatched: usize,
    pub errors: usize,
    pub total_amount_cny: f64,
}

impl BomSummary {
    pub fn from_rows(rows: &[BomRow]) -> Self {
        let mut summary = BomSummary {
            board_lines: 0,
            unmatched: 0,
            errors: 0,
            total_amount_cny: 0.0,
        };
        for row in rows {
            match row {
                BomRow::Batch(_) | BomRow::Single(_) => summary.board_lines += 1,
                BomRow::Unmatched(_) => summary.unmatched += 1,
                BomRow::Error(_) => summary.errors += 1,
            }
            summary.total_amount_cny += row.total_amount_cny();
        }
        summary.total_amount_cny = crate::price::round2(summary.total_amount_cny);
        summary
    }
}

/// Result of a full run, every stage's output kept for auditing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BomReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub options: PipelineOptions,
    pub coverage: Vec<BoardCoverage>,
    pub sized: Vec<SizedRow>,
    pub selection: Vec<SelectionRow>,
    pub bom: Vec<BomRow>,
    pub matrix: Vec<ChannelMatrixRow>,
    pub summary: BomSummary,
}

impl BomReport {
    pub fn has_unmatched(&self) -> bool {
        self.summary.unmatched > 0
    }
}

/// Runs coverage, sizing, selection, reconciliation and matrix projection.
#[derive(Debug, Clone, Default)]
pub struct BomPipeline {
    options: PipelineOptions,
}

impl BomPipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Groups as handed to selection: demand-tagged groups are normalized
    /// (quantity defaults to one, totals recomputed from unit price) unless
    /// `normalize_groups` is off.
    pub fn prepare_groups(&self, groups: &[CandidateGroup]) -> Vec<CandidateGroup> {
        if !self.options.normalize_groups {
            return groups.to_vec();
        }
        groups.iter().map(CandidateGroup::normalized).collect()
    }

    /// Runs every stage over `input`.
    pub fn run(&self, input: &PipelineInput) -> Result<BomReport, BomError> {
        let coverage_records = input
            .coverage_records
            .as_deref()
            .ok_or(BomError::MissingInput("coverage_records"))?;
        let requirements = input
            .requirements
            .as_deref()
            .ok_or(BomError::MissingInput("requirements"))?;
        let candidates = input
            .candidates
            .as_deref()
            .ok_or(BomError::MissingInput("candidates"))?;
        let groups = input
            .groups
            .as_deref()
            .ok_or(BomError::MissingInput("groups"))?;

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("bom_run", %run_id);
        let _guard = span.enter();

        let coverage = CoverageAnalyzer::new().analyze(coverage_records);

        let sized = QuantitySizer::new(self.options.sizing()).size_all(requirements, candidates);
        let per_demand: Vec<MatchedBoardRow> = sized
            .iter()
            .filter_map(SizedRow::board)
            .map(|b| b.to_matched_row())
            .collect();

        let groups = self.prepare_groups(groups);
        let selection = DemandCoverageSelector::new(self.options.selection()).select(&groups);

        let bom = PriceReconciler::new().reconcile(&selection, &per_demand, &input.errors);

        let in_bom: Vec<&str> = bom.iter().filter_map(BomRow::board_id).collect();
        let catalog: Vec<BoardRecord> = input
            .boards
            .iter()
            .filter(|b| b.id.as_deref().is_some_and(|id| in_bom.contains(&id)))
            .cloned()
            .collect();
        let matrix = ChannelMatrixProjector::new().project(&catalog, &coverage);

        let summary = BomSummary::from_rows(&bom);
        tracing::info!(
            "BOM ready: {} board line(s), {} unmatched, total {} CNY",
            summary.board_lines,
            summary.unmatched,
            summary.total_amount_cny
        );

        Ok(BomReport {
            run_id,
            generated_at: Utc::now(),
            options: self.options.clone(),
            coverage,
            sized,
            selection,
            bom,
            matrix,
            summary,
        })
    }

    /// Loads `path` as a [`PipelineInput`] and runs it.
    pub fn run_file(&self, path: &Path) -> Result<BomReport, BomError> {
        let input = PipelineInput::from_json_file(path)?;
        self.run(&input)
    }
}

/// Reads and deserializes a JSON document.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, BomError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Reads a JSON list stored either bare or under `key` of a top-level object,
/// so a single stage can be fed the same file as the whole pipeline.
pub fn load_section<T: DeserializeOwned>(path: &Path, key: &'static str) -> Result<Vec<T>, BomError> {
    let content = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&content)? {
        list @ Value::Array(_) => Ok(serde_json::from_value(list)?),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Null) => Ok(Vec::new()),
            Some(section) => Ok(serde_json::from_value(section)?),
            None => Err(BomError::MissingInput(key)),
        },
        _ => Err(BomError::MissingInput(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: serde_json::Value) -> PipelineInput {
        serde_json::from_value(value).expect("pipeline input should deserialize")
    }

    #[test]
    fn test_missing_collections_are_fatal() {
        let pipeline = BomPipeline::default();

        let err = pipeline.run(&PipelineInput::default()).unwrap_err();
        assert!(matches!(err, BomError::MissingInput("coverage_records")));

        let err = pipeline
            .run(&input(json!({"coverage_records": [], "requirements": [], "candidates": []})))
            .unwrap_err();
        assert!(matches!(err, BomError::MissingInput("groups")));
        assert_eq!(err.to_string(), "Missing required input: groups");
    }

    #[test]
    fn test_empty_collections_produce_empty_report() {
        let report = BomPipeline::default()
            .run(&input(json!({
                "coverage_records": [],
                "requirements": [],
                "candidates": [],
                "groups": []
            })))
            .unwrap();

        assert!(report.bom.is_empty());
        assert_eq!(report.summary.total_amount_cny, 0.0);
        assert!(!report.has_unmatched());
    }

    #[test]
    fn test_options_defaults_and_partial_json() {
        let defaults = PipelineOptions::default();
        assert!(defaults.dedupe_coverage_count);
        assert!(defaults.enable_description_fallback);
        assert_eq!(defaults.zero_board_count_policy, ZeroBoardCountPolicy::UseRequirement);

        let parsed: PipelineOptions = serde_json::from_value(json!({
            "zero_board_count_policy": "constant_one",
            "selection_strategy": "cost_per_demand"
        }))
        .unwrap();
        assert_eq!(parsed.zero_board_count_policy, ZeroBoardCountPolicy::ConstantOne);
        assert_eq!(parsed.selection_strategy, SelectionStrategy::CostPerDemand);
        assert!(parsed.emit_unmatched);
    }

    #[test]
    fn test_options_reject_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{"dedupe_coverage": false}"#).unwrap();

        let err = PipelineOptions::from_json_file(&path).unwrap_err();
        assert!(matches!(err, BomError::Config(_)));
    }

    #[test]
    fn test_options_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{"emit_unmatched": false, "good_match_threshold": 3.0}"#).unwrap();

        let options = PipelineOptions::from_json_file(&path).unwrap();
        assert!(!options.emit_unmatched);
        assert_eq!(options.good_match_threshold, 3.0);
        assert!(!options.selection().emit_unmatched);
    }

    #[test]
    fn test_load_section_bare_or_keyed() {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("bare.json");
        let keyed = dir.path().join("keyed.json");
        std::fs::write(&bare, r#"[{"original": "a"}, {"original": "b"}]"#).unwrap();
        std::fs::write(&keyed, r#"{"requirements": [{"original": "a"}], "groups": null}"#).unwrap();

        let demands: Vec<Demand> = load_section(&bare, "requirements").unwrap();
        assert_eq!(demands.len(), 2);

        let demands: Vec<Demand> = load_section(&keyed, "requirements").unwrap();
        assert_eq!(demands, vec![Demand::new("a")]);

        let groups: Vec<CandidateGroup> = load_section(&keyed, "groups").unwrap();
        assert!(groups.is_empty());

        let err = load_section::<CoverageRecord>(&keyed, "coverage_records").unwrap_err();
        assert!(matches!(err, BomError::MissingInput("coverage_records")));
    }

    fn single_demand_input(group: serde_json::Value) -> PipelineInput {
        input(json!({
            "coverage_records": [],
            "requirements": [{"original": "a"}],
            "candidates": [],
            "groups": [group]
        }))
    }

    #[test]
    fn test_null_reason_in_group_row_does_not_abort() {
        let input = single_demand_input(json!({
            "matched_board": [
                {"id": "X", "original": "a", "price_cny": 10, "quantity": 1, "reason": null}
            ]
        }));

        let report = BomPipeline::default()
            .run(&input)
            .expect("null reason should not fail the run");
        let board = report.selection[0].as_board().expect("X is selected");
        assert_eq!(board.id, "X");
        assert_eq!(board.details[0].reason, "");
    }

    #[test]
    fn test_demand_tagged_groups_are_normalized_before_selection() {
        let input = single_demand_input(json!({
            "original": "a",
            "matched_board": [
                {"id": "X", "original": "stale", "price_cny": "￥120", "total_amount_cny": 999}
            ]
        }));

        let report = BomPipeline::default().run(&input).unwrap();
        let board = report.selection[0].as_board().unwrap();
        assert_eq!(board.details[0].original, "a", "Row is stamped with the group demand");
        assert_eq!(board.quantity, 1);
        assert_eq!(board.total_amount_cny, 120.0, "Stale total is recomputed");

        let raw = BomPipeline::new(PipelineOptions {
            normalize_groups: false,
            ..PipelineOptions::default()
        })
        .run(&input)
        .unwrap();
        let board = raw.selection[0].as_board().unwrap();
        assert_eq!(board.details[0].original, "stale");
        assert_eq!(board.total_amount_cny, 999.0);
    }

    #[test]
    fn test_empty_tagged_group_becomes_unmatched() {
        let input = single_demand_input(json!({"original": "a", "matched_board": null}));

        let report = BomPipeline::default().run(&input).unwrap();
        let unmatched = report.selection[0]
            .as_unmatched()
            .expect("demand without boards stays visible");
        assert_eq!(unmatched.original, "a");
        assert!(report.has_unmatched());
    }

    #[test]
    fn test_summary_counts() {
        let rows = vec![
            BomRow::Unmatched(crate::selection::UnmatchedDemand {
                original: "x".into(),
                reason: String::new(),
            }),
            BomRow::Error(ErrorEntry {
                original: "y".into(),
                reason: "boom".into(),
            }),
        ];
        let summary = BomSummary::from_rows(&rows);
        assert_eq!(summary.board_lines, 0);
        assert_eq!(summary.unmatched, 1);
        assert_eq!(summary.errors, 1);
    }
}
