//! BoardBOM - board selection and bill-of-materials allocation
//!
//! This library turns functional I/O requirements ("demands") and the
//! candidate boards an external matcher proposed for them into a cost-minimal
//! bill of materials: which boards to buy, how many, and at what price, with
//! every demand covered exactly once or reported as unmatched.
//!
//! # Quick Start
//!
//! ```no_run
//! use boardbom::{BomPipeline, PipelineOptions};
//! use std::path::Path;
//!
//! let pipeline = BomPipeline::new(PipelineOptions::default());
//! let report = pipeline.run_file(Path::new("pipeline_input.json")).unwrap();
//!
//! for row in &report.bom {
//!     println!("{:?}: {:.2} CNY", row.board_id(), row.total_amount_cny());
//! }
//! ```
//!
//! # Stages
//!
//! - **Coverage**: which channel types each board fails to satisfy
//! - **Sizing**: best board variant and unit count per requirement
//! - **Selection**: greedy demand-covering board selection
//! - **Reconciliation**: batch vs. per-demand pricing, cheaper wins
//! - **Matrix**: fixed-order channel capacity vectors for reporting

pub mod core;
pub mod coverage;
pub mod matrix;
pub mod price;
pub mod reconcile;
pub mod schema;
pub mod scoring;
pub mod selection;
pub mod sizing;

// Re-export main types
pub use crate::core::{
    load_json, load_section, BomError, BomPipeline, BomReport, BomSummary, PipelineInput,
    PipelineOptions,
};
pub use coverage::{BoardCoverage, CoverageAnalyzer};
pub use matrix::{BoardRecord, ChannelField, ChannelMatrixProjector, ChannelMatrixRow};
pub use reconcile::{BomRow, ErrorEntry, PriceReconciler, PricedLine, ReconcileInput};
pub use schema::{CandidateAssignment, CandidateGroup, CoverageRecord, Demand, MatchedBoardRow};
pub use scoring::{ScoreGroup, ScoreMerge, ScoreMerger};
pub use selection::{
    DemandCoverageSelector, SelectedBoard, SelectionOptions, SelectionRow, SelectionStatus,
    SelectionStrategy, UnmatchedDemand,
};
pub use sizing::{QuantitySizer, SizedBoard, SizedRow, SizingOptions, ZeroBoardCountPolicy};

/// Run the full pipeline over a JSON input file with default options
/// (convenience wrapper).
pub fn run_file(path: &std::path::Path) -> Result<BomReport, BomError> {
    BomPipeline::default().run_file(path)
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        BomError, BomPipeline, BomReport, BomRow, PipelineInput, PipelineOptions, SelectionRow,
        SelectionStrategy, ZeroBoardCountPolicy,
    };
}
