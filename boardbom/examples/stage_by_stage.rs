//! Example: driving each stage directly (without BomPipeline).
//! Run with: cargo run --example stage_by_stage [path/to/input.json]

use boardbom::{
    ChannelField, ChannelMatrixProjector, CoverageAnalyzer, DemandCoverageSelector,
    PipelineInput, PriceReconciler, QuantitySizer, SizedRow,
};
use std::path::Path;

fn main() -> Result<(), boardbom::BomError> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tests/fixtures/pipeline_input.json".to_string());
    let input = PipelineInput::from_json_file(Path::new(&path))?;

    let coverage = CoverageAnalyzer::new().analyze(input.coverage_records.as_deref().unwrap_or(&[]));
    println!("Coverage:");
    for entry in &coverage {
        println!("  {} misses {:?}", entry.id, entry.not_satisfied);
    }

    let sized = QuantitySizer::default().size_all(
        input.requirements.as_deref().unwrap_or(&[]),
        input.candidates.as_deref().unwrap_or(&[]),
    );
    let per_demand: Vec<_> = sized
        .iter()
        .filter_map(SizedRow::board)
        .map(|b| b.to_matched_row())
        .collect();

    let selection = DemandCoverageSelector::default().select(input.groups.as_deref().unwrap_or(&[]));
    println!("Selected {} row(s)", selection.len());

    let bom = PriceReconciler::new().reconcile(&selection, &per_demand, &input.errors);
    println!("BOM has {} row(s)", bom.len());

    let matrix = ChannelMatrixProjector::new().project(&input.boards, &coverage);
    let header: Vec<&str> = ChannelField::ALL.iter().map(|f| f.label()).collect();
    println!("{}", header.join(" | "));
    for row in &matrix {
        let cells: Vec<String> = row.matrix.iter().map(u32::to_string).collect();
        println!("{} ({}): {}", row.model, row.id.as_deref().unwrap_or("-"), cells.join(" "));
    }
    Ok(())
}
