//! Simple BOM example: run the full pipeline on an input file and print the BOM.

use boardbom::prelude::*;
use std::path::Path;

fn main() -> Result<(), BomError> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tests/fixtures/pipeline_input.json".to_string());
    let path = Path::new(&path);

    if !path.exists() {
        eprintln!("File not found: {}", path.display());
        eprintln!("Usage: cargo run --example simple_bom [path/to/input.json]");
        std::process::exit(1);
    }

    let report = BomPipeline::new(PipelineOptions::default()).run_file(path)?;

    println!("Bill of materials ({})", report.run_id);
    for row in &report.bom {
        match row {
            BomRow::Batch(board) => println!(
                "  {} x{}  {:.2} CNY  ({} demands)",
                board.id,
                board.quantity,
                board.total_amount_cny,
                board.details.len()
            ),
            BomRow::Single(line) => println!(
                "  {} x{}  {:.2} CNY  <- {}",
                line.id.as_deref().unwrap_or("?"),
                line.quantity,
                line.total_amount_cny,
                line.original
            ),
            BomRow::Unmatched(u) => println!("  UNMATCHED {}: {}", u.original, u.reason),
            BomRow::Error(e) => println!("  ERROR {}: {}", e.original, e.reason),
        }
    }
    println!("Total: {:.2} CNY", report.summary.total_amount_cny);

    if report.has_unmatched() {
        println!("\n{} demand(s) have no board.", report.summary.unmatched);
        std::process::exit(1);
    }
    Ok(())
}
