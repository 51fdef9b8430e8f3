//! BoardBOM CLI - board selection and bill-of-materials allocation from the command line.

use boardbom::scoring::DEFAULT_CATEGORIES;
use boardbom::{
    load_json, load_section, BoardCoverage, BomError, BomPipeline, BomReport, BomRow,
    CandidateGroup, ChannelField, ChannelMatrixProjector, ChannelMatrixRow, CoverageAnalyzer,
    CoverageRecord, DemandCoverageSelector, PipelineInput, PipelineOptions, PriceReconciler,
    QuantitySizer, ReconcileInput, ScoreGroup, ScoreMerge, ScoreMerger, SelectionRow,
    SelectionStrategy, SizedRow, ZeroBoardCountPolicy,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "boardbom")]
#[command(about = "Board selection and bill-of-materials allocation tool", long_about = None)]
#[command(version)]
struct Cli {
    /// Pipeline options file (JSON); flags override its values
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage and print the reconciled bill of materials
    Run {
        /// Pipeline input file (JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,

        /// Exit with error code if any demand has no board
        #[arg(long)]
        fail_on_unmatched: bool,

        #[command(flatten)]
        switches: Switches,
    },

    /// List the channel types each board does not satisfy
    Coverage {
        /// Coverage records (JSON list, or object with `coverage_records`)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// Pick the best board per requirement and size its quantity
    Size {
        /// Object with `requirements` and `candidates`
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,

        #[command(flatten)]
        switches: Switches,
    },

    /// Select boards so every demand is covered once
    Select {
        /// Candidate groups (JSON list, or object with `groups`)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,

        #[command(flatten)]
        switches: Switches,
    },

    /// Keep the cheaper of batch and per-demand allocations
    Reconcile {
        /// Object with `selection`, `per_demand` and `errors`
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// Project board catalog records onto the channel matrix
    Matrix {
        /// Object with `boards` and `coverage_records`
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// Merge per-category score lists into per-board totals
    MergeScores {
        /// Score groups (JSON list)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,

        /// Minimum total score for a good match (exclusive)
        #[arg(long)]
        threshold: Option<f64>,

        /// Category names by group position, comma separated
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
    },

    /// List the channel matrix columns in order
    Channels {
        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
}

/// Per-run overrides for the loaded pipeline options.
#[derive(Args, Clone, Default)]
struct Switches {
    /// Board ranking used by selection
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Divisor when a board's channel count is unknown
    #[arg(long, value_enum)]
    zero_board_count: Option<ZeroCountArg>,

    /// Do not read channel counts from board descriptions
    #[arg(long)]
    no_description_fallback: bool,

    /// Rank boards by raw row count instead of distinct demands
    #[arg(long)]
    raw_coverage_count: bool,

    /// Leave unmatched demands out of the selection
    #[arg(long)]
    no_unmatched: bool,

    /// Feed demand-tagged groups to selection as given, without normalizing
    #[arg(long)]
    no_normalize: bool,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output for scripting
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    CoverageFirst,
    CostPerDemand,
}

#[derive(Clone, Copy, ValueEnum)]
enum ZeroCountArg {
    UseRequirement,
    ConstantOne,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.config.as_deref();
    let exit_code = match cli.command {
        Commands::Run {
            file,
            format,
            fail_on_unmatched,
            switches,
        } => handle_run(&file, config, &switches, format, fail_on_unmatched),
        Commands::Coverage { file, format } => handle_coverage(&file, format),
        Commands::Size {
            file,
            format,
            switches,
        } => handle_size(&file, config, &switches, format),
        Commands::Select {
            file,
            format,
            switches,
        } => handle_select(&file, config, &switches, format),
        Commands::Reconcile { file, format } => handle_reconcile(&file, format),
        Commands::Matrix { file, format } => handle_matrix(&file, format),
        Commands::MergeScores {
            file,
            format,
            threshold,
            categories,
        } => handle_merge_scores(&file, config, threshold, categories, format),
        Commands::Channels { format } => handle_channels(format),
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn resolve_options(config: Option<&Path>, switches: &Switches) -> Result<PipelineOptions, BomError> {
    let mut options = match config {
        Some(path) => PipelineOptions::from_json_file(path)?,
        None => PipelineOptions::default(),
    };

    if let Some(strategy) = switches.strategy {
        options.selection_strategy = match strategy {
            StrategyArg::CoverageFirst => SelectionStrategy::CoverageFirst,
            StrategyArg::CostPerDemand => SelectionStrategy::CostPerDemand,
        };
    }
    if let Some(policy) = switches.zero_board_count {
        options.zero_board_count_policy = match policy {
            ZeroCountArg::UseRequirement => ZeroBoardCountPolicy::UseRequirement,
            ZeroCountArg::ConstantOne => ZeroBoardCountPolicy::ConstantOne,
        };
    }
    if switches.no_description_fallback {
        options.enable_description_fallback = false;
    }
    if switches.raw_coverage_count {
        options.dedupe_coverage_count = false;
    }
    if switches.no_unmatched {
        options.emit_unmatched = false;
    }
    if switches.no_normalize {
        options.normalize_groups = false;
    }

    options.validate()?;
    tracing::debug!("Pipeline options: {:?}", options);
    Ok(options)
}

fn fail(e: BomError) -> i32 {
    eprintln!("Error: {}", e);
    1
}

fn print_json(rendered: Result<String, serde_json::Error>) -> i32 {
    match rendered {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => fail(BomError::Json(e)),
    }
}

fn handle_run(
    file: &Path,
    config: Option<&Path>,
    switches: &Switches,
    format: OutputFormat,
    fail_on_unmatched: bool,
) -> i32 {
    let options = match resolve_options(config, switches) {
        Ok(options) => options,
        Err(e) => return fail(e),
    };

    let report = match BomPipeline::new(options).run_file(file) {
        Ok(report) => report,
        Err(e) => return fail(e),
    };

    let code = match format {
        OutputFormat::Human => {
            output_report_human(&report);
            0
        }
        OutputFormat::Json => print_json(serde_json::to_string_pretty(&report)),
    };
    if code != 0 {
        return code;
    }

    if fail_on_unmatched && report.has_unmatched() {
        eprintln!(
            "Error: {} demand(s) have no matching board",
            report.summary.unmatched
        );
        return 1;
    }
    0
}

fn handle_coverage(file: &Path, format: OutputFormat) -> i32 {
    let records: Vec<CoverageRecord> = match load_section(file, "coverage_records") {
        Ok(records) => records,
        Err(e) => return fail(e),
    };

    let coverage = CoverageAnalyzer::new().analyze(&records);
    match format {
        OutputFormat::Human => {
            output_coverage_human(&coverage);
            0
        }
        OutputFormat::Json => print_json(serde_json::to_string_pretty(&coverage)),
    }
}

fn handle_size(file: &Path, config: Option<&Path>, switches: &Switches, format: OutputFormat) -> i32 {
    let options = match resolve_options(config, switches) {
        Ok(options) => options,
        Err(e) => return fail(e),
    };
    let input: PipelineInput = match load_json(file) {
        Ok(input) => input,
        Err(e) => return fail(e),
    };
    let (Some(requirements), Some(candidates)) = (&input.requirements, &input.candidates) else {
        let missing = if input.requirements.is_none() {
            "requirements"
        } else {
            "candidates"
        };
        return fail(BomError::MissingInput(missing));
    };

    let sized = QuantitySizer::new(options.sizing()).size_all(requirements, candidates);
    match format {
        OutputFormat::Human => {
            output_sized_human(&sized);
            0
        }
        OutputFormat::Json => print_json(serde_json::to_string_pretty(&sized)),
    }
}

fn handle_select(file: &Path, config: Option<&Path>, switches: &Switches, format: OutputFormat) -> i32 {
    let options = match resolve_options(config, switches) {
        Ok(options) => options,
        Err(e) => return fail(e),
    };
    let groups: Vec<CandidateGroup> = match load_section(file, "groups") {
        Ok(groups) => groups,
        Err(e) => return fail(e),
    };

    let groups = BomPipeline::new(options.clone()).prepare_groups(&groups);
    let rows = DemandCoverageSelector::new(options.selection()).select(&groups);
    match format {
        OutputFormat::Human => {
            output_selection_human(&rows);
            0
        }
        OutputFormat::Json => print_json(serde_json::to_string_pretty(&rows)),
    }
}

fn handle_reconcile(file: &Path, format: OutputFormat) -> i32 {
    let input: ReconcileInput = match load_json(file) {
        Ok(input) => input,
        Err(e) => return fail(e),
    };

    let bom = PriceReconciler::new().reconcile_input(&input);
    match format {
        OutputFormat::Human => {
            output_bom_human(&bom);
            0
        }
        OutputFormat::Json => print_json(serde_json::to_string_pretty(&bom)),
    }
}

fn handle_matrix(file: &Path, format: OutputFormat) -> i32 {
    let input: PipelineInput = match load_json(file) {
        Ok(input) => input,
        Err(e) => return fail(e),
    };

    let coverage = CoverageAnalyzer::new().analyze(input.coverage_records.as_deref().unwrap_or(&[]));
    let matrix = ChannelMatrixProjector::new().project(&input.boards, &coverage);
    match format {
        OutputFormat::Human => {
            output_matrix_human(&matrix);
            0
        }
        OutputFormat::Json => print_json(serde_json::to_string_pretty(&matrix)),
    }
}

fn handle_merge_scores(
    file: &Path,
    config: Option<&Path>,
    threshold: Option<f64>,
    categories: Vec<String>,
    format: OutputFormat,
) -> i32 {
    let options = match resolve_options(config, &Switches::default()) {
        Ok(options) => options,
        Err(e) => return fail(e),
    };
    let groups: Vec<ScoreGroup> = match load_json(file) {
        Ok(groups) => groups,
        Err(e) => return fail(e),
    };

    let threshold = threshold.unwrap_or(options.good_match_threshold);
    if !threshold.is_finite() {
        return fail(BomError::Config("threshold must be a finite number".to_string()));
    }
    let mut merger = ScoreMerger::new(threshold);
    if !categories.is_empty() {
        merger = merger.with_categories(categories);
    }

    let merge = merger.merge(&groups);
    match format {
        OutputFormat::Human => {
            output_scores_human(&merge, threshold);
            0
        }
        OutputFormat::Json => print_json(serde_json::to_string_pretty(&merge)),
    }
}

fn handle_channels(format: OutputFormat) -> i32 {
    match format {
        OutputFormat::Human => {
            println!("Channel matrix columns:\n");
            for field in ChannelField::ALL {
                println!("  {:>2}  {:<26} {}", field.index(), field.key(), field.label());
            }
            println!("\nDefault score categories: {}", DEFAULT_CATEGORIES.join(", "));
            0
        }
        OutputFormat::Json => {
            let columns: Vec<serde_json::Value> = ChannelField::ALL
                .iter()
                .map(|field| {
                    serde_json::json!({
                        "index": field.index(),
                        "key": field.key(),
                        "label": field.label(),
                    })
                })
                .collect();
            print_json(serde_json::to_string_pretty(&columns))
        }
    }
}

fn output_report_human(report: &BomReport) {
    println!("\nRun: {} ({})", report.run_id, report.generated_at.to_rfc3339());
    println!("{}", "─".repeat(60));
    output_bom_human(&report.bom);

    println!("\n  Summary:");
    println!("    Board lines: {}", report.summary.board_lines);
    println!("    Unmatched:   {}", report.summary.unmatched);
    println!("    Errors:      {}", report.summary.errors);
    println!("    Total:       {:.2} CNY", report.summary.total_amount_cny);
}

fn output_bom_human(bom: &[BomRow]) {
    if bom.is_empty() {
        println!("  No BOM rows");
        return;
    }
    for row in bom {
        match row {
            BomRow::Batch(board) => {
                println!(
                    "  {} x{}  {:.2} CNY",
                    board.id, board.quantity, board.total_amount_cny
                );
                for demand in board.covered_demands() {
                    println!("    - {}", demand);
                }
            }
            BomRow::Single(line) => println!(
                "  {} x{}  {:.2} CNY  <- {}",
                line.id.as_deref().unwrap_or("?"),
                line.quantity,
                line.total_amount_cny,
                line.original
            ),
            BomRow::Unmatched(u) => println!("  UNMATCHED: {} ({})", u.original, u.reason),
            BomRow::Error(e) => println!("  ERROR: {} ({})", e.original, e.reason),
        }
    }
}

fn output_coverage_human(coverage: &[BoardCoverage]) {
    if coverage.is_empty() {
        println!("  No boards found");
        return;
    }
    for entry in coverage {
        if entry.satisfies_all() {
            println!("  {}: satisfies all channel types", entry.id);
        } else {
            println!("  {}: missing {}", entry.id, entry.not_satisfied.join(", "));
        }
    }
}

fn output_sized_human(rows: &[SizedRow]) {
    for row in rows {
        match row {
            SizedRow::Board(board) => println!(
                "  {} -> {} x{}  {:.2} CNY",
                board.original,
                board.id.as_deref().unwrap_or("?"),
                board.quantity,
                board.total_amount_cny()
            ),
            SizedRow::Placeholder(p) => println!("  {} -> {}", p.original, p.description),
        }
    }
}

fn output_selection_human(rows: &[SelectionRow]) {
    for row in rows {
        match row {
            SelectionRow::Board(board) => {
                println!(
                    "  {} x{}  {:.2} CNY  (covers {})",
                    board.id, board.quantity, board.total_amount_cny, board.coverage_count
                );
                for demand in board.covered_demands() {
                    println!("    - {}", demand);
                }
            }
            SelectionRow::Unmatched(u) => println!("  UNMATCHED: {} ({})", u.original, u.reason),
        }
    }
}

fn output_matrix_human(matrix: &[ChannelMatrixRow]) {
    for row in matrix {
        println!(
            "\n  {} ({})  {:.2} CNY",
            row.model,
            row.id.as_deref().unwrap_or("-"),
            row.price_cny
        );
        for field in ChannelField::ALL {
            let count = row.get(field);
            if count > 0 {
                println!("    {:<20} {}", field.label(), count);
            }
        }
    }
}

fn output_scores_human(merge: &ScoreMerge, threshold: f64) {
    for board in &merge.merged {
        println!("  {}: {:.2}", board.id, board.total_score);
        for detail in &board.details {
            println!("    [{}] {:.2} {}", detail.category, detail.score, detail.reason);
        }
    }
    println!("\n  Good matches (> {}):", threshold);
    if merge.good_match.is_empty() {
        println!("    none");
    }
    for board in &merge.good_match {
        println!("    {} ({:.2})", board.id, board.total_score);
    }
}
