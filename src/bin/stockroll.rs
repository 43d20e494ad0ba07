//! stockroll CLI
//!
//! Reads a JSON bundle (run configuration, raw snapshot and delta rows,
//! optional item scope and parent map), reconstructs every location, and
//! writes the live-day and checkpoint records plus a run summary as JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stockroll::{
    ingest_rows, InMemoryInventorySource, InMemoryRecordSink, ItemScope, RawDeltaRow,
    RawSnapshotRow, ReconstructionEngine, ReconstructionRuntime, RecordSink, RunConfig,
    RunContext, StaticCatalog,
};

/// CLI options
struct Options {
    /// Input bundle
    input: PathBuf,
    /// Output file; stdout when absent
    output: Option<PathBuf>,
    /// Overrides `config.workers`
    workers: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ScopeSpec {
    Only(Vec<String>),
    Pattern(String),
}

#[derive(Debug, Deserialize)]
struct Bundle {
    config: RunConfig,
    #[serde(default)]
    snapshots: Vec<RawSnapshotRow>,
    #[serde(default)]
    deltas: Vec<RawDeltaRow>,
    #[serde(default)]
    scope: Option<ScopeSpec>,
    /// child item -> parent item
    #[serde(default)]
    parents: BTreeMap<String, String>,
}

fn usage() {
    println!("stockroll - historical inventory reconstruction");
    println!();
    println!("USAGE:");
    println!("    stockroll --input <FILE> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -i, --input <FILE>        JSON bundle with config and rows");
    println!("    -o, --output <FILE>       Write records here [default: stdout]");
    println!("    -w, --workers <N>         Override the configured worker count");
    println!("    -h, --help                Print help information");
    println!();
    println!("Logging is controlled with RUST_LOG (default: info).");
}

fn fail(message: &str) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut input = None;
    let mut output = None;
    let mut workers = None;

    let mut i = 1;
    while i < args.len() {
        let value = || {
            args.get(i + 1)
                .cloned()
                .unwrap_or_else(|| fail(&format!("{} requires a value", args[i])))
        };
        match args[i].as_str() {
            "--input" | "-i" => {
                input = Some(PathBuf::from(value()));
                i += 2;
            }
            "--output" | "-o" => {
                output = Some(PathBuf::from(value()));
                i += 2;
            }
            "--workers" | "-w" => {
                let raw = value();
                let n: usize = raw
                    .parse()
                    .unwrap_or_else(|_| fail(&format!("invalid worker count: {raw}")));
                workers = Some(n);
                i += 2;
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other => fail(&format!("unknown argument: {other}")),
        }
    }

    let Some(input) = input else {
        usage();
        std::process::exit(1);
    };
    Options {
        input,
        output,
        workers,
    }
}

fn run(options: &Options) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let raw = fs::read_to_string(&options.input)?;
    let bundle: Bundle = serde_json::from_str(&raw)?;

    let mut config = bundle.config;
    if let Some(workers) = options.workers {
        config.workers = workers;
    }
    config.validate()?;

    let source = InMemoryInventorySource::new();
    let ingest = ingest_rows(
        &source,
        &bundle.snapshots,
        &bundle.deltas,
        Some(config.horizon_end),
    );

    let scope = match bundle.scope {
        None => ItemScope::All,
        Some(ScopeSpec::Only(items)) => ItemScope::only(items),
        Some(ScopeSpec::Pattern(pattern)) => ItemScope::matching(&pattern)?,
    };
    let catalog = StaticCatalog::new()
        .with_scope(scope)
        .with_parents(bundle.parents);

    let sink = Arc::new(InMemoryRecordSink::new());
    config.collect_results = false;
    let ctx = RunContext::new(
        config,
        Arc::new(source),
        Arc::new(catalog),
        Arc::clone(&sink) as Arc<dyn RecordSink>,
    )?;
    let report = ReconstructionRuntime::new(ReconstructionEngine::new(ctx)).run()?;

    let diagnostics = &report.diagnostics;
    let missing_anchors: Vec<String> = diagnostics
        .missing_anchors
        .iter()
        .map(ToString::to_string)
        .collect();

    Ok(json!({
        "run_id": report.run_id,
        "live_days": sink.live_days()?,
        "checkpoints": sink.checkpoints()?,
        "summary": {
            "started_at": report.started_at,
            "finished_at": report.finished_at,
            "completed": report.completed,
            "failed": report.failed,
            "cancelled": report.cancelled,
            "windows": report.stats.windows,
            "items_simulated": report.stats.window.items,
            "days_simulated": report.stats.window.days_simulated,
            "days_skipped": report.stats.window.days_skipped,
            "ingest": ingest,
            "missing_anchors": missing_anchors,
            "orphan_deltas": diagnostics.orphan_deltas,
            "negative_stock": diagnostics.negative_stock,
        },
    }))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = parse_args();
    let output = run(&options).unwrap_or_else(|err| fail(&err.to_string()));
    let rendered = serde_json::to_string_pretty(&output).unwrap_or_else(|err| fail(&err.to_string()));

    match &options.output {
        Some(path) => {
            fs::write(path, rendered).unwrap_or_else(|err| fail(&err.to_string()));
            info!(path = %path.display(), "records written");
        }
        None => println!("{rendered}"),
    }
}
