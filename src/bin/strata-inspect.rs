//! Binary entry point for inspecting a stored document.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use strata::document::{Document, DocumentOptions, VerifyLevel, VerifyReport};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "strata-inspect",
    version,
    about = "Read-only inspector for Strata documents",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "STRATA_CONFIG",
        help = "TOML file with document options"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override the page cache size (pages)")]
    cache_pages: Option<usize>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show document size, ID counter and page usage.
    Info {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    /// Check structural invariants.
    Verify {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, value_enum, default_value_t = VerifyLevelArg::Full)]
        level: VerifyLevelArg,
    },
    /// Print records in PRE order.
    Dump {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, default_value_t = 0, help = "First PRE to print")]
        from: u64,
        #[arg(long, default_value_t = 64, help = "Maximum records to print")]
        limit: u64,
    },
    /// Print the ID runs in PRE order.
    Runs {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

impl From<VerifyLevelArg> for VerifyLevel {
    fn from(level: VerifyLevelArg) -> Self {
        match level {
            VerifyLevelArg::Fast => VerifyLevel::Fast,
            VerifyLevelArg::Full => VerifyLevel::Full,
        }
    }
}

#[derive(Serialize)]
struct InfoReport {
    path: String,
    size: u64,
    last_id: u64,
    page_size: u32,
    records_per_page: u64,
    pages: usize,
    blocks: u64,
    free_blocks: usize,
    id_runs: usize,
}

#[derive(Serialize)]
struct DumpRow {
    pre: u64,
    kind: &'static str,
    id: u64,
    dist: u32,
    size: u32,
    attr_size: u16,
    name_ref: u32,
    content_ref: u64,
}

#[derive(Serialize)]
struct RunRow {
    pre: u64,
    first_id: u64,
    len: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut options = match &cli.config {
        Some(path) => DocumentOptions::load(path)?,
        None => DocumentOptions::default(),
    };
    if let Some(cache_pages) = cli.cache_pages {
        options = options.cache_pages(cache_pages);
    }

    match cli.command {
        Command::Info { dir } => {
            let doc = Document::open(&dir, options)?;
            let table = doc.table();
            let report = InfoReport {
                path: dir.display().to_string(),
                size: doc.size(),
                last_id: doc.last_id().0,
                page_size: table.layout().page_size(),
                records_per_page: table.layout().records_per_page(),
                pages: table.page_count(),
                blocks: table.directory().block_count(),
                free_blocks: table.directory().free_count(),
                id_runs: doc.ids().run_count(),
            };
            emit(cli.format, &report, || print_info_text(&report))?;
        }
        Command::Verify { dir, level } => {
            let doc = Document::open(&dir, options)?;
            let report = doc.verify(level.into())?;
            emit(cli.format, &report, || print_verify_text(&report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Dump { dir, from, limit } => {
            let doc = Document::open(&dir, options)?;
            let end = from.saturating_add(limit).min(doc.size());
            let mut rows = Vec::new();
            for pre in from..end {
                let rec = doc.record(pre)?;
                rows.push(DumpRow {
                    pre,
                    kind: rec.kind.as_str(),
                    id: rec.id.0,
                    dist: rec.dist,
                    size: rec.size,
                    attr_size: rec.attr_size,
                    name_ref: rec.name_ref,
                    content_ref: rec.content_ref,
                });
            }
            emit(cli.format, &rows, || print_dump_text(&rows))?;
        }
        Command::Runs { dir } => {
            let doc = Document::open(&dir, options)?;
            let mut pre = 0;
            let mut rows = Vec::new();
            for run in doc.ids().runs() {
                rows.push(RunRow {
                    pre,
                    first_id: run.first_id.0,
                    len: run.len,
                });
                pre += run.len;
            }
            emit(cli.format, &rows, || print_runs_text(&rows))?;
        }
    }
    Ok(())
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_info_text(report: &InfoReport) {
    println!("Document {}", report.path);
    println!("  size={} last_id={}", report.size, report.last_id);
    println!(
        "  page_size={} records_per_page={} pages={} blocks={} free_blocks={}",
        report.page_size, report.records_per_page, report.pages, report.blocks, report.free_blocks
    );
    println!("  id_runs={}", report.id_runs);
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "Verify ({:?}) => success={} nodes={} elements={} attributes={} texts={} pages={} id_runs={}",
        report.level,
        report.success,
        report.counts.nodes,
        report.counts.elements,
        report.counts.attributes,
        report.counts.texts,
        report.counts.pages,
        report.counts.id_runs,
    );
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}

fn print_dump_text(rows: &[DumpRow]) {
    println!(
        "{:>8} {:<9} {:>8} {:>6} {:>8} {:>5} {:>8} {:>12}",
        "pre", "kind", "id", "dist", "size", "attrs", "name", "content"
    );
    for row in rows {
        println!(
            "{:>8} {:<9} {:>8} {:>6} {:>8} {:>5} {:>8} {:>12}",
            row.pre,
            row.kind,
            row.id,
            row.dist,
            row.size,
            row.attr_size,
            row.name_ref,
            row.content_ref
        );
    }
}

fn print_runs_text(rows: &[RunRow]) {
    for row in rows {
        println!(
            "pre {}..{} -> ids {}..{}",
            row.pre,
            row.pre + row.len,
            row.first_id,
            row.first_id + row.len
        );
    }
}
