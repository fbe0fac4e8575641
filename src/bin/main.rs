use anyhow::{Context, Result};
use clap::Parser;
use dicom_scan_anonymizer::{run_batch, BatchOptions, RuleSet, RunSummary};
use env_logger::Builder;
use log::{Level, LevelFilter};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

/// De-identify a directory of DICOM scans and assign chronological scan IDs
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Root directory containing the DICOM files
    #[arg(short, long, value_name = "INPUT_DIR", env = "DCMSCANID_INPUT")]
    input: PathBuf,

    /// Output directory (default: '<INPUT_DIR>-Anonymized' next to the input directory)
    #[arg(short, long, value_name = "OUTPUT_DIR", env = "DCMSCANID_OUTPUT")]
    output: Option<PathBuf>,

    /// Rule set JSON file (default: the built-in standard rules, see `rulesdump`)
    #[arg(short, long, value_name = "RULES_FILE", env = "DCMSCANID_RULES")]
    rules: Option<PathBuf>,

    /// Path for the original metadata CSV
    #[arg(long, value_name = "CSV_FILE")]
    original_table: PathBuf,

    /// Path for the anonymized metadata CSV
    #[arg(long, value_name = "CSV_FILE")]
    anonymized_table: PathBuf,

    /// Only write the metadata tables, leave the DICOM files alone
    #[arg(short, long)]
    metadata_only: bool,

    /// Extension of the files to process ('*' for all files)
    #[arg(short, long, default_value = "dcm")]
    extension: String,

    /// Show more verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn load_rules(path: Option<&Path>) -> Result<RuleSet> {
    let Some(path) = path else {
        return Ok(RuleSet::standard());
    };
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    RuleSet::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to load rules from {}", path.display()))
}

fn print_summary(summary: &RunSummary, args: &Args) {
    println!("Files found:        {}", summary.discovered);
    println!("Files processed:    {}", summary.succeeded);
    println!("Files failed:       {}", summary.failed);
    println!("Subjects:           {}", summary.subjects);
    println!("Series:             {}", summary.series);
    if !summary.ungroupable.is_empty() {
        println!("Without scan ID:    {}", summary.ungroupable.len());
    }
    println!("Original metadata:  {}", args.original_table.display());
    println!("Anonymized metadata: {}", args.anonymized_table.display());
    match &summary.output_root {
        Some(output_root) => println!("Anonymized files:   {}", output_root.display()),
        None => println!("Mode:               metadata only, no DICOM files written"),
    }
    for failure in &summary.failures {
        println!(
            "  failed ({}): {}: {}",
            failure.stage,
            failure.path.display(),
            failure.cause
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    let mut builder = Builder::from_default_env();
    builder
        .format(|buf, record| {
            let level = match record.level() {
                Level::Error => "Error",
                Level::Warn => "Warning",
                Level::Info => "Info",
                Level::Debug => "Debug",
                Level::Trace => "Trace",
            };
            writeln!(buf, "{}: {}", level, record.args())
        })
        .filter(None, log_level);
    builder.init();

    let rules = load_rules(args.rules.as_deref())?;

    let extension = match args.extension.as_str() {
        "*" => None,
        ext => Some(ext),
    };
    let mut options = BatchOptions::new(&args.input)
        .metadata_only(args.metadata_only)
        .extension(extension)
        .tables(&args.original_table, &args.anonymized_table)
        .require_files(true);
    if let Some(output) = &args.output {
        options = options.output_root(output);
    }

    let output = run_batch(&options, &rules)?;
    print_summary(&output.summary, &args);

    Ok(())
}
