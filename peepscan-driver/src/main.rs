// SPDX-License-Identifier: Apache-2.0

//! Command line driver for basic-block equivalence mining.
//!
//! Build phase: parses every input `.bb` file, canonicalizes each block
//! (or chained-block unit), and builds the persistent equivalence index,
//! writing it and a human-readable corpus summary next to it. When the
//! index file already exists it is loaded instead of rebuilt.
//!
//! Query phase: one linear pass over the corpus composing the requested
//! reporting features: a match counter over an optional matcher and the
//! top-N equivalence classes with rendered representatives.
//!
//! ```text
//! peepscan-driver corpus/ --index-file corpus.idx --top 10 --reps 3
//! peepscan-driver corpus/ --index-file corpus.idx --matcher load-then-use
//! peepscan-driver corpus/ --index-file corpus.idx --subseq-file pat.json
//! ```

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;

use peepscan_ir::corpus::collect_bb_files_sorted;
use peepscan_ir::equiv_index::{EquivIndex, DEFAULT_REP_CAP};
use peepscan_ir::ir::PrintMode;
use peepscan_ir::matcher::{parse_descriptor_file, BlockMatcher};
use peepscan_ir::pattern_registry;
use peepscan_ir::report::{MatchCounter, Progress, ScanDriver, SystemClock, TopClasses};
use peepscan_ir::summary::build_index;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "peepscan-driver",
    about = "Mines a basic-block corpus for recurring structural patterns"
)]
struct Args {
    /// Input .bb files and/or directories to scan recursively.
    inputs: Vec<PathBuf>,

    /// File containing one input path per line.
    #[arg(long)]
    file_list: Option<PathBuf>,

    /// Index artifact path; loaded if present, otherwise built and saved.
    #[arg(long)]
    index_file: PathBuf,

    /// Minimum instruction count for a block to be counted.
    #[arg(long, default_value_t = 1)]
    min_size: usize,

    /// Number of top equivalence classes to report.
    #[arg(long, default_value_t = 10)]
    top: usize,

    /// Representative blocks rendered per reported class.
    #[arg(long, default_value_t = 3)]
    reps: usize,

    /// Representative locations retained per class at build time.
    #[arg(long, default_value_t = DEFAULT_REP_CAP)]
    rep_cap: usize,

    /// JSON file of subsequence matcher descriptors.
    #[arg(long)]
    subseq_file: Option<PathBuf>,

    /// Named whole-block matcher from the built-in registry.
    #[arg(long)]
    matcher: Option<String>,

    /// Representative rendering: asm, graph, or both.
    #[arg(long, default_value = "asm")]
    print_mode: String,

    /// Number of chained blocks coalesced into one indexed unit.
    #[arg(long, default_value_t = 1)]
    context_length: usize,

    /// Corpus summary output path; defaults to <index-file>.summary.
    #[arg(long)]
    summary_file: Option<PathBuf>,
}

/// Resolves the matcher options before any file is processed. Supplying
/// both is a usage error; unknown names and malformed descriptor files
/// abort here.
fn resolve_matcher(args: &Args) -> Result<Option<BlockMatcher>> {
    match (&args.subseq_file, &args.matcher) {
        (Some(_), Some(_)) => {
            bail!("--subseq-file and --matcher are mutually exclusive; supply at most one")
        }
        (Some(path), None) => {
            let matcher = parse_descriptor_file(path)
                .with_context(|| format!("loading subsequence matcher from {}", path.display()))?;
            Ok(Some(BlockMatcher::Subseq(matcher)))
        }
        (None, Some(name)) => {
            let pred = pattern_registry::lookup(name).ok_or_else(|| {
                anyhow!(
                    "unknown matcher {:?}; available: {}",
                    name,
                    pattern_registry::names().join(", ")
                )
            })?;
            Ok(Some(BlockMatcher::WholeBlock {
                name: name.clone(),
                pred,
            }))
        }
        (None, None) => Ok(None),
    }
}

/// Expands positional inputs and the optional file-of-filenames into the
/// ordered scan list.
fn gather_input_files(args: &Args) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = args.inputs.clone();
    if let Some(list_path) = &args.file_list {
        let file = std::fs::File::open(list_path)
            .with_context(|| format!("opening file list {}", list_path.display()))?;
        for line in std::io::BufReader::new(file).lines() {
            let line = line?;
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                paths.push(PathBuf::from(trimmed));
            }
        }
    }

    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(
                collect_bb_files_sorted(&path)
                    .with_context(|| format!("scanning directory {}", path.display()))?,
            );
        } else {
            files.push(path);
        }
    }
    Ok(files)
}

fn load_or_build_index(args: &Args, files: &[PathBuf]) -> Result<EquivIndex> {
    if args.index_file.exists() {
        log::info!("loading index from {}", args.index_file.display());
        let index = EquivIndex::load(&args.index_file)
            .with_context(|| format!("loading index {}", args.index_file.display()))?;
        if index.context_length() != args.context_length {
            bail!(
                "index {} was built with context length {} but {} was requested; rebuild the index",
                args.index_file.display(),
                index.context_length(),
                args.context_length
            );
        }
        log::info!(
            "loaded {} classes over {} symbolic blocks",
            index.class_count(),
            index.load_statistics().symbolic_blocks
        );
        return Ok(index);
    }

    if files.is_empty() {
        bail!("no input files and no existing index at {}", args.index_file.display());
    }
    log::info!("building index over {} files", files.len());
    let clock = SystemClock;
    let mut progress = Progress::new(&clock, PROGRESS_INTERVAL);
    let (index, summary) = build_index(files, args.rep_cap, args.context_length, &mut progress)?;

    // Persist only after the whole build pass succeeded.
    index
        .save(&args.index_file)
        .with_context(|| format!("saving index {}", args.index_file.display()))?;
    let summary_path = args.summary_file.clone().unwrap_or_else(|| {
        let mut p = args.index_file.clone().into_os_string();
        p.push(".summary");
        PathBuf::from(p)
    });
    summary
        .write_to(&summary_path)
        .with_context(|| format!("writing summary {}", summary_path.display()))?;
    log::info!(
        "indexed {} units into {} classes; summary at {}",
        summary.indexed_units,
        index.class_count(),
        summary_path.display()
    );
    Ok(index)
}

/// Restricts the query pass to files hinted by the representatives of the
/// reported classes. Only sound when no matcher and no size threshold are
/// in play and every reported class carries at least one hint; the block
/// count is then taken from the build-time statistics instead of the scan
/// (see `main`), so the restriction cannot change any printed answer.
/// Returns the scan list and whether the restriction engaged.
fn query_files(args: &Args, index: &EquivIndex, files: Vec<PathBuf>) -> (Vec<PathBuf>, bool) {
    if args.matcher.is_some() || args.subseq_file.is_some() || args.min_size > 1 || args.top == 0 {
        return (files, false);
    }
    match index.hinted_files(args.top) {
        Some(hinted) => {
            log::info!("scanning {} hinted files instead of {}", hinted.len(), files.len());
            (hinted.into_iter().map(PathBuf::from).collect(), true)
        }
        None => (files, false),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    // All usage errors surface before any corpus file is read.
    let print_mode: PrintMode = args
        .print_mode
        .parse()
        .map_err(|e: String| anyhow!(e))?;
    let matcher = resolve_matcher(&args)?;
    let files = gather_input_files(&args)?;

    let index = load_or_build_index(&args, &files)?;
    let (scan_files, hinted) = query_files(&args, &index, files);

    let mut driver = ScanDriver::new(args.context_length);
    if hinted {
        // The hinted scan skips files, so the corpus-wide unit count has
        // to come from the build-time statistics.
        driver.add_feature(Box::new(MatchCounter::from_recorded_total(
            index.load_statistics().symbolic_blocks,
        )));
    } else {
        driver.add_feature(Box::new(MatchCounter::new(args.min_size, matcher)));
    }
    if args.top > 0 {
        driver.add_feature(Box::new(TopClasses::new(
            &index,
            args.top,
            args.reps,
            print_mode,
        )));
    }

    let clock = SystemClock;
    let mut progress = Progress::new(&clock, PROGRESS_INTERVAL);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    driver
        .run(&scan_files, &index, &mut progress, &mut out)
        .context("query pass failed")?;
    Ok(())
}
