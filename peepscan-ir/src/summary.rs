// SPDX-License-Identifier: Apache-2.0

//! The index build pass and the human-readable corpus summary written
//! alongside the persisted index.

use std::path::{Path, PathBuf};

use crate::block_parser::{chained_blocks, parse_path_to_corpus, ParseError};
use crate::equiv_index::EquivIndex;
use crate::report::Progress;

/// Build-pass cadence for the transient-state release notice. Parsed
/// per-file state is freed as each file goes out of scope; the cadence
/// only controls how often that is surfaced in the log.
pub const COMPACT_EVERY_FILES: u64 = 64;

/// Totals, means and maxima over the processed corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorpusSummary {
    pub files: u64,
    pub functions: u64,
    pub blocks: u64,
    pub instructions: u64,
    pub indexed_units: u64,
    pub max_blocks_per_function: u64,
    pub max_instructions_per_block: u64,
}

impl CorpusSummary {
    fn mean(total: u64, denom: u64) -> f64 {
        if denom == 0 {
            0.0
        } else {
            total as f64 / denom as f64
        }
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_string())
    }
}

impl std::fmt::Display for CorpusSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "files:        {}", self.files)?;
        writeln!(f, "functions:    {}", self.functions)?;
        writeln!(f, "blocks:       {}", self.blocks)?;
        writeln!(f, "instructions: {}", self.instructions)?;
        writeln!(f, "indexed units: {}", self.indexed_units)?;
        writeln!(
            f,
            "mean functions/file:    {:.2}",
            Self::mean(self.functions, self.files)
        )?;
        writeln!(
            f,
            "mean blocks/function:   {:.2}",
            Self::mean(self.blocks, self.functions)
        )?;
        writeln!(
            f,
            "mean instructions/block: {:.2}",
            Self::mean(self.instructions, self.blocks)
        )?;
        writeln!(
            f,
            "max blocks/function:    {}",
            self.max_blocks_per_function
        )?;
        writeln!(
            f,
            "max instructions/block: {}",
            self.max_instructions_per_block
        )
    }
}

/// Builds an index over `files` in one sequential pass.
///
/// Parse and I/O errors propagate unchanged and abort the pass; callers
/// persist the index only after this returns successfully, so a
/// half-built index is never committed.
pub fn build_index(
    files: &[PathBuf],
    rep_cap: usize,
    context_length: usize,
    progress: &mut Progress,
) -> Result<(EquivIndex, CorpusSummary), ParseError> {
    let mut index = EquivIndex::empty(rep_cap, context_length);
    let mut summary = CorpusSummary::default();

    for path in files {
        let corpus = parse_path_to_corpus(path)?;
        summary.files += 1;
        let mut file_units = 0u64;
        for function in corpus.functions.iter() {
            summary.functions += 1;
            summary.blocks += function.blocks.len() as u64;
            summary.max_blocks_per_function = summary
                .max_blocks_per_function
                .max(function.blocks.len() as u64);
            for b in function.blocks.iter() {
                summary.instructions += b.instructions.len() as u64;
                summary.max_instructions_per_block = summary
                    .max_instructions_per_block
                    .max(b.instructions.len() as u64);
            }
            for unit in chained_blocks(function, context_length) {
                index.update(&unit);
                file_units += 1;
            }
        }
        summary.indexed_units += file_units;
        progress.note_file(file_units);
        // `corpus` is dropped here, bounding peak memory to one parsed
        // file plus the resident index.
        if summary.files % COMPACT_EVERY_FILES == 0 {
            log::debug!("released transient state after {} files", summary.files);
        }
    }
    Ok((index, summary))
}
