// SPDX-License-Identifier: Apache-2.0

//! Reporting driver: composes matchers and index queries into a single
//! linear pass over the corpus. Features chain their per-block callbacks
//! and end-of-pass callbacks; any feature may signal cooperative early
//! exit via [`ScanOutcome::Stop`].

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::block_parser::{chained_blocks, parse_path_to_corpus, ParseError};
use crate::canonical::{annotate, AnnotatedInst};
use crate::equiv_index::EquivIndex;
use crate::ir::{render_block, Block, PrintMode};
use crate::matcher::BlockMatcher;

/// Tagged per-callback result inspected by the driving loop after each
/// block. Early exit is normal control flow, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Continue,
    Stop,
}

/// One reporting feature. `on_block` runs once per scanned block;
/// `finish` runs exactly once per feature after the scan, whether or not
/// the scan stopped early.
pub trait ReportFeature {
    fn on_block(
        &mut self,
        block: &Block,
        annotated: &[AnnotatedInst],
        index: &EquivIndex,
    ) -> ScanOutcome;

    fn finish(&mut self, out: &mut dyn io::Write) -> io::Result<()>;
}

/// Injectable time source so progress throttling is testable.
pub trait Clock {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Emits a progress line via `log::info!` at most once per interval.
/// Never alters control flow.
pub struct Progress<'a> {
    clock: &'a dyn Clock,
    interval: Duration,
    last_emit: Instant,
    pub files: u64,
    pub blocks: u64,
}

impl<'a> Progress<'a> {
    pub fn new(clock: &'a dyn Clock, interval: Duration) -> Self {
        let now = clock.now();
        Progress {
            clock,
            interval,
            last_emit: now,
            files: 0,
            blocks: 0,
        }
    }

    pub fn note_file(&mut self, blocks: u64) {
        self.files += 1;
        self.blocks += blocks;
        let now = self.clock.now();
        if now.duration_since(self.last_emit) >= self.interval {
            log::info!("processed {} files / {} blocks", self.files, self.blocks);
            self.last_emit = now;
        }
    }
}

#[derive(Debug)]
pub enum ScanError {
    Parse(ParseError),
    Io(io::Error),
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::Parse(e) => write!(f, "{}", e),
            ScanError::Io(e) => write!(f, "report output failed: {}", e),
        }
    }
}

impl std::error::Error for ScanError {}

impl From<ParseError> for ScanError {
    fn from(e: ParseError) -> Self {
        ScanError::Parse(e)
    }
}

impl From<io::Error> for ScanError {
    fn from(e: io::Error) -> Self {
        ScanError::Io(e)
    }
}

/// Runs the query-phase pass: parses each file, expands context chains,
/// annotates each unit, and hands it to every feature in registration
/// order. Stops scanning when any feature returns `Stop`, then invokes
/// every feature's `finish` exactly once.
pub struct ScanDriver {
    context_length: usize,
    features: Vec<Box<dyn ReportFeature>>,
}

impl ScanDriver {
    pub fn new(context_length: usize) -> Self {
        ScanDriver {
            context_length,
            features: Vec::new(),
        }
    }

    pub fn add_feature(&mut self, feature: Box<dyn ReportFeature>) {
        self.features.push(feature);
    }

    pub fn run(
        &mut self,
        files: &[PathBuf],
        index: &EquivIndex,
        progress: &mut Progress,
        out: &mut dyn io::Write,
    ) -> Result<(), ScanError> {
        let mut stopped = false;
        'files: for path in files {
            let corpus = parse_path_to_corpus(path)?;
            let mut file_blocks = 0u64;
            for function in corpus.functions.iter() {
                for unit in chained_blocks(function, self.context_length) {
                    file_blocks += 1;
                    let annotated = annotate(&unit);
                    // Every feature sees the block before a stop takes
                    // effect.
                    for feature in self.features.iter_mut() {
                        if feature.on_block(&unit, &annotated, index) == ScanOutcome::Stop {
                            stopped = true;
                        }
                    }
                    if stopped {
                        progress.note_file(file_blocks);
                        break 'files;
                    }
                }
            }
            progress.note_file(file_blocks);
        }
        if stopped {
            log::info!("scan stopped early after {} files", progress.files);
        }
        for feature in self.features.iter_mut() {
            feature.finish(out)?;
        }
        Ok(())
    }
}

/// Counts blocks at or above a minimum instruction count that satisfy an
/// optional matcher; optionally stops the scan after a target number of
/// matches.
pub struct MatchCounter {
    min_size: usize,
    matcher: Option<BlockMatcher>,
    stop_after: Option<u64>,
    frozen: bool,
    pub count: u64,
}

impl MatchCounter {
    pub fn new(min_size: usize, matcher: Option<BlockMatcher>) -> Self {
        MatchCounter {
            min_size,
            matcher,
            stop_after: None,
            frozen: false,
            count: 0,
        }
    }

    pub fn with_stop_after(mut self, stop_after: u64) -> Self {
        self.stop_after = Some(stop_after);
        self
    }

    /// A counter whose total is already known from build-time statistics.
    /// Scanned blocks do not add to it, so it stays corpus-scoped even
    /// when the scan covers only a subset of the corpus files.
    pub fn from_recorded_total(total: u64) -> Self {
        MatchCounter {
            min_size: 1,
            matcher: None,
            stop_after: None,
            frozen: true,
            count: total,
        }
    }
}

impl ReportFeature for MatchCounter {
    fn on_block(
        &mut self,
        block: &Block,
        annotated: &[AnnotatedInst],
        _index: &EquivIndex,
    ) -> ScanOutcome {
        if self.frozen || block.instructions.len() < self.min_size {
            return ScanOutcome::Continue;
        }
        let matched = match &self.matcher {
            Some(m) => m.matches(annotated),
            None => true,
        };
        if matched {
            self.count += 1;
            if let Some(limit) = self.stop_after {
                if self.count >= limit {
                    return ScanOutcome::Stop;
                }
            }
        }
        ScanOutcome::Continue
    }

    fn finish(&mut self, out: &mut dyn io::Write) -> io::Result<()> {
        match &self.matcher {
            Some(m) => writeln!(
                out,
                "{} blocks of >= {} instructions matched {}",
                self.count,
                self.min_size,
                m.describe()
            ),
            None => writeln!(
                out,
                "{} blocks of >= {} instructions",
                self.count, self.min_size
            ),
        }
    }
}

/// Ranks equivalence classes by descending frequency and gathers up to a
/// configured number of representative blocks per class from the scan,
/// rendered per the print mode. Stops the scan once every reported class
/// has gathered all the representatives it can.
pub struct TopClasses {
    /// `(id, frequency, wanted)` ranked rows; `wanted` caps gathering.
    ranked: Vec<(u32, u64, usize)>,
    gathered: HashMap<u32, Vec<String>>,
    print_mode: PrintMode,
}

impl TopClasses {
    pub fn new(index: &EquivIndex, top_n: usize, reps_per_class: usize, print_mode: PrintMode) -> Self {
        let ranked = index
            .top_classes(top_n)
            .into_iter()
            .map(|c| {
                let wanted = std::cmp::min(reps_per_class as u64, c.frequency) as usize;
                (c.id, c.frequency, wanted)
            })
            .collect();
        TopClasses {
            ranked,
            gathered: HashMap::new(),
            print_mode,
        }
    }

    fn fully_gathered(&self) -> bool {
        self.ranked
            .iter()
            .all(|&(id, _, wanted)| self.gathered.get(&id).map_or(0, |v| v.len()) >= wanted)
    }
}

impl ReportFeature for TopClasses {
    fn on_block(
        &mut self,
        block: &Block,
        _annotated: &[AnnotatedInst],
        index: &EquivIndex,
    ) -> ScanOutcome {
        let Ok(id) = index.equivalence(block) else {
            // Shapes outside the index (e.g. context-length mismatch) are
            // simply not reportable.
            return ScanOutcome::Continue;
        };
        if let Some(&(_, _, wanted)) = self.ranked.iter().find(|&&(rid, _, _)| rid == id) {
            let renders = self.gathered.entry(id).or_default();
            if renders.len() < wanted {
                renders.push(render_block(block, self.print_mode));
            }
        }
        if self.fully_gathered() {
            ScanOutcome::Stop
        } else {
            ScanOutcome::Continue
        }
    }

    fn finish(&mut self, out: &mut dyn io::Write) -> io::Result<()> {
        for (rank, &(id, frequency, _)) in self.ranked.iter().enumerate() {
            writeln!(
                out,
                "#{} class {} frequency {}",
                rank + 1,
                id,
                frequency
            )?;
            if let Some(renders) = self.gathered.get(&id) {
                for render in renders.iter() {
                    out.write_all(render.as_bytes())?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equiv_index::DEFAULT_REP_CAP;
    use crate::test_utils::{block, inst};
    use std::cell::Cell;

    struct ManualClock {
        now: Cell<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            ManualClock {
                now: Cell::new(Instant::now()),
            }
        }

        fn advance(&self, d: Duration) {
            self.now.set(self.now.get() + d);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.now.get()
        }
    }

    fn ret_block(index: usize) -> Block {
        block("t.bb", "f", index, vec![inst("ret", &[], &[])])
    }

    #[test]
    fn progress_throttles_on_injected_clock() {
        let clock = ManualClock::new();
        let mut progress = Progress::new(&clock, Duration::from_secs(10));
        progress.note_file(1);
        assert_eq!(progress.files, 1);
        clock.advance(Duration::from_secs(11));
        progress.note_file(2);
        assert_eq!(progress.blocks, 3);
    }

    #[test]
    fn match_counter_respects_min_size() {
        let mut index = EquivIndex::empty(DEFAULT_REP_CAP, 1);
        let small = ret_block(0);
        let big = block(
            "t.bb",
            "f",
            1,
            vec![
                inst("const", &[], &[1]),
                inst("mov", &[1], &[2]),
                inst("ret", &[2], &[]),
            ],
        );
        index.update(&small);
        index.update(&big);

        let mut counter = MatchCounter::new(2, None);
        for b in [&small, &big] {
            let annotated = annotate(b);
            counter.on_block(b, &annotated, &index);
        }
        assert_eq!(counter.count, 1);
    }

    #[test]
    fn recorded_total_counter_ignores_scanned_blocks() {
        let index = EquivIndex::empty(DEFAULT_REP_CAP, 1);
        let mut counter = MatchCounter::from_recorded_total(3);
        let b = ret_block(0);
        let annotated = annotate(&b);
        // A partial-corpus scan must not perturb the recorded total.
        assert_eq!(counter.on_block(&b, &annotated, &index), ScanOutcome::Continue);
        assert_eq!(counter.count, 3);

        let mut out = Vec::new();
        counter.finish(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "3 blocks of >= 1 instructions\n");
    }

    #[test]
    fn match_counter_stop_after_signals_stop() {
        let index = EquivIndex::empty(DEFAULT_REP_CAP, 1);
        let mut counter = MatchCounter::new(1, None).with_stop_after(2);
        let b = ret_block(0);
        let annotated = annotate(&b);
        assert_eq!(counter.on_block(&b, &annotated, &index), ScanOutcome::Continue);
        assert_eq!(counter.on_block(&b, &annotated, &index), ScanOutcome::Stop);
    }

    #[test]
    fn top_classes_gathers_and_reports() {
        let mut index = EquivIndex::empty(DEFAULT_REP_CAP, 1);
        let common = ret_block(0);
        let rare = block(
            "t.bb",
            "f",
            1,
            vec![inst("const", &[], &[1]), inst("ret", &[1], &[])],
        );
        for _ in 0..3 {
            index.update(&common);
        }
        index.update(&rare);

        let mut feature = TopClasses::new(&index, 2, 1, PrintMode::Asm);
        let annotated = annotate(&common);
        // One representative each fully satisfies the feature.
        assert_eq!(
            feature.on_block(&common, &annotated, &index),
            ScanOutcome::Continue
        );
        let annotated = annotate(&rare);
        assert_eq!(feature.on_block(&rare, &annotated, &index), ScanOutcome::Stop);

        let mut out = Vec::new();
        feature.finish(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("#1 class 0 frequency 3"), "{}", text);
        assert!(text.contains("#2 class 1 frequency 1"), "{}", text);
        assert!(text.contains("ret()"), "{}", text);
    }
}
