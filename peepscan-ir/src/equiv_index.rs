// SPDX-License-Identifier: Apache-2.0

//! Persistent map from canonical block key to equivalence class: dense id,
//! frequency, and a bounded set of representative source locations.
//!
//! The index is built in one sequential pass (append-only class set,
//! frequencies only increase), saved once after the pass succeeds, and
//! read-only thereafter.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::canonical::{canonicalize, SymbolicBlock};
use crate::ir::{Block, SourceLoc};

pub const INDEX_VERSION: u32 = 2;

/// Default cap on representative locations retained per class.
pub const DEFAULT_REP_CAP: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivClass {
    pub id: u32,
    pub frequency: u64,
    pub representatives: Vec<SourceLoc>,
}

/// Aggregate counters for progress reporting; no behavioral effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub symbolic_blocks: u64,
    pub basic_instructions: u64,
    pub terminator_instructions: u64,
}

#[derive(Debug)]
pub enum IndexError {
    /// The canonical shape was never passed to `update`.
    UnknownBlock,
    /// No class was ever allocated with this id.
    UnknownClass(u32),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::UnknownBlock => write!(f, "block shape not present in index"),
            IndexError::UnknownClass(id) => write!(f, "no equivalence class with id {}", id),
        }
    }
}

impl std::error::Error for IndexError {}

#[derive(Debug)]
pub struct EquivIndex {
    /// Canonical key to class id; classes are dense by id in `classes`.
    ids: HashMap<SymbolicBlock, u32>,
    classes: Vec<EquivClass>,
    rep_cap: usize,
    context_length: usize,
    stats: LoadStats,
}

impl EquivIndex {
    /// An index with no classes and id counter 0. `context_length` records
    /// how many chained blocks each indexed unit coalesces; queries against
    /// a different chain length would look up shapes the index never saw.
    pub fn empty(rep_cap: usize, context_length: usize) -> Self {
        EquivIndex {
            ids: HashMap::new(),
            classes: Vec::new(),
            rep_cap,
            context_length,
            stats: LoadStats::default(),
        }
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn rep_cap(&self) -> usize {
        self.rep_cap
    }

    /// The chain length the index was built with.
    pub fn context_length(&self) -> usize {
        self.context_length
    }

    /// Canonicalizes `block` and records it: a new shape allocates the next
    /// dense id with frequency 1, an existing one increments its frequency.
    /// The block's location is retained as a representative only while the
    /// class is under the cap (first N seen).
    pub fn update(&mut self, block: &Block) {
        let key = canonicalize(block);
        for inst in key.insts.iter() {
            if inst.opcode.is_terminator() {
                self.stats.terminator_instructions += 1;
            } else {
                self.stats.basic_instructions += 1;
            }
        }
        self.stats.symbolic_blocks += 1;

        let rep_cap = self.rep_cap;
        match self.ids.get(&key) {
            Some(&id) => {
                let class = &mut self.classes[id as usize];
                class.frequency += 1;
                if class.representatives.len() < rep_cap {
                    class.representatives.push(block.loc.clone());
                }
            }
            None => {
                let id = self.classes.len() as u32;
                self.ids.insert(key, id);
                let representatives = if rep_cap > 0 {
                    vec![block.loc.clone()]
                } else {
                    Vec::new()
                };
                self.classes.push(EquivClass {
                    id,
                    frequency: 1,
                    representatives,
                });
            }
        }
    }

    /// Looks up the class id for a block's canonical shape.
    pub fn equivalence(&self, block: &Block) -> Result<u32, IndexError> {
        let key = canonicalize(block);
        self.ids.get(&key).copied().ok_or(IndexError::UnknownBlock)
    }

    pub fn frequency(&self, class_id: u32) -> Result<u64, IndexError> {
        self.classes
            .get(class_id as usize)
            .map(|c| c.frequency)
            .ok_or(IndexError::UnknownClass(class_id))
    }

    pub fn class(&self, class_id: u32) -> Result<&EquivClass, IndexError> {
        self.classes
            .get(class_id as usize)
            .ok_or(IndexError::UnknownClass(class_id))
    }

    pub fn classes(&self) -> &[EquivClass] {
        &self.classes
    }

    pub fn load_statistics(&self) -> &LoadStats {
        &self.stats
    }

    /// The top `n` classes by descending frequency, ascending id as the
    /// tie-break so ranking is deterministic.
    pub fn top_classes(&self, n: usize) -> Vec<&EquivClass> {
        let mut ranked: Vec<&EquivClass> = self.classes.iter().collect();
        ranked.sort_by(|a, b| b.frequency.cmp(&a.frequency).then(a.id.cmp(&b.id)));
        ranked.truncate(n);
        ranked
    }

    /// The sorted, deduplicated set of files named by the top `n`
    /// classes' representatives, usable as a reduced scan list for the
    /// query pass. `None` when any of those classes has no representative
    /// hint, in which case only a full corpus pass is sound.
    pub fn hinted_files(&self, n: usize) -> Option<Vec<String>> {
        let mut files = Vec::new();
        for class in self.top_classes(n) {
            if class.representatives.is_empty() {
                return None;
            }
            for rep in class.representatives.iter() {
                files.push(rep.file.clone());
            }
        }
        files.sort();
        files.dedup();
        Some(files)
    }

    /// Serializes the index to `path`. The artifact is written through a
    /// temporary file and persisted over the target, so a half-built index
    /// is never observable there.
    pub fn save(&self, path: &Path) -> Result<(), SaveError> {
        let mut entries: Vec<SavedEntry> = self
            .ids
            .iter()
            .map(|(key, &id)| SavedEntry {
                key: key.clone(),
                class: self.classes[id as usize].clone(),
            })
            .collect();
        entries.sort_by_key(|e| e.class.id);
        let on_disk = SavedIndex {
            version: INDEX_VERSION,
            rep_cap: self.rep_cap as u64,
            context_length: self.context_length as u64,
            stats: self.stats,
            entries,
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = io::BufWriter::new(&mut tmp);
            bincode::serialize_into(&mut writer, &on_disk)?;
            io::Write::flush(&mut writer)?;
        }
        tmp.persist(path).map_err(|e| SaveError::Io(e.error))?;
        Ok(())
    }

    /// Loads an index previously written by [`EquivIndex::save`],
    /// validating the schema version and id density.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let file = std::fs::File::open(path)?;
        let on_disk: SavedIndex = bincode::deserialize_from(io::BufReader::new(file))?;
        if on_disk.version != INDEX_VERSION {
            return Err(LoadError::UnsupportedVersion {
                got: on_disk.version,
            });
        }
        let mut ids = HashMap::with_capacity(on_disk.entries.len());
        let mut classes = Vec::with_capacity(on_disk.entries.len());
        for (expected_id, entry) in on_disk.entries.into_iter().enumerate() {
            if entry.class.id as usize != expected_id {
                return Err(LoadError::NonDenseIds {
                    got: entry.class.id,
                    expected: expected_id as u32,
                });
            }
            ids.insert(entry.key, entry.class.id);
            classes.push(entry.class);
        }
        Ok(EquivIndex {
            ids,
            classes,
            rep_cap: on_disk.rep_cap as usize,
            context_length: on_disk.context_length as usize,
            stats: on_disk.stats,
        })
    }
}

/// On-disk schema. Entries are sorted by class id before writing so the
/// artifact is deterministic for a given index.
#[derive(Debug, Serialize, Deserialize)]
struct SavedIndex {
    version: u32,
    rep_cap: u64,
    context_length: u64,
    stats: LoadStats,
    entries: Vec<SavedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedEntry {
    key: SymbolicBlock,
    class: EquivClass,
}

#[derive(Debug)]
pub enum SaveError {
    Io(io::Error),
    Codec(Box<bincode::ErrorKind>),
}

impl std::fmt::Display for SaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveError::Io(e) => write!(f, "failed to write index: {}", e),
            SaveError::Codec(e) => write!(f, "failed to encode index: {}", e),
        }
    }
}

impl std::error::Error for SaveError {}

impl From<io::Error> for SaveError {
    fn from(e: io::Error) -> Self {
        SaveError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for SaveError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        SaveError::Codec(e)
    }
}

#[derive(Debug)]
pub enum LoadError {
    Io(io::Error),
    Codec(Box<bincode::ErrorKind>),
    UnsupportedVersion { got: u32 },
    NonDenseIds { got: u32, expected: u32 },
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "failed to read index: {}", e),
            LoadError::Codec(e) => write!(f, "failed to decode index: {}", e),
            LoadError::UnsupportedVersion { got } => {
                write!(f, "unsupported index version {} (want {})", got, INDEX_VERSION)
            }
            LoadError::NonDenseIds { got, expected } => {
                write!(f, "index ids are not dense: got {} where {} expected", got, expected)
            }
        }
    }
}

impl std::error::Error for LoadError {}

impl From<io::Error> for LoadError {
    fn from(e: io::Error) -> Self {
        LoadError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for LoadError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        LoadError::Codec(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{block, inst};
    use pretty_assertions::assert_eq;

    fn load_add_ret(file: &str, index: usize, base: u32) -> Block {
        block(
            file,
            "f",
            index,
            vec![
                inst("load", &[base], &[base + 1]),
                inst("add", &[base + 1, base], &[base + 2]),
                inst("ret", &[base + 2], &[]),
            ],
        )
    }

    fn store_ret(file: &str, index: usize) -> Block {
        block(
            file,
            "g",
            index,
            vec![inst("store", &[0, 1], &[]), inst("ret", &[], &[])],
        )
    }

    #[test]
    fn frequency_accounting_across_shapes() {
        let mut index = EquivIndex::empty(DEFAULT_REP_CAP, 1);
        for i in 0..3 {
            // Same shape under different concrete registers.
            index.update(&load_add_ret("a.bb", i, (i as u32) * 10));
        }
        for i in 0..2 {
            index.update(&store_ret("a.bb", i));
        }
        let class_a = index.equivalence(&load_add_ret("x.bb", 9, 50)).unwrap();
        let class_b = index.equivalence(&store_ret("x.bb", 9)).unwrap();
        assert_ne!(class_a, class_b);
        assert_eq!(index.frequency(class_a).unwrap(), 3);
        assert_eq!(index.frequency(class_b).unwrap(), 2);
        assert_eq!(index.class_count(), 2);
    }

    #[test]
    fn ids_are_dense_in_first_seen_order() {
        let mut index = EquivIndex::empty(DEFAULT_REP_CAP, 1);
        index.update(&load_add_ret("a.bb", 0, 0));
        index.update(&store_ret("a.bb", 1));
        assert_eq!(index.equivalence(&load_add_ret("a.bb", 0, 0)).unwrap(), 0);
        assert_eq!(index.equivalence(&store_ret("a.bb", 1)).unwrap(), 1);
    }

    #[test]
    fn lookup_errors() {
        let index = EquivIndex::empty(DEFAULT_REP_CAP, 1);
        assert!(matches!(
            index.equivalence(&store_ret("a.bb", 0)),
            Err(IndexError::UnknownBlock)
        ));
        assert!(matches!(
            index.frequency(7),
            Err(IndexError::UnknownClass(7))
        ));
    }

    #[test]
    fn representatives_are_first_n_seen() {
        let mut index = EquivIndex::empty(2, 1);
        for i in 0..5 {
            index.update(&store_ret("a.bb", i));
        }
        let id = index.equivalence(&store_ret("z.bb", 0)).unwrap();
        let class = index.class(id).unwrap();
        assert_eq!(class.representatives.len(), 2);
        // Verified policy: the first two locations seen are the ones kept.
        assert_eq!(class.representatives[0].block_index, 0);
        assert_eq!(class.representatives[1].block_index, 1);
    }

    #[test]
    fn load_statistics_counts_instruction_kinds() {
        let mut index = EquivIndex::empty(DEFAULT_REP_CAP, 1);
        index.update(&load_add_ret("a.bb", 0, 0));
        index.update(&store_ret("a.bb", 1));
        let stats = index.load_statistics();
        assert_eq!(stats.symbolic_blocks, 2);
        assert_eq!(stats.basic_instructions, 3);
        assert_eq!(stats.terminator_instructions, 2);
    }

    #[test]
    fn save_load_round_trip() {
        let mut index = EquivIndex::empty(3, 1);
        for i in 0..4 {
            index.update(&load_add_ret("a.bb", i, i as u32));
        }
        index.update(&store_ret("b.bb", 0));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.idx");
        index.save(&path).unwrap();
        let reloaded = EquivIndex::load(&path).unwrap();

        for probe in [load_add_ret("p.bb", 0, 77), store_ret("p.bb", 1)] {
            let before = index.equivalence(&probe).unwrap();
            let after = reloaded.equivalence(&probe).unwrap();
            assert_eq!(before, after);
            assert_eq!(
                index.frequency(before).unwrap(),
                reloaded.frequency(after).unwrap()
            );
        }
        assert_eq!(reloaded.rep_cap(), 3);
        assert_eq!(reloaded.load_statistics(), index.load_statistics());
        assert_eq!(reloaded.classes(), index.classes());
    }

    #[test]
    fn load_rejects_future_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.idx");
        let on_disk = SavedIndex {
            version: INDEX_VERSION + 1,
            rep_cap: 4,
            context_length: 1,
            stats: LoadStats::default(),
            entries: vec![],
        };
        let bytes = bincode::serialize(&on_disk).unwrap();
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            EquivIndex::load(&path),
            Err(LoadError::UnsupportedVersion { got }) if got == INDEX_VERSION + 1
        ));
    }
}
