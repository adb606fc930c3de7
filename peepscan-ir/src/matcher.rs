// SPDX-License-Identifier: Apache-2.0

//! Matchers over register-annotated instruction sequences: whole-block
//! predicates (with a single-use lookahead window helper) and ordered
//! subsequence matching with cross-instruction register constraints.

use std::collections::HashMap;

use serde::Deserialize;

use crate::canonical::AnnotatedInst;
use crate::ir::{Opcode, Reg};

pub type BlockPredicate = fn(&[AnnotatedInst]) -> bool;

/// Engine-facing matcher: either an arbitrary whole-block predicate or an
/// ordered subsequence of shape-plus-register-constraint descriptors.
pub enum BlockMatcher {
    WholeBlock { name: String, pred: BlockPredicate },
    Subseq(SubseqMatcher),
}

impl BlockMatcher {
    pub fn matches(&self, insts: &[AnnotatedInst]) -> bool {
        match self {
            BlockMatcher::WholeBlock { pred, .. } => pred(insts),
            BlockMatcher::Subseq(m) => m.matches(insts),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            BlockMatcher::WholeBlock { name, .. } => format!("pattern {:?}", name),
            BlockMatcher::Subseq(m) => format!("subsequence of {} descriptors", m.descriptors.len()),
        }
    }
}

/// Single-use lookahead: true iff at least one contiguous window of
/// `len` instructions satisfies `pred`. A match is any one qualifying
/// window; instructions are never partially reused across a match.
pub fn any_window<F>(insts: &[AnnotatedInst], len: usize, pred: F) -> bool
where
    F: Fn(&[AnnotatedInst]) -> bool,
{
    if len == 0 || insts.len() < len {
        return false;
    }
    insts.windows(len).any(|w| pred(w))
}

/// Opcode-shape predicate for one subsequence descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Load,
    Store,
    Move,
    Const,
    IntOp,
    Terminator,
    Any,
}

impl OpClass {
    pub fn matches(&self, opcode: Opcode) -> bool {
        match self {
            OpClass::Load => opcode == Opcode::Load,
            OpClass::Store => opcode == Opcode::Store,
            OpClass::Move => opcode == Opcode::Move,
            OpClass::Const => opcode == Opcode::Const,
            OpClass::IntOp => matches!(opcode, Opcode::IntOp(_)),
            OpClass::Terminator => opcode.is_terminator(),
            OpClass::Any => true,
        }
    }

    /// Fixed `(args, results)` arity implied by the class, if any.
    pub fn fixed_arity(&self) -> Option<(usize, usize)> {
        match self {
            OpClass::Load => Some((1, 1)),
            OpClass::Store => Some((2, 0)),
            OpClass::Move => Some((1, 1)),
            OpClass::Const => Some((0, 1)),
            OpClass::IntOp => Some((2, 1)),
            OpClass::Terminator | OpClass::Any => None,
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "load" => Some(OpClass::Load),
            "store" => Some(OpClass::Store),
            "mov" => Some(OpClass::Move),
            "const" => Some(OpClass::Const),
            "intop" => Some(OpClass::IntOp),
            "terminator" => Some(OpClass::Terminator),
            "any" => Some(OpClass::Any),
            _ => None,
        }
    }
}

/// One subsequence constraint: an opcode class plus argument/result
/// register-equivalence ids. Ids form a single namespace across the whole
/// pattern: equal ids force the bound concrete registers to be equal,
/// distinct ids forbid equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub op_class: OpClass,
    pub args: Vec<u32>,
    pub results: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubseqMatcher {
    descriptors: Vec<Descriptor>,
}

impl SubseqMatcher {
    pub fn new(descriptors: Vec<Descriptor>) -> Self {
        SubseqMatcher { descriptors }
    }

    /// True iff some strictly increasing assignment of instruction indices
    /// to descriptors satisfies every shape and register constraint.
    /// Left-to-right search, first satisfying assignment wins. Absence of
    /// a match is `false`, never an error.
    pub fn matches(&self, insts: &[AnnotatedInst]) -> bool {
        if self.descriptors.is_empty() {
            return true;
        }
        let bindings = Bindings::new();
        self.search(insts, 0, 0, &bindings)
    }

    fn search(&self, insts: &[AnnotatedInst], di: usize, start: usize, bindings: &Bindings) -> bool {
        if di == self.descriptors.len() {
            return true;
        }
        let desc = &self.descriptors[di];
        for i in start..insts.len() {
            let inst = &insts[i];
            if !desc.op_class.matches(inst.inst.opcode) {
                continue;
            }
            if desc.args.len() != inst.inst.args.len()
                || desc.results.len() != inst.inst.results.len()
            {
                continue;
            }
            let mut local = bindings.clone();
            if local.bind_all(&desc.args, &inst.inst.args)
                && local.bind_all(&desc.results, &inst.inst.results)
                && self.search(insts, di + 1, i + 1, &local)
            {
                return true;
            }
        }
        false
    }
}

/// Injective binding from pattern register ids to concrete registers.
#[derive(Debug, Clone)]
struct Bindings {
    by_id: HashMap<u32, Reg>,
    bound_regs: HashMap<Reg, u32>,
}

impl Bindings {
    fn new() -> Self {
        Bindings {
            by_id: HashMap::new(),
            bound_regs: HashMap::new(),
        }
    }

    fn bind(&mut self, id: u32, reg: Reg) -> bool {
        match self.by_id.get(&id) {
            Some(&existing) => existing == reg,
            None => {
                // Distinct pattern ids must map to distinct registers.
                if self.bound_regs.contains_key(&reg) {
                    return false;
                }
                self.by_id.insert(id, reg);
                self.bound_regs.insert(reg, id);
                true
            }
        }
    }

    fn bind_all(&mut self, ids: &[u32], regs: &[Reg]) -> bool {
        ids.iter().zip(regs.iter()).all(|(&id, &reg)| self.bind(id, reg))
    }
}

#[derive(Debug)]
pub enum MatcherParseError {
    Io(std::io::Error),
    Json(serde_json::Error),
    UnknownOpClass { tag: String, index: usize },
    ArityMismatch {
        tag: String,
        index: usize,
        expected: (usize, usize),
        got: (usize, usize),
    },
}

impl std::fmt::Display for MatcherParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatcherParseError::Io(e) => write!(f, "failed to read descriptor file: {}", e),
            MatcherParseError::Json(e) => write!(f, "malformed descriptor file: {}", e),
            MatcherParseError::UnknownOpClass { tag, index } => {
                write!(f, "descriptor {}: unrecognized opcode tag {:?}", index, tag)
            }
            MatcherParseError::ArityMismatch {
                tag,
                index,
                expected,
                got,
            } => write!(
                f,
                "descriptor {} ({}): wrong arity: got {} args / {} results, want {} / {}",
                index, tag, got.0, got.1, expected.0, expected.1
            ),
        }
    }
}

impl std::error::Error for MatcherParseError {}

impl From<std::io::Error> for MatcherParseError {
    fn from(e: std::io::Error) -> Self {
        MatcherParseError::Io(e)
    }
}

impl From<serde_json::Error> for MatcherParseError {
    fn from(e: serde_json::Error) -> Self {
        MatcherParseError::Json(e)
    }
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    op: String,
    #[serde(default)]
    args: Vec<u32>,
    #[serde(default)]
    results: Vec<u32>,
}

/// Parses a JSON array of descriptor records, e.g.
/// `[{"op": "load", "args": [0], "results": [1]}, ...]`, validating opcode
/// tags and arities before any block is scanned.
pub fn parse_descriptors(text: &str) -> Result<SubseqMatcher, MatcherParseError> {
    let raw: Vec<RawDescriptor> = serde_json::from_str(text)?;
    let mut descriptors = Vec::with_capacity(raw.len());
    for (index, r) in raw.into_iter().enumerate() {
        let op_class = OpClass::from_tag(&r.op).ok_or_else(|| MatcherParseError::UnknownOpClass {
            tag: r.op.clone(),
            index,
        })?;
        if let Some(expected) = op_class.fixed_arity() {
            let got = (r.args.len(), r.results.len());
            if got != expected {
                return Err(MatcherParseError::ArityMismatch {
                    tag: r.op,
                    index,
                    expected,
                    got,
                });
            }
        }
        descriptors.push(Descriptor {
            op_class,
            args: r.args,
            results: r.results,
        });
    }
    Ok(SubseqMatcher::new(descriptors))
}

pub fn parse_descriptor_file(path: &std::path::Path) -> Result<SubseqMatcher, MatcherParseError> {
    let text = std::fs::read_to_string(path)?;
    parse_descriptors(&text)
}
