// SPDX-License-Identifier: Apache-2.0

//! Rewrites a block's concrete registers into block-local equivalence ids,
//! producing the renaming-invariant key used by the index and matchers.
//!
//! Two blocks canonicalize equal iff they have identical opcode/arity
//! structure and identical register-reuse pattern, independent of the
//! concrete register names.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ir::{Block, Instruction, Opcode, Reg};

/// One instruction with registers replaced by block-local equivalence ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolicInst {
    pub opcode: Opcode,
    pub args: Vec<u32>,
    pub results: Vec<u32>,
}

/// The canonical form of a block; the hash/equality key everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolicBlock {
    pub insts: Vec<SymbolicInst>,
}

impl SymbolicBlock {
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

/// An instruction paired with its block-local equivalence ids; the input
/// shape both matcher variants consume.
#[derive(Debug, Clone)]
pub struct AnnotatedInst<'a> {
    pub inst: &'a Instruction,
    pub args: Vec<u32>,
    pub results: Vec<u32>,
}

/// Single block-wide counter: each register gets the next unused id on its
/// first appearance, argument positions before result positions within
/// each instruction, instructions in program order.
struct Renamer {
    ids: HashMap<Reg, u32>,
    next: u32,
}

impl Renamer {
    fn new() -> Self {
        Renamer {
            ids: HashMap::new(),
            next: 0,
        }
    }

    fn id_for(&mut self, reg: Reg) -> u32 {
        match self.ids.get(&reg) {
            Some(id) => *id,
            None => {
                let id = self.next;
                self.ids.insert(reg, id);
                self.next += 1;
                id
            }
        }
    }

    fn rename(&mut self, regs: &[Reg]) -> Vec<u32> {
        regs.iter().map(|&r| self.id_for(r)).collect()
    }
}

/// Canonicalizes a block. Total and deterministic; no failure mode.
pub fn canonicalize(block: &Block) -> SymbolicBlock {
    let mut renamer = Renamer::new();
    let insts = block
        .instructions
        .iter()
        .map(|inst| {
            let args = renamer.rename(&inst.args);
            let results = renamer.rename(&inst.results);
            SymbolicInst {
                opcode: inst.opcode,
                args,
                results,
            }
        })
        .collect();
    SymbolicBlock { insts }
}

/// Pairs each instruction with its equivalence ids for the matcher engine.
/// Uses the same renaming as [`canonicalize`], so the ids line up with the
/// block's canonical key.
pub fn annotate(block: &Block) -> Vec<AnnotatedInst<'_>> {
    let mut renamer = Renamer::new();
    block
        .instructions
        .iter()
        .map(|inst| {
            let args = renamer.rename(&inst.args);
            let results = renamer.rename(&inst.results);
            AnnotatedInst {
                inst,
                args,
                results,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{block, inst};
    use pretty_assertions::assert_eq;

    #[test]
    fn first_appearance_order_args_before_results() {
        // r7 = add(r3, r3) assigns r3 -> 0 (argument seen first), r7 -> 1.
        let b = block("t.bb", "f", 0, vec![inst("add", &[3, 3], &[7])]);
        let sym = canonicalize(&b);
        assert_eq!(sym.insts[0].args, vec![0, 0]);
        assert_eq!(sym.insts[0].results, vec![1]);
    }

    #[test]
    fn renaming_invariance() {
        let b1 = block(
            "t.bb",
            "f",
            0,
            vec![
                inst("load", &[10], &[11]),
                inst("add", &[11, 10], &[12]),
                inst("ret", &[12], &[]),
            ],
        );
        let b2 = block(
            "u.bb",
            "g",
            3,
            vec![
                inst("load", &[5], &[2]),
                inst("add", &[2, 5], &[9]),
                inst("ret", &[9], &[]),
            ],
        );
        assert_eq!(canonicalize(&b1), canonicalize(&b2));
    }

    #[test]
    fn reuse_pattern_distinguishes_blocks() {
        // Same opcodes and arities, different reuse of the load result.
        let uses_load = block(
            "t.bb",
            "f",
            0,
            vec![inst("load", &[0], &[1]), inst("add", &[2, 1], &[2])],
        );
        let ignores_load = block(
            "t.bb",
            "f",
            1,
            vec![inst("load", &[0], &[1]), inst("add", &[2, 3], &[2])],
        );
        assert_ne!(canonicalize(&uses_load), canonicalize(&ignores_load));
    }

    #[test]
    fn annotate_matches_canonical_ids() {
        let b = block(
            "t.bb",
            "f",
            0,
            vec![inst("load", &[4], &[5]), inst("store", &[5, 4], &[])],
        );
        let sym = canonicalize(&b);
        let annotated = annotate(&b);
        assert_eq!(annotated.len(), sym.insts.len());
        for (a, s) in annotated.iter().zip(sym.insts.iter()) {
            assert_eq!(a.args, s.args);
            assert_eq!(a.results, s.results);
            assert_eq!(a.inst.opcode, s.opcode);
        }
    }
}
