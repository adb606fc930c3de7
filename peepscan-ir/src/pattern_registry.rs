// SPDX-License-Identifier: Apache-2.0

//! Static name-to-predicate registry for whole-block matchers, populated
//! at startup. Predicates operate on the annotated instruction sequence
//! and are looked up by the driver's `--matcher` flag.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use crate::canonical::AnnotatedInst;
use crate::ir::Opcode;
use crate::matcher::{any_window, BlockPredicate};

static REGISTRY: Lazy<BTreeMap<&'static str, BlockPredicate>> = Lazy::new(|| {
    let mut m: BTreeMap<&'static str, BlockPredicate> = BTreeMap::new();
    m.insert("load-then-use", load_then_use);
    m.insert("redundant-load", redundant_load);
    m.insert("dead-store", dead_store);
    m
});

pub fn lookup(name: &str) -> Option<BlockPredicate> {
    REGISTRY.get(name).copied()
}

pub fn names() -> Vec<&'static str> {
    REGISTRY.keys().copied().collect()
}

/// A load immediately followed by an integer op whose second operand is
/// the load's destination and whose result overwrites its own first
/// operand. The destination feeding the first operand does not count.
fn load_then_use(insts: &[AnnotatedInst]) -> bool {
    any_window(insts, 2, |w| {
        let loaded = match (w[0].inst.opcode, w[0].results.as_slice()) {
            (Opcode::Load, [r]) => *r,
            _ => return false,
        };
        matches!(w[1].inst.opcode, Opcode::IntOp(_))
            && w[1].args.len() == 2
            && w[1].args[1] == loaded
            && w[1].args[0] != loaded
            && w[1].results[0] == w[1].args[0]
    })
}

/// Two loads from the same address with no intervening store, call, or
/// redefinition of the address register.
fn redundant_load(insts: &[AnnotatedInst]) -> bool {
    for (i, first) in insts.iter().enumerate() {
        if first.inst.opcode != Opcode::Load {
            continue;
        }
        let addr = first.args[0];
        for second in insts.iter().skip(i + 1) {
            match second.inst.opcode {
                Opcode::Store | Opcode::Call => break,
                Opcode::Load if second.args[0] == addr => return true,
                _ => {}
            }
            if second.results.contains(&addr) {
                break;
            }
        }
    }
    false
}

/// A store to an address that is stored to again with no intervening
/// load or call observing memory.
fn dead_store(insts: &[AnnotatedInst]) -> bool {
    for (i, first) in insts.iter().enumerate() {
        if first.inst.opcode != Opcode::Store {
            continue;
        }
        let addr = first.args[1];
        for second in insts.iter().skip(i + 1) {
            match second.inst.opcode {
                Opcode::Load | Opcode::Call => break,
                Opcode::Store if second.args[1] == addr => return true,
                _ => {}
            }
            if second.results.contains(&addr) {
                break;
            }
        }
    }
    false
}
