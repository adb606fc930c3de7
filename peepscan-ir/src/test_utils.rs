// SPDX-License-Identifier: Apache-2.0

//! Small builders shared by tests across the crate.

use crate::ir::{operator_to_opcode, Block, Instruction, Reg, SourceLoc};

pub fn inst(op: &str, args: &[u32], results: &[u32]) -> Instruction {
    Instruction::new(
        operator_to_opcode(op).unwrap_or_else(|| panic!("unknown operator: {}", op)),
        args.iter().map(|&r| Reg(r)).collect(),
        results.iter().map(|&r| Reg(r)).collect(),
    )
}

pub fn loc(file: &str, function: &str, block_index: usize) -> SourceLoc {
    SourceLoc {
        file: file.to_string(),
        function: function.to_string(),
        block_index,
    }
}

pub fn block(file: &str, function: &str, index: usize, insts: Vec<Instruction>) -> Block {
    Block {
        instructions: insts,
        loc: loc(file, function, index),
        successors: vec![],
    }
}
