// SPDX-License-Identifier: Apache-2.0

//! Data model for straight-line basic blocks of register-machine
//! instructions: registers, opcodes, instructions, blocks, and their
//! assembly/graph renderings.

use serde::{Deserialize, Serialize};

/// Opaque register identity. Only meaningful within a single block; the
/// canonicalizer never compares registers across blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reg(pub u32);

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntBinop {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Cmp,
}

/// Opcode tag. "Basic" operations compute within the block; terminators
/// end it by transferring control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Load,
    Store,
    Move,
    Const,
    IntOp(IntBinop),
    Branch,
    CondBranch,
    Call,
    Return,
}

impl Opcode {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Branch | Opcode::CondBranch | Opcode::Call | Opcode::Return
        )
    }

    /// Returns the textual operator for this opcode as it appears in the
    /// `.bb` corpus format.
    pub fn operator(&self) -> &'static str {
        match self {
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Move => "mov",
            Opcode::Const => "const",
            Opcode::IntOp(IntBinop::Add) => "add",
            Opcode::IntOp(IntBinop::Sub) => "sub",
            Opcode::IntOp(IntBinop::Mul) => "mul",
            Opcode::IntOp(IntBinop::And) => "and",
            Opcode::IntOp(IntBinop::Or) => "or",
            Opcode::IntOp(IntBinop::Xor) => "xor",
            Opcode::IntOp(IntBinop::Shl) => "shl",
            Opcode::IntOp(IntBinop::Shr) => "shr",
            Opcode::IntOp(IntBinop::Cmp) => "cmp",
            Opcode::Branch => "br",
            Opcode::CondBranch => "brif",
            Opcode::Call => "call",
            Opcode::Return => "ret",
        }
    }

    /// Fixed `(args, results)` arity for opcodes that have one; `None` for
    /// variadic opcodes (`call`, `ret`).
    pub fn fixed_arity(&self) -> Option<(usize, usize)> {
        match self {
            Opcode::Load => Some((1, 1)),
            Opcode::Store => Some((2, 0)),
            Opcode::Move => Some((1, 1)),
            Opcode::Const => Some((0, 1)),
            Opcode::IntOp(_) => Some((2, 1)),
            Opcode::Branch => Some((0, 0)),
            Opcode::CondBranch => Some((1, 0)),
            Opcode::Call | Opcode::Return => None,
        }
    }
}

/// Maps a textual operator back to its opcode; inverse of
/// [`Opcode::operator`].
pub fn operator_to_opcode(op: &str) -> Option<Opcode> {
    let opcode = match op {
        "load" => Opcode::Load,
        "store" => Opcode::Store,
        "mov" => Opcode::Move,
        "const" => Opcode::Const,
        "add" => Opcode::IntOp(IntBinop::Add),
        "sub" => Opcode::IntOp(IntBinop::Sub),
        "mul" => Opcode::IntOp(IntBinop::Mul),
        "and" => Opcode::IntOp(IntBinop::And),
        "or" => Opcode::IntOp(IntBinop::Or),
        "xor" => Opcode::IntOp(IntBinop::Xor),
        "shl" => Opcode::IntOp(IntBinop::Shl),
        "shr" => Opcode::IntOp(IntBinop::Shr),
        "cmp" => Opcode::IntOp(IntBinop::Cmp),
        "br" => Opcode::Branch,
        "brif" => Opcode::CondBranch,
        "call" => Opcode::Call,
        "ret" => Opcode::Return,
        _ => return None,
    };
    Some(opcode)
}

/// One instruction: an opcode plus ordered argument and result registers.
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub args: Vec<Reg>,
    pub results: Vec<Reg>,
}

impl Instruction {
    pub fn new(opcode: Opcode, args: Vec<Reg>, results: Vec<Reg>) -> Self {
        Instruction {
            opcode,
            args,
            results,
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.results.is_empty() {
            let results = self
                .results
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "{} = ", results)?;
        }
        let args = self
            .args
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}({})", self.opcode.operator(), args)
    }
}

/// Back-reference from a block to where it came from in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLoc {
    pub file: String,
    pub function: String,
    pub block_index: usize,
}

impl std::fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:bb{}", self.file, self.function, self.block_index)
    }
}

/// A basic block: straight-line instructions ending in a terminator, plus
/// the labels of its successor blocks within the same function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub instructions: Vec<Instruction>,
    pub loc: SourceLoc,
    pub successors: Vec<String>,
}

/// Selects how representative blocks are rendered in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintMode {
    Asm,
    Graph,
    Both,
}

impl std::str::FromStr for PrintMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asm" => Ok(PrintMode::Asm),
            "graph" => Ok(PrintMode::Graph),
            "both" => Ok(PrintMode::Both),
            other => Err(format!(
                "unknown print mode: {:?}; expected one of: asm, graph, both",
                other
            )),
        }
    }
}

fn render_asm(block: &Block) -> String {
    let mut out = String::new();
    out.push_str(&format!("; {}\n", block.loc));
    for inst in block.instructions.iter() {
        out.push_str(&format!("  {}\n", inst));
    }
    out
}

/// Renders the block's def-use structure as DOT text: one node per
/// instruction, one edge from each definition to each later use.
fn render_graph(block: &Block) -> String {
    let mut out = String::new();
    out.push_str(&format!("digraph \"{}\" {{\n", block.loc));
    for (i, inst) in block.instructions.iter().enumerate() {
        out.push_str(&format!("  n{} [label=\"{}\"];\n", i, inst));
    }
    for (i, inst) in block.instructions.iter().enumerate() {
        for result in inst.results.iter() {
            // Edges run to the uses before the register is redefined.
            for (j, later) in block.instructions.iter().enumerate().skip(i + 1) {
                if later.args.contains(result) {
                    out.push_str(&format!("  n{} -> n{};\n", i, j));
                }
                if later.results.contains(result) {
                    break;
                }
            }
        }
    }
    out.push_str("}\n");
    out
}

pub fn render_block(block: &Block, mode: PrintMode) -> String {
    match mode {
        PrintMode::Asm => render_asm(block),
        PrintMode::Graph => render_graph(block),
        PrintMode::Both => format!("{}{}", render_asm(block), render_graph(block)),
    }
}
