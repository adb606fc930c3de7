// SPDX-License-Identifier: Apache-2.0

//! Parser for the `.bb` block-corpus text format.
//!
//! The format is one or more functions, each holding labeled basic blocks:
//!
//! ```text
//! fn main {
//!   block entry:
//!     r1 = const()
//!     r2 = load(r1)
//!     brif(r2, then, done)
//!   block then:
//!     r3 = add(r2, r1)
//!     ret(r3)
//!   block done:
//!     ret(r1)
//! }
//! ```
//!
//! Arguments starting with `r` followed by digits are registers; bare
//! identifiers in terminator positions are successor labels.

use std::collections::HashMap;

use crate::ir::{operator_to_opcode, Block, Instruction, Reg, SourceLoc};

#[derive(Debug)]
pub struct ParseError {
    msg: String,
}

impl ParseError {
    fn new(msg: String) -> Self {
        Self { msg }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ParseError: {}", self.msg)
    }
}

impl std::error::Error for ParseError {}

/// One function's worth of blocks; `labels` is parallel to `blocks`.
#[derive(Debug, Clone)]
pub struct CorpusFunction {
    pub name: String,
    pub blocks: Vec<Block>,
    pub labels: Vec<String>,
}

/// A parsed `.bb` file.
#[derive(Debug, Clone)]
pub struct CorpusFile {
    pub path: String,
    pub functions: Vec<CorpusFunction>,
}

pub fn parse_path_to_corpus(path: &std::path::Path) -> Result<CorpusFile, ParseError> {
    let file_content = std::fs::read_to_string(path)
        .map_err(|e| ParseError::new(format!("failed to read file {}: {}", path.display(), e)))?;
    let mut parser = Parser::new(&file_content, &path.display().to_string());
    parser.parse_corpus_file()
}

pub struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    offset: usize,
    file: String,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str, file: &str) -> Self {
        Parser {
            chars: input.chars().peekable(),
            offset: 0,
            file: file.to_string(),
        }
    }

    fn error(&self, msg: impl Into<String>) -> ParseError {
        ParseError::new(format!("{} at offset {}", msg.into(), self.offset))
    }

    fn peekc(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn dropc(&mut self) -> Result<char, ParseError> {
        match self.chars.next() {
            Some(c) => {
                self.offset += c.len_utf8();
                Ok(c)
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn skip_ws(&mut self) {
        loop {
            while matches!(self.peekc(), Some(c) if c.is_whitespace()) {
                let _ = self.dropc();
            }
            // Line comments run to end of line.
            if self.peekc() == Some('/') {
                let mut clone = self.chars.clone();
                clone.next();
                if clone.peek() == Some(&'/') {
                    while !matches!(self.peekc(), None | Some('\n')) {
                        let _ = self.dropc();
                    }
                    continue;
                }
            }
            break;
        }
    }

    fn is_done(&mut self) -> bool {
        self.skip_ws();
        self.peekc().is_none()
    }

    fn try_drop(&mut self, s: &str) -> bool {
        self.skip_ws();
        let saved_chars = self.chars.clone();
        let saved_offset = self.offset;
        for want in s.chars() {
            if self.peekc() == Some(want) {
                let _ = self.dropc();
            } else {
                self.chars = saved_chars;
                self.offset = saved_offset;
                return false;
            }
        }
        true
    }

    fn drop_or_error(&mut self, s: &str, ctx: &str) -> Result<(), ParseError> {
        if self.try_drop(s) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?} in {}", s, ctx)))
        }
    }

    fn pop_identifier_or_error(&mut self, ctx: &str) -> Result<String, ParseError> {
        self.skip_ws();
        let mut ident = String::new();
        while matches!(self.peekc(), Some(c) if c.is_alphanumeric() || c == '_' || c == '.') {
            ident.push(self.dropc()?);
        }
        if ident.is_empty() {
            return Err(self.error(format!("expected identifier in {}", ctx)));
        }
        Ok(ident)
    }

    /// Parses a parenthesized operand list into registers and labels.
    /// Registers are `r<digits>`; anything else is a successor label.
    fn parse_operands(&mut self, ctx: &str) -> Result<(Vec<Reg>, Vec<String>), ParseError> {
        self.drop_or_error("(", ctx)?;
        let mut regs = Vec::new();
        let mut labels = Vec::new();
        if self.try_drop(")") {
            return Ok((regs, labels));
        }
        loop {
            let ident = self.pop_identifier_or_error(ctx)?;
            match parse_reg(&ident) {
                Some(reg) => {
                    if !labels.is_empty() {
                        return Err(
                            self.error(format!("register {} after label operand in {}", ident, ctx))
                        );
                    }
                    regs.push(reg);
                }
                None => labels.push(ident),
            }
            if self.try_drop(")") {
                break;
            }
            self.drop_or_error(",", ctx)?;
        }
        Ok((regs, labels))
    }

    fn parse_instruction(
        &mut self,
    ) -> Result<(Instruction, Vec<String>), ParseError> {
        let first = self.pop_identifier_or_error("instruction")?;
        let mut results = Vec::new();
        let operator = if let Some(reg) = parse_reg(&first) {
            results.push(reg);
            while self.try_drop(",") {
                let ident = self.pop_identifier_or_error("result list")?;
                let reg = parse_reg(&ident)
                    .ok_or_else(|| self.error(format!("expected register, got {:?}", ident)))?;
                results.push(reg);
            }
            self.drop_or_error("=", "instruction")?;
            self.pop_identifier_or_error("operator")?
        } else {
            first
        };
        let opcode = operator_to_opcode(&operator)
            .ok_or_else(|| self.error(format!("unknown operator {:?}", operator)))?;
        let ctx = format!("{} operands", operator);
        let (args, labels) = self.parse_operands(&ctx)?;

        if !labels.is_empty() && !opcode.is_terminator() {
            return Err(self.error(format!("label operand on non-terminator {:?}", operator)));
        }
        if let Some((want_args, want_results)) = opcode.fixed_arity() {
            if args.len() != want_args || results.len() != want_results {
                return Err(self.error(format!(
                    "wrong arity for {:?}: got {} args / {} results, want {} / {}",
                    operator,
                    args.len(),
                    results.len(),
                    want_args,
                    want_results
                )));
            }
        }
        Ok((Instruction::new(opcode, args, results), labels))
    }

    fn parse_block(
        &mut self,
        function: &str,
        block_index: usize,
    ) -> Result<(String, Block), ParseError> {
        self.drop_or_error("block", "block header")?;
        let label = self.pop_identifier_or_error("block label")?;
        self.drop_or_error(":", "block header")?;

        let mut instructions: Vec<Instruction> = Vec::new();
        let mut successors: Vec<String> = Vec::new();
        loop {
            self.skip_ws();
            // A block ends at the next block header or the function's `}`.
            let at_end = self.peekc() == Some('}') || {
                let saved_chars = self.chars.clone();
                let saved_offset = self.offset;
                let next_block = self.try_drop("block");
                self.chars = saved_chars;
                self.offset = saved_offset;
                next_block
            };
            if at_end {
                break;
            }
            if let Some(last) = instructions.last() {
                if last.opcode.is_terminator() {
                    return Err(self.error(format!(
                        "instruction after terminator in block {:?}",
                        label
                    )));
                }
            }
            let (inst, labels) = self.parse_instruction()?;
            if inst.opcode.is_terminator() {
                successors = labels;
            }
            instructions.push(inst);
        }
        match instructions.last() {
            Some(last) if last.opcode.is_terminator() => {}
            _ => {
                return Err(self.error(format!(
                    "block {:?} does not end with a terminator",
                    label
                )))
            }
        }
        let block = Block {
            instructions,
            loc: SourceLoc {
                file: self.file.clone(),
                function: function.to_string(),
                block_index,
            },
            successors,
        };
        Ok((label, block))
    }

    fn parse_function(&mut self) -> Result<CorpusFunction, ParseError> {
        self.drop_or_error("fn", "function header")?;
        let name = self.pop_identifier_or_error("function name")?;
        self.drop_or_error("{", "function body")?;
        let mut blocks = Vec::new();
        let mut labels = Vec::new();
        while !self.try_drop("}") {
            let (label, block) = self.parse_block(&name, blocks.len())?;
            if labels.contains(&label) {
                return Err(self.error(format!("duplicate block label {:?}", label)));
            }
            labels.push(label);
            blocks.push(block);
        }
        if blocks.is_empty() {
            return Err(self.error(format!("function {:?} has no blocks", name)));
        }
        // Successor labels must resolve within the function.
        for block in blocks.iter() {
            for succ in block.successors.iter() {
                if !labels.contains(succ) {
                    return Err(self.error(format!(
                        "unknown successor label {:?} in function {:?}",
                        succ, name
                    )));
                }
            }
        }
        Ok(CorpusFunction {
            name,
            blocks,
            labels,
        })
    }

    pub fn parse_corpus_file(&mut self) -> Result<CorpusFile, ParseError> {
        let mut functions = Vec::new();
        while !self.is_done() {
            functions.push(self.parse_function()?);
        }
        Ok(CorpusFile {
            path: self.file.clone(),
            functions,
        })
    }
}

fn parse_reg(ident: &str) -> Option<Reg> {
    let digits = ident.strip_prefix('r')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok().map(Reg)
}

/// Expands a function's blocks into indexable units of up to
/// `context_length` chained blocks.
///
/// Every chain of exactly `context_length` blocks reachable by following
/// successor labels is emitted, plus shorter chains that dead-end at a
/// block with no successors. Instructions are concatenated with
/// intermediate terminators retained; the unit keeps the head block's
/// source location. Chains may revisit a block (loops), bounded by the
/// chain length. Linear in input size for fixed `context_length`,
/// worst-case exponential in it.
pub fn chained_blocks(function: &CorpusFunction, context_length: usize) -> Vec<Block> {
    assert!(context_length >= 1, "context length must be at least 1");
    let label_to_index: HashMap<&str, usize> = function
        .labels
        .iter()
        .enumerate()
        .map(|(i, label)| (label.as_str(), i))
        .collect();

    let mut units = Vec::new();
    for start in 0..function.blocks.len() {
        let mut chain = vec![start];
        extend_chain(function, &label_to_index, context_length, &mut chain, &mut units);
    }
    units
}

fn extend_chain(
    function: &CorpusFunction,
    label_to_index: &HashMap<&str, usize>,
    context_length: usize,
    chain: &mut Vec<usize>,
    units: &mut Vec<Block>,
) {
    let last = &function.blocks[*chain.last().unwrap()];
    if chain.len() == context_length || last.successors.is_empty() {
        units.push(coalesce(function, chain));
        return;
    }
    for succ in last.successors.iter() {
        // Labels were validated at parse time.
        let next = label_to_index[succ.as_str()];
        chain.push(next);
        extend_chain(function, label_to_index, context_length, chain, units);
        chain.pop();
    }
}

fn coalesce(function: &CorpusFunction, chain: &[usize]) -> Block {
    let head = &function.blocks[chain[0]];
    if chain.len() == 1 {
        return head.clone();
    }
    let instructions = chain
        .iter()
        .flat_map(|&i| function.blocks[i].instructions.iter().cloned())
        .collect();
    Block {
        instructions,
        loc: head.loc.clone(),
        successors: function.blocks[*chain.last().unwrap()].successors.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IntBinop, Opcode};

    fn parse(text: &str) -> Result<CorpusFile, ParseError> {
        Parser::new(text, "test.bb").parse_corpus_file()
    }

    const TWO_BLOCK_FN: &str = r#"
fn main {
  block entry:
    r1 = const()
    r2 = load(r1)
    brif(r2, then, then)
  block then:
    r3 = add(r2, r1)
    ret(r3)
}
"#;

    #[test]
    fn parses_two_block_function() {
        let corpus = parse(TWO_BLOCK_FN).unwrap();
        assert_eq!(corpus.functions.len(), 1);
        let f = &corpus.functions[0];
        assert_eq!(f.name, "main");
        assert_eq!(f.labels, vec!["entry", "then"]);
        assert_eq!(f.blocks[0].successors, vec!["then", "then"]);
        assert_eq!(f.blocks[0].instructions.len(), 3);
        assert_eq!(
            f.blocks[1].instructions[0].opcode,
            Opcode::IntOp(IntBinop::Add)
        );
        assert_eq!(f.blocks[1].loc.block_index, 1);
    }

    #[test]
    fn rejects_unknown_operator() {
        let err = parse("fn f {\n block a:\n  r1 = fadd(r0, r0)\n  ret()\n}\n").unwrap_err();
        assert!(format!("{}", err).contains("unknown operator"), "{}", err);
    }

    #[test]
    fn rejects_wrong_arity() {
        let err = parse("fn f {\n block a:\n  r1 = load(r0, r2)\n  ret()\n}\n").unwrap_err();
        assert!(format!("{}", err).contains("wrong arity"), "{}", err);
    }

    #[test]
    fn rejects_missing_terminator() {
        let err = parse("fn f {\n block a:\n  r1 = const()\n}\n").unwrap_err();
        assert!(
            format!("{}", err).contains("does not end with a terminator"),
            "{}",
            err
        );
    }

    #[test]
    fn rejects_unknown_successor_label() {
        let err = parse("fn f {\n block a:\n  br(missing)\n}\n").unwrap_err();
        assert!(
            format!("{}", err).contains("unknown successor label"),
            "{}",
            err
        );
    }

    #[test]
    fn line_comments_are_skipped() {
        let corpus = parse("// header\nfn f {\n block a: // entry\n  ret()\n}\n").unwrap();
        assert_eq!(corpus.functions[0].blocks.len(), 1);
    }

    #[test]
    fn chained_blocks_identity_at_length_one() {
        let corpus = parse(TWO_BLOCK_FN).unwrap();
        let units = chained_blocks(&corpus.functions[0], 1);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0], corpus.functions[0].blocks[0]);
    }

    #[test]
    fn chained_blocks_follow_successors() {
        let corpus = parse(TWO_BLOCK_FN).unwrap();
        let f = &corpus.functions[0];
        let units = chained_blocks(f, 2);
        // entry->then (both brif edges) plus the dead-end chain from then.
        assert_eq!(units.len(), 3);
        let coalesced = &units[0];
        assert_eq!(
            coalesced.instructions.len(),
            f.blocks[0].instructions.len() + f.blocks[1].instructions.len()
        );
        assert_eq!(coalesced.loc, f.blocks[0].loc);
        // Intermediate terminator retained.
        assert_eq!(coalesced.instructions[2].opcode, Opcode::CondBranch);
    }
}
