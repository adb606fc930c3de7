// SPDX-License-Identifier: Apache-2.0

//! Corpus analysis of compiled basic blocks for peephole-optimization
//! research: register canonicalization, a persistent equivalence-class
//! index, pattern matchers, and the reporting driver that composes them.

pub mod block_parser;
pub mod canonical;
pub mod corpus;
pub mod equiv_index;
pub mod ir;
pub mod matcher;
pub mod pattern_registry;
pub mod report;
pub mod summary;
pub mod test_utils;
