// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! # tb-construct
//!
//! Multi-table feature construction for TABULA.
//!
//! This crate provides:
//! - [`ConstructedRule`] - bound derived-feature expressions as value trees
//! - [`SelectionAnalyser`] - two-pass selection-operand statistics
//! - [`RuleGenerator`] - randomized enumeration under the universal prior
//! - [`ClassBuilder`] - materialisation of accepted rules as a derived
//!   schema

pub mod builder;
pub mod generator;
pub mod selection;
pub mod tree;

pub use builder::{BuiltDomain, ClassBuilder};
pub use generator::{default_memory_policy, GeneratorParams, MemoryPolicy, RuleGenerator};
pub use selection::{
    ClassSelectionStats, GranularityPartiles, SelectionAnalyser, SelectionOperand,
    SelectionOperandStats, SelectionPart, SelectionPartile, SelectionPartition,
    SelectionValueSource, MAX_SELECTION_GRANULARITY,
};
pub use tree::{sort_by_cost_and_random_index, ConstructedRule, Operand, PartRef};
