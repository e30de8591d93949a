// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! # tb-search
//!
//! Variable-neighborhood-search optimization of data grids for TABULA.
//!
//! This crate provides:
//! - [`GridOptimizer`] - the full granularity-sweep + VNS pipeline
//! - [`GridMerger`] - greedy lowest-cost part fusion
//! - [`GridPostOptimizer`] - boundary-move local search and VarPart token
//!   reassignment

pub mod merger;
pub mod optimizer;
pub mod postopt;

pub use merger::{candidate_merges, merge_parts, GridMerger};
pub use optimizer::{GridOptimizer, OptimizerParams};
pub use postopt::GridPostOptimizer;
