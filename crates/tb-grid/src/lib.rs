// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! # tb-grid
//!
//! Data-grid model and codelength costs for TABULA.
//!
//! This crate provides:
//! - [`DataGrid`] - multidimensional partitions with sparse cells
//! - [`GridExporter`] - terminal/granularized/randomized/VarPart exports
//! - [`CodelengthCostModel`] - the additive negative-log-posterior cost
//! - [`build_initial_grid`] - initial-grid construction from columns

pub mod cost;
pub mod dataset;
pub mod exporter;
pub mod grid;
pub mod varpart;

pub use cost::{CodelengthCostModel, GridCostModel, COST_EPSILON};
pub use dataset::{build_initial_grid, GridColumn};
pub use exporter::{GridExporter, QuantileHolder};
pub use grid::{
    Cell, Cluster, DataGrid, GridAttribute, GridAttributeKind, Interval, Part, ValueGroup,
    VarPartToken,
};
pub use varpart::InnerAttributes;
