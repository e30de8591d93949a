// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! # tb-core
//!
//! Core types for the TABULA data-preparation engine.
//!
//! This crate provides:
//! - [`Domain`] / [`Class`] / [`Attribute`] - the entity schema model
//! - [`prior`] - universal-prior codelengths and combinatorial log-counts
//! - [`SampleGenerator`] - deterministic multinomial sample allocation
//! - [`RunContext`] - per-run RNG, progress hook, memory probe and clock
//!
//! ## Example
//!
//! ```rust
//! use tb_core::{DataType, DomainBuilder};
//!
//! let mut builder = DomainBuilder::new();
//! let order = builder.add_class("Order");
//! let item = builder.add_class("Item");
//! builder.add_attribute(order, "Items", DataType::Table(item)).unwrap();
//! builder.add_attribute(item, "Price", DataType::Numeric).unwrap();
//! let domain = builder.build(order).unwrap();
//!
//! assert_eq!(domain.resolve(domain.root()), "Order");
//! ```

pub mod context;
pub mod error;
pub mod prior;
pub mod quantile;
pub mod sample;
pub mod schema;
pub mod symbol;

pub use context::{
    FixedMemory, MemoryProbe, Progress, RunContext, SilentProgress, UnboundedMemory,
};
pub use error::{PrepError, PrepResult};
pub use quantile::{QuantileGroupBuilder, QuantileIntervalBuilder};
pub use sample::{IndexedFrequency, SampleGenerator};
pub use schema::{Attribute, Class, DataType, Derivation, Domain, DomainBuilder, TypeKind};
pub use symbol::{Name, SerializableName, SymbolTable};
