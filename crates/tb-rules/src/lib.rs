// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! # tb-rules
//!
//! Construction-rule catalogue and class-compliant-rule solver for TABULA.
//!
//! This crate provides:
//! - [`ConstructionRule`] - typed, immutable feature templates
//! - [`RuleCatalogue`] - the static catalogue, indexed by name
//! - [`standard_catalogue`] - all built-in rules (aggregates, date/time,
//!   text, selection)
//! - [`compute_all_classes_compliant_rules`] - the per-class applicability
//!   fixpoint over the schema's relation graph

pub mod aggregate;
pub mod compliant;
pub mod datetime;
pub mod rule;
pub mod selection;
pub mod text;

pub use compliant::{
    compute_all_classes_compliant_rules, extract_matching_attributes, extract_matching_rules,
    is_construction_rule_applicable, ClassCompliantRules, DomainCompliantRules,
};
pub use rule::{
    standard_catalogue, ConstructionRule, OperandSpec, ReturnSpec, RuleCatalogue, RuleFamily,
};
