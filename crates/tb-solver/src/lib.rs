// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! # tb-solver
//!
//! The unified API of the TABULA data-preparation engine.
//!
//! Two facades cover the two subsystems:
//! - [`FeatureConstructor`] drives multi-table feature construction from a
//!   schema domain and a rule catalogue to a derived domain;
//! - [`DataGridOptimizer`] optimizes a data grid with the VNS pipeline.
//!
//! Parameters are validated at setter time; invalid values are rejected
//! with a descriptive [`PrepError::InvalidParameter`].
//!
//! ## Example
//!
//! ```rust
//! use tb_core::{DataType, DomainBuilder, RunContext};
//! use tb_rules::standard_catalogue;
//! use tb_solver::{FeatureConstructionSpec, FeatureConstructor};
//!
//! let mut builder = DomainBuilder::new();
//! let order = builder.add_class("Order");
//! let item = builder.add_class("Item");
//! builder.add_attribute(order, "Items", DataType::Table(item)).unwrap();
//! builder.add_attribute(item, "Price", DataType::Numeric).unwrap();
//! let domain = builder.build(order).unwrap();
//!
//! let mut spec = FeatureConstructionSpec::default();
//! spec.set_rule_number(10).unwrap();
//! let constructor = FeatureConstructor::new(spec);
//! let mut ctx = RunContext::new(1);
//! let result = constructor
//!     .construct(&domain, &standard_catalogue(), None, None, &mut ctx)
//!     .unwrap();
//! assert!(result.constructed_count > 0);
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use tb_construct::{
    ClassBuilder, GeneratorParams, MemoryPolicy, RuleGenerator, SelectionValueSource,
};
use tb_core::{Domain, PrepError, PrepResult, RunContext};
use tb_grid::{CodelengthCostModel, DataGrid, GridCostModel};
use tb_rules::{compute_all_classes_compliant_rules, RuleCatalogue, RuleFamily};
use tb_search::{GridOptimizer, OptimizerParams};

/// Hard ceiling on the constructed-rule cap.
pub const MAX_RULE_NUMBER_LIMIT: usize = 1_000_000;

/// Parameters of one feature-construction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConstructionSpec {
    rule_number: usize,
    max_rule_number: usize,
    max_rule_depth: usize,
    max_rule_cost: f64,
    selection_rules_forbidden: bool,
    interpretable_names: bool,
}

impl Default for FeatureConstructionSpec {
    fn default() -> Self {
        Self {
            rule_number: 100,
            max_rule_number: MAX_RULE_NUMBER_LIMIT,
            max_rule_depth: 100,
            max_rule_cost: 1000.0,
            selection_rules_forbidden: false,
            interpretable_names: true,
        }
    }
}

impl FeatureConstructionSpec {
    /// Number of features to construct.
    pub fn rule_number(&self) -> usize {
        self.rule_number
    }

    /// Set the number of features to construct.
    pub fn set_rule_number(&mut self, value: usize) -> PrepResult<()> {
        if value > self.max_rule_number {
            return Err(PrepError::InvalidParameter(format!(
                "rule number {value} exceeds the maximum {}",
                self.max_rule_number
            )));
        }
        self.rule_number = value;
        Ok(())
    }

    /// Hard cap on rules held during generation.
    pub fn max_rule_number(&self) -> usize {
        self.max_rule_number
    }

    /// Set the hard cap.
    pub fn set_max_rule_number(&mut self, value: usize) -> PrepResult<()> {
        if value == 0 || value > MAX_RULE_NUMBER_LIMIT {
            return Err(PrepError::InvalidParameter(format!(
                "max rule number must be in [1, {MAX_RULE_NUMBER_LIMIT}], got {value}"
            )));
        }
        self.max_rule_number = value;
        Ok(())
    }

    /// Maximum rule-tree depth.
    pub fn max_rule_depth(&self) -> usize {
        self.max_rule_depth
    }

    /// Set the maximum rule-tree depth.
    pub fn set_max_rule_depth(&mut self, value: usize) -> PrepResult<()> {
        if value == 0 {
            return Err(PrepError::InvalidParameter(
                "max rule depth must be at least 1".to_string(),
            ));
        }
        self.max_rule_depth = value;
        Ok(())
    }

    /// Maximum prior cost of a produced rule.
    pub fn max_rule_cost(&self) -> f64 {
        self.max_rule_cost
    }

    /// Set the maximum prior cost.
    pub fn set_max_rule_cost(&mut self, value: f64) -> PrepResult<()> {
        if !value.is_finite() || value <= 0.0 {
            return Err(PrepError::InvalidParameter(format!(
                "max rule cost must be positive and finite, got {value}"
            )));
        }
        self.max_rule_cost = value;
        Ok(())
    }

    /// Whether selection rules are excluded entirely.
    pub fn selection_rules_forbidden(&self) -> bool {
        self.selection_rules_forbidden
    }

    /// Exclude or allow selection rules.
    pub fn set_selection_rules_forbidden(&mut self, value: bool) {
        self.selection_rules_forbidden = value;
    }

    /// Whether derived attributes carry formula-based names.
    pub fn interpretable_names(&self) -> bool {
        self.interpretable_names
    }

    /// Select formula-based or opaque names.
    pub fn set_interpretable_names(&mut self, value: bool) {
        self.interpretable_names = value;
    }

    /// Validate the whole parameter set, as the setters would.
    pub fn check(&self) -> PrepResult<()> {
        if self.max_rule_number == 0 || self.max_rule_number > MAX_RULE_NUMBER_LIMIT {
            return Err(PrepError::InvalidParameter(format!(
                "max rule number must be in [1, {MAX_RULE_NUMBER_LIMIT}], got {}",
                self.max_rule_number
            )));
        }
        if self.rule_number > self.max_rule_number {
            return Err(PrepError::InvalidParameter(format!(
                "rule number {} exceeds the maximum {}",
                self.rule_number, self.max_rule_number
            )));
        }
        if self.max_rule_depth == 0 {
            return Err(PrepError::InvalidParameter(
                "max rule depth must be at least 1".to_string(),
            ));
        }
        if !self.max_rule_cost.is_finite() || self.max_rule_cost <= 0.0 {
            return Err(PrepError::InvalidParameter(format!(
                "max rule cost must be positive and finite, got {}",
                self.max_rule_cost
            )));
        }
        Ok(())
    }

    /// Serialize to pretty JSON, e.g. for a parameter file.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("validated parameters serialize to JSON")
    }

    /// Parse from JSON, rejecting malformed input and invalid values.
    pub fn from_json(json: &str) -> PrepResult<Self> {
        let spec: Self = serde_json::from_str(json).map_err(|e| {
            PrepError::InvalidParameter(format!("invalid construction parameters: {e}"))
        })?;
        spec.check()?;
        Ok(spec)
    }
}

/// Output of one feature-construction run.
#[derive(Debug)]
pub struct ConstructionResult {
    /// Input domain extended with the derived attributes.
    pub domain: Domain,
    /// Number of derived attributes actually added.
    pub constructed_count: usize,
    /// Wall-clock construction time.
    pub construction_time: Duration,
    /// Derived-attribute counts per rule family.
    pub family_counts: HashMap<RuleFamily, usize>,
}

/// Multi-table feature construction facade.
#[derive(Debug, Clone)]
pub struct FeatureConstructor {
    spec: FeatureConstructionSpec,
    memory_policy: MemoryPolicy,
}

impl FeatureConstructor {
    /// Create a constructor from validated parameters.
    pub fn new(spec: FeatureConstructionSpec) -> Self {
        Self {
            spec,
            memory_policy: tb_construct::default_memory_policy,
        }
    }

    /// Override the memory-exhaustion policy.
    pub fn with_memory_policy(mut self, policy: MemoryPolicy) -> Self {
        self.memory_policy = policy;
        self
    }

    /// The parameters in force.
    pub fn spec(&self) -> &FeatureConstructionSpec {
        &self.spec
    }

    /// Run construction against `domain` with the active rules of
    /// `catalogue`. `target` names the attribute to predict; `source`
    /// feeds the data-driven selection pass when selection rules are in
    /// play.
    pub fn construct(
        &self,
        domain: &Domain,
        catalogue: &RuleCatalogue,
        target: Option<&str>,
        source: Option<&dyn SelectionValueSource>,
        ctx: &mut RunContext,
    ) -> PrepResult<ConstructionResult> {
        let started = Instant::now();

        let target_name = match target {
            Some(name) => Some(domain.name_of(name).ok_or_else(|| {
                PrepError::UnknownAttribute(name.to_string())
            })?),
            None => None,
        };

        let compliant = compute_all_classes_compliant_rules(domain, catalogue, target_name);
        let params = GeneratorParams {
            rule_number: self.spec.rule_number,
            max_rule_number: self.spec.max_rule_number,
            max_rule_depth: self.spec.max_rule_depth,
            max_rule_cost: self.spec.max_rule_cost,
            selection_rules_forbidden: self.spec.selection_rules_forbidden,
            root_rule_choice_cost: 0.0,
            memory_policy: self.memory_policy,
        };
        let mut generator = RuleGenerator::new(domain, &compliant, params);
        let rules = generator.construct_rules(source, ctx);

        if rules.is_empty() {
            info!("no constructed variables");
            return Ok(ConstructionResult {
                domain: domain.clone(),
                constructed_count: 0,
                construction_time: started.elapsed(),
                family_counts: HashMap::new(),
            });
        }

        let analyser = generator.into_analyser();
        let built = ClassBuilder::new(self.spec.interpretable_names)
            .build_derived_domain(domain, &rules, &analyser)?;

        Ok(ConstructionResult {
            domain: built.domain,
            constructed_count: built.constructed_count,
            construction_time: started.elapsed(),
            family_counts: built.family_counts,
        })
    }
}

/// Parameters of one grid optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridOptimizationSpec {
    optimization_level: usize,
    optimization_time: u64,
    max_part_number: usize,
    varpart_post_merge: bool,
    varpart_post_optimize: bool,
}

impl Default for GridOptimizationSpec {
    fn default() -> Self {
        Self {
            optimization_level: 0,
            optimization_time: 0,
            max_part_number: 0,
            varpart_post_merge: true,
            varpart_post_optimize: true,
        }
    }
}

impl GridOptimizationSpec {
    /// VNS level count (0 = automatic).
    pub fn optimization_level(&self) -> usize {
        self.optimization_level
    }

    /// Set the VNS level count; levels beyond 20 bring nothing but cost.
    pub fn set_optimization_level(&mut self, value: usize) -> PrepResult<()> {
        if value > 20 {
            return Err(PrepError::InvalidParameter(format!(
                "optimization level must be in [0, 20], got {value}"
            )));
        }
        self.optimization_level = value;
        Ok(())
    }

    /// Time budget in seconds (0 = unbounded).
    pub fn optimization_time(&self) -> u64 {
        self.optimization_time
    }

    /// Set the time budget.
    pub fn set_optimization_time(&mut self, value: u64) {
        self.optimization_time = value;
    }

    /// Part-number cap (0 = none).
    pub fn max_part_number(&self) -> usize {
        self.max_part_number
    }

    /// Set the part-number cap.
    pub fn set_max_part_number(&mut self, value: usize) -> PrepResult<()> {
        if value == 1 {
            return Err(PrepError::InvalidParameter(
                "a part-number cap of 1 would destroy every partition".to_string(),
            ));
        }
        self.max_part_number = value;
        Ok(())
    }

    /// Whether adjacent VarPart tokens are merged after optimization.
    pub fn varpart_post_merge(&self) -> bool {
        self.varpart_post_merge
    }

    /// Toggle the VarPart post-merge.
    pub fn set_varpart_post_merge(&mut self, value: bool) {
        self.varpart_post_merge = value;
    }

    /// Whether VarPart tokens are reassigned across clusters.
    pub fn varpart_post_optimize(&self) -> bool {
        self.varpart_post_optimize
    }

    /// Toggle the VarPart post-optimization.
    pub fn set_varpart_post_optimize(&mut self, value: bool) {
        self.varpart_post_optimize = value;
    }

    /// Validate the whole parameter set, as the setters would.
    pub fn check(&self) -> PrepResult<()> {
        if self.optimization_level > 20 {
            return Err(PrepError::InvalidParameter(format!(
                "optimization level must be in [0, 20], got {}",
                self.optimization_level
            )));
        }
        if self.max_part_number == 1 {
            return Err(PrepError::InvalidParameter(
                "a part-number cap of 1 would destroy every partition".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize to pretty JSON, e.g. for a parameter file.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("validated parameters serialize to JSON")
    }

    /// Parse from JSON, rejecting malformed input and invalid values.
    pub fn from_json(json: &str) -> PrepResult<Self> {
        let spec: Self = serde_json::from_str(json).map_err(|e| {
            PrepError::InvalidParameter(format!("invalid optimization parameters: {e}"))
        })?;
        spec.check()?;
        Ok(spec)
    }

    fn to_params(&self) -> OptimizerParams {
        OptimizerParams {
            optimization_level: self.optimization_level,
            optimization_time: self.optimization_time,
            max_part_number: self.max_part_number,
            varpart_post_merge: self.varpart_post_merge,
            varpart_post_optimize: self.varpart_post_optimize,
            ..OptimizerParams::default()
        }
    }
}

/// Output of one grid optimization.
#[derive(Debug)]
pub struct GridOptimizationResult {
    /// Best grid found.
    pub grid: DataGrid,
    /// Its codelength cost.
    pub cost: f64,
}

/// Data-grid optimization facade.
#[derive(Debug, Clone, Default)]
pub struct DataGridOptimizer {
    spec: GridOptimizationSpec,
}

impl DataGridOptimizer {
    /// Create an optimizer from validated parameters.
    pub fn new(spec: GridOptimizationSpec) -> Self {
        Self { spec }
    }

    /// The parameters in force.
    pub fn spec(&self) -> &GridOptimizationSpec {
        &self.spec
    }

    /// Optimize with the default codelength cost model.
    pub fn optimize(&self, initial: &DataGrid, ctx: &mut RunContext) -> GridOptimizationResult {
        self.optimize_with(initial, &CodelengthCostModel::new(), ctx)
    }

    /// Optimize with a caller-provided cost model.
    pub fn optimize_with(
        &self,
        initial: &DataGrid,
        costs: &dyn GridCostModel,
        ctx: &mut RunContext,
    ) -> GridOptimizationResult {
        let optimizer = GridOptimizer::new(costs, self.spec.to_params());
        let (optimized, cost) = optimizer.optimize(initial, ctx);

        // Honour the part-number cap on the way out
        let (grid, cost) = if self.spec.max_part_number > 0 {
            optimizer.simplify(&optimized)
        } else {
            (optimized, cost)
        };
        GridOptimizationResult { grid, cost }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_spec_validation() {
        let mut spec = FeatureConstructionSpec::default();
        assert!(spec.set_rule_number(1000).is_ok());
        assert!(spec.set_max_rule_number(0).is_err());
        assert!(spec.set_max_rule_number(MAX_RULE_NUMBER_LIMIT + 1).is_err());
        assert!(spec.set_max_rule_depth(0).is_err());
        assert!(spec.set_max_rule_cost(-1.0).is_err());
        assert!(spec.set_max_rule_cost(f64::NAN).is_err());
        assert!(spec.set_max_rule_cost(50.0).is_ok());

        spec.set_max_rule_number(10).unwrap();
        assert!(spec.set_rule_number(11).is_err());
    }

    #[test]
    fn test_optimization_spec_validation() {
        let mut spec = GridOptimizationSpec::default();
        assert!(spec.set_optimization_level(21).is_err());
        assert!(spec.set_optimization_level(2).is_ok());
        assert!(spec.set_max_part_number(1).is_err());
        assert!(spec.set_max_part_number(0).is_ok());
        assert!(spec.set_max_part_number(16).is_ok());
    }

    #[test]
    fn test_construction_spec_json_round_trip() {
        let mut spec = FeatureConstructionSpec::default();
        spec.set_rule_number(42).unwrap();
        spec.set_max_rule_cost(250.0).unwrap();
        spec.set_interpretable_names(false);

        let json = spec.to_json();
        let parsed = FeatureConstructionSpec::from_json(&json).unwrap();
        assert_eq!(parsed, spec);

        assert!(FeatureConstructionSpec::from_json("not json").is_err());
        // Well-formed JSON with invalid values is rejected by validation
        let invalid = json.replace("\"max_rule_depth\": 100", "\"max_rule_depth\": 0");
        assert!(FeatureConstructionSpec::from_json(&invalid).is_err());
    }

    #[test]
    fn test_optimization_spec_json_round_trip() {
        let mut spec = GridOptimizationSpec::default();
        spec.set_optimization_level(3).unwrap();
        spec.set_optimization_time(60);
        spec.set_varpart_post_merge(false);

        let json = spec.to_json();
        let parsed = GridOptimizationSpec::from_json(&json).unwrap();
        assert_eq!(parsed, spec);

        let invalid = json.replace("\"optimization_level\": 3", "\"optimization_level\": 30");
        assert!(GridOptimizationSpec::from_json(&invalid).is_err());
    }
}
