// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Core construction-rule definitions and the catalogue.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tb_core::TypeKind;

/// Family of a construction rule, for organisation and reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleFamily {
    /// Aggregates over a secondary table (Count, Mean, ...).
    Aggregate,
    /// Date/time decomposition (Year, WeekDay, ...).
    DateTime,
    /// Text decomposition.
    Text,
    /// Sub-table selection by a predicate.
    Selection,
}

/// One typed operand slot of a construction rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperandSpec {
    /// Required type kind of the operand.
    pub kind: TypeKind,
    /// True when the operand is evaluated in the sub-entity designated by
    /// the first operand rather than in the current class.
    pub secondary_scope: bool,
}

impl OperandSpec {
    /// Operand evaluated in the current class scope.
    pub fn primary(kind: TypeKind) -> Self {
        Self {
            kind,
            secondary_scope: false,
        }
    }

    /// Operand evaluated in the sub-entity scope.
    pub fn secondary(kind: TypeKind) -> Self {
        Self {
            kind,
            secondary_scope: true,
        }
    }
}

/// Return type of a construction rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnSpec {
    /// A fixed kind.
    Simple(TypeKind),
    /// Same type (and referenced class) as the first operand; used by
    /// selection rules, which return the selected sub-table.
    SameAsFirstOperand,
}

/// An immutable template for a derived feature.
///
/// Catalogue rules carry recursion level 0; the compliant-rule solver clones
/// them per class and tags each clone with the fixpoint pass that proved it
/// applicable. Clients never mutate a rule, they clone it when embedding it
/// in a constructed-rule tree.
#[derive(Clone, Debug)]
pub struct ConstructionRule {
    name: &'static str,
    label: &'static str,
    family: RuleFamily,
    operands: Vec<OperandSpec>,
    returns: ReturnSpec,
    is_selection: bool,
    recursion_level: u32,
    used: bool,
}

impl ConstructionRule {
    /// Create an ordinary rule.
    pub fn new(
        name: &'static str,
        label: &'static str,
        family: RuleFamily,
        operands: Vec<OperandSpec>,
        returns: ReturnSpec,
    ) -> Self {
        Self {
            name,
            label,
            family,
            operands,
            returns,
            is_selection: false,
            recursion_level: 0,
            used: true,
        }
    }

    /// Create a selection rule: the second operand is a predicate over the
    /// sub-entity of the first.
    pub fn selection(name: &'static str, label: &'static str) -> Self {
        Self {
            name,
            label,
            family: RuleFamily::Selection,
            operands: vec![
                OperandSpec::primary(TypeKind::Table),
                OperandSpec::secondary(TypeKind::Numeric),
            ],
            returns: ReturnSpec::SameAsFirstOperand,
            is_selection: true,
            recursion_level: 0,
            used: true,
        }
    }

    /// Rule name (catalogue key).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Human-readable description.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Rule family.
    pub fn family(&self) -> RuleFamily {
        self.family
    }

    /// Operand slots.
    pub fn operands(&self) -> &[OperandSpec] {
        &self.operands
    }

    /// Number of operands.
    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    /// Operand slot at `index`.
    pub fn operand_at(&self, index: usize) -> OperandSpec {
        self.operands[index]
    }

    /// Whether operand `index` is evaluated in the sub-entity scope.
    pub fn is_secondary_scope_operand(&self, index: usize) -> bool {
        self.operands[index].secondary_scope
    }

    /// Return specification.
    pub fn returns(&self) -> ReturnSpec {
        self.returns
    }

    /// Return kind, with `SameAsFirstOperand` resolved against the
    /// signature (a selection rule returns a Table).
    pub fn return_kind(&self) -> TypeKind {
        match self.returns {
            ReturnSpec::Simple(kind) => kind,
            ReturnSpec::SameAsFirstOperand => self.operands[0].kind,
        }
    }

    /// Whether the rule produces a numeric or categorical value.
    pub fn returns_simple_type(&self) -> bool {
        self.return_kind().is_simple()
    }

    /// Selection-rule flag.
    pub fn is_selection_rule(&self) -> bool {
        self.is_selection
    }

    /// Fixpoint pass at which the rule became applicable for its class.
    pub fn recursion_level(&self) -> u32 {
        self.recursion_level
    }

    /// Tag the recursion level (solver use).
    pub fn set_recursion_level(&mut self, level: u32) {
        self.recursion_level = level;
    }

    /// Whether the rule is active in the catalogue.
    pub fn used(&self) -> bool {
        self.used
    }

    /// Activate or deactivate the rule.
    pub fn set_used(&mut self, used: bool) {
        self.used = used;
    }
}

impl fmt::Display for ConstructionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.name, self.family)
    }
}

/// The static catalogue of construction rules, indexed by name.
#[derive(Debug, Default)]
pub struct RuleCatalogue {
    rules: Vec<ConstructionRule>,
    by_name: HashMap<&'static str, usize>,
}

impl RuleCatalogue {
    /// Create an empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule to the catalogue. Later additions with the same name are
    /// ignored (first definition wins).
    pub fn add(&mut self, rule: ConstructionRule) {
        if self.by_name.contains_key(rule.name()) {
            return;
        }
        self.by_name.insert(rule.name(), self.rules.len());
        self.rules.push(rule);
    }

    /// Look up a rule by name.
    pub fn lookup(&self, name: &str) -> Option<&ConstructionRule> {
        self.by_name.get(name).map(|&i| &self.rules[i])
    }

    /// Activate or deactivate a rule by name; returns false if unknown.
    pub fn set_rule_used(&mut self, name: &str, used: bool) -> bool {
        match self.by_name.get(name) {
            Some(&i) => {
                self.rules[i].set_used(used);
                true
            }
            None => false,
        }
    }

    /// All rules.
    pub fn rules(&self) -> &[ConstructionRule] {
        &self.rules
    }

    /// Active rules only.
    pub fn used_rules(&self) -> impl Iterator<Item = &ConstructionRule> {
        self.rules.iter().filter(|r| r.used())
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the catalogue is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Create the standard catalogue with all built-in rules.
pub fn standard_catalogue() -> RuleCatalogue {
    let mut catalogue = RuleCatalogue::new();

    // Aggregates over secondary tables
    for rule in crate::aggregate::aggregate_rules() {
        catalogue.add(rule);
    }

    // Date and time decomposition
    for rule in crate::datetime::datetime_rules() {
        catalogue.add(rule);
    }

    // Text decomposition
    for rule in crate::text::text_rules() {
        catalogue.add(rule);
    }

    // Sub-table selection
    for rule in crate::selection::selection_rules() {
        catalogue.add(rule);
    }

    catalogue
}
