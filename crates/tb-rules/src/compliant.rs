// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Class-compliant-rule solver.
//!
//! A construction rule is *compliant* for a class when every operand can be
//! fed either by a non-forbidden attribute of the class or by the return
//! value of a rule already compliant for it (secondary-scope operands
//! recurse into the sub-entity's compliant set). The solver computes the
//! fixpoint of that definition over every class reachable from the root,
//! one immutable generation per pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tb_core::{DataType, Domain, Name, TypeKind};

use crate::rule::{ConstructionRule, RuleCatalogue};

/// Compliant rules and operand constraints for one class.
#[derive(Debug)]
pub struct ClassCompliantRules {
    class: Name,
    compliant: Vec<Arc<ConstructionRule>>,
    by_name: HashMap<&'static str, usize>,
    forbidden: HashSet<Name>,
    redundant: HashSet<Name>,
    derived_count: usize,
}

impl ClassCompliantRules {
    fn new(class: Name) -> Self {
        Self {
            class,
            compliant: Vec::new(),
            by_name: HashMap::new(),
            forbidden: HashSet::new(),
            redundant: HashSet::new(),
            derived_count: 0,
        }
    }

    /// The class these rules apply to.
    pub fn class(&self) -> Name {
        self.class
    }

    /// All compliant rules, in discovery order (level 1 first).
    pub fn compliant_rules(&self) -> &[Arc<ConstructionRule>] {
        &self.compliant
    }

    /// Number of compliant rules.
    pub fn compliant_rule_count(&self) -> usize {
        self.compliant.len()
    }

    /// Find a compliant rule by name.
    pub fn search_compliant(&self, name: &str) -> Option<&Arc<ConstructionRule>> {
        self.by_name.get(name).map(|&i| &self.compliant[i])
    }

    /// Whether the attribute may not serve as an operand (key or target).
    pub fn is_attribute_forbidden(&self, name: Name) -> bool {
        self.forbidden.contains(&name)
    }

    /// Whether the attribute duplicates an existing derivation.
    pub fn is_attribute_redundant(&self, name: Name) -> bool {
        self.redundant.contains(&name)
    }

    /// Record an attribute as redundant.
    pub fn mark_redundant(&mut self, name: Name) {
        self.redundant.insert(name);
    }

    /// Number of pre-existing derived attributes in the class.
    pub fn constructed_attribute_count(&self) -> usize {
        self.derived_count
    }

    /// Whether any compliant rule is a selection rule.
    pub fn selection_rule_used(&self) -> bool {
        self.compliant.iter().any(|r| r.is_selection_rule())
    }

    fn insert_compliant(&mut self, rule: Arc<ConstructionRule>) {
        debug_assert!(!self.by_name.contains_key(rule.name()));
        self.by_name.insert(rule.name(), self.compliant.len());
        self.compliant.push(rule);
    }
}

/// Compliant rules for every class reachable from the root.
///
/// Invariant: every class referenced by a relation attribute of a member
/// class is itself a member, and the set is a fixpoint of applicability.
#[derive(Debug)]
pub struct DomainCompliantRules {
    root: Name,
    classes: Vec<ClassCompliantRules>,
    index: HashMap<Name, usize>,
}

impl DomainCompliantRules {
    /// The root class entry.
    pub fn main_class_rules(&self) -> &ClassCompliantRules {
        self.lookup(self.root).expect("root entry exists")
    }

    /// Entry for a class, if reachable from the root.
    pub fn lookup(&self, class: Name) -> Option<&ClassCompliantRules> {
        self.index.get(&class).map(|&i| &self.classes[i])
    }

    /// Mutable entry for a class.
    pub fn lookup_mut(&mut self, class: Name) -> Option<&mut ClassCompliantRules> {
        match self.index.get(&class) {
            Some(&i) => Some(&mut self.classes[i]),
            None => None,
        }
    }

    /// All entries, root first.
    pub fn classes(&self) -> &[ClassCompliantRules] {
        &self.classes
    }

    /// Whether a selection rule is compliant for any class.
    pub fn is_selection_rule_used(&self) -> bool {
        self.classes.iter().any(|c| c.selection_rule_used())
    }
}

/// Does `data_type` satisfy the operand kind?
fn kind_matches(required: TypeKind, data_type: DataType) -> bool {
    data_type.kind() == required
}

/// Type match for operand `operand_index` of `rule` against a candidate
/// type. Selection rules accept numeric or categorical for their predicate
/// operand.
fn operand_type_matches(rule: &ConstructionRule, operand_index: usize, data_type: DataType) -> bool {
    if rule.is_selection_rule() && operand_index == 1 {
        kind_matches(TypeKind::Numeric, data_type) || kind_matches(TypeKind::Categorical, data_type)
    } else {
        kind_matches(rule.operand_at(operand_index).kind, data_type)
    }
}

/// Attributes of the operand class compatible with operand `operand_index`
/// of `rule`: used, data-typed, not forbidden, type-matching. Redundant
/// attributes are kept; callers skip them where the original does.
pub fn extract_matching_attributes(
    domain: &Domain,
    rule: &ConstructionRule,
    operand_index: usize,
    class_rules: &ClassCompliantRules,
) -> Vec<(Name, DataType)> {
    let mut matching = Vec::new();
    let class = match domain.lookup_class(class_rules.class()) {
        Some(class) => class,
        None => return matching,
    };
    for attribute in class.used_attributes() {
        if class_rules.is_attribute_forbidden(attribute.name()) {
            continue;
        }
        if operand_type_matches(rule, operand_index, attribute.data_type()) {
            matching.push((attribute.name(), attribute.data_type()));
        }
    }
    matching
}

/// Compliant rules of the operand class whose return type is compatible
/// with operand `operand_index` of `rule`.
///
/// While a selection subtree is being built, nested selection rules are not
/// a legal choice; removing them here also removes them from the prior's
/// choice space, which re-normalises the regularisation cost.
pub fn extract_matching_rules(
    rule: &ConstructionRule,
    operand_index: usize,
    class_rules: &ClassCompliantRules,
    selection_forbidden: bool,
) -> Vec<Arc<ConstructionRule>> {
    let mut matching = Vec::new();
    for candidate in class_rules.compliant_rules() {
        if selection_forbidden && candidate.is_selection_rule() {
            continue;
        }
        let returned = match candidate.return_kind() {
            TypeKind::Numeric => DataType::Numeric,
            TypeKind::Categorical => DataType::Categorical,
            TypeKind::Date => DataType::Date,
            TypeKind::Time => DataType::Time,
            TypeKind::Timestamp => DataType::Timestamp,
            TypeKind::Text => DataType::Text,
            // Relation-returning rules keep the class of their first
            // operand; the kind is what matters for matching.
            TypeKind::Entity | TypeKind::Table => {
                if operand_type_matches_relation(rule, operand_index, candidate.return_kind()) {
                    matching.push(Arc::clone(candidate));
                }
                continue;
            }
        };
        if operand_type_matches(rule, operand_index, returned) {
            matching.push(Arc::clone(candidate));
        }
    }
    matching
}

fn operand_type_matches_relation(
    rule: &ConstructionRule,
    operand_index: usize,
    kind: TypeKind,
) -> bool {
    if rule.is_selection_rule() && operand_index == 1 {
        return false;
    }
    rule.operand_at(operand_index).kind == kind
}

/// Applicability of `rule` for the class of `class_rules`, given the
/// compliant sets computed so far.
pub fn is_construction_rule_applicable(
    domain: &Domain,
    rule: &ConstructionRule,
    class_rules: &ClassCompliantRules,
    all: &DomainCompliantRules,
) -> bool {
    is_applicable_from(domain, rule, 0, class_rules, None, all)
}

fn is_applicable_from(
    domain: &Domain,
    rule: &ConstructionRule,
    operand_index: usize,
    class_rules: &ClassCompliantRules,
    secondary: Option<&ClassCompliantRules>,
    all: &DomainCompliantRules,
) -> bool {
    // Resolve the scope of this operand
    let operand_rules = if rule.is_secondary_scope_operand(operand_index) {
        match secondary {
            Some(rules) => rules,
            None => return false,
        }
    } else {
        class_rules
    };

    // The operand must be feedable by an attribute, or failing that by an
    // already-compliant rule
    let matching_attributes = extract_matching_attributes(domain, rule, operand_index, operand_rules);
    let mut ok = !matching_attributes.is_empty();
    if !ok {
        ok = !extract_matching_rules(rule, operand_index, operand_rules, false).is_empty();
    }

    // Propagate to the remaining operands
    if ok && operand_index < rule.operand_count() - 1 {
        if rule.is_secondary_scope_operand(operand_index) {
            ok = is_applicable_from(domain, rule, operand_index + 1, class_rules, secondary, all);
        } else {
            // The next operands may need the sub-entity context carried by
            // one of the matching attributes
            ok = false;
            for &(name, data_type) in &matching_attributes {
                if operand_rules.is_attribute_redundant(name) {
                    continue;
                }
                let next_secondary = data_type
                    .referenced_class()
                    .and_then(|class| all.lookup(class));
                ok = is_applicable_from(
                    domain,
                    rule,
                    operand_index + 1,
                    class_rules,
                    next_secondary,
                    all,
                );
                if ok {
                    break;
                }
            }
        }
    }
    ok
}

/// Compute the compliant-rule fixpoint for every class reachable from the
/// root of `domain`.
///
/// `target` is the attribute to predict; it is forbidden as an operand on
/// the root class, as are all key attributes everywhere. An empty result
/// simply means no construction is possible.
pub fn compute_all_classes_compliant_rules(
    domain: &Domain,
    catalogue: &RuleCatalogue,
    target: Option<Name>,
) -> DomainCompliantRules {
    let mut all = DomainCompliantRules {
        root: domain.root(),
        classes: vec![ClassCompliantRules::new(domain.root())],
        index: HashMap::from([(domain.root(), 0)]),
    };

    // Discover the class tree; the list grows while traversed, until every
    // class used through a relation attribute has an entry
    let mut next = 0;
    while next < all.classes.len() {
        let class_name = all.classes[next].class;
        let class = domain.lookup_class(class_name).expect("reachable class");

        // Keys encode structure only, never information
        for &key in class.key_attributes() {
            all.classes[next].forbidden.insert(key);
        }
        let discovered: Vec<Name> = class
            .used_attributes()
            .filter_map(|a| a.data_type().referenced_class())
            .collect();
        for used_class in discovered {
            if !all.index.contains_key(&used_class) {
                all.index.insert(used_class, all.classes.len());
                all.classes.push(ClassCompliantRules::new(used_class));
            }
        }
        next += 1;
    }

    // The target attribute is forbidden on the root class
    if let Some(target) = target {
        all.classes[0].forbidden.insert(target);
    }

    // Active subset of the catalogue
    let used_rules: Vec<&ConstructionRule> = catalogue.used_rules().collect();

    // Fixpoint: each pass tests every (class, rule) pair against the sets of
    // the previous generation, then installs the new generation at once
    let mut level = 0;
    loop {
        level += 1;
        let mut additions: Vec<Vec<Arc<ConstructionRule>>> =
            vec![Vec::new(); all.classes.len()];
        for rule in &used_rules {
            for (class_index, class_rules) in all.classes.iter().enumerate() {
                if class_rules.search_compliant(rule.name()).is_none()
                    && is_construction_rule_applicable(domain, rule, class_rules, &all)
                {
                    let mut tagged = (*rule).clone();
                    tagged.set_recursion_level(level);
                    additions[class_index].push(Arc::new(tagged));
                }
            }
        }
        let mut added = false;
        for (class_index, rules) in additions.into_iter().enumerate() {
            for rule in rules {
                added = true;
                all.classes[class_index].insert_compliant(rule);
            }
        }
        if !added {
            break;
        }
    }

    // Account for derived attributes already present in the schema, so the
    // generator can avoid duplicate construction
    for class_rules in &mut all.classes {
        if let Some(class) = domain.lookup_class(class_rules.class) {
            class_rules.derived_count = class
                .attributes()
                .iter()
                .filter(|a| a.is_derived())
                .count();
        }
    }

    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::standard_catalogue;
    use tb_core::DomainBuilder;

    fn order_item_domain() -> Domain {
        let mut builder = DomainBuilder::new();
        let order = builder.add_class("Order");
        let item = builder.add_class("Item");
        let id = builder
            .add_attribute(order, "Id", DataType::Categorical)
            .unwrap();
        builder
            .add_attribute(order, "Items", DataType::Table(item))
            .unwrap();
        builder
            .add_attribute(order, "Target", DataType::Categorical)
            .unwrap();
        builder
            .add_attribute(item, "Price", DataType::Numeric)
            .unwrap();
        builder
            .add_attribute(item, "Label", DataType::Categorical)
            .unwrap();
        builder.set_key(order, &[id]).unwrap();
        builder.build(order).unwrap()
    }

    #[test]
    fn test_aggregates_compliant_on_root() {
        let domain = order_item_domain();
        let catalogue = standard_catalogue();
        let target = domain.name_of("Target");
        let all = compute_all_classes_compliant_rules(&domain, &catalogue, target);

        let main = all.main_class_rules();
        assert!(main.search_compliant("TableCount").is_some());
        assert!(main.search_compliant("TableMean").is_some());
        assert!(main.search_compliant("TableSelection").is_some());
        // Date rules have no date operand anywhere
        assert!(main.search_compliant("Year").is_none());
        // The item class has no sub-table: aggregates not compliant there
        let item = all.lookup(domain.name_of("Item").unwrap()).unwrap();
        assert!(item.search_compliant("TableCount").is_none());
    }

    #[test]
    fn test_target_and_keys_forbidden() {
        let domain = order_item_domain();
        let catalogue = standard_catalogue();
        let target = domain.name_of("Target");
        let all = compute_all_classes_compliant_rules(&domain, &catalogue, target);

        let main = all.main_class_rules();
        assert!(main.is_attribute_forbidden(domain.name_of("Id").unwrap()));
        assert!(main.is_attribute_forbidden(domain.name_of("Target").unwrap()));
        assert!(!main.is_attribute_forbidden(domain.name_of("Items").unwrap()));
    }

    #[test]
    fn test_fixpoint_is_stable() {
        let domain = order_item_domain();
        let catalogue = standard_catalogue();
        let target = domain.name_of("Target");
        let all = compute_all_classes_compliant_rules(&domain, &catalogue, target);

        // One extra pass over the result adds nothing
        for class_rules in all.classes() {
            for rule in catalogue.used_rules() {
                let already = class_rules.search_compliant(rule.name()).is_some();
                let applicable =
                    is_construction_rule_applicable(&domain, rule, class_rules, &all);
                assert!(
                    already || !applicable,
                    "rule {} became applicable only after the fixpoint",
                    rule.name()
                );
            }
        }
    }

    #[test]
    fn test_empty_catalogue_gives_empty_result() {
        let domain = order_item_domain();
        let catalogue = RuleCatalogue::new();
        let all = compute_all_classes_compliant_rules(&domain, &catalogue, None);
        assert_eq!(all.main_class_rules().compliant_rule_count(), 0);
        assert!(!all.is_selection_rule_used());
    }

    #[test]
    fn test_selection_detected() {
        let domain = order_item_domain();
        let catalogue = standard_catalogue();
        let all = compute_all_classes_compliant_rules(&domain, &catalogue, None);
        assert!(all.is_selection_rule_used());
    }
}
