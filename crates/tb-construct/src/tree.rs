// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Constructed-rule trees.
//!
//! A [`ConstructedRule`] is a concrete instantiation of a construction rule
//! with all operands bound. Operands are owned by their parent node; a
//! selection-part operand is an index into the partition side-table owned by
//! the selection analyser, so identical parts are shared by reference
//! without shared ownership of the tree itself.

use std::sync::Arc;

use tb_core::{DataType, Domain, Name, TypeKind};
use tb_rules::{ConstructionRule, ReturnSpec};

/// Reference to a selection part registered in the analyser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartRef {
    /// Secondary class the selection applies to.
    pub class: Name,
    /// Partition index in that class's selection stats.
    pub partition: usize,
    /// Part index inside the partition.
    pub part: usize,
}

/// Origin of one bound operand.
#[derive(Debug, Clone)]
pub enum Operand {
    /// A source attribute.
    Attribute { name: Name, data_type: DataType },
    /// A nested constructed rule.
    Rule(Box<ConstructedRule>),
    /// A selection part (predicate over a sub-entity).
    Part(PartRef),
}

impl Operand {
    /// Type of the value this operand produces, when it has one.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Operand::Attribute { data_type, .. } => Some(*data_type),
            Operand::Rule(rule) => Some(rule.data_type()),
            Operand::Part(_) => None,
        }
    }
}

/// A fully bound derived-feature expression.
#[derive(Debug, Clone)]
pub struct ConstructedRule {
    rule: Arc<ConstructionRule>,
    operands: Vec<Operand>,
    data_type: DataType,
    cost: f64,
    random_index: usize,
}

impl ConstructedRule {
    /// Bind `operands` to `rule`. The return type is resolved immediately:
    /// selection rules return the type of their first operand.
    pub fn new(rule: Arc<ConstructionRule>, operands: Vec<Operand>, cost: f64) -> Self {
        debug_assert_eq!(rule.operand_count(), operands.len());
        debug_assert!(cost >= 0.0);
        let data_type = match rule.returns() {
            ReturnSpec::Simple(kind) => simple_data_type(kind),
            ReturnSpec::SameAsFirstOperand => operands[0]
                .data_type()
                .expect("first operand of a relation-returning rule carries a type"),
        };
        Self {
            rule,
            operands,
            data_type,
            cost,
            random_index: 0,
        }
    }

    /// The construction rule this node instantiates.
    pub fn rule(&self) -> &Arc<ConstructionRule> {
        &self.rule
    }

    /// Rule name.
    pub fn name(&self) -> &'static str {
        self.rule.name()
    }

    /// Bound operands.
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// Number of operands.
    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    /// Resolved return type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Class referenced by the return type, for relation-returning rules.
    pub fn referenced_class(&self) -> Option<Name> {
        self.data_type.referenced_class()
    }

    /// Prior cost (non-negative codelength) of this tree.
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Adjust the cost (used when the rule-choice cost of an enclosing node
    /// is folded in).
    pub fn set_cost(&mut self, cost: f64) {
        debug_assert!(cost >= 0.0);
        self.cost = cost;
    }

    /// Tie-breaking index for reproducible sorting.
    pub fn random_index(&self) -> usize {
        self.random_index
    }

    /// Set the tie-breaking index.
    pub fn set_random_index(&mut self, index: usize) {
        self.random_index = index;
    }

    /// Tree depth: a node with only attribute or part operands has depth 1.
    pub fn depth(&self) -> usize {
        1 + self
            .operands
            .iter()
            .map(|op| match op {
                Operand::Rule(rule) => rule.depth(),
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }

    /// Total number of rule nodes in the tree.
    pub fn used_rule_count(&self) -> usize {
        1 + self
            .operands
            .iter()
            .map(|op| match op {
                Operand::Rule(rule) => rule.used_rule_count(),
                _ => 0,
            })
            .sum::<usize>()
    }

    /// Whether any node of the tree is a selection rule.
    pub fn uses_selection_rule(&self) -> bool {
        self.rule.is_selection_rule()
            || self.operands.iter().any(|op| match op {
                Operand::Rule(rule) => rule.uses_selection_rule(),
                Operand::Part(_) => false,
                Operand::Attribute { .. } => false,
            })
    }

    /// First attribute operand of the tree head, the anchor of the current
    /// data path for relation-returning rules.
    pub fn head_attribute(&self) -> Option<Name> {
        match self.operands.first() {
            Some(Operand::Attribute { name, .. }) => Some(*name),
            Some(Operand::Rule(rule)) => rule.head_attribute(),
            _ => None,
        }
    }

    /// Render the formula against the domain's name table. Part operands
    /// are rendered by the caller-provided closure, so the analyser does not
    /// leak into the tree type.
    pub fn render_with<F>(&self, domain: &Domain, render_part: &F) -> String
    where
        F: Fn(PartRef) -> String,
    {
        let mut out = String::from(self.name());
        out.push('(');
        for (i, operand) in self.operands.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            match operand {
                Operand::Attribute { name, .. } => out.push_str(domain.resolve(*name)),
                Operand::Rule(rule) => out.push_str(&rule.render_with(domain, render_part)),
                Operand::Part(part) => out.push_str(&render_part(*part)),
            }
        }
        out.push(')');
        out
    }

    /// Collect every selection-part reference of the tree.
    pub fn collect_part_refs(&self, out: &mut Vec<PartRef>) {
        for operand in &self.operands {
            match operand {
                Operand::Part(part) => out.push(*part),
                Operand::Rule(rule) => rule.collect_part_refs(out),
                Operand::Attribute { .. } => {}
            }
        }
    }

    /// Render with anonymous part placeholders.
    pub fn render(&self, domain: &Domain) -> String {
        self.render_with(domain, &|part: PartRef| {
            format!("selection#{}.{}", part.partition, part.part)
        })
    }
}

fn simple_data_type(kind: TypeKind) -> DataType {
    match kind {
        TypeKind::Numeric => DataType::Numeric,
        TypeKind::Categorical => DataType::Categorical,
        TypeKind::Date => DataType::Date,
        TypeKind::Time => DataType::Time,
        TypeKind::Timestamp => DataType::Timestamp,
        TypeKind::Text => DataType::Text,
        TypeKind::Entity | TypeKind::Table => {
            unreachable!("relation returns resolve through the first operand")
        }
    }
}

/// Sort rules by (cost ascending, random index ascending); reproducible
/// given the shuffle that assigned the indexes.
pub fn sort_by_cost_and_random_index(rules: &mut [ConstructedRule]) {
    rules.sort_by(|a, b| {
        a.cost()
            .partial_cmp(&b.cost())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.random_index().cmp(&b.random_index()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb_core::DomainBuilder;
    use tb_rules::standard_catalogue;

    fn item_domain() -> (Domain, Name, Name) {
        let mut builder = DomainBuilder::new();
        let order = builder.add_class("Order");
        let item = builder.add_class("Item");
        let items = builder
            .add_attribute(order, "Items", DataType::Table(item))
            .unwrap();
        let price = builder
            .add_attribute(item, "Price", DataType::Numeric)
            .unwrap();
        (builder.build(order).unwrap(), items, price)
    }

    #[test]
    fn test_constructed_rule_shape() {
        let (domain, items, price) = item_domain();
        let catalogue = standard_catalogue();
        let mean = Arc::new(catalogue.lookup("TableMean").unwrap().clone());

        let rule = ConstructedRule::new(
            mean,
            vec![
                Operand::Attribute {
                    name: items,
                    data_type: DataType::Table(domain.name_of("Item").unwrap()),
                },
                Operand::Attribute {
                    name: price,
                    data_type: DataType::Numeric,
                },
            ],
            2f64.ln(),
        );
        assert_eq!(rule.data_type(), DataType::Numeric);
        assert_eq!(rule.depth(), 1);
        assert_eq!(rule.used_rule_count(), 1);
        assert!(!rule.uses_selection_rule());
        assert_eq!(rule.render(&domain), "TableMean(Items, Price)");
        assert_eq!(rule.head_attribute(), Some(items));
    }

    #[test]
    fn test_nested_selection_type_resolution() {
        let (domain, items, price) = item_domain();
        let item_class = domain.name_of("Item").unwrap();
        let catalogue = standard_catalogue();
        let selection = Arc::new(catalogue.lookup("TableSelection").unwrap().clone());
        let count = Arc::new(catalogue.lookup("TableCount").unwrap().clone());

        let selected = ConstructedRule::new(
            selection,
            vec![
                Operand::Attribute {
                    name: items,
                    data_type: DataType::Table(item_class),
                },
                Operand::Part(PartRef {
                    class: item_class,
                    partition: 0,
                    part: 0,
                }),
            ],
            1.5,
        );
        // A selection returns the selected sub-table
        assert_eq!(selected.data_type(), DataType::Table(item_class));
        assert!(selected.uses_selection_rule());

        let counted = ConstructedRule::new(count, vec![Operand::Rule(Box::new(selected))], 2.1);
        assert_eq!(counted.data_type(), DataType::Numeric);
        assert_eq!(counted.depth(), 2);
        assert_eq!(counted.used_rule_count(), 2);
        assert!(counted.uses_selection_rule());
        assert_eq!(counted.head_attribute(), Some(items));
        let _ = price;
    }

    #[test]
    fn test_sort_by_cost_and_random_index() {
        let (domain, items, _) = item_domain();
        let catalogue = standard_catalogue();
        let count = Arc::new(catalogue.lookup("TableCount").unwrap().clone());
        let item_class = domain.name_of("Item").unwrap();

        let make = |cost: f64, index: usize| {
            let mut rule = ConstructedRule::new(
                Arc::clone(&count),
                vec![Operand::Attribute {
                    name: items,
                    data_type: DataType::Table(item_class),
                }],
                cost,
            );
            rule.set_random_index(index);
            rule
        };
        let mut rules = vec![make(2.0, 0), make(1.0, 5), make(1.0, 2), make(0.5, 9)];
        sort_by_cost_and_random_index(&mut rules);
        let keys: Vec<(f64, usize)> = rules.iter().map(|r| (r.cost(), r.random_index())).collect();
        assert_eq!(keys, vec![(0.5, 9), (1.0, 2), (1.0, 5), (2.0, 0)]);
    }
}
