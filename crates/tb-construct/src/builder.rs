// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Derived-class builder.
//!
//! Materialises accepted constructed rules as derived attributes of a clone
//! of the input domain. Names are either interpretable (the rendered
//! formula) or opaque (`Feature1`, `Feature2`, ...); collisions with
//! existing attributes resolve by numeric suffix, so repeated construction
//! runs keep stable names.

use std::collections::HashMap;

use tb_core::{DataType, Derivation, Domain, PrepResult, TypeKind};
use tb_rules::RuleFamily;

use crate::selection::SelectionAnalyser;
use crate::tree::ConstructedRule;

/// Builds the output schema from accepted rules.
#[derive(Debug, Clone, Copy)]
pub struct ClassBuilder {
    interpretable_names: bool,
}

/// Result of a build: the derived domain and construction accounting.
#[derive(Debug)]
pub struct BuiltDomain {
    /// Clone of the input domain extended with the derived attributes.
    pub domain: Domain,
    /// Number of attributes actually added.
    pub constructed_count: usize,
    /// Constructed-attribute count per rule family of the tree heads.
    pub family_counts: HashMap<RuleFamily, usize>,
}

impl ClassBuilder {
    /// Create a builder; `interpretable_names` selects formula-based names.
    pub fn new(interpretable_names: bool) -> Self {
        Self {
            interpretable_names,
        }
    }

    /// Add one derived attribute per rule to a clone of `domain`.
    ///
    /// Rules producing non-simple values are skipped: the builder is also
    /// usable on hand-assembled rule lists.
    pub fn build_derived_domain(
        &self,
        domain: &Domain,
        rules: &[ConstructedRule],
        analyser: &SelectionAnalyser,
    ) -> PrepResult<BuiltDomain> {
        let mut derived = domain.clone();
        let root = derived.root();
        let mut constructed_count = 0;
        let mut family_counts: HashMap<RuleFamily, usize> = HashMap::new();

        // One intermediate sub-table attribute per selection partition in
        // use; unused, so it never competes with the features themselves
        let mut part_refs = Vec::new();
        for rule in rules {
            rule.collect_part_refs(&mut part_refs);
        }
        let mut partitions: Vec<(tb_core::Name, usize)> = part_refs
            .iter()
            .map(|part| (part.class, part.partition))
            .collect();
        partitions.sort_by_key(|&(class, partition)| (domain.resolve(class).to_string(), partition));
        partitions.dedup();
        for &(class, partition) in &partitions {
            let dimensions = match analyser.class_stats(class) {
                Some(stats) => stats
                    .partition(partition)
                    .dimensions()
                    .iter()
                    .map(|&(operand, granularity)| {
                        format!(
                            "{} at {granularity}",
                            stats.operand(operand).operand().render(domain)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
                None => continue,
            };
            let base_name = format!("{}Partition{}", domain.resolve(class), partition + 1);
            let name = free_name(&derived, root, &base_name);
            let added = derived.add_derived_attribute(
                root,
                &name,
                DataType::Table(class),
                Derivation {
                    formula: format!("Partition({dimensions})"),
                    cost: 0.0,
                },
            )?;
            derived.set_attribute_used(root, added, false)?;
        }

        for (index, rule) in rules.iter().enumerate() {
            let data_type = match rule.data_type().kind() {
                TypeKind::Numeric => DataType::Numeric,
                TypeKind::Categorical => DataType::Categorical,
                _ => continue,
            };
            let formula =
                rule.render_with(domain, &|part| analyser.render_part(domain, part));

            let base_name = if self.interpretable_names {
                formula.clone()
            } else {
                format!("Feature{}", index + 1)
            };
            let name = free_name(&derived, root, &base_name);

            derived.add_derived_attribute(
                root,
                &name,
                data_type,
                Derivation {
                    formula,
                    cost: rule.cost(),
                },
            )?;
            constructed_count += 1;
            *family_counts.entry(rule.rule().family()).or_insert(0) += 1;
        }

        Ok(BuiltDomain {
            domain: derived,
            constructed_count,
            family_counts,
        })
    }
}

fn free_name(domain: &Domain, root: tb_core::Name, base: &str) -> String {
    if domain.is_attribute_name_free(root, base) {
        return base.to_string();
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{base}_{suffix}");
        if domain.is_attribute_name_free(root, &candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tb_core::DomainBuilder;
    use tb_rules::standard_catalogue;

    use crate::tree::Operand;

    fn setup() -> (Domain, Vec<ConstructedRule>) {
        let mut builder = DomainBuilder::new();
        let order = builder.add_class("Order");
        let item = builder.add_class("Item");
        let items = builder
            .add_attribute(order, "Items", DataType::Table(item))
            .unwrap();
        let price = builder
            .add_attribute(item, "Price", DataType::Numeric)
            .unwrap();
        let domain = builder.build(order).unwrap();

        let catalogue = standard_catalogue();
        let count = Arc::new(catalogue.lookup("TableCount").unwrap().clone());
        let mean = Arc::new(catalogue.lookup("TableMean").unwrap().clone());
        let item_class = domain.name_of("Item").unwrap();
        let rules = vec![
            ConstructedRule::new(
                count,
                vec![Operand::Attribute {
                    name: items,
                    data_type: DataType::Table(item_class),
                }],
                2f64.ln(),
            ),
            ConstructedRule::new(
                mean,
                vec![
                    Operand::Attribute {
                        name: items,
                        data_type: DataType::Table(item_class),
                    },
                    Operand::Attribute {
                        name: price,
                        data_type: DataType::Numeric,
                    },
                ],
                2f64.ln(),
            ),
        ];
        (domain, rules)
    }

    #[test]
    fn test_interpretable_names() {
        let (domain, rules) = setup();
        let analyser = SelectionAnalyser::new();
        let built = ClassBuilder::new(true)
            .build_derived_domain(&domain, &rules, &analyser)
            .unwrap();
        assert_eq!(built.constructed_count, 2);
        assert_eq!(built.family_counts.get(&RuleFamily::Aggregate), Some(&2));

        let root = built.domain.root_class();
        let derived: Vec<&str> = root
            .attributes()
            .iter()
            .filter(|a| a.is_derived())
            .map(|a| built.domain.resolve(a.name()))
            .collect();
        assert_eq!(derived, vec!["TableCount(Items)", "TableMean(Items, Price)"]);
        let first = root
            .attribute(built.domain.name_of("TableCount(Items)").unwrap())
            .unwrap();
        assert!((first.derivation().unwrap().cost - 2f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_opaque_names_and_collisions() {
        let (domain, mut rules) = setup();
        // Duplicate the first rule: same formula, name must not collide
        rules.push(rules[0].clone());
        let analyser = SelectionAnalyser::new();

        let built = ClassBuilder::new(false)
            .build_derived_domain(&domain, &rules, &analyser)
            .unwrap();
        assert_eq!(built.constructed_count, 3);
        assert!(built.domain.name_of("Feature1").is_some());
        assert!(built.domain.name_of("Feature3").is_some());

        let built = ClassBuilder::new(true)
            .build_derived_domain(&domain, &rules, &analyser)
            .unwrap();
        assert_eq!(built.constructed_count, 3);
        assert!(built.domain.name_of("TableCount(Items)_2").is_some());
    }

    #[test]
    fn test_original_domain_untouched() {
        let (domain, rules) = setup();
        let analyser = SelectionAnalyser::new();
        let _ = ClassBuilder::new(true)
            .build_derived_domain(&domain, &rules, &analyser)
            .unwrap();
        assert!(domain
            .root_class()
            .attributes()
            .iter()
            .all(|a| !a.is_derived()));
    }
}
