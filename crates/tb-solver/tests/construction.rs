// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! End-to-end feature-construction scenarios.

use tb_core::{DataType, Domain, DomainBuilder, RunContext};
use tb_rules::{standard_catalogue, RuleCatalogue};
use tb_solver::{FeatureConstructionSpec, FeatureConstructor};

/// Single-table domain with a numeric, a categorical and a target column.
fn flat_domain() -> Domain {
    let mut builder = DomainBuilder::new();
    let main = builder.add_class("Main");
    builder.add_attribute(main, "A", DataType::Numeric).unwrap();
    builder.add_attribute(main, "B", DataType::Categorical).unwrap();
    builder.add_attribute(main, "T", DataType::Categorical).unwrap();
    builder.build(main).unwrap()
}

/// Two-table domain: Order 1:N Item(Price).
fn order_item_domain() -> Domain {
    let mut builder = DomainBuilder::new();
    let order = builder.add_class("Order");
    let item = builder.add_class("Item");
    let id = builder.add_attribute(order, "Id", DataType::Categorical).unwrap();
    builder
        .add_attribute(order, "Items", DataType::Table(item))
        .unwrap();
    builder.add_attribute(item, "Price", DataType::Numeric).unwrap();
    builder.set_key(order, &[id]).unwrap();
    builder.build(order).unwrap()
}

fn catalogue_with(names: &[&str]) -> RuleCatalogue {
    let mut catalogue = standard_catalogue();
    let all: Vec<&'static str> = catalogue.rules().iter().map(|r| r.name()).collect();
    for name in all {
        catalogue.set_rule_used(name, names.contains(&name));
    }
    catalogue
}

#[test]
fn trivial_construction_produces_nothing() {
    // No rules: zero constructed variables, the domain comes back as-is
    let domain = flat_domain();
    let catalogue = RuleCatalogue::new();
    let constructor = FeatureConstructor::new(FeatureConstructionSpec::default());
    let mut ctx = RunContext::new(1);

    let result = constructor
        .construct(&domain, &catalogue, Some("T"), None, &mut ctx)
        .unwrap();
    assert_eq!(result.constructed_count, 0);
    assert_eq!(
        result.domain.root_class().attributes().len(),
        domain.root_class().attributes().len()
    );
}

#[test]
fn one_table_aggregation_constructs_count_and_mean() {
    let domain = order_item_domain();
    let catalogue = catalogue_with(&["TableCount", "TableMean"]);
    let mut spec = FeatureConstructionSpec::default();
    spec.set_rule_number(2).unwrap();
    let constructor = FeatureConstructor::new(spec);
    let mut ctx = RunContext::new(1);

    let result = constructor
        .construct(&domain, &catalogue, None, None, &mut ctx)
        .unwrap();
    assert_eq!(result.constructed_count, 2);

    let derived: Vec<(&str, f64)> = result
        .domain
        .root_class()
        .attributes()
        .iter()
        .filter(|a| a.is_derived())
        .map(|a| {
            (
                result.domain.resolve(a.name()),
                a.derivation().unwrap().cost,
            )
        })
        .collect();
    let names: Vec<&str> = derived.iter().map(|&(name, _)| name).collect();
    assert!(names.contains(&"TableCount(Items)"));
    assert!(names.contains(&"TableMean(Items, Price)"));
    // One rule choice among two, one attribute: log(2) + log(1)
    for (name, cost) in derived {
        assert!(
            (cost - 2f64.ln()).abs() < 1e-6,
            "{name} has cost {cost}, expected ln 2"
        );
    }
}

#[test]
fn selection_rules_never_nest() {
    // With Count and Selection active, no produced tree may contain two
    // selection nodes
    let domain = order_item_domain();
    let catalogue = catalogue_with(&["TableCount", "TableSelection"]);
    let mut spec = FeatureConstructionSpec::default();
    spec.set_rule_number(100).unwrap();
    spec.set_max_rule_depth(3).unwrap();
    let constructor = FeatureConstructor::new(spec);
    let mut ctx = RunContext::new(1);

    let result = constructor
        .construct(&domain, &catalogue, None, None, &mut ctx)
        .unwrap();
    assert!(result.constructed_count > 0);

    for attribute in result.domain.root_class().attributes() {
        if let Some(derivation) = attribute.derivation() {
            let selection_count = derivation.formula.matches("TableSelection").count();
            assert!(
                selection_count <= 1,
                "nested selection in {}",
                derivation.formula
            );
        }
    }
}

#[test]
fn construction_is_reproducible() {
    let domain = order_item_domain();
    let catalogue = standard_catalogue();
    let mut spec = FeatureConstructionSpec::default();
    spec.set_rule_number(20).unwrap();
    let constructor = FeatureConstructor::new(spec);

    let run = || {
        let mut ctx = RunContext::new(1);
        let result = constructor
            .construct(&domain, &catalogue, None, None, &mut ctx)
            .unwrap();
        result
            .domain
            .root_class()
            .attributes()
            .iter()
            .filter(|a| a.is_derived())
            .map(|a| {
                format!(
                    "{}:{:.9}",
                    result.domain.resolve(a.name()),
                    a.derivation().unwrap().cost
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn rule_number_bounds_are_respected() {
    let domain = order_item_domain();
    let catalogue = standard_catalogue();
    let mut spec = FeatureConstructionSpec::default();
    spec.set_rule_number(5).unwrap();
    spec.set_max_rule_cost(100.0).unwrap();
    let constructor = FeatureConstructor::new(spec);
    let mut ctx = RunContext::new(1);

    let result = constructor
        .construct(&domain, &catalogue, None, None, &mut ctx)
        .unwrap();
    assert!(result.constructed_count <= 5);
    for attribute in result.domain.root_class().attributes() {
        if let Some(derivation) = attribute.derivation() {
            assert!(derivation.cost >= 0.0);
            assert!(derivation.cost <= 100.0 + 1e-9);
        }
    }
}

#[test]
fn opaque_names_on_request() {
    let domain = order_item_domain();
    let catalogue = catalogue_with(&["TableCount", "TableMean"]);
    let mut spec = FeatureConstructionSpec::default();
    spec.set_rule_number(2).unwrap();
    spec.set_interpretable_names(false);
    let constructor = FeatureConstructor::new(spec);
    let mut ctx = RunContext::new(1);

    let result = constructor
        .construct(&domain, &catalogue, None, None, &mut ctx)
        .unwrap();
    assert_eq!(result.constructed_count, 2);
    assert!(result.domain.name_of("Feature1").is_some());
    assert!(result.domain.name_of("Feature2").is_some());
}
