//! Feature construction demo: derive aggregate and selection features on a
//! two-table Orders/Items schema.
//!
//! Run: cargo run --example feature_construction

use tb_core::{DataType, DomainBuilder, RunContext};
use tb_construct::SelectionValueSource;
use tb_rules::standard_catalogue;
use tb_solver::{FeatureConstructionSpec, FeatureConstructor};

/// Synthetic item table standing in for the database layer.
struct ItemTable;

impl SelectionValueSource for ItemTable {
    fn numeric_values(&self, _class: &str, operand: &str) -> Option<Vec<f64>> {
        match operand {
            "Price" => Some((0..500).map(|i| (i % 97) as f64 * 1.5).collect()),
            "Quantity" => Some((0..500).map(|i| (i % 7 + 1) as f64).collect()),
            _ => None,
        }
    }

    fn categorical_value_frequencies(&self, _class: &str, operand: &str) -> Option<Vec<u64>> {
        match operand {
            "Category" => Some(vec![260, 150, 60, 30]),
            _ => None,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("=== TABULA feature construction ===");
    println!();

    // Orders 1:N Items schema
    let mut builder = DomainBuilder::new();
    let order = builder.add_class("Order");
    let item = builder.add_class("Item");
    let id = builder.add_attribute(order, "Id", DataType::Categorical).unwrap();
    builder.add_attribute(order, "Date", DataType::Date).unwrap();
    builder
        .add_attribute(order, "Items", DataType::Table(item))
        .unwrap();
    builder.add_attribute(order, "Churn", DataType::Categorical).unwrap();
    builder.add_attribute(item, "Price", DataType::Numeric).unwrap();
    builder.add_attribute(item, "Quantity", DataType::Numeric).unwrap();
    builder
        .add_attribute(item, "Category", DataType::Categorical)
        .unwrap();
    builder.set_key(order, &[id]).unwrap();
    let domain = builder.build(order).unwrap();

    // 40 features from the standard catalogue, predicting Churn
    let mut spec = FeatureConstructionSpec::default();
    spec.set_rule_number(40).unwrap();
    let constructor = FeatureConstructor::new(spec);
    let catalogue = standard_catalogue();
    let mut ctx = RunContext::new(1);

    let result = constructor
        .construct(&domain, &catalogue, Some("Churn"), Some(&ItemTable), &mut ctx)
        .unwrap();

    println!(
        "Constructed {} features in {:.1} ms",
        result.constructed_count,
        result.construction_time.as_secs_f64() * 1000.0
    );
    println!();
    println!("Per family:");
    for (family, count) in &result.family_counts {
        println!("  {family:?}: {count}");
    }
    println!();
    println!("Cheapest features (prior cost in nats):");
    let mut derived: Vec<(&str, f64)> = result
        .domain
        .root_class()
        .attributes()
        .iter()
        .filter(|a| a.is_derived())
        .map(|a| (result.domain.resolve(a.name()), a.derivation().unwrap().cost))
        .collect();
    derived.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    for (name, cost) in derived.iter().take(15) {
        println!("  {cost:8.4}  {name}");
    }
}
