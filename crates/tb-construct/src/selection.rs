// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Selection-operand analyser.
//!
//! Selection rules restrict a sub-table to the records matching a
//! univariate predicate: `operand in partile`, with partiles taken from a
//! power-of-two granularity. The analyser works in two passes:
//!
//! - pass 1, during the dry enumeration run, records every candidate
//!   operand together with *conceptual* partiles (no data is read);
//! - pass 2, fed by a [`SelectionValueSource`], computes the actual
//!   quantile partiles of each recorded operand at each recorded
//!   granularity; operands left without any granularity are disabled.
//!
//! Partitions are the side-tables that own selection parts: a constructed
//! rule references a part by index ([`crate::tree::PartRef`]), so identical
//! parts drawn twice are stored once.

use std::collections::HashMap;

use tb_core::{
    DataType, Domain, Name, QuantileGroupBuilder, QuantileIntervalBuilder, TypeKind,
};

use crate::tree::{ConstructedRule, Operand, PartRef};

/// Largest selection granularity ever sampled.
pub const MAX_SELECTION_GRANULARITY: u32 = 16384;

/// Provider of observed operand values on secondary tables.
///
/// The seam to the database layer: `class` and `operand` are plain rendered
/// names, so the provider needs no knowledge of the engine's internal
/// types.
pub trait SelectionValueSource {
    /// All observed numeric values of `operand` in `class` records, in any
    /// order. `None` when the operand cannot be evaluated.
    fn numeric_values(&self, class: &str, operand: &str) -> Option<Vec<f64>>;

    /// Frequencies of the distinct categorical values of `operand`, sorted
    /// by decreasing frequency.
    fn categorical_value_frequencies(&self, class: &str, operand: &str) -> Option<Vec<u64>>;
}

/// A candidate univariate selection operand.
#[derive(Debug, Clone)]
pub enum SelectionOperand {
    /// A native attribute of the secondary class.
    Attribute { name: Name, data_type: DataType },
    /// A simple constructed rule evaluated in the secondary class.
    Rule(ConstructedRule),
}

impl SelectionOperand {
    /// Kind of the values the operand produces.
    pub fn kind(&self) -> TypeKind {
        match self {
            SelectionOperand::Attribute { data_type, .. } => data_type.kind(),
            SelectionOperand::Rule(rule) => rule.data_type().kind(),
        }
    }

    /// Rendered name, also the canonical identity of the operand.
    pub fn render(&self, domain: &Domain) -> String {
        match self {
            SelectionOperand::Attribute { name, .. } => domain.resolve(*name).to_string(),
            SelectionOperand::Rule(rule) => rule.render(domain),
        }
    }

    /// Total-order key: attributes before rules, then lexicographic.
    pub fn sort_key(&self, domain: &Domain) -> (u8, String) {
        match self {
            SelectionOperand::Attribute { .. } => (0, self.render(domain)),
            SelectionOperand::Rule(_) => (1, self.render(domain)),
        }
    }
}

/// One actual partile of an operand at some granularity.
#[derive(Debug, Clone)]
pub enum SelectionPartile {
    /// Numeric interval `]lower; upper]`.
    Interval { index: usize, lower: f64, upper: f64 },
    /// Group of categorical values.
    Group { index: usize, value_count: usize },
}

impl SelectionPartile {
    /// Partile index within its granularity.
    pub fn index(&self) -> usize {
        match self {
            SelectionPartile::Interval { index, .. } | SelectionPartile::Group { index, .. } => {
                *index
            }
        }
    }
}

/// Actual partiles of an operand at one granularity.
#[derive(Debug, Clone)]
pub struct GranularityPartiles {
    /// Power of two.
    pub granularity: u32,
    /// `log2(granularity)`.
    pub exponent: u32,
    /// Observed partiles; may be fewer than `granularity`.
    pub partiles: Vec<SelectionPartile>,
}

/// Statistics of one candidate selection operand.
#[derive(Debug)]
pub struct SelectionOperandStats {
    operand: SelectionOperand,
    granularities: Vec<GranularityPartiles>,
}

impl SelectionOperandStats {
    /// The operand.
    pub fn operand(&self) -> &SelectionOperand {
        &self.operand
    }

    /// Granularities with data-driven partiles (pass 2 only).
    pub fn granularities(&self) -> &[GranularityPartiles] {
        &self.granularities
    }

    /// Number of available granularities.
    pub fn granularity_count(&self) -> usize {
        self.granularities.len()
    }

    /// Partiles at a given granularity, when computed.
    pub fn partiles_at(&self, granularity: u32) -> Option<&GranularityPartiles> {
        self.granularities
            .iter()
            .find(|g| g.granularity == granularity)
    }
}

/// One selection part: a conjunction of (dimension, partile) choices.
#[derive(Debug, Clone)]
pub struct SelectionPart {
    /// Partile index per partition dimension.
    pub partile_indexes: Vec<usize>,
    /// Prior cost of drawing this part.
    pub cost: f64,
}

/// A canonical multivariate partition over selection operands.
///
/// Dimensions are `(operand index, granularity)` pairs kept sorted by the
/// total operand order, so a partition drawn through different random paths
/// is stored once.
#[derive(Debug)]
pub struct SelectionPartition {
    dimensions: Vec<(usize, u32)>,
    parts: Vec<SelectionPart>,
    part_index: HashMap<Vec<usize>, usize>,
}

impl SelectionPartition {
    /// Dimensions as (operand index, granularity), in canonical order.
    pub fn dimensions(&self) -> &[(usize, u32)] {
        &self.dimensions
    }

    /// All registered parts.
    pub fn parts(&self) -> &[SelectionPart] {
        &self.parts
    }

    /// Part by index.
    pub fn part(&self, index: usize) -> &SelectionPart {
        &self.parts[index]
    }
}

/// Selection statistics of one secondary class.
#[derive(Debug, Default)]
pub struct ClassSelectionStats {
    operands: Vec<SelectionOperandStats>,
    operand_index: HashMap<String, usize>,
    partitions: Vec<SelectionPartition>,
    partition_index: HashMap<Vec<(usize, u32)>, usize>,
}

impl ClassSelectionStats {
    /// All registered operands.
    pub fn operands(&self) -> &[SelectionOperandStats] {
        &self.operands
    }

    /// Operand stats by index.
    pub fn operand(&self, index: usize) -> &SelectionOperandStats {
        &self.operands[index]
    }

    /// All partitions.
    pub fn partitions(&self) -> &[SelectionPartition] {
        &self.partitions
    }

    /// Partition by index.
    pub fn partition(&self, index: usize) -> &SelectionPartition {
        &self.partitions[index]
    }
}

/// The two-pass selection-operand analyser.
#[derive(Debug, Default)]
pub struct SelectionAnalyser {
    classes: Vec<(Name, ClassSelectionStats)>,
    index: HashMap<Name, usize>,
    stats_computed: bool,
}

impl SelectionAnalyser {
    /// Create an empty analyser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether pass 2 has run.
    pub fn is_stats_computed(&self) -> bool {
        self.stats_computed
    }

    /// Discard everything.
    pub fn clean_all(&mut self) {
        self.classes.clear();
        self.index.clear();
        self.stats_computed = false;
    }

    /// Stats of a secondary class, if any operand was recorded for it.
    pub fn class_stats(&self, class: Name) -> Option<&ClassSelectionStats> {
        self.index.get(&class).map(|&i| &self.classes[i].1)
    }

    fn class_stats_entry(&mut self, class: Name) -> &mut ClassSelectionStats {
        let index = match self.index.get(&class) {
            Some(&i) => i,
            None => {
                self.index.insert(class, self.classes.len());
                self.classes.push((class, ClassSelectionStats::default()));
                self.classes.len() - 1
            }
        };
        &mut self.classes[index].1
    }

    /// Register a candidate operand for `class`, deduplicated by rendered
    /// identity. Returns its operand index.
    pub fn register_operand(
        &mut self,
        domain: &Domain,
        class: Name,
        operand: SelectionOperand,
    ) -> usize {
        let key = operand.render(domain);
        let stats = self.class_stats_entry(class);
        if let Some(&existing) = stats.operand_index.get(&key) {
            return existing;
        }
        let index = stats.operands.len();
        stats.operand_index.insert(key, index);
        stats.operands.push(SelectionOperandStats {
            operand,
            granularities: Vec::new(),
        });
        index
    }

    /// Register a drawn part, creating its canonical partition on first
    /// sight. `dimensions` must already be in canonical operand order.
    pub fn register_part(
        &mut self,
        class: Name,
        dimensions: Vec<(usize, u32)>,
        partile_indexes: Vec<usize>,
        cost: f64,
    ) -> PartRef {
        // Dimensions arrive in canonical operand order; they must at least
        // be pairwise distinct
        debug_assert!({
            let mut seen = dimensions.iter().map(|d| d.0).collect::<Vec<_>>();
            seen.sort_unstable();
            seen.windows(2).all(|w| w[0] != w[1])
        });
        let stats = self.class_stats_entry(class);
        let partition = match stats.partition_index.get(&dimensions) {
            Some(&i) => i,
            None => {
                let i = stats.partitions.len();
                stats.partition_index.insert(dimensions.clone(), i);
                stats.partitions.push(SelectionPartition {
                    dimensions,
                    parts: Vec::new(),
                    part_index: HashMap::new(),
                });
                i
            }
        };
        let partition_entry = &mut stats.partitions[partition];
        let part = match partition_entry.part_index.get(&partile_indexes) {
            Some(&i) => i,
            None => {
                let i = partition_entry.parts.len();
                partition_entry
                    .part_index
                    .insert(partile_indexes.clone(), i);
                partition_entry.parts.push(SelectionPart {
                    partile_indexes,
                    cost,
                });
                i
            }
        };
        PartRef {
            class,
            partition,
            part,
        }
    }

    /// Render a part for formula display.
    pub fn render_part(&self, domain: &Domain, part: PartRef) -> String {
        let stats = match self.class_stats(part.class) {
            Some(stats) => stats,
            None => return format!("selection#{}.{}", part.partition, part.part),
        };
        let partition = stats.partition(part.partition);
        let selection = partition.part(part.part);
        let mut out = String::new();
        for (dim, &(operand_index, granularity)) in partition.dimensions().iter().enumerate() {
            if dim > 0 {
                out.push_str(" and ");
            }
            let operand_stats = stats.operand(operand_index);
            let operand_name = operand_stats.operand().render(domain);
            let partile_index = selection.partile_indexes[dim];
            match operand_stats
                .partiles_at(granularity)
                .and_then(|g| g.partiles.iter().find(|p| p.index() == partile_index))
            {
                Some(SelectionPartile::Interval { lower, upper, .. }) => {
                    out.push_str(&format!("{operand_name} in ]{lower};{upper}]"));
                }
                Some(SelectionPartile::Group { index, .. }) => {
                    out.push_str(&format!("{operand_name} in group {}", index + 1));
                }
                None => {
                    out.push_str(&format!(
                        "{operand_name} in partile {}/{}",
                        partile_index + 1,
                        granularity
                    ));
                }
            }
        }
        out
    }

    /// Pass 2: compute actual quantile partiles for every (operand,
    /// granularity) pair recorded by the dry run, then discard the
    /// conceptual partitions (surviving pass-1 rules are discarded by the
    /// caller before regeneration).
    ///
    /// Returns false when no operand could be evaluated at all.
    pub fn compute_stats(&mut self, domain: &Domain, source: &dyn SelectionValueSource) -> bool {
        let mut any_operand_usable = false;
        for (class, stats) in &mut self.classes {
            let class_name = domain.resolve(*class).to_string();

            // Granularities recorded per operand by the drawn partitions
            let mut granularities_per_operand: Vec<Vec<u32>> =
                vec![Vec::new(); stats.operands.len()];
            for partition in &stats.partitions {
                for &(operand_index, granularity) in partition.dimensions() {
                    let list = &mut granularities_per_operand[operand_index];
                    if !list.contains(&granularity) {
                        list.push(granularity);
                    }
                }
            }

            for (operand_index, operand_stats) in stats.operands.iter_mut().enumerate() {
                let mut granularities = granularities_per_operand[operand_index].clone();
                granularities.sort_unstable();
                let operand_name = operand_stats.operand.render(domain);
                operand_stats.granularities.clear();

                for granularity in granularities {
                    let partiles = match operand_stats.operand.kind() {
                        TypeKind::Numeric => numeric_partiles(
                            source,
                            &class_name,
                            &operand_name,
                            granularity,
                        ),
                        TypeKind::Categorical => categorical_partiles(
                            source,
                            &class_name,
                            &operand_name,
                            granularity,
                        ),
                        _ => None,
                    };
                    if let Some(partiles) = partiles {
                        // A single partile selects everything: useless
                        if partiles.len() >= 2 {
                            operand_stats.granularities.push(GranularityPartiles {
                                granularity,
                                exponent: granularity.trailing_zeros(),
                                partiles,
                            });
                        }
                    }
                }
                if operand_stats.granularity_count() > 0 {
                    any_operand_usable = true;
                }
            }

            // Conceptual partitions die with the pass-1 rules
            stats.partitions.clear();
            stats.partition_index.clear();
        }
        self.stats_computed = any_operand_usable;
        any_operand_usable
    }
}

fn numeric_partiles(
    source: &dyn SelectionValueSource,
    class: &str,
    operand: &str,
    granularity: u32,
) -> Option<Vec<SelectionPartile>> {
    let values = source.numeric_values(class, operand)?;
    if values.is_empty() {
        return None;
    }
    let mut builder = QuantileIntervalBuilder::from_raw(values);
    let count = builder.compute_quantiles(granularity as usize);
    let mut partiles = Vec::with_capacity(count);
    for i in 0..count {
        let (lower, upper) = builder.interval_bounds(i);
        partiles.push(SelectionPartile::Interval {
            index: i,
            lower,
            upper,
        });
    }
    Some(partiles)
}

fn categorical_partiles(
    source: &dyn SelectionValueSource,
    class: &str,
    operand: &str,
    granularity: u32,
) -> Option<Vec<SelectionPartile>> {
    let frequencies = source.categorical_value_frequencies(class, operand)?;
    if frequencies.is_empty() {
        return None;
    }
    let mut builder = QuantileGroupBuilder::from_frequencies(frequencies);
    let count = builder.compute_quantiles(granularity as usize);
    let mut partiles = Vec::with_capacity(count);
    for g in 0..count {
        let value_count =
            builder.group_last_value_index(g) - builder.group_first_value_index(g) + 1;
        partiles.push(SelectionPartile::Group {
            index: g,
            value_count,
        });
    }
    Some(partiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb_core::DomainBuilder;

    struct StubSource;

    impl SelectionValueSource for StubSource {
        fn numeric_values(&self, _class: &str, operand: &str) -> Option<Vec<f64>> {
            if operand == "Price" {
                Some((0..64).map(f64::from).collect())
            } else {
                None
            }
        }

        fn categorical_value_frequencies(&self, _class: &str, operand: &str) -> Option<Vec<u64>> {
            if operand == "Label" {
                Some(vec![40, 20, 4])
            } else {
                None
            }
        }
    }

    fn setup() -> (Domain, Name, Name, Name) {
        let mut builder = DomainBuilder::new();
        let order = builder.add_class("Order");
        let item = builder.add_class("Item");
        builder
            .add_attribute(order, "Items", DataType::Table(item))
            .unwrap();
        let price = builder
            .add_attribute(item, "Price", DataType::Numeric)
            .unwrap();
        let label = builder
            .add_attribute(item, "Label", DataType::Categorical)
            .unwrap();
        (builder.build(order).unwrap(), item, price, label)
    }

    #[test]
    fn test_operand_registration_dedups() {
        let (domain, item, price, _) = setup();
        let mut analyser = SelectionAnalyser::new();
        let a = analyser.register_operand(
            &domain,
            item,
            SelectionOperand::Attribute {
                name: price,
                data_type: DataType::Numeric,
            },
        );
        let b = analyser.register_operand(
            &domain,
            item,
            SelectionOperand::Attribute {
                name: price,
                data_type: DataType::Numeric,
            },
        );
        assert_eq!(a, b);
        assert_eq!(analyser.class_stats(item).unwrap().operands().len(), 1);
    }

    #[test]
    fn test_part_registration_dedups() {
        let (domain, item, price, _) = setup();
        let mut analyser = SelectionAnalyser::new();
        let op = analyser.register_operand(
            &domain,
            item,
            SelectionOperand::Attribute {
                name: price,
                data_type: DataType::Numeric,
            },
        );
        let p1 = analyser.register_part(item, vec![(op, 4)], vec![2], 1.5);
        let p2 = analyser.register_part(item, vec![(op, 4)], vec![2], 1.5);
        let p3 = analyser.register_part(item, vec![(op, 4)], vec![3], 1.5);
        assert_eq!(p1, p2);
        assert_ne!(p1.part, p3.part);
        assert_eq!(p1.partition, p3.partition);
        assert_eq!(
            analyser.class_stats(item).unwrap().partition(0).parts().len(),
            2
        );
    }

    #[test]
    fn test_compute_stats_builds_partiles_and_disables_dead_operands() {
        let (domain, item, price, label) = setup();
        let mut analyser = SelectionAnalyser::new();
        let price_op = analyser.register_operand(
            &domain,
            item,
            SelectionOperand::Attribute {
                name: price,
                data_type: DataType::Numeric,
            },
        );
        let label_op = analyser.register_operand(
            &domain,
            item,
            SelectionOperand::Attribute {
                name: label,
                data_type: DataType::Categorical,
            },
        );
        analyser.register_part(item, vec![(price_op, 4)], vec![1], 1.0);
        analyser.register_part(item, vec![(price_op, 8)], vec![0], 1.2);
        analyser.register_part(item, vec![(label_op, 2)], vec![0], 0.9);

        assert!(analyser.compute_stats(&domain, &StubSource));
        assert!(analyser.is_stats_computed());

        let stats = analyser.class_stats(item).unwrap();
        let price_stats = stats.operand(price_op);
        assert_eq!(price_stats.granularity_count(), 2);
        let g4 = price_stats.partiles_at(4).unwrap();
        assert_eq!(g4.partiles.len(), 4);
        assert_eq!(g4.exponent, 2);

        let label_stats = stats.operand(label_op);
        assert_eq!(label_stats.granularity_count(), 1);

        // Conceptual partitions were discarded
        assert!(stats.partitions().is_empty());
    }

    #[test]
    fn test_compute_stats_with_no_usable_operand() {
        let (domain, item, _, _) = setup();
        let mut analyser = SelectionAnalyser::new();
        let ghost = domain.name_of("Items").unwrap();
        analyser.register_operand(
            &domain,
            item,
            SelectionOperand::Attribute {
                name: ghost,
                data_type: DataType::Numeric,
            },
        );
        assert!(!analyser.compute_stats(&domain, &StubSource));
        assert!(!analyser.is_stats_computed());
    }
}
