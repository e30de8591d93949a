// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Grid export operations.
//!
//! Every derived grid is re-exported from a source grid over the same
//! elementary-value universes: terminal (one part per attribute),
//! granularized (quantile partitions at a power-of-two partile count),
//! randomized (neighbour generation), and the VarPart merge exports used by
//! the post-optimization loop. Exports never mutate the source.

use rand::seq::index::sample;
use rand::Rng;

use tb_core::{QuantileGroupBuilder, QuantileIntervalBuilder};

use crate::cost::GridCostModel;
use crate::grid::{
    Cluster, DataGrid, GridAttribute, GridAttributeKind, Interval, Part, ValueGroup, VarPartToken,
};
use crate::varpart::InnerAttributes;

/// Per-attribute quantile state used across a granularity sweep.
#[derive(Debug, Clone)]
pub enum QuantileHolder {
    /// Numeric attribute: equal-frequency intervals.
    Interval(QuantileIntervalBuilder),
    /// Categorical attribute: frequency-ordered groups.
    Group(QuantileGroupBuilder),
    /// VarPart attribute: granularized through its inner attributes.
    VarPart,
}

/// Pure export operations from one source grid.
pub struct GridExporter<'a> {
    source: &'a DataGrid,
}

impl<'a> GridExporter<'a> {
    /// Create an exporter over `source`.
    pub fn new(source: &'a DataGrid) -> Self {
        Self { source }
    }

    /// The source grid.
    pub fn source(&self) -> &DataGrid {
        self.source
    }

    /// Terminal grid: one part per attribute, a single cell.
    pub fn export_terminal(&self) -> DataGrid {
        let mut out = DataGrid::new(self.source.target_value_count());
        out.set_granularity(self.source.granularity());
        if let Some(inner) = self.source.inner_attributes() {
            out.set_inner_attributes(inner.clone());
        }
        for attribute in self.source.attributes() {
            out.add_attribute(full_partition(attribute, self.source));
        }

        let mut frequency = 0u64;
        let mut target_frequencies = vec![0u64; self.source.target_value_count()];
        for cell in self.source.cells() {
            frequency += cell.frequency;
            for (slot, &f) in target_frequencies.iter_mut().zip(&cell.target_frequencies) {
                *slot += f;
            }
        }
        if frequency > 0 {
            out.add_cell(
                vec![0; self.source.attribute_count()],
                frequency,
                &target_frequencies,
            );
        }
        out
    }

    /// Quantile builders per attribute, plus the maximum part number each
    /// attribute can reach.
    pub fn attribute_quantiles(&self) -> (Vec<QuantileHolder>, Vec<usize>) {
        let mut holders = Vec::with_capacity(self.source.attribute_count());
        let mut max_part_numbers = Vec::with_capacity(self.source.attribute_count());
        for attribute in self.source.attributes() {
            match attribute.kind() {
                GridAttributeKind::Numeric => {
                    holders.push(QuantileHolder::Interval(
                        QuantileIntervalBuilder::from_sorted_values(
                            attribute.numeric_values().to_vec(),
                            attribute.value_frequencies().to_vec(),
                        ),
                    ));
                    max_part_numbers.push(attribute.initial_value_count());
                }
                GridAttributeKind::Categorical => {
                    holders.push(QuantileHolder::Group(QuantileGroupBuilder::from_frequencies(
                        attribute.value_frequencies().to_vec(),
                    )));
                    max_part_numbers.push(attribute.initial_value_count());
                }
                GridAttributeKind::VarPart => {
                    holders.push(QuantileHolder::VarPart);
                    max_part_numbers.push(attribute.initial_value_count());
                }
            }
        }
        (holders, max_part_numbers)
    }

    /// Granularize the source at level `granularity` (2^granularity
    /// partiles per attribute). The source must carry elementary parts.
    pub fn export_granularized(
        &self,
        granularity: u32,
        holders: &mut [QuantileHolder],
    ) -> DataGrid {
        let partile_count = 1usize << granularity.min(62);
        let mut out = DataGrid::new(self.source.target_value_count());
        out.set_granularity(granularity);
        if let Some(inner) = self.source.inner_attributes() {
            out.set_inner_attributes(inner.clone());
        }

        for (index, attribute) in self.source.attributes().iter().enumerate() {
            let mut granularized = attribute.clone();
            granularized.set_granularity(granularity);
            match &mut holders[index] {
                QuantileHolder::Interval(builder) => {
                    let actual = builder.compute_quantiles(partile_count);
                    let mut parts = Vec::with_capacity(actual);
                    for i in 0..actual {
                        let (first_value, last_value) = builder.interval_value_range(i);
                        let (lower, upper) = builder.interval_bounds(i);
                        parts.push(Part::Interval(Interval {
                            first_value,
                            last_value,
                            lower,
                            upper,
                        }));
                    }
                    granularized.set_parts(parts);
                    granularized.set_granularized_value_count(actual);
                }
                QuantileHolder::Group(builder) => {
                    let actual = builder.compute_quantiles(partile_count);
                    let mut parts = Vec::with_capacity(actual);
                    for g in 0..actual {
                        let first = builder.group_first_value_index(g);
                        let last = builder.group_last_value_index(g);
                        parts.push(Part::ValueGroup(ValueGroup {
                            value_indexes: (first..=last).collect(),
                        }));
                    }
                    granularized.set_parts(parts);
                    granularized.set_granularized_value_count(actual);
                }
                QuantileHolder::VarPart => {
                    // VarPart axes keep their token partition; granularity
                    // acts through the regular axes
                }
            }
            out.add_attribute(granularized);
        }

        self.fill_cells(&mut out);
        out
    }

    /// Export the source cells onto a grid whose attributes (a subset of
    /// the source's, identified by name) carry arbitrary partitions over
    /// the same universes.
    pub fn export_with_partitions(&self, attributes: Vec<GridAttribute>) -> DataGrid {
        let mut out = DataGrid::new(self.source.target_value_count());
        out.set_granularity(self.source.granularity());
        if let Some(inner) = self.source.inner_attributes() {
            out.set_inner_attributes(inner.clone());
        }
        for attribute in attributes {
            debug_assert!(self.source.attribute_named(attribute.name()).is_some());
            out.add_attribute(attribute);
        }
        self.fill_cells(&mut out);
        out
    }

    /// Random partition of one source attribute into (about) `part_count`
    /// parts, built on the source partition's atoms.
    pub fn random_partition<R: Rng>(
        &self,
        attribute_index: usize,
        part_count: usize,
        rng: &mut R,
    ) -> GridAttribute {
        let attribute = self.source.attribute(attribute_index);
        let mut out = attribute.clone();
        match attribute.kind() {
            GridAttributeKind::Numeric => {
                // Candidate boundaries are the source interval starts
                let mut starts: Vec<usize> = attribute
                    .parts()
                    .iter()
                    .filter_map(|p| match p {
                        Part::Interval(i) if i.first_value > 0 => Some(i.first_value),
                        _ => None,
                    })
                    .collect();
                starts.sort_unstable();
                let cut_count = part_count.saturating_sub(1).min(starts.len());
                let mut cuts: Vec<usize> = sample(rng, starts.len(), cut_count)
                    .into_iter()
                    .map(|i| starts[i])
                    .collect();
                cuts.sort_unstable();

                let values = attribute.numeric_values();
                let last_index = attribute.initial_value_count() - 1;
                let mut parts = Vec::with_capacity(cut_count + 1);
                let mut first = 0usize;
                for &cut in cuts.iter().chain(std::iter::once(&(last_index + 1))) {
                    let last = cut - 1;
                    let lower = if first == 0 {
                        f64::NEG_INFINITY
                    } else {
                        (values[first - 1] + values[first]) / 2.0
                    };
                    let upper = if last >= last_index {
                        f64::INFINITY
                    } else {
                        (values[last] + values[last + 1]) / 2.0
                    };
                    parts.push(Part::Interval(Interval {
                        first_value: first,
                        last_value: last,
                        lower,
                        upper,
                    }));
                    first = cut;
                }
                out.set_parts(parts);
            }
            GridAttributeKind::Categorical => {
                // Scatter the source groups over the requested group count
                let bucket_count = part_count.max(1);
                let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); bucket_count];
                for part in attribute.parts() {
                    if let Part::ValueGroup(group) = part {
                        let bucket = rng.gen_range(0..bucket_count);
                        buckets[bucket].extend(group.value_indexes.iter().copied());
                    }
                }
                let mut parts = Vec::new();
                for mut bucket in buckets {
                    if !bucket.is_empty() {
                        bucket.sort_unstable();
                        parts.push(Part::ValueGroup(ValueGroup {
                            value_indexes: bucket,
                        }));
                    }
                }
                out.set_parts(parts);
            }
            GridAttributeKind::VarPart => {
                // VarPart partitions are reshuffled by the dedicated
                // post-optimization, not by random neighbours
            }
        }
        out
    }

    /// Merge adjacent numeric inner parts whose tokens share a cluster.
    ///
    /// Cells are untouched (cluster contents only lose internal
    /// boundaries), so the returned delta is exactly the change of the
    /// VarPart attribute's model cost: `C_merged = C_origin + delta`.
    pub fn export_with_varpart_merge(
        &self,
        costs: &dyn GridCostModel,
    ) -> Option<(DataGrid, f64)> {
        let varpart_index = self.source.var_part_attribute()?;
        let inner = self.source.inner_attributes()?;
        let varpart_attribute = self.source.attribute(varpart_index);

        // New inner partitions: fuse runs of adjacent parts clustered
        // together; record the old-to-new part mapping per inner attribute
        let mut merged_inner: Vec<GridAttribute> = Vec::with_capacity(inner.attributes().len());
        let mut part_maps: Vec<Vec<usize>> = Vec::with_capacity(inner.attributes().len());
        for (inner_index, inner_attribute) in inner.attributes().iter().enumerate() {
            let mut merged = inner_attribute.clone();
            let mut map = vec![0usize; inner_attribute.part_count()];
            if inner_attribute.kind() != GridAttributeKind::Numeric {
                for (i, slot) in map.iter_mut().enumerate() {
                    *slot = i;
                }
                merged_inner.push(merged);
                part_maps.push(map);
                continue;
            }

            // Order parts by value range; merge neighbours in one cluster
            let mut order: Vec<usize> = (0..inner_attribute.part_count()).collect();
            order.sort_by_key(|&p| match &inner_attribute.parts()[p] {
                Part::Interval(i) => i.first_value,
                _ => usize::MAX,
            });
            let mut new_parts: Vec<Part> = Vec::new();
            let mut previous_cluster: Option<usize> = None;
            for &old_part in &order {
                let token = VarPartToken {
                    inner_attribute: inner_index,
                    inner_part: old_part,
                };
                let cluster = varpart_attribute.part_for_token(token);
                let mergeable = cluster.is_some() && cluster == previous_cluster;
                if mergeable {
                    if let (Some(Part::Interval(last)), Part::Interval(current)) = (
                        new_parts.last_mut(),
                        &inner_attribute.parts()[old_part],
                    ) {
                        last.last_value = current.last_value;
                        last.upper = current.upper;
                    }
                } else {
                    new_parts.push(inner_attribute.parts()[old_part].clone());
                }
                map[old_part] = new_parts.len() - 1;
                previous_cluster = cluster;
            }
            merged.set_parts(new_parts);
            merged_inner.push(merged);
            part_maps.push(map);
        }

        // Rebuild clusters over the merged tokens
        let mut merged_varpart = varpart_attribute.clone();
        let mut new_clusters: Vec<Part> = Vec::with_capacity(varpart_attribute.part_count());
        for part in varpart_attribute.parts() {
            if let Part::Cluster(cluster) = part {
                let mut tokens: Vec<VarPartToken> = cluster
                    .tokens
                    .iter()
                    .map(|t| VarPartToken {
                        inner_attribute: t.inner_attribute,
                        inner_part: part_maps[t.inner_attribute][t.inner_part],
                    })
                    .collect();
                tokens.sort_unstable();
                tokens.dedup();
                new_clusters.push(Part::Cluster(Cluster { tokens }));
            }
        }
        merged_varpart.set_parts(new_clusters);

        let merged_inner = InnerAttributes::new(merged_inner, inner.varpart_granularity());
        let token_count = merged_inner.token_count();
        merged_varpart.set_granularized_value_count(token_count);

        let mut merged_grid = DataGrid::new(self.source.target_value_count());
        merged_grid.set_granularity(self.source.granularity());
        merged_grid.set_inner_attributes(merged_inner);
        for (index, attribute) in self.source.attributes().iter().enumerate() {
            if index == varpart_index {
                merged_grid.add_attribute(merged_varpart.clone());
            } else {
                merged_grid.add_attribute(attribute.clone());
            }
        }
        for cell in self.source.cells() {
            merged_grid.add_cell(
                cell.part_indexes.clone(),
                cell.frequency,
                &cell.target_frequencies,
            );
        }

        let delta = costs.attribute_cost(&merged_grid, varpart_index)
            - costs.attribute_cost(self.source, varpart_index);
        Some((merged_grid, delta))
    }

    /// Reference grid with one singleton cluster per token of `merged`'s
    /// inner attributes; cells are re-exported from the source (which must
    /// carry token-level clusters).
    pub fn export_with_singleton_varparts(&self, merged: &DataGrid) -> Option<DataGrid> {
        let varpart_index = merged.var_part_attribute()?;
        let merged_inner = merged.inner_attributes()?;

        let mut out = DataGrid::new(self.source.target_value_count());
        out.set_granularity(merged.granularity());
        out.set_inner_attributes(merged_inner.clone());
        for (index, attribute) in merged.attributes().iter().enumerate() {
            if index == varpart_index {
                let mut singleton = attribute.clone();
                let parts: Vec<Part> = merged_inner
                    .tokens()
                    .map(|token| Part::Cluster(Cluster {
                        tokens: vec![token],
                    }))
                    .collect();
                singleton.set_parts(parts);
                out.add_attribute(singleton);
            } else {
                out.add_attribute(attribute.clone());
            }
        }
        self.fill_cells(&mut out);
        Some(out)
    }

    /// Map every source cell through the target partitions.
    fn fill_cells(&self, target: &mut DataGrid) {
        // Source attribute index and mapping mode per target attribute
        let mut source_indexes = Vec::with_capacity(target.attribute_count());
        for attribute in target.attributes() {
            source_indexes.push(
                self.source
                    .attribute_named(attribute.name())
                    .expect("target attributes come from the source"),
            );
        }

        let mut mapped_cells: Vec<(Vec<usize>, u64, Vec<u64>)> = Vec::new();
        for cell in self.source.cells() {
            let mut part_indexes = Vec::with_capacity(target.attribute_count());
            let mut valid = true;
            for (target_attribute, &source_attribute) in source_indexes.iter().enumerate() {
                let source_part = cell.part_indexes[source_attribute];
                let target_part = self.map_part(
                    target.attribute(target_attribute),
                    target,
                    source_attribute,
                    source_part,
                );
                match target_part {
                    Some(part) => part_indexes.push(part),
                    None => {
                        valid = false;
                        break;
                    }
                }
            }
            if valid {
                mapped_cells.push((part_indexes, cell.frequency, cell.target_frequencies.clone()));
            }
        }
        for (part_indexes, frequency, target_frequencies) in mapped_cells {
            target.add_cell(part_indexes, frequency, &target_frequencies);
        }
    }

    /// Locate the target part receiving one source part.
    fn map_part(
        &self,
        target_attribute: &GridAttribute,
        target: &DataGrid,
        source_attribute: usize,
        source_part: usize,
    ) -> Option<usize> {
        let source_attr = self.source.attribute(source_attribute);
        match &source_attr.parts()[source_part] {
            Part::Interval(interval) => target_attribute.part_for_value(interval.first_value),
            Part::ValueGroup(group) => {
                target_attribute.part_for_value(*group.value_indexes.first()?)
            }
            Part::Cluster(cluster) => {
                // Map through the first token: locate the target inner part
                // covering the source inner part, then its cluster
                let token = *cluster.tokens.first()?;
                let source_inner =
                    &self.source.inner_attributes()?.attributes()[token.inner_attribute];
                let first_value = match &source_inner.parts()[token.inner_part] {
                    Part::Interval(i) => i.first_value,
                    Part::ValueGroup(g) => *g.value_indexes.first()?,
                    Part::Cluster(_) => return None,
                };
                let target_inner =
                    &target.inner_attributes()?.attributes()[token.inner_attribute];
                let target_inner_part = target_inner.part_for_value(first_value)?;
                target_attribute.part_for_token(VarPartToken {
                    inner_attribute: token.inner_attribute,
                    inner_part: target_inner_part,
                })
            }
        }
    }
}

fn full_partition(attribute: &GridAttribute, grid: &DataGrid) -> GridAttribute {
    let mut out = attribute.clone();
    match attribute.kind() {
        GridAttributeKind::Numeric => {
            out.set_parts(vec![Part::Interval(Interval {
                first_value: 0,
                last_value: attribute.initial_value_count().saturating_sub(1),
                lower: f64::NEG_INFINITY,
                upper: f64::INFINITY,
            })]);
        }
        GridAttributeKind::Categorical => {
            out.set_parts(vec![Part::ValueGroup(ValueGroup {
                value_indexes: (0..attribute.initial_value_count()).collect(),
            })]);
        }
        GridAttributeKind::VarPart => {
            let tokens: Vec<VarPartToken> = grid
                .inner_attributes()
                .map(|inner| inner.tokens().collect())
                .unwrap_or_default();
            out.set_parts(vec![Part::Cluster(Cluster { tokens })]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{build_initial_grid, GridColumn};

    fn initial_grid() -> DataGrid {
        let values: Vec<f64> = (0..100).map(f64::from).collect();
        let target: Vec<String> = (0..100)
            .map(|i| if i < 50 { "a".to_string() } else { "b".to_string() })
            .collect();
        build_initial_grid(
            &[GridColumn::Numeric {
                name: "X".to_string(),
                values,
            }],
            Some(&target),
        )
        .unwrap()
    }

    #[test]
    fn test_export_terminal() {
        let grid = initial_grid();
        let terminal = GridExporter::new(&grid).export_terminal();
        assert_eq!(terminal.attribute_count(), 1);
        assert_eq!(terminal.attribute(0).part_count(), 1);
        assert_eq!(terminal.cell_count(), 1);
        assert_eq!(terminal.grid_frequency(), 100);
        assert_eq!(terminal.cells()[0].target_frequencies, vec![50, 50]);
        assert!(terminal.check().is_ok());
    }

    #[test]
    fn test_export_granularized() {
        let grid = initial_grid();
        let exporter = GridExporter::new(&grid);
        let (mut holders, max_parts) = exporter.attribute_quantiles();
        assert_eq!(max_parts, vec![100]);

        let g2 = exporter.export_granularized(2, &mut holders);
        assert_eq!(g2.attribute(0).part_count(), 4);
        assert_eq!(g2.attribute(0).granularized_value_count(), 4);
        assert_eq!(g2.granularity(), 2);
        assert_eq!(g2.grid_frequency(), 100);
        assert!(g2.check().is_ok());
        // Each quartile holds 25 instances
        assert_eq!(g2.part_frequencies(0), vec![25, 25, 25, 25]);
    }

    #[test]
    fn test_export_with_partitions_maps_cells() {
        let grid = initial_grid();
        let exporter = GridExporter::new(&grid);
        let mut attribute = grid.attribute(0).clone();
        attribute.set_parts(vec![
            Part::Interval(Interval {
                first_value: 0,
                last_value: 49,
                lower: f64::NEG_INFINITY,
                upper: 49.5,
            }),
            Part::Interval(Interval {
                first_value: 50,
                last_value: 99,
                lower: 49.5,
                upper: f64::INFINITY,
            }),
        ]);
        let out = exporter.export_with_partitions(vec![attribute]);
        assert_eq!(out.cell_count(), 2);
        assert_eq!(out.part_frequencies(0), vec![50, 50]);
        assert_eq!(out.cells()[0].target_frequencies, vec![50, 0]);
        assert!(out.check().is_ok());
    }

    #[test]
    fn test_random_partition_is_valid() {
        use rand::SeedableRng;
        let grid = initial_grid();
        let exporter = GridExporter::new(&grid);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        let attribute = exporter.random_partition(0, 5, &mut rng);
        assert_eq!(attribute.part_count(), 5);

        let out = exporter.export_with_partitions(vec![attribute]);
        assert!(out.check().is_ok());
        assert_eq!(out.grid_frequency(), 100);
    }
}
