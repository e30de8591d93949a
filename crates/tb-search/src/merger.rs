// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Greedy merge optimization.
//!
//! Repeatedly applies the part fusion with the best cost decrease until no
//! merge improves. Under a part-number cap, merges continue on the
//! offending attributes even at a cost increase, picking the cheapest each
//! time.

use tb_grid::{DataGrid, GridAttributeKind, GridCostModel, Part, COST_EPSILON};

/// Greedy lowest-cost-fusion merger.
pub struct GridMerger<'a> {
    costs: &'a dyn GridCostModel,
    max_part_number: usize,
}

impl<'a> GridMerger<'a> {
    /// Create a merger with no part-number cap.
    pub fn new(costs: &'a dyn GridCostModel) -> Self {
        Self {
            costs,
            max_part_number: 0,
        }
    }

    /// Set the part-number cap (0 = none).
    pub fn with_max_part_number(mut self, max_part_number: usize) -> Self {
        self.max_part_number = max_part_number;
        self
    }

    /// Run greedy merging; returns the merged grid and its cost.
    pub fn merge(&self, grid: &DataGrid) -> (DataGrid, f64) {
        let mut current = grid.clone();
        let mut cost = self.costs.total_cost(&current);

        // Improving merges first
        loop {
            match self.best_merge(&current, cost, None) {
                Some((merged, merged_cost)) if merged_cost < cost - COST_EPSILON => {
                    current = merged;
                    cost = merged_cost;
                }
                _ => break,
            }
        }

        // Forced merges to honour the cap
        if self.max_part_number > 0 {
            while current.compute_max_part_number() > self.max_part_number {
                let offending = (0..current.attribute_count())
                    .find(|&a| current.attribute(a).part_count() > self.max_part_number);
                let attribute = match offending {
                    Some(attribute) => attribute,
                    None => break,
                };
                match self.best_merge(&current, cost, Some(attribute)) {
                    Some((merged, merged_cost)) => {
                        current = merged;
                        cost = merged_cost;
                    }
                    None => break,
                }
            }
        }
        (current, cost)
    }

    /// Cheapest candidate merge, optionally restricted to one attribute.
    fn best_merge(
        &self,
        grid: &DataGrid,
        _current_cost: f64,
        only_attribute: Option<usize>,
    ) -> Option<(DataGrid, f64)> {
        let mut best: Option<(DataGrid, f64)> = None;
        for attribute in 0..grid.attribute_count() {
            if let Some(only) = only_attribute {
                if attribute != only {
                    continue;
                }
            }
            for (a, b) in candidate_merges(grid, attribute) {
                let merged = merge_parts(grid, attribute, a, b);
                let merged_cost = self.costs.total_cost(&merged);
                let better = match &best {
                    Some((_, best_cost)) => merged_cost < *best_cost,
                    None => true,
                };
                if better {
                    best = Some((merged, merged_cost));
                }
            }
        }
        best
    }
}

/// Mergeable part pairs of one attribute: adjacent intervals for numeric
/// axes, every pair for groups and clusters.
pub fn candidate_merges(grid: &DataGrid, attribute: usize) -> Vec<(usize, usize)> {
    let attr = grid.attribute(attribute);
    let count = attr.part_count();
    if count < 2 {
        return Vec::new();
    }
    match attr.kind() {
        GridAttributeKind::Numeric => {
            // Adjacent in value order
            let mut order: Vec<usize> = (0..count).collect();
            order.sort_by_key(|&p| match &attr.parts()[p] {
                Part::Interval(i) => i.first_value,
                _ => usize::MAX,
            });
            order.windows(2).map(|w| (w[0], w[1])).collect()
        }
        GridAttributeKind::Categorical | GridAttributeKind::VarPart => {
            let mut pairs = Vec::with_capacity(count * (count - 1) / 2);
            for a in 0..count {
                for b in a + 1..count {
                    pairs.push((a, b));
                }
            }
            pairs
        }
    }
}

/// Pure fusion of parts `a` and `b` of one attribute; the merged part takes
/// the lower index, cells are remapped and collapsed.
pub fn merge_parts(grid: &DataGrid, attribute: usize, a: usize, b: usize) -> DataGrid {
    debug_assert_ne!(a, b);
    let (keep, drop) = if a < b { (a, b) } else { (b, a) };

    let mut out = DataGrid::new(grid.target_value_count());
    out.set_granularity(grid.granularity());
    if let Some(inner) = grid.inner_attributes() {
        out.set_inner_attributes(inner.clone());
    }

    for (index, attr) in grid.attributes().iter().enumerate() {
        let mut copy = attr.clone();
        if index == attribute {
            let mut parts = attr.parts().to_vec();
            let dropped = parts.remove(drop);
            merge_into(&mut parts[keep], &dropped);
            copy.set_parts(parts);
        }
        out.add_attribute(copy);
    }

    for cell in grid.cells() {
        let mut part_indexes = cell.part_indexes.clone();
        let part = &mut part_indexes[attribute];
        if *part == drop {
            *part = keep;
        } else if *part > drop {
            *part -= 1;
        }
        out.add_cell(part_indexes, cell.frequency, &cell.target_frequencies);
    }
    out
}

fn merge_into(target: &mut Part, other: &Part) {
    match (target, other) {
        (Part::Interval(target), Part::Interval(other)) => {
            target.first_value = target.first_value.min(other.first_value);
            target.last_value = target.last_value.max(other.last_value);
            target.lower = target.lower.min(other.lower);
            target.upper = target.upper.max(other.upper);
        }
        (Part::ValueGroup(target), Part::ValueGroup(other)) => {
            target.value_indexes.extend(other.value_indexes.iter().copied());
            target.value_indexes.sort_unstable();
        }
        (Part::Cluster(target), Part::Cluster(other)) => {
            target.tokens.extend(other.tokens.iter().copied());
            target.tokens.sort_unstable();
        }
        _ => unreachable!("merged parts have the same kind"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb_grid::{build_initial_grid, CodelengthCostModel, GridColumn, GridExporter};

    fn supervised_initial() -> DataGrid {
        // 200 rows, pure halves
        let values: Vec<f64> = (0..200).map(f64::from).collect();
        let target: Vec<String> = (0..200)
            .map(|i| if i < 100 { "a".into() } else { "b".into() })
            .collect();
        build_initial_grid(
            &[GridColumn::Numeric {
                name: "X".into(),
                values,
            }],
            Some(&target),
        )
        .unwrap()
    }

    #[test]
    fn test_merge_parts_preserves_frequency() {
        let grid = supervised_initial();
        let exporter = GridExporter::new(&grid);
        let (mut holders, _) = exporter.attribute_quantiles();
        let granularized = exporter.export_granularized(3, &mut holders);
        assert_eq!(granularized.attribute(0).part_count(), 8);

        let merged = merge_parts(&granularized, 0, 0, 1);
        assert_eq!(merged.attribute(0).part_count(), 7);
        assert_eq!(merged.grid_frequency(), 200);
        assert!(merged.check().is_ok());
    }

    #[test]
    fn test_greedy_merge_collapses_pure_halves() {
        // With a pure left/right split, the optimum keeps exactly the
        // boundary between the halves
        let grid = supervised_initial();
        let exporter = GridExporter::new(&grid);
        let (mut holders, _) = exporter.attribute_quantiles();
        let granularized = exporter.export_granularized(3, &mut holders);

        let model = CodelengthCostModel::new();
        let merger = GridMerger::new(&model);
        let start_cost = model.total_cost(&granularized);
        let (merged, cost) = merger.merge(&granularized);

        assert!(cost < start_cost);
        assert_eq!(merged.attribute(0).part_count(), 2);
        assert!((model.total_cost(&merged) - cost).abs() < 1e-9);
        assert!(merged.check().is_ok());
    }

    #[test]
    fn test_forced_merge_respects_cap() {
        let grid = supervised_initial();
        let exporter = GridExporter::new(&grid);
        let (mut holders, _) = exporter.attribute_quantiles();
        let granularized = exporter.export_granularized(4, &mut holders);
        assert_eq!(granularized.attribute(0).part_count(), 16);

        let model = CodelengthCostModel::new();
        let merger = GridMerger::new(&model).with_max_part_number(1);
        let (merged, _) = merger.merge(&granularized);
        assert_eq!(merged.compute_max_part_number(), 1);
        assert!(merged.check().is_ok());
    }
}
