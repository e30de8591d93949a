// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Local post-optimization of a data grid.
//!
//! Hill-climbing over atom moves: an *atom* is one part of the granularized
//! source grid, and every optimized partition is a union of atoms. Numeric
//! boundaries move by one atom at a time; categorical atoms may hop to any
//! other group. The shallow variant (pre-optimization) applies at most one
//! improving move per attribute sweep, the deep variant iterates to a local
//! optimum.

use tb_grid::{
    DataGrid, GridAttribute, GridAttributeKind, GridCostModel, GridExporter, Part, VarPartToken,
    COST_EPSILON,
};

/// Iteration backstop for the deep local searches.
const MAX_LOCAL_SEARCH_ITERATIONS: usize = 100;

/// Boundary-move post-optimizer.
pub struct GridPostOptimizer<'a> {
    costs: &'a dyn GridCostModel,
}

impl<'a> GridPostOptimizer<'a> {
    /// Create a post-optimizer.
    pub fn new(costs: &'a dyn GridCostModel) -> Self {
        Self { costs }
    }

    /// Improve `grid` by atom moves against the granularized `source`.
    ///
    /// Returns the improved grid and its cost; the input is returned
    /// unchanged when no move improves.
    pub fn post_optimize(
        &self,
        source: &DataGrid,
        grid: DataGrid,
        deep: bool,
    ) -> (DataGrid, f64) {
        let exporter = GridExporter::new(source);
        let mut current = grid;
        let mut cost = self.costs.total_cost(&current);

        let max_iterations = if deep { MAX_LOCAL_SEARCH_ITERATIONS } else { 1 };
        for _ in 0..max_iterations {
            match self.best_move(&exporter, source, &current) {
                Some((moved, moved_cost)) if moved_cost < cost - COST_EPSILON => {
                    current = moved;
                    cost = moved_cost;
                }
                _ => break,
            }
        }
        (current, cost)
    }

    /// Best single atom move over all attributes.
    fn best_move(
        &self,
        exporter: &GridExporter<'_>,
        source: &DataGrid,
        grid: &DataGrid,
    ) -> Option<(DataGrid, f64)> {
        let mut best: Option<(DataGrid, f64)> = None;
        for attribute in 0..grid.attribute_count() {
            let candidates = match grid.attribute(attribute).kind() {
                GridAttributeKind::Numeric => {
                    numeric_boundary_moves(source, grid, attribute)
                }
                GridAttributeKind::Categorical => categorical_atom_moves(source, grid, attribute),
                GridAttributeKind::VarPart => Vec::new(),
            };
            for moved_attribute in candidates {
                let mut attributes: Vec<GridAttribute> = grid.attributes().to_vec();
                attributes[attribute] = moved_attribute;
                let moved = exporter.export_with_partitions(attributes);
                let moved_cost = self.costs.total_cost(&moved);
                let better = match &best {
                    Some((_, best_cost)) => moved_cost < *best_cost,
                    None => true,
                };
                if better {
                    best = Some((moved, moved_cost));
                }
            }
        }
        best
    }

    /// Move inner-part tokens across clusters of a VarPart grid while the
    /// cost decreases. `reference` carries singleton clusters (one per
    /// token) over the same inner attributes, providing the token-level
    /// cells that make re-export exact.
    pub fn reassign_varparts(
        &self,
        grid: &DataGrid,
        reference: &DataGrid,
    ) -> (DataGrid, f64, bool) {
        let exporter = GridExporter::new(reference);
        let mut current = grid.clone();
        let mut cost = self.costs.total_cost(&current);
        let mut improved = false;

        let varpart_index = match current.var_part_attribute() {
            Some(index) => index,
            None => return (current, cost, false),
        };

        for _ in 0..MAX_LOCAL_SEARCH_ITERATIONS {
            let mut best: Option<(DataGrid, f64)> = None;
            let attribute = current.attribute(varpart_index);
            let cluster_count = attribute.part_count();
            for from in 0..cluster_count {
                let tokens = match &attribute.parts()[from] {
                    Part::Cluster(cluster) => cluster.tokens.clone(),
                    _ => continue,
                };
                // Moving the last token would leave an empty cluster
                if tokens.len() <= 1 {
                    continue;
                }
                for token in tokens {
                    for to in 0..cluster_count {
                        if to == from {
                            continue;
                        }
                        let moved_attribute =
                            move_token(attribute, from, to, token);
                        let mut attributes: Vec<GridAttribute> =
                            current.attributes().to_vec();
                        attributes[varpart_index] = moved_attribute;
                        let moved = exporter.export_with_partitions(attributes);
                        let moved_cost = self.costs.total_cost(&moved);
                        let better = match &best {
                            Some((_, best_cost)) => moved_cost < *best_cost,
                            None => true,
                        };
                        if better {
                            best = Some((moved, moved_cost));
                        }
                    }
                }
            }
            match best {
                Some((moved, moved_cost)) if moved_cost < cost - COST_EPSILON => {
                    current = moved;
                    cost = moved_cost;
                    improved = true;
                }
                _ => break,
            }
        }
        (current, cost, improved)
    }
}

fn move_token(
    attribute: &GridAttribute,
    from: usize,
    to: usize,
    token: VarPartToken,
) -> GridAttribute {
    let mut moved = attribute.clone();
    let mut parts = attribute.parts().to_vec();
    if let Part::Cluster(cluster) = &mut parts[from] {
        cluster.tokens.retain(|&t| t != token);
    }
    if let Part::Cluster(cluster) = &mut parts[to] {
        cluster.tokens.push(token);
        cluster.tokens.sort_unstable();
    }
    moved.set_parts(parts);
    moved
}

/// Atom ranges of one source attribute, sorted by value order.
fn source_atoms(source: &DataGrid, name: &str) -> Vec<(usize, usize)> {
    let index = match source.attribute_named(name) {
        Some(index) => index,
        None => return Vec::new(),
    };
    let mut atoms: Vec<(usize, usize)> = source.attribute(index)
        .parts()
        .iter()
        .filter_map(|p| match p {
            Part::Interval(i) => Some((i.first_value, i.last_value)),
            Part::ValueGroup(g) => {
                let min = g.value_indexes.iter().copied().min()?;
                let max = g.value_indexes.iter().copied().max()?;
                Some((min, max))
            }
            Part::Cluster(_) => None,
        })
        .collect();
    atoms.sort_unstable();
    atoms
}

/// Candidate numeric partitions: each adjacent boundary moved by one atom
/// in either direction (skipping moves that would empty a part).
fn numeric_boundary_moves(
    source: &DataGrid,
    grid: &DataGrid,
    attribute: usize,
) -> Vec<GridAttribute> {
    let attr = grid.attribute(attribute);
    let atoms = source_atoms(source, attr.name());
    if atoms.len() < 2 || attr.part_count() < 2 {
        return Vec::new();
    }
    let values = attr.numeric_values();

    // Parts in value order with their atom index ranges
    let mut order: Vec<usize> = (0..attr.part_count()).collect();
    order.sort_by_key(|&p| match &attr.parts()[p] {
        Part::Interval(i) => i.first_value,
        _ => usize::MAX,
    });
    let atom_range = |part: usize| -> (usize, usize) {
        match &attr.parts()[part] {
            Part::Interval(i) => {
                let first = atoms.partition_point(|&(f, _)| f < i.first_value);
                let last = atoms.partition_point(|&(f, _)| f <= i.last_value) - 1;
                (first, last)
            }
            _ => (0, 0),
        }
    };

    let bound_after = |atom: usize| -> f64 {
        // Upper bound after the given atom
        let last_value = atoms[atom].1;
        if last_value + 1 >= values.len() {
            f64::INFINITY
        } else {
            (values[last_value] + values[last_value + 1]) / 2.0
        }
    };

    let mut candidates = Vec::new();
    for pair in order.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        let (left_first, left_last) = atom_range(left);
        let (right_first, right_last) = atom_range(right);

        // Move the boundary left (shrink the left part)
        if left_last > left_first {
            let mut moved = attr.clone();
            let mut parts = attr.parts().to_vec();
            if let (Part::Interval(l), Part::Interval(r)) = {
                let (a, b) = split_two(&mut parts, left, right);
                (a, b)
            } {
                l.last_value = atoms[left_last - 1].1;
                l.upper = bound_after(left_last - 1);
                r.first_value = atoms[left_last].0;
                r.lower = bound_after(left_last - 1);
            }
            moved.set_parts(parts);
            candidates.push(moved);
        }
        // Move the boundary right (shrink the right part)
        if right_last > right_first {
            let mut moved = attr.clone();
            let mut parts = attr.parts().to_vec();
            if let (Part::Interval(l), Part::Interval(r)) = {
                let (a, b) = split_two(&mut parts, left, right);
                (a, b)
            } {
                l.last_value = atoms[right_first].1;
                l.upper = bound_after(right_first);
                r.first_value = atoms[right_first + 1].0;
                r.lower = bound_after(right_first);
            }
            moved.set_parts(parts);
            candidates.push(moved);
        }
    }
    candidates
}

/// Two disjoint mutable references into a part vector.
fn split_two(parts: &mut [Part], a: usize, b: usize) -> (&mut Part, &mut Part) {
    debug_assert_ne!(a, b);
    if a < b {
        let (head, tail) = parts.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = parts.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}

/// Candidate categorical partitions: each atom moved to every other group.
fn categorical_atom_moves(
    source: &DataGrid,
    grid: &DataGrid,
    attribute: usize,
) -> Vec<GridAttribute> {
    let attr = grid.attribute(attribute);
    if attr.part_count() < 2 {
        return Vec::new();
    }
    let source_index = match source.attribute_named(attr.name()) {
        Some(index) => index,
        None => return Vec::new(),
    };

    let mut candidates = Vec::new();
    for source_part in source.attribute(source_index).parts() {
        let atom_values = match source_part {
            Part::ValueGroup(group) => group.value_indexes.clone(),
            _ => continue,
        };
        let representative = match atom_values.first() {
            Some(&value) => value,
            None => continue,
        };
        let from = match attr.part_for_value(representative) {
            Some(part) => part,
            None => continue,
        };
        // Moving the whole content of a group away would empty it
        if let Part::ValueGroup(group) = &attr.parts()[from] {
            if group.value_indexes.len() <= atom_values.len() {
                continue;
            }
        }
        for to in 0..attr.part_count() {
            if to == from {
                continue;
            }
            let mut moved = attr.clone();
            let mut parts = attr.parts().to_vec();
            if let Part::ValueGroup(group) = &mut parts[from] {
                group.value_indexes.retain(|v| !atom_values.contains(v));
            }
            if let Part::ValueGroup(group) = &mut parts[to] {
                group.value_indexes.extend(atom_values.iter().copied());
                group.value_indexes.sort_unstable();
            }
            moved.set_parts(parts);
            candidates.push(moved);
        }
    }
    candidates
}
