// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! The data-grid model.
//!
//! A [`DataGrid`] is a multidimensional partition of the instance space: an
//! ordered list of [`GridAttribute`]s, each partitioned into [`Part`]s over
//! its own universe of elementary values, plus a sparse set of [`Cell`]s
//! keyed by part-index tuples. In supervised mode every cell carries a
//! per-target-value frequency vector.
//!
//! Every grid derived during optimization shares the elementary-value
//! universes of the initial grid (the finest one), so parts are plain index
//! ranges or index sets and cell export is pure bookkeeping.

use std::collections::HashMap;

use crate::varpart::InnerAttributes;

/// Attribute kind within a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridAttributeKind {
    /// Numeric axis partitioned into intervals.
    Numeric,
    /// Categorical axis partitioned into value groups.
    Categorical,
    /// Axis whose parts are clusters of (inner attribute, inner part)
    /// tokens.
    VarPart,
}

/// One token of a VarPart cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarPartToken {
    /// Index into the grid's inner attributes.
    pub inner_attribute: usize,
    /// Part index within that inner attribute.
    pub inner_part: usize,
}

/// An interval part: a contiguous range of elementary value indexes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub first_value: usize,
    pub last_value: usize,
    /// Real lower bound, exclusive.
    pub lower: f64,
    /// Real upper bound, inclusive.
    pub upper: f64,
}

/// A value-group part: a set of elementary value indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueGroup {
    pub value_indexes: Vec<usize>,
}

/// A VarPart cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub tokens: Vec<VarPartToken>,
}

/// One part of a grid attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Interval(Interval),
    ValueGroup(ValueGroup),
    Cluster(Cluster),
}

impl Part {
    /// Number of elementary units covered.
    pub fn unit_count(&self) -> usize {
        match self {
            Part::Interval(interval) => interval.last_value - interval.first_value + 1,
            Part::ValueGroup(group) => group.value_indexes.len(),
            Part::Cluster(cluster) => cluster.tokens.len(),
        }
    }
}

/// One attribute of a grid: its value universe and its current partition.
#[derive(Debug, Clone)]
pub struct GridAttribute {
    name: String,
    kind: GridAttributeKind,
    granularity: u32,
    granularized_value_count: usize,
    initial_value_count: usize,
    /// Sorted distinct values (numeric attributes only).
    numeric_values: Vec<f64>,
    /// Frequency of each elementary value; categorical universes are sorted
    /// by decreasing frequency.
    value_frequencies: Vec<u64>,
    parts: Vec<Part>,
}

impl GridAttribute {
    /// Create a numeric attribute from its sorted distinct values.
    pub fn numeric(name: impl Into<String>, values: Vec<f64>, frequencies: Vec<u64>) -> Self {
        debug_assert_eq!(values.len(), frequencies.len());
        debug_assert!(values.windows(2).all(|w| w[0] < w[1]));
        let count = values.len();
        Self {
            name: name.into(),
            kind: GridAttributeKind::Numeric,
            granularity: 0,
            granularized_value_count: count,
            initial_value_count: count,
            numeric_values: values,
            value_frequencies: frequencies,
            parts: Vec::new(),
        }
    }

    /// Create a categorical attribute from frequencies sorted decreasing.
    pub fn categorical(name: impl Into<String>, frequencies: Vec<u64>) -> Self {
        debug_assert!(frequencies.windows(2).all(|w| w[0] >= w[1]));
        let count = frequencies.len();
        Self {
            name: name.into(),
            kind: GridAttributeKind::Categorical,
            granularity: 0,
            granularized_value_count: count,
            initial_value_count: count,
            numeric_values: Vec::new(),
            value_frequencies: frequencies,
            parts: Vec::new(),
        }
    }

    /// Create a VarPart attribute; `token_count` is the number of inner
    /// parts across all inner attributes.
    pub fn var_part(name: impl Into<String>, token_count: usize) -> Self {
        Self {
            name: name.into(),
            kind: GridAttributeKind::VarPart,
            granularity: 0,
            granularized_value_count: token_count,
            initial_value_count: token_count,
            numeric_values: Vec::new(),
            value_frequencies: Vec::new(),
            parts: Vec::new(),
        }
    }

    /// Attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute kind.
    pub fn kind(&self) -> GridAttributeKind {
        self.kind
    }

    /// Granularity level the partition was built at.
    pub fn granularity(&self) -> u32 {
        self.granularity
    }

    /// Set the granularity level.
    pub fn set_granularity(&mut self, granularity: u32) {
        self.granularity = granularity;
    }

    /// Number of elementary units available at the current granularity.
    pub fn granularized_value_count(&self) -> usize {
        self.granularized_value_count
    }

    /// Set the granularized unit count.
    pub fn set_granularized_value_count(&mut self, count: usize) {
        self.granularized_value_count = count;
    }

    /// Number of elementary values of the finest universe.
    pub fn initial_value_count(&self) -> usize {
        self.initial_value_count
    }

    /// Sorted distinct numeric values.
    pub fn numeric_values(&self) -> &[f64] {
        &self.numeric_values
    }

    /// Per-value frequencies.
    pub fn value_frequencies(&self) -> &[u64] {
        &self.value_frequencies
    }

    /// Current parts.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Number of parts.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// An attribute with at least two parts carries information.
    pub fn is_informative(&self) -> bool {
        self.parts.len() > 1
    }

    /// Append a part, returning its index.
    pub fn add_part(&mut self, part: Part) -> usize {
        debug_assert!(match (&part, self.kind) {
            (Part::Interval(_), GridAttributeKind::Numeric) => true,
            (Part::ValueGroup(_), GridAttributeKind::Categorical) => true,
            (Part::Cluster(_), GridAttributeKind::VarPart) => true,
            _ => false,
        });
        self.parts.push(part);
        self.parts.len() - 1
    }

    /// Replace the partition wholesale.
    pub fn set_parts(&mut self, parts: Vec<Part>) {
        self.parts = parts;
    }

    /// Locate the part containing an elementary value index.
    pub fn part_for_value(&self, value_index: usize) -> Option<usize> {
        match self.kind {
            GridAttributeKind::Numeric => self.parts.iter().position(|p| match p {
                Part::Interval(i) => i.first_value <= value_index && value_index <= i.last_value,
                _ => false,
            }),
            GridAttributeKind::Categorical => self.parts.iter().position(|p| match p {
                Part::ValueGroup(g) => g.value_indexes.contains(&value_index),
                _ => false,
            }),
            GridAttributeKind::VarPart => None,
        }
    }

    /// Locate the cluster containing a token (VarPart attributes).
    pub fn part_for_token(&self, token: VarPartToken) -> Option<usize> {
        self.parts.iter().position(|p| match p {
            Part::Cluster(c) => c.tokens.contains(&token),
            _ => false,
        })
    }

    /// Sort parts into canonical order, returning the old-to-new index map.
    pub fn sort_parts(&mut self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.parts.len()).collect();
        let key = |part: &Part| -> (usize, usize) {
            match part {
                Part::Interval(i) => (i.first_value, i.last_value),
                Part::ValueGroup(g) => {
                    (g.value_indexes.iter().copied().min().unwrap_or(usize::MAX), 0)
                }
                Part::Cluster(c) => (
                    c.tokens
                        .iter()
                        .map(|t| t.inner_attribute * 1_000_000 + t.inner_part)
                        .min()
                        .unwrap_or(usize::MAX),
                    0,
                ),
            }
        };
        order.sort_by_key(|&i| key(&self.parts[i]));
        let mut remap = vec![0usize; self.parts.len()];
        let mut sorted = Vec::with_capacity(self.parts.len());
        for (new_index, &old_index) in order.iter().enumerate() {
            remap[old_index] = new_index;
            sorted.push(self.parts[old_index].clone());
        }
        // Canonical order inside groups and clusters as well
        for part in sorted.iter_mut() {
            match part {
                Part::ValueGroup(g) => g.value_indexes.sort_unstable(),
                Part::Cluster(c) => c.tokens.sort_unstable(),
                Part::Interval(_) => {}
            }
        }
        self.parts = sorted;
        remap
    }
}

/// One sparse cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// One part index per grid attribute.
    pub part_indexes: Vec<usize>,
    /// Total instance frequency.
    pub frequency: u64,
    /// Per-target-value frequencies (empty when unsupervised).
    pub target_frequencies: Vec<u64>,
}

/// A multidimensional partition of the instance space.
#[derive(Debug, Clone, Default)]
pub struct DataGrid {
    attributes: Vec<GridAttribute>,
    cells: Vec<Cell>,
    cell_index: HashMap<Vec<usize>, usize>,
    target_value_count: usize,
    granularity: u32,
    inner: Option<InnerAttributes>,
}

impl DataGrid {
    /// Create an empty grid; `target_value_count > 0` selects supervised
    /// mode.
    pub fn new(target_value_count: usize) -> Self {
        Self {
            target_value_count,
            ..Self::default()
        }
    }

    /// Attributes in order.
    pub fn attributes(&self) -> &[GridAttribute] {
        &self.attributes
    }

    /// Attribute by index.
    pub fn attribute(&self, index: usize) -> &GridAttribute {
        &self.attributes[index]
    }

    /// Mutable attribute by index.
    pub fn attribute_mut(&mut self, index: usize) -> &mut GridAttribute {
        &mut self.attributes[index]
    }

    /// Attribute index by name.
    pub fn attribute_named(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name() == name)
    }

    /// Number of attributes.
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Number of attributes with more than one part.
    pub fn informative_attribute_count(&self) -> usize {
        self.attributes.iter().filter(|a| a.is_informative()).count()
    }

    /// Append an attribute, returning its index. Only valid while the grid
    /// has no cells.
    pub fn add_attribute(&mut self, attribute: GridAttribute) -> usize {
        debug_assert!(self.cells.is_empty());
        self.attributes.push(attribute);
        self.attributes.len() - 1
    }

    /// Number of target values (0 = unsupervised).
    pub fn target_value_count(&self) -> usize {
        self.target_value_count
    }

    /// Whether the grid is supervised.
    pub fn is_supervised(&self) -> bool {
        self.target_value_count > 0
    }

    /// Grid-level granularity.
    pub fn granularity(&self) -> u32 {
        self.granularity
    }

    /// Set the grid-level granularity.
    pub fn set_granularity(&mut self, granularity: u32) {
        self.granularity = granularity;
    }

    /// Inner attributes of a VarPart grid.
    pub fn inner_attributes(&self) -> Option<&InnerAttributes> {
        self.inner.as_ref()
    }

    /// Install inner attributes.
    pub fn set_inner_attributes(&mut self, inner: InnerAttributes) {
        self.inner = Some(inner);
    }

    /// Whether this is a VarPart grid.
    pub fn is_var_part_grid(&self) -> bool {
        self.inner.is_some()
    }

    /// Index of the VarPart attribute, if any.
    pub fn var_part_attribute(&self) -> Option<usize> {
        self.attributes
            .iter()
            .position(|a| a.kind() == GridAttributeKind::VarPart)
    }

    /// All cells.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Total instance frequency.
    pub fn grid_frequency(&self) -> u64 {
        self.cells.iter().map(|c| c.frequency).sum()
    }

    /// Add frequency to a cell, creating it if needed. Target frequencies
    /// must be sized to the grid's target value count.
    pub fn add_cell(
        &mut self,
        part_indexes: Vec<usize>,
        frequency: u64,
        target_frequencies: &[u64],
    ) {
        debug_assert_eq!(part_indexes.len(), self.attributes.len());
        debug_assert_eq!(target_frequencies.len(), self.target_value_count);
        match self.cell_index.get(&part_indexes) {
            Some(&index) => {
                let cell = &mut self.cells[index];
                cell.frequency += frequency;
                for (slot, &f) in cell.target_frequencies.iter_mut().zip(target_frequencies) {
                    *slot += f;
                }
            }
            None => {
                self.cell_index.insert(part_indexes.clone(), self.cells.len());
                self.cells.push(Cell {
                    part_indexes,
                    frequency,
                    target_frequencies: target_frequencies.to_vec(),
                });
            }
        }
    }

    /// Cell lookup by part-index tuple.
    pub fn cell_at(&self, part_indexes: &[usize]) -> Option<&Cell> {
        self.cell_index
            .get(part_indexes)
            .map(|&index| &self.cells[index])
    }

    /// Marginal part frequencies of one attribute.
    pub fn part_frequencies(&self, attribute: usize) -> Vec<u64> {
        let mut frequencies = vec![0u64; self.attributes[attribute].part_count()];
        for cell in &self.cells {
            frequencies[cell.part_indexes[attribute]] += cell.frequency;
        }
        frequencies
    }

    /// Largest part count over all attributes.
    pub fn compute_max_part_number(&self) -> usize {
        self.attributes
            .iter()
            .map(|a| a.part_count())
            .max()
            .unwrap_or(0)
    }

    /// Sort every attribute's parts into canonical order, remapping cells.
    pub fn sort_attribute_parts(&mut self) {
        let remaps: Vec<Vec<usize>> = self
            .attributes
            .iter_mut()
            .map(|a| a.sort_parts())
            .collect();
        for cell in self.cells.iter_mut() {
            for (attribute, part) in cell.part_indexes.iter_mut().enumerate() {
                *part = remaps[attribute][*part];
            }
        }
        self.rebuild_cell_index();
    }

    /// Copy of the grid keeping only informative attributes; collapsing
    /// cells are merged.
    pub fn copy_informative(&self) -> DataGrid {
        let kept: Vec<usize> = (0..self.attributes.len())
            .filter(|&i| self.attributes[i].is_informative())
            .collect();
        let mut out = DataGrid::new(self.target_value_count);
        out.granularity = self.granularity;
        out.inner = self.inner.clone();
        for &i in &kept {
            out.attributes.push(self.attributes[i].clone());
        }
        for cell in &self.cells {
            let part_indexes: Vec<usize> =
                kept.iter().map(|&i| cell.part_indexes[i]).collect();
            out.add_cell(part_indexes, cell.frequency, &cell.target_frequencies);
        }
        out
    }

    fn rebuild_cell_index(&mut self) {
        self.cell_index.clear();
        for (index, cell) in self.cells.iter().enumerate() {
            self.cell_index.insert(cell.part_indexes.clone(), index);
        }
    }

    /// Structural invariants: parts cover their universes without overlap,
    /// cell tuples are in range and unique, target frequencies are
    /// consistent, VarPart clusters cover the inner parts.
    pub fn check(&self) -> Result<(), String> {
        for (index, attribute) in self.attributes.iter().enumerate() {
            match attribute.kind() {
                GridAttributeKind::Numeric | GridAttributeKind::Categorical => {
                    let mut covered = vec![false; attribute.initial_value_count()];
                    for part in attribute.parts() {
                        match part {
                            Part::Interval(interval) => {
                                for v in interval.first_value..=interval.last_value {
                                    if covered[v] {
                                        return Err(format!(
                                            "attribute {index}: value {v} covered twice"
                                        ));
                                    }
                                    covered[v] = true;
                                }
                            }
                            Part::ValueGroup(group) => {
                                for &v in &group.value_indexes {
                                    if covered[v] {
                                        return Err(format!(
                                            "attribute {index}: value {v} covered twice"
                                        ));
                                    }
                                    covered[v] = true;
                                }
                            }
                            Part::Cluster(_) => {
                                return Err(format!(
                                    "attribute {index}: cluster part on a value attribute"
                                ))
                            }
                        }
                    }
                    if covered.iter().any(|&c| !c) {
                        return Err(format!("attribute {index}: partition does not cover"));
                    }
                }
                GridAttributeKind::VarPart => {
                    let inner = self
                        .inner
                        .as_ref()
                        .ok_or_else(|| "VarPart attribute without inner attributes".to_string())?;
                    let mut covered: HashMap<VarPartToken, bool> = HashMap::new();
                    for (inner_attribute, inner_attr) in inner.attributes().iter().enumerate() {
                        for inner_part in 0..inner_attr.part_count() {
                            covered.insert(
                                VarPartToken {
                                    inner_attribute,
                                    inner_part,
                                },
                                false,
                            );
                        }
                    }
                    for part in attribute.parts() {
                        if let Part::Cluster(cluster) = part {
                            for token in &cluster.tokens {
                                match covered.get_mut(token) {
                                    Some(seen) if !*seen => *seen = true,
                                    Some(_) => {
                                        return Err(format!(
                                            "attribute {index}: token covered twice"
                                        ))
                                    }
                                    None => {
                                        return Err(format!(
                                            "attribute {index}: unknown token"
                                        ))
                                    }
                                }
                            }
                        } else {
                            return Err(format!(
                                "attribute {index}: value part on a VarPart attribute"
                            ));
                        }
                    }
                    if covered.values().any(|&seen| !seen) {
                        return Err(format!("attribute {index}: clusters do not cover"));
                    }
                }
            }
        }

        let mut seen = HashMap::new();
        for cell in &self.cells {
            if cell.part_indexes.len() != self.attributes.len() {
                return Err("cell arity mismatch".to_string());
            }
            for (attribute, &part) in cell.part_indexes.iter().enumerate() {
                if part >= self.attributes[attribute].part_count() {
                    return Err("cell part index out of range".to_string());
                }
            }
            if seen.insert(cell.part_indexes.clone(), ()).is_some() {
                return Err("duplicate cell".to_string());
            }
            if self.target_value_count > 0 {
                let total: u64 = cell.target_frequencies.iter().sum();
                if total != cell.frequency {
                    return Err("cell target frequencies inconsistent".to_string());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_two_grid() -> DataGrid {
        let mut grid = DataGrid::new(2);
        let mut x = GridAttribute::numeric("X", vec![0.0, 1.0], vec![6, 6]);
        x.add_part(Part::Interval(Interval {
            first_value: 0,
            last_value: 0,
            lower: f64::NEG_INFINITY,
            upper: 0.5,
        }));
        x.add_part(Part::Interval(Interval {
            first_value: 1,
            last_value: 1,
            lower: 0.5,
            upper: f64::INFINITY,
        }));
        let mut label = GridAttribute::categorical("Label", vec![8, 4]);
        label.add_part(Part::ValueGroup(ValueGroup {
            value_indexes: vec![0],
        }));
        label.add_part(Part::ValueGroup(ValueGroup {
            value_indexes: vec![1],
        }));
        grid.add_attribute(x);
        grid.add_attribute(label);

        grid.add_cell(vec![0, 0], 4, &[4, 0]);
        grid.add_cell(vec![0, 1], 2, &[0, 2]);
        grid.add_cell(vec![1, 0], 4, &[0, 4]);
        grid.add_cell(vec![1, 1], 2, &[2, 0]);
        grid
    }

    #[test]
    fn test_grid_invariants() {
        let grid = two_by_two_grid();
        assert!(grid.check().is_ok());
        assert_eq!(grid.grid_frequency(), 12);
        assert_eq!(grid.cell_count(), 4);
        assert_eq!(grid.compute_max_part_number(), 2);
        assert_eq!(grid.informative_attribute_count(), 2);
        assert_eq!(grid.part_frequencies(0), vec![6, 6]);
        assert_eq!(grid.part_frequencies(1), vec![8, 4]);
    }

    #[test]
    fn test_add_cell_accumulates() {
        let mut grid = two_by_two_grid();
        grid.add_cell(vec![0, 0], 3, &[1, 2]);
        assert_eq!(grid.cell_at(&[0, 0]).unwrap().frequency, 7);
        assert_eq!(grid.cell_at(&[0, 0]).unwrap().target_frequencies, vec![5, 2]);
        assert_eq!(grid.cell_count(), 4);
    }

    #[test]
    fn test_check_detects_overlap() {
        let mut grid = DataGrid::new(0);
        let mut x = GridAttribute::numeric("X", vec![0.0, 1.0], vec![1, 1]);
        x.add_part(Part::Interval(Interval {
            first_value: 0,
            last_value: 1,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }));
        x.add_part(Part::Interval(Interval {
            first_value: 1,
            last_value: 1,
            lower: 0.5,
            upper: f64::INFINITY,
        }));
        grid.add_attribute(x);
        assert!(grid.check().is_err());
    }

    #[test]
    fn test_sort_attribute_parts_remaps_cells() {
        let mut grid = DataGrid::new(0);
        let mut x = GridAttribute::numeric("X", vec![0.0, 1.0, 2.0], vec![1, 1, 1]);
        // Parts inserted out of order
        x.add_part(Part::Interval(Interval {
            first_value: 1,
            last_value: 2,
            lower: 0.5,
            upper: f64::INFINITY,
        }));
        x.add_part(Part::Interval(Interval {
            first_value: 0,
            last_value: 0,
            lower: f64::NEG_INFINITY,
            upper: 0.5,
        }));
        grid.add_attribute(x);
        grid.add_cell(vec![0], 2, &[]);
        grid.add_cell(vec![1], 1, &[]);

        grid.sort_attribute_parts();
        assert!(grid.check().is_ok());
        // The part starting at value 0 is now first, and the cells followed
        assert_eq!(grid.cell_at(&[0]).unwrap().frequency, 1);
        assert_eq!(grid.cell_at(&[1]).unwrap().frequency, 2);
    }

    #[test]
    fn test_copy_informative_drops_single_part_attributes() {
        let mut grid = DataGrid::new(0);
        let mut x = GridAttribute::numeric("X", vec![0.0, 1.0], vec![1, 1]);
        x.add_part(Part::Interval(Interval {
            first_value: 0,
            last_value: 0,
            lower: f64::NEG_INFINITY,
            upper: 0.5,
        }));
        x.add_part(Part::Interval(Interval {
            first_value: 1,
            last_value: 1,
            lower: 0.5,
            upper: f64::INFINITY,
        }));
        let mut y = GridAttribute::numeric("Y", vec![0.0, 1.0], vec![1, 1]);
        y.add_part(Part::Interval(Interval {
            first_value: 0,
            last_value: 1,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }));
        grid.add_attribute(x);
        grid.add_attribute(y);
        grid.add_cell(vec![0, 0], 1, &[]);
        grid.add_cell(vec![1, 0], 1, &[]);

        let informative = grid.copy_informative();
        assert_eq!(informative.attribute_count(), 1);
        assert_eq!(informative.attribute(0).name(), "X");
        assert_eq!(informative.grid_frequency(), 2);
        assert!(informative.check().is_ok());
    }
}
