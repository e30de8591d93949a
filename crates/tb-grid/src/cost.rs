// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Additive codelength cost of a data grid.
//!
//! The cost of a grid is the negative log posterior of the partition model:
//! a model part summing per-attribute partition codelengths, and a
//! likelihood part summing cell codelengths. Lower is better; optimizers
//! compare costs with [`COST_EPSILON`] tolerance.

use tb_core::prior::{ln_bell, ln_binomial, ln_factorial, universal_code_length};

use crate::grid::{DataGrid, GridAttributeKind, Part};

/// Comparison tolerance on grid costs.
pub const COST_EPSILON: f64 = 1e-6;

/// Codelength cost function over data grids.
pub trait GridCostModel {
    /// Model codelength of one attribute's partition.
    fn attribute_cost(&self, grid: &DataGrid, attribute: usize) -> f64;

    /// Likelihood codelength of the cells.
    fn cells_cost(&self, grid: &DataGrid) -> f64;

    /// Total codelength.
    fn total_cost(&self, grid: &DataGrid) -> f64 {
        let mut total = self.cells_cost(grid);
        for attribute in 0..grid.attribute_count() {
            total += self.attribute_cost(grid, attribute);
        }
        total
    }
}

/// The default MODL-style codelength model.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodelengthCostModel;

impl CodelengthCostModel {
    /// Create the model.
    pub fn new() -> Self {
        Self
    }

    fn partition_choice_cost(&self, grid: &DataGrid, attribute: usize) -> f64 {
        let attr = grid.attribute(attribute);
        let part_count = attr.part_count().max(1) as u64;
        match attr.kind() {
            GridAttributeKind::Numeric => {
                // Interval bounds chosen among the granularized units
                let units = (attr.granularized_value_count().max(1) as u64).max(part_count);
                ln_binomial(units - 1, part_count - 1)
            }
            GridAttributeKind::Categorical => {
                let values = (attr.initial_value_count().max(1) as u64).max(part_count);
                ln_bell(values, part_count)
            }
            GridAttributeKind::VarPart => {
                let tokens = grid
                    .inner_attributes()
                    .map(|inner| inner.token_count())
                    .unwrap_or(0)
                    .max(1) as u64;
                ln_bell(tokens.max(part_count), part_count)
            }
        }
    }

    fn inner_attributes_cost(&self, grid: &DataGrid) -> f64 {
        let inner = match grid.inner_attributes() {
            Some(inner) => inner,
            None => return 0.0,
        };
        let mut total = 0.0;
        for attr in inner.attributes() {
            let part_count = attr.part_count().max(1) as u64;
            total += universal_code_length(part_count);
            total += match attr.kind() {
                GridAttributeKind::Numeric => {
                    let units = (attr.granularized_value_count().max(1) as u64).max(part_count);
                    ln_binomial(units - 1, part_count - 1)
                }
                _ => {
                    let values = (attr.initial_value_count().max(1) as u64).max(part_count);
                    ln_bell(values, part_count)
                }
            };
        }
        total
    }

    /// Value-to-part parameter cost of one attribute (unsupervised
    /// likelihood of the within-part value distribution).
    fn value_distribution_cost(&self, grid: &DataGrid, attribute: usize) -> f64 {
        let attr = grid.attribute(attribute);
        if attr.kind() == GridAttributeKind::VarPart {
            return 0.0;
        }
        let frequencies = grid.part_frequencies(attribute);
        let mut total = 0.0;
        for (part, &frequency) in attr.parts().iter().zip(frequencies.iter()) {
            let units = part.unit_count() as u64;
            if units > 1 && frequency > 0 {
                total += ln_binomial(frequency + units - 1, units - 1);
            }
        }
        total
    }
}

impl GridCostModel for CodelengthCostModel {
    fn attribute_cost(&self, grid: &DataGrid, attribute: usize) -> f64 {
        let attr = grid.attribute(attribute);
        let part_count = attr.part_count().max(1) as u64;
        let mut cost = universal_code_length(part_count);
        cost += self.partition_choice_cost(grid, attribute);
        if attr.kind() == GridAttributeKind::VarPart {
            cost += self.inner_attributes_cost(grid);
        }
        if !grid.is_supervised() {
            cost += self.value_distribution_cost(grid, attribute);
        }
        cost
    }

    fn cells_cost(&self, grid: &DataGrid) -> f64 {
        let target_count = grid.target_value_count() as u64;
        if target_count > 0 {
            // Per cell: target-distribution parameters plus the multinomial
            // likelihood of the observed target counts
            let mut total = 0.0;
            for cell in grid.cells() {
                let frequency = cell.frequency;
                total += ln_binomial(frequency + target_count - 1, target_count - 1);
                total += ln_factorial(frequency);
                for &target_frequency in &cell.target_frequencies {
                    total -= ln_factorial(target_frequency);
                }
            }
            total
        } else {
            // Instance distribution over the cell space
            let grid_frequency = grid.grid_frequency();
            let cell_space: u64 = grid
                .attributes()
                .iter()
                .map(|a| a.part_count().max(1) as u64)
                .fold(1u64, |acc, count| acc.saturating_mul(count));
            let mut total = ln_binomial(
                grid_frequency + cell_space - 1,
                cell_space.saturating_sub(1),
            );
            total += ln_factorial(grid_frequency);
            for cell in grid.cells() {
                total -= ln_factorial(cell.frequency);
            }
            total
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridAttribute, Interval, ValueGroup};

    fn interval(first: usize, last: usize) -> Part {
        Part::Interval(Interval {
            first_value: first,
            last_value: last,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        })
    }

    fn supervised_grid(split: bool) -> DataGrid {
        // 100 instances, numeric attribute with 10 values, binary target;
        // values 0..4 are pure class 0, values 5..9 pure class 1
        let mut grid = DataGrid::new(2);
        let mut x = GridAttribute::numeric(
            "X",
            (0..10).map(f64::from).collect(),
            vec![10; 10],
        );
        if split {
            x.add_part(interval(0, 4));
            x.add_part(interval(5, 9));
        } else {
            x.add_part(interval(0, 9));
        }
        grid.add_attribute(x);
        if split {
            grid.add_cell(vec![0], 50, &[50, 0]);
            grid.add_cell(vec![1], 50, &[0, 50]);
        } else {
            grid.add_cell(vec![0], 100, &[50, 50]);
        }
        grid
    }

    #[test]
    fn test_pure_split_beats_terminal() {
        let model = CodelengthCostModel::new();
        let terminal = supervised_grid(false);
        let split = supervised_grid(true);
        let terminal_cost = model.total_cost(&terminal);
        let split_cost = model.total_cost(&split);
        assert!(terminal_cost.is_finite() && split_cost.is_finite());
        assert!(
            split_cost < terminal_cost - COST_EPSILON,
            "pure split {split_cost} should beat mixed terminal {terminal_cost}"
        );
    }

    #[test]
    fn test_costs_are_additive_and_positive() {
        let model = CodelengthCostModel::new();
        let grid = supervised_grid(true);
        let total = model.total_cost(&grid);
        let parts: f64 =
            model.attribute_cost(&grid, 0) + model.cells_cost(&grid);
        assert!((total - parts).abs() < 1e-12);
        assert!(total > 0.0);
    }

    #[test]
    fn test_unsupervised_concentration_beats_uniform() {
        // Two categorical attributes; mass concentrated on the diagonal
        // compresses better than the same mass spread uniformly
        let model = CodelengthCostModel::new();

        let make = |diagonal: bool| {
            let mut grid = DataGrid::new(0);
            for name in ["A", "B"] {
                let mut attr = GridAttribute::categorical(name, vec![50, 50]);
                attr.add_part(Part::ValueGroup(ValueGroup {
                    value_indexes: vec![0],
                }));
                attr.add_part(Part::ValueGroup(ValueGroup {
                    value_indexes: vec![1],
                }));
                grid.add_attribute(attr);
            }
            if diagonal {
                grid.add_cell(vec![0, 0], 50, &[]);
                grid.add_cell(vec![1, 1], 50, &[]);
            } else {
                grid.add_cell(vec![0, 0], 25, &[]);
                grid.add_cell(vec![0, 1], 25, &[]);
                grid.add_cell(vec![1, 0], 25, &[]);
                grid.add_cell(vec![1, 1], 25, &[]);
            }
            grid
        };
        let diagonal_cost = model.total_cost(&make(true));
        let uniform_cost = model.total_cost(&make(false));
        assert!(diagonal_cost < uniform_cost);
    }
}
