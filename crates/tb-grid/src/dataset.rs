// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Initial-grid construction from columnar data.
//!
//! The optimizer works on grids; the database reader hands over columns.
//! This module builds the *initial* grid: elementary parts (one per
//! distinct value) and one cell per observed value combination.

use std::collections::HashMap;

use tb_core::{PrepError, PrepResult};

use crate::grid::{DataGrid, GridAttribute, Interval, Part, ValueGroup};

/// One input column.
#[derive(Debug, Clone)]
pub enum GridColumn {
    /// Numeric values, one per row.
    Numeric { name: String, values: Vec<f64> },
    /// Categorical values, one per row.
    Categorical { name: String, values: Vec<String> },
}

impl GridColumn {
    fn len(&self) -> usize {
        match self {
            GridColumn::Numeric { values, .. } => values.len(),
            GridColumn::Categorical { values, .. } => values.len(),
        }
    }
}

/// Build the initial grid from columns and an optional target column.
///
/// Elementary universes: numeric values sorted ascending, categorical
/// values sorted by decreasing frequency (ties by first appearance).
pub fn build_initial_grid(
    columns: &[GridColumn],
    target: Option<&[String]>,
) -> PrepResult<DataGrid> {
    if columns.is_empty() {
        return Err(PrepError::InvalidParameter(
            "at least one column is required".to_string(),
        ));
    }
    let row_count = columns[0].len();
    if columns.iter().any(|c| c.len() != row_count) {
        return Err(PrepError::InvalidParameter(
            "columns must have the same length".to_string(),
        ));
    }
    if let Some(target) = target {
        if target.len() != row_count {
            return Err(PrepError::InvalidParameter(
                "target column length mismatch".to_string(),
            ));
        }
    }

    // Target value encoding, by decreasing frequency
    let (target_indexes, target_value_count) = match target {
        Some(target) => {
            let (indexes, count) = encode_by_frequency(target);
            (Some(indexes), count)
        }
        None => (None, 0),
    };

    let mut grid = DataGrid::new(target_value_count);
    let mut row_value_indexes: Vec<Vec<usize>> = Vec::with_capacity(columns.len());

    for column in columns {
        match column {
            GridColumn::Numeric { name, values } => {
                let mut distinct: Vec<f64> = values.clone();
                distinct.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                distinct.dedup();

                let index_of = |v: f64| -> usize {
                    distinct
                        .partition_point(|&d| d < v)
                };
                let mut frequencies = vec![0u64; distinct.len()];
                let mut indexes = Vec::with_capacity(row_count);
                for &v in values {
                    let index = index_of(v);
                    frequencies[index] += 1;
                    indexes.push(index);
                }

                let mut attribute =
                    GridAttribute::numeric(name.clone(), distinct.clone(), frequencies);
                for i in 0..distinct.len() {
                    let lower = if i == 0 {
                        f64::NEG_INFINITY
                    } else {
                        (distinct[i - 1] + distinct[i]) / 2.0
                    };
                    let upper = if i + 1 == distinct.len() {
                        f64::INFINITY
                    } else {
                        (distinct[i] + distinct[i + 1]) / 2.0
                    };
                    attribute.add_part(Part::Interval(Interval {
                        first_value: i,
                        last_value: i,
                        lower,
                        upper,
                    }));
                }
                grid.add_attribute(attribute);
                row_value_indexes.push(indexes);
            }
            GridColumn::Categorical { name, values } => {
                let (indexes, distinct_count) = encode_by_frequency(values);
                let mut frequencies = vec![0u64; distinct_count];
                for &index in &indexes {
                    frequencies[index] += 1;
                }
                let mut attribute = GridAttribute::categorical(name.clone(), frequencies);
                for i in 0..distinct_count {
                    attribute.add_part(Part::ValueGroup(ValueGroup {
                        value_indexes: vec![i],
                    }));
                }
                grid.add_attribute(attribute);
                row_value_indexes.push(indexes);
            }
        }
    }

    // One cell per observed combination
    for row in 0..row_count {
        let part_indexes: Vec<usize> =
            row_value_indexes.iter().map(|column| column[row]).collect();
        let mut target_frequencies = vec![0u64; target_value_count];
        if let Some(ref indexes) = target_indexes {
            target_frequencies[indexes[row]] = 1;
        }
        grid.add_cell(part_indexes, 1, &target_frequencies);
    }

    debug_assert!(grid.check().is_ok());
    Ok(grid)
}

/// Encode strings as indexes ordered by decreasing frequency, ties broken
/// by first appearance. Returns (per-row indexes, distinct count).
fn encode_by_frequency(values: &[String]) -> (Vec<usize>, usize) {
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    let mut frequencies: Vec<(usize, u64)> = Vec::new();
    let mut raw_indexes = Vec::with_capacity(values.len());
    for value in values {
        let next = first_seen.len();
        let raw = *first_seen.entry(value.as_str()).or_insert(next);
        if raw == frequencies.len() {
            frequencies.push((raw, 0));
        }
        frequencies[raw].1 += 1;
        raw_indexes.push(raw);
    }

    let mut order: Vec<usize> = (0..frequencies.len()).collect();
    order.sort_by(|&a, &b| frequencies[b].1.cmp(&frequencies[a].1).then(a.cmp(&b)));
    let mut remap = vec![0usize; frequencies.len()];
    for (rank, &raw) in order.iter().enumerate() {
        remap[raw] = rank;
    }
    (
        raw_indexes.into_iter().map(|raw| remap[raw]).collect(),
        frequencies.len(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_initial_grid() {
        let grid = build_initial_grid(
            &[
                GridColumn::Numeric {
                    name: "X".to_string(),
                    values: vec![1.0, 2.0, 2.0, 3.0],
                },
                GridColumn::Categorical {
                    name: "C".to_string(),
                    values: vec!["u".into(), "v".into(), "v".into(), "v".into()],
                },
            ],
            Some(&["a".into(), "b".into(), "a".into(), "a".into()]),
        )
        .unwrap();

        assert_eq!(grid.attribute_count(), 2);
        assert_eq!(grid.target_value_count(), 2);
        assert_eq!(grid.grid_frequency(), 4);
        assert!(grid.check().is_ok());

        let x = grid.attribute(0);
        assert_eq!(x.part_count(), 3);
        assert_eq!(x.numeric_values(), &[1.0, 2.0, 3.0]);
        assert_eq!(x.value_frequencies(), &[1, 2, 1]);

        // "v" is the most frequent categorical value: index 0
        let c = grid.attribute(1);
        assert_eq!(c.value_frequencies(), &[3, 1]);

        // Rows (2.0, "v") collapse into one cell of frequency 2
        assert_eq!(grid.cell_count(), 3);
        let cell = grid.cell_at(&[1, 0]).unwrap();
        assert_eq!(cell.frequency, 2);
        // Target "a" is more frequent: index 0
        assert_eq!(cell.target_frequencies, vec![1, 1]);
    }

    #[test]
    fn test_column_length_mismatch_rejected() {
        let result = build_initial_grid(
            &[
                GridColumn::Numeric {
                    name: "X".to_string(),
                    values: vec![1.0],
                },
                GridColumn::Numeric {
                    name: "Y".to_string(),
                    values: vec![1.0, 2.0],
                },
            ],
            None,
        );
        assert!(result.is_err());
    }
}
