// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Inner attributes of VarPart grids.
//!
//! A VarPart grid clusters (variable, part) tokens: the inner attributes
//! hold the per-variable partitions the tokens point into. They are shared
//! by every grid derived during one optimization, value-copied on export.

use crate::grid::{GridAttribute, VarPartToken};

/// The per-variable partitions behind a VarPart attribute.
#[derive(Debug, Clone, Default)]
pub struct InnerAttributes {
    attributes: Vec<GridAttribute>,
    varpart_granularity: u32,
}

impl InnerAttributes {
    /// Create from inner attribute partitions.
    pub fn new(attributes: Vec<GridAttribute>, varpart_granularity: u32) -> Self {
        Self {
            attributes,
            varpart_granularity,
        }
    }

    /// The inner attributes.
    pub fn attributes(&self) -> &[GridAttribute] {
        &self.attributes
    }

    /// Mutable access for merge optimization.
    pub fn attributes_mut(&mut self) -> &mut [GridAttribute] {
        &mut self.attributes
    }

    /// Replace one inner attribute's partition.
    pub fn replace_attribute(&mut self, index: usize, attribute: GridAttribute) {
        self.attributes[index] = attribute;
    }

    /// Granularity the inner partitions were built at.
    pub fn varpart_granularity(&self) -> u32 {
        self.varpart_granularity
    }

    /// Total number of tokens (inner parts over all inner attributes).
    pub fn token_count(&self) -> usize {
        self.attributes.iter().map(|a| a.part_count()).sum()
    }

    /// Enumerate every token.
    pub fn tokens(&self) -> impl Iterator<Item = VarPartToken> + '_ {
        self.attributes
            .iter()
            .enumerate()
            .flat_map(|(inner_attribute, attribute)| {
                (0..attribute.part_count()).map(move |inner_part| VarPartToken {
                    inner_attribute,
                    inner_part,
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Interval, Part};

    #[test]
    fn test_token_enumeration() {
        let mut a = GridAttribute::numeric("A", vec![0.0, 1.0], vec![1, 1]);
        a.add_part(Part::Interval(Interval {
            first_value: 0,
            last_value: 0,
            lower: f64::NEG_INFINITY,
            upper: 0.5,
        }));
        a.add_part(Part::Interval(Interval {
            first_value: 1,
            last_value: 1,
            lower: 0.5,
            upper: f64::INFINITY,
        }));
        let mut b = GridAttribute::numeric("B", vec![0.0], vec![2]);
        b.add_part(Part::Interval(Interval {
            first_value: 0,
            last_value: 0,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }));

        let inner = InnerAttributes::new(vec![a, b], 1);
        assert_eq!(inner.token_count(), 3);
        let tokens: Vec<VarPartToken> = inner.tokens().collect();
        assert_eq!(tokens.len(), 3);
        assert_eq!(
            tokens[2],
            VarPartToken {
                inner_attribute: 1,
                inner_part: 0
            }
        );
    }
}
