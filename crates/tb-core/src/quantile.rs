// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Quantile builders over observed value distributions.
//!
//! Numeric attributes are granularized by equal-frequency intervals,
//! categorical attributes by frequency-ordered groups with a catch-all last
//! group. Both the selection-operand analyser and the data-grid
//! granularization consume these builders.

/// Equal-frequency interval builder over sorted distinct numeric values.
#[derive(Debug, Clone)]
pub struct QuantileIntervalBuilder {
    values: Vec<f64>,
    frequencies: Vec<u64>,
    cumulative: Vec<u64>,
    total: u64,
    /// Current quantization: per interval, inclusive (first, last) value indexes.
    intervals: Vec<(usize, usize)>,
}

impl QuantileIntervalBuilder {
    /// Build from sorted distinct values with their frequencies.
    pub fn from_sorted_values(values: Vec<f64>, frequencies: Vec<u64>) -> Self {
        assert_eq!(values.len(), frequencies.len());
        debug_assert!(values.windows(2).all(|w| w[0] < w[1]));
        let mut cumulative = Vec::with_capacity(values.len());
        let mut total = 0;
        for &f in &frequencies {
            total += f;
            cumulative.push(total);
        }
        Self {
            values,
            frequencies,
            cumulative,
            total,
            intervals: Vec::new(),
        }
    }

    /// Build from raw observations (sorted and deduplicated internally).
    pub fn from_raw(mut raw: Vec<f64>) -> Self {
        raw.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mut values = Vec::new();
        let mut frequencies: Vec<u64> = Vec::new();
        for v in raw {
            match values.last() {
                Some(&last) if last == v => *frequencies.last_mut().unwrap() += 1,
                _ => {
                    values.push(v);
                    frequencies.push(1);
                }
            }
        }
        Self::from_sorted_values(values, frequencies)
    }

    /// Number of distinct values.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Total instance count.
    pub fn total_frequency(&self) -> u64 {
        self.total
    }

    /// Quantize into at most `k` equal-frequency intervals; returns the
    /// actual interval count (bounds collapse on heavy values).
    pub fn compute_quantiles(&mut self, k: usize) -> usize {
        self.intervals.clear();
        if self.values.is_empty() || k == 0 {
            return 0;
        }
        // Last value index reached by each quantile rank; ranks falling on
        // the same heavy value collapse into a single boundary
        let mut boundaries = Vec::with_capacity(k);
        for j in 1..=k {
            let rank = (j as u128 * self.total as u128).div_ceil(k as u128) as u64;
            let idx = self.cumulative.partition_point(|&c| c < rank);
            boundaries.push(idx.min(self.values.len() - 1));
        }
        boundaries.dedup();
        let mut first = 0usize;
        for &last in &boundaries {
            self.intervals.push((first, last));
            first = last + 1;
        }
        self.intervals.len()
    }

    /// Number of intervals of the current quantization.
    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    /// Inclusive (first, last) value-index range of interval `i`.
    pub fn interval_value_range(&self, i: usize) -> (usize, usize) {
        self.intervals[i]
    }

    /// Instance index of the last instance falling in interval `i`
    /// (0-based, cumulative).
    pub fn interval_last_instance_index(&self, i: usize) -> u64 {
        let (_, last) = self.intervals[i];
        self.cumulative[last] - 1
    }

    /// Real bounds of interval `i`: half-open `]lower; upper]` with
    /// midpoints between adjacent distinct values, infinite at the ends.
    pub fn interval_bounds(&self, i: usize) -> (f64, f64) {
        let (first, last) = self.intervals[i];
        let lower = if first == 0 {
            f64::NEG_INFINITY
        } else {
            (self.values[first - 1] + self.values[first]) / 2.0
        };
        let upper = if last + 1 >= self.values.len() {
            f64::INFINITY
        } else {
            (self.values[last] + self.values[last + 1]) / 2.0
        };
        (lower, upper)
    }

    /// Frequency of interval `i`.
    pub fn interval_frequency(&self, i: usize) -> u64 {
        let (first, last) = self.intervals[i];
        let below = if first == 0 {
            0
        } else {
            self.cumulative[first - 1]
        };
        self.cumulative[last] - below
    }

    /// Frequencies of the distinct values.
    pub fn value_frequencies(&self) -> &[u64] {
        &self.frequencies
    }
}

/// Frequency-ordered group builder for categorical values.
///
/// Input frequencies must be sorted by decreasing frequency; the value
/// index is the rank in that order. Granularization keeps one group per
/// value heavy enough for the requested granularity and pools the tail into
/// a catch-all last group.
#[derive(Debug, Clone)]
pub struct QuantileGroupBuilder {
    frequencies: Vec<u64>,
    total: u64,
    groups: Vec<(usize, usize)>,
}

impl QuantileGroupBuilder {
    /// Build from frequencies sorted in decreasing order.
    pub fn from_frequencies(frequencies: Vec<u64>) -> Self {
        debug_assert!(frequencies.windows(2).all(|w| w[0] >= w[1]));
        let total = frequencies.iter().sum();
        Self {
            frequencies,
            total,
            groups: Vec::new(),
        }
    }

    /// Number of distinct values.
    pub fn value_count(&self) -> usize {
        self.frequencies.len()
    }

    /// Quantize into at most `k` groups; returns the actual group count.
    pub fn compute_quantiles(&mut self, k: usize) -> usize {
        self.groups.clear();
        if self.frequencies.is_empty() || k == 0 {
            return 0;
        }
        if k >= self.frequencies.len() {
            // One group per value, no catch-all needed
            for i in 0..self.frequencies.len() {
                self.groups.push((i, i));
            }
            return self.groups.len();
        }
        // Values at least as frequent as the equal split get their own
        // group; the remainder pools into the catch-all
        let threshold = self.total / k as u64;
        let mut singleton_count = 0;
        while singleton_count < k - 1
            && singleton_count < self.frequencies.len() - 1
            && self.frequencies[singleton_count] >= threshold.max(1)
        {
            singleton_count += 1;
        }
        for i in 0..singleton_count {
            self.groups.push((i, i));
        }
        self.groups
            .push((singleton_count, self.frequencies.len() - 1));
        self.groups.len()
    }

    /// Number of groups of the current quantization.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// First value index of group `g`.
    pub fn group_first_value_index(&self, g: usize) -> usize {
        self.groups[g].0
    }

    /// Last value index of group `g`.
    pub fn group_last_value_index(&self, g: usize) -> usize {
        self.groups[g].1
    }

    /// Frequency of group `g`.
    pub fn group_frequency(&self, g: usize) -> u64 {
        let (first, last) = self.groups[g];
        self.frequencies[first..=last].iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_builder_even_split() {
        let mut builder = QuantileIntervalBuilder::from_raw((0..100).map(f64::from).collect());
        assert_eq!(builder.value_count(), 100);
        let count = builder.compute_quantiles(4);
        assert_eq!(count, 4);
        for i in 0..4 {
            assert_eq!(builder.interval_frequency(i), 25);
        }
        assert_eq!(builder.interval_last_instance_index(0), 24);
        let (lower, upper) = builder.interval_bounds(0);
        assert_eq!(lower, f64::NEG_INFINITY);
        assert!((upper - 24.5).abs() < 1e-12);
    }

    #[test]
    fn test_interval_builder_collapses_on_heavy_value() {
        // One value holds 90% of the mass: fewer actual intervals than asked
        let mut values = vec![1.0; 90];
        values.extend((2..12).map(f64::from));
        let mut builder = QuantileIntervalBuilder::from_raw(values);
        let count = builder.compute_quantiles(10);
        assert!(count < 10);
        assert_eq!(
            (0..count).map(|i| builder.interval_frequency(i)).sum::<u64>(),
            100
        );
    }

    #[test]
    fn test_group_builder_catch_all() {
        let mut builder = QuantileGroupBuilder::from_frequencies(vec![50, 30, 10, 5, 3, 2]);
        let count = builder.compute_quantiles(3);
        assert_eq!(count, 3);
        assert_eq!(builder.group_first_value_index(0), 0);
        assert_eq!(builder.group_last_value_index(2), 5);
        let total: u64 = (0..count).map(|g| builder.group_frequency(g)).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_group_builder_enough_groups() {
        let mut builder = QuantileGroupBuilder::from_frequencies(vec![5, 4, 3]);
        assert_eq!(builder.compute_quantiles(8), 3);
        assert_eq!(builder.group_frequency(1), 4);
    }
}
