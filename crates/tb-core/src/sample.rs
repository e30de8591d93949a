// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Deterministic multinomial sample generation.
//!
//! The feature generator allocates a real-valued *drawing number* (a budget
//! of prior draws) down the prior tree. Every split is computed here, with
//! no randomness: the most probable multinomial outcome is reconstructed by
//! largest-remainder rounding, so two runs with the same inputs produce the
//! same allocation.
//!
//! Drawing numbers are integer-valued `f64` because budgets can exceed
//! `u64` range during trial doubling (the overflow guard sits at 1e100).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::prior::universal_code_length;

/// One sampled composite outcome: an index per dimension, its probability
/// and the number of draws allocated to it.
#[derive(Debug, Clone)]
pub struct IndexedFrequency {
    /// One index per sampled dimension (subset member or product component).
    pub indexes: Vec<usize>,
    /// Probability of this outcome under the (possibly partial) prior.
    pub prob: f64,
    /// Draws allocated to this outcome; integer-valued.
    pub frequency: f64,
}

/// Deterministic multinomial sample generator.
#[derive(Debug, Default)]
pub struct SampleGenerator;

/// Hard cap on best-first enumeration, a backstop against huge budgets.
const MAX_ENUMERATED_OUTCOMES: usize = 100_000;

impl SampleGenerator {
    /// Create a new generator.
    pub fn new() -> Self {
        Self
    }

    /// Split `n` draws into `k` cells minimising the L2 error: the first
    /// `n mod k` cells receive one extra draw.
    pub fn best_equidistributed_sample(&self, n: f64, k: usize) -> Vec<f64> {
        debug_assert!(n >= 0.0);
        if k == 0 {
            return Vec::new();
        }
        let base = (n / k as f64).floor();
        let extra = (n - base * k as f64).round() as usize;
        let mut out = vec![base; k];
        for cell in out.iter_mut().take(extra.min(k)) {
            *cell += 1.0;
        }
        out
    }

    /// Most probable multinomial outcome of `n` draws over `probs`.
    ///
    /// Largest-remainder rounding: `out[i] = floor(n * p[i])` plus one draw
    /// for the largest fractional remainders until `sum out = round(n * sum p)`.
    /// Accepts partial probability vectors (`sum p <= 1`); for a complete
    /// vector the result sums exactly to `n` and each `|out[i]/n - p[i]|`
    /// is at most `1/n`.
    pub fn best_sample(&self, n: f64, probs: &[f64]) -> Vec<f64> {
        debug_assert!(n >= 0.0);
        debug_assert!(self.check_partial_prob_vector(probs));
        let total_prob: f64 = probs.iter().sum();
        let target_total = (n * total_prob).round();

        let mut out = Vec::with_capacity(probs.len());
        let mut remainders = Vec::with_capacity(probs.len());
        let mut allocated = 0.0;
        for (i, &p) in probs.iter().enumerate() {
            let target = n * p;
            let floor = target.floor();
            out.push(floor);
            allocated += floor;
            remainders.push((i, target - floor));
        }

        let mut missing = (target_total - allocated).round() as i64;
        if missing > 0 {
            remainders.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });
            for &(i, _) in remainders.iter() {
                if missing == 0 {
                    break;
                }
                out[i] += 1.0;
                missing -= 1;
            }
        }
        out
    }

    /// Draws over sizes `1..=max_size` under the universal natural-number
    /// prior `p(s) = exp(-L(s))` (a partial distribution).
    pub fn best_natural_numbers_prior_sample(&self, n: f64, max_size: usize) -> Vec<f64> {
        let probs: Vec<f64> = (1..=max_size)
            .map(|s| (-universal_code_length(s as u64)).exp())
            .collect();
        self.best_sample(n, &probs)
    }

    /// Allocate `n` draws over the `size`-subsets of `probs`, each subset
    /// weighted by the product of its member probabilities.
    ///
    /// Subsets are enumerated best-first; enumeration stops once a subset
    /// can no longer receive a draw (its probability falls below
    /// `p_best / (n + 1)`) or the hard cap is hit. Returned index vectors
    /// are sorted ascending; entries with zero frequency are kept so callers
    /// can account for the full enumerated support.
    pub fn best_selection_sample(
        &self,
        n: f64,
        size: usize,
        probs: &[f64],
    ) -> Vec<IndexedFrequency> {
        debug_assert!(self.check_partial_prob_vector(probs));
        if size == 0 || size > probs.len() || n <= 0.0 {
            return Vec::new();
        }

        // Work over probabilities sorted decreasing, remembering originals.
        let mut order: Vec<usize> = (0..probs.len()).collect();
        order.sort_by(|&a, &b| {
            probs[b]
                .partial_cmp(&probs[a])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });
        let sorted: Vec<f64> = order.iter().map(|&i| probs[i]).collect();

        let product = |combo: &[usize]| -> f64 { combo.iter().map(|&i| sorted[i]).product() };

        // Best-first expansion over position combinations (strictly
        // increasing indexes into the sorted probabilities).
        let first: Vec<usize> = (0..size).collect();
        let best_prob = product(&first);
        let min_useful = best_prob / (n + 1.0);
        let limit = outcome_limit(n);

        let mut heap: BinaryHeap<Outcome> = BinaryHeap::new();
        let mut seen: HashSet<Vec<usize>> = HashSet::new();
        seen.insert(first.clone());
        heap.push(Outcome {
            prob: best_prob,
            indexes: first,
        });

        let mut outcomes: Vec<(Vec<usize>, f64)> = Vec::new();
        while let Some(Outcome { prob, indexes }) = heap.pop() {
            if prob < min_useful && !outcomes.is_empty() {
                break;
            }
            outcomes.push((indexes.clone(), prob));
            if outcomes.len() >= limit {
                break;
            }
            // Successors: advance one position while keeping indexes
            // strictly increasing.
            for pos in 0..size {
                let next_value = indexes[pos] + 1;
                let bound = if pos + 1 < size {
                    indexes[pos + 1]
                } else {
                    sorted.len()
                };
                if next_value < bound {
                    let mut succ = indexes.clone();
                    succ[pos] = next_value;
                    if seen.insert(succ.clone()) {
                        heap.push(Outcome {
                            prob: product(&succ),
                            indexes: succ,
                        });
                    }
                }
            }
        }

        self.allocate(n, outcomes, |combo| {
            let mut original: Vec<usize> = combo.iter().map(|&i| order[i]).collect();
            original.sort_unstable();
            original
        })
    }

    /// Allocate `n` draws over the product space of several independent
    /// distributions: each outcome picks one index per input vector and is
    /// weighted by the product of the picked probabilities.
    pub fn best_multiple_product_sample(
        &self,
        n: f64,
        prob_vectors: &[Vec<f64>],
    ) -> Vec<IndexedFrequency> {
        if n <= 0.0 || prob_vectors.is_empty() || prob_vectors.iter().any(|v| v.is_empty()) {
            return Vec::new();
        }

        let mut orders: Vec<Vec<usize>> = Vec::with_capacity(prob_vectors.len());
        let mut sorted: Vec<Vec<f64>> = Vec::with_capacity(prob_vectors.len());
        for v in prob_vectors {
            debug_assert!(self.check_partial_prob_vector(v));
            let mut order: Vec<usize> = (0..v.len()).collect();
            order.sort_by(|&a, &b| {
                v[b].partial_cmp(&v[a])
                    .unwrap_or(Ordering::Equal)
                    .then(a.cmp(&b))
            });
            sorted.push(order.iter().map(|&i| v[i]).collect());
            orders.push(order);
        }

        let product = |combo: &[usize]| -> f64 {
            combo
                .iter()
                .enumerate()
                .map(|(dim, &i)| sorted[dim][i])
                .product()
        };

        let first = vec![0usize; prob_vectors.len()];
        let best_prob = product(&first);
        let min_useful = best_prob / (n + 1.0);
        let limit = outcome_limit(n);

        let mut heap: BinaryHeap<Outcome> = BinaryHeap::new();
        let mut seen: HashSet<Vec<usize>> = HashSet::new();
        seen.insert(first.clone());
        heap.push(Outcome {
            prob: best_prob,
            indexes: first,
        });

        let mut outcomes: Vec<(Vec<usize>, f64)> = Vec::new();
        while let Some(Outcome { prob, indexes }) = heap.pop() {
            if prob < min_useful && !outcomes.is_empty() {
                break;
            }
            outcomes.push((indexes.clone(), prob));
            if outcomes.len() >= limit {
                break;
            }
            for dim in 0..indexes.len() {
                if indexes[dim] + 1 < sorted[dim].len() {
                    let mut succ = indexes.clone();
                    succ[dim] += 1;
                    if seen.insert(succ.clone()) {
                        heap.push(Outcome {
                            prob: product(&succ),
                            indexes: succ,
                        });
                    }
                }
            }
        }

        self.allocate(n, outcomes, |combo| {
            combo
                .iter()
                .enumerate()
                .map(|(dim, &i)| orders[dim][i])
                .collect()
        })
    }

    /// Check that a probability vector is a valid partial distribution:
    /// every entry in `[0, 1]` and the sum at most one (with tolerance).
    pub fn check_partial_prob_vector(&self, probs: &[f64]) -> bool {
        let mut total = 0.0;
        for &p in probs {
            if !(0.0..=1.0).contains(&p) {
                return false;
            }
            total += p;
        }
        total <= 1.0 + 1e-9
    }

    /// Distribute `n` draws over enumerated outcomes with `best_sample`,
    /// remapping sorted positions back to caller indexes.
    fn allocate<F>(
        &self,
        n: f64,
        outcomes: Vec<(Vec<usize>, f64)>,
        remap: F,
    ) -> Vec<IndexedFrequency>
    where
        F: Fn(&[usize]) -> Vec<usize>,
    {
        let probs: Vec<f64> = outcomes.iter().map(|(_, p)| *p).collect();
        let frequencies = self.best_sample(n, &probs);
        outcomes
            .into_iter()
            .zip(frequencies)
            .map(|((combo, prob), frequency)| IndexedFrequency {
                indexes: remap(&combo),
                prob,
                frequency,
            })
            .collect()
    }
}

fn outcome_limit(n: f64) -> usize {
    if n >= MAX_ENUMERATED_OUTCOMES as f64 {
        MAX_ENUMERATED_OUTCOMES
    } else {
        (n as usize).max(1)
    }
}

/// Heap entry ordered by probability (max-heap), ties broken by indexes for
/// determinism.
struct Outcome {
    prob: f64,
    indexes: Vec<usize>,
}

impl PartialEq for Outcome {
    fn eq(&self, other: &Self) -> bool {
        self.prob == other.prob && self.indexes == other.indexes
    }
}

impl Eq for Outcome {}

impl PartialOrd for Outcome {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Outcome {
    fn cmp(&self, other: &Self) -> Ordering {
        self.prob
            .partial_cmp(&other.prob)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.indexes.cmp(&self.indexes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equidistributed_sample() {
        let generator = SampleGenerator::new();
        let out = generator.best_equidistributed_sample(10.0, 4);
        assert_eq!(out, vec![3.0, 3.0, 2.0, 2.0]);
        assert_eq!(out.iter().sum::<f64>(), 10.0);

        let out = generator.best_equidistributed_sample(2.0, 5);
        assert_eq!(out, vec![1.0, 1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_best_sample_complete_vector() {
        let generator = SampleGenerator::new();
        let probs = vec![0.5, 0.3, 0.2];
        let out = generator.best_sample(10.0, &probs);
        assert_eq!(out.iter().sum::<f64>(), 10.0);
        assert_eq!(out, vec![5.0, 3.0, 2.0]);
    }

    #[test]
    fn test_best_sample_rounding() {
        let generator = SampleGenerator::new();
        let probs = vec![1.0 / 3.0; 3];
        let out = generator.best_sample(10.0, &probs);
        assert_eq!(out.iter().sum::<f64>(), 10.0);
        for (i, &o) in out.iter().enumerate() {
            assert!((o / 10.0 - probs[i]).abs() <= 0.1 + 1e-12);
        }
    }

    #[test]
    fn test_best_sample_partial_vector() {
        let generator = SampleGenerator::new();
        let probs = vec![0.2, 0.1];
        let out = generator.best_sample(10.0, &probs);
        assert_eq!(out.iter().sum::<f64>(), 3.0);
    }

    #[test]
    fn test_natural_numbers_prior_sample_favours_small_sizes() {
        let generator = SampleGenerator::new();
        let out = generator.best_natural_numbers_prior_sample(100.0, 5);
        assert_eq!(out.len(), 5);
        for w in out.windows(2) {
            assert!(w[0] >= w[1]);
        }
        assert!(out[0] > 0.0);
    }

    #[test]
    fn test_selection_sample_orders_by_product() {
        let generator = SampleGenerator::new();
        let probs = vec![0.5, 0.3, 0.1];
        let out = generator.best_selection_sample(8.0, 2, &probs);
        assert!(!out.is_empty());
        // Best pair is {0, 1}
        assert_eq!(out[0].indexes, vec![0, 1]);
        assert!((out[0].prob - 0.15).abs() < 1e-12);
        // Probabilities decrease down the enumeration
        for w in out.windows(2) {
            assert!(w[0].prob >= w[1].prob);
        }
        let total: f64 = out.iter().map(|o| o.frequency).sum();
        assert!(total <= 8.0);
    }

    #[test]
    fn test_multiple_product_sample() {
        let generator = SampleGenerator::new();
        let vectors = vec![vec![0.6, 0.4], vec![0.7, 0.3]];
        let out = generator.best_multiple_product_sample(10.0, &vectors);
        assert_eq!(out[0].indexes, vec![0, 0]);
        assert!((out[0].prob - 0.42).abs() < 1e-12);
        let total: f64 = out.iter().map(|o| o.frequency).sum();
        assert_eq!(total, 10.0);
    }

    #[test]
    fn test_check_partial_prob_vector() {
        let generator = SampleGenerator::new();
        assert!(generator.check_partial_prob_vector(&[0.2, 0.3]));
        assert!(generator.check_partial_prob_vector(&[0.5, 0.5]));
        assert!(!generator.check_partial_prob_vector(&[0.8, 0.4]));
        assert!(!generator.check_partial_prob_vector(&[-0.1]));
    }
}
