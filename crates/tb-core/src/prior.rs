// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Universal-prior codelengths and combinatorial log-counts.
//!
//! All costs in the system are codelengths in nats (negative natural log of
//! a probability). The universal prior over natural numbers is Rissanen's
//! log* code; partition counts use Stirling-number sums.

use std::f64::consts::LN_2;
use std::sync::OnceLock;

/// Normalising constant of the log* universal code (Rissanen 1983).
pub const UNIVERSAL_CODE_CONSTANT: f64 = 2.865_064;

/// Size of the exact `ln n!` table; Stirling's series beyond.
const LN_FACTORIAL_TABLE_SIZE: usize = 1024;

/// Codelength of a natural number `n >= 1` under the universal prior.
///
/// `L(n) = ln 2 * (log2 c0 + sum_k max(log2^(k) n, 0))` in nats, so that
/// `sum_n exp(-L(n)) <= 1`. `L(1) = ln c0 ~ 1.0526`.
pub fn universal_code_length(n: u64) -> f64 {
    assert!(n >= 1, "universal code length requires n >= 1");
    let mut total = UNIVERSAL_CODE_CONSTANT.log2();
    let mut term = (n as f64).log2();
    while term > 0.0 {
        total += term;
        term = term.log2();
    }
    total * LN_2
}

fn ln_factorial_table() -> &'static [f64] {
    static TABLE: OnceLock<Vec<f64>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Vec::with_capacity(LN_FACTORIAL_TABLE_SIZE);
        let mut sum = 0.0;
        table.push(0.0);
        for i in 1..LN_FACTORIAL_TABLE_SIZE {
            sum += (i as f64).ln();
            table.push(sum);
        }
        table
    })
}

/// `ln n!`, exact below 1024, Stirling's series beyond.
pub fn ln_factorial(n: u64) -> f64 {
    if (n as usize) < LN_FACTORIAL_TABLE_SIZE {
        ln_factorial_table()[n as usize]
    } else {
        let x = n as f64;
        x * x.ln() - x + 0.5 * (2.0 * std::f64::consts::PI * x).ln() + 1.0 / (12.0 * x)
            - 1.0 / (360.0 * x * x * x)
    }
}

/// `ln C(n, k)`.
pub fn ln_binomial(n: u64, k: u64) -> f64 {
    assert!(k <= n, "ln_binomial requires k <= n");
    if k == 0 || k == n {
        return 0.0;
    }
    ln_factorial(n) - ln_factorial(k) - ln_factorial(n - k)
}

/// `ln(exp(a) + exp(b))` without overflow.
fn ln_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Log of the number of partitions of `n` elements into at most `k`
/// non-empty groups: `ln sum_{j=1..min(n,k)} S(n, j)` with `S` the Stirling
/// numbers of the second kind.
///
/// Exact log-space recurrence for moderate `n`; above the threshold the
/// `k^n / k!` surjection bound is used, which is what the grouping cost
/// needs at that scale.
pub fn ln_bell(n: u64, k: u64) -> f64 {
    assert!(n >= 1 && k >= 1, "ln_bell requires n >= 1 and k >= 1");
    let k = k.min(n);
    if k == 1 || n == 1 {
        return 0.0;
    }
    const EXACT_LIMIT: u64 = 2000;
    if n > EXACT_LIMIT {
        return (n as f64) * (k as f64).ln() - ln_factorial(k);
    }

    // row[j] = ln S(i, j), computed row by row
    let kk = k as usize;
    let mut row = vec![f64::NEG_INFINITY; kk + 1];
    row[1] = 0.0;
    for _ in 2..=n {
        for j in (1..=kk).rev() {
            let keep = if row[j] > f64::NEG_INFINITY {
                (j as f64).ln() + row[j]
            } else {
                f64::NEG_INFINITY
            };
            row[j] = ln_add_exp(keep, row[j - 1]);
        }
        row[0] = f64::NEG_INFINITY;
    }
    let mut total = f64::NEG_INFINITY;
    for j in 1..=kk {
        total = ln_add_exp(total, row[j]);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universal_code_length_small_values() {
        // L(1) = ln c0
        assert!((universal_code_length(1) - UNIVERSAL_CODE_CONSTANT.ln()).abs() < 1e-12);
        // L(2) = ln c0 + ln 2
        assert!((universal_code_length(2) - (UNIVERSAL_CODE_CONSTANT.ln() + LN_2)).abs() < 1e-12);
        // Monotone increasing
        let mut prev = 0.0;
        for n in 1..100u64 {
            let cost = universal_code_length(n);
            assert!(cost > prev);
            prev = cost;
        }
    }

    #[test]
    fn test_universal_prior_sums_below_one() {
        let total: f64 = (1..100_000u64)
            .map(|n| (-universal_code_length(n)).exp())
            .sum();
        assert!(total < 1.0);
    }

    #[test]
    fn test_ln_factorial() {
        assert_eq!(ln_factorial(0), 0.0);
        assert_eq!(ln_factorial(1), 0.0);
        assert!((ln_factorial(5) - 120f64.ln()).abs() < 1e-10);
        // Stirling branch continuous with the table
        let table_end = ln_factorial(1023);
        let stirling = ln_factorial(1024);
        assert!((stirling - table_end - 1024f64.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_ln_binomial() {
        assert_eq!(ln_binomial(10, 0), 0.0);
        assert_eq!(ln_binomial(10, 10), 0.0);
        assert!((ln_binomial(5, 2) - 10f64.ln()).abs() < 1e-10);
        assert!((ln_binomial(52, 5) - 2_598_960f64.ln()).abs() < 1e-8);
    }

    #[test]
    fn test_ln_bell_exact_values() {
        // S(3,1)+S(3,2) = 1 + 3 = 4
        assert!((ln_bell(3, 2) - 4f64.ln()).abs() < 1e-10);
        // Bell(4) = 15
        assert!((ln_bell(4, 4) - 15f64.ln()).abs() < 1e-10);
        // Bell(5) = 52
        assert!((ln_bell(5, 5) - 52f64.ln()).abs() < 1e-10);
        assert_eq!(ln_bell(7, 1), 0.0);
    }
}
