use statrs::distribution::{ContinuousCDF, Normal};

use crate::helper_functions::finite_values;

/// Outcome of a two-sided Mann-Whitney U test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MannWhitneyResult {
    /// The larger of U1 and U2.
    pub u: f64,
    pub p_value: f64,
}

/// Midranks (1-based) of `values` plus the tie correction term Σ(t³ - t).
fn rank_with_ties(values: &[f64]) -> (Vec<f64>, f64) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let midrank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = midrank;
        }
        let t = (j - i + 1) as f64;
        tie_term += t * t * t - t;
        i = j + 1;
    }
    (ranks, tie_term)
}

/// Two-sided Mann-Whitney U test of `x` against `y`, missing values ignored.
///
/// Uses the normal approximation with tie and continuity correction. Returns
/// `None` when either sample is empty or the rank variance is zero.
pub fn mann_whitney_u(x: &[f64], y: &[f64]) -> Option<MannWhitneyResult> {
    let x = finite_values(x);
    let y = finite_values(y);
    if x.is_empty() || y.is_empty() {
        return None;
    }

    let n1 = x.len() as f64;
    let n2 = y.len() as f64;
    let n = n1 + n2;

    let combined: Vec<f64> = x.iter().chain(&y).copied().collect();
    let (ranks, tie_term) = rank_with_ties(&combined);
    let r1: f64 = ranks[..x.len()].iter().sum();

    let u1 = r1 - n1 * (n1 + 1.0) / 2.0;
    let u2 = n1 * n2 - u1;
    let u = u1.max(u2);

    let mu = n1 * n2 / 2.0;
    let sigma = (n1 * n2 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)))).sqrt();
    if !(sigma > 0.0 && sigma.is_finite()) {
        return None;
    }

    let z = (u - mu - 0.5) / sigma;
    let normal = Normal::new(0.0, 1.0).ok()?;
    let p_value = (2.0 * normal.sf(z)).clamp(0.0, 1.0);

    Some(MannWhitneyResult { u, p_value })
}

/// p-value of [`mann_whitney_u`], NaN when the test is undefined.
pub fn mann_whitney_pvalue(x: &[f64], y: &[f64]) -> f64 {
    mann_whitney_u(x, y).map_or(f64::NAN, |r| r.p_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separated_samples() {
        let result = mann_whitney_u(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]).unwrap();
        assert_eq!(result.u, 9.0);
        assert!((result.p_value - 0.080856).abs() < 1e-4);
    }

    #[test]
    fn symmetric_in_its_arguments() {
        let a = [0.3, -1.2, 2.5, 0.0, 0.7];
        let b = [0.1, 0.2, -0.4, 1.1, 0.9, -2.0];
        assert!((mann_whitney_pvalue(&a, &b) - mann_whitney_pvalue(&b, &a)).abs() < 1e-12);
    }

    #[test]
    fn ties_use_midranks() {
        let (ranks, tie_term) = rank_with_ties(&[2.0, 1.0, 2.0, 3.0]);
        assert_eq!(ranks, vec![2.5, 1.0, 2.5, 4.0]);
        assert_eq!(tie_term, 6.0);
    }

    #[test]
    fn identical_samples_are_not_significant() {
        let p = mann_whitney_pvalue(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 4.0]);
        assert!(p > 0.9);
    }

    #[test]
    fn empty_or_degenerate_samples_are_missing() {
        assert!(mann_whitney_pvalue(&[], &[1.0, 2.0]).is_nan());
        assert!(mann_whitney_pvalue(&[f64::NAN], &[1.0, 2.0]).is_nan());
        assert!(mann_whitney_pvalue(&[1.0, 1.0], &[1.0, 1.0]).is_nan());
    }
}
