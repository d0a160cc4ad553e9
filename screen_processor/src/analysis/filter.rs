use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::ScreenError;

/// How the two counts of a row are compared against the read threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// Mask the row if either count is below the threshold.
    All,
    /// Mask the row only if both counts are below the threshold.
    Any,
}

impl FromStr for FilterType {
    type Err = ScreenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" | "both" => Ok(FilterType::All),
            "any" | "either" => Ok(FilterType::Any),
            _ => Err(ScreenError::UnknownFilterType(s.to_string())),
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterType::All => "all",
            FilterType::Any => "any",
        };
        write!(f, "{s}")
    }
}

/// Two aligned count columns; NaN marks a masked row.
#[derive(Debug, Clone, PartialEq)]
pub struct CountPair {
    pub first: Vec<f64>,
    pub second: Vec<f64>,
}

impl CountPair {
    pub fn from_counts(first: &[u64], second: &[u64]) -> Self {
        Self {
            first: first.iter().map(|&c| c as f64).collect(),
            second: second.iter().map(|&c| c as f64).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
    }

    /// Rows where neither value is missing.
    pub fn valid_rows(&self) -> usize {
        self.first
            .iter()
            .zip(&self.second)
            .filter(|(a, b)| !a.is_nan() && !b.is_nan())
            .count()
    }
}

fn fails_filter(a: f64, b: f64, filter_type: FilterType, threshold: f64) -> bool {
    match filter_type {
        FilterType::All => a.min(b) < threshold,
        FilterType::Any => a.max(b) < threshold,
    }
}

/// Masks whole rows of `counts` whose reads fall short of `threshold`.
pub fn filter_low_counts(counts: &CountPair, filter_type: FilterType, threshold: f64) -> CountPair {
    let mut result = counts.clone();
    let mut masked = 0usize;

    for i in 0..counts.len() {
        if fails_filter(counts.first[i], counts.second[i], filter_type, threshold) {
            result.first[i] = f64::NAN;
            result.second[i] = f64::NAN;
            masked += 1;
        }
    }

    debug!(
        "filter {} < {}: masked {} of {} guides",
        filter_type,
        threshold,
        masked,
        counts.len()
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn masked_rows(pair: &CountPair) -> Vec<usize> {
        (0..pair.len()).filter(|&i| pair.first[i].is_nan()).collect()
    }

    #[test]
    fn policy_names_and_aliases() {
        assert_eq!("both".parse::<FilterType>().unwrap(), FilterType::All);
        assert_eq!("Either".parse::<FilterType>().unwrap(), FilterType::Any);
        assert!(matches!("most".parse::<FilterType>(), Err(ScreenError::UnknownFilterType(_))));
    }

    #[test]
    fn all_masks_when_one_column_is_low() {
        let pair = CountPair::from_counts(&[10, 60, 80], &[70, 40, 90]);
        let filtered = filter_low_counts(&pair, FilterType::All, 50.0);
        assert_eq!(masked_rows(&filtered), vec![0, 1]);
        assert!(filtered.second[0].is_nan());
        assert_eq!(filtered.first[2], 80.0);
    }

    #[test]
    fn any_masks_only_when_both_columns_are_low() {
        let pair = CountPair::from_counts(&[10, 60, 20], &[70, 40, 30]);
        let filtered = filter_low_counts(&pair, FilterType::Any, 50.0);
        assert_eq!(masked_rows(&filtered), vec![2]);
        assert_eq!(filtered.valid_rows(), 2);
    }

    proptest! {
        #[test]
        fn raising_the_threshold_never_unmasks(
            rows in proptest::collection::vec((0u64..500, 0u64..500), 1..50),
            t1 in 0u64..300,
            step in 0u64..300,
        ) {
            let (a, b): (Vec<u64>, Vec<u64>) = rows.into_iter().unzip();
            let pair = CountPair::from_counts(&a, &b);
            let low = masked_rows(&filter_low_counts(&pair, FilterType::Any, t1 as f64));
            let high = masked_rows(&filter_low_counts(&pair, FilterType::Any, (t1 + step) as f64));
            prop_assert!(low.iter().all(|i| high.contains(i)));
        }
    }
}
