//! Guide-level phenotype scores: pseudocounting, negative-control baseline,
//! growth normalization, and the table that collects the resulting columns.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::analysis::filter::CountPair;
use crate::error::{Result, ScreenError};
use crate::helper_functions::{nan_median, LeveledTable};
use crate::models::PhenotypeKey;

// ───────── pseudocounts ─────────

/// What to do with zero counts before taking log ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudocountBehavior {
    /// Add the pseudocount to both counts of rows containing a zero.
    ZerosOnly,
    /// Add the pseudocount to every row.
    AllValues,
    /// Drop rows with a count ≤ 0.
    FilterOut,
}

impl FromStr for PseudocountBehavior {
    type Err = ScreenError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" | "zeros only" => Ok(PseudocountBehavior::ZerosOnly),
            "all values" => Ok(PseudocountBehavior::AllValues),
            "filter out" => Ok(PseudocountBehavior::FilterOut),
            _ => Err(ScreenError::UnknownPseudocountBehavior(s.to_string())),
        }
    }
}

impl fmt::Display for PseudocountBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PseudocountBehavior::ZerosOnly => "zeros only",
            PseudocountBehavior::AllValues => "all values",
            PseudocountBehavior::FilterOut => "filter out",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PseudocountPolicy {
    pub behavior: PseudocountBehavior,
    pub value: f64,
}

impl PseudocountPolicy {
    /// A non-positive pseudocount could leave zero denominators, so it is only
    /// accepted together with `FilterOut`.
    pub fn new(behavior: PseudocountBehavior, value: f64) -> Result<Self> {
        if behavior != PseudocountBehavior::FilterOut && !(value > 0.0 && value.is_finite()) {
            return Err(ScreenError::config(format!(
                "pseudocount must be positive with behavior '{behavior}', got {value}"
            )));
        }
        Ok(Self { behavior, value })
    }

    pub fn apply(&self, counts: &CountPair) -> CountPair {
        let mut result = counts.clone();
        for i in 0..counts.len() {
            let (a, b) = (counts.first[i], counts.second[i]);
            match self.behavior {
                PseudocountBehavior::ZerosOnly => {
                    if a.min(b) == 0.0 {
                        result.first[i] = a + self.value;
                        result.second[i] = b + self.value;
                    }
                }
                PseudocountBehavior::AllValues => {
                    result.first[i] = a + self.value;
                    result.second[i] = b + self.value;
                }
                PseudocountBehavior::FilterOut => {
                    if a.min(b) <= 0.0 {
                        result.first[i] = f64::NAN;
                        result.second[i] = f64::NAN;
                    }
                }
            }
        }
        result
    }
}

// ───────── scoring ─────────

/// Scores for one (phenotype, replicate) comparison plus the scalars behind them.
#[derive(Debug, Clone)]
pub struct PhenotypeScore {
    pub scores: Vec<f64>,
    /// Σ condition1 / Σ condition2 after pseudocounting.
    pub counts_ratio: f64,
    /// Median log2 enrichment of the reference guides.
    pub wt_log2e: f64,
}

fn log2_enrichment(count1: f64, count2: f64, counts_ratio: f64) -> f64 {
    (counts_ratio * count2 / count1).log2()
}

fn finite_or_nan(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        f64::NAN
    }
}

/// Converts a filtered (condition1, condition2) count pair into phenotype scores.
///
/// `negative_controls` flags the guides whose median enrichment defines zero;
/// with `normalize_to_negatives` off every guide contributes to that median.
pub fn compute_phenotype_score(
    counts: &CountPair,
    negative_controls: &[bool],
    growth_value: f64,
    pseudocount: &PseudocountPolicy,
    normalize_to_negatives: bool,
) -> PhenotypeScore {
    let pseudo = pseudocount.apply(counts);

    let total1: f64 = pseudo.first.iter().filter(|v| !v.is_nan()).sum();
    let total2: f64 = pseudo.second.iter().filter(|v| !v.is_nan()).sum();
    let counts_ratio = total1 / total2;

    let log2e: Vec<f64> = pseudo
        .first
        .iter()
        .zip(&pseudo.second)
        .map(|(&c1, &c2)| finite_or_nan(log2_enrichment(c1, c2, counts_ratio)))
        .collect();

    let reference: Vec<f64> = log2e
        .iter()
        .zip(negative_controls)
        .filter(|(_, &neg)| neg || !normalize_to_negatives)
        .map(|(&v, _)| v)
        .collect();
    let wt_log2e = nan_median(&reference);
    if wt_log2e.is_nan() {
        warn!("no reference guides passed filter; phenotype scores are all missing");
    }

    let scores = log2e
        .iter()
        .map(|&v| finite_or_nan((v - wt_log2e) / growth_value))
        .collect();

    debug!("countsRatio {:.4}, wtLog2E {:.4}, growth {}", counts_ratio, wt_log2e, growth_value);
    PhenotypeScore {
        scores,
        counts_ratio,
        wt_log2e,
    }
}

// ───────── phenotype table ─────────

/// Guide-level phenotype scores, one column per (phenotype, replicate).
#[derive(Debug, Clone, Default)]
pub struct PhenotypeTable {
    pub guide_ids: Vec<String>,
    pub columns: BTreeMap<PhenotypeKey, Vec<f64>>,
}

/// Phenotype rows of the negative-control guides, row-major over `keys`.
#[derive(Debug, Clone)]
pub struct NegativeTable {
    pub keys: Vec<PhenotypeKey>,
    pub rows: Vec<Vec<f64>>,
}

impl NegativeTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of one column, missing ones included.
    pub fn column(&self, key: &PhenotypeKey) -> Vec<f64> {
        match self.keys.iter().position(|k| k == key) {
            Some(j) => self.rows.iter().map(|row| row[j]).collect(),
            None => Vec::new(),
        }
    }
}

impl PhenotypeTable {
    pub fn new(guide_ids: Vec<String>) -> Self {
        Self {
            guide_ids,
            columns: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: PhenotypeKey, scores: Vec<f64>) {
        debug_assert_eq!(scores.len(), self.guide_ids.len());
        self.columns.insert(key, scores);
    }

    pub fn column(&self, key: &PhenotypeKey) -> Option<&[f64]> {
        self.columns.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.guide_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guide_ids.is_empty()
    }

    pub fn row_index(&self) -> HashMap<&str, usize> {
        self.guide_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect()
    }

    /// Rows flagged in `mask` (aligned with `guide_ids`).
    pub fn negative_table(&self, mask: &[bool]) -> NegativeTable {
        let keys: Vec<PhenotypeKey> = self.columns.keys().cloned().collect();
        let rows = (0..self.len())
            .filter(|&i| mask.get(i).copied().unwrap_or(false))
            .map(|i| keys.iter().map(|k| self.columns[k][i]).collect())
            .collect();
        NegativeTable { keys, rows }
    }

    /// Appends rows whose values follow `keys` order.
    pub fn append_rows(&mut self, ids: Vec<String>, keys: &[PhenotypeKey], rows: Vec<Vec<f64>>) {
        for row in &rows {
            for (key, value) in keys.iter().zip(row) {
                if let Some(column) = self.columns.get_mut(key) {
                    column.push(*value);
                }
            }
        }
        self.guide_ids.extend(ids);
        let height = self.guide_ids.len();
        for column in self.columns.values_mut() {
            column.resize(height, f64::NAN);
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut table = LeveledTable::new(&["phenotype", "replicate"])
            .with_index("id", self.guide_ids.iter().cloned().map(Some).collect());
        for (key, scores) in &self.columns {
            table.push_floats(vec![key.phenotype.clone(), key.replicate.clone()], scores);
        }
        table.write(path)
    }
}
