//! Gene-level statistics computed from grouped guide phenotypes.
//!
//! Guides are deduplicated on (gene, sequence), negative controls are held out
//! as the reference population, and each requested analysis contributes a
//! score column plus a column counting the guides that had a value.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tracing::{debug, info};

use crate::analysis::mann_whitney::mann_whitney_pvalue;
use crate::analysis::phenotype::{NegativeTable, PhenotypeTable};
use crate::data_handling::library::LibraryTable;
use crate::error::{Result, ScreenError};
use crate::helper_functions::{finite_values, nan_mean, LeveledTable};
use crate::models::{GeneKey, GeneStatKey, PhenotypeKey};

pub const MW_PVALUE_LABEL: &str = "Mann-Whitney p-value";

/// One gene-scoring function with its parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analysis {
    /// Mean of the `n` strongest scores, or of all scores when `n <= 0`.
    Average { n: i64 },
    /// Two-sided Mann-Whitney p-value against the negative controls.
    MannWhitney,
    /// The `n`th strongest score.
    NthBest { n: usize },
}

impl Analysis {
    pub fn from_config(name: &str, params: &[i64]) -> Result<Self> {
        let single = |name: &str| match params {
            [n] => Ok(*n),
            _ => Err(ScreenError::config(format!(
                "{name} takes exactly one parameter, got {}",
                params.len()
            ))),
        };
        match name {
            "calculate_ave" => Ok(Analysis::Average { n: single(name)? }),
            "calculate_mw" => Ok(Analysis::MannWhitney),
            "calculate_nth" => {
                let n = single(name)?;
                if n < 1 {
                    return Err(ScreenError::config(format!("calculate_nth needs a rank of at least 1, got {n}")));
                }
                Ok(Analysis::NthBest { n: n as usize })
            }
            other => Err(ScreenError::UnknownAnalysis(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Analysis::Average { .. } => "calculate_ave",
            Analysis::MannWhitney => "calculate_mw",
            Analysis::NthBest { .. } => "calculate_nth",
        }
    }

    pub fn score_label(&self) -> String {
        match self {
            Analysis::Average { n } if *n <= 0 => "average of all phenotypes".to_string(),
            Analysis::Average { n } => format!("average phenotype of strongest {n}"),
            Analysis::MannWhitney => MW_PVALUE_LABEL.to_string(),
            Analysis::NthBest { n } => format!("{n}th best score"),
        }
    }

    pub fn count_label(&self) -> String {
        match self {
            Analysis::Average { n } if *n <= 0 => "average of all phenotypes_sgRNAcount".to_string(),
            Analysis::Average { .. } => "sgRNA count_avg".to_string(),
            Analysis::MannWhitney => "sgRNA count_MW".to_string(),
            Analysis::NthBest { .. } => "sgRNA count_nth best".to_string(),
        }
    }

    /// Scores one group; `values` may contain missing entries.
    pub fn score(&self, values: &[f64], negatives: &[f64]) -> f64 {
        match self {
            Analysis::Average { n } if *n <= 0 => nan_mean(values),
            Analysis::Average { n } => {
                let strongest = strongest_first(values);
                let take = (*n as usize).min(strongest.len());
                nan_mean(&strongest[..take])
            }
            Analysis::MannWhitney => mann_whitney_pvalue(values, negatives),
            Analysis::NthBest { n } => strongest_first(values).get(n - 1).copied().unwrap_or(f64::NAN),
        }
    }
}

/// Valid values ordered by decreasing magnitude; equal magnitudes keep input order.
fn strongest_first(values: &[f64]) -> Vec<f64> {
    let mut valid = finite_values(values);
    valid.sort_by(|a, b| b.abs().total_cmp(&a.abs()));
    valid
}

// ─── grouping ────────────────────────────────────────────────────────────────

/// Phenotype-table rows per gene (or gene + transcript), in key order.
#[derive(Debug, Clone)]
pub struct GeneGroups {
    pub by_transcript: bool,
    pub keys: Vec<GeneKey>,
    pub members: Vec<Vec<usize>>,
}

/// Groups targeting guides, skipping negative controls and repeated (gene, sequence) rows.
pub fn group_guides(library: &LibraryTable, phenotypes: &PhenotypeTable, by_transcript: bool) -> Result<GeneGroups> {
    let rows = phenotypes.row_index();
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut groups: BTreeMap<GeneKey, Vec<usize>> = BTreeMap::new();
    let mut duplicates = 0usize;

    for entry in &library.entries {
        if !seen.insert((entry.gene.as_str(), entry.sequence.as_str())) {
            duplicates += 1;
            continue;
        }
        if entry.is_negative_control() {
            continue;
        }
        let row = *rows
            .get(entry.id.as_str())
            .ok_or_else(|| ScreenError::library(format!("guide {} has no phenotype row", entry.id)))?;
        let key = GeneKey {
            gene: entry.gene.clone(),
            transcript: by_transcript.then(|| entry.transcript_label().to_string()),
        };
        groups.entry(key).or_default().push(row);
    }

    if duplicates > 0 {
        debug!("{} guides share gene and sequence with an earlier guide and were skipped", duplicates);
    }

    let (keys, members) = groups.into_iter().unzip();
    Ok(GeneGroups {
        by_transcript,
        keys,
        members,
    })
}

// ─── gene table ──────────────────────────────────────────────────────────────

/// Gene (or transcript) rows × (phenotype, replicate, statistic) columns.
#[derive(Debug, Clone)]
pub struct GeneTable {
    pub by_transcript: bool,
    pub keys: Vec<GeneKey>,
    pub columns: BTreeMap<GeneStatKey, Vec<f64>>,
}

/// Applies every analysis to every phenotype column.
pub fn compute_gene_scores(
    groups: &GeneGroups,
    phenotypes: &PhenotypeTable,
    negatives: &NegativeTable,
    analyses: &[Analysis],
) -> GeneTable {
    info!("Computing gene scores for {} groups", groups.keys.len());

    let mut columns = BTreeMap::new();
    for analysis in analyses {
        info!("--{}", analysis.name());
        for (key, scores) in &phenotypes.columns {
            let reference = finite_values(&negatives.column(key));
            let mut stat = Vec::with_capacity(groups.members.len());
            let mut counts = Vec::with_capacity(groups.members.len());
            for members in &groups.members {
                let values: Vec<f64> = members.iter().map(|&row| scores[row]).collect();
                counts.push(finite_values(&values).len() as f64);
                stat.push(analysis.score(&values, &reference));
            }
            columns.insert(GeneStatKey::new(key, analysis.score_label()), stat);
            columns.insert(GeneStatKey::new(key, analysis.count_label()), counts);
        }
    }

    GeneTable {
        by_transcript: groups.by_transcript,
        keys: groups.keys.clone(),
        columns,
    }
}

impl GeneTable {
    pub fn stat(&self, column: &PhenotypeKey, statistic: &str) -> Option<&[f64]> {
        self.columns
            .get(&GeneStatKey::new(column, statistic))
            .map(Vec::as_slice)
    }

    pub fn has_statistic(&self, statistic: &str) -> bool {
        self.columns.keys().any(|k| k.statistic == statistic)
    }

    /// Distinct (phenotype, replicate) blocks in column order.
    pub fn phenotype_columns(&self) -> Vec<PhenotypeKey> {
        let mut seen: Vec<PhenotypeKey> = Vec::new();
        for key in self.columns.keys() {
            let column = key.column();
            if seen.last() != Some(&column) {
                seen.push(column);
            }
        }
        seen
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut table = LeveledTable::new(&["phenotype", "replicate", "statistic"])
            .with_index("gene", self.keys.iter().map(|k| Some(k.gene.clone())).collect());
        if self.by_transcript {
            table = table.with_index("transcripts", self.keys.iter().map(|k| k.transcript.clone()).collect());
        }
        for (key, values) in &self.columns {
            table.push_floats(
                vec![key.phenotype.clone(), key.replicate.clone(), key.statistic.clone()],
                values,
            );
        }
        table.write(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::library::tests::entry;

    fn library() -> LibraryTable {
        LibraryTable::new(vec![
            entry("a1", "AAK1", Some("P1"), "AC"),
            entry("a2", "AAK1", Some("P1"), "AG"),
            entry("a3", "AAK1", Some("P2"), "AT"),
            entry("a4", "AAK1", Some("P2"), "AT"),
            entry("b1", "BRCA2", Some("P1"), "CC"),
            entry("b2", "BRCA2", Some("P1"), "CA"),
            entry("n1", "negative_control", Some("na"), "GG"),
            entry("n2", "negative_control", Some("na"), "GT"),
            entry("n3", "negative_control", Some("na"), "GC"),
        ])
        .unwrap()
    }

    fn phenotypes(lib: &LibraryTable) -> PhenotypeTable {
        let mut table = PhenotypeTable::new(lib.ids().map(str::to_string).collect());
        table.insert(
            PhenotypeKey::new("gamma", "Rep1"),
            vec![-0.9, -0.5, 0.2, 5.0, f64::NAN, f64::NAN, 0.01, -0.02, 0.03],
        );
        table
    }

    #[test]
    fn analysis_names_and_parameters() {
        assert_eq!(Analysis::from_config("calculate_ave", &[3]).unwrap(), Analysis::Average { n: 3 });
        assert_eq!(Analysis::from_config("calculate_mw", &[]).unwrap(), Analysis::MannWhitney);
        assert!(matches!(
            Analysis::from_config("calculate_ks", &[]),
            Err(ScreenError::UnknownAnalysis(_))
        ));
        assert!(Analysis::from_config("calculate_nth", &[0]).is_err());
        assert!(Analysis::from_config("calculate_ave", &[]).is_err());
    }

    #[test]
    fn average_of_strongest_uses_magnitude() {
        let values = [0.1, -0.8, f64::NAN, 0.5];
        assert!((Analysis::Average { n: 2 }.score(&values, &[]) - (-0.15)).abs() < 1e-12);
        assert!((Analysis::Average { n: 0 }.score(&values, &[]) - (-0.2 / 3.0)).abs() < 1e-12);
        assert!((Analysis::Average { n: 10 }.score(&values, &[]) - (-0.2 / 3.0)).abs() < 1e-12);
        assert!(Analysis::Average { n: 2 }.score(&[f64::NAN], &[]).is_nan());
    }

    #[test]
    fn nth_best_keeps_sign_and_needs_enough_guides() {
        let values = [0.1, -0.8, f64::NAN, 0.5];
        assert_eq!(Analysis::NthBest { n: 1 }.score(&values, &[]), -0.8);
        assert_eq!(Analysis::NthBest { n: 3 }.score(&values, &[]), 0.1);
        assert!(Analysis::NthBest { n: 4 }.score(&values, &[]).is_nan());
    }

    #[test]
    fn groups_skip_controls_and_repeated_sequences() {
        let lib = library();
        let groups = group_guides(&lib, &phenotypes(&lib), false).unwrap();
        let genes: Vec<&str> = groups.keys.iter().map(|k| k.gene.as_str()).collect();
        assert_eq!(genes, vec!["AAK1", "BRCA2"]);
        assert_eq!(groups.members[0], vec![0, 1, 2]);

        let by_transcript = group_guides(&lib, &phenotypes(&lib), true).unwrap();
        assert_eq!(by_transcript.keys.len(), 3);
        assert_eq!(by_transcript.keys[1].transcript.as_deref(), Some("P2"));
    }

    #[test]
    fn empty_group_gets_missing_pvalue_and_zero_count() {
        let lib = library();
        let table = phenotypes(&lib);
        let groups = group_guides(&lib, &table, false).unwrap();
        let negatives = table.negative_table(&lib.negative_control_mask());

        let genes = compute_gene_scores(
            &groups,
            &table,
            &negatives,
            &[Analysis::MannWhitney, Analysis::Average { n: 0 }],
        );
        let column = PhenotypeKey::new("gamma", "Rep1");
        let pvals = genes.stat(&column, MW_PVALUE_LABEL).unwrap();
        assert!(pvals[0].is_finite());
        assert!(pvals[1].is_nan());
        assert_eq!(genes.stat(&column, "sgRNA count_MW").unwrap(), &[3.0, 0.0]);
        let mean = genes.stat(&column, "average of all phenotypes").unwrap();
        assert!((mean[0] - (-0.4)).abs() < 1e-12);
        assert_eq!(genes.phenotype_columns(), vec![column]);
    }
}
