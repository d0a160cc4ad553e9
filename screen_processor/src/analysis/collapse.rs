//! Collapses a transcript-level gene table to one row per gene by keeping,
//! for each phenotype column, the transcript with the smallest Mann-Whitney p-value.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

use crate::analysis::gene_scores::{GeneTable, MW_PVALUE_LABEL};
use crate::error::{Result, ScreenError};
use crate::helper_functions::LeveledTable;
use crate::models::{PhenotypeKey, NO_TRANSCRIPT};

/// Best-transcript statistics of one (phenotype, replicate) column.
#[derive(Debug, Clone, Default)]
pub struct CollapsedBlock {
    /// Chosen transcript per gene; `None` when no transcript had a p-value.
    pub transcripts: Vec<Option<String>>,
    pub stats: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct CollapsedGeneTable {
    pub genes: Vec<String>,
    pub blocks: BTreeMap<PhenotypeKey, CollapsedBlock>,
}

impl CollapsedGeneTable {
    pub fn stat(&self, column: &PhenotypeKey, statistic: &str) -> Option<&[f64]> {
        self.blocks
            .get(column)
            .and_then(|block| block.stats.get(statistic))
            .map(Vec::as_slice)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut table = LeveledTable::new(&["phenotype", "replicate", "statistic"])
            .with_index("gene", self.genes.iter().cloned().map(Some).collect());
        for (column, block) in &self.blocks {
            table.push_strings(
                vec![column.phenotype.clone(), column.replicate.clone(), "transcripts".to_string()],
                block.transcripts.clone(),
            );
            for (statistic, values) in &block.stats {
                table.push_floats(
                    vec![column.phenotype.clone(), column.replicate.clone(), statistic.clone()],
                    values,
                );
            }
        }
        table.write(path)
    }
}

/// Index of the smallest finite p-value; ties keep the earliest row.
fn best_row(rows: &[usize], pvalues: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for &row in rows {
        let p = pvalues[row];
        if !p.is_finite() {
            continue;
        }
        match best {
            Some(b) if pvalues[b] <= p => {}
            _ => best = Some(row),
        }
    }
    best
}

pub fn collapse_to_best_transcript(table: &GeneTable) -> Result<CollapsedGeneTable> {
    if !table.by_transcript {
        return Err(ScreenError::config("transcript collapse needs a transcript-level gene table"));
    }
    if !table.has_statistic(MW_PVALUE_LABEL) {
        return Err(ScreenError::config("transcript collapse needs calculate_mw among the analyses"));
    }

    // keys are sorted by (gene, transcript) so each gene's rows are contiguous and ordered
    let mut rows_by_gene: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (row, key) in table.keys.iter().enumerate() {
        rows_by_gene.entry(key.gene.as_str()).or_default().push(row);
    }
    let genes: Vec<String> = rows_by_gene.keys().map(|g| g.to_string()).collect();

    let mut blocks = BTreeMap::new();
    for column in table.phenotype_columns() {
        let Some(pvalues) = table.stat(&column, MW_PVALUE_LABEL) else {
            continue;
        };
        let chosen: Vec<Option<usize>> = rows_by_gene.values().map(|rows| best_row(rows, pvalues)).collect();

        let mut block = CollapsedBlock {
            transcripts: chosen
                .iter()
                .map(|c| {
                    c.map(|row| {
                        table.keys[row]
                            .transcript
                            .clone()
                            .unwrap_or_else(|| NO_TRANSCRIPT.to_string())
                    })
                })
                .collect(),
            stats: BTreeMap::new(),
        };
        for (key, values) in table.columns.iter().filter(|(k, _)| k.column() == column) {
            let picked = chosen.iter().map(|c| c.map_or(f64::NAN, |row| values[row])).collect();
            block.stats.insert(key.statistic.clone(), picked);
        }
        blocks.insert(column, block);
    }

    info!("Collapsed {} transcripts to {} genes", table.keys.len(), genes.len());
    Ok(CollapsedGeneTable { genes, blocks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeneKey, GeneStatKey};

    fn key(gene: &str, transcript: &str) -> GeneKey {
        GeneKey {
            gene: gene.to_string(),
            transcript: Some(transcript.to_string()),
        }
    }

    fn transcript_table() -> GeneTable {
        let column = PhenotypeKey::new("gamma", "Rep1");
        let mut columns = BTreeMap::new();
        columns.insert(GeneStatKey::new(&column, MW_PVALUE_LABEL), vec![0.2, 0.01, 0.05, f64::NAN]);
        columns.insert(GeneStatKey::new(&column, "sgRNA count_MW"), vec![4.0, 3.0, 5.0, 0.0]);
        GeneTable {
            by_transcript: true,
            keys: vec![key("AAK1", "P1"), key("AAK1", "P2"), key("BRCA2", "P1"), key("CDK1", "P1")],
            columns,
        }
    }

    #[test]
    fn keeps_the_most_significant_transcript() {
        let collapsed = collapse_to_best_transcript(&transcript_table()).unwrap();
        let column = PhenotypeKey::new("gamma", "Rep1");

        assert_eq!(collapsed.genes, vec!["AAK1", "BRCA2", "CDK1"]);
        let block = &collapsed.blocks[&column];
        assert_eq!(block.transcripts, vec![Some("P2".to_string()), Some("P1".to_string()), None]);
        assert_eq!(&collapsed.stat(&column, "sgRNA count_MW").unwrap()[..2], &[3.0, 5.0]);
        assert!(collapsed.stat(&column, MW_PVALUE_LABEL).unwrap()[2].is_nan());
    }

    #[test]
    fn ties_go_to_the_first_transcript() {
        assert_eq!(best_row(&[0, 1, 2], &[0.3, 0.1, 0.1]), Some(1));
        assert_eq!(best_row(&[0, 1], &[f64::NAN, f64::NAN]), None);
    }

    #[test]
    fn requires_mann_whitney_pvalues() {
        let mut table = transcript_table();
        table.columns.retain(|k, _| k.statistic != MW_PVALUE_LABEL);
        assert!(collapse_to_best_transcript(&table).is_err());
    }
}
