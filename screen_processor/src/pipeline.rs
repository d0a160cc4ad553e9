//! One experiment, end to end: library → counts → phenotypes → gene scores.
//!
//! Every stage writes its table under `<output_folder>/<experiment_name>_*`
//! before the next stage starts, so a failed run still leaves the tables of
//! the stages that completed.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::analysis::collapse::collapse_to_best_transcript;
use crate::analysis::filter::{filter_low_counts, CountPair};
use crate::analysis::gene_scores::{compute_gene_scores, group_guides, Analysis, GeneGroups, GeneTable, MW_PVALUE_LABEL};
use crate::analysis::phenotype::{compute_phenotype_score, PhenotypeTable};
use crate::analysis::plots::{
    plot_counts_histogram, plot_counts_scatter, plot_guides_per_gene, plot_phenotype_histogram, plot_premerged_counts,
    plot_replicate_scatter, plot_volcano, PlotConfig,
};
use crate::analysis::pseudogenes::{generate_pseudogenes, PseudogeneMode};
use crate::analysis::replicates::average_replicates;
use crate::config::ExperimentParameters;
use crate::data_handling::counts::{load_raw_counts, merge_counts, MergedCountsTable, RawCountsTable};
use crate::data_handling::library::LibraryDataset;
use crate::error::{Result, ScreenError};
use crate::helper_functions::{finite_values, make_directory};
use crate::models::{Dataset, PhenotypeKey, SampleKey};

/// What a finished run produced.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub guides: usize,
    pub phenotype_columns: usize,
    pub pseudogene_guides: usize,
    pub gene_rows: usize,
    pub tables: Vec<PathBuf>,
    pub figures: Vec<PathBuf>,
}

impl RunSummary {
    fn figure(&mut self, outcome: Result<PathBuf>) {
        match outcome {
            Ok(path) => self.figures.push(path),
            Err(e) => warn!("{}", e),
        }
    }
}

pub fn run_experiment(params: &ExperimentParameters, plots: Option<&PlotConfig>) -> Result<RunSummary> {
    info!("Processing experiment {}", params.experiment_name);
    make_directory(&params.output_folder)?;
    let mut summary = RunSummary::default();

    // library
    let library = LibraryDataset {
        path: params.library_table.clone(),
    }
    .load()?
    .select_sublibraries(&params.sublibraries)?;
    let path = params.output_path("_librarytable.txt");
    library.write(&path)?;
    summary.tables.push(path);
    summary.guides = library.len();

    // counts
    info!("Loading counts data");
    let raw = load_raw_counts(&params.counts_files, &library, params.strict_counts)?;
    let path = params.output_path("_rawcountstable.txt");
    raw.write(&path)?;
    summary.tables.push(path);
    let path = params.output_path("_rawcountstable_summary.txt");
    raw.write_summary(&path)?;
    summary.tables.push(path);

    let merged = merge_counts(&raw);
    let path = params.output_path("_mergedcountstable.txt");
    merged.write(&path)?;
    summary.tables.push(path);
    let path = params.output_path("_mergedcountstable_summary.txt");
    merged.write_summary(&path)?;
    summary.tables.push(path);

    if let Some(config) = plots {
        plot_counts(config, &raw, &merged, &mut summary);
    }

    // phenotypes
    let negative_mask = library.negative_control_mask();
    let phenotypes = score_phenotypes(params, &merged, &negative_mask)?;
    let path = params.output_path("_phenotypetable.txt");
    phenotypes.write(&path)?;
    summary.tables.push(path);
    summary.phenotype_columns = phenotypes.columns.len();

    if let Some(config) = plots {
        plot_comparisons(config, params, &merged, &phenotypes, &negative_mask, &mut summary);
        plot_phenotypes(config, &phenotypes, &negative_mask, &mut summary);
    }

    if params.analyses.is_empty() {
        info!("No gene analyses requested");
        return Ok(summary);
    }

    // gene scores, with the pseudogene null appended to the guide table
    let negatives = phenotypes.negative_table(&negative_mask);
    let mut rng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let pseudo = generate_pseudogenes(params.pseudogenes, &negatives, &library, &mut rng);
    summary.pseudogene_guides = pseudo.len();

    let gene_library = library.with_appended(pseudo.library.clone())?;
    let mut gene_phenotypes = phenotypes.clone();
    gene_phenotypes.append_rows(pseudo.ids(), &negatives.keys, pseudo.rows);

    let groups = group_guides(&gene_library, &gene_phenotypes, params.collapse_to_transcripts)?;
    let genes = compute_gene_scores(&groups, &gene_phenotypes, &negatives, &params.analyses);
    let path = params.output_path("_genetable.txt");
    genes.write(&path)?;
    summary.tables.push(path);
    summary.gene_rows = genes.keys.len();

    if params.collapse_to_transcripts {
        if genes.has_statistic(MW_PVALUE_LABEL) {
            let collapsed = collapse_to_best_transcript(&genes)?;
            let path = params.output_path("_genetable_collapsed.txt");
            collapsed.write(&path)?;
            summary.tables.push(path);
        } else {
            warn!("calculate_mw was not run; skipping collapse to best transcript");
        }
    }

    if let Some(config) = plots {
        plot_genes(config, params, &groups, &gene_phenotypes, &genes, &mut summary);
    }

    info!("Done: {} tables, {} figures", summary.tables.len(), summary.figures.len());
    Ok(summary)
}

/// Filters and scores every (phenotype, replicate) comparison, then adds replicate averages.
fn score_phenotypes(
    params: &ExperimentParameters,
    merged: &MergedCountsTable,
    negative_mask: &[bool],
) -> Result<PhenotypeTable> {
    info!("Computing phenotype scores");
    let mut table = PhenotypeTable::new(merged.guide_ids.clone());

    for comparison in &params.comparisons {
        let column = |sample: &SampleKey| {
            merged
                .column(sample)
                .ok_or_else(|| ScreenError::config(format!("no merged counts for {sample}")))
        };
        let pair = CountPair::from_counts(column(&comparison.condition1)?, column(&comparison.condition2)?);
        let filtered = filter_low_counts(&pair, params.filter_type, params.minimum_reads);
        info!(
            "{}: {} of {} guides pass the {} filter at {} reads",
            comparison.key,
            filtered.valid_rows(),
            filtered.len(),
            params.filter_type,
            params.minimum_reads
        );

        let score = compute_phenotype_score(
            &filtered,
            negative_mask,
            comparison.growth_value,
            &params.pseudocount,
            params.normalize_to_negatives,
        );
        table.insert(comparison.key.clone(), score.scores);
    }

    Ok(average_replicates(&table))
}

fn plot_counts(config: &PlotConfig, raw: &RawCountsTable, merged: &MergedCountsTable, summary: &mut RunSummary) {
    for (sample, counts) in &merged.columns {
        summary.figure(plot_counts_histogram(config, sample, counts));
    }
    for (sample, &files) in &merged.files_per_sample {
        if files > 1 {
            summary.figure(plot_premerged_counts(config, sample, &raw.lanes(sample)));
        }
    }
}

/// Condition-vs-condition counts of every comparison, coloured by its phenotype.
fn plot_comparisons(
    config: &PlotConfig,
    params: &ExperimentParameters,
    merged: &MergedCountsTable,
    phenotypes: &PhenotypeTable,
    negative_mask: &[bool],
    summary: &mut RunSummary,
) {
    for comparison in &params.comparisons {
        let (Some(x), Some(y), Some(scores)) = (
            merged.column(&comparison.condition1),
            merged.column(&comparison.condition2),
            phenotypes.column(&comparison.key),
        ) else {
            continue;
        };
        summary.figure(plot_counts_scatter(
            config,
            (&comparison.condition1, x),
            (&comparison.condition2, y),
            (&comparison.key, scores),
            negative_mask,
        ));
    }
}

fn plot_phenotypes(config: &PlotConfig, table: &PhenotypeTable, negative_mask: &[bool], summary: &mut RunSummary) {
    for (key, scores) in &table.columns {
        summary.figure(plot_phenotype_histogram(config, key, scores, negative_mask));
    }

    let mut replicates: BTreeMap<&str, Vec<(&PhenotypeKey, &[f64])>> = BTreeMap::new();
    for (key, scores) in table.columns.iter().filter(|(k, _)| !k.is_average()) {
        replicates.entry(key.phenotype.as_str()).or_default().push((key, scores.as_slice()));
    }
    for columns in replicates.values() {
        for (i, &x) in columns.iter().enumerate() {
            for &y in &columns[i + 1..] {
                summary.figure(plot_replicate_scatter(config, x, y, negative_mask));
            }
        }
    }
}

/// Averaged column of each phenotype when there is one, otherwise its replicates.
fn volcano_columns(table: &GeneTable) -> Vec<PhenotypeKey> {
    let columns = table.phenotype_columns();
    columns
        .iter()
        .filter(|key| {
            key.is_average() || !columns.iter().any(|other| other.phenotype == key.phenotype && other.is_average())
        })
        .cloned()
        .collect()
}

fn plot_genes(
    config: &PlotConfig,
    params: &ExperimentParameters,
    groups: &GeneGroups,
    phenotypes: &PhenotypeTable,
    genes: &GeneTable,
    summary: &mut RunSummary,
) {
    for (key, scores) in &phenotypes.columns {
        let per_gene: Vec<f64> = groups
            .members
            .iter()
            .map(|rows| finite_values(&rows.iter().map(|&r| scores[r]).collect::<Vec<f64>>()).len() as f64)
            .collect();
        summary.figure(plot_guides_per_gene(config, key, &per_gene));
    }

    let Some(effect_label) = params
        .analyses
        .iter()
        .find(|a| matches!(a, Analysis::Average { .. }))
        .map(Analysis::score_label)
    else {
        info!("No calculate_ave analysis; skipping volcano plots");
        return;
    };
    if !genes.has_statistic(MW_PVALUE_LABEL) {
        info!("No calculate_mw analysis; skipping volcano plots");
        return;
    }
    if params.pseudogenes == PseudogeneMode::Off {
        info!("Volcano hit threshold scaled by the spread of all genes; no pseudogenes were generated");
    }

    let pseudogenes: Vec<bool> = genes.keys.iter().map(|k| k.is_pseudogene()).collect();
    for key in volcano_columns(genes) {
        if let (Some(effects), Some(pvalues)) = (genes.stat(&key, &effect_label), genes.stat(&key, MW_PVALUE_LABEL)) {
            summary.figure(plot_volcano(config, &key, &effect_label, effects, pvalues, &pseudogenes));
        }
    }
}
