//! Experiment configuration: the JSON document a run is described by, and its
//! validated, typed form.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::filter::FilterType;
use crate::analysis::gene_scores::Analysis;
use crate::analysis::phenotype::{PseudocountBehavior, PseudocountPolicy};
use crate::analysis::pseudogenes::PseudogeneMode;
use crate::error::{Result, ScreenError};
use crate::models::{ExperimentKey, PhenotypeKey, SampleKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountsFileConfig {
    pub condition: String,
    pub replicate: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowthValueConfig {
    pub phenotype: String,
    pub replicate: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionTupleConfig {
    pub phenotype: String,
    pub condition1: String,
    pub condition2: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub name: String,
    #[serde(default)]
    pub params: Vec<i64>,
}

fn default_filter_type() -> String {
    "either".to_string()
}

fn default_pseudocount_behavior() -> String {
    "default".to_string()
}

fn default_pseudocount() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

fn default_pseudogene_mode() -> String {
    "off".to_string()
}

/// Experiment description as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    pub output_folder: PathBuf,
    pub experiment_name: String,
    pub library_table: PathBuf,
    pub sublibraries: Vec<String>,
    pub counts_files: Vec<CountsFileConfig>,
    #[serde(default = "default_filter_type")]
    pub filter_type: String,
    #[serde(default)]
    pub minimum_reads: f64,
    #[serde(default = "default_pseudocount_behavior")]
    pub pseudocount_behavior: String,
    #[serde(default = "default_pseudocount")]
    pub pseudocount: f64,
    #[serde(default = "default_true")]
    pub normalize_to_negatives: bool,
    pub growth_values: Vec<GrowthValueConfig>,
    pub condition_tuples: Vec<ConditionTupleConfig>,
    #[serde(default = "default_pseudogene_mode")]
    pub generate_pseudogene_dist: String,
    #[serde(default)]
    pub num_pseudogenes: usize,
    #[serde(default)]
    pub pseudogene_size: usize,
    #[serde(default)]
    pub analyses: Vec<AnalysisConfig>,
    #[serde(default)]
    pub collapse_to_transcripts: bool,
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default)]
    pub strict_counts: bool,
}

/// One phenotype comparison between two merged counts columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub key: PhenotypeKey,
    pub condition1: SampleKey,
    pub condition2: SampleKey,
    pub growth_value: f64,
}

/// Validated run parameters.
#[derive(Debug, Clone)]
pub struct ExperimentParameters {
    pub output_folder: PathBuf,
    pub experiment_name: String,
    pub library_table: PathBuf,
    pub sublibraries: BTreeSet<String>,
    pub counts_files: Vec<ExperimentKey>,
    pub filter_type: FilterType,
    pub minimum_reads: f64,
    pub pseudocount: PseudocountPolicy,
    pub normalize_to_negatives: bool,
    pub comparisons: Vec<Comparison>,
    pub pseudogenes: PseudogeneMode,
    pub analyses: Vec<Analysis>,
    pub collapse_to_transcripts: bool,
    pub random_seed: Option<u64>,
    pub strict_counts: bool,
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path.to_path_buf()
    }
}

impl ExperimentConfig {
    /// Reads a config file; relative paths inside it are taken relative to its directory.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Reading experiment config {}", path.display());
        let file = File::open(path)?;
        let mut config: ExperimentConfig = serde_json::from_reader(BufReader::new(file))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.output_folder = resolve(base, &config.output_folder);
        config.library_table = resolve(base, &config.library_table);
        for counts in &mut config.counts_files {
            counts.path = resolve(base, &counts.path);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<ExperimentParameters> {
        if self.experiment_name.trim().is_empty() {
            return Err(ScreenError::config("experiment_name is empty"));
        }
        if self.sublibraries.is_empty() {
            return Err(ScreenError::config("no sublibraries selected"));
        }
        if self.counts_files.is_empty() {
            return Err(ScreenError::config("no counts files listed"));
        }

        let mut counts_files: Vec<ExperimentKey> = Vec::with_capacity(self.counts_files.len());
        let mut seen = HashSet::new();
        for entry in &self.counts_files {
            let key = ExperimentKey::new(&entry.condition, &entry.replicate, &entry.path);
            if !seen.insert(key.clone()) {
                return Err(ScreenError::DuplicateExperiment {
                    condition: key.condition,
                    replicate: key.replicate,
                    file: key.file,
                });
            }
            counts_files.push(key);
        }

        let filter_type: FilterType = self.filter_type.parse()?;
        if !(self.minimum_reads >= 0.0 && self.minimum_reads.is_finite()) {
            return Err(ScreenError::config(format!(
                "minimum_reads must be a non-negative number, got {}",
                self.minimum_reads
            )));
        }
        let behavior: PseudocountBehavior = self.pseudocount_behavior.parse()?;
        let pseudocount = PseudocountPolicy::new(behavior, self.pseudocount)?;

        let comparisons = self.comparisons(&counts_files)?;

        let mut analyses = Vec::with_capacity(self.analyses.len());
        for entry in &self.analyses {
            let analysis = Analysis::from_config(&entry.name, &entry.params)?;
            if analyses.iter().any(|a: &Analysis| a.name() == analysis.name()) {
                return Err(ScreenError::config(format!("analysis {} listed more than once", entry.name)));
            }
            analyses.push(analysis);
        }
        if self.collapse_to_transcripts && !analyses.contains(&Analysis::MannWhitney) {
            warn!("collapse_to_transcripts needs calculate_mw; the collapsed gene table will not be written");
        }

        let pseudogenes =
            PseudogeneMode::from_config(&self.generate_pseudogene_dist, self.num_pseudogenes, self.pseudogene_size);
        if let PseudogeneMode::Manual { count, size } = pseudogenes {
            if count == 0 || size == 0 {
                return Err(ScreenError::config(
                    "manual pseudogenes need num_pseudogenes and pseudogene_size above 0",
                ));
            }
        }

        Ok(ExperimentParameters {
            output_folder: self.output_folder.clone(),
            experiment_name: self.experiment_name.clone(),
            library_table: self.library_table.clone(),
            sublibraries: self.sublibraries.iter().cloned().collect(),
            counts_files,
            filter_type,
            minimum_reads: self.minimum_reads,
            pseudocount,
            normalize_to_negatives: self.normalize_to_negatives,
            comparisons,
            pseudogenes,
            analyses,
            collapse_to_transcripts: self.collapse_to_transcripts,
            random_seed: self.random_seed,
            strict_counts: self.strict_counts,
        })
    }

    /// Expands condition tuples over every replicate both conditions were sequenced in.
    fn comparisons(&self, counts_files: &[ExperimentKey]) -> Result<Vec<Comparison>> {
        if self.condition_tuples.is_empty() {
            return Err(ScreenError::config("no condition tuples listed"));
        }

        let samples: BTreeSet<SampleKey> = counts_files.iter().map(ExperimentKey::sample).collect();
        let replicates: BTreeSet<&str> = samples.iter().map(|s| s.replicate.as_str()).collect();

        let mut growth: BTreeMap<PhenotypeKey, f64> = BTreeMap::new();
        for entry in &self.growth_values {
            let key = PhenotypeKey::new(&entry.phenotype, &entry.replicate);
            if growth.insert(key.clone(), entry.value).is_some() {
                return Err(ScreenError::config(format!("growth value for {key} given more than once")));
            }
        }

        let mut phenotypes = HashSet::new();
        let mut comparisons = Vec::new();
        for tuple in &self.condition_tuples {
            if !phenotypes.insert(tuple.phenotype.as_str()) {
                return Err(ScreenError::config(format!("phenotype {} defined more than once", tuple.phenotype)));
            }
            for condition in [&tuple.condition1, &tuple.condition2] {
                if !samples.iter().any(|s| &s.condition == condition) {
                    return Err(ScreenError::config(format!(
                        "phenotype {} refers to condition {} which has no counts files",
                        tuple.phenotype, condition
                    )));
                }
            }

            let before = comparisons.len();
            for replicate in &replicates {
                let condition1 = SampleKey::new(&tuple.condition1, *replicate);
                let condition2 = SampleKey::new(&tuple.condition2, *replicate);
                if !samples.contains(&condition1) || !samples.contains(&condition2) {
                    continue;
                }
                let key = PhenotypeKey::new(&tuple.phenotype, *replicate);
                let growth_value = *growth
                    .get(&key)
                    .ok_or_else(|| ScreenError::config(format!("no growth value for {key}")))?;
                comparisons.push(Comparison {
                    key,
                    condition1,
                    condition2,
                    growth_value,
                });
            }
            if comparisons.len() == before {
                return Err(ScreenError::config(format!(
                    "conditions {} and {} share no replicate",
                    tuple.condition1, tuple.condition2
                )));
            }
        }
        Ok(comparisons)
    }
}

impl ExperimentParameters {
    /// `<output_folder>/<experiment_name><suffix>`
    pub fn output_path(&self, suffix: &str) -> PathBuf {
        self.output_folder.join(format!("{}{}", self.experiment_name, suffix))
    }

    pub fn plot_directory(&self) -> PathBuf {
        self.output_path("_plots")
    }
}
