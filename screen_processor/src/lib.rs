//! Pooled CRISPR screen processing.
//!
//! Turns raw per-guide read counts into guide-level phenotype scores and
//! gene-level statistics:
//!
//! ```ignore
//! use screen_processor::prelude::*;
//!
//! let params = ExperimentConfig::load(Path::new("experiment.json"))?.validate()?;
//! let summary = run_experiment(&params, None)?;
//! ```

pub mod analysis;
pub mod config;
pub mod data_handling;
pub mod error;
pub mod helper_functions;
pub mod models;
pub mod pipeline;

pub mod prelude {
    pub use crate::analysis::collapse::{collapse_to_best_transcript, CollapsedGeneTable};
    pub use crate::analysis::filter::{filter_low_counts, CountPair, FilterType};
    pub use crate::analysis::gene_scores::{compute_gene_scores, group_guides, Analysis, GeneTable};
    pub use crate::analysis::mann_whitney::{mann_whitney_pvalue, mann_whitney_u};
    pub use crate::analysis::phenotype::{compute_phenotype_score, PhenotypeTable, PseudocountBehavior, PseudocountPolicy};
    pub use crate::analysis::plots::{ImageFormat, PlotConfig};
    pub use crate::analysis::pseudogenes::{generate_pseudogenes, PseudogeneMode};
    pub use crate::analysis::replicates::average_replicates;
    pub use crate::config::{ExperimentConfig, ExperimentParameters};
    pub use crate::data_handling::counts::{load_raw_counts, merge_counts, MergedCountsTable, RawCountsTable};
    pub use crate::data_handling::library::{LibraryDataset, LibraryTable};
    pub use crate::error::{Result, ScreenError};
    pub use crate::models::{Dataset, ExperimentKey, GeneKey, PhenotypeKey, SampleKey};
    pub use crate::pipeline::{run_experiment, RunSummary};
}
