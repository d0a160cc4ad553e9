//! Pseudogenes: synthetic genes assembled from resampled negative-control
//! phenotypes, used as the null reference for gene-level statistics.

use std::collections::{BTreeMap, HashSet};

use rand::Rng;
use tracing::{info, warn};

use crate::analysis::phenotype::NegativeTable;
use crate::data_handling::library::{LibraryEntry, LibraryTable};
use crate::models::{NEGATIVE_CONTROL, NO_TRANSCRIPT, PSEUDOGENE_PREFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudogeneMode {
    Off,
    /// `count` pseudogenes of `size` guides each.
    Manual { count: usize, size: usize },
    /// One pseudo-transcript per real transcript, matching its guide count.
    Auto,
}

impl PseudogeneMode {
    /// Unknown mode names fall back to `Off` with a warning rather than failing the run.
    pub fn from_config(mode: &str, count: usize, size: usize) -> Self {
        match mode.trim().to_lowercase().as_str() {
            "off" | "" => PseudogeneMode::Off,
            "manual" => PseudogeneMode::Manual { count, size },
            "auto" => PseudogeneMode::Auto,
            other => {
                warn!("generate_pseudogene_dist parameter '{}' not recognized, defaulting to off", other);
                PseudogeneMode::Off
            }
        }
    }
}

/// Synthetic library rows plus their resampled phenotype rows.
#[derive(Debug, Clone, Default)]
pub struct Pseudogenes {
    pub library: Vec<LibraryEntry>,
    /// One row per entry of `library`, values ordered like `NegativeTable::keys`.
    pub rows: Vec<Vec<f64>>,
}

impl Pseudogenes {
    pub fn len(&self) -> usize {
        self.library.len()
    }

    pub fn is_empty(&self) -> bool {
        self.library.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.library.iter().map(|e| e.id.clone()).collect()
    }

    fn push_group<R: Rng>(
        &mut self,
        negatives: &NegativeTable,
        rng: &mut R,
        tag: &str,
        gene: String,
        transcript: String,
        size: usize,
    ) {
        for i in 0..size {
            let draw = rng.gen_range(0..negatives.len());
            self.rows.push(negatives.rows[draw].clone());
            self.library.push(LibraryEntry {
                id: format!("{PSEUDOGENE_PREFIX}_{tag}_{i}"),
                sublibrary: String::new(),
                gene: gene.clone(),
                transcripts: Some(transcript.clone()),
                // unique so pseudo guides are never collapsed as duplicates
                sequence: format!("seq_{tag}_{i}"),
                extra: Vec::new(),
            });
        }
    }
}

/// Guide count per (gene, transcript) after dropping repeated (gene, sequence) rows.
pub fn transcript_sizes(library: &LibraryTable) -> BTreeMap<&str, BTreeMap<&str, usize>> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut sizes: BTreeMap<&str, BTreeMap<&str, usize>> = BTreeMap::new();
    for entry in &library.entries {
        if !seen.insert((entry.gene.as_str(), entry.sequence.as_str())) {
            continue;
        }
        *sizes
            .entry(entry.gene.as_str())
            .or_default()
            .entry(entry.transcript_label())
            .or_insert(0) += 1;
    }
    sizes
}

/// Draws pseudogenes (with replacement) from the negative-control rows.
pub fn generate_pseudogenes<R: Rng>(
    mode: PseudogeneMode,
    negatives: &NegativeTable,
    library: &LibraryTable,
    rng: &mut R,
) -> Pseudogenes {
    let mut pseudo = Pseudogenes::default();
    if mode == PseudogeneMode::Off {
        return pseudo;
    }
    if negatives.is_empty() {
        warn!("no negative-control guides to resample; skipping pseudogene generation");
        return pseudo;
    }

    info!("Generating a pseudogene distribution from {} negative controls", negatives.len());
    match mode {
        PseudogeneMode::Off => {}
        PseudogeneMode::Manual { count, size } => {
            for g in 0..count {
                pseudo.push_group(
                    negatives,
                    rng,
                    &g.to_string(),
                    format!("{PSEUDOGENE_PREFIX}_{g}"),
                    NO_TRANSCRIPT.to_string(),
                    size,
                );
            }
        }
        PseudogeneMode::Auto => {
            // gene numbering counts the negative-control group too
            for (g, (gene, transcripts)) in transcript_sizes(library).iter().enumerate() {
                if *gene == NEGATIVE_CONTROL {
                    continue;
                }
                for (t, size) in transcripts.values().enumerate() {
                    pseudo.push_group(
                        negatives,
                        rng,
                        &format!("{g}_{t}"),
                        format!("{PSEUDOGENE_PREFIX}_{g}"),
                        format!("{PSEUDOGENE_PREFIX}_transcript_{t}"),
                        *size,
                    );
                }
            }
        }
    }

    info!("{} pseudogene guides generated", pseudo.len());
    pseudo
}
