use std::fmt;
use std::path::PathBuf;

use crate::error::Result;

/// A table on disk that knows how to read itself.
pub trait Dataset {
    type Table;

    fn load(&self) -> Result<Self::Table>;
}

/// Gene name reserved for non-targeting guides.
pub const NEGATIVE_CONTROL: &str = "negative_control";

/// Prefix shared by every synthetic gene, guide id and sequence built from negative controls.
pub const PSEUDOGENE_PREFIX: &str = "pseudo";

/// Transcript label used when a library row has none.
pub const NO_TRANSCRIPT: &str = "na";

/// Replicate label prefix for averaged phenotype columns.
pub const AVERAGE_PREFIX: &str = "ave_";

/// One raw counts file and the role it plays in the experiment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExperimentKey {
    pub condition: String,
    pub replicate: String,
    pub file: PathBuf,
}

impl ExperimentKey {
    pub fn new(condition: impl Into<String>, replicate: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            condition: condition.into(),
            replicate: replicate.into(),
            file: file.into(),
        }
    }

    pub fn sample(&self) -> SampleKey {
        SampleKey::new(&self.condition, &self.replicate)
    }
}

/// A (condition, replicate) pair; the key of a merged counts column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleKey {
    pub condition: String,
    pub replicate: String,
}

impl SampleKey {
    pub fn new(condition: impl Into<String>, replicate: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            replicate: replicate.into(),
        }
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.condition, self.replicate)
    }
}

/// A (phenotype, replicate) pair; the key of a phenotype score column.
///
/// Averaged columns carry a synthesized replicate label starting with `ave_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhenotypeKey {
    pub phenotype: String,
    pub replicate: String,
}

impl PhenotypeKey {
    pub fn new(phenotype: impl Into<String>, replicate: impl Into<String>) -> Self {
        Self {
            phenotype: phenotype.into(),
            replicate: replicate.into(),
        }
    }

    pub fn is_average(&self) -> bool {
        self.replicate.starts_with(AVERAGE_PREFIX)
    }
}

impl fmt::Display for PhenotypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.phenotype, self.replicate)
    }
}

/// Row key of a gene table. `transcript` is set only for transcript-level tables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeneKey {
    pub gene: String,
    pub transcript: Option<String>,
}

impl GeneKey {
    /// Synthetic genes are named `pseudo_<n>`.
    pub fn is_pseudogene(&self) -> bool {
        self.gene
            .strip_prefix(PSEUDOGENE_PREFIX)
            .is_some_and(|rest| rest.starts_with('_'))
    }
}

/// Column key of a gene table: which statistic, for which phenotype column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeneStatKey {
    pub phenotype: String,
    pub replicate: String,
    pub statistic: String,
}

impl GeneStatKey {
    pub fn new(column: &PhenotypeKey, statistic: impl Into<String>) -> Self {
        Self {
            phenotype: column.phenotype.clone(),
            replicate: column.replicate.clone(),
            statistic: statistic.into(),
        }
    }

    pub fn column(&self) -> PhenotypeKey {
        PhenotypeKey::new(&self.phenotype, &self.replicate)
    }
}
