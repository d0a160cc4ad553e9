// src/data_handling/counts.rs
// -----------------------------------------------------------------------------
// Raw counts files → per-file columns aligned on the library → merged columns.
// Every file is aligned onto the (already sublibrary-filtered) library index;
// guides absent from a file count as 0, guides absent from the library are dropped.
// -----------------------------------------------------------------------------

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::data_handling::library::LibraryTable;
use crate::error::{Result, ScreenError};
use crate::helper_functions::{write_summary, LeveledTable};
use crate::models::{ExperimentKey, SampleKey};

// ─── Counts file parsing ─────────────────────────────────────────────────────

/// Parsed contents of one `guide_id<TAB>count` file.
#[derive(Debug, Default)]
pub struct GuideCounts {
    pub counts: HashMap<String, u64>,
    /// Records dropped because their guide id had already been seen.
    pub duplicates: usize,
}

fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n);
    }
    // Counts written by float-typed tools ("174.0")
    match raw.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.fract() == 0.0 && v.is_finite() => Some(v as u64),
        _ => None,
    }
}

/// Reads a headerless two-column counts file.
///
/// Duplicate guide ids keep their first count. With `strict` set a duplicate is
/// an error instead.
pub fn read_counts_file(path: &Path, strict: bool) -> Result<GuideCounts> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let invalid = |line: usize, reason: String| ScreenError::InvalidCounts {
        path: path.to_path_buf(),
        reason: format!("line {line}: {reason}"),
    };

    let mut parsed = GuideCounts::default();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let line = i + 1;
        if record.len() != 2 {
            return Err(invalid(line, format!("expected 2 columns, found {}", record.len())));
        }
        let count = parse_count(&record[1])
            .ok_or_else(|| invalid(line, format!("'{}' is not a non-negative integer count", &record[1])))?;

        let id = record[0].trim();
        if parsed.counts.contains_key(id) {
            if strict {
                return Err(invalid(line, format!("guide {id} appears more than once")));
            }
            parsed.duplicates += 1;
            continue;
        }
        parsed.counts.insert(id.to_string(), count);
    }

    if parsed.duplicates > 0 {
        warn!(
            "{}: {} duplicate guide ids collapsed to their first occurrence",
            path.display(),
            parsed.duplicates
        );
    }
    Ok(parsed)
}

// ─── Raw counts table ────────────────────────────────────────────────────────

/// One counts column per (condition, replicate, file), aligned on the library.
#[derive(Debug, Clone)]
pub struct RawCountsTable {
    pub guide_ids: Vec<String>,
    pub columns: BTreeMap<ExperimentKey, Vec<u64>>,
}

fn align_to_library(parsed: &GuideCounts, library: &LibraryTable) -> Vec<u64> {
    library
        .ids()
        .map(|id| parsed.counts.get(id).copied().unwrap_or(0))
        .collect()
}

/// Adds one already-parsed file to `columns`, refusing to assign a key twice.
fn insert_column(
    columns: &mut BTreeMap<ExperimentKey, Vec<u64>>,
    key: &ExperimentKey,
    parsed: &GuideCounts,
    library: &LibraryTable,
) -> Result<()> {
    if columns.contains_key(key) {
        return Err(ScreenError::DuplicateExperiment {
            condition: key.condition.clone(),
            replicate: key.replicate.clone(),
            file: key.file.clone(),
        });
    }
    let column = align_to_library(parsed, library);
    let found = library.ids().filter(|id| parsed.counts.contains_key(*id)).count();
    debug!(
        "{}: {} library guides found, {} ids outside the library dropped",
        key.file.display(),
        found,
        parsed.counts.len() - found
    );
    columns.insert(key.clone(), column);
    Ok(())
}

/// Loads every counts file of the experiment and aligns it onto `library`.
pub fn load_raw_counts(files: &[ExperimentKey], library: &LibraryTable, strict: bool) -> Result<RawCountsTable> {
    info!("Loading counts data from {} files", files.len());

    let mut sorted = files.to_vec();
    sorted.sort();

    if let Some(pair) = sorted.windows(2).find(|w| w[0] == w[1]) {
        return Err(ScreenError::DuplicateExperiment {
            condition: pair[0].condition.clone(),
            replicate: pair[0].replicate.clone(),
            file: pair[0].file.clone(),
        });
    }

    let mut columns = BTreeMap::new();
    for key in &sorted {
        let parsed = read_counts_file(&key.file, strict)?;
        insert_column(&mut columns, key, &parsed, library)?;
    }

    Ok(RawCountsTable {
        guide_ids: library.ids().map(str::to_string).collect(),
        columns,
    })
}

impl RawCountsTable {
    /// Builds a table from in-memory per-file counts (keys must be unique).
    pub fn from_parsed(library: &LibraryTable, parsed: Vec<(ExperimentKey, GuideCounts)>) -> Result<Self> {
        let mut columns = BTreeMap::new();
        for (key, counts) in &parsed {
            insert_column(&mut columns, key, counts, library)?;
        }
        Ok(Self {
            guide_ids: library.ids().map(str::to_string).collect(),
            columns,
        })
    }

    /// Per-file columns that merge into `sample`, in file order.
    pub fn lanes(&self, sample: &SampleKey) -> Vec<(&ExperimentKey, &[u64])> {
        self.columns
            .iter()
            .filter(|(key, _)| key.condition == sample.condition && key.replicate == sample.replicate)
            .map(|(key, column)| (key, column.as_slice()))
            .collect()
    }

    pub fn totals(&self) -> Vec<(ExperimentKey, u64)> {
        self.columns
            .iter()
            .map(|(key, col)| (key.clone(), col.iter().sum()))
            .collect()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut table = LeveledTable::new(&["condition", "replicate", "file"])
            .with_index("id", self.guide_ids.iter().cloned().map(Some).collect());
        for (key, column) in &self.columns {
            table.push_counts(experiment_levels(key), column);
        }
        table.write(path)
    }

    pub fn write_summary(&self, path: &Path) -> Result<()> {
        let totals: Vec<(Vec<String>, u64)> = self
            .totals()
            .into_iter()
            .map(|(key, total)| (experiment_levels(&key), total))
            .collect();
        write_summary(path, &totals)
    }
}

fn experiment_levels(key: &ExperimentKey) -> Vec<String> {
    vec![
        key.condition.clone(),
        key.replicate.clone(),
        key.file.display().to_string(),
    ]
}

// ─── Merged counts table ─────────────────────────────────────────────────────

/// One counts column per (condition, replicate), summed across lanes/indexes.
#[derive(Debug, Clone)]
pub struct MergedCountsTable {
    pub guide_ids: Vec<String>,
    pub columns: BTreeMap<SampleKey, Vec<u64>>,
    /// How many raw files fed each merged column.
    pub files_per_sample: BTreeMap<SampleKey, usize>,
}

/// Sums raw columns that share (condition, replicate).
pub fn merge_counts(raw: &RawCountsTable) -> MergedCountsTable {
    info!("Merging experiment counts split across lanes/indexes");

    let mut columns: BTreeMap<SampleKey, Vec<u64>> = BTreeMap::new();
    let mut files_per_sample: BTreeMap<SampleKey, usize> = BTreeMap::new();

    for (key, column) in &raw.columns {
        let sample = key.sample();
        let merged = columns
            .entry(sample.clone())
            .or_insert_with(|| vec![0; raw.guide_ids.len()]);
        for (acc, count) in merged.iter_mut().zip(column) {
            *acc += count;
        }
        *files_per_sample.entry(sample).or_insert(0) += 1;
    }

    for (sample, n) in &files_per_sample {
        if *n > 1 {
            debug!("{} merged from {} files", sample, n);
        }
    }

    MergedCountsTable {
        guide_ids: raw.guide_ids.clone(),
        columns,
        files_per_sample,
    }
}

impl MergedCountsTable {
    pub fn column(&self, key: &SampleKey) -> Option<&[u64]> {
        self.columns.get(key).map(Vec::as_slice)
    }

    pub fn totals(&self) -> Vec<(SampleKey, u64)> {
        self.columns
            .iter()
            .map(|(key, col)| (key.clone(), col.iter().sum()))
            .collect()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut table = LeveledTable::new(&["condition", "replicate"])
            .with_index("id", self.guide_ids.iter().cloned().map(Some).collect());
        for (key, column) in &self.columns {
            table.push_counts(vec![key.condition.clone(), key.replicate.clone()], column);
        }
        table.write(path)
    }

    pub fn write_summary(&self, path: &Path) -> Result<()> {
        let totals: Vec<(Vec<String>, u64)> = self
            .totals()
            .into_iter()
            .map(|(key, total)| (vec![key.condition, key.replicate], total))
            .collect();
        for (levels, total) in &totals {
            info!("{:<30} {:>12} reads", levels.join(" "), total);
        }
        write_summary(path, &totals)
    }
}
