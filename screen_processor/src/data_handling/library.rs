// src/data_handling/library.rs
// -----------------------------------------------------------------------------
// Reference library table: one row per guide, indexed by guide id.
// `load()` reads and sorts; `select_sublibraries()` narrows it to the experiment.
// -----------------------------------------------------------------------------

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::{debug, info};

use crate::error::{Result, ScreenError};
use crate::helper_functions::{read_tsv_as_strings, LeveledTable};
use crate::models::{Dataset, NEGATIVE_CONTROL, NO_TRANSCRIPT};

/// Index name used when a table is built in memory rather than read from disk.
const DEFAULT_ID_COLUMN: &str = "id";

const REQUIRED_COLUMNS: [&str; 4] = ["sublibrary", "gene", "transcripts", "sequence"];

/// One designed guide from the reference library.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    pub id: String,
    pub sublibrary: String,
    pub gene: String,
    pub transcripts: Option<String>,
    pub sequence: String,
    /// Values of any further library columns, aligned with `LibraryTable::extra_columns`.
    pub extra: Vec<Option<String>>,
}

impl LibraryEntry {
    pub fn is_negative_control(&self) -> bool {
        self.gene == NEGATIVE_CONTROL
    }

    /// Transcript label used for grouping; absent transcripts group together.
    pub fn transcript_label(&self) -> &str {
        self.transcripts.as_deref().unwrap_or(NO_TRANSCRIPT)
    }
}

/// Guide library, sorted by guide id.
#[derive(Debug, Clone)]
pub struct LibraryTable {
    pub entries: Vec<LibraryEntry>,
    /// Header of the id column as read (`sgId`, ...), reused on write.
    pub id_column: String,
    pub extra_columns: Vec<String>,
}

/// Location of a reference library table on disk.
pub struct LibraryDataset {
    pub path: PathBuf,
}

impl Dataset for LibraryDataset {
    type Table = LibraryTable;

    fn load(&self) -> Result<LibraryTable> {
        info!("Reading library table from {}", self.path.display());
        let df = read_tsv_as_strings(&self.path)?;
        LibraryTable::from_dataframe(&df, &self.path)
    }
}

fn string_column<'a>(df: &'a DataFrame, name: &str, path: &Path) -> Result<&'a StringChunked> {
    let column = df.column(name).map_err(|_| ScreenError::MissingColumn {
        table: path.display().to_string(),
        column: name.to_string(),
    })?;
    Ok(column.str()?)
}

impl LibraryTable {
    pub fn new(mut entries: Vec<LibraryEntry>) -> Result<Self> {
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = entries.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(ScreenError::library(format!("guide id {} appears more than once", pair[0].id)));
        }
        Ok(Self {
            entries,
            id_column: DEFAULT_ID_COLUMN.to_string(),
            extra_columns: Vec::new(),
        })
    }

    fn from_dataframe(df: &DataFrame, path: &Path) -> Result<Self> {
        let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        let Some(id_name) = names.first() else {
            return Err(ScreenError::library(format!("{} has no columns", path.display())));
        };

        let ids = string_column(df, id_name, path)?;
        let [sublibraries, genes, transcripts, sequences] = [
            string_column(df, REQUIRED_COLUMNS[0], path)?,
            string_column(df, REQUIRED_COLUMNS[1], path)?,
            string_column(df, REQUIRED_COLUMNS[2], path)?,
            string_column(df, REQUIRED_COLUMNS[3], path)?,
        ];

        let extra_columns: Vec<String> = names[1..]
            .iter()
            .filter(|n| !REQUIRED_COLUMNS.contains(&n.as_str()))
            .cloned()
            .collect();
        let extras = extra_columns
            .iter()
            .map(|n| string_column(df, n, path))
            .collect::<Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let id = ids
                .get(i)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ScreenError::library(format!("row {} has no guide id", i + 1)))?;
            entries.push(LibraryEntry {
                id: id.to_string(),
                sublibrary: sublibraries.get(i).unwrap_or_default().to_string(),
                gene: genes.get(i).unwrap_or_default().to_string(),
                transcripts: transcripts.get(i).filter(|s| !s.is_empty()).map(str::to_string),
                sequence: sequences.get(i).unwrap_or_default().to_string(),
                extra: extras.iter().map(|c| c.get(i).map(str::to_string)).collect(),
            });
        }

        let mut table = LibraryTable::new(entries)?;
        table.id_column = id_name.clone();
        table.extra_columns = extra_columns;
        debug!("Library holds {} guides", table.len());
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.as_str())
    }

    /// Per-row flag marking negative-control guides.
    pub fn negative_control_mask(&self) -> Vec<bool> {
        self.entries.iter().map(LibraryEntry::is_negative_control).collect()
    }

    /// Keeps guides whose sublibrary (case-insensitive) is in `sublibraries`.
    pub fn select_sublibraries(&self, sublibraries: &BTreeSet<String>) -> Result<LibraryTable> {
        let wanted: HashSet<String> = sublibraries.iter().map(|s| s.to_lowercase()).collect();
        let entries: Vec<LibraryEntry> = self
            .entries
            .iter()
            .filter(|e| wanted.contains(&e.sublibrary.to_lowercase()))
            .cloned()
            .collect();

        if entries.is_empty() {
            return Err(ScreenError::library(
                "after limiting analysis to specified sublibraries, no elements are left",
            ));
        }
        info!(
            "{} of {} library elements belong to the requested sublibraries",
            entries.len(),
            self.len()
        );

        Ok(LibraryTable {
            entries,
            id_column: self.id_column.clone(),
            extra_columns: self.extra_columns.clone(),
        })
    }

    /// Appends synthetic rows after the real library; used for gene analysis only.
    pub fn with_appended(&self, synthetic: Vec<LibraryEntry>) -> Result<LibraryTable> {
        let existing: HashSet<&str> = self.ids().collect();
        if let Some(clash) = synthetic.iter().find(|e| existing.contains(e.id.as_str())) {
            return Err(ScreenError::library(format!(
                "synthetic guide id {} collides with a library guide",
                clash.id
            )));
        }
        let mut entries = self.entries.clone();
        entries.extend(synthetic.into_iter().map(|mut e| {
            e.extra = vec![None; self.extra_columns.len()];
            e
        }));
        Ok(LibraryTable {
            entries,
            id_column: self.id_column.clone(),
            extra_columns: self.extra_columns.clone(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut table = LeveledTable::new(&[])
            .with_index(&self.id_column, self.entries.iter().map(|e| Some(e.id.clone())).collect());
        table.push_strings(vec![], self.entries.iter().map(|e| Some(e.sublibrary.clone())).collect());
        table.push_strings(vec![], self.entries.iter().map(|e| Some(e.gene.clone())).collect());
        table.push_strings(vec![], self.entries.iter().map(|e| e.transcripts.clone()).collect());
        table.push_strings(vec![], self.entries.iter().map(|e| Some(e.sequence.clone())).collect());
        for j in 0..self.extra_columns.len() {
            table.push_strings(vec![], self.entries.iter().map(|e| e.extra[j].clone()).collect());
        }

        let mut header: Vec<&str> = REQUIRED_COLUMNS.to_vec();
        header.extend(self.extra_columns.iter().map(String::as_str));
        table.write_with_plain_header(path, &header)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entry(id: &str, gene: &str, transcript: Option<&str>, sequence: &str) -> LibraryEntry {
        LibraryEntry {
            id: id.to_string(),
            sublibrary: "drug_targets".to_string(),
            gene: gene.to_string(),
            transcripts: transcript.map(str::to_string),
            sequence: sequence.to_string(),
            extra: Vec::new(),
        }
    }

    fn write_library(dir: &Path) -> PathBuf {
        let path = dir.join("library.txt");
        std::fs::write(
            &path,
            "sgId\tsublibrary\tgene\ttranscripts\tsequence\tnote\n\
             g2\tDrug_Targets\tAAK1\tP1\tGACT\tx\n\
             g1\tdrug_targets\tAAK1\tP1\tGACC\t\n\
             n1\tKinase\tnegative_control\tna\tTTTT\ty\n",
        )
        .unwrap();
        path
    }

    #[test]
    fn load_sorts_by_id_and_keeps_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let table = LibraryDataset { path: write_library(dir.path()) }.load().unwrap();

        let ids: Vec<&str> = table.ids().collect();
        assert_eq!(ids, vec!["g1", "g2", "n1"]);
        assert_eq!(table.extra_columns, vec!["note".to_string()]);
        assert_eq!(table.entries[1].extra, vec![Some("x".to_string())]);
        assert_eq!(table.negative_control_mask(), vec![false, false, true]);
    }

    #[test]
    fn written_table_keeps_the_id_header() {
        let dir = tempfile::tempdir().unwrap();
        let table = LibraryDataset { path: write_library(dir.path()) }.load().unwrap();
        assert_eq!(table.id_column, "sgId");

        let selected = table
            .select_sublibraries(&BTreeSet::from(["drug_targets".to_string()]))
            .unwrap();
        let out = dir.path().join("demo_librarytable.txt");
        selected.write(&out).unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        assert_eq!(
            text.lines().next(),
            Some("sgId\tsublibrary\tgene\ttranscripts\tsequence\tnote")
        );
        assert!(text.lines().nth(1).unwrap().starts_with("g1\tdrug_targets\tAAK1\tP1\tGACC"));
    }

    #[test]
    fn sublibrary_selection_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let table = LibraryDataset { path: write_library(dir.path()) }.load().unwrap();

        let selected = table
            .select_sublibraries(&BTreeSet::from(["drug_targets".to_string()]))
            .unwrap();
        assert_eq!(selected.len(), 2);

        let err = table.select_sublibraries(&BTreeSet::from(["secretome".to_string()]));
        assert!(matches!(err, Err(ScreenError::InvalidLibrary { .. })));
    }

    #[test]
    fn missing_required_column_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, "sgId\tsublibrary\tgene\tsequence\ng1\ta\tb\tACGT\n").unwrap();

        let err = LibraryDataset { path }.load().unwrap_err();
        assert!(matches!(err, ScreenError::MissingColumn { ref column, .. } if column == "transcripts"));
    }

    #[test]
    fn duplicate_guide_ids_are_rejected() {
        let err = LibraryTable::new(vec![entry("g1", "A", None, "AC"), entry("g1", "B", None, "GT")]);
        assert!(err.is_err());
    }

    #[test]
    fn synthetic_rows_must_not_reuse_ids() {
        let table = LibraryTable::new(vec![entry("pseudo_0_0", "A", None, "AC")]).unwrap();
        assert!(table.with_appended(vec![entry("pseudo_0_0", "pseudo_0", None, "seq_0_0")]).is_err());
        let grown = table
            .with_appended(vec![entry("pseudo_1_0", "pseudo_1", None, "seq_1_0")])
            .unwrap();
        assert_eq!(grown.len(), 2);
    }
}
