use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use polars::prelude::*;
use tracing::debug;

use crate::error::Result;

/// Reads a tab-separated table with a header row, keeping every column as a string.
pub fn read_tsv_as_strings(path: &Path) -> Result<DataFrame> {
    // Count header fields first so every column can be forced to String
    let header_fields = {
        let file = File::open(path)?;
        let mut rdr = BufReader::new(file);
        let mut hdr = String::new();
        rdr.read_line(&mut hdr)?;
        hdr.trim_end_matches(['\r', '\n']).split('\t').count()
    };
    let dtype_override: Arc<Vec<DataType>> = Arc::new(vec![DataType::String; header_fields]);

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_dtype_overwrite(Some(dtype_override))
        .map_parse_options(|mut o| {
            o.separator = b'\t';
            o.quote_char = None;
            o.truncate_ragged_lines = true;
            o
        })
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    debug!("Read {} rows x {} columns from {}", df.height(), df.width(), path.display());
    Ok(df)
}

/// Creates `dir` (and parents) if it does not exist yet.
pub fn make_directory(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

// ─── Leveled TSV output ──────────────────────────────────────────────────────

/// A table whose data columns are keyed by a tuple of levels.
///
/// Written with one header row per level (the level name sits in the first
/// index cell) followed by a row naming the index columns, then the body.
pub struct LeveledTable {
    pub level_names: Vec<String>,
    pub index: Vec<(String, Vec<Option<String>>)>,
    pub columns: Vec<(Vec<String>, Series)>,
}

impl LeveledTable {
    pub fn new(level_names: &[&str]) -> Self {
        Self {
            level_names: level_names.iter().map(|s| s.to_string()).collect(),
            index: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn with_index(mut self, name: &str, values: Vec<Option<String>>) -> Self {
        self.index.push((name.to_string(), values));
        self
    }

    pub fn push_floats(&mut self, levels: Vec<String>, values: &[f64]) {
        let name = format!("c{}", self.columns.len());
        let values: Vec<Option<f64>> = values.iter().map(|v| v.is_finite().then_some(*v)).collect();
        self.columns.push((levels, Series::new(PlSmallStr::from(name), values)));
    }

    pub fn push_counts(&mut self, levels: Vec<String>, values: &[u64]) {
        let name = format!("c{}", self.columns.len());
        self.columns.push((levels, Series::new(PlSmallStr::from(name), values.to_vec())));
    }

    pub fn push_strings(&mut self, levels: Vec<String>, values: Vec<Option<String>>) {
        let name = format!("c{}", self.columns.len());
        self.columns.push((levels, Series::new(PlSmallStr::from(name), values)));
    }

    fn header_lines(&self) -> Vec<String> {
        let index_width = self.index.len().max(1);
        let mut lines = Vec::with_capacity(self.level_names.len() + 1);

        for (level, level_name) in self.level_names.iter().enumerate() {
            let mut cells = vec![String::new(); index_width];
            cells[0] = level_name.clone();
            cells.extend(self.columns.iter().map(|(levels, _)| levels.get(level).cloned().unwrap_or_default()));
            lines.push(cells.join("\t"));
        }

        let mut cells: Vec<String> = self.index.iter().map(|(name, _)| name.clone()).collect();
        cells.resize(index_width, String::new());
        cells.extend(std::iter::repeat(String::new()).take(self.columns.len()));
        lines.push(cells.join("\t"));
        lines
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        self.write_lines(path, self.header_lines())
    }

    /// Writes a single ordinary header row instead of the level rows.
    pub fn write_with_plain_header(&self, path: &Path, column_names: &[&str]) -> Result<()> {
        let mut cells: Vec<&str> = self.index.iter().map(|(name, _)| name.as_str()).collect();
        cells.extend_from_slice(column_names);
        self.write_lines(path, vec![cells.join("\t")])
    }

    fn write_lines(&self, path: &Path, header: Vec<String>) -> Result<()> {
        let mut columns: Vec<Column> = Vec::with_capacity(self.index.len() + self.columns.len());
        for (i, (_, values)) in self.index.iter().enumerate() {
            columns.push(Series::new(PlSmallStr::from(format!("i{i}")), values.clone()).into());
        }
        for (_, series) in &self.columns {
            columns.push(series.clone().into());
        }
        let mut df = DataFrame::new(columns)?;

        let mut writer = BufWriter::new(File::create(path)?);
        for line in header {
            writeln!(writer, "{line}")?;
        }
        CsvWriter::new(&mut writer)
            .include_header(false)
            .with_separator(b'\t')
            .finish(&mut df)?;
        writer.flush()?;

        debug!("Wrote {} rows to {}", df.height(), path.display());
        Ok(())
    }
}

/// Writes headerless `key levels... total` lines, one per column.
pub fn write_summary(path: &Path, totals: &[(Vec<String>, u64)]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (levels, total) in totals {
        writeln!(writer, "{}\t{}", levels.join("\t"), total)?;
    }
    writer.flush()?;
    Ok(())
}

// ─── Missing-aware numeric helpers ───────────────────────────────────────────

/// Values that are not missing (NaN or infinite).
pub fn finite_values(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

/// Median of the non-missing values; NaN when there are none.
pub fn nan_median(values: &[f64]) -> f64 {
    let mut finite = finite_values(values);
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.sort_by(|a, b| a.total_cmp(b));
    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        (finite[mid - 1] + finite[mid]) / 2.0
    } else {
        finite[mid]
    }
}

/// Mean of the non-missing values; NaN when there are none.
pub fn nan_mean(values: &[f64]) -> f64 {
    let finite = finite_values(values);
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.iter().sum::<f64>() / finite.len() as f64
}

/// Population standard deviation of the non-missing values.
pub fn nan_std(values: &[f64]) -> f64 {
    let finite = finite_values(values);
    if finite.is_empty() {
        return f64::NAN;
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / finite.len() as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_skips_missing_and_averages_middle_pair() {
        assert_eq!(nan_median(&[3.0, f64::NAN, 1.0, 2.0]), 2.0);
        assert_eq!(nan_median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(nan_median(&[f64::NAN]).is_nan());
    }

    #[test]
    fn mean_of_nothing_is_missing() {
        assert!(nan_mean(&[]).is_nan());
        assert_eq!(nan_mean(&[1.0, f64::NAN, 3.0]), 2.0);
    }

    #[test]
    fn std_is_population_std() {
        assert!((nan_std(&[1.0, 3.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn leveled_table_header_rows() {
        let mut table = LeveledTable::new(&["phenotype", "replicate"])
            .with_index("id", vec![Some("g1".into())]);
        table.push_floats(vec!["gamma".into(), "Rep1".into()], &[0.5]);
        table.push_floats(vec!["gamma".into(), "Rep2".into()], &[f64::NAN]);

        let lines = table.header_lines();
        assert_eq!(lines, vec!["phenotype\tgamma\tgamma", "replicate\tRep1\tRep2", "id\t\t"]);
    }

    #[test]
    fn leveled_table_writes_missing_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.txt");
        let mut table = LeveledTable::new(&["phenotype", "replicate"])
            .with_index("id", vec![Some("g1".into()), Some("g2".into())]);
        table.push_floats(vec!["gamma".into(), "Rep1".into()], &[0.5, f64::NAN]);
        table.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[3], "g1\t0.5");
        assert_eq!(lines[4], "g2\t");
    }
}
