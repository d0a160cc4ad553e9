//! Diagnostic figures for each processing stage.
//!
//! Every figure is a small value type implementing [`Figure`], drawn onto a
//! bitmap or SVG backend depending on the run's [`PlotConfig`].

use std::cmp::Ordering;
use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;

use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::debug;

use crate::error::{Result, ScreenError};
use crate::helper_functions::{finite_values, make_directory, nan_median, nan_std};
use crate::models::{ExperimentKey, PhenotypeKey, SampleKey};

const FIGURE_SIZE: (u32, u32) = (900, 650);
const HISTOGRAM_BINS: usize = 40;

/// Score above which a gene is highlighted on the volcano plot.
pub const VOLCANO_HIT_THRESHOLD: f64 = 7.0;

const GREY: RGBColor = RGBColor(150, 150, 150);
const NEGATIVE_COLOUR: RGBColor = RGBColor(30, 100, 200);
const HIT_COLOUR: RGBColor = RGBColor(210, 40, 40);
const ENRICHED_COLOUR: RGBColor = RGBColor(225, 170, 25);
const DEPLETED_COLOUR: RGBColor = RGBColor(110, 60, 170);

/// Lane names on the pre-merge matrix are cut to this many characters.
const LANE_NAME_WIDTH: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Svg,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Svg => "svg",
        }
    }

    /// `off` (or an empty string) disables plotting.
    pub fn parse_optional(s: &str) -> Result<Option<Self>> {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" | "" => Ok(None),
            other => other.parse().map(Some),
        }
    }
}

impl FromStr for ImageFormat {
    type Err = ScreenError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "svg" => Ok(ImageFormat::Svg),
            other => Err(ScreenError::config(format!("unsupported plot extension '{other}'"))),
        }
    }
}

/// Where figures go and in which format.
#[derive(Debug, Clone)]
pub struct PlotConfig {
    pub directory: PathBuf,
    pub format: ImageFormat,
}

impl PlotConfig {
    pub fn new(directory: impl Into<PathBuf>, format: ImageFormat) -> Self {
        Self {
            directory: directory.into(),
            format,
        }
    }

    fn figure_path(&self, name: &str) -> PathBuf {
        let stem: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.directory.join(format!("{stem}.{}", self.format.extension()))
    }
}

type DrawResult<DB> = std::result::Result<(), DrawingAreaErrorKind<<DB as DrawingBackend>::ErrorType>>;

trait Figure {
    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> DrawResult<DB>;
}

fn render<F: Figure>(config: &PlotConfig, name: &str, figure: &F) -> Result<PathBuf> {
    make_directory(&config.directory)?;
    let path = config.figure_path(name);
    let outcome = match config.format {
        ImageFormat::Png => {
            let root = BitMapBackend::new(&path, FIGURE_SIZE).into_drawing_area();
            figure.draw(&root).and_then(|_| root.present()).map_err(|e| e.to_string())
        }
        ImageFormat::Svg => {
            let root = SVGBackend::new(&path, FIGURE_SIZE).into_drawing_area();
            figure.draw(&root).and_then(|_| root.present()).map_err(|e| e.to_string())
        }
    };
    outcome.map_err(|reason| ScreenError::Plot {
        figure: name.to_string(),
        reason,
    })?;
    debug!("Saved {}", path.display());
    Ok(path)
}

/// Chart with the shared margins; panels without a title get no caption.
fn chart_builder<'a, 'b, DB: DrawingBackend>(root: &'a DrawingArea<DB, Shift>, title: &str) -> ChartBuilder<'a, 'b, DB> {
    let mut builder = ChartBuilder::on(root);
    builder.margin(15).x_label_area_size(50).y_label_area_size(60);
    if !title.is_empty() {
        builder.caption(title, ("sans-serif", 22));
    }
    builder
}

fn log_counts(counts: &[u64]) -> Vec<f64> {
    counts.iter().map(|&c| (c as f64 + 1.0).log2()).collect()
}

// ─── binning helpers ─────────────────────────────────────────────────────────

/// Padded axis range over the finite values; `None` when there are none.
pub fn value_range(values: &[f64]) -> Option<Range<f64>> {
    let finite = finite_values(values);
    let lo = finite.iter().copied().reduce(f64::min)?;
    let hi = finite.iter().copied().reduce(f64::max)?;
    if lo == hi {
        return Some(lo - 0.5..hi + 0.5);
    }
    let pad = (hi - lo) * 0.05;
    Some(lo - pad..hi + pad)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

/// Equal-width bins over `range`; values outside it or missing are ignored.
pub fn histogram_bins(values: &[f64], range: &Range<f64>, bins: usize) -> Vec<Bin> {
    let bins = bins.max(1);
    let width = (range.end - range.start) / bins as f64;
    let mut result: Vec<Bin> = (0..bins)
        .map(|i| Bin {
            start: range.start + i as f64 * width,
            end: range.start + (i + 1) as f64 * width,
            count: 0,
        })
        .collect();
    for &v in values {
        if !v.is_finite() || v < range.start || v > range.end {
            continue;
        }
        let idx = (((v - range.start) / width).floor() as usize).min(bins - 1);
        result[idx].count += 1;
    }
    result
}

// ─── histogram ───────────────────────────────────────────────────────────────

struct HistogramLayer {
    label: String,
    values: Vec<f64>,
    colour: RGBColor,
}

struct Histogram {
    title: String,
    x_label: String,
    layers: Vec<HistogramLayer>,
    marker: Option<f64>,
}

impl Figure for Histogram {
    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> DrawResult<DB> {
        root.fill(&WHITE)?;

        let pooled: Vec<f64> = self.layers.iter().flat_map(|l| l.values.iter().copied()).collect();
        let Some(range) = value_range(&pooled) else {
            return Ok(());
        };
        let binned: Vec<Vec<Bin>> = self
            .layers
            .iter()
            .map(|l| histogram_bins(&l.values, &range, HISTOGRAM_BINS))
            .collect();
        let tallest = binned.iter().flatten().map(|b| b.count).max().unwrap_or(0).max(1);
        let y_max = tallest as f64 * 1.1;

        let mut chart = chart_builder(root, &self.title).build_cartesian_2d(range, 0.0..y_max)?;

        chart
            .configure_mesh()
            .x_desc(self.x_label.as_str())
            .y_desc("guides")
            .draw()?;

        for (layer, bins) in self.layers.iter().zip(&binned) {
            let colour = layer.colour;
            chart
                .draw_series(bins.iter().map(|b| {
                    Rectangle::new([(b.start, 0.0), (b.end, b.count as f64)], colour.mix(0.5).filled())
                }))?
                .label(layer.label.as_str())
                .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], colour.filled()));
        }

        if let Some(marker) = self.marker.filter(|m| m.is_finite()) {
            chart
                .draw_series(LineSeries::new(vec![(marker, 0.0), (marker, y_max)], BLACK.stroke_width(2)))?
                .label(format!("median {marker:.2}"))
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 15, y)], BLACK.stroke_width(2)));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .position(SeriesLabelPosition::UpperRight)
            .draw()?;
        Ok(())
    }
}

// ─── scatter ─────────────────────────────────────────────────────────────────

struct PointLayer {
    label: String,
    points: Vec<(f64, f64)>,
    colour: RGBColor,
    size: u32,
}

struct Scatter {
    title: String,
    x_label: String,
    y_label: String,
    layers: Vec<PointLayer>,
    diagonal: bool,
}

impl Figure for Scatter {
    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> DrawResult<DB> {
        root.fill(&WHITE)?;

        let xs: Vec<f64> = self.layers.iter().flat_map(|l| l.points.iter().map(|p| p.0)).collect();
        let ys: Vec<f64> = self.layers.iter().flat_map(|l| l.points.iter().map(|p| p.1)).collect();
        let (Some(x_range), Some(y_range)) = (value_range(&xs), value_range(&ys)) else {
            return Ok(());
        };

        let mut chart = chart_builder(root, &self.title).build_cartesian_2d(x_range.clone(), y_range.clone())?;

        chart
            .configure_mesh()
            .x_desc(self.x_label.as_str())
            .y_desc(self.y_label.as_str())
            .draw()?;

        if self.diagonal {
            let lo = x_range.start.max(y_range.start);
            let hi = x_range.end.min(y_range.end);
            chart.draw_series(LineSeries::new(vec![(lo, lo), (hi, hi)], BLACK.mix(0.3).stroke_width(1)))?;
        }

        for layer in self.layers.iter().filter(|l| !l.points.is_empty()) {
            let (colour, size) = (layer.colour, layer.size);
            chart
                .draw_series(layer.points.iter().map(move |&p| Circle::new(p, size, colour.mix(0.6).filled())))?
                .label(format!("{} ({})", layer.label, layer.points.len()))
                .legend(move |(x, y)| Circle::new((x + 5, y), size, colour.filled()));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .position(SeriesLabelPosition::UpperLeft)
            .draw()?;
        Ok(())
    }
}

/// Lane-vs-lane grid: histograms on the diagonal, scatters below it.
struct ScatterMatrix {
    title: String,
    lanes: Vec<(String, Vec<f64>)>,
}

impl Figure for ScatterMatrix {
    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> DrawResult<DB> {
        root.fill(&WHITE)?;
        let area = root.titled(&self.title, ("sans-serif", 22))?;
        let n = self.lanes.len();
        if n == 0 {
            return Ok(());
        }

        for (cell, panel) in area.split_evenly((n, n)).iter().enumerate() {
            let (row, col) = (cell / n, cell % n);
            let (y_name, y) = &self.lanes[row];
            let (x_name, x) = &self.lanes[col];
            match row.cmp(&col) {
                Ordering::Less => {}
                Ordering::Equal => Histogram {
                    title: String::new(),
                    x_label: x_name.clone(),
                    marker: None,
                    layers: vec![HistogramLayer {
                        label: "guides".to_string(),
                        values: x.clone(),
                        colour: GREY,
                    }],
                }
                .draw(panel)?,
                Ordering::Greater => Scatter {
                    title: String::new(),
                    x_label: x_name.clone(),
                    y_label: y_name.clone(),
                    diagonal: true,
                    layers: vec![PointLayer {
                        label: "guides".to_string(),
                        points: paired_points(x, y, |_| true),
                        colour: GREY,
                        size: 1,
                    }],
                }
                .draw(panel)?,
            }
        }
        Ok(())
    }
}

fn paired_points(x: &[f64], y: &[f64], keep: impl Fn(usize) -> bool) -> Vec<(f64, f64)> {
    x.iter()
        .zip(y)
        .enumerate()
        .filter(|(i, (a, b))| a.is_finite() && b.is_finite() && keep(*i))
        .map(|(_, (&a, &b))| (a, b))
        .collect()
}

// ─── stage figures ───────────────────────────────────────────────────────────

/// Read-count distribution of one merged counts column.
pub fn plot_counts_histogram(config: &PlotConfig, sample: &SampleKey, counts: &[u64]) -> Result<PathBuf> {
    let values = log_counts(counts);
    let figure = Histogram {
        title: format!("{sample} read counts"),
        x_label: "log2(counts + 1)".to_string(),
        marker: Some(nan_median(&values)),
        layers: vec![HistogramLayer {
            label: "all guides".to_string(),
            values,
            colour: GREY,
        }],
    };
    render(config, &format!("counts_histogram_{}_{}", sample.condition, sample.replicate), &figure)
}

fn lane_name(key: &ExperimentKey) -> String {
    let name = key
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| key.file.display().to_string());
    name.chars().take(LANE_NAME_WIDTH).collect()
}

/// Agreement between the counts files that were summed into one sample.
pub fn plot_premerged_counts(
    config: &PlotConfig,
    sample: &SampleKey,
    lanes: &[(&ExperimentKey, &[u64])],
) -> Result<PathBuf> {
    if lanes.len() < 2 {
        return Err(ScreenError::Plot {
            figure: format!("premerged counts {sample}"),
            reason: "only one counts file, no scatter matrix drawn".to_string(),
        });
    }
    let figure = ScatterMatrix {
        title: format!("{sample} counts per file, log2(counts + 1)"),
        lanes: lanes.iter().map(|(key, counts)| (lane_name(key), log_counts(counts))).collect(),
    };
    render(
        config,
        &format!("premerged_counts_scatter_{}_{}", sample.condition, sample.replicate),
        &figure,
    )
}

/// Counts of one comparison's two conditions, guides coloured by the sign of their phenotype.
pub fn plot_counts_scatter(
    config: &PlotConfig,
    (x_key, x): (&SampleKey, &[u64]),
    (y_key, y): (&SampleKey, &[u64]),
    (phenotype, scores): (&PhenotypeKey, &[f64]),
    negative_controls: &[bool],
) -> Result<PathBuf> {
    let (x, y) = (log_counts(x), log_counts(y));
    let is_negative = |i: usize| negative_controls.get(i).copied().unwrap_or(false);
    let score = |i: usize| scores.get(i).copied().unwrap_or(f64::NAN);
    let layer = |label: &str, colour: RGBColor, keep: &dyn Fn(usize) -> bool| PointLayer {
        label: label.to_string(),
        points: paired_points(&x, &y, keep),
        colour,
        size: 2,
    };

    let figure = Scatter {
        title: format!("{phenotype} counts"),
        x_label: format!("{x_key} log2(counts + 1)"),
        y_label: format!("{y_key} log2(counts + 1)"),
        diagonal: true,
        layers: vec![
            layer("not scored", GREY, &|i| !is_negative(i) && !score(i).is_finite()),
            layer("depleted", DEPLETED_COLOUR, &|i| !is_negative(i) && score(i) < 0.0),
            layer("enriched", ENRICHED_COLOUR, &|i| !is_negative(i) && score(i) >= 0.0),
            layer("negative controls", NEGATIVE_COLOUR, &is_negative),
        ],
    };
    render(
        config,
        &format!(
            "counts_scatter_{}_{}_{}_vs_{}",
            phenotype.phenotype, phenotype.replicate, x_key.condition, y_key.condition
        ),
        &figure,
    )
}

/// Phenotype scores of all guides against the negative controls.
pub fn plot_phenotype_histogram(
    config: &PlotConfig,
    key: &PhenotypeKey,
    scores: &[f64],
    negative_controls: &[bool],
) -> Result<PathBuf> {
    let negatives: Vec<f64> = scores
        .iter()
        .zip(negative_controls)
        .filter(|(_, &neg)| neg)
        .map(|(&s, _)| s)
        .collect();
    let figure = Histogram {
        title: format!("{key} phenotype scores"),
        x_label: "phenotype score".to_string(),
        marker: None,
        layers: vec![
            HistogramLayer {
                label: "all guides".to_string(),
                values: finite_values(scores),
                colour: GREY,
            },
            HistogramLayer {
                label: "negative controls".to_string(),
                values: finite_values(&negatives),
                colour: NEGATIVE_COLOUR,
            },
        ],
    };
    render(config, &format!("phenotype_histogram_{}_{}", key.phenotype, key.replicate), &figure)
}

/// Replicate agreement for one phenotype.
pub fn plot_replicate_scatter(
    config: &PlotConfig,
    (x_key, x): (&PhenotypeKey, &[f64]),
    (y_key, y): (&PhenotypeKey, &[f64]),
    negative_controls: &[bool],
) -> Result<PathBuf> {
    let is_negative = |i: usize| negative_controls.get(i).copied().unwrap_or(false);
    let figure = Scatter {
        title: format!("{} replicate agreement", x_key.phenotype),
        x_label: x_key.replicate.clone(),
        y_label: y_key.replicate.clone(),
        diagonal: true,
        layers: vec![
            PointLayer {
                label: "targeting".to_string(),
                points: paired_points(x, y, |i| !is_negative(i)),
                colour: GREY,
                size: 2,
            },
            PointLayer {
                label: "negative controls".to_string(),
                points: paired_points(x, y, is_negative),
                colour: NEGATIVE_COLOUR,
                size: 2,
            },
        ],
    };
    render(
        config,
        &format!("replicate_scatter_{}_{}_vs_{}", x_key.phenotype, x_key.replicate, y_key.replicate),
        &figure,
    )
}

/// How many guides per gene survived the count filter for one phenotype column.
pub fn plot_guides_per_gene(config: &PlotConfig, key: &PhenotypeKey, guides_per_gene: &[f64]) -> Result<PathBuf> {
    let figure = Histogram {
        title: format!("{key} guides passing filter per gene"),
        x_label: "guides per gene".to_string(),
        marker: Some(nan_median(guides_per_gene)),
        layers: vec![HistogramLayer {
            label: "genes".to_string(),
            values: guides_per_gene.to_vec(),
            colour: GREY,
        }],
    };
    render(config, &format!("guides_per_gene_{}_{}", key.phenotype, key.replicate), &figure)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolcanoPoint {
    pub effect: f64,
    /// -log10 of the Mann-Whitney p-value.
    pub significance: f64,
    pub pseudogene: bool,
    pub hit: bool,
}

/// Volcano coordinates with hits flagged.
///
/// Effects are scaled by the spread of the pseudogene effects, or of all
/// effects when no pseudogenes were scored.
pub fn volcano_points(effects: &[f64], pvalues: &[f64], pseudogenes: &[bool]) -> Vec<VolcanoPoint> {
    let is_pseudo = |i: usize| pseudogenes.get(i).copied().unwrap_or(false);
    let pseudo_effects: Vec<f64> = effects
        .iter()
        .enumerate()
        .filter(|(i, _)| is_pseudo(*i))
        .map(|(_, &e)| e)
        .collect();
    let mut sigma = nan_std(&pseudo_effects);
    if !(sigma > 0.0 && sigma.is_finite()) {
        sigma = nan_std(effects);
    }

    effects
        .iter()
        .zip(pvalues)
        .enumerate()
        .filter(|(_, (e, p))| e.is_finite() && p.is_finite() && **p > 0.0)
        .map(|(i, (&effect, &p))| {
            let significance = -p.log10();
            let hit = sigma > 0.0 && (effect / sigma).abs() * significance >= VOLCANO_HIT_THRESHOLD;
            VolcanoPoint {
                effect,
                significance,
                pseudogene: is_pseudo(i),
                hit,
            }
        })
        .collect()
}

fn volcano_layer(
    points: &[VolcanoPoint],
    label: &str,
    colour: RGBColor,
    size: u32,
    keep: impl Fn(&VolcanoPoint) -> bool,
) -> PointLayer {
    PointLayer {
        label: label.to_string(),
        points: points.iter().filter(|p| keep(p)).map(|p| (p.effect, p.significance)).collect(),
        colour,
        size,
    }
}

pub fn plot_volcano(
    config: &PlotConfig,
    key: &PhenotypeKey,
    effect_label: &str,
    effects: &[f64],
    pvalues: &[f64],
    pseudogenes: &[bool],
) -> Result<PathBuf> {
    let points = volcano_points(effects, pvalues, pseudogenes);
    let figure = Scatter {
        title: format!("{key} volcano"),
        x_label: effect_label.to_string(),
        y_label: "-log10 Mann-Whitney p-value".to_string(),
        diagonal: false,
        layers: vec![
            volcano_layer(&points, "genes", GREY, 3, |p| !p.pseudogene && !p.hit),
            volcano_layer(&points, "pseudogenes", NEGATIVE_COLOUR, 2, |p| p.pseudogene),
            volcano_layer(&points, "hits", HIT_COLOUR, 3, |p| !p.pseudogene && p.hit),
        ],
    };
    render(config, &format!("volcano_{}_{}", key.phenotype, key.replicate), &figure)
}
