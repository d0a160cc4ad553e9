use std::fs;
use std::path::{Path, PathBuf};

use screen_processor::analysis::plots::{ImageFormat, PlotConfig};
use screen_processor::config::ExperimentConfig;
use screen_processor::error::ScreenError;
use screen_processor::pipeline::run_experiment;
use serde_json::json;

const LIBRARY: &str = "sgId\tsublibrary\tgene\ttranscripts\tsequence\n\
a1\tdrug_targets\tAAK1\tP1\tGACA\n\
a2\tdrug_targets\tAAK1\tP1\tGACC\n\
a3\tdrug_targets\tAAK1\tP2\tGACG\n\
a4\tdrug_targets\tAAK1\tP2\tGACT\n\
b1\tdrug_targets\tBRCA2\tP1\tTACA\n\
b2\tdrug_targets\tBRCA2\tP1\tTACC\n\
b3\tdrug_targets\tBRCA2\tP1\tTACG\n\
b4\tdrug_targets\tBRCA2\t\tTACT\n\
n1\tdrug_targets\tnegative_control\tna\tCCCA\n\
n2\tdrug_targets\tnegative_control\tna\tCCCC\n\
x1\tsecretome\tCD4\tP1\tGGGG\n";

// negative controls keep a 1:1 ratio between conditions; a4 stays below 50 reads
const T0_COUNTS: &str = "a1\t100\na2\t100\na3\t200\na4\t10\nb1\t400\nb2\t300\nb3\t100\nb4\t250\n\
n1\t100\nn2\t200\nzz\t500\na1\t999\n";
const UNTREATED_COUNTS: &str = "a1\t400\na2\t300\na3\t500\na4\t20\nb1\t100\nb2\t100\nb3\t0\nb4\t80\n\
n1\t100\nn2\t200\n";
// a second sequencing lane of T0 Rep1; shifts n1 so the two controls differ
const T0_LANE2_COUNTS: &str = "a1\t20\nb1\t30\nn1\t40\n";
const T0_REP2_COUNTS: &str = "a1\t120\na2\t90\na3\t210\na4\t5\nb1\t380\nb2\t310\nb3\t90\nb4\t240\n\
n1\t150\nn2\t150\n";
const UNTREATED_REP2_COUNTS: &str = "a1\t380\na2\t320\na3\t480\na4\t15\nb1\t120\nb2\t90\nb3\t10\nb4\t70\n\
n1\t120\nn2\t180\n";

struct Fixture {
    _dir: tempfile::TempDir,
    config_path: PathBuf,
    output: PathBuf,
}

fn fixture(overrides: serde_json::Value) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("library.txt"), LIBRARY).unwrap();
    fs::write(dir.path().join("t0.counts"), T0_COUNTS).unwrap();
    fs::write(dir.path().join("untreated.counts"), UNTREATED_COUNTS).unwrap();
    fs::write(dir.path().join("t0_lane2.counts"), T0_LANE2_COUNTS).unwrap();
    fs::write(dir.path().join("t0_rep2.counts"), T0_REP2_COUNTS).unwrap();
    fs::write(dir.path().join("untreated_rep2.counts"), UNTREATED_REP2_COUNTS).unwrap();

    let mut config = json!({
        "output_folder": "results",
        "experiment_name": "demo",
        "library_table": "library.txt",
        "sublibraries": ["Drug_Targets"],
        "counts_files": [
            {"condition": "T0", "replicate": "Rep1", "path": "t0.counts"},
            {"condition": "untreated", "replicate": "Rep1", "path": "untreated.counts"}
        ],
        "filter_type": "either",
        "minimum_reads": 50,
        "pseudocount_behavior": "zeros only",
        "pseudocount": 1.0,
        "growth_values": [{"phenotype": "gamma", "replicate": "Rep1", "value": 1.0}],
        "condition_tuples": [{"phenotype": "gamma", "condition1": "T0", "condition2": "untreated"}],
        "analyses": [
            {"name": "calculate_ave", "params": [0]},
            {"name": "calculate_mw"}
        ]
    });
    if let (Some(base), Some(extra)) = (config.as_object_mut(), overrides.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }

    let config_path = dir.path().join("experiment.json");
    fs::write(&config_path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    let output = dir.path().join("results");
    Fixture {
        _dir: dir,
        config_path,
        output,
    }
}

/// Header rows and body rows of a leveled table, split into cells.
fn read_table(path: &Path, header_rows: usize) -> (Vec<Vec<String>>, Vec<Vec<String>>) {
    let text = fs::read_to_string(path).unwrap();
    let mut rows: Vec<Vec<String>> = text
        .lines()
        .map(|l| l.split('\t').map(str::to_string).collect())
        .collect();
    let body = rows.split_off(header_rows);
    (rows, body)
}

fn value(cell: &str) -> Option<f64> {
    if cell.is_empty() {
        None
    } else {
        Some(cell.parse().unwrap())
    }
}

#[test]
fn ten_guide_screen() {
    let fx = fixture(json!({}));
    let params = ExperimentConfig::load(&fx.config_path).unwrap().validate().unwrap();
    let summary = run_experiment(&params, None).unwrap();

    assert_eq!(summary.guides, 10);
    assert_eq!(summary.phenotype_columns, 1);
    assert_eq!(summary.pseudogene_guides, 0);
    assert!(summary.figures.is_empty());

    // phenotype table: phenotype, replicate, index-name rows
    let (header, body) = read_table(&fx.output.join("demo_phenotypetable.txt"), 3);
    assert_eq!(header[0], vec!["phenotype", "gamma"]);
    assert_eq!(header[2][0], "id");
    assert_eq!(body.len(), 10);

    let score = |id: &str| value(&body.iter().find(|r| r[0] == id).unwrap()[1]);
    assert!(score("n1").unwrap().abs() < 1e-9);
    assert!(score("n2").unwrap().abs() < 1e-9);
    assert_eq!(score("a4"), None);
    assert!(score("a1").unwrap() > 0.0);
    assert!(score("b1").unwrap() < 0.0);
    // b3 passes the 'either' filter and gets a pseudocount for its zero
    assert!(score("b3").unwrap() < score("b1").unwrap());

    // gene table: phenotype, replicate, statistic, index-name rows
    let (header, body) = read_table(&fx.output.join("demo_genetable.txt"), 4);
    let genes: Vec<&str> = body.iter().map(|r| r[0].as_str()).collect();
    assert_eq!(genes, vec!["AAK1", "BRCA2"]);

    let column = |statistic: &str| header[2].iter().position(|c| c == statistic).unwrap();
    let counts = column("sgRNA count_MW");
    assert_eq!(value(&body[0][counts]), Some(3.0));
    assert_eq!(value(&body[1][counts]), Some(4.0));
    let pvalue = value(&body[0][column("Mann-Whitney p-value")]).unwrap();
    assert!((0.0..=1.0).contains(&pvalue));
    assert!(value(&body[0][column("average of all phenotypes")]).unwrap() > 0.0);

    // counts: the duplicate a1 line and the unknown zz guide do not add reads
    let merged_summary = fs::read_to_string(fx.output.join("demo_mergedcountstable_summary.txt")).unwrap();
    assert_eq!(merged_summary.lines().next(), Some("T0\tRep1\t1760"));

    let library = fs::read_to_string(fx.output.join("demo_librarytable.txt")).unwrap();
    assert_eq!(library.lines().count(), 11);
    assert!(!fx.output.join("demo_genetable_collapsed.txt").exists());
}

#[test]
fn strict_counts_reject_duplicate_guides() {
    let fx = fixture(json!({"strict_counts": true}));
    let params = ExperimentConfig::load(&fx.config_path).unwrap().validate().unwrap();
    let result = run_experiment(&params, None);
    assert!(matches!(result, Err(ScreenError::InvalidCounts { .. })));
}

#[test]
fn seeded_pseudogenes_and_transcript_collapse() {
    let overrides = json!({
        "generate_pseudogene_dist": "manual",
        "num_pseudogenes": 3,
        "pseudogene_size": 4,
        "collapse_to_transcripts": true,
        "random_seed": 17
    });

    let run = || {
        let fx = fixture(overrides.clone());
        let params = ExperimentConfig::load(&fx.config_path).unwrap().validate().unwrap();
        let summary = run_experiment(&params, None).unwrap();
        assert_eq!(summary.pseudogene_guides, 12);
        let genes = fs::read_to_string(fx.output.join("demo_genetable.txt")).unwrap();
        let collapsed = fs::read_to_string(fx.output.join("demo_genetable_collapsed.txt")).unwrap();
        (genes, collapsed)
    };
    let (genes, collapsed) = run();
    assert_eq!(run(), (genes.clone(), collapsed.clone()));

    // transcript rows: AAK1 P1/P2, BRCA2 P1/na, three pseudogenes
    let rows: Vec<&str> = genes.lines().skip(4).collect();
    assert_eq!(rows.len(), 7);
    assert!(rows.iter().any(|r| r.starts_with("BRCA2\tna\t")));
    assert!(rows.iter().any(|r| r.starts_with("pseudo_2\tna\t")));

    // one row per gene, pseudogenes included
    let collapsed_rows: Vec<&str> = collapsed.lines().skip(4).collect();
    assert_eq!(collapsed_rows.len(), 5);
    assert!(collapsed.lines().nth(2).unwrap().contains("transcripts"));
}

#[test]
fn two_replicates_with_auto_pseudogenes_and_figures() {
    let fx = fixture(json!({
        "counts_files": [
            {"condition": "T0", "replicate": "Rep1", "path": "t0.counts"},
            {"condition": "T0", "replicate": "Rep1", "path": "t0_lane2.counts"},
            {"condition": "untreated", "replicate": "Rep1", "path": "untreated.counts"},
            {"condition": "T0", "replicate": "Rep2", "path": "t0_rep2.counts"},
            {"condition": "untreated", "replicate": "Rep2", "path": "untreated_rep2.counts"}
        ],
        "growth_values": [
            {"phenotype": "gamma", "replicate": "Rep1", "value": 1.0},
            {"phenotype": "gamma", "replicate": "Rep2", "value": 1.0}
        ],
        "generate_pseudogene_dist": "auto",
        "collapse_to_transcripts": true,
        "random_seed": 5
    }));
    let params = ExperimentConfig::load(&fx.config_path).unwrap().validate().unwrap();
    let plot_dir = params.plot_directory();
    let plots = PlotConfig::new(&plot_dir, ImageFormat::Svg);
    let summary = run_experiment(&params, Some(&plots)).unwrap();

    // one pseudo-transcript per real transcript: AAK1 P1/P2, BRCA2 P1/na
    assert_eq!(summary.pseudogene_guides, 8);
    assert_eq!(summary.phenotype_columns, 3);

    // 4 counts histograms, 1 lane matrix, 2 counts scatters, 3 phenotype histograms,
    // 1 replicate scatter, 3 guides-per-gene histograms, 1 volcano
    assert_eq!(summary.figures.len(), 15);
    for figure in &summary.figures {
        assert!(figure.exists(), "{} was not written", figure.display());
        assert_eq!(figure.extension().and_then(|e| e.to_str()), Some("svg"));
    }
    for name in [
        "premerged_counts_scatter_T0_Rep1.svg",
        "counts_scatter_gamma_Rep2_T0_vs_untreated.svg",
        "replicate_scatter_gamma_Rep1_vs_Rep2.svg",
        "volcano_gamma_ave_Rep1_Rep2.svg",
    ] {
        assert!(plot_dir.join(name).exists(), "missing {name}");
    }

    let merged_summary = fs::read_to_string(fx.output.join("demo_mergedcountstable_summary.txt")).unwrap();
    assert_eq!(merged_summary.lines().next(), Some("T0\tRep1\t1850"));

    let (_, genes) = read_table(&fx.output.join("demo_genetable.txt"), 4);
    assert_eq!(genes.len(), 8);

    // best transcript per gene in every phenotype column, pseudogenes included
    let (header, collapsed) = read_table(&fx.output.join("demo_genetable_collapsed.txt"), 4);
    let names: Vec<&str> = collapsed.iter().map(|r| r[0].as_str()).collect();
    assert_eq!(names, vec!["AAK1", "BRCA2", "pseudo_0", "pseudo_1"]);

    let transcript_columns: Vec<usize> = header[2]
        .iter()
        .enumerate()
        .filter(|(_, c)| c.as_str() == "transcripts")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(transcript_columns.len(), 3);
    for &column in &transcript_columns {
        assert!(["P1", "P2"].contains(&collapsed[0][column].as_str()));
        assert!(["P1", "na"].contains(&collapsed[1][column].as_str()));
        for row in &collapsed[2..] {
            assert!(row[column].starts_with("pseudo_transcript_"), "{:?}", row);
        }
    }
}
