use std::collections::BTreeMap;

use tracing::info;

use crate::analysis::phenotype::PhenotypeTable;
use crate::models::{PhenotypeKey, AVERAGE_PREFIX};

/// Label of the averaged pseudo-replicate, e.g. `ave_Rep1_Rep2`.
pub fn average_label(replicates: &[String]) -> String {
    format!("{}{}", AVERAGE_PREFIX, replicates.join("_"))
}

/// Element-wise mean; a missing value in any column makes the mean missing.
pub fn strict_mean(columns: &[&[f64]]) -> Vec<f64> {
    let Some(first) = columns.first() else {
        return Vec::new();
    };
    (0..first.len())
        .map(|i| {
            let mut sum = 0.0;
            for column in columns {
                let v = column[i];
                if !v.is_finite() {
                    return f64::NAN;
                }
                sum += v;
            }
            sum / columns.len() as f64
        })
        .collect()
}

/// Copy of `table` with an `ave_<reps>` column per phenotype that has more than one replicate.
///
/// Averaged columns are never averaged again.
pub fn average_replicates(table: &PhenotypeTable) -> PhenotypeTable {
    let mut by_phenotype: BTreeMap<String, Vec<&PhenotypeKey>> = BTreeMap::new();
    for key in table.columns.keys().filter(|k| !k.is_average()) {
        by_phenotype.entry(key.phenotype.clone()).or_default().push(key);
    }

    let mut averaged = Vec::new();
    for (phenotype, keys) in &by_phenotype {
        if keys.len() < 2 {
            continue;
        }
        let replicates: Vec<String> = keys.iter().map(|k| k.replicate.clone()).collect();
        let columns: Vec<&[f64]> = keys.iter().map(|k| table.columns[*k].as_slice()).collect();
        let mean = strict_mean(&columns);

        let valid = mean.iter().filter(|v| v.is_finite()).count();
        info!("{}: averaged {} replicates, {} guides scored in all", phenotype, keys.len(), valid);
        averaged.push((PhenotypeKey::new(phenotype, average_label(&replicates)), mean));
    }

    let mut result = table.clone();
    for (key, mean) in averaged {
        result.insert(key, mean);
    }
    result
}
