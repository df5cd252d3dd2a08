use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use mrmcore::data::result::OptimizationResult;
use serde::{Deserialize, Serialize};

use crate::error::{MrmError, Result};
use crate::settings::Method;

/// One flattened result table row.
///
/// Compounds without a selected pair keep zeroed mass, energy and score
/// columns; `status` tells why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(rename = "chemical")]
    pub name: String,
    #[serde(rename = "Precursor_mz")]
    pub precursor_mz: f64,
    #[serde(rename = "InChIKey")]
    pub key: String,
    #[serde(rename = "RT")]
    pub retention_time: f64,
    pub coverage_all: usize,
    pub coverage_low: usize,
    pub coverage_medium: usize,
    pub coverage_high: usize,
    #[serde(rename = "MSMS1")]
    pub mz_1: f64,
    #[serde(rename = "MSMS2")]
    pub mz_2: f64,
    #[serde(rename = "CE_QQQ1")]
    pub ce_instrument_1: f64,
    #[serde(rename = "CE_QQQ2")]
    pub ce_instrument_2: f64,
    pub max_score: f64,
    pub max_sensitivity_score: f64,
    pub max_specificity_score: f64,
    pub max_intensity_sum: f64,
    pub status: String,
    /// JSON list of the ranked alternative pairs.
    pub best_combinations: String,
}

impl TryFrom<&OptimizationResult> for ResultRow {
    type Error = serde_json::Error;

    fn try_from(result: &OptimizationResult) -> std::result::Result<Self, Self::Error> {
        let best = result.best.as_ref();
        let pick = |f: fn(&mrmcore::data::result::RankedPair) -> f64| best.map_or(0.0, f);

        Ok(ResultRow {
            name: result.compound.name.clone(),
            precursor_mz: result.compound.precursor_mz,
            key: result.compound.key.clone(),
            retention_time: result.compound.retention_time,
            coverage_all: result.coverage.all,
            coverage_low: result.coverage.low,
            coverage_medium: result.coverage.medium,
            coverage_high: result.coverage.high,
            mz_1: pick(|b| b.mz_1),
            mz_2: pick(|b| b.mz_2),
            ce_instrument_1: pick(|b| b.ce_instrument_1),
            ce_instrument_2: pick(|b| b.ce_instrument_2),
            max_score: pick(|b| b.score),
            max_sensitivity_score: pick(|b| b.sensitivity),
            max_specificity_score: pick(|b| b.specificity),
            max_intensity_sum: pick(|b| b.intensity_sum),
            status: result.status.to_string(),
            // NaN fields are written as null
            best_combinations: serde_json::to_string(&result.ranked)?,
        })
    }
}

/// `<output dir>/MRM_optimization_intermediate_<method>_<count>.csv`
pub fn checkpoint_path(output: &Path, method: Method, processed: usize) -> PathBuf {
    let dir = output.parent().unwrap_or_else(|| Path::new(""));
    dir.join(format!("MRM_optimization_intermediate_{method}_{processed}.csv"))
}

/// Writes one row per result to `path`, replacing any previous file.
pub fn write_results(path: &Path, results: &[OptimizationResult]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| MrmError::io(dir, e))?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(|e| MrmError::csv(path, e))?;
    for result in results {
        let row = ResultRow::try_from(result).map_err(|e| MrmError::json(path, e))?;
        writer.serialize(row).map_err(|e| MrmError::csv(path, e))?;
    }
    writer.flush().map_err(|e| MrmError::io(path, e))?;
    info!("{} result row(s) written to {}", results.len(), path.display());
    Ok(())
}

pub fn read_results(path: &Path) -> Result<Vec<ResultRow>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| MrmError::csv(path, e))?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<ResultRow>, csv::Error>>()
        .map_err(|e| MrmError::csv(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrmcore::algorithm::collision::CollisionEnergyCalibration;
    use mrmcore::algorithm::method::Selection;
    use mrmcore::data::result::{CompoundStatus, RankedPair};
    use mrmcore::data::tier::Coverage;
    use mrmcore::data::transition::{CompoundInfo, FragmentIon, IonPairCandidate};

    fn optimized() -> OptimizationResult {
        let mut candidate = IonPairCandidate::new(
            FragmentIon::new("Simazine", 132.0, 500.0, 20.0, 40.0),
            FragmentIon::new("Simazine", 124.0, 300.0, 30.0, 60.0),
        );
        candidate.scores.sensitivity = 1.0;
        candidate.scores.specificity = 1.0;
        candidate.scores.score = 1.0;
        let selection = Selection { best: candidate.clone(), ranked: vec![candidate] };
        let compound = CompoundInfo {
            key: "KEY-A".into(),
            name: "Simazine".into(),
            precursor_mz: 202.08,
            retention_time: 4.5,
            ion_mode: "P".into(),
        };
        let coverage = Coverage { low: 1, medium: 2, high: 0, all: 3 };
        OptimizationResult::optimized(compound, coverage, &selection, &CollisionEnergyCalibration::default())
    }

    #[test]
    fn test_write_and_read_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("results.csv");
        let results = vec![optimized(), OptimizationResult::unresolved("KEY-B", CompoundStatus::NotFound)];
        write_results(&path, &results).unwrap();

        let rows = read_results(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "KEY-A");
        assert_eq!(rows[0].coverage_all, 3);
        assert!((rows[0].ce_instrument_1 - (0.5788 * 20.0 + 9.4452)).abs() < 1e-9);
        let ranked: Vec<RankedPair> = serde_json::from_str(&rows[0].best_combinations).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].rank, 1);

        assert_eq!(rows[1].name, "not found");
        assert_eq!(rows[1].status, "not found");
        assert_eq!(rows[1].max_score, 0.0);
        assert_eq!(rows[1].best_combinations, "[]");
    }

    #[test]
    fn test_nan_scores_are_written_as_null() {
        let mut result = optimized();
        result.ranked[0].specificity = f64::NAN;
        result.ranked[0].score = f64::NAN;

        let row = ResultRow::try_from(&result).unwrap();
        let ranked: serde_json::Value = serde_json::from_str(&row.best_combinations).unwrap();
        assert!(ranked[0]["specificity"].is_null());
        assert!(ranked[0]["score"].is_null());
        assert_eq!(ranked[0]["sensitivity"], 1.0);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        write_results(&path, &[result]).unwrap();
        let rows = read_results(&path).unwrap();
        assert_eq!(rows[0].best_combinations, row.best_combinations);
    }

    #[test]
    fn test_checkpoint_path() {
        let path = checkpoint_path(Path::new("runs/results.csv"), Method::Overlap, 200);
        assert_eq!(path, PathBuf::from("runs/MRM_optimization_intermediate_overlap_200.csv"));
        let path = checkpoint_path(Path::new("results.csv"), Method::Coverage, 100);
        assert_eq!(path, PathBuf::from("MRM_optimization_intermediate_coverage_100.csv"));
    }
}
