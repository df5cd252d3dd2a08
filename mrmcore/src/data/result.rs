use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::algorithm::collision::CollisionEnergyCalibration;
use crate::algorithm::method::Selection;
use crate::data::tier::Coverage;
use crate::data::transition::{CompoundInfo, IonPairCandidate};

/// Outcome of processing one target compound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompoundStatus {
    Optimized,
    NotFound,
    NoPrecursorType,
    /// Fewer than two usable ions or no pair passing the separation rules.
    NoCombination,
    Failed,
}

impl Display for CompoundStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CompoundStatus::Optimized => write!(f, "optimized"),
            CompoundStatus::NotFound => write!(f, "not found"),
            CompoundStatus::NoPrecursorType => write!(f, "no precursor type"),
            CompoundStatus::NoCombination => write!(f, "no combination"),
            CompoundStatus::Failed => write!(f, "error"),
        }
    }
}

/// One ranked ion pair as reported for audit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedPair {
    pub rank: usize,
    pub mz_1: f64,
    pub intensity_1: f64,
    pub ce_1: f64,
    pub nce_1: f64,
    pub ce_instrument_1: f64,
    pub mz_2: f64,
    pub intensity_2: f64,
    pub ce_2: f64,
    pub nce_2: f64,
    pub ce_instrument_2: f64,
    pub intensity_sum: f64,
    pub interference_1: f64,
    pub interference_2: f64,
    pub interference_sum: f64,
    pub hit_count: usize,
    pub hit_rate: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub score: f64,
}

impl RankedPair {
    pub fn from_candidate(rank: usize, candidate: &IonPairCandidate, calibration: &CollisionEnergyCalibration) -> Self {
        let (q1, q2, s) = (&candidate.quantifier, &candidate.qualifier, &candidate.scores);
        RankedPair {
            rank,
            mz_1: q1.mz,
            intensity_1: q1.intensity,
            ce_1: q1.collision_energy,
            nce_1: q1.normalized_collision_energy,
            ce_instrument_1: calibration.to_instrument(q1.collision_energy),
            mz_2: q2.mz,
            intensity_2: q2.intensity,
            ce_2: q2.collision_energy,
            nce_2: q2.normalized_collision_energy,
            ce_instrument_2: calibration.to_instrument(q2.collision_energy),
            intensity_sum: s.intensity_sum,
            interference_1: s.interference_1,
            interference_2: s.interference_2,
            interference_sum: s.interference_sum,
            hit_count: s.hit_count,
            hit_rate: s.hit_rate,
            sensitivity: s.sensitivity,
            specificity: s.specificity,
            score: s.score,
        }
    }
}

/// Terminal per-compound result; written once, never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub compound: CompoundInfo,
    pub status: CompoundStatus,
    pub coverage: Coverage,
    pub best: Option<RankedPair>,
    pub ranked: Vec<RankedPair>,
}

impl OptimizationResult {
    pub fn optimized(
        compound: CompoundInfo,
        coverage: Coverage,
        selection: &Selection,
        calibration: &CollisionEnergyCalibration,
    ) -> Self {
        let ranked = selection
            .ranked
            .iter()
            .enumerate()
            .map(|(i, c)| RankedPair::from_candidate(i + 1, c, calibration))
            .collect();
        OptimizationResult {
            compound,
            status: CompoundStatus::Optimized,
            coverage,
            best: Some(RankedPair::from_candidate(1, &selection.best, calibration)),
            ranked,
        }
    }

    /// Sentinel row for a compound that was located but produced no pair.
    pub fn skipped(compound: CompoundInfo, status: CompoundStatus, coverage: Coverage) -> Self {
        OptimizationResult { compound, status, coverage, best: None, ranked: Vec::new() }
    }

    /// Sentinel row for a compound whose library rows could not be used at all.
    pub fn unresolved(key: &str, status: CompoundStatus) -> Self {
        let name = match status {
            CompoundStatus::NotFound => "not found".to_string(),
            _ => key.trim().to_string(),
        };
        let compound = CompoundInfo {
            key: key.trim().to_string(),
            name,
            precursor_mz: 0.0,
            retention_time: 0.0,
            ion_mode: String::new(),
        };
        OptimizationResult::skipped(compound, status, Coverage::default())
    }

    pub fn is_optimized(&self) -> bool {
        self.status == CompoundStatus::Optimized
    }

    pub fn max_score(&self) -> f64 {
        self.best.as_ref().map_or(0.0, |b| b.score)
    }
}
