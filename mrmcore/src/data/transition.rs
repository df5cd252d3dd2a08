use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::data::record::FragmentRecord;

/// A fragment ion usable as a detection channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FragmentIon {
    pub compound_name: String,
    pub mz: f64,
    pub intensity: f64,
    pub collision_energy: f64,
    pub normalized_collision_energy: f64,
}

impl FragmentIon {
    pub fn new(compound_name: &str, mz: f64, intensity: f64, collision_energy: f64, normalized_collision_energy: f64) -> Self {
        FragmentIon {
            compound_name: compound_name.to_string(),
            mz,
            intensity,
            collision_energy,
            normalized_collision_energy,
        }
    }
}

impl From<&FragmentRecord> for FragmentIon {
    fn from(record: &FragmentRecord) -> Self {
        FragmentIon {
            compound_name: record.display_name().to_string(),
            mz: record.fragment_mz,
            intensity: record.intensity,
            collision_energy: record.collision_energy,
            normalized_collision_energy: record.normalized_collision_energy,
        }
    }
}

/// Scores attached to an ion pair candidate.
///
/// The overlap method fills the summed interference intensities, the coverage
/// method the interfering-compound hit counts; both fill the sub-scores.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
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

/// Unordered pair of fragment ions of one compound, the first acting as
/// quantifier and the second as qualifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IonPairCandidate {
    pub quantifier: FragmentIon,
    pub qualifier: FragmentIon,
    pub scores: ScoreBreakdown,
}

impl IonPairCandidate {
    pub fn new(quantifier: FragmentIon, qualifier: FragmentIon) -> Self {
        let intensity_sum = quantifier.intensity + qualifier.intensity;
        IonPairCandidate {
            quantifier,
            qualifier,
            scores: ScoreBreakdown { intensity_sum, ..ScoreBreakdown::default() },
        }
    }

    /// Mass pair key independent of ion order.
    pub fn mass_key(&self) -> (OrderedFloat<f64>, OrderedFloat<f64>) {
        let a = OrderedFloat(self.quantifier.mz);
        let b = OrderedFloat(self.qualifier.mz);
        if a <= b { (a, b) } else { (b, a) }
    }

    pub fn mass_difference(&self) -> f64 {
        (self.quantifier.mz - self.qualifier.mz).abs()
    }
}

/// Compound-level facts taken from the first library row of a target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompoundInfo {
    pub key: String,
    pub name: String,
    pub precursor_mz: f64,
    pub retention_time: f64,
    pub ion_mode: String,
}

impl CompoundInfo {
    pub fn from_record(key: &str, record: &FragmentRecord, rt_offset: f64) -> Self {
        CompoundInfo {
            key: key.to_string(),
            name: record.display_name().to_string(),
            precursor_mz: record.precursor_mz,
            retention_time: record.retention_time + rt_offset,
            ion_mode: record.ion_mode.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mass_key_is_order_independent() {
        let a = FragmentIon::new("x", 150.0, 1.0, 20.0, 40.0);
        let b = FragmentIon::new("x", 100.0, 2.0, 20.0, 40.0);
        let ab = IonPairCandidate::new(a.clone(), b.clone());
        let ba = IonPairCandidate::new(b, a);
        assert_eq!(ab.mass_key(), ba.mass_key());
        assert_eq!(ab.mass_key().0.into_inner(), 100.0);
        assert!((ab.scores.intensity_sum - 3.0).abs() < 1e-12);
        assert!((ab.mass_difference() - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_compound_info_applies_rt_offset() {
        let record = FragmentRecord::new("K", "Simazine", 202.1, 4.5, 132.0, 10.0, 25.0, 50.0, "P", "[M+H]+");
        let info = CompoundInfo::from_record("K", &record, 0.5);
        assert_eq!(info.name, "Simazine");
        assert!((info.retention_time - 5.0).abs() < 1e-12);
        assert_eq!(info.ion_mode, "P");
    }
}
