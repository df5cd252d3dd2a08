use std::cmp::Ordering;
use std::collections::HashSet;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::data::record::FragmentRecord;
use crate::data::tier::{Coverage, TierBounds, Tiered};
use crate::data::transition::{FragmentIon, IonPairCandidate};

/// Thresholds and weights shared by both transition methods.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairSettings {
    /// Fragments within this distance of the precursor m/z are unusable.
    pub precursor_min_diff: f64,
    /// Minimum m/z separation between the two ions of a pair.
    pub ion_pair_min_diff: f64,
    /// Ions kept per collision-energy tier by the overlap method.
    pub max_ions_per_tier: usize,
    /// Peak matching tolerance of the overlap method.
    pub msms_tolerance: f64,
    pub sensitivity_weight: f64,
    pub specificity_weight: f64,
}

impl Default for PairSettings {
    fn default() -> Self {
        PairSettings {
            precursor_min_diff: 14.0126,
            ion_pair_min_diff: 2.0,
            max_ions_per_tier: 10,
            msms_tolerance: 0.7,
            sensitivity_weight: 0.5,
            specificity_weight: 0.5,
        }
    }
}

impl PairSettings {
    pub fn weighted(&self, sensitivity: f64, specificity: f64) -> f64 {
        sensitivity * self.sensitivity_weight + specificity * self.specificity_weight
    }
}

/// The best pair of a compound and the top ranked alternatives.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub best: IonPairCandidate,
    pub ranked: Vec<IonPairCandidate>,
}

/// A transition selection strategy.
///
/// Both methods follow the same per-compound sequence: rank and filter the
/// usable fragment ions, form candidate pairs, score them against the
/// method's interference source, and select the best pair. The run loop is
/// written once against this trait.
pub trait TransitionMethod {
    /// Co-eluting interference the method scores candidates against.
    type Interference;

    fn name(&self) -> &'static str;

    /// Tiers used to rank ions.
    fn tier_bounds(&self) -> TierBounds;

    fn settings(&self) -> &PairSettings;

    fn rank_and_filter(&self, ions: Vec<FragmentIon>) -> Vec<FragmentIon>;

    fn generate_pairs(&self, ions: &[FragmentIon]) -> Vec<IonPairCandidate>;

    fn score(&mut self, candidates: &mut [IonPairCandidate], interference: &Self::Interference);

    fn select(&self, candidates: Vec<IonPairCandidate>) -> Option<Selection>;

    fn coverage(&self, interference: &Self::Interference) -> Coverage;

    /// Releases spare memory held between compounds.
    fn reclaim(&mut self) {}

    /// Scores `candidates` and selects the best pair.
    fn score_and_select(
        &mut self,
        mut candidates: Vec<IonPairCandidate>,
        interference: &Self::Interference,
    ) -> Option<Selection> {
        self.score(&mut candidates, interference);
        self.select(candidates)
    }
}

/// Fragment ions of `records` that keep more than `min_diff` away from the
/// precursor m/z.
pub fn usable_ions(records: &[FragmentRecord], precursor_mz: f64, min_diff: f64) -> Vec<FragmentIon> {
    records
        .iter()
        .filter(|r| (r.fragment_mz - precursor_mz).abs() > min_diff)
        .map(FragmentIon::from)
        .collect()
}

// NaN sorts below every number so that missing values end up last in
// descending order.
fn descending_key(value: f64) -> OrderedFloat<f64> {
    if value.is_nan() {
        OrderedFloat(f64::NEG_INFINITY)
    } else {
        OrderedFloat(value)
    }
}

fn cmp_descending(a: f64, b: f64) -> Ordering {
    descending_key(b).cmp(&descending_key(a))
}

/// Stable sort by intensity, highest first.
pub fn sort_by_intensity(ions: &mut [FragmentIon]) {
    ions.sort_by(|a, b| cmp_descending(a.intensity, b.intensity));
}

/// Sorts one tier by intensity, keeps the most intense entry per
/// (compound name, m/z) and truncates to `top_k`.
pub fn rank_tier(mut ions: Vec<FragmentIon>, top_k: usize) -> Vec<FragmentIon> {
    sort_by_intensity(&mut ions);
    let mut seen = HashSet::new();
    ions.retain(|ion| seen.insert((ion.compound_name.clone(), ion.mz.to_bits())));
    ions.truncate(top_k);
    ions
}

/// Ranks every tier independently and concatenates them low to high.
pub fn rank_tiers<F>(ions: Vec<FragmentIon>, bounds: TierBounds, energy: F, top_k: usize) -> Vec<FragmentIon>
where
    F: Fn(&FragmentIon) -> f64,
{
    let tiered = Tiered::split(ions, bounds, energy);
    Tiered {
        low: rank_tier(tiered.low, top_k),
        medium: rank_tier(tiered.medium, top_k),
        high: rank_tier(tiered.high, top_k),
    }
    .into_flat()
}

/// All unordered pairs of `ions` whose masses differ and are at least
/// `min_diff` apart, in combination order.
pub fn pair_combinations(ions: &[FragmentIon], min_diff: f64) -> Vec<IonPairCandidate> {
    ions.iter()
        .tuple_combinations()
        .filter(|(a, b)| a.mz != b.mz && (a.mz - b.mz).abs() >= min_diff)
        .map(|(a, b)| IonPairCandidate::new(a.clone(), b.clone()))
        .collect()
}

/// Largest non-NaN value, if any.
pub fn max_finite<I: IntoIterator<Item = f64>>(values: I) -> Option<f64> {
    values.into_iter().filter(|v| !v.is_nan()).fold(None, |acc, v| match acc {
        Some(m) if m >= v => Some(m),
        _ => Some(v),
    })
}

/// Stable ranking by score; the first candidate is the best, ties keep
/// their incoming order.
pub fn rank_by_score(mut candidates: Vec<IonPairCandidate>, top_n: usize) -> Option<Selection> {
    candidates.sort_by(|a, b| cmp_descending(a.scores.score, b.scores.score));
    let best = candidates.first()?.clone();
    candidates.truncate(top_n);
    Some(Selection { best, ranked: candidates })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ion(name: &str, mz: f64, intensity: f64, ce: f64) -> FragmentIon {
        FragmentIon::new(name, mz, intensity, ce, ce * 2.0)
    }

    #[test]
    fn test_usable_ions_respects_precursor_distance() {
        let records = vec![
            FragmentRecord::new("K", "n", 300.0, 5.0, 100.0, 1.0, 20.0, 40.0, "P", "[M+H]+"),
            FragmentRecord::new("K", "n", 300.0, 5.0, 290.0, 1.0, 20.0, 40.0, "P", "[M+H]+"),
            FragmentRecord::new("K", "n", 300.0, 5.0, 286.0, 1.0, 20.0, 40.0, "P", "[M+H]+"),
            FragmentRecord::new("K", "n", 300.0, 5.0, f64::NAN, 1.0, 20.0, 40.0, "P", "[M+H]+"),
        ];
        let ions = usable_ions(&records, 300.0, 14.0126);
        assert_eq!(ions.len(), 1);
        assert_eq!(ions[0].mz, 100.0);
    }

    #[test]
    fn test_rank_tier_dedups_and_truncates() {
        let ions = vec![
            ion("a", 100.0, 10.0, 10.0),
            ion("a", 100.0, 50.0, 12.0),
            ion("a", 120.0, 30.0, 10.0),
            ion("b", 100.0, 20.0, 10.0),
            ion("a", 140.0, f64::NAN, 10.0),
        ];
        let ranked = rank_tier(ions, 3);
        let got: Vec<(f64, f64)> = ranked.iter().map(|i| (i.mz, i.intensity)).collect();
        assert_eq!(got, vec![(100.0, 50.0), (120.0, 30.0), (100.0, 20.0)]);
    }

    #[test]
    fn test_rank_tiers_orders_low_to_high() {
        let ions = vec![
            ion("a", 300.0, 1.0, 50.0),
            ion("a", 100.0, 1.0, 10.0),
            ion("a", 200.0, 1.0, 30.0),
        ];
        let ranked = rank_tiers(ions, TierBounds::CE, |i| i.collision_energy, 10);
        let mz: Vec<f64> = ranked.iter().map(|i| i.mz).collect();
        assert_eq!(mz, vec![100.0, 200.0, 300.0]);
    }

    #[test]
    fn test_pair_combinations_enforces_separation() {
        let ions = vec![
            ion("a", 100.0, 1.0, 10.0),
            ion("a", 101.5, 1.0, 10.0),
            ion("a", 102.0, 1.0, 10.0),
            ion("a", 100.0, 2.0, 30.0),
        ];
        let pairs = pair_combinations(&ions, 2.0);
        let masses: Vec<(f64, f64)> = pairs.iter().map(|p| (p.quantifier.mz, p.qualifier.mz)).collect();
        assert_eq!(masses, vec![(100.0, 102.0), (102.0, 100.0)]);
        assert!(pairs.iter().all(|p| p.mass_difference() >= 2.0));
    }

    #[test]
    fn test_pair_combinations_single_ion() {
        assert!(pair_combinations(&[ion("a", 100.0, 1.0, 10.0)], 2.0).is_empty());
    }

    #[test]
    fn test_max_finite_ignores_nan() {
        assert_eq!(max_finite(vec![1.0, f64::NAN, 3.0, 2.0]), Some(3.0));
        assert_eq!(max_finite(vec![f64::NAN]), None);
        assert_eq!(max_finite(Vec::new()), None);
    }

    #[test]
    fn test_rank_by_score_is_stable() {
        let mut a = IonPairCandidate::new(ion("a", 100.0, 1.0, 10.0), ion("a", 200.0, 1.0, 10.0));
        let mut b = IonPairCandidate::new(ion("a", 110.0, 1.0, 10.0), ion("a", 200.0, 1.0, 10.0));
        let mut c = IonPairCandidate::new(ion("a", 120.0, 1.0, 10.0), ion("a", 200.0, 1.0, 10.0));
        a.scores.score = 0.5;
        b.scores.score = 0.9;
        c.scores.score = 0.9;
        let selection = rank_by_score(vec![a, b, c], 2).unwrap();
        assert_eq!(selection.best.quantifier.mz, 110.0);
        let ranked: Vec<f64> = selection.ranked.iter().map(|p| p.quantifier.mz).collect();
        assert_eq!(ranked, vec![110.0, 120.0]);
        assert!(rank_by_score(Vec::new(), 5).is_none());
    }
}
