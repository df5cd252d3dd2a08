use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::algorithm::interference::{OverlapScorer, SpectrumInterference};
use crate::algorithm::method::{max_finite, pair_combinations, rank_by_score, rank_tiers, PairSettings, Selection, TransitionMethod};
use crate::data::tier::{Coverage, EnergyTier, TierBounds};
use crate::data::transition::{FragmentIon, IonPairCandidate};

/// Ranked pairs reported per compound.
pub const TOP_N: usize = 5;

/// Transition selection by spectral overlap.
///
/// Each ion's interference is the intensity that co-eluting aligned spectra
/// of the same CE tier carry within the MS/MS tolerance of the ion mass.
/// The scorer's peak cache lives as long as the method, i.e. one run.
#[derive(Debug)]
pub struct OverlapMethod {
    settings: PairSettings,
    scorer: OverlapScorer,
}

impl Default for OverlapMethod {
    fn default() -> Self {
        OverlapMethod::new(PairSettings::default())
    }
}

impl OverlapMethod {
    pub fn new(settings: PairSettings) -> Self {
        let scorer = OverlapScorer::new(settings.msms_tolerance);
        OverlapMethod { settings, scorer }
    }

    pub fn scorer(&self) -> &OverlapScorer {
        &self.scorer
    }

    // Ions without a usable CE are matched against the high tier.
    fn ion_tier(&self, ion: &FragmentIon) -> EnergyTier {
        TierBounds::CE.classify(ion.collision_energy).unwrap_or(EnergyTier::High)
    }
}

impl TransitionMethod for OverlapMethod {
    type Interference = SpectrumInterference;

    fn name(&self) -> &'static str {
        "overlap"
    }

    fn tier_bounds(&self) -> TierBounds {
        TierBounds::CE
    }

    fn settings(&self) -> &PairSettings {
        &self.settings
    }

    fn rank_and_filter(&self, ions: Vec<FragmentIon>) -> Vec<FragmentIon> {
        rank_tiers(ions, TierBounds::CE, |ion| ion.collision_energy, self.settings.max_ions_per_tier)
    }

    fn generate_pairs(&self, ions: &[FragmentIon]) -> Vec<IonPairCandidate> {
        if ions.len() < 2 {
            return Vec::new();
        }
        pair_combinations(ions, self.settings.ion_pair_min_diff)
    }

    fn score(&mut self, candidates: &mut [IonPairCandidate], interference: &SpectrumInterference) {
        for candidate in candidates.iter_mut() {
            let first_tier = self.ion_tier(&candidate.quantifier);
            let second_tier = self.ion_tier(&candidate.qualifier);
            let first = self.scorer.interference(interference.tiers.get(first_tier), candidate.quantifier.mz);
            let second = self.scorer.interference(interference.tiers.get(second_tier), candidate.qualifier.mz);

            let scores = &mut candidate.scores;
            scores.interference_1 = first;
            scores.interference_2 = second;
            scores.interference_sum = first + second;
        }

        let max_intensity = max_finite(candidates.iter().map(|c| c.scores.intensity_sum)).unwrap_or(0.0);
        let max_interference = max_finite(candidates.iter().map(|c| c.scores.interference_sum)).unwrap_or(0.0);
        let normalized = max_intensity > 0.0 && max_interference > 0.0;

        for candidate in candidates.iter_mut() {
            let scores = &mut candidate.scores;
            if normalized {
                scores.sensitivity = scores.intensity_sum / max_intensity;
                scores.specificity = -(1.0 + scores.interference_sum) / (1.0 + max_interference);
                scores.score = self.settings.weighted(scores.sensitivity, scores.specificity);
            } else {
                scores.sensitivity = scores.intensity_sum;
                scores.specificity = -scores.interference_sum;
                scores.score = scores.intensity_sum;
            }
        }
    }

    fn select(&self, candidates: Vec<IonPairCandidate>) -> Option<Selection> {
        let mut best_per_pair = BTreeMap::new();
        for candidate in candidates {
            match best_per_pair.entry(candidate.mass_key()) {
                Entry::Vacant(slot) => {
                    slot.insert(candidate);
                }
                Entry::Occupied(mut slot) => {
                    if candidate.scores.score > slot.get().scores.score {
                        slot.insert(candidate);
                    }
                }
            }
        }
        rank_by_score(best_per_pair.into_values().collect(), TOP_N)
    }

    fn coverage(&self, interference: &SpectrumInterference) -> Coverage {
        interference.coverage
    }

    fn reclaim(&mut self) {
        let cache = self.scorer.cache_mut();
        log::debug!("peak cache: {} values, {} hits, {} misses", cache.len(), cache.hits(), cache.misses());
        cache.shrink();
    }
}
