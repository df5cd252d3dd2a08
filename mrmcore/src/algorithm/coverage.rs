use std::collections::HashSet;

use crate::algorithm::interference::{CoverageScorer, FragmentInterference};
use crate::algorithm::method::{
    max_finite, pair_combinations, rank_by_score, rank_tiers, sort_by_intensity, PairSettings, Selection,
    TransitionMethod,
};
use crate::data::tier::{Coverage, TierBounds};
use crate::data::transition::{FragmentIon, IonPairCandidate};

/// Ranked pairs reported per compound.
pub const TOP_N: usize = 10;
/// Ions kept per normalized collision-energy tier.
pub const IONS_PER_TIER: usize = 10;
/// Ions closer than this to an already accepted, more intense ion are dropped.
pub const NEAR_DUPLICATE_TOLERANCE: f64 = 0.001;

/// Drops every ion within `tolerance` of an earlier ion; expects `ions`
/// sorted by intensity, highest first.
pub fn suppress_near_duplicates(ions: &[FragmentIon], tolerance: f64) -> Vec<FragmentIon> {
    let mut accepted: Vec<FragmentIon> = Vec::with_capacity(ions.len());
    for ion in ions {
        if accepted.iter().all(|a| (a.mz - ion.mz).abs() >= tolerance) {
            accepted.push(ion.clone());
        }
    }
    accepted
}

/// Transition selection by interfering-compound coverage.
///
/// Ions are ranked per NCE tier and a pair's specificity falls with the
/// number of distinct co-eluting compounds that fragment near either ion.
#[derive(Clone, Debug, Default)]
pub struct CoverageMethod {
    settings: PairSettings,
    scorer: CoverageScorer,
}

impl CoverageMethod {
    pub fn new(settings: PairSettings) -> Self {
        CoverageMethod { settings, scorer: CoverageScorer::default() }
    }

    pub fn with_scorer(settings: PairSettings, scorer: CoverageScorer) -> Self {
        CoverageMethod { settings, scorer }
    }

    pub fn scorer(&self) -> &CoverageScorer {
        &self.scorer
    }
}

impl TransitionMethod for CoverageMethod {
    type Interference = FragmentInterference;

    fn name(&self) -> &'static str {
        "coverage"
    }

    fn tier_bounds(&self) -> TierBounds {
        self.scorer.bounds
    }

    fn settings(&self) -> &PairSettings {
        &self.settings
    }

    fn rank_and_filter(&self, ions: Vec<FragmentIon>) -> Vec<FragmentIon> {
        rank_tiers(ions, self.scorer.bounds, |ion| ion.normalized_collision_energy, IONS_PER_TIER)
    }

    fn generate_pairs(&self, ions: &[FragmentIon]) -> Vec<IonPairCandidate> {
        let mut sorted = ions.to_vec();
        sort_by_intensity(&mut sorted);
        let unique = suppress_near_duplicates(&sorted, NEAR_DUPLICATE_TOLERANCE);
        if unique.len() < 2 {
            return Vec::new();
        }
        pair_combinations(&unique, self.settings.ion_pair_min_diff)
    }

    fn score(&mut self, candidates: &mut [IonPairCandidate], interference: &FragmentInterference) {
        for candidate in candidates.iter_mut() {
            let first = self.scorer.single_ion(interference, &candidate.quantifier);
            let second = self.scorer.single_ion(interference, &candidate.qualifier);
            let pair = self.scorer.pair(interference, &candidate.quantifier, &candidate.qualifier);

            let scores = &mut candidate.scores;
            scores.interference_1 = first.count as f64;
            scores.interference_2 = second.count as f64;
            scores.interference_sum = pair.count as f64;
            scores.hit_count = pair.count;
            scores.hit_rate = pair.rate;
        }

        let max_intensity = max_finite(candidates.iter().map(|c| c.scores.intensity_sum)).unwrap_or(0.0);
        let max_hits = candidates.iter().map(|c| c.scores.hit_count).max().unwrap_or(0);

        for candidate in candidates.iter_mut() {
            let scores = &mut candidate.scores;
            scores.sensitivity = if max_intensity > 0.0 { scores.intensity_sum / max_intensity } else { 0.0 };
            scores.specificity = if max_hits > 0 {
                1.0 - scores.hit_count as f64 / max_hits as f64
            } else {
                1.0
            };
            scores.score = self.settings.weighted(scores.sensitivity, scores.specificity);
        }
    }

    /// Keeps the first candidate of every mass pair regardless of score,
    /// then ranks.
    fn select(&self, candidates: Vec<IonPairCandidate>) -> Option<Selection> {
        let mut seen = HashSet::new();
        let unique: Vec<IonPairCandidate> = candidates
            .into_iter()
            .filter(|c| seen.insert(c.mass_key()))
            .collect();
        rank_by_score(unique, TOP_N)
    }

    fn coverage(&self, interference: &FragmentInterference) -> Coverage {
        interference.coverage
    }
}
