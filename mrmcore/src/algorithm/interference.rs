//! Interference estimation for candidate fragment ions.
//!
//! Two estimators are provided, one per transition method:
//!
//! * [`OverlapScorer`] sums the intensity that co-eluting aligned spectra
//!   place near a fragment mass. Parsed results are memoized in a
//!   [`PeakIntensityCache`] owned by the scorer for the lifetime of one run.
//! * [`CoverageScorer`] counts distinct co-eluting compounds that carry a
//!   fragment near the target mass in the same collision-energy tier.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::data::record::{parse_peaks, FragmentRecord, SpectrumRecord};
use crate::data::tier::{Coverage, EnergyTier, TierBounds, Tiered};
use crate::data::transition::FragmentIon;

/// Summed intensity of all peaks of `spectrum` within `tolerance` of `target`.
///
/// Arguments:
///
/// * `spectrum` - encoded `mz:intensity` peak list
/// * `target` - fragment mass
/// * `tolerance` - absolute mass tolerance, inclusive
///
/// Returns:
///
/// * `f64` - intensity sum, 0 when no peak is close enough
///
/// # Examples
///
/// ```
/// use mrmcore::algorithm::interference::intensity_near;
///
/// assert_eq!(intensity_near("99.5:10 100.2:5 101:40", 100.0, 0.5), 15.0);
/// assert_eq!(intensity_near("", 100.0, 0.5), 0.0);
/// ```
pub fn intensity_near(spectrum: &str, target: f64, tolerance: f64) -> f64 {
    parse_peaks(spectrum)
        .filter(|(mz, _)| (mz - target).abs() <= tolerance)
        .map(|(_, intensity)| intensity)
        .sum()
}

/// Memo of `intensity_near` results keyed by (encoded peak list, target mass).
///
/// Append-only while a run is in progress; `shrink` only releases spare
/// capacity.
#[derive(Debug, Default)]
pub struct PeakIntensityCache {
    entries: HashMap<String, HashMap<u64, f64>>,
    hits: u64,
    misses: u64,
}

impl PeakIntensityCache {
    pub fn new() -> Self {
        PeakIntensityCache::default()
    }

    pub fn get_or_compute<F>(&mut self, spectrum: &str, target: f64, compute: F) -> f64
    where
        F: FnOnce() -> f64,
    {
        let target_bits = target.to_bits();
        if let Some(value) = self.entries.get(spectrum).and_then(|m| m.get(&target_bits)) {
            self.hits += 1;
            return *value;
        }
        self.misses += 1;
        let value = compute();
        self.entries
            .entry(spectrum.to_string())
            .or_default()
            .insert(target_bits, value);
        value
    }

    /// Number of cached (peak list, target) values.
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn shrink(&mut self) {
        self.entries.shrink_to_fit();
    }
}

/// Interference source of the overlap method: co-eluting aligned spectra
/// split by raw collision energy, with per-tier alignment coverage.
#[derive(Clone, Debug, Default)]
pub struct SpectrumInterference {
    pub tiers: Tiered<SpectrumRecord>,
    pub coverage: Coverage,
}

impl SpectrumInterference {
    pub fn new(records: Vec<SpectrumRecord>) -> Self {
        let tiers = Tiered::split(records, TierBounds::CE, |r| r.collision_energy);
        let [low, medium, high] = tiers.distinct_counts(|r| r.alignment_id.as_str());
        let coverage = Coverage { low, medium, high, all: low + medium + high };
        SpectrumInterference { tiers, coverage }
    }
}

/// Direct spectrum-peak matching against co-eluting aligned spectra.
#[derive(Debug)]
pub struct OverlapScorer {
    tolerance: f64,
    cache: PeakIntensityCache,
}

impl OverlapScorer {
    pub fn new(tolerance: f64) -> Self {
        OverlapScorer { tolerance, cache: PeakIntensityCache::new() }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn cache(&self) -> &PeakIntensityCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut PeakIntensityCache {
        &mut self.cache
    }

    /// Intensity one peak list contributes near `target`.
    pub fn peak_intensity(&mut self, spectrum: &str, target: f64) -> f64 {
        if spectrum.trim().is_empty() {
            return 0.0;
        }
        let tolerance = self.tolerance;
        self.cache
            .get_or_compute(spectrum, target, || intensity_near(spectrum, target, tolerance))
    }

    /// Total interference of `spectra` at `target`.
    pub fn interference(&mut self, spectra: &[SpectrumRecord], target: f64) -> f64 {
        spectra
            .iter()
            .map(|record| self.peak_intensity(&record.spectrum, target))
            .sum()
    }
}

/// Interference source of the coverage method: fragment observations of
/// other co-eluting compounds split by normalized collision energy.
#[derive(Clone, Debug, Default)]
pub struct FragmentInterference {
    pub tiers: Tiered<FragmentRecord>,
    pub coverage: Coverage,
}

impl FragmentInterference {
    pub fn new(records: Vec<FragmentRecord>) -> Self {
        let all = records
            .iter()
            .map(|r| r.key.as_str())
            .collect::<HashSet<&str>>()
            .len();
        let tiers = Tiered::split(records, TierBounds::NCE, |r| r.normalized_collision_energy);
        let [low, medium, high] = tiers.distinct_counts(|r| r.key.as_str());
        FragmentInterference { tiers, coverage: Coverage { low, medium, high, all } }
    }
}

/// Distinct interfering compounds and their share of the coverage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InterferenceHits {
    pub count: usize,
    pub rate: f64,
}

impl InterferenceHits {
    fn new(count: usize, coverage: usize) -> Self {
        let rate = if coverage == 0 { 0.0 } else { count as f64 / coverage as f64 };
        InterferenceHits { count, rate }
    }
}

/// Cross-compound fragment-proximity hit counting.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoverageScorer {
    pub tolerance: f64,
    pub bounds: TierBounds,
}

impl Default for CoverageScorer {
    fn default() -> Self {
        CoverageScorer { tolerance: 1.0, bounds: TierBounds::NCE }
    }
}

impl CoverageScorer {
    pub fn new(tolerance: f64) -> Self {
        CoverageScorer { tolerance, bounds: TierBounds::NCE }
    }

    /// Keys of interfering compounds with a fragment within tolerance of
    /// `ion` in the ion's own energy tier.
    pub fn hit_keys<'a>(&self, interference: &'a FragmentInterference, ion: &FragmentIon) -> HashSet<&'a str> {
        match self.bounds.classify(ion.normalized_collision_energy) {
            Some(tier) => self.tier_hits(interference, tier, ion.mz),
            None => HashSet::new(),
        }
    }

    fn tier_hits<'a>(&self, interference: &'a FragmentInterference, tier: EnergyTier, mz: f64) -> HashSet<&'a str> {
        interference
            .tiers
            .get(tier)
            .iter()
            .filter(|r| (mz - r.fragment_mz).abs() <= self.tolerance)
            .map(|r| r.key.as_str())
            .collect()
    }

    /// Hits of a single ion, relative to the coverage of its tier.
    pub fn single_ion(&self, interference: &FragmentInterference, ion: &FragmentIon) -> InterferenceHits {
        let coverage = self
            .bounds
            .classify(ion.normalized_collision_energy)
            .map_or(0, |tier| interference.coverage.tier(tier));
        InterferenceHits::new(self.hit_keys(interference, ion).len(), coverage)
    }

    /// Hits of an ion pair: the union of both ions' interfering compounds,
    /// relative to the overall coverage.
    pub fn pair(&self, interference: &FragmentInterference, first: &FragmentIon, second: &FragmentIon) -> InterferenceHits {
        let mut keys = self.hit_keys(interference, first);
        keys.extend(self.hit_keys(interference, second));
        InterferenceHits::new(keys.len(), interference.coverage.all)
    }
}
