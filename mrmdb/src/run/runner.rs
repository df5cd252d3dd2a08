//! The optimization run loop.
//!
//! One loop serves both methods: it is generic over a [`TransitionMethod`]
//! that also knows how to fetch its interference records
//! ([`InterferenceSource`]). Compounds are processed one at a time; a
//! failure inside one compound yields an error row and the run continues.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use log::{debug, error, info, warn};
use mrmcore::algorithm::coverage::CoverageMethod;
use mrmcore::algorithm::interference::{FragmentInterference, SpectrumInterference};
use mrmcore::algorithm::method::{usable_ions, TransitionMethod};
use mrmcore::algorithm::overlap::OverlapMethod;
use mrmcore::data::record::{fragment_columns, FragmentRecord, SpectrumRecord};
use mrmcore::data::result::{CompoundStatus, OptimizationResult};
use mrmcore::data::tier::Coverage;
use mrmcore::data::transition::CompoundInfo;
use serde::{Deserialize, Serialize};

use crate::data::index::KeyIndex;
use crate::data::key::KeyMatcher;
use crate::data::output::{checkpoint_path, write_results};
use crate::data::store::{RangeColumns, RangeQuery, RecordStore};
use crate::data::targets::read_target_keys;
use crate::error::Result;
use crate::run::monitor::ResourceMonitor;
use crate::settings::{Method, Settings};

/// A method that can fetch the interference it scores against.
pub trait InterferenceSource: TransitionMethod {
    fn fetch_interference(&self, store: &RecordStore, compound: &CompoundInfo, settings: &Settings) -> Self::Interference;
}

fn window(columns: RangeColumns, compound: &CompoundInfo, settings: &Settings) -> RangeQuery {
    RangeQuery {
        columns,
        mass: compound.precursor_mz,
        mass_tolerance: settings.mz_tolerance,
        time: compound.retention_time,
        time_tolerance: settings.rt_tolerance,
    }
}

impl InterferenceSource for CoverageMethod {
    /// Co-eluting fragment rows of other compounds in the same ionization
    /// mode.
    fn fetch_interference(&self, store: &RecordStore, compound: &CompoundInfo, settings: &Settings) -> FragmentInterference {
        let read = store.read_by_range::<FragmentRecord>(&window(RangeColumns::Precursor, compound, settings));
        let own_key = KeyMatcher::new(&compound.key);
        let ion_mode = compound.ion_mode.trim();
        let records: Vec<FragmentRecord> = read
            .records
            .into_iter()
            .filter(|r| ion_mode.is_empty() || r.ion_mode.trim() == ion_mode)
            .filter(|r| !own_key.matches(&r.key))
            .collect();
        debug!(
            "{} interference rows from {} partition(s) in {} batch(es)",
            records.len(),
            read.stats.partitions_read,
            read.stats.batches
        );
        FragmentInterference::new(records)
    }
}

impl InterferenceSource for OverlapMethod {
    fn fetch_interference(&self, store: &RecordStore, compound: &CompoundInfo, settings: &Settings) -> SpectrumInterference {
        let read = store.read_by_range::<SpectrumRecord>(&window(RangeColumns::Average, compound, settings));
        SpectrumInterference::new(read.records)
    }
}

/// Counters of a finished run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub optimized: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed_secs: f64,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct OptimizationRunner<M> {
    method: M,
    settings: Settings,
    library: KeyIndex,
    interference: RecordStore,
    monitor: ResourceMonitor,
}

impl<M: InterferenceSource> OptimizationRunner<M> {
    pub fn new(method: M, settings: Settings, library: KeyIndex, interference: RecordStore) -> Self {
        let mut monitor = ResourceMonitor::new();
        monitor.log_snapshot("initialization complete");
        OptimizationRunner { method, settings, library, interference, monitor }
    }

    pub fn method(&self) -> &M {
        &self.method
    }

    pub fn monitor(&self) -> &ResourceMonitor {
        &self.monitor
    }

    /// Runs the whole per-compound pipeline for `key`.
    pub fn process_compound(&mut self, key: &str) -> OptimizationResult {
        let key = key.trim();
        info!("processing {}", key);

        let rows: Vec<FragmentRecord> = self.library.lookup(key);
        if rows.is_empty() {
            warn!("  no library rows, skipping");
            return OptimizationResult::unresolved(key, CompoundStatus::NotFound);
        }

        let adduct = self.settings.precursor_type.as_str();
        let typed: Vec<FragmentRecord> = rows.iter().filter(|r| r.precursor_type.trim() == adduct).cloned().collect();
        let Some(first) = typed.first() else {
            warn!("  no {} rows, skipping", adduct);
            let compound = CompoundInfo::from_record(key, &rows[0], self.settings.rt_offset);
            return OptimizationResult::skipped(compound, CompoundStatus::NoPrecursorType, Coverage::default());
        };

        let compound = CompoundInfo::from_record(key, first, self.settings.rt_offset);
        info!("  compound: {}", compound.name);
        info!("  precursor m/z: {}", compound.precursor_mz);
        info!("  RT: {}", compound.retention_time);

        let min_diff = self.method.settings().precursor_min_diff;
        let ions = usable_ions(&typed, compound.precursor_mz, min_diff);
        if ions.len() < 2 {
            warn!("  insufficient usable ions, skipping");
            return OptimizationResult::skipped(compound, CompoundStatus::NoCombination, Coverage::default());
        }

        let ranked = self.method.rank_and_filter(ions);
        if ranked.len() < 2 {
            warn!("  insufficient ions after ranking, skipping");
            return OptimizationResult::skipped(compound, CompoundStatus::NoCombination, Coverage::default());
        }

        let candidates = self.method.generate_pairs(&ranked);
        if candidates.is_empty() {
            warn!("  no valid ion pair combinations");
            return OptimizationResult::skipped(compound, CompoundStatus::NoCombination, Coverage::default());
        }
        info!("  {} candidate ion pairs", candidates.len());

        let interference = self.method.fetch_interference(&self.interference, &compound, &self.settings);
        let coverage = self.method.coverage(&interference);
        info!(
            "  interference coverage - low: {}, medium: {}, high: {}, total: {}",
            coverage.low, coverage.medium, coverage.high, coverage.all
        );

        let Some(selection) = self.method.score_and_select(candidates, &interference) else {
            return OptimizationResult::skipped(compound, CompoundStatus::NoCombination, coverage);
        };
        let result = OptimizationResult::optimized(compound, coverage, &selection, &self.settings.calibration);
        if let Some(best) = &result.best {
            info!(
                "  best ion pair: {:.1} (CE: {:.1}) / {:.1} (CE: {:.1})",
                best.mz_1, best.ce_instrument_1, best.mz_2, best.ce_instrument_2
            );
            info!(
                "  score: {:.4} (sensitivity {:.4}, specificity {:.4})",
                best.score, best.sensitivity, best.specificity
            );
        }
        result
    }

    /// `process_compound` with panics turned into an error row.
    fn process_guarded(&mut self, key: &str) -> OptimizationResult {
        match panic::catch_unwind(AssertUnwindSafe(|| self.process_compound(key))) {
            Ok(result) => result,
            Err(payload) => {
                error!("error processing compound {}: {}", key, panic_message(payload.as_ref()));
                OptimizationResult::unresolved(key, CompoundStatus::Failed)
            }
        }
    }

    /// Processes `keys` in order, checkpointing and reclaiming memory at
    /// the configured intervals, and writes the final table.
    pub fn run_batch(&mut self, keys: &[String]) -> Result<RunSummary> {
        info!("starting {} optimization of {} compound(s)", self.method.name(), keys.len());
        let started = Instant::now();
        let mut summary = RunSummary { total: keys.len(), ..RunSummary::default() };
        let mut results = Vec::with_capacity(keys.len());

        for (i, key) in keys.iter().enumerate() {
            let result = self.process_guarded(key);
            match result.status {
                CompoundStatus::Optimized => summary.optimized += 1,
                CompoundStatus::Failed => summary.failed += 1,
                _ => summary.skipped += 1,
            }
            results.push(result);
            let done = i + 1;

            if done % self.settings.checkpoint_interval == 0 {
                let per_compound = started.elapsed().as_secs_f64() / done as f64;
                let remaining = (keys.len() - done) as f64 * per_compound;
                info!("progress: {}/{} compounds", done, keys.len());
                info!("  optimized: {}, skipped/failed: {}", summary.optimized, summary.skipped + summary.failed);
                info!("  {:.2} s per compound, about {:.2} h remaining", per_compound, remaining / 3600.0);

                let path = checkpoint_path(&self.settings.output, self.settings.method, done);
                if let Err(e) = write_results(&path, &results) {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!("could not write checkpoint {}: {}", path.display(), e);
                }
                self.monitor.log_snapshot("after checkpoint");
            }

            if done % self.settings.reclaim_interval == 0 {
                self.method.reclaim();
                self.monitor.log_snapshot("after memory reclamation");
            }
        }

        summary.elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            "finished in {:.2} h: {} optimized, {} skipped, {} failed of {}",
            summary.elapsed_secs / 3600.0,
            summary.optimized,
            summary.skipped,
            summary.failed,
            summary.total
        );

        write_results(&self.settings.output, &results)?;
        self.monitor.log_snapshot("processing complete");
        self.monitor.log_summary();
        Ok(summary)
    }

    /// Single-compound mode: an unknown key produces one `not found` row.
    pub fn run_single(&mut self, key: &str) -> Result<RunSummary> {
        let key = key.trim();
        if !self.library.contains(key) {
            warn!("key '{}' not found in the library", key);
            let results = vec![OptimizationResult::unresolved(key, CompoundStatus::NotFound)];
            write_results(&self.settings.output, &results)?;
            return Ok(RunSummary { total: 1, skipped: 1, ..RunSummary::default() });
        }
        self.run_batch(&[key.to_string()])
    }
}

fn execute<M: InterferenceSource>(method: M, settings: Settings, library: KeyIndex, interference: RecordStore) -> Result<RunSummary> {
    let single = settings.single_compound.clone();
    let targets = settings.targets.clone();
    let limit = settings.max_compounds;
    let mut runner = OptimizationRunner::new(method, settings, library, interference);
    match single {
        Some(key) => runner.run_single(&key),
        None => {
            let keys = read_target_keys(&targets, fragment_columns::KEY, limit)?;
            runner.run_batch(&keys)
        }
    }
}

/// Opens the collections named by `settings` and runs the configured method.
pub fn run(settings: Settings) -> Result<RunSummary> {
    settings.validate()?;

    let library_store = RecordStore::open(&settings.library, settings.store.clone())?;
    let library = KeyIndex::build_or_load(library_store, fragment_columns::KEY, &settings.cache_dir)?;
    let interference_path = settings.interference_path();
    info!("using interference collection {}", interference_path.display());
    let interference = RecordStore::open(&interference_path, settings.store.clone())?;

    match settings.method {
        Method::Coverage => {
            let method = CoverageMethod::new(settings.pairs.clone());
            execute(method, settings, library, interference)
        }
        Method::Overlap => {
            let method = OverlapMethod::new(settings.pairs.clone());
            execute(method, settings, library, interference)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    use mrmcore::algorithm::method::{PairSettings, Selection};
    use mrmcore::data::tier::TierBounds;
    use mrmcore::data::transition::{FragmentIon, IonPairCandidate};

    use crate::data::output::read_results;
    use crate::settings::StoreOptions;

    /// Coverage scoring that panics while fetching the interference of one
    /// compound.
    struct Crashing {
        inner: CoverageMethod,
        key: &'static str,
    }

    impl TransitionMethod for Crashing {
        type Interference = FragmentInterference;

        fn name(&self) -> &'static str {
            self.inner.name()
        }

        fn tier_bounds(&self) -> TierBounds {
            self.inner.tier_bounds()
        }

        fn settings(&self) -> &PairSettings {
            self.inner.settings()
        }

        fn rank_and_filter(&self, ions: Vec<FragmentIon>) -> Vec<FragmentIon> {
            self.inner.rank_and_filter(ions)
        }

        fn generate_pairs(&self, ions: &[FragmentIon]) -> Vec<IonPairCandidate> {
            self.inner.generate_pairs(ions)
        }

        fn score(&mut self, candidates: &mut [IonPairCandidate], interference: &FragmentInterference) {
            self.inner.score(candidates, interference)
        }

        fn select(&self, candidates: Vec<IonPairCandidate>) -> Option<Selection> {
            self.inner.select(candidates)
        }

        fn coverage(&self, interference: &FragmentInterference) -> Coverage {
            self.inner.coverage(interference)
        }
    }

    impl InterferenceSource for Crashing {
        fn fetch_interference(&self, store: &RecordStore, compound: &CompoundInfo, settings: &Settings) -> FragmentInterference {
            if compound.key == self.key {
                panic!("corrupt interference window for {}", compound.key);
            }
            self.inner.fetch_interference(store, compound, settings)
        }
    }

    const HEADER: &str = "InChIKey,Name,PrecursorMZ,RT,MSMS,intensity,CE,NCE,Ion_mode,Precursor_type";

    fn fixture(dir: &Path) -> Settings {
        let library = dir.join("library");
        fs::create_dir_all(&library).unwrap();
        fs::write(
            library.join("part1.csv"),
            format!(
                "{HEADER}\n\
                 TGT-A,Target A,300,5,100,500,20,40,P,[M+H]+\n\
                 TGT-A,Target A,300,5,150,300,20,40,P,[M+H]+\n\
                 TGT-A,Target A,300,5,295,900,20,40,P,[M+H]+\n\
                 TGT-C,Target C,300,5,100,500,20,40,P,[M+H]+\n\
                 TGT-C,Target C,300,5,150,300,20,40,P,[M+H]+\n\
                 ONE-ION,Lonely,250,3,100,10,20,40,P,[M+H]+\n\
                 SODIUM,Salted,250,3,100,10,20,40,P,[M+Na]+\n"
            ),
        )
        .unwrap();

        let interference = dir.join("interference");
        fs::create_dir_all(&interference).unwrap();
        fs::write(
            interference.join("intf.csv"),
            format!(
                "{HEADER}\n\
                 OTHER,Other,300.2,5.5,100.4,50,20,40,P,[M+H]+\n\
                 NEG,Negative,300.2,5.5,150.1,50,20,40,N,[M+H]+\n\
                 TGT-A,Target A,300,5,150,300,20,40,P,[M+H]+\n"
            ),
        )
        .unwrap();

        Settings {
            library,
            interference: Some(interference),
            output: dir.join("results.csv"),
            cache_dir: dir.join("cache"),
            store: StoreOptions { chunk_size: 2, batch_size: 1, extension: "csv".to_string() },
            ..Settings::default()
        }
    }

    fn runner_with<M: InterferenceSource>(settings: &Settings, method: M) -> OptimizationRunner<M> {
        let store = RecordStore::open(&settings.library, settings.store.clone()).unwrap();
        let library = KeyIndex::build_or_load(store, fragment_columns::KEY, &settings.cache_dir).unwrap();
        let interference = RecordStore::open(&settings.interference_path(), settings.store.clone()).unwrap();
        OptimizationRunner::new(method, settings.clone(), library, interference)
    }

    fn runner(settings: &Settings) -> OptimizationRunner<CoverageMethod> {
        runner_with(settings, CoverageMethod::new(settings.pairs.clone()))
    }

    #[test]
    fn test_process_compound_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fixture(dir.path());
        let mut runner = runner(&settings);

        assert_eq!(runner.process_compound("MISSING").status, CompoundStatus::NotFound);
        let lonely = runner.process_compound("ONE-ION");
        assert_eq!(lonely.status, CompoundStatus::NoCombination);
        assert_eq!(lonely.compound.name, "Lonely");
        assert!(lonely.best.is_none());

        let salted = runner.process_compound("SODIUM");
        assert_eq!(salted.status, CompoundStatus::NoPrecursorType);
        assert_eq!(salted.compound.name, "Salted");
    }

    #[test]
    fn test_process_compound_scores_against_other_compounds() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fixture(dir.path());
        let mut runner = runner(&settings);

        let result = runner.process_compound("tgt-a");
        assert_eq!(result.status, CompoundStatus::Optimized);
        assert_eq!(result.compound.key, "tgt-a");
        assert_eq!(result.compound.name, "Target A");
        // the negative-mode row and the target's own row are excluded
        assert_eq!(result.coverage.all, 1);

        let best = result.best.unwrap();
        assert_eq!((best.mz_1, best.mz_2), (100.0, 150.0));
        assert_eq!(best.hit_count, 1);
        assert!((best.sensitivity - 1.0).abs() < 1e-12);
        assert!((best.specificity - 0.0).abs() < 1e-12);
        assert!((best.ce_instrument_1 - (0.5788 * 20.0 + 9.4452)).abs() < 1e-9);
    }

    #[test]
    fn test_run_single_unknown_key_writes_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fixture(dir.path());
        let mut runner = runner(&settings);
        let summary = runner.run_single("NOPE").unwrap();
        assert_eq!(summary.total, 1);
        let rows = read_results(&settings.output).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "not found");
    }

    #[test]
    fn test_run_batch_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = fixture(dir.path());
        settings.checkpoint_interval = 2;
        settings.reclaim_interval = 1;
        let mut runner = runner(&settings);
        let keys: Vec<String> = ["TGT-A", "MISSING", "ONE-ION"].iter().map(|k| k.to_string()).collect();
        let summary = runner.run_batch(&keys).unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.optimized, 1);
        assert_eq!(summary.skipped, 2);

        let checkpoint = checkpoint_path(&settings.output, Method::Coverage, 2);
        assert_eq!(read_results(&checkpoint).unwrap().len(), 2);
        assert_eq!(read_results(&settings.output).unwrap().len(), 3);
    }

    #[test]
    fn test_panic_in_one_compound_yields_error_row() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fixture(dir.path());
        let method = Crashing { inner: CoverageMethod::new(settings.pairs.clone()), key: "TGT-A" };
        let mut runner = runner_with(&settings, method);

        let keys: Vec<String> = ["TGT-A", "TGT-C"].iter().map(|k| k.to_string()).collect();
        let summary = runner.run_batch(&keys).unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.optimized, 1);

        let rows = read_results(&settings.output).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "TGT-A");
        assert_eq!(rows[0].status, "error");
        assert_eq!(rows[1].key, "TGT-C");
        assert_eq!(rows[1].status, "optimized");
        assert_eq!((rows[1].mz_1, rows[1].mz_2), (100.0, 150.0));
    }

    #[test]
    fn test_unwritable_checkpoint_does_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = fixture(dir.path());
        settings.checkpoint_interval = 1;
        // a directory where the first checkpoint file should go
        fs::create_dir_all(checkpoint_path(&settings.output, Method::Coverage, 1)).unwrap();
        let mut runner = runner(&settings);

        let keys: Vec<String> = ["TGT-A", "ONE-ION"].iter().map(|k| k.to_string()).collect();
        let summary = runner.run_batch(&keys).unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.optimized, 1);

        assert_eq!(read_results(&checkpoint_path(&settings.output, Method::Coverage, 2)).unwrap().len(), 2);
        let statuses: Vec<String> = read_results(&settings.output).unwrap().into_iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec!["optimized", "no combination"]);
    }
}
