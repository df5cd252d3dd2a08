use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use mrmcore::algorithm::collision::CollisionEnergyCalibration;
use mrmcore::algorithm::method::PairSettings;
use serde::{Deserialize, Serialize};

use crate::error::{MrmError, Result};

/// Interference method of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Cross-compound fragment hit counting against a fragment library.
    #[value(alias = "nist")]
    Coverage,
    /// Peak overlap against aligned spectra.
    #[value(alias = "qe")]
    Overlap,
}

impl Method {
    /// Interference collection used when none is configured.
    pub fn default_interference(&self) -> PathBuf {
        match self {
            Method::Coverage => PathBuf::from("INTF_TQDB_NIST"),
            Method::Overlap => PathBuf::from("INTF_TQDB_QE"),
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Coverage => write!(f, "coverage"),
            Method::Overlap => write!(f, "overlap"),
        }
    }
}

/// How partitions are located and read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Rows parsed per chunk.
    pub chunk_size: usize,
    /// Partitions per range-query batch.
    pub batch_size: usize,
    /// File extension of partition files.
    pub extension: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            chunk_size: 100_000, // rows held per chunk
            batch_size: 375,     // partitions per range batch
            extension: "csv".to_string(),
        }
    }
}

/// Everything a run needs to know.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub method: Method,
    pub library: PathBuf,
    /// Interference collection; `None` picks the method's default.
    pub interference: Option<PathBuf>,
    pub targets: PathBuf,
    pub output: PathBuf,
    pub cache_dir: PathBuf,
    /// Compounds processed in batch mode; `None` processes all.
    pub max_compounds: Option<usize>,
    /// Key processed in single-compound mode.
    pub single_compound: Option<String>,
    pub precursor_type: String,
    pub mz_tolerance: f64,
    pub rt_tolerance: f64,
    pub rt_offset: f64,
    pub reclaim_interval: usize,
    pub checkpoint_interval: usize,
    pub store: StoreOptions,
    pub pairs: PairSettings,
    pub calibration: CollisionEnergyCalibration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            method: Method::Coverage,
            library: PathBuf::from("Pesudo-TQDB"),
            interference: None,
            targets: PathBuf::from("375pesticides_inchikey.csv"),
            output: PathBuf::from("optimization_results.csv"),
            cache_dir: PathBuf::from(".index_cache"),
            max_compounds: Some(375),
            single_compound: None,
            precursor_type: "[M+H]+".to_string(),
            mz_tolerance: 0.7,
            rt_tolerance: 2.0, // minutes
            rt_offset: 0.0,
            reclaim_interval: 50,
            checkpoint_interval: 100,
            store: StoreOptions::default(),
            pairs: PairSettings::default(),
            calibration: CollisionEnergyCalibration::default(),
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file; absent fields keep their defaults.
    pub fn load(path: &Path) -> Result<Settings> {
        let file = File::open(path).map_err(|e| MrmError::io(path, e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| MrmError::json(path, e))
    }

    pub fn interference_path(&self) -> PathBuf {
        self.interference
            .clone()
            .unwrap_or_else(|| self.method.default_interference())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(MrmError::InvalidSettings(msg.to_string()));

        if self.store.chunk_size == 0 {
            return invalid("chunk_size must be positive");
        }
        if self.store.batch_size == 0 {
            return invalid("batch_size must be positive");
        }
        if self.reclaim_interval == 0 || self.checkpoint_interval == 0 {
            return invalid("reclaim and checkpoint intervals must be positive");
        }
        let tolerances = [
            self.mz_tolerance,
            self.rt_tolerance,
            self.pairs.msms_tolerance,
            self.pairs.precursor_min_diff,
            self.pairs.ion_pair_min_diff,
        ];
        if tolerances.iter().any(|t| !(*t >= 0.0)) {
            return invalid("tolerances must be non-negative numbers");
        }
        if self.pairs.max_ions_per_tier == 0 {
            return invalid("max_ions_per_tier must be positive");
        }
        let (ws, wp) = (self.pairs.sensitivity_weight, self.pairs.specificity_weight);
        if ws < 0.0 || wp < 0.0 || ws + wp == 0.0 {
            return invalid("score weights must be non-negative and not both zero");
        }
        if let Some(key) = &self.single_compound {
            if key.trim().is_empty() {
                return invalid("single-compound mode requires a non-empty key");
            }
        }
        Ok(())
    }
}
