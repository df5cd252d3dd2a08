//! Persistent compound key index of a record collection.
//!
//! Maps every normalized key to the partitions that contain it so that a
//! compound lookup reads a handful of partitions instead of the whole
//! collection. The map is persisted as versioned JSON under the cache
//! directory, one file per source path, and rebuilt whenever the stored copy
//! is unusable.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter, Write as _};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::data::key::{fold, normalize, strip_whitespace, KeyMatcher};
use crate::data::store::RecordStore;
use crate::error::{MrmError, Result};

pub const INDEX_FORMAT: &str = "mrm-key-index";
pub const INDEX_VERSION: u32 = 2;

/// Size and modification time of a partition when it was indexed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionFingerprint {
    pub path: String,
    pub size: u64,
    pub modified: Option<u64>,
}

impl PartitionFingerprint {
    pub fn of(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path).map_err(|e| MrmError::io(path, e))?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        Ok(PartitionFingerprint { path: path.to_string_lossy().into_owned(), size: meta.len(), modified })
    }
}

/// On-disk shape of the index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexFile {
    pub format: String,
    pub version: u32,
    pub source: String,
    pub key_column: String,
    pub partitions: Vec<PartitionFingerprint>,
    pub entries: BTreeMap<String, Vec<String>>,
}

/// Why an index was built instead of loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RebuildReason {
    Missing,
    Unreadable(String),
    /// Key to (location, offset) pairs written by older releases.
    Legacy,
    UnknownFormat,
    VersionMismatch(u32),
    KeyColumnChanged,
    Stale,
}

impl Display for RebuildReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RebuildReason::Missing => write!(f, "no cached index"),
            RebuildReason::Unreadable(e) => write!(f, "cached index unreadable ({e})"),
            RebuildReason::Legacy => write!(f, "cached index uses the old location/offset format"),
            RebuildReason::UnknownFormat => write!(f, "cached index has an unknown format"),
            RebuildReason::VersionMismatch(v) => write!(f, "cached index version {v}, expected {INDEX_VERSION}"),
            RebuildReason::KeyColumnChanged => write!(f, "cached index was built on another key column"),
            RebuildReason::Stale => write!(f, "partitions changed since the index was built"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexOrigin {
    Loaded,
    Built(RebuildReason),
}

/// Cache file of `source`: `index_<basename>_<16 hex digits of sha256(path)>.json`.
pub fn cache_file_path(cache_dir: &Path, source: &Path) -> PathBuf {
    let digest = Sha256::digest(source.to_string_lossy().as_bytes());
    let mut hash = String::with_capacity(16);
    for byte in &digest[..8] {
        let _ = write!(&mut hash, "{byte:02x}");
    }
    let base = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string());
    cache_dir.join(format!("index_{base}_{hash}.json"))
}

fn is_legacy_shape(value: &serde_json::Value) -> bool {
    let Some(map) = value.as_object() else {
        return false;
    };
    !map.is_empty()
        && map.values().all(|v| {
            v.as_array()
                .is_some_and(|locations| locations.iter().all(serde_json::Value::is_array))
        })
}

/// Key index bound to one record collection.
#[derive(Debug)]
pub struct KeyIndex {
    store: RecordStore,
    key_column: String,
    cache_path: PathBuf,
    entries: BTreeMap<String, Vec<String>>,
    /// Folded key to the indexed keys sharing it.
    folded: HashMap<String, Vec<String>>,
    origin: IndexOrigin,
}

impl KeyIndex {
    /// Loads the cached index of `store` or builds and persists a new one.
    pub fn build_or_load(store: RecordStore, key_column: &str, cache_dir: &Path) -> Result<KeyIndex> {
        let cache_path = cache_file_path(cache_dir, store.root());
        let fingerprints = store
            .partitions()
            .iter()
            .map(|p| PartitionFingerprint::of(p))
            .collect::<Result<Vec<_>>>()?;

        let reason = match Self::read_cache(&cache_path, key_column, &fingerprints) {
            Ok(entries) => {
                info!("loaded key index {} ({} keys)", cache_path.display(), entries.len());
                return Ok(KeyIndex::new(store, key_column, cache_path, entries, IndexOrigin::Loaded));
            }
            Err(reason) => reason,
        };

        if reason != RebuildReason::Missing {
            info!("rebuilding key index for {}: {}", store.root().display(), reason);
        }
        let entries = Self::build_entries(&store, key_column);
        let file = IndexFile {
            format: INDEX_FORMAT.to_string(),
            version: INDEX_VERSION,
            source: store.root().to_string_lossy().into_owned(),
            key_column: key_column.to_string(),
            partitions: fingerprints,
            entries,
        };
        if let Err(e) = Self::persist(&file, cache_dir, &cache_path) {
            warn!("could not persist key index: {e}");
        }

        Ok(KeyIndex::new(store, key_column, cache_path, file.entries, IndexOrigin::Built(reason)))
    }

    fn new(
        store: RecordStore,
        key_column: &str,
        cache_path: PathBuf,
        entries: BTreeMap<String, Vec<String>>,
        origin: IndexOrigin,
    ) -> KeyIndex {
        let mut folded: HashMap<String, Vec<String>> = HashMap::new();
        for key in entries.keys() {
            folded.entry(fold(key)).or_default().push(key.clone());
        }
        KeyIndex { store, key_column: key_column.to_string(), cache_path, entries, folded, origin }
    }

    fn read_cache(
        path: &Path,
        key_column: &str,
        fingerprints: &[PartitionFingerprint],
    ) -> std::result::Result<BTreeMap<String, Vec<String>>, RebuildReason> {
        if !path.exists() {
            return Err(RebuildReason::Missing);
        }
        let file = File::open(path).map_err(|e| RebuildReason::Unreadable(e.to_string()))?;
        let value: serde_json::Value =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| RebuildReason::Unreadable(e.to_string()))?;

        if value.get("format").and_then(|f| f.as_str()) != Some(INDEX_FORMAT) {
            return Err(if is_legacy_shape(&value) { RebuildReason::Legacy } else { RebuildReason::UnknownFormat });
        }
        let cached: IndexFile = serde_json::from_value(value).map_err(|e| RebuildReason::Unreadable(e.to_string()))?;
        if cached.version != INDEX_VERSION {
            return Err(RebuildReason::VersionMismatch(cached.version));
        }
        if cached.key_column != key_column {
            return Err(RebuildReason::KeyColumnChanged);
        }
        if cached.partitions != fingerprints {
            return Err(RebuildReason::Stale);
        }
        Ok(cached.entries)
    }

    /// Scans every partition once and registers the trimmed and the
    /// whitespace-stripped form of each key.
    fn build_entries(store: &RecordStore, key_column: &str) -> BTreeMap<String, Vec<String>> {
        let mut entries: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut register = |key: &str, location: &str| {
            let list = entries.entry(key.to_string()).or_default();
            if list.last().map(String::as_str) != Some(location) {
                list.push(location.to_string());
            }
        };

        for partition in store.partitions() {
            let location = partition.to_string_lossy();
            let mut reader = match store.chunks(partition) {
                Ok(reader) => reader,
                Err(e) => {
                    warn!("not indexing {}: {}", partition.display(), e);
                    continue;
                }
            };
            let Some(column) = reader.column(key_column) else {
                debug!("{} has no {} column", partition.display(), key_column);
                continue;
            };
            loop {
                match reader.next_chunk() {
                    Ok(Some(chunk)) => {
                        for raw in chunk.iter().filter_map(|row| row.get(column)) {
                            let Some(key) = normalize(raw) else { continue };
                            register(key, &location);
                            let stripped = strip_whitespace(key);
                            if stripped != key && !stripped.is_empty() {
                                register(&stripped, &location);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("stopped indexing {}: {}", partition.display(), e);
                        break;
                    }
                }
            }
        }

        info!("indexed {} keys from {} partition(s)", entries.len(), store.partitions().len());
        entries
    }

    fn persist(file: &IndexFile, cache_dir: &Path, cache_path: &Path) -> Result<()> {
        fs::create_dir_all(cache_dir).map_err(|e| MrmError::io(cache_dir, e))?;
        let tmp_path = cache_path.with_extension("json.tmp");
        {
            let tmp = File::create(&tmp_path).map_err(|e| MrmError::io(&tmp_path, e))?;
            let mut writer = BufWriter::new(tmp);
            serde_json::to_writer(&mut writer, file).map_err(|e| MrmError::json(&tmp_path, e))?;
            writer.flush().map_err(|e| MrmError::io(&tmp_path, e))?;
        }
        fs::rename(&tmp_path, cache_path).map_err(|e| MrmError::io(cache_path, e))?;
        info!("key index saved to {}", cache_path.display());
        Ok(())
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn origin(&self) -> &IndexOrigin {
        &self.origin
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indexed key for `key`: the trimmed key itself, then its
    /// whitespace-stripped form, then the first key equal ignoring case and
    /// whitespace.
    pub fn resolve(&self, key: &str) -> Option<&str> {
        let key = key.trim();
        if let Some((k, _)) = self.entries.get_key_value(key) {
            return Some(k.as_str());
        }
        let stripped = strip_whitespace(key);
        if let Some((k, _)) = self.entries.get_key_value(stripped.as_str()) {
            return Some(k.as_str());
        }
        let lower = key.to_lowercase();
        let candidates = self.folded.get(&fold(key))?;
        candidates
            .iter()
            .find(|k| k.to_lowercase() == lower)
            .or_else(|| candidates.first())
            .map(String::as_str)
    }

    /// Partitions holding `key` under any spelling that folds to the same
    /// form, in partition order.
    pub fn locations(&self, key: &str) -> Vec<PathBuf> {
        let Some(variants) = self.folded.get(&fold(key)) else {
            return Vec::new();
        };
        variants
            .iter()
            .filter_map(|k| self.entries.get(k))
            .flatten()
            .map(String::as_str)
            .collect::<BTreeSet<&str>>()
            .into_iter()
            .map(PathBuf::from)
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.resolve(key).is_some()
    }

    /// Indexed keys containing, or contained in, `key` ignoring case.
    pub fn similar_keys(&self, key: &str, limit: usize) -> Vec<&str> {
        let lower = key.trim().to_lowercase();
        self.entries
            .keys()
            .filter(|k| {
                let k = k.to_lowercase();
                k.contains(&lower) || lower.contains(&k)
            })
            .take(limit)
            .map(String::as_str)
            .collect()
    }

    /// All rows of `key`, read only from the partitions indexed under it.
    ///
    /// An unknown key yields no rows and a warning listing similar keys.
    pub fn lookup<R: DeserializeOwned>(&self, key: &str) -> Vec<R> {
        let Some(matched) = self.resolve(key) else {
            let similar = self.similar_keys(key, 5);
            if similar.is_empty() {
                warn!("key '{}' not found in index ({} keys)", key.trim(), self.entries.len());
            } else {
                warn!("key '{}' not found in index; similar keys: {:?}", key.trim(), similar);
            }
            return Vec::new();
        };
        if matched != key.trim() {
            info!("matched key '{}' as '{}' ignoring case", key.trim(), matched);
        }

        let partitions = self.locations(matched);
        debug!("key '{}' found in {} partition(s)", matched, partitions.len());
        self.store
            .read_partitions_by_key(&partitions, &self.key_column, &KeyMatcher::new(matched))
    }
}
