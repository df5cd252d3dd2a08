//! Chunked, memory-bounded access to a partitioned record collection.
//!
//! A collection is either one CSV file or a directory of same-shaped CSV
//! partitions. Nothing is materialized beyond the current chunk and the rows
//! a query keeps.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use csv::StringRecord;
use log::{debug, warn};
use mrmcore::data::record::{fragment_columns, spectrum_columns};
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::data::key::KeyMatcher;
use crate::error::{MrmError, Result};
use crate::settings::StoreOptions;

/// Reads one partition in chunks of at most `chunk_size` rows.
pub struct ChunkReader {
    path: PathBuf,
    reader: csv::Reader<File>,
    headers: StringRecord,
    chunk_size: usize,
}

impl ChunkReader {
    /// Header names are trimmed once here, so column lookups and row
    /// deserialization see the same names.
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_path(path)
            .map_err(|e| MrmError::csv(path, e))?;
        let headers = reader.headers().map_err(|e| MrmError::csv(path, e))?.clone();
        Ok(ChunkReader { path: path.to_path_buf(), reader, headers, chunk_size: chunk_size.max(1) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Next chunk of raw rows, `None` at the end of the partition.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<StringRecord>>> {
        let mut chunk = Vec::with_capacity(self.chunk_size.min(8192));
        let mut record = StringRecord::new();
        while chunk.len() < self.chunk_size {
            let more = self.reader.read_record(&mut record).map_err(|e| MrmError::csv(&self.path, e))?;
            if !more {
                break;
            }
            chunk.push(record.clone());
        }
        Ok(if chunk.is_empty() { None } else { Some(chunk) })
    }

    /// Deserializes one raw row of this partition.
    pub fn parse<R: DeserializeOwned>(&self, row: &StringRecord) -> Result<R> {
        row.deserialize(Some(&self.headers)).map_err(|e| MrmError::csv(&self.path, e))
    }
}

/// Which pair of columns a range query tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeColumns {
    /// `PrecursorMZ` and `RT` of a fragment-level collection.
    Precursor,
    /// `Average Mz` and `Average Rt(min)` of an aligned spectrum collection.
    Average,
}

impl RangeColumns {
    pub fn names(&self) -> (&'static str, &'static str) {
        match self {
            RangeColumns::Precursor => (fragment_columns::PRECURSOR_MZ, fragment_columns::RT),
            RangeColumns::Average => (spectrum_columns::AVERAGE_MZ, spectrum_columns::AVERAGE_RT),
        }
    }
}

/// Rows whose mass and retention time both lie within tolerance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeQuery {
    pub columns: RangeColumns,
    pub mass: f64,
    pub mass_tolerance: f64,
    pub time: f64,
    pub time_tolerance: f64,
}

impl RangeQuery {
    pub fn contains(&self, mass: f64, time: f64) -> bool {
        (mass - self.mass).abs() <= self.mass_tolerance && (time - self.time).abs() <= self.time_tolerance
    }
}

/// Instrumentation of one range query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeReadStats {
    pub partitions_read: usize,
    pub partitions_skipped: usize,
    pub batches: usize,
    /// Largest number of matched rows held by a single batch.
    pub max_batch_rows: usize,
    pub rows_scanned: usize,
    /// Rows inside the range that could not be deserialized.
    pub rows_skipped: usize,
}

/// Matches of one partition.
struct PartitionScan<R> {
    rows: Vec<R>,
    scanned: usize,
    skipped: usize,
}

#[derive(Clone, Debug)]
pub struct RangeRead<R> {
    pub records: Vec<R>,
    pub stats: RangeReadStats,
}

fn parse_number(field: &str) -> f64 {
    field.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// A partitioned record collection on disk.
#[derive(Clone, Debug)]
pub struct RecordStore {
    root: PathBuf,
    partitions: Vec<PathBuf>,
    options: StoreOptions,
}

impl RecordStore {
    /// Opens a single partition file or a directory of partitions.
    ///
    /// Directory partitions are the files with the configured extension,
    /// in sorted order.
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        if !path.exists() {
            return Err(MrmError::SourceNotFound { path: path.to_path_buf() });
        }

        let partitions = if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            let mut found = Vec::new();
            for entry in fs::read_dir(path).map_err(|e| MrmError::io(path, e))? {
                let entry = entry.map_err(|e| MrmError::io(path, e))?;
                let candidate = entry.path();
                let matches_extension = candidate
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(&options.extension));
                if candidate.is_file() && matches_extension {
                    found.push(candidate);
                }
            }
            found.sort();
            found
        };

        if partitions.is_empty() {
            return Err(MrmError::NoPartitions { path: path.to_path_buf() });
        }

        debug!("opened {} with {} partition(s)", path.display(), partitions.len());
        Ok(RecordStore { root: path.to_path_buf(), partitions, options })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partitions(&self) -> &[PathBuf] {
        &self.partitions
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn chunks(&self, partition: &Path) -> Result<ChunkReader> {
        ChunkReader::open(partition, self.options.chunk_size)
    }

    /// Rows of `partitions` whose `key_column` matches `matcher`.
    ///
    /// Rows that fail to deserialize are skipped with a warning. A partition
    /// that fails to read part way keeps the rows matched before the failure.
    pub fn read_partitions_by_key<R>(&self, partitions: &[PathBuf], key_column: &str, matcher: &KeyMatcher) -> Vec<R>
    where
        R: DeserializeOwned,
    {
        let mut rows = Vec::new();
        for partition in partitions {
            if let Err(e) = self.collect_key_rows(partition, key_column, matcher, &mut rows) {
                warn!("skipping rest of partition {}: {}", partition.display(), e);
            }
        }
        rows
    }

    /// Full scan for `key` over every partition.
    pub fn read_by_key<R>(&self, key_column: &str, key: &str) -> Vec<R>
    where
        R: DeserializeOwned,
    {
        self.read_partitions_by_key(&self.partitions, key_column, &KeyMatcher::new(key))
    }

    fn collect_key_rows<R>(&self, partition: &Path, key_column: &str, matcher: &KeyMatcher, rows: &mut Vec<R>) -> Result<()>
    where
        R: DeserializeOwned,
    {
        let mut reader = self.chunks(partition)?;
        let Some(column) = reader.column(key_column) else {
            debug!("{} has no {} column", partition.display(), key_column);
            return Ok(());
        };
        while let Some(chunk) = reader.next_chunk()? {
            for row in chunk.iter().filter(|r| r.get(column).is_some_and(|k| matcher.matches(k))) {
                match reader.parse(row) {
                    Ok(record) => rows.push(record),
                    Err(e) => warn!("skipping row of {}: {}", partition.display(), e),
                }
            }
        }
        Ok(())
    }

    /// Rows of every partition inside `query`.
    ///
    /// Partitions are processed in batches of `batch_size`; the partitions of
    /// one batch are parsed in parallel and their matches appended in
    /// partition order before the next batch starts. Partitions without the
    /// query's columns or that fail to read are skipped; single rows that
    /// fail to deserialize are skipped and counted.
    ///
    /// # Memory
    ///
    /// At most one batch is in flight. While a batch runs, every worker of
    /// the rayon pool holds one raw chunk (`chunk_size` rows) of the
    /// partition it is scanning, so the transient peak is
    /// `min(batch_size, worker threads) * chunk_size` raw rows plus the
    /// matches of the batch. Cap the pool with `RAYON_NUM_THREADS` to
    /// tighten the bound.
    pub fn read_by_range<R>(&self, query: &RangeQuery) -> RangeRead<R>
    where
        R: DeserializeOwned + Send,
    {
        let mut stats = RangeReadStats::default();
        let mut records = Vec::new();

        for batch in self.partitions.chunks(self.options.batch_size.max(1)) {
            let scans: Vec<Result<Option<PartitionScan<R>>>> =
                batch.par_iter().map(|partition| self.scan_range(partition, query)).collect();

            let mut batch_rows = 0;
            for (partition, scan) in batch.iter().zip(scans) {
                match scan {
                    Ok(Some(scan)) => {
                        stats.partitions_read += 1;
                        stats.rows_scanned += scan.scanned;
                        stats.rows_skipped += scan.skipped;
                        batch_rows += scan.rows.len();
                        records.extend(scan.rows);
                    }
                    Ok(None) => {
                        debug!("{} lacks the range columns, skipped", partition.display());
                        stats.partitions_skipped += 1;
                    }
                    Err(e) => {
                        warn!("skipping partition {}: {}", partition.display(), e);
                        stats.partitions_skipped += 1;
                    }
                }
            }
            stats.batches += 1;
            stats.max_batch_rows = stats.max_batch_rows.max(batch_rows);
        }

        RangeRead { records, stats }
    }

    fn scan_range<R>(&self, partition: &Path, query: &RangeQuery) -> Result<Option<PartitionScan<R>>>
    where
        R: DeserializeOwned,
    {
        let mut reader = self.chunks(partition)?;
        let (mass_name, time_name) = query.columns.names();
        let (Some(mass_column), Some(time_column)) = (reader.column(mass_name), reader.column(time_name)) else {
            return Ok(None);
        };

        let mut scan = PartitionScan { rows: Vec::new(), scanned: 0, skipped: 0 };
        while let Some(chunk) = reader.next_chunk()? {
            scan.scanned += chunk.len();
            for row in &chunk {
                let mass = row.get(mass_column).map_or(f64::NAN, parse_number);
                let time = row.get(time_column).map_or(f64::NAN, parse_number);
                if !query.contains(mass, time) {
                    continue;
                }
                match reader.parse(row) {
                    Ok(record) => scan.rows.push(record),
                    Err(e) => {
                        warn!("skipping row of {}: {}", partition.display(), e);
                        scan.skipped += 1;
                    }
                }
            }
        }
        Ok(Some(scan))
    }
}
