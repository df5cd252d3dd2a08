use std::path::{Path, PathBuf};

use log::{info, warn};
use mrmcore::data::record::{fragment_columns, spectrum_columns};
use serde::{Deserialize, Serialize};

use crate::data::store::RecordStore;
use crate::error::{MrmError, Result};
use crate::settings::{Method, StoreOptions};

/// Columns an interference collection must carry for `method`.
pub fn required_columns(method: Method) -> &'static [&'static str] {
    match method {
        Method::Coverage => &[
            fragment_columns::KEY,
            fragment_columns::PRECURSOR_MZ,
            fragment_columns::RT,
            fragment_columns::FRAGMENT_MZ,
            fragment_columns::NCE,
            fragment_columns::CE,
            fragment_columns::ION_MODE,
            fragment_columns::PRECURSOR_TYPE,
        ],
        Method::Overlap => &[
            spectrum_columns::ALIGNMENT_ID,
            spectrum_columns::AVERAGE_MZ,
            spectrum_columns::AVERAGE_RT,
            spectrum_columns::CE,
            spectrum_columns::SPECTRUM,
        ],
    }
}

/// Checks that a user supplied collection can serve `method`: it exists,
/// holds at least one partition, and its first partition has every
/// required column.
pub fn validate_collection(path: &Path, method: Method, options: &StoreOptions) -> Result<()> {
    if path.is_file() {
        let extension_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&options.extension));
        if !extension_ok {
            return Err(MrmError::InvalidSettings(format!(
                "{} is not a .{} file",
                path.display(),
                options.extension
            )));
        }
    }

    let store = RecordStore::open(path, options.clone())?;
    let sample = &store.partitions()[0];
    let reader = store.chunks(sample)?;
    let missing: Vec<String> = required_columns(method)
        .iter()
        .filter(|c| reader.column(c).is_none())
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(MrmError::MissingColumns { path: sample.clone(), missing });
    }

    info!("{} is a valid {} collection ({} partition(s))", path.display(), method, store.partitions().len());
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    File,
    Directory,
}

/// Summary of a collection; `rows_sampled` counts the first five partitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub path: PathBuf,
    pub kind: CollectionKind,
    pub partitions: usize,
    pub rows_sampled: usize,
}

pub fn describe_collection(path: &Path, options: &StoreOptions) -> Result<CollectionInfo> {
    let store = RecordStore::open(path, options.clone())?;
    let kind = if path.is_file() { CollectionKind::File } else { CollectionKind::Directory };

    let mut rows_sampled = 0;
    for partition in store.partitions().iter().take(5) {
        let counted = store.chunks(partition).and_then(|mut reader| {
            let mut rows = 0;
            while let Some(chunk) = reader.next_chunk()? {
                rows += chunk.len();
            }
            Ok(rows)
        });
        match counted {
            Ok(rows) => rows_sampled += rows,
            Err(e) => warn!("could not count rows of {}: {}", partition.display(), e),
        }
    }

    Ok(CollectionInfo { path: path.to_path_buf(), kind, partitions: store.partitions().len(), rows_sampled })
}
