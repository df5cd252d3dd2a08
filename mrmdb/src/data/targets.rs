use std::collections::HashSet;
use std::path::Path;

use csv::ByteRecord;
use log::info;

use crate::data::key::normalize;
use crate::error::{MrmError, Result};

/// Distinct keys of the target table in first-seen order, at most `limit`.
///
/// Fields are decoded lossily so that tables saved in a legacy 8-bit
/// encoding still yield their (ASCII) keys.
pub fn read_target_keys(path: &Path, key_column: &str, limit: Option<usize>) -> Result<Vec<String>> {
    if !path.is_file() {
        return Err(MrmError::SourceNotFound { path: path.to_path_buf() });
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| MrmError::csv(path, e))?;
    let headers = reader.byte_headers().map_err(|e| MrmError::csv(path, e))?.clone();
    let column = headers
        .iter()
        .position(|h| String::from_utf8_lossy(h).trim() == key_column)
        .ok_or_else(|| MrmError::MissingColumns { path: path.to_path_buf(), missing: vec![key_column.to_string()] })?;

    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    let mut record = ByteRecord::new();
    let mut rows = 0usize;
    while reader.read_byte_record(&mut record).map_err(|e| MrmError::csv(path, e))? {
        rows += 1;
        let Some(raw) = record.get(column) else { continue };
        let decoded = String::from_utf8_lossy(raw);
        if let Some(key) = normalize(&decoded) {
            if seen.insert(key.to_string()) {
                keys.push(key.to_string());
            }
        }
    }
    info!("target table {} has {} rows and {} distinct keys", path.display(), rows, keys.len());

    if let Some(limit) = limit {
        keys.truncate(limit);
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_distinct_keys_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.csv");
        let mut body = b"Name,InChIKey\nAtrazine,KEY-B\nSimazine,KEY-A\n".to_vec();
        body.extend_from_slice(b"Caf\xe9,KEY-B\nEmpty,\nOther, KEY-C \n");
        fs::write(&path, body).unwrap();

        let keys = read_target_keys(&path, "InChIKey", None).unwrap();
        assert_eq!(keys, vec!["KEY-B", "KEY-A", "KEY-C"]);

        let keys = read_target_keys(&path, "InChIKey", Some(2)).unwrap();
        assert_eq!(keys, vec!["KEY-B", "KEY-A"]);
    }

    #[test]
    fn test_missing_key_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.csv");
        fs::write(&path, "Name\nAtrazine\n").unwrap();
        let err = read_target_keys(&path, "InChIKey", None).unwrap_err();
        assert!(matches!(err, MrmError::MissingColumns { .. }));
        assert!(matches!(
            read_target_keys(&dir.path().join("absent.csv"), "InChIKey", None),
            Err(MrmError::SourceNotFound { .. })
        ));
    }
}
