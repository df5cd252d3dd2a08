use std::path::{Path, PathBuf};

/// Failures of the retrieval layer and the run loop.
///
/// Only `SourceNotFound`, `NoPartitions`, `MissingColumns` and
/// `InvalidSettings` abort a run. Everything else is caught at partition or
/// compound level, logged, and turned into a skipped partition or an error
/// row.
#[derive(Debug, thiserror::Error)]
pub enum MrmError {
    #[error("record collection not found at {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("no partitions found in {}", path.display())]
    NoPartitions { path: PathBuf },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} is missing required columns: {}", path.display(), missing.join(", "))]
    MissingColumns { path: PathBuf, missing: Vec<String> },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

pub type Result<T> = std::result::Result<T, MrmError>;

impl MrmError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        MrmError::Io { path: path.to_path_buf(), source }
    }

    pub fn csv(path: &Path, source: csv::Error) -> Self {
        MrmError::Csv { path: path.to_path_buf(), source }
    }

    pub fn json(path: &Path, source: serde_json::Error) -> Self {
        MrmError::Json { path: path.to_path_buf(), source }
    }

    /// Whether the error must end the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MrmError::SourceNotFound { .. }
                | MrmError::NoPartitions { .. }
                | MrmError::MissingColumns { .. }
                | MrmError::InvalidSettings(_)
        )
    }
}
