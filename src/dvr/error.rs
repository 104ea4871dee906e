//! Error type for the DVR cache synchronizer

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// The appliance returned an empty id list for a fetch.
    #[error("no {0} returned")]
    NoResults(&'static str),

    /// The batch call answered with no usable detail objects.
    #[error("no {0} details returned")]
    NoDetails(&'static str),

    #[error("no show path for {0}")]
    MissingShowPath(i64),

    #[error("invalid show type: {0}")]
    InvalidShowType(String),

    #[error("malformed object path: {0}")]
    MalformedPath(String),

    #[error("unsupported datetime format: {0}")]
    UnsupportedDate(String),

    /// A conflicted non-movie show has no priority row.
    #[error("no priority set for conflicted show {show_id}")]
    MissingPriority { show_id: i64 },

    #[error("unschedule failed for {airing_id}: appliance reports state '{state}'")]
    UnscheduleFailed { airing_id: i64, state: String },

    #[error("no export path specified")]
    NoExportPath,

    #[error("cache version {found} is newer than supported version {supported}")]
    IncompatibleCache { found: i64, supported: i64 },
}

impl SyncError {
    /// True for the "nothing came back" condition that schedule-only fetches tolerate.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, SyncError::NoResults(_))
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
