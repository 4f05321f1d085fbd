use thiserror::Error;

/// Failure to load notation or registration settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid bound for {field}: {value}")]
    InvalidBound { field: &'static str, value: f64 },
}

/// Failure inside the reference inventory store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("item already registered: {0}")]
    Duplicate(String),

    #[error("inventory store lock poisoned")]
    Poisoned,
}

/// Failure reported by a registrar for a single item. Never aborts a run.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("registrar rejected item: {0}")]
    Rejected(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
