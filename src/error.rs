use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot open database {}: {source}", path.display())]
    Connection {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("database error: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("invalid stored timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: time::error::Parse,
    },
    #[error("cannot format timestamp: {0}")]
    Format(#[from] time::error::Format),
    #[error("clock error: {0}")]
    Clock(#[from] time::error::ComponentRange),
}
