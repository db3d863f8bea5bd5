use thiserror::Error;

/// Error taxonomy for the projection engine.
///
/// Each component fails closed at its own boundary: scans report a single
/// first-hit error, write-back reports the first fatal step, and nothing
/// panics into the shared store.
#[derive(Debug, Error)]
pub enum Error {
    /// Node lookup miss. Protocol adapters map this to ENOENT.
    #[error("not found: {0}")]
    NotFound(String),

    /// An AST selector failed to compile against a file's grammar.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A source file could not be parsed.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Lazy content fetch or render failed; the read fails.
    #[error("resolver failure: {0}")]
    ResolverFailure(String),

    /// First error hit during a streaming table scan.
    #[error("scan error: {0}")]
    ScanError(String),

    /// I/O failure while splicing an edit back into a source file.
    #[error("splice failure: {0}")]
    SpliceFailure(String),

    /// Malformed template or render-time failure.
    #[error("template error: {0}")]
    Template(String),

    /// Malformed topology document.
    #[error("topology error: {0}")]
    Topology(String),

    /// Cross-reference store misuse (double flush is not one of these;
    /// flushing twice is a no-op).
    #[error("reference index error: {0}")]
    RefIndex(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors that adapters surface as "no such file".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
