//! Error types for the ray-trace server.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for rtserver operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Model database does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Model database is not valid JSON or does not match the schema
    #[error("Invalid model database: {0}")]
    Json(#[from] serde_json::Error),

    /// No top-level objects were named and the database lists none
    #[error("Model database has no rtserver_tops entry")]
    MissingTops,

    /// A named object is missing from the database
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Tree walk produced no usable geometry, or nothing is loaded yet
    #[error("No geometry loaded")]
    NoGeometry,

    /// Priority band outside the configured range
    #[error("Band {band} out of range (bands: {count})")]
    InvalidBand { band: usize, count: usize },

    /// Session id does not name an open session
    #[error("Session {0} is not open")]
    SessionNotFound(usize),

    /// Instance lookup inside a session failed
    #[error("Instance {0} not found in session")]
    InstanceNotFound(String),

    /// Blocking retrieval gave up before a matching result arrived
    #[error("Timed out waiting for job {job_id} in session {session_id}")]
    Timeout { job_id: i64, session_id: usize },

    /// The server is shutting down or has shut down
    #[error("Server is shut down")]
    ShutDown,

    /// Geometry prep thread pool could not be built
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Configuration value rejected during validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Negative status code for embedders that still speak integer sentinels.
    ///
    /// Load failures: -1 unreadable source, -2 missing top-level objects,
    /// -4 unresolvable trees.
    pub fn code(&self) -> i32 {
        match self {
            Self::FileNotFound(_) | Self::Io(_) | Self::Json(_) => -1,
            Self::MissingTops => -2,
            Self::ObjectNotFound(_) => -4,
            Self::NoGeometry => -5,
            Self::InvalidBand { .. } => -6,
            Self::SessionNotFound(_) | Self::InstanceNotFound(_) => -7,
            Self::Timeout { .. } => -8,
            Self::ShutDown => -9,
            Self::ThreadPool(_) | Self::InvalidConfig(_) | Self::Other(_) => -10,
        }
    }
}

/// Result type alias for rtserver operations.
pub type Result<T> = std::result::Result<T, Error>;
