// replyfs - striped files over comment/reply stores
// Turns a bounded, rate-limited, append-oriented text store into a byte stream

#![warn(rust_2018_idioms)]

pub mod backend;
pub mod codec;
pub mod config;
pub mod file;
pub mod index;
pub mod lane;
pub mod limiter;
pub mod pool;
pub mod remote;
pub mod retry;
pub mod ring;

// Re-exports for convenience
pub use backend::Backend;
pub use config::FsConfig;
pub use file::{BufferedWriter, File, FileStat, Filesystem};
pub use index::{FileHeader, FileOptions, Index};
pub use lane::{Lane, LaneHeader};
pub use pool::{ClientPool, Credential};
pub use remote::{MemoryStore, RemoteStore};
pub use retry::RetryPolicy;
pub use tokio_util::sync::CancellationToken;

/// replyfs error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Not found: {0}")]
        NotFound(String),

        #[error("Remote error {code}: {message}")]
        Remote { code: u16, message: String },

        #[error("Insufficient capacity: requested {requested} bytes, {available} available")]
        InsufficientCapacity { requested: usize, available: usize },

        #[error("Rollback not possible")]
        NoRollback,

        #[error("Rollback failed ({rollback}) after: {source}")]
        RollbackFailed {
            source: Box<Error>,
            rollback: Box<Error>,
        },

        #[error("File header missing")]
        MissingFileHeader,

        #[error("Duplicate file header in container {0}")]
        DuplicateFileHeader(String),

        #[error("Malformed header: {0}")]
        MalformedHeader(String),

        #[error("Malformed record: {0}")]
        MalformedRecord(String),

        #[error("Operation cancelled")]
        Cancelled,

        #[error("Unsupported: {0}")]
        Unsupported(String),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Incomplete after {completed} bytes: {source}")]
        Incomplete { completed: usize, source: Box<Error> },

        #[error("Serialization error: {0}")]
        SerializationError(String),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("I/O error: {0}")]
        Io(String),

        #[error("Internal error: {0}")]
        Internal(String),
    }

    impl Error {
        /// Bytes completed before the error, for partial reads and writes.
        pub fn completed(&self) -> usize {
            match self {
                Error::Incomplete { completed, .. } => *completed,
                _ => 0,
            }
        }

        /// The underlying cause with any `Incomplete` wrapper removed.
        pub fn root(&self) -> &Error {
            match self {
                Error::Incomplete { source, .. } => source.root(),
                other => other,
            }
        }

        /// A failed compensation leaves remote state unverified; the file needs
        /// out-of-band reconciliation before further use.
        pub fn is_fatal(&self) -> bool {
            matches!(self.root(), Error::RollbackFailed { .. })
        }
    }

    impl From<serde_json::Error> for Error {
        fn from(err: serde_json::Error) -> Self {
            Error::SerializationError(err.to_string())
        }
    }

    impl From<std::io::Error> for Error {
        fn from(err: std::io::Error) -> Self {
            Error::Io(err.to_string())
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
