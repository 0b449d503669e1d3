//! Error kinds shared across every adapter and component in this crate.
//!
//! Adapters translate wire-level errors into one of these variants at their
//! boundary; no wire-level error type is allowed to leak past an adapter
//! (spec.md §7).

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The named object or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A retryable network/5xx-class failure. Adapters retry these
    /// internally up to their budget before surfacing them.
    #[error("transient error during {op}: {source}")]
    Transient {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A non-retryable 4xx-class failure or bad argument.
    #[error("permanent error during {op}: {source}")]
    Permanent {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// An invariant was violated: a dangling cloud-manifest pointer, a
    /// malformed log record, or similar. Fatal wherever it surfaces.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A call exceeded its deadline.
    #[error("timeout during {0}")]
    Timeout(&'static str),

    /// The requested operation is not supported, e.g. renaming a data or
    /// log file (spec.md §4.4, §9).
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// Catch-all for bugs and states that should be unreachable in
    /// practice (e.g. the tailer becoming unhealthy).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn transient(op: &'static str, source: impl Into<anyhow::Error>) -> Error {
        Error::Transient {
            op,
            source: source.into(),
        }
    }

    pub fn permanent(op: &'static str, source: impl Into<anyhow::Error>) -> Error {
        Error::Permanent {
            op,
            source: source.into(),
        }
    }

    /// True if a caller retrying the same operation might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. } | Error::Timeout(_))
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Error {
        match &err {
            object_store::Error::NotFound { path, .. } => Error::NotFound(path.clone()),
            object_store::Error::Generic { .. }
            | object_store::Error::NotImplemented
            | object_store::Error::AlreadyExists { .. } => Error::permanent("object_store", err),
            _ => Error::transient("object_store", err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Error::NotFound(err.to_string()),
            ErrorKind::TimedOut => Error::Timeout("local filesystem"),
            _ => Error::Internal(err.to_string()),
        }
    }
}
