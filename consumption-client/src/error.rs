use std::fmt;

use crate::domain::{LoadClass, PeriodKind};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("unknown socket '{socket_id}' in {load_class} loads")]
    UnknownSocket {
        load_class: LoadClass,
        socket_id: String,
    },
    #[error("invalid tenant identifier '{0}'")]
    InvalidTenant(String),
    #[error("unknown load class '{0}'")]
    UnknownLoadClass(String),
    #[error("unsupported interval '{0}'")]
    InvalidInterval(String),
    #[error("{period} reset failed for {}", TableFailures(.failures))]
    ResetPartialFailure {
        period: PeriodKind,
        failures: Vec<TableFailure>,
    },
}

/// A counter table that could not be zeroed during a reset.
#[derive(Debug, Clone)]
pub struct TableFailure {
    pub load_class: LoadClass,
    pub reason: String,
}

struct TableFailures<'a>(&'a [TableFailure]);

impl fmt::Display for TableFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} ({})", failure.load_class.table(), failure.reason)?;
        }
        Ok(())
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Error::ConnectionFailure(e.to_string()),
            other => Error::Storage(other.to_string()),
        }
    }
}

impl Error {
    /// Whether retrying the same operation later can succeed.
    ///
    /// Only lost connectivity qualifies; a statement the database rejected
    /// will be rejected again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ConnectionFailure(_))
    }
}
