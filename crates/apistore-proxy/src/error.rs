use std::io;

use apistore_store::StoreError;
use thiserror::Error;

/// Errors raised by a key-value datastore.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A log line could not be read back.
    #[error("corrupt log at line {line}: {reason}")]
    CorruptLog { line: usize, reason: String },

    #[error("required revision {requested} has been compacted (compacted through {compacted})")]
    Compacted { requested: i64, compacted: i64 },

    #[error("required revision {requested} is a future revision (current {current})")]
    FutureRevision { requested: i64, current: i64 },

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The datastore returned a response that does not fit the request.
    #[error("unexpected datastore response: {0}")]
    UnexpectedResponse(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("datastore lock poisoned")]
    Poisoned,
}

pub type KvResult<T> = Result<T, KvError>;

impl From<KvError> for StoreError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::Io(e) => StoreError::Io(e),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Errors from the proxied options getter and its listeners.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to listen on {address}: {source}")]
    Listen {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("datastore error: {0}")]
    Kv(#[from] KvError),
}

pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_io_keeps_its_kind_in_store_errors() {
        let err: StoreError = KvError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "nope")).into();
        match err {
            StoreError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn other_kv_errors_become_backend_errors() {
        let err: StoreError = KvError::Compacted { requested: 3, compacted: 9 }.into();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[test]
    fn store_errors_stay_matchable() {
        let err: ProxyError = StoreError::NotFound {
            resource: "tigers".into(),
            key: "ns1/t".into(),
        }
        .into();
        assert!(matches!(err, ProxyError::Store(ref e) if e.is_not_found()));
    }
}
