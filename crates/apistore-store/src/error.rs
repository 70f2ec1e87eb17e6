use apistore_types::TypeError;

/// Errors from resource storage operations.
///
/// Every backend reports the same kinds so callers can map them to protocol
/// responses without knowing which substrate is in use.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object location does not exist.
    #[error("{resource} {key:?} not found")]
    NotFound { resource: String, key: String },

    /// Create target is already occupied.
    #[error("{resource} {key:?} already exists")]
    AlreadyExists { resource: String, key: String },

    /// A namespaced operation arrived without a namespace.
    #[error("namespace is required for namespaced resource {resource}")]
    NamespaceRequired { resource: String },

    /// Existing bytes could not be decoded.
    #[error("corrupt data at {location}: {reason}")]
    CorruptData { location: String, reason: String },

    /// A caller-supplied validation hook rejected the object.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A name or namespace cannot be used as a storage location.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// The object changed between read and write.
    #[error("conflict on {resource} {key:?}: {reason}")]
    Conflict {
        resource: String,
        key: String,
        reason: String,
    },

    /// Filesystem or transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A precondition on configuration was violated.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The object could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure reported by a non-filesystem substrate.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ValidationFailed(_))
    }
}

impl From<TypeError> for StoreError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidName { name, reason } => Self::InvalidName { name, reason },
            other => Self::InvalidConfiguration(other.to_string()),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_identity() {
        let err = StoreError::NotFound {
            resource: "burgers.filepath.example.com".into(),
            key: "ns1/foo-1".into(),
        };
        assert_eq!(
            err.to_string(),
            "burgers.filepath.example.com \"ns1/foo-1\" not found"
        );
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
    }

    #[test]
    fn type_errors_keep_their_kind() {
        let err: StoreError = apistore_types::validate_path_segment("..").unwrap_err().into();
        assert!(matches!(err, StoreError::InvalidName { .. }));

        let err: StoreError = TypeError::UnregisteredType { type_name: "Foo" }.into();
        assert!(matches!(err, StoreError::InvalidConfiguration(_)));
    }

    #[test]
    fn io_errors_convert() {
        let err: StoreError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
