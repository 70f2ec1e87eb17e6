use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("type {type_name} is not registered in the scheme")]
    UnregisteredType { type_name: &'static str },

    #[error("kind {kind} is already registered to {existing}")]
    DuplicateKind { kind: String, existing: &'static str },

    #[error("invalid apiVersion: {0}")]
    InvalidApiVersion(String),
}
