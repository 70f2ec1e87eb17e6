//! Object encoding.
//!
//! Stores treat the codec as opaque: `encode` turns an object into the full
//! byte buffer that gets persisted, `decode` turns persisted bytes back into
//! an object. Decode failures are reported to callers as corrupt data.

use apistore_types::{GroupVersionKind, Resource, Scheme, TypeError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

const API_VERSION_FIELD: &str = "apiVersion";
const KIND_FIELD: &str = "kind";

/// Errors produced by a codec.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
}

/// Serializes objects to and from bytes.
pub trait Codec: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec.
///
/// When bound to a [`GroupVersionKind`], encoded documents carry
/// `apiVersion` and `kind`, and decoding rejects documents that name a
/// different type. Documents without those fields decode as-is.
#[derive(Clone, Debug, Default)]
pub struct JsonCodec {
    kind: Option<GroupVersionKind>,
    pretty: bool,
}

impl JsonCodec {
    /// A codec that writes plain JSON without type fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// A codec bound to `kind`.
    pub fn for_kind(kind: GroupVersionKind) -> Self {
        Self {
            kind: Some(kind),
            pretty: false,
        }
    }

    /// A codec bound to the kind `scheme` has registered for `T`.
    pub fn for_resource<T: Resource>(scheme: &Scheme) -> Result<Self, TypeError> {
        Ok(Self::for_kind(scheme.kind_for::<T>()?.clone()))
    }

    /// Emit indented JSON.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn kind(&self) -> Option<&GroupVersionKind> {
        self.kind.as_ref()
    }

    fn check_type_field(&self, map: &serde_json::Map<String, Value>, field: &str, expected: &str) -> Result<(), CodecError> {
        match map.get(field) {
            None => Ok(()),
            Some(Value::String(found)) if found == expected => Ok(()),
            Some(found) => Err(CodecError::TypeMismatch {
                expected: format!("{field}={expected}"),
                found: format!("{field}={found}"),
            }),
        }
    }
}

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let mut doc = serde_json::to_value(value).map_err(|e| CodecError::Encode(e.to_string()))?;

        if let (Some(kind), Value::Object(map)) = (&self.kind, &mut doc) {
            map.insert(API_VERSION_FIELD.into(), Value::String(kind.api_version()));
            map.insert(KIND_FIELD.into(), Value::String(kind.kind.clone()));
        }

        let bytes = if self.pretty {
            serde_json::to_vec_pretty(&doc)
        } else {
            serde_json::to_vec(&doc)
        };
        bytes.map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        let mut doc: Value =
            serde_json::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))?;

        if let (Some(kind), Value::Object(map)) = (&self.kind, &mut doc) {
            self.check_type_field(map, API_VERSION_FIELD, &kind.api_version())?;
            self.check_type_field(map, KIND_FIELD, &kind.kind)?;
            map.remove(API_VERSION_FIELD);
            map.remove(KIND_FIELD);
        }

        serde_json::from_value(doc).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
