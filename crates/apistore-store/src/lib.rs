//! Resource storage for apistore.
//!
//! A [`ResourceStorage`] serves one collection (a group/resource pair) of
//! structured objects, optionally partitioned by namespace, with the usual
//! API-server verbs: get, list, create, update (with optional upsert),
//! delete and delete-collection. Callers can attach validation hooks that
//! veto a mutation before anything is written.
//!
//! # Storage Backends
//!
//! - [`FilepathStore`] -- one JSON file per object under a root directory
//! - [`InMemoryStore`] -- `BTreeMap`-based store for tests and embedding
//!
//! Key-value backends (etcd-compatible datastores) live in `apistore-proxy`.
//!
//! # Design Rules
//!
//! 1. Object identity is `(namespace, name)`; both are single path segments.
//! 2. Create never overwrites; update never creates unless asked to.
//! 3. Hooks run before any side effect, and their errors pass through unchanged.
//! 4. Objects are written whole: temp file, then rename.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod filepath;
pub mod lock;
pub mod memory;
pub mod path;
pub mod traits;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use codec::{Codec, CodecError, JsonCodec};
pub use config::StoreConfig;
pub use context::RequestContext;
pub use error::{StoreError, StoreResult};
pub use filepath::FilepathStore;
pub use lock::{KeyLocks, LockMode};
pub use memory::InMemoryStore;
pub use path::{KeyResolver, ObjectKey, PathResolver, Scope};
pub use traits::ResourceStorage;
pub use validation::{ReplaceWith, UpdatedObjectInfo, ValidateObjectFn, ValidateUpdateFn};
