//! Foundation types for apistore.
//!
//! This crate provides the identity and metadata types shared by every
//! storage backend. Every other apistore crate depends on `apistore-types`.
//!
//! # Key Types
//!
//! - [`Resource`] -- Accessor capability every stored object implements
//! - [`ObjectMeta`] -- Identity (`name`, `namespace`) plus bookkeeping metadata
//! - [`ResourceList`] -- The collection returned by list operations
//! - [`GroupResource`] -- The (group, resource) pair naming one collection
//! - [`GroupVersionKind`] -- The type identity written into encoded documents
//! - [`Scheme`] -- Explicit registry mapping Rust types to their kinds

pub mod error;
pub mod group;
pub mod meta;
pub mod names;
pub mod resource;
pub mod scheme;

pub use error::TypeError;
pub use group::{GroupResource, GroupVersionKind};
pub use meta::{ListMeta, ObjectMeta};
pub use names::validate_path_segment;
pub use resource::{Resource, ResourceList};
pub use scheme::Scheme;
