//! Explicit type registry.
//!
//! A [`Scheme`] is built once at startup and handed by reference to
//! whatever needs to map a Rust type to its [`GroupVersionKind`]. There is
//! no process-wide instance.

use std::any::{type_name, TypeId};
use std::collections::HashMap;

use crate::error::TypeError;
use crate::group::GroupVersionKind;
use crate::resource::Resource;

/// Registry of known resource types and their kinds.
#[derive(Debug, Default)]
pub struct Scheme {
    by_type: HashMap<TypeId, GroupVersionKind>,
    by_kind: HashMap<GroupVersionKind, &'static str>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `gvk`.
    ///
    /// Re-registering the same type under the same kind is a no-op. A kind
    /// that already belongs to a different type is rejected.
    pub fn register<T: Resource>(&mut self, gvk: GroupVersionKind) -> Result<(), TypeError> {
        let name = type_name::<T>();
        if let Some(existing) = self.by_kind.get(&gvk) {
            if *existing != name {
                return Err(TypeError::DuplicateKind {
                    kind: gvk.to_string(),
                    existing: *existing,
                });
            }
        }
        if let Some(previous) = self.by_type.insert(TypeId::of::<T>(), gvk.clone()) {
            if previous != gvk {
                self.by_kind.remove(&previous);
            }
        }
        self.by_kind.insert(gvk, name);
        Ok(())
    }

    /// The kind registered for `T`.
    pub fn kind_for<T: Resource>(&self) -> Result<&GroupVersionKind, TypeError> {
        self.by_type
            .get(&TypeId::of::<T>())
            .ok_or(TypeError::UnregisteredType {
                type_name: type_name::<T>(),
            })
    }

    /// Whether any type is registered under `gvk`.
    pub fn recognizes(&self, gvk: &GroupVersionKind) -> bool {
        self.by_kind.contains_key(gvk)
    }

    /// The Rust type name registered under `gvk`.
    pub fn type_name(&self, gvk: &GroupVersionKind) -> Option<&'static str> {
        self.by_kind.get(gvk).copied()
    }

    /// All registered kinds, sorted.
    pub fn kinds(&self) -> Vec<GroupVersionKind> {
        let mut kinds: Vec<GroupVersionKind> = self.by_kind.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}
