use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use apistore_types::{GroupResource, Resource, ResourceList};
use tracing::debug;

use crate::context::RequestContext;
use crate::error::{StoreError, StoreResult};
use crate::path::{ObjectKey, Scope};
use crate::traits::ResourceStorage;
use crate::validation::{
    run_object_validation, run_update_validation, UpdatedObjectInfo, ValidateObjectFn,
    ValidateUpdateFn,
};

/// `(namespace, name)`; cluster-scoped objects use an empty namespace.
type MapKey = (String, String);

fn map_key(key: &ObjectKey<'_>) -> MapKey {
    (key.namespace.unwrap_or_default().to_owned(), key.name.to_owned())
}

/// In-memory, `BTreeMap`-based resource store.
///
/// Intended for tests and embedding. Same semantics as the filesystem store,
/// with every operation serialized by one `RwLock`. Objects are cloned on
/// read and write.
pub struct InMemoryStore<T> {
    scope: Scope,
    objects: RwLock<BTreeMap<MapKey, T>>,
}

impl<T: Resource> InMemoryStore<T> {
    pub fn new(group_resource: GroupResource, namespaced: bool) -> Self {
        Self {
            scope: Scope::new(group_resource, namespaced),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of objects across all namespaces.
    pub fn len(&self) -> usize {
        self.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every object.
    pub fn clear(&self) -> StoreResult<()> {
        self.write()?.clear();
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<MapKey, T>>> {
        self.objects
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<MapKey, T>>> {
        self.objects
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".into()))
    }

    fn not_found(&self, key: &ObjectKey<'_>) -> StoreError {
        StoreError::NotFound {
            resource: self.scope.group_resource().to_string(),
            key: key.to_string(),
        }
    }

    fn in_collection(namespace: Option<&str>, key: &MapKey) -> bool {
        namespace.map_or(true, |ns| key.0 == ns)
    }
}

impl<T: Resource> ResourceStorage<T> for InMemoryStore<T> {
    fn group_resource(&self) -> &GroupResource {
        self.scope.group_resource()
    }

    fn namespace_scoped(&self) -> bool {
        self.scope.namespaced()
    }

    fn get(&self, ctx: &RequestContext, name: &str) -> StoreResult<T> {
        let key = self.scope.object(ctx.namespace(), name)?;
        self.read()?
            .get(&map_key(&key))
            .cloned()
            .ok_or_else(|| self.not_found(&key))
    }

    fn list(&self, ctx: &RequestContext) -> StoreResult<ResourceList<T>> {
        let namespace = self.scope.collection(ctx.namespace())?;
        let items = self
            .read()?
            .iter()
            .filter(|(key, _)| Self::in_collection(namespace, key))
            .map(|(_, obj)| obj.clone())
            .collect();
        Ok(ResourceList::new(items))
    }

    fn create(
        &self,
        ctx: &RequestContext,
        obj: T,
        create_validation: Option<ValidateObjectFn<'_, T>>,
    ) -> StoreResult<T> {
        run_object_validation(create_validation, ctx, &obj)?;

        let namespace = ctx.namespace_for(&obj)?;
        let key = self.scope.object(namespace, obj.name())?;
        let mut map = self.write()?;
        let slot = map_key(&key);
        if map.contains_key(&slot) {
            return Err(StoreError::AlreadyExists {
                resource: self.scope.group_resource().to_string(),
                key: key.to_string(),
            });
        }
        debug!(key = %key, "object created");
        map.insert(slot, obj.clone());
        Ok(obj)
    }

    fn update<U: UpdatedObjectInfo<T>>(
        &self,
        ctx: &RequestContext,
        name: &str,
        obj_info: U,
        create_validation: Option<ValidateObjectFn<'_, T>>,
        update_validation: Option<ValidateUpdateFn<'_, T>>,
        force_allow_create: bool,
    ) -> StoreResult<(T, bool)> {
        let key = self.scope.object(ctx.namespace(), name)?;
        let slot = map_key(&key);
        let mut map = self.write()?;

        let old = match map.get(&slot) {
            Some(old) => Some(old.clone()),
            None if force_allow_create => None,
            None => return Err(self.not_found(&key)),
        };
        let updated = obj_info.updated_object(ctx, old.as_ref())?;
        let created = match &old {
            None => {
                run_object_validation(create_validation, ctx, &updated)?;
                true
            }
            Some(old) => {
                run_update_validation(update_validation, ctx, &updated, old)?;
                false
            }
        };
        map.insert(slot, updated.clone());
        debug!(key = %key, created, "object updated");
        Ok((updated, created))
    }

    fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        delete_validation: Option<ValidateObjectFn<'_, T>>,
    ) -> StoreResult<T> {
        let key = self.scope.object(ctx.namespace(), name)?;
        let slot = map_key(&key);
        let mut map = self.write()?;

        let current = map.get(&slot).ok_or_else(|| self.not_found(&key))?;
        run_object_validation(delete_validation, ctx, current)?;
        let removed = map.remove(&slot).ok_or_else(|| self.not_found(&key))?;
        debug!(key = %key, "object deleted");
        Ok(removed)
    }

    fn delete_collection(
        &self,
        ctx: &RequestContext,
        delete_validation: Option<ValidateObjectFn<'_, T>>,
    ) -> StoreResult<ResourceList<T>> {
        let namespace = self.scope.collection(ctx.namespace())?;
        let mut map = self.write()?;

        let doomed: Vec<MapKey> = map
            .keys()
            .filter(|key| Self::in_collection(namespace, key))
            .cloned()
            .collect();
        for key in &doomed {
            if let Some(obj) = map.get(key) {
                run_object_validation(delete_validation, ctx, obj)?;
            }
        }

        let removed: Vec<T> = doomed.iter().filter_map(|key| map.remove(key)).collect();
        debug!(namespace = ?namespace, count = removed.len(), "collection deleted");
        Ok(ResourceList::new(removed))
    }
}

impl<T> std::fmt::Debug for InMemoryStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.objects.read().map(|map| map.len()).unwrap_or(0);
        f.debug_struct("InMemoryStore")
            .field("resource", &self.scope.group_resource().to_string())
            .field("object_count", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apistore_types::{impl_resource, ObjectMeta};
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Lamp {
        metadata: ObjectMeta,
        watts: u32,
    }
    impl_resource!(Lamp);

    fn store() -> InMemoryStore<Lamp> {
        InMemoryStore::new(GroupResource::new("", "lamps"), true)
    }

    #[test]
    fn starts_empty() {
        let store = store();
        assert!(store.is_empty());
        assert_eq!(format!("{store:?}"), "InMemoryStore { resource: \"lamps\", object_count: 0 }");
    }

    #[test]
    fn clear_removes_everything() {
        let store = store();
        let ctx = RequestContext::with_namespace("home");
        store
            .create(&ctx, Lamp { metadata: ObjectMeta::named("desk"), watts: 40 }, None)
            .unwrap();
        assert_eq!(store.len(), 1);
        store.clear().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn object_namespace_fills_missing_request_namespace() {
        let store = store();
        let lamp = Lamp { metadata: ObjectMeta::namespaced("office", "desk"), watts: 60 };
        store.create(&RequestContext::new(), lamp.clone(), None).unwrap();
        assert_eq!(store.get(&RequestContext::with_namespace("office"), "desk").unwrap(), lamp);
    }

    #[test]
    fn single_object_ops_need_namespace() {
        let store = store();
        let err = store.get(&RequestContext::new(), "desk").unwrap_err();
        assert!(matches!(err, StoreError::NamespaceRequired { .. }));
    }
}
