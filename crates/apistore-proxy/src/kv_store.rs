//! Resource storage over a key-value datastore.
//!
//! Objects live at `<prefix>/<group>/<resource>[/<namespace>]/<name>`, or
//! under the resource prefix from the storage options when one is set.
//! Every write is a single-key transaction guarded by the revision that was
//! read, so a concurrent writer makes the loser fail with `Conflict` rather
//! than silently overwriting. Nothing is retried.

use std::marker::PhantomData;
use std::sync::Arc;

use apistore_store::validation::{run_object_validation, run_update_validation};
use apistore_store::{
    Codec, KeyResolver, ObjectKey, RequestContext, ResourceStorage, Scope, StoreError, StoreResult,
    UpdatedObjectInfo, ValidateObjectFn, ValidateUpdateFn,
};
use apistore_types::{GroupResource, Resource, ResourceList};
use tracing::debug;

use crate::backend::{
    prefix_range_end, Compare, CompareResult, CompareTarget, KeyValue, KvBackend, Txn, TxnOp,
    TxnOpResult,
};
use crate::options::RestOptions;

pub struct KvStore<T, C> {
    backend: Arc<dyn KvBackend>,
    keys: KeyResolver,
    codec: C,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Resource, C: Codec> KvStore<T, C> {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        group_resource: GroupResource,
        codec: C,
        prefix: &str,
        namespaced: bool,
    ) -> Self {
        Self {
            backend,
            keys: KeyResolver::new(prefix, Scope::new(group_resource, namespaced)),
            codec,
            _marker: PhantomData,
        }
    }

    /// A store keyed under `<storage prefix><resource prefix>`. Options with
    /// no resource prefix key by group and resource, as [`KvStore::new`].
    pub fn from_options(
        backend: Arc<dyn KvBackend>,
        options: &RestOptions,
        group_resource: GroupResource,
        codec: C,
        namespaced: bool,
    ) -> Self {
        Self {
            backend,
            keys: KeyResolver::with_resource_prefix(
                &options.storage_config.prefix,
                &options.resource_prefix,
                Scope::new(group_resource, namespaced),
            ),
            codec,
            _marker: PhantomData,
        }
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    fn scope(&self) -> &Scope {
        self.keys.scope()
    }

    fn resource(&self) -> String {
        self.scope().group_resource().to_string()
    }

    fn not_found(&self, key: &ObjectKey<'_>) -> StoreError {
        StoreError::NotFound {
            resource: self.resource(),
            key: key.to_string(),
        }
    }

    fn conflict(&self, key: &ObjectKey<'_>, reason: &str) -> StoreError {
        StoreError::Conflict {
            resource: self.resource(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Encode without the version stamp; the datastore revision is the
    /// source of truth for it.
    fn encode(&self, obj: &T) -> StoreResult<Vec<u8>> {
        let mut stripped = obj.clone();
        stripped.meta_mut().resource_version = None;
        self.codec
            .encode(&stripped)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(&self, kv: &KeyValue) -> StoreResult<T> {
        let mut obj: T = self.codec.decode(&kv.value).map_err(|e| StoreError::CorruptData {
            location: String::from_utf8_lossy(&kv.key).into_owned(),
            reason: e.to_string(),
        })?;
        obj.meta_mut().resource_version = Some(kv.mod_revision.to_string());
        Ok(obj)
    }

    fn stamped(mut obj: T, revision: i64) -> T {
        obj.meta_mut().resource_version = Some(revision.to_string());
        obj
    }

    fn collection(&self, ctx: &RequestContext) -> StoreResult<Vec<KeyValue>> {
        let namespace = self.scope().collection(ctx.namespace())?;
        let prefix = self.keys.collection_prefix(namespace);
        let end = prefix_range_end(prefix.as_bytes());
        Ok(self.backend.range(prefix.as_bytes(), Some(&end), 0)?.kvs)
    }

    /// Put `value` at `key` if its mod revision is still `expected`
    /// (0 meaning absent). Returns the write revision.
    fn guarded_put(&self, key: &str, expected: i64, value: Vec<u8>) -> StoreResult<Option<i64>> {
        let target = if expected == 0 {
            CompareTarget::Create(0)
        } else {
            CompareTarget::Mod(expected)
        };
        let result = self.backend.txn(
            Txn::new()
                .when(Compare::new(key, target, CompareResult::Equal))
                .and_then(TxnOp::Put {
                    key: key.as_bytes().to_vec(),
                    value,
                }),
        )?;
        Ok(result.succeeded.then_some(result.revision))
    }

    /// Delete `key` if its mod revision is still `expected`. `Ok(None)`
    /// when the key is gone, `Ok(Some(false))` when it changed.
    fn guarded_delete(&self, key: &str, expected: i64) -> StoreResult<Option<bool>> {
        let result = self.backend.txn(
            Txn::new()
                .when(Compare::new(key, CompareTarget::Mod(expected), CompareResult::Equal))
                .and_then(TxnOp::DeleteRange {
                    key: key.as_bytes().to_vec(),
                    range_end: None,
                })
                .or_else(TxnOp::Range {
                    key: key.as_bytes().to_vec(),
                    range_end: None,
                    limit: 1,
                }),
        )?;
        if result.succeeded {
            return Ok(Some(true));
        }
        match result.responses.first() {
            Some(TxnOpResult::Range(current)) if current.count > 0 => Ok(Some(false)),
            _ => Ok(None),
        }
    }
}

impl<T: Resource, C: Codec> ResourceStorage<T> for KvStore<T, C> {
    fn group_resource(&self) -> &GroupResource {
        self.scope().group_resource()
    }

    fn namespace_scoped(&self) -> bool {
        self.scope().namespaced()
    }

    fn get(&self, ctx: &RequestContext, name: &str) -> StoreResult<T> {
        let key = self.scope().object(ctx.namespace(), name)?;
        match self.backend.get(self.keys.object_key(&key).as_bytes())? {
            Some(kv) => self.decode(&kv),
            None => Err(self.not_found(&key)),
        }
    }

    fn list(&self, ctx: &RequestContext) -> StoreResult<ResourceList<T>> {
        let revision = self.backend.revision()?;
        let items = self
            .collection(ctx)?
            .iter()
            .map(|kv| self.decode(kv))
            .collect::<StoreResult<Vec<T>>>()?;
        let mut list = ResourceList::new(items);
        list.metadata.resource_version = Some(revision.to_string());
        Ok(list)
    }

    fn create(
        &self,
        ctx: &RequestContext,
        obj: T,
        create_validation: Option<ValidateObjectFn<'_, T>>,
    ) -> StoreResult<T> {
        run_object_validation(create_validation, ctx, &obj)?;
        let namespace = ctx.namespace_for(&obj)?;
        let key = self.scope().object(namespace, obj.name())?;
        let storage_key = self.keys.object_key(&key);
        let value = self.encode(&obj)?;

        match self.backend.create(storage_key.as_bytes(), &value)? {
            Some(revision) => {
                debug!(key = %storage_key, revision, "object created");
                Ok(Self::stamped(obj, revision))
            }
            None => Err(StoreError::AlreadyExists {
                resource: self.resource(),
                key: key.to_string(),
            }),
        }
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
        let key = self.scope().object(ctx.namespace(), name)?;
        let storage_key = self.keys.object_key(&key);

        let current = match self.backend.get(storage_key.as_bytes())? {
            Some(kv) => Some((self.decode(&kv)?, kv.mod_revision)),
            None if force_allow_create => None,
            None => return Err(self.not_found(&key)),
        };

        let (updated, expected) = match &current {
            None => {
                let updated = obj_info.updated_object(ctx, None)?;
                run_object_validation(create_validation, ctx, &updated)?;
                (updated, 0)
            }
            Some((old, revision)) => {
                let updated = obj_info.updated_object(ctx, Some(old))?;
                run_update_validation(update_validation, ctx, &updated, old)?;
                (updated, *revision)
            }
        };

        let value = self.encode(&updated)?;
        match self.guarded_put(&storage_key, expected, value)? {
            Some(revision) => {
                let created = current.is_none();
                debug!(key = %storage_key, revision, created, "object updated");
                Ok((Self::stamped(updated, revision), created))
            }
            None if current.is_none() => Err(self.conflict(&key, "object was created concurrently")),
            None => Err(self.conflict(&key, "object was modified concurrently")),
        }
    }

    fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        delete_validation: Option<ValidateObjectFn<'_, T>>,
    ) -> StoreResult<T> {
        let key = self.scope().object(ctx.namespace(), name)?;
        let storage_key = self.keys.object_key(&key);

        let kv = self
            .backend
            .get(storage_key.as_bytes())?
            .ok_or_else(|| self.not_found(&key))?;
        let current = self.decode(&kv)?;
        run_object_validation(delete_validation, ctx, &current)?;

        match self.guarded_delete(&storage_key, kv.mod_revision)? {
            Some(true) => {
                debug!(key = %storage_key, "object deleted");
                Ok(current)
            }
            Some(false) => Err(self.conflict(&key, "object was modified concurrently")),
            None => Err(self.not_found(&key)),
        }
    }

    fn delete_collection(
        &self,
        ctx: &RequestContext,
        delete_validation: Option<ValidateObjectFn<'_, T>>,
    ) -> StoreResult<ResourceList<T>> {
        let found = self
            .collection(ctx)?
            .into_iter()
            .map(|kv| -> StoreResult<(T, KeyValue)> { Ok((self.decode(&kv)?, kv)) })
            .collect::<StoreResult<Vec<_>>>()?;
        for (obj, _) in &found {
            run_object_validation(delete_validation, ctx, obj)?;
        }

        let mut removed = Vec::with_capacity(found.len());
        for (obj, kv) in found {
            let storage_key = String::from_utf8_lossy(&kv.key).into_owned();
            match self.guarded_delete(&storage_key, kv.mod_revision)? {
                Some(true) => removed.push(obj),
                Some(false) => {
                    return Err(StoreError::Conflict {
                        resource: self.resource(),
                        key: storage_key,
                        reason: "object was modified concurrently".into(),
                    })
                }
                None => debug!(key = %storage_key, "object vanished before removal"),
            }
        }
        debug!(count = removed.len(), "collection deleted");
        Ok(ResourceList::new(removed))
    }
}

impl<T, C> std::fmt::Debug for KvStore<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("prefix", &self.keys.collection_prefix(None))
            .finish_non_exhaustive()
    }
}
