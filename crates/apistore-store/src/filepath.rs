//! Filesystem-backed resource storage.
//!
//! One JSON document per object, one subdirectory per namespace:
//!
//! ```text
//! <root>/<group>/<resource>/[<namespace>/]<name>.json
//! ```
//!
//! There is no index or manifest; listing walks the directory tree. Writes
//! go to a hidden temporary file in the target directory and are renamed
//! into place, so a crash mid-write never leaves a truncated object behind.

use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use apistore_types::{GroupResource, Resource, ResourceList};
use tracing::debug;
use walkdir::WalkDir;

use crate::codec::Codec;
use crate::config::StoreConfig;
use crate::context::RequestContext;
use crate::error::{StoreError, StoreResult};
use crate::lock::KeyLocks;
use crate::path::{ObjectKey, PathResolver, Scope, TEMP_FILE_PREFIX, TEMP_FILE_SUFFIX};
use crate::traits::ResourceStorage;
use crate::validation::{
    run_object_validation, run_update_validation, UpdatedObjectInfo, ValidateObjectFn,
    ValidateUpdateFn,
};

/// Resource storage over a directory tree.
///
/// Operations on one object are serialized by the configured
/// [`LockMode`](crate::LockMode). The lock is held while the update
/// function and hooks run, so they must not call back into the same store
/// for the same object.
pub struct FilepathStore<T, C> {
    resolver: PathResolver,
    codec: C,
    locks: KeyLocks,
    sync_writes: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Resource, C: Codec> FilepathStore<T, C> {
    /// Open a store rooted at `root` with default settings.
    pub fn new(
        group_resource: GroupResource,
        codec: C,
        root: impl AsRef<Path>,
        namespaced: bool,
    ) -> StoreResult<Self> {
        Self::with_config(
            group_resource,
            codec,
            namespaced,
            &StoreConfig::with_root(root.as_ref()),
        )
    }

    /// Open a store from explicit configuration.
    ///
    /// Creates `<root>/<group>/<resource>` if it does not exist.
    pub fn with_config(
        group_resource: GroupResource,
        codec: C,
        namespaced: bool,
        config: &StoreConfig,
    ) -> StoreResult<Self> {
        config.validate()?;
        let resolver = PathResolver::new(
            &config.root,
            Scope::new(group_resource, namespaced),
            config.extension.clone(),
        );
        fs::create_dir_all(resolver.root())?;
        debug!(
            root = %resolver.root().display(),
            namespaced,
            "filepath store opened"
        );

        Ok(Self {
            resolver,
            codec,
            locks: KeyLocks::new(config.lock_mode),
            sync_writes: config.sync_writes,
            _marker: PhantomData,
        })
    }

    /// `<root>/<group>/<resource>`.
    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    fn resource(&self) -> String {
        self.resolver.scope().group_resource().to_string()
    }

    fn not_found(&self, key: &ObjectKey<'_>) -> StoreError {
        StoreError::NotFound {
            resource: self.resource(),
            key: key.to_string(),
        }
    }

    fn already_exists(&self, key: &ObjectKey<'_>) -> StoreError {
        StoreError::AlreadyExists {
            resource: self.resource(),
            key: key.to_string(),
        }
    }

    fn decode(&self, path: &Path, data: &[u8]) -> StoreResult<T> {
        self.codec.decode(data).map_err(|e| StoreError::CorruptData {
            location: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn read_object(&self, path: &Path, key: &ObjectKey<'_>) -> StoreResult<T> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(self.not_found(key)),
            Err(e) => return Err(e.into()),
        };
        self.decode(path, &data)
    }

    /// Encode fully, write to a temporary sibling, then rename over `path`.
    ///
    /// Without `overwrite` the rename refuses to replace an existing file and
    /// reports `AlreadyExists`.
    fn write_object(
        &self,
        path: &Path,
        key: &ObjectKey<'_>,
        obj: &T,
        overwrite: bool,
    ) -> StoreResult<()> {
        let data = self
            .codec
            .encode(obj)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let dir = path.parent().ok_or_else(|| {
            StoreError::InvalidConfiguration(format!("object path {} has no parent", path.display()))
        })?;

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .suffix(TEMP_FILE_SUFFIX)
            .tempfile_in(dir)?;
        tmp.write_all(&data)?;
        if self.sync_writes {
            tmp.as_file().sync_all()?;
        }

        let persisted = if overwrite {
            tmp.persist(path)
        } else {
            tmp.persist_noclobber(path)
        };
        match persisted {
            Ok(_) => {
                debug!(path = %path.display(), bytes = data.len(), "object written");
                Ok(())
            }
            Err(e) if !overwrite && e.error.kind() == io::ErrorKind::AlreadyExists => {
                Err(self.already_exists(key))
            }
            Err(e) => Err(e.error.into()),
        }
    }

    fn ensure_namespace_dir(&self, key: &ObjectKey<'_>) -> StoreResult<()> {
        if let Some(ns) = key.namespace {
            fs::create_dir_all(self.resolver.namespace_dir(ns))?;
        }
        Ok(())
    }

    /// Walk a collection and decode every object file in it.
    ///
    /// Entries that disappear mid-walk are skipped.
    fn visit(&self, namespace: Option<&str>) -> StoreResult<Vec<(PathBuf, T)>> {
        let (dir, depth) = self.resolver.collection_dir(namespace);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(depth)
            .max_depth(depth)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().is_some_and(|io| io.kind() == io::ErrorKind::NotFound) => {
                    continue
                }
                Err(e) => return Err(StoreError::Io(e.into())),
            };
            if !entry.file_type().is_file() || !self.resolver.is_object_file(entry.path()) {
                continue;
            }
            let data = match fs::read(entry.path()) {
                Ok(data) => data,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let obj = self.decode(entry.path(), &data)?;
            found.push((entry.into_path(), obj));
        }
        Ok(found)
    }
}

impl<T: Resource, C: Codec> ResourceStorage<T> for FilepathStore<T, C> {
    fn group_resource(&self) -> &GroupResource {
        self.resolver.scope().group_resource()
    }

    fn namespace_scoped(&self) -> bool {
        self.resolver.scope().namespaced()
    }

    fn get(&self, ctx: &RequestContext, name: &str) -> StoreResult<T> {
        let key = self.resolver.scope().object(ctx.namespace(), name)?;
        self.read_object(&self.resolver.object_path(&key), &key)
    }

    fn list(&self, ctx: &RequestContext) -> StoreResult<ResourceList<T>> {
        let namespace = self.resolver.scope().collection(ctx.namespace())?;
        let items: Vec<T> = self.visit(namespace)?.into_iter().map(|(_, obj)| obj).collect();
        debug!(namespace = ?namespace, count = items.len(), "listed objects");
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
        let key = self.resolver.scope().object(namespace, obj.name())?;
        let path = self.resolver.object_path(&key);
        let _guard = self.locks.lock(path.as_path());

        self.ensure_namespace_dir(&key)?;
        if path.exists() {
            return Err(self.already_exists(&key));
        }
        self.write_object(&path, &key, &obj, false)?;
        debug!(key = %key, "object created");
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
        let key = self.resolver.scope().object(ctx.namespace(), name)?;
        let path = self.resolver.object_path(&key);
        let _guard = self.locks.lock(path.as_path());

        let old = match self.read_object(&path, &key) {
            Ok(old) => Some(old),
            Err(e) if e.is_not_found() && force_allow_create => None,
            Err(e) => return Err(e),
        };
        let updated = obj_info.updated_object(ctx, old.as_ref())?;

        match old {
            None => {
                run_object_validation(create_validation, ctx, &updated)?;
                self.ensure_namespace_dir(&key)?;
                self.write_object(&path, &key, &updated, false)?;
                debug!(key = %key, "object created by update");
                Ok((updated, true))
            }
            Some(old) => {
                run_update_validation(update_validation, ctx, &updated, &old)?;
                self.write_object(&path, &key, &updated, true)?;
                debug!(key = %key, "object updated");
                Ok((updated, false))
            }
        }
    }

    fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        delete_validation: Option<ValidateObjectFn<'_, T>>,
    ) -> StoreResult<T> {
        let key = self.resolver.scope().object(ctx.namespace(), name)?;
        let path = self.resolver.object_path(&key);
        let _guard = self.locks.lock(path.as_path());

        let current = self.read_object(&path, &key)?;
        run_object_validation(delete_validation, ctx, &current)?;

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(self.not_found(&key)),
            Err(e) => return Err(e.into()),
        }
        debug!(key = %key, "object deleted");
        Ok(current)
    }

    fn delete_collection(
        &self,
        ctx: &RequestContext,
        delete_validation: Option<ValidateObjectFn<'_, T>>,
    ) -> StoreResult<ResourceList<T>> {
        let namespace = self.resolver.scope().collection(ctx.namespace())?;
        let found = self.visit(namespace)?;
        for (_, obj) in &found {
            run_object_validation(delete_validation, ctx, obj)?;
        }

        let mut removed = Vec::with_capacity(found.len());
        for (path, obj) in found {
            let _guard = self.locks.lock(path.as_path());
            match fs::remove_file(&path) {
                Ok(()) => removed.push(obj),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "object vanished before removal");
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!(namespace = ?namespace, count = removed.len(), "collection deleted");
        Ok(ResourceList::new(removed))
    }
}

impl<T, C> std::fmt::Debug for FilepathStore<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilepathStore")
            .field("root", &self.resolver.root())
            .field("namespaced", &self.resolver.scope().namespaced())
            .field("locks", &self.locks)
            .finish()
    }
}
