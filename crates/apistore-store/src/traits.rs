use apistore_types::{GroupResource, Resource, ResourceList};

use crate::context::RequestContext;
use crate::error::StoreResult;
use crate::validation::{UpdatedObjectInfo, ValidateObjectFn, ValidateUpdateFn};

/// Storage contract for one collection of objects of type `T`.
///
/// All implementations must satisfy these invariants:
/// - `create` never overwrites: an occupied location fails `AlreadyExists`.
/// - `update` only creates when `force_allow_create` is set; otherwise a
///   missing object fails `NotFound`.
/// - A hook rejection aborts the operation before any side effect.
/// - Each object is written whole; readers never observe a partial object.
/// - Namespaced operations on a single object require a namespace, either
///   from the request context or (for `create`) from the object itself.
/// - Errors are returned to the caller; the store never retries.
pub trait ResourceStorage<T: Resource>: Send + Sync {
    /// The collection this store serves.
    fn group_resource(&self) -> &GroupResource;

    /// Whether object identity includes a namespace.
    fn namespace_scoped(&self) -> bool;

    /// A blank object.
    fn new_object(&self) -> T {
        T::default()
    }

    /// An empty collection.
    fn new_list(&self) -> ResourceList<T> {
        ResourceList::default()
    }

    /// Read one object.
    fn get(&self, ctx: &RequestContext, name: &str) -> StoreResult<T>;

    /// Read every object in the request namespace, or in all namespaces
    /// when the context has none.
    fn list(&self, ctx: &RequestContext) -> StoreResult<ResourceList<T>>;

    /// Store a new object and return it.
    fn create(
        &self,
        ctx: &RequestContext,
        obj: T,
        create_validation: Option<ValidateObjectFn<'_, T>>,
    ) -> StoreResult<T>;

    /// Replace an object, optionally creating it.
    ///
    /// Returns the written object and whether it was created.
    fn update<U: UpdatedObjectInfo<T>>(
        &self,
        ctx: &RequestContext,
        name: &str,
        obj_info: U,
        create_validation: Option<ValidateObjectFn<'_, T>>,
        update_validation: Option<ValidateUpdateFn<'_, T>>,
        force_allow_create: bool,
    ) -> StoreResult<(T, bool)>;

    /// Remove an object and return what was removed.
    fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        delete_validation: Option<ValidateObjectFn<'_, T>>,
    ) -> StoreResult<T>;

    /// Remove every object `list` would return and return them.
    ///
    /// `delete_validation` runs for each object before anything is removed;
    /// one rejection aborts the whole call.
    fn delete_collection(
        &self,
        ctx: &RequestContext,
        delete_validation: Option<ValidateObjectFn<'_, T>>,
    ) -> StoreResult<ResourceList<T>>;
}
