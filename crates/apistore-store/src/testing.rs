//! Behavioral contract shared by every [`ResourceStorage`] backend.
//!
//! Each function exercises one rule against a fresh, empty, namespaced store
//! of [`Widget`]s. Backends that stamp `resource_version` are compared with
//! that field cleared.

use std::sync::atomic::{AtomicUsize, Ordering};

use apistore_types::{impl_resource, GroupResource, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::{StoreError, StoreResult};
use crate::traits::ResourceStorage;
use crate::validation::{ReplaceWith, ValidateObjectFn, ValidateUpdateFn};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WidgetSpec {
    pub color: String,
    pub size: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: WidgetSpec,
}
impl_resource!(Widget);

pub fn widgets() -> GroupResource {
    GroupResource::new("testing.apistore.dev", "widgets")
}

pub fn widget(namespace: &str, name: &str, color: &str, size: u32) -> Widget {
    Widget {
        metadata: ObjectMeta::namespaced(namespace, name),
        spec: WidgetSpec {
            color: color.into(),
            size,
        },
    }
}

fn normalized(mut w: Widget) -> Widget {
    w.meta_mut().resource_version = None;
    w
}

fn assert_same(actual: &Widget, expected: &Widget) {
    assert_eq!(normalized(actual.clone()), normalized(expected.clone()));
}

fn reject_all() -> impl Fn(&RequestContext, &Widget) -> Result<(), StoreError> + Send + Sync {
    |_: &RequestContext, w: &Widget| {
        Err(StoreError::ValidationFailed(format!("{} rejected", w.name())))
    }
}

pub fn get_after_create<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    let w = widget("ns1", "alpha", "red", 3);

    let created = store.create(&ctx, w.clone(), None).unwrap();
    assert_same(&created, &w);
    assert_same(&store.get(&ctx, "alpha").unwrap(), &w);
}

pub fn create_twice_fails<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    store.create(&ctx, widget("ns1", "dup", "red", 1), None).unwrap();

    let err = store.create(&ctx, widget("ns1", "dup", "blue", 2), None).unwrap_err();
    assert!(err.is_already_exists(), "got {err}");
    assert_eq!(store.get(&ctx, "dup").unwrap().spec.color, "red");
}

pub fn get_missing_not_found<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    assert!(store.get(&ctx, "ghost").unwrap_err().is_not_found());
}

pub fn delete_missing_not_found<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    assert!(store.delete(&ctx, "ghost", None).unwrap_err().is_not_found());
}

pub fn update_missing_without_force<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    let err = store
        .update(&ctx, "ghost", ReplaceWith(widget("ns1", "ghost", "red", 1)), None, None, false)
        .unwrap_err();
    assert!(err.is_not_found(), "got {err}");
    assert!(store.get(&ctx, "ghost").unwrap_err().is_not_found());
}

pub fn upsert_creates<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    let w = widget("ns1", "fresh", "green", 5);
    let create_calls = AtomicUsize::new(0);
    let count_creates: ValidateObjectFn<'_, Widget> = &|_, _| {
        create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    };

    let (written, created) = store
        .update(&ctx, "fresh", ReplaceWith(w.clone()), Some(count_creates), None, true)
        .unwrap();
    assert!(created);
    assert_same(&written, &w);
    assert_eq!(create_calls.load(Ordering::SeqCst), 1);
    assert_same(&store.get(&ctx, "fresh").unwrap(), &w);
}

pub fn update_sees_old_object<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    store.create(&ctx, widget("ns1", "grow", "red", 1), None).unwrap();

    let grow = |_: &RequestContext, old: Option<&Widget>| -> StoreResult<Widget> {
        let mut next = old.cloned().unwrap_or_default();
        next.spec.size += 10;
        Ok(next)
    };
    let (written, created) = store.update(&ctx, "grow", grow, None, None, false).unwrap();
    assert!(!created);
    assert_eq!(written.spec.size, 11);
    assert_eq!(store.get(&ctx, "grow").unwrap().spec.size, 11);
}

pub fn update_validation_rejects<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    store.create(&ctx, widget("ns1", "steady", "red", 4), None).unwrap();

    let no_shrink: ValidateUpdateFn<'_, Widget> = &|_, new, old| {
        if new.spec.size < old.spec.size {
            return Err(StoreError::ValidationFailed("size may not shrink".into()));
        }
        Ok(())
    };
    let err = store
        .update(&ctx, "steady", ReplaceWith(widget("ns1", "steady", "red", 1)), None, Some(no_shrink), false)
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(store.get(&ctx, "steady").unwrap().spec.size, 4);
}

pub fn create_validation_rejects<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    let reject = reject_all();
    let hook: ValidateObjectFn<'_, Widget> = &reject;

    let err = store.create(&ctx, widget("ns1", "nope", "red", 1), Some(hook)).unwrap_err();
    assert_eq!(err.to_string(), "validation failed: nope rejected");
    assert!(store.get(&ctx, "nope").unwrap_err().is_not_found());
}

pub fn delete_validation_rejects<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    store.create(&ctx, widget("ns1", "keep", "red", 1), None).unwrap();
    let reject = reject_all();
    let hook: ValidateObjectFn<'_, Widget> = &reject;

    assert!(store.delete(&ctx, "keep", Some(hook)).unwrap_err().is_validation());
    assert!(store.get(&ctx, "keep").is_ok());
}

pub fn delete_returns_object<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    let w = widget("ns1", "gone", "red", 1);
    store.create(&ctx, w.clone(), None).unwrap();

    assert_same(&store.delete(&ctx, "gone", None).unwrap(), &w);
    assert!(store.get(&ctx, "gone").unwrap_err().is_not_found());
}

pub fn list_and_delete_collection<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    for name in ["b", "a", "c"] {
        store.create(&ctx, widget("ns1", name, "red", 1), None).unwrap();
    }

    let mut names: Vec<String> = store.list(&ctx).unwrap().into_iter().map(|w| w.name().to_owned()).collect();
    names.sort();
    assert_eq!(names, ["a", "b", "c"]);

    let removed = store.delete_collection(&ctx, None).unwrap();
    assert_eq!(removed.len(), 3);
    assert!(store.list(&ctx).unwrap().is_empty());
}

pub fn delete_collection_validation_aborts<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    for name in ["a", "b", "protected"] {
        store.create(&ctx, widget("ns1", name, "red", 1), None).unwrap();
    }
    let guard: ValidateObjectFn<'_, Widget> = &|_, w| {
        if w.name() == "protected" {
            return Err(StoreError::ValidationFailed("protected".into()));
        }
        Ok(())
    };

    assert!(store.delete_collection(&ctx, Some(guard)).unwrap_err().is_validation());
    assert_eq!(store.list(&ctx).unwrap().len(), 3);
}

pub fn dot_prefixed_names_listed<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    for name in [".hidden", "...", ".apistore-lookalike"] {
        store.create(&ctx, widget("ns1", name, "red", 1), None).unwrap();
    }
    assert_eq!(store.list(&ctx).unwrap().len(), 3);

    assert_eq!(store.delete_collection(&ctx, None).unwrap().len(), 3);
    assert!(store.get(&ctx, ".hidden").unwrap_err().is_not_found());
    assert!(store.list(&ctx).unwrap().is_empty());
}

pub fn namespace_isolation<S: ResourceStorage<Widget>>(store: &S) {
    let ns1 = RequestContext::with_namespace("ns1");
    let ns2 = RequestContext::with_namespace("ns2");
    store.create(&ns1, widget("ns1", "shared", "red", 1), None).unwrap();
    store.create(&ns2, widget("ns2", "shared", "blue", 2), None).unwrap();

    assert_eq!(store.get(&ns1, "shared").unwrap().spec.color, "red");
    assert_eq!(store.get(&ns2, "shared").unwrap().spec.color, "blue");
    assert_eq!(store.list(&ns1).unwrap().len(), 1);
    assert_eq!(store.list(&RequestContext::new()).unwrap().len(), 2);

    store.delete_collection(&ns1, None).unwrap();
    assert!(store.get(&ns2, "shared").is_ok());
}

pub fn namespace_mismatch_rejected<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    let err = store.create(&ctx, widget("ns2", "stray", "red", 1), None).unwrap_err();
    assert!(err.is_validation(), "got {err}");
}

pub fn invalid_names_rejected<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    for name in ["", "..", "a/b"] {
        let err = store.create(&ctx, widget("ns1", name, "red", 1), None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidName { .. }), "{name:?} gave {err}");
    }
    let bad_ns = RequestContext::with_namespace("../etc");
    assert!(matches!(store.get(&bad_ns, "x").unwrap_err(), StoreError::InvalidName { .. }));
}

/// The create, get, update, list, delete walk-through on `ns1/foo-1`.
pub fn end_to_end<S: ResourceStorage<Widget>>(store: &S) {
    let ctx = RequestContext::with_namespace("ns1");
    let original = widget("ns1", "foo-1", "red", 1);

    store.create(&ctx, original.clone(), None).unwrap();
    assert_same(&store.get(&ctx, "foo-1").unwrap(), &original);

    let changed = widget("ns1", "foo-1", "blue", 2);
    let (_, created) = store
        .update(&ctx, "foo-1", ReplaceWith(changed.clone()), None, None, false)
        .unwrap();
    assert!(!created);
    assert_same(&store.get(&ctx, "foo-1").unwrap(), &changed);

    let listed = store.list(&ctx).unwrap();
    assert_eq!(listed.len(), 1);
    assert_same(&listed.items[0], &changed);

    store.delete(&ctx, "foo-1", None).unwrap();
    assert!(store.get(&ctx, "foo-1").unwrap_err().is_not_found());
    assert!(store.list(&ctx).unwrap().is_empty());
}

/// Run the whole contract, building a fresh store for each rule.
pub fn run_all<S, F>(mut fresh: F)
where
    S: ResourceStorage<Widget>,
    F: FnMut() -> S,
{
    get_after_create(&fresh());
    create_twice_fails(&fresh());
    get_missing_not_found(&fresh());
    delete_missing_not_found(&fresh());
    update_missing_without_force(&fresh());
    upsert_creates(&fresh());
    update_sees_old_object(&fresh());
    update_validation_rejects(&fresh());
    create_validation_rejects(&fresh());
    delete_validation_rejects(&fresh());
    delete_returns_object(&fresh());
    list_and_delete_collection(&fresh());
    delete_collection_validation_aborts(&fresh());
    dot_prefixed_names_listed(&fresh());
    namespace_isolation(&fresh());
    namespace_mismatch_rejected(&fresh());
    invalid_names_rejected(&fresh());
    end_to_end(&fresh());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::filepath::FilepathStore;
    use crate::memory::InMemoryStore;
    use apistore_types::GroupVersionKind;

    #[test]
    fn in_memory_store_meets_contract() {
        run_all(|| InMemoryStore::new(widgets(), true));
    }

    #[test]
    fn filepath_store_meets_contract() {
        let mut dirs = Vec::new();
        run_all(|| {
            let dir = tempfile::tempdir().unwrap();
            let store = FilepathStore::new(widgets(), JsonCodec::new(), dir.path(), true).unwrap();
            dirs.push(dir);
            store
        });
    }

    #[test]
    fn filepath_store_with_typed_codec_meets_contract() {
        let kind = GroupVersionKind::new("testing.apistore.dev", "v1", "Widget");
        let mut dirs = Vec::new();
        run_all(|| {
            let dir = tempfile::tempdir().unwrap();
            let codec = JsonCodec::for_kind(kind.clone()).pretty(true);
            let store = FilepathStore::new(widgets(), codec, dir.path(), true).unwrap();
            dirs.push(dir);
            store
        });
    }
}
