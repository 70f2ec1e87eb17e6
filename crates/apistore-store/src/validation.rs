//! Caller-supplied hooks.
//!
//! Hooks are optional: `None` means skip. A hook that returns an error
//! aborts the operation before any side effect, and the error reaches the
//! caller unchanged.

use apistore_types::Resource;

use crate::context::RequestContext;
use crate::error::StoreResult;

/// Validates an object about to be created or deleted.
pub type ValidateObjectFn<'a, T> = &'a (dyn Fn(&RequestContext, &T) -> StoreResult<()> + Send + Sync);

/// Validates an update; receives `(new, old)`.
pub type ValidateUpdateFn<'a, T> =
    &'a (dyn Fn(&RequestContext, &T, &T) -> StoreResult<()> + Send + Sync);

pub fn run_object_validation<T>(
    hook: Option<ValidateObjectFn<'_, T>>,
    ctx: &RequestContext,
    obj: &T,
) -> StoreResult<()> {
    match hook {
        Some(validate) => validate(ctx, obj),
        None => Ok(()),
    }
}

pub fn run_update_validation<T>(
    hook: Option<ValidateUpdateFn<'_, T>>,
    ctx: &RequestContext,
    new: &T,
    old: &T,
) -> StoreResult<()> {
    match hook {
        Some(validate) => validate(ctx, new, old),
        None => Ok(()),
    }
}

/// Produces the object an update should write.
///
/// Receives the current object, or `None` when the update is creating it.
/// Any `FnOnce(&RequestContext, Option<&T>) -> StoreResult<T>` qualifies.
pub trait UpdatedObjectInfo<T> {
    fn updated_object(self, ctx: &RequestContext, old: Option<&T>) -> StoreResult<T>;
}

impl<T, F> UpdatedObjectInfo<T> for F
where
    F: FnOnce(&RequestContext, Option<&T>) -> StoreResult<T>,
{
    fn updated_object(self, ctx: &RequestContext, old: Option<&T>) -> StoreResult<T> {
        self(ctx, old)
    }
}

/// Update info that ignores the current object and writes a fixed one.
#[derive(Clone, Debug)]
pub struct ReplaceWith<T>(pub T);

impl<T: Resource> UpdatedObjectInfo<T> for ReplaceWith<T> {
    fn updated_object(self, _ctx: &RequestContext, _old: Option<&T>) -> StoreResult<T> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use apistore_types::{impl_resource, ObjectMeta};
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Festival {
        metadata: ObjectMeta,
        year: u32,
    }
    impl_resource!(Festival);

    #[test]
    fn absent_hook_passes() {
        let ctx = RequestContext::new();
        assert!(run_object_validation::<Festival>(None, &ctx, &Festival::default()).is_ok());
        assert!(run_update_validation::<Festival>(None, &ctx, &Festival::default(), &Festival::default()).is_ok());
    }

    #[test]
    fn hook_error_is_returned_verbatim() {
        let ctx = RequestContext::new();
        let reject: ValidateObjectFn<'_, Festival> = &|_, f| {
            Err(StoreError::ValidationFailed(format!("year {} too early", f.year)))
        };
        let err = run_object_validation(Some(reject), &ctx, &Festival::default()).unwrap_err();
        assert_eq!(err.to_string(), "validation failed: year 0 too early");
    }

    #[test]
    fn update_hook_sees_new_and_old() {
        let ctx = RequestContext::new();
        let monotonic: ValidateUpdateFn<'_, Festival> = &|_, new, old| {
            if new.year < old.year {
                return Err(StoreError::ValidationFailed("year went backwards".into()));
            }
            Ok(())
        };
        let old = Festival { year: 2020, ..Default::default() };
        let new = Festival { year: 2019, ..Default::default() };
        assert!(run_update_validation(Some(monotonic), &ctx, &new, &old).is_err());
        assert!(run_update_validation(Some(monotonic), &ctx, &old, &new).is_ok());
    }

    #[test]
    fn closure_update_info_receives_old() {
        let ctx = RequestContext::new();
        let old = Festival { year: 2020, ..Default::default() };
        let bump = |_: &RequestContext, old: Option<&Festival>| -> StoreResult<Festival> {
            let mut next = old.cloned().unwrap_or_default();
            next.year += 1;
            Ok(next)
        };
        assert_eq!(bump.updated_object(&ctx, Some(&old)).unwrap().year, 2021);
    }

    #[test]
    fn replace_with_ignores_old() {
        let ctx = RequestContext::new();
        let fixed = Festival { year: 1999, ..Default::default() };
        let old = Festival { year: 2020, ..Default::default() };
        assert_eq!(ReplaceWith(fixed.clone()).updated_object(&ctx, Some(&old)).unwrap(), fixed);
    }
}
