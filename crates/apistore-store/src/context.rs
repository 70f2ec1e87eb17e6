use apistore_types::Resource;

use crate::error::{StoreError, StoreResult};

/// Per-request context handed to every storage operation and hook.
///
/// Carries the request namespace. An empty namespace means "all
/// namespaces", the same as no namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    namespace: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: (!namespace.is_empty()).then_some(namespace),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The namespace an object should be stored under.
    ///
    /// The request namespace wins; an object carrying a different namespace
    /// is rejected. Without a request namespace the object's own namespace
    /// is used.
    pub fn namespace_for<'a, T: Resource>(&'a self, obj: &'a T) -> StoreResult<Option<&'a str>> {
        match (self.namespace(), obj.namespace().filter(|ns| !ns.is_empty())) {
            (Some(request), Some(object)) if request != object => {
                Err(StoreError::ValidationFailed(format!(
                    "namespace of the object ({object}) does not match the namespace of the request ({request})"
                )))
            }
            (Some(request), _) => Ok(Some(request)),
            (None, object) => Ok(object),
        }
    }
}
