use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::meta::{ListMeta, ObjectMeta};

/// A structured, identity-bearing value that a store can persist.
///
/// The store never interprets an object beyond the metadata exposed here;
/// everything else round-trips through the codec untouched. `Default`
/// provides the blank object returned by `new_object()`.
pub trait Resource: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static {
    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }
}

/// Implement [`Resource`] for a struct with a `metadata: ObjectMeta` field.
///
/// ```
/// use apistore_types::{impl_resource, ObjectMeta, Resource};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, Default, Serialize, Deserialize)]
/// struct Burger {
///     metadata: ObjectMeta,
///     patties: u32,
/// }
/// impl_resource!(Burger);
///
/// let b = Burger { metadata: ObjectMeta::named("double"), patties: 2 };
/// assert_eq!(b.name(), "double");
/// ```
#[macro_export]
macro_rules! impl_resource {
    ($ty:ty) => {
        impl $crate::Resource for $ty {
            fn meta(&self) -> &$crate::ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut $crate::ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

/// A materialized collection of objects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: Resource")]
pub struct ResourceList<T: Resource> {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<T>,
}

impl<T: Resource> ResourceList<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            metadata: ListMeta::default(),
            items,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Find an item by namespace and name.
    pub fn find(&self, namespace: Option<&str>, name: &str) -> Option<&T> {
        self.items
            .iter()
            .find(|item| item.name() == name && item.namespace() == namespace)
    }
}

impl<T: Resource> Default for ResourceList<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: Resource> IntoIterator for ResourceList<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
