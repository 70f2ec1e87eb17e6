//! Mapping object identities to storage locations.
//!
//! A [`Scope`] validates `(namespace, name)` against one collection's
//! scoping rules. [`PathResolver`] turns the result into a file path and
//! [`KeyResolver`] into a key for key-value substrates. Resolution is pure;
//! nothing here touches the filesystem.
//!
//! Layouts:
//!
//! ```text
//! file: <root>/<group>/<resource>[/<namespace>]/<name>.<ext>
//! key:  <prefix>/<group>/<resource>[/<namespace>]/<name>
//! ```
//!
//! The core group (empty string) contributes no segment.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use apistore_types::{validate_path_segment, GroupResource};

use crate::error::{StoreError, StoreResult};

/// Name prefix of in-flight write files.
pub const TEMP_FILE_PREFIX: &str = ".apistore-";

/// Name suffix of in-flight write files.
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Identity of one object after scoping rules have been applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey<'a> {
    pub namespace: Option<&'a str>,
    pub name: &'a str,
}

impl std::fmt::Display for ObjectKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Scoping rules for one collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    group_resource: GroupResource,
    namespaced: bool,
}

impl Scope {
    pub fn new(group_resource: GroupResource, namespaced: bool) -> Self {
        Self {
            group_resource,
            namespaced,
        }
    }

    pub fn group_resource(&self) -> &GroupResource {
        &self.group_resource
    }

    pub fn namespaced(&self) -> bool {
        self.namespaced
    }

    /// Validate and scope a single-object identity.
    ///
    /// Namespaced collections require a namespace; cluster-scoped
    /// collections ignore one.
    pub fn object<'a>(&self, namespace: Option<&'a str>, name: &'a str) -> StoreResult<ObjectKey<'a>> {
        validate_path_segment(name)?;
        Ok(ObjectKey {
            namespace: self.required_namespace(namespace)?,
            name,
        })
    }

    /// Validate and scope a collection request.
    ///
    /// Returns `None` when the whole collection (every namespace) is meant.
    pub fn collection<'a>(&self, namespace: Option<&'a str>) -> StoreResult<Option<&'a str>> {
        if !self.namespaced {
            return Ok(None);
        }
        if let Some(ns) = namespace {
            validate_path_segment(ns)?;
        }
        Ok(namespace)
    }

    fn required_namespace<'a>(&self, namespace: Option<&'a str>) -> StoreResult<Option<&'a str>> {
        if !self.namespaced {
            return Ok(None);
        }
        match namespace {
            Some(ns) => {
                validate_path_segment(ns)?;
                Ok(Some(ns))
            }
            None => Err(StoreError::NamespaceRequired {
                resource: self.group_resource.to_string(),
            }),
        }
    }

    fn segments(&self) -> impl Iterator<Item = &str> + '_ {
        [self.group_resource.group.as_str(), self.group_resource.resource.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
    }
}

/// Resolves identities to files under a root directory.
#[derive(Clone, Debug)]
pub struct PathResolver {
    scope: Scope,
    dir: PathBuf,
    extension: String,
}

impl PathResolver {
    pub fn new(root: impl AsRef<Path>, scope: Scope, extension: impl Into<String>) -> Self {
        let mut dir = root.as_ref().to_path_buf();
        dir.extend(scope.segments());
        Self {
            scope,
            dir,
            extension: extension.into(),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// `<root>/<group>/<resource>`.
    pub fn root(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn object_path(&self, key: &ObjectKey<'_>) -> PathBuf {
        let mut path = self.dir.clone();
        if let Some(ns) = key.namespace {
            path.push(ns);
        }
        path.push(format!("{}.{}", key.name, self.extension));
        path
    }

    /// Directory holding a namespace's objects.
    pub fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.dir.join(namespace)
    }

    /// Directory to walk for a collection request, and the depth at which
    /// object files sit below it.
    pub fn collection_dir(&self, namespace: Option<&str>) -> (PathBuf, usize) {
        match namespace {
            Some(ns) => (self.namespace_dir(ns), 1),
            None if self.scope.namespaced() => (self.dir.clone(), 2),
            None => (self.dir.clone(), 1),
        }
    }

    /// Whether a walked file holds an object. In-flight writes and files
    /// with other extensions are skipped; other dot-files are objects.
    pub fn is_object_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(OsStr::to_str) else {
            return false;
        };
        let in_flight = name.starts_with(TEMP_FILE_PREFIX) && name.ends_with(TEMP_FILE_SUFFIX);
        !in_flight && path.extension() == Some(OsStr::new(&self.extension))
    }
}

/// Resolves identities to keys in a flat key space.
#[derive(Clone, Debug)]
pub struct KeyResolver {
    scope: Scope,
    base: String,
}

impl KeyResolver {
    pub fn new(prefix: &str, scope: Scope) -> Self {
        let mut base = prefix.trim_end_matches('/').to_string();
        for segment in scope.segments() {
            base.push('/');
            base.push_str(segment);
        }
        Self { scope, base }
    }

    /// Keys under `<prefix><resource_prefix>` instead of the group and
    /// resource segments. An empty `resource_prefix` falls back to
    /// [`KeyResolver::new`].
    pub fn with_resource_prefix(prefix: &str, resource_prefix: &str, scope: Scope) -> Self {
        let resource_prefix = resource_prefix.trim_matches('/');
        if resource_prefix.is_empty() {
            return Self::new(prefix, scope);
        }
        let base = format!("{}/{resource_prefix}", prefix.trim_end_matches('/'));
        Self { scope, base }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn object_key(&self, key: &ObjectKey<'_>) -> String {
        match key.namespace {
            Some(ns) => format!("{}/{ns}/{}", self.base, key.name),
            None => format!("{}/{}", self.base, key.name),
        }
    }

    /// Key prefix covering a collection request. Always ends in `/` so one
    /// namespace never matches another that shares its leading characters.
    pub fn collection_prefix(&self, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!("{}/{ns}/", self.base),
            None => format!("{}/", self.base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn burgers(namespaced: bool) -> Scope {
        Scope::new(GroupResource::new("filepath.example.com", "burgers"), namespaced)
    }

    #[test]
    fn namespaced_object_path() {
        let r = PathResolver::new("/data", burgers(true), "json");
        let key = r.scope().object(Some("ns1"), "foo-1").unwrap();
        assert_eq!(
            r.object_path(&key),
            PathBuf::from("/data/filepath.example.com/burgers/ns1/foo-1.json")
        );
    }

    #[test]
    fn cluster_object_path_ignores_namespace() {
        let r = PathResolver::new("/data", burgers(false), "json");
        let key = r.scope().object(Some("ns1"), "foo-1").unwrap();
        assert_eq!(
            r.object_path(&key),
            PathBuf::from("/data/filepath.example.com/burgers/foo-1.json")
        );
    }

    #[test]
    fn core_group_has_no_segment() {
        let r = PathResolver::new("/data", Scope::new(GroupResource::new("", "pods"), false), "json");
        assert_eq!(r.root(), Path::new("/data/pods"));
    }

    #[test]
    fn namespace_required() {
        let err = burgers(true).object(None, "foo-1").unwrap_err();
        assert!(matches!(err, StoreError::NamespaceRequired { .. }));
    }

    #[test]
    fn traversal_names_rejected() {
        let scope = burgers(true);
        assert!(matches!(
            scope.object(Some("ns1"), "../escape").unwrap_err(),
            StoreError::InvalidName { .. }
        ));
        assert!(matches!(
            scope.object(Some(".."), "foo").unwrap_err(),
            StoreError::InvalidName { .. }
        ));
        assert!(scope.collection(Some("a/b")).is_err());
    }

    #[test]
    fn collection_dirs() {
        let r = PathResolver::new("/data", burgers(true), "json");
        assert_eq!(
            r.collection_dir(Some("ns1")),
            (PathBuf::from("/data/filepath.example.com/burgers/ns1"), 1)
        );
        assert_eq!(
            r.collection_dir(None),
            (PathBuf::from("/data/filepath.example.com/burgers"), 2)
        );

        let cluster = PathResolver::new("/data", burgers(false), "json");
        assert_eq!(cluster.collection_dir(None).1, 1);
    }

    #[test]
    fn object_file_filter() {
        let r = PathResolver::new("/data", burgers(false), "json");
        assert!(r.is_object_file(Path::new("/x/foo.json")));
        assert!(!r.is_object_file(Path::new("/x/foo.yaml")));
        assert!(!r.is_object_file(Path::new("/x/.apistore-abc.tmp")));
        assert!(r.is_object_file(Path::new("/x/.hidden.json")));
        assert!(r.is_object_file(Path::new("/x/....json")));
        assert!(r.is_object_file(Path::new("/x/.apistore-abc.json")));
        assert!(!r.is_object_file(Path::new("/x/foo")));
    }

    #[test]
    fn keys() {
        let r = KeyResolver::new("/registry/", burgers(true));
        let key = r.scope().object(Some("ns1"), "foo-1").unwrap();
        assert_eq!(r.object_key(&key), "/registry/filepath.example.com/burgers/ns1/foo-1");
        assert_eq!(r.collection_prefix(Some("ns1")), "/registry/filepath.example.com/burgers/ns1/");
        assert_eq!(r.collection_prefix(None), "/registry/filepath.example.com/burgers/");
    }

    #[test]
    fn keys_under_resource_prefix() {
        let r = KeyResolver::with_resource_prefix("/registry/", "/tigers/", burgers(true));
        let key = r.scope().object(Some("ns1"), "foo-1").unwrap();
        assert_eq!(r.object_key(&key), "/registry/tigers/ns1/foo-1");
        assert_eq!(r.collection_prefix(None), "/registry/tigers/");

        let fallback = KeyResolver::with_resource_prefix("/registry", "", burgers(true));
        assert_eq!(fallback.collection_prefix(None), "/registry/filepath.example.com/burgers/");
    }

    #[test]
    fn key_display() {
        let key = ObjectKey { namespace: Some("ns1"), name: "foo-1" };
        assert_eq!(key.to_string(), "ns1/foo-1");
    }

    proptest! {
        #[test]
        fn distinct_identities_never_collide(
            ns_a in "[a-z0-9.-]{1,12}",
            name_a in "[a-z0-9.-]{1,12}",
            ns_b in "[a-z0-9.-]{1,12}",
            name_b in "[a-z0-9.-]{1,12}",
        ) {
            let r = PathResolver::new("/data", burgers(true), "json");
            let k = KeyResolver::new("/registry", burgers(true));
            let (Ok(a), Ok(b)) = (r.scope().object(Some(&ns_a), &name_a), r.scope().object(Some(&ns_b), &name_b)) else {
                return Ok(());
            };
            if (ns_a.as_str(), name_a.as_str()) != (ns_b.as_str(), name_b.as_str()) {
                prop_assert_ne!(r.object_path(&a), r.object_path(&b));
                prop_assert_ne!(k.object_key(&a), k.object_key(&b));
            }
        }
    }
}
