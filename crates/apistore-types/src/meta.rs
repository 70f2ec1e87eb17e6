use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata carried by every stored object.
///
/// Only `name` and `namespace` take part in storage identity. The remaining
/// fields belong to the caller; stores persist them verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Opaque version token. Key-value backends set it to the revision of the
    /// last write; the filesystem backend leaves it untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Metadata for a cluster-scoped object.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Metadata for a namespaced object.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }
}

/// Metadata attached to a list response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_are_omitted() {
        let meta = ObjectMeta::named("foo-1");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "foo-1" }));
    }

    #[test]
    fn camel_case_field_names() {
        let mut meta = ObjectMeta::namespaced("ns1", "foo-1");
        meta.resource_version = Some("7".into());
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["resourceVersion"], "7");
        assert_eq!(json["namespace"], "ns1");
    }

    #[test]
    fn missing_fields_default() {
        let meta: ObjectMeta = serde_json::from_str("{}").unwrap();
        assert_eq!(meta, ObjectMeta::default());
    }
}
