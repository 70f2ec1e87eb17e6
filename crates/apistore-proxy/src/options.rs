use std::path::PathBuf;

use apistore_types::GroupResource;
use serde::{Deserialize, Serialize};

/// How the storage layer reaches its datastore.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub server_list: Vec<String>,
    pub key_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub trusted_ca_file: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Key prefix shared by every resource, e.g. `/registry`.
    pub prefix: String,
    pub transport: TransportConfig,
}

/// Storage options resolved for one resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestOptions {
    pub storage_config: StorageConfig,
    /// Per-resource prefix below `storage_config.prefix`.
    pub resource_prefix: String,
}

impl RestOptions {
    /// Options pointing at `server_list` under `prefix`.
    pub fn new(prefix: impl Into<String>, server_list: Vec<String>) -> Self {
        Self {
            storage_config: StorageConfig {
                prefix: prefix.into(),
                transport: TransportConfig {
                    server_list,
                    ..Default::default()
                },
            },
            resource_prefix: String::new(),
        }
    }

    /// `/<group>/<resource>`, or `/<resource>` for the core group.
    pub fn default_resource_prefix(resource: &GroupResource) -> String {
        if resource.group.is_empty() {
            format!("/{}", resource.resource)
        } else {
            format!("/{}/{}", resource.group, resource.resource)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_prefixes() {
        assert_eq!(
            RestOptions::default_resource_prefix(&GroupResource::new("mysql.example.com", "tigers")),
            "/mysql.example.com/tigers"
        );
        assert_eq!(RestOptions::default_resource_prefix(&GroupResource::new("", "pods")), "/pods");
    }

    #[test]
    fn options_from_json() {
        let opts: RestOptions = serde_json::from_str(
            r#"{"storage_config":{"prefix":"/registry","transport":{"server_list":["memory://"]}}}"#,
        )
        .unwrap();
        assert_eq!(opts, RestOptions::new("/registry", vec!["memory://".into()]));
    }
}
