use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::lock::LockMode;

/// Configuration for a filesystem-backed store.
///
/// ```toml
/// root = "/data"
/// extension = "json"
/// sync_writes = true
///
/// [lock_mode]
/// mode = "per-key"
/// stripes = 64
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory under which `<group>/<resource>` trees are created.
    pub root: PathBuf,
    /// Suffix of object files, without the dot.
    pub extension: String,
    /// Per-object serialization.
    pub lock_mode: LockMode,
    /// `fsync` each object before it is renamed into place.
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/data"),
            extension: "json".into(),
            lock_mode: LockMode::default(),
            sync_writes: true,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(source: &str) -> StoreResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| StoreError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.extension.is_empty() || self.extension.contains(['.', '/', '\\']) {
            return Err(StoreError::InvalidConfiguration(format!(
                "extension {:?} must be a non-empty suffix without dots or separators",
                self.extension
            )));
        }
        if format!(".{}", self.extension) == crate::path::TEMP_FILE_SUFFIX {
            return Err(StoreError::InvalidConfiguration(format!(
                "extension {:?} is reserved for in-flight writes",
                self.extension
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert_eq!(c.root, PathBuf::from("/data"));
        assert_eq!(c.extension, "json");
        assert_eq!(c.lock_mode, LockMode::PerKey { stripes: 64 });
        assert!(c.sync_writes);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn parse_partial_toml() {
        let c = StoreConfig::from_toml_str("root = \"/srv/objects\"\nsync_writes = false\n").unwrap();
        assert_eq!(c.root, PathBuf::from("/srv/objects"));
        assert!(!c.sync_writes);
        assert_eq!(c.extension, "json");
    }

    #[test]
    fn parse_lock_mode_table() {
        let c = StoreConfig::from_toml_str("[lock_mode]\nmode = \"none\"\n").unwrap();
        assert_eq!(c.lock_mode, LockMode::None);
    }

    #[test]
    fn reject_bad_extension() {
        assert!(StoreConfig::from_toml_str("extension = \"tar.gz\"").is_err());
        assert!(StoreConfig::from_toml_str("extension = \"\"").is_err());
        assert!(StoreConfig::from_toml_str("extension = \"tmp\"").is_err());
    }

    #[test]
    fn reject_malformed_toml() {
        let err = StoreConfig::from_toml_str("root = ").unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfiguration(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        std::fs::write(&path, "extension = \"yaml\"\n").unwrap();
        assert_eq!(StoreConfig::from_file(&path).unwrap().extension, "yaml");
    }
}
