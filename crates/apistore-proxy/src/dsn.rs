use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::backend::{KvBackend, LogKv};
use crate::error::{ProxyError, ProxyResult};

/// Substrate named by a datastore connection string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Datastore {
    /// `""` or `memory://[name]`. Named in-memory datastores are distinct
    /// per registry.
    Memory { name: String },
    /// `file://<path>`: a durable log at `path`.
    File { path: PathBuf },
    /// `sqlite://<path>`: a SQLite database at `path`.
    Sqlite { path: PathBuf },
}

impl Datastore {
    /// Parse a DSN. File paths are made absolute and their directory is
    /// canonicalized when it exists, so every spelling of one file names
    /// the same datastore.
    pub fn parse(dsn: &str) -> ProxyResult<Self> {
        let dsn = dsn.trim();
        if dsn.is_empty() {
            return Ok(Self::Memory {
                name: String::new(),
            });
        }
        if let Some(name) = dsn.strip_prefix("memory://") {
            return Ok(Self::Memory { name: name.into() });
        }
        if let Some(path) = dsn.strip_prefix("file://") {
            return Ok(Self::File {
                path: datastore_path("file", path)?,
            });
        }
        if let Some(path) = dsn.strip_prefix("sqlite://") {
            return Ok(Self::Sqlite {
                path: datastore_path("sqlite", path)?,
            });
        }

        let scheme = dsn.split_once("://").map_or(dsn, |(scheme, _)| scheme);
        Err(ProxyError::InvalidConfiguration(format!(
            "unsupported datastore {scheme:?}; expected memory://, file://<path> or sqlite://<path>"
        )))
    }

    /// Open the datastore.
    pub fn open(&self, sync: bool) -> ProxyResult<Arc<dyn KvBackend>> {
        Ok(match self {
            Self::Memory { .. } => Arc::new(LogKv::in_memory()),
            Self::File { path } => Arc::new(LogKv::open(path, sync)?),
            Self::Sqlite { path } => Arc::new(LogKv::open_sqlite(path)?),
        })
    }
}

fn datastore_path(scheme: &str, raw: &str) -> ProxyResult<PathBuf> {
    let raw = raw.split_once('?').map_or(raw, |(path, _)| path);
    let invalid = || {
        ProxyError::InvalidConfiguration(format!("{scheme} datastore requires a file path: {scheme}://<path>"))
    };
    if raw.is_empty() {
        return Err(invalid());
    }

    let path = Path::new(raw);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let absolute = lexical(&absolute);
    let (Some(dir), Some(file)) = (absolute.parent(), absolute.file_name()) else {
        return Err(invalid());
    };

    let dir = match dir.canonicalize() {
        Ok(dir) => dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => dir.to_path_buf(),
        Err(e) => return Err(e.into()),
    };
    Ok(dir.join(file))
}

/// Drop `.` components and resolve `..` against the preceding component.
fn lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl std::fmt::Display for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory { name } => write!(f, "memory://{name}"),
            Self::File { path } => write!(f, "file://{}", path.display()),
            Self::Sqlite { path } => write!(f, "sqlite://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_forms() {
        assert_eq!(Datastore::parse("").unwrap(), Datastore::Memory { name: String::new() });
        assert_eq!(
            Datastore::parse("memory://tigers").unwrap(),
            Datastore::Memory { name: "tigers".into() }
        );
    }

    #[test]
    fn file_form() {
        assert_eq!(
            Datastore::parse("file:///nonexistent-apistore/state/kv.log").unwrap(),
            Datastore::File { path: "/nonexistent-apistore/state/kv.log".into() }
        );
        assert!(Datastore::parse("file://").is_err());
        assert!(Datastore::parse("file:///").is_err());
    }

    #[test]
    fn sqlite_form() {
        assert_eq!(
            Datastore::parse("sqlite:///nonexistent-apistore/db/state.db?_journal=WAL").unwrap(),
            Datastore::Sqlite { path: "/nonexistent-apistore/db/state.db".into() }
        );
        assert!(Datastore::parse("sqlite://").is_err());
    }

    #[test]
    fn path_spellings_normalize() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap().join("kv.log");
        for spelling in [
            dir.path().join("kv.log"),
            dir.path().join(".").join("kv.log"),
            dir.path().join("sub").join("..").join("kv.log"),
        ] {
            let parsed = Datastore::parse(&format!("file://{}", spelling.display())).unwrap();
            assert_eq!(parsed, Datastore::File { path: canonical.clone() });
        }
        assert_eq!(
            Datastore::parse("file:///nonexistent-apistore/./a/../kv.log").unwrap(),
            Datastore::File { path: "/nonexistent-apistore/kv.log".into() }
        );
    }

    #[test]
    fn other_datastores_unsupported() {
        for dsn in [
            "mysql://root:pw@tcp(127.0.0.1:3306)/kine",
            "postgres://localhost/kine",
            "etcd://127.0.0.1:2379",
        ] {
            match Datastore::parse(dsn).unwrap_err() {
                ProxyError::InvalidConfiguration(msg) => assert!(msg.contains("unsupported")),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn display_round_trips() {
        for dsn in [
            "memory://a",
            "file:///nonexistent-apistore/kv.log",
            "sqlite:///nonexistent-apistore/state.db",
        ] {
            assert_eq!(Datastore::parse(dsn).unwrap().to_string(), dsn);
        }
    }

    #[test]
    fn open_file_datastore() {
        let dir = tempfile::tempdir().unwrap();
        let store = Datastore::File { path: dir.path().join("kv.log") };
        let kv = store.open(false).unwrap();
        kv.put(b"/a", b"1").unwrap();
        assert_eq!(kv.revision().unwrap(), 1);
    }

    #[test]
    fn open_sqlite_datastore() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = format!("sqlite://{}", dir.path().join("state.db").display());
        let store = Datastore::parse(&dsn).unwrap();
        {
            let kv = store.open(true).unwrap();
            kv.put(b"/a", b"1").unwrap();
        }
        let kv = store.open(true).unwrap();
        assert_eq!(kv.get(b"/a").unwrap().unwrap().value, b"1");
    }
}
