//! Translation listeners, one per datastore.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::KvBackend;
use crate::dsn::Datastore;
use crate::error::{ProxyError, ProxyResult};
use crate::server::build_router;

/// TLS material for reaching a listener. Empty means plain HTTP.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsFiles {
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl TlsFiles {
    pub fn is_empty(&self) -> bool {
        self.ca_file.is_none() && self.cert_file.is_none() && self.key_file.is_none()
    }
}

/// What to listen on and which datastore to translate to.
///
/// ```toml
/// endpoint = "file:///var/lib/apistore/kv.log"
/// listen_address = "127.0.0.1:2379"
/// sync_writes = true
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Datastore DSN.
    pub endpoint: String,
    pub listen_address: String,
    /// Server TLS for the listener.
    pub tls: Option<TlsFiles>,
    /// `fsync` the datastore log on every write.
    pub sync_writes: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            listen_address: "127.0.0.1:0".into(),
            tls: None,
            sync_writes: true,
        }
    }
}

impl EndpointConfig {
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(source: &str) -> ProxyResult<Self> {
        toml::from_str(source).map_err(|e| ProxyError::InvalidConfiguration(e.to_string()))
    }

    pub fn from_file(path: &Path) -> ProxyResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

/// How clients reach a running listener.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub tls: TlsFiles,
}

struct RunningEndpoint {
    listen_address: String,
    sync_writes: bool,
    etcd: EtcdConfig,
    backend: Arc<dyn KvBackend>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Listeners started so far, keyed by datastore.
///
/// Dropping the registry stops every listener it started.
#[derive(Default)]
pub struct EndpointRegistry {
    running: Mutex<HashMap<String, RunningEndpoint>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a listener for `config.endpoint`, or return the one already
    /// serving that datastore.
    pub async fn listen(&self, config: &EndpointConfig) -> ProxyResult<EtcdConfig> {
        let datastore = Datastore::parse(&config.endpoint)?;
        let key = datastore.to_string();

        if config.tls.as_ref().is_some_and(|tls| !tls.is_empty()) {
            return Err(ProxyError::InvalidConfiguration(
                "TLS listeners are not supported; terminate TLS in front of the listener".into(),
            ));
        }

        let mut running = self.running.lock().await;
        if let Some(existing) = running.get(&key) {
            if existing.listen_address != config.listen_address
                || existing.sync_writes != config.sync_writes
            {
                warn!(
                    datastore = %key,
                    listen_address = %existing.listen_address,
                    sync_writes = existing.sync_writes,
                    "listener already running with different settings; keeping them"
                );
            }
            debug!(datastore = %key, "reusing listener");
            return Ok(existing.etcd.clone());
        }

        let sync = config.sync_writes;
        let backend = tokio::task::spawn_blocking(move || datastore.open(sync))
            .await
            .map_err(|e| ProxyError::InvalidConfiguration(format!("datastore open aborted: {e}")))??;

        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|source| ProxyError::Listen {
                address: config.listen_address.clone(),
                source,
            })?;
        let addr = listener.local_addr()?;

        let app = build_router(Arc::clone(&backend));
        let (shutdown, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = stopped.await;
            });
            if let Err(e) = server.await {
                warn!(%addr, error = %e, "listener failed");
            }
        });
        info!(%addr, datastore = %key, "listener started");

        let etcd = EtcdConfig {
            endpoints: vec![format!("http://{addr}")],
            tls: TlsFiles::default(),
        };
        running.insert(
            key,
            RunningEndpoint {
                listen_address: config.listen_address.clone(),
                sync_writes: config.sync_writes,
                etcd: etcd.clone(),
                backend,
                shutdown,
                task,
            },
        );
        Ok(etcd)
    }

    /// The datastore behind a running listener, for in-process access.
    pub async fn backend(&self, dsn: &str) -> ProxyResult<Option<Arc<dyn KvBackend>>> {
        let key = Datastore::parse(dsn)?.to_string();
        Ok(self
            .running
            .lock()
            .await
            .get(&key)
            .map(|endpoint| Arc::clone(&endpoint.backend)))
    }

    /// Number of running listeners.
    pub async fn len(&self) -> usize {
        self.running.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop every listener and wait for them to finish.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, RunningEndpoint)> = self.running.lock().await.drain().collect();
        for (key, endpoint) in drained {
            let _ = endpoint.shutdown.send(());
            if let Err(e) = endpoint.task.await {
                warn!(datastore = %key, error = %e, "listener task ended abnormally");
            }
            debug!(datastore = %key, "listener stopped");
        }
    }
}

impl std::fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRegistry").finish_non_exhaustive()
    }
}
