//! Proxied storage for apistore.
//!
//! Resources can be stored in a key-value datastore reached through an
//! etcd-compatible listener. A [`ProxiedOptionsGetter`] wraps the options
//! getter of a resource and, on first use of a datastore, starts a
//! translation listener in front of it; the storage options handed back
//! point at that listener instead of the datastore itself.
//!
//! # Components
//!
//! - [`LogKv`] -- revisioned key-value datastore, in memory or backed by a
//!   checksummed append-only log
//! - [`build_router`] -- etcd v3 JSON gateway (`/v3/kv/*`) over any [`KvBackend`]
//! - [`EndpointRegistry`] -- one listener per datastore, started on demand
//! - [`ProxiedOptionsGetter`] -- rewrites storage options to the listener
//! - [`KvStore`] -- [`ResourceStorage`](apistore_store::ResourceStorage)
//!   over a [`KvBackend`], guarded by revision compares
//!
//! # Datastores
//!
//! | DSN | Datastore |
//! |-----|-----------|
//! | `""`, `memory://[name]` | in-process, lost on shutdown |
//! | `file://<path>` | log file at `<path>` |
//! | `sqlite://<path>` | SQLite database at `<path>` |

pub mod backend;
pub mod dsn;
pub mod endpoint;
pub mod error;
pub mod getter;
pub mod kv_store;
pub mod options;
pub mod server;
mod wire;

pub use backend::{KvBackend, LogKv};
pub use dsn::Datastore;
pub use endpoint::{EndpointConfig, EndpointRegistry, EtcdConfig, TlsFiles};
pub use error::{KvError, KvResult, ProxyError, ProxyResult};
pub use getter::{EndpointSource, ProxiedOptionsGetter, RestOptionsGetter, StaticOptionsGetter};
pub use kv_store::KvStore;
pub use options::{RestOptions, StorageConfig, TransportConfig};
pub use server::build_router;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use apistore_store::testing::{widget, widgets, Widget};
    use apistore_store::{JsonCodec, RequestContext, ResourceStorage};
    use apistore_types::GroupResource;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    async fn post(endpoint: &str, path: &str, body: serde_json::Value) -> serde_json::Value {
        let addr = endpoint.trim_start_matches("http://");
        let body = body.to_string();
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "POST {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 200"), "unexpected response: {raw}");
        let (_, payload) = raw.split_once("\r\n\r\n").unwrap();
        serde_json::from_str(payload).unwrap()
    }

    fn proxied(registry: &Arc<EndpointRegistry>, dsn: &str) -> ProxiedOptionsGetter<StaticOptionsGetter> {
        let delegate = StaticOptionsGetter::new(RestOptions::new("/registry", vec![dsn.into()]));
        ProxiedOptionsGetter::new(delegate, EndpointSource::ServerList, Arc::clone(registry))
    }

    #[tokio::test]
    async fn listener_speaks_etcd_json() {
        init_tracing();
        let registry = Arc::new(EndpointRegistry::new());
        let getter = proxied(&registry, "memory://tigers");
        let opts = getter
            .rest_options(&GroupResource::new("mysql.example.com", "tigers"))
            .await
            .unwrap();
        let endpoint = &opts.storage_config.transport.server_list[0];

        let put = post(
            endpoint,
            "/v3/kv/put",
            serde_json::json!({ "key": STANDARD.encode("/registry/a"), "value": STANDARD.encode("1") }),
        )
        .await;
        assert_eq!(put["header"]["revision"], "1");

        let range = post(
            endpoint,
            "/v3/kv/range",
            serde_json::json!({ "key": STANDARD.encode("/registry/a") }),
        )
        .await;
        assert_eq!(range["kvs"][0]["value"], STANDARD.encode("1"));
        assert_eq!(range["kvs"][0]["mod_revision"], "1");

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn proxied_resource_round_trip() {
        init_tracing();
        let registry = Arc::new(EndpointRegistry::new());
        let getter = proxied(&registry, "memory://widgets");
        let opts = getter.rest_options(&widgets()).await.unwrap();

        let backend = registry.backend("memory://widgets").await.unwrap().unwrap();
        let store: KvStore<Widget, _> = KvStore::from_options(backend, &opts, widgets(), JsonCodec::new(), true);
        let ctx = RequestContext::with_namespace("ns1");

        store.create(&ctx, widget("ns1", "foo-1", "red", 1), None).unwrap();
        assert_eq!(store.get(&ctx, "foo-1").unwrap().spec.color, "red");

        let (updated, created) = store
            .update(
                &ctx,
                "foo-1",
                apistore_store::ReplaceWith(widget("ns1", "foo-1", "blue", 2)),
                None,
                None,
                false,
            )
            .unwrap();
        assert!(!created);
        assert_eq!(updated.spec.size, 2);
        assert_eq!(store.list(&ctx).unwrap().len(), 1);

        store.delete(&ctx, "foo-1", None).unwrap();
        assert!(store.get(&ctx, "foo-1").unwrap_err().is_not_found());
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn misconfigured_getter_starts_no_listener() {
        let registry = Arc::new(EndpointRegistry::new());
        let delegate = StaticOptionsGetter::new(RestOptions::new(
            "/registry",
            vec!["memory://a".into(), "memory://b".into()],
        ));
        let getter = ProxiedOptionsGetter::new(delegate, EndpointSource::ServerList, Arc::clone(&registry));
        assert!(matches!(
            getter.rest_options(&widgets()).await.unwrap_err(),
            ProxyError::InvalidConfiguration(_)
        ));
        assert!(registry.is_empty().await);
    }

    #[test]
    fn file_datastore_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = format!("file://{}", dir.path().join("kv.log").display());
        let ctx = RequestContext::with_namespace("ns1");

        {
            let backend = Datastore::parse(&dsn).unwrap().open(false).unwrap();
            let store: KvStore<Widget, _> = KvStore::new(backend, widgets(), JsonCodec::new(), "/registry", true);
            store.create(&ctx, widget("ns1", "foo-1", "red", 1), None).unwrap();
            store.create(&ctx, widget("ns1", "foo-2", "green", 2), None).unwrap();
            store.delete(&ctx, "foo-2", None).unwrap();
        }

        let backend = Datastore::parse(&dsn).unwrap().open(false).unwrap();
        let store: KvStore<Widget, _> = KvStore::new(backend, widgets(), JsonCodec::new(), "/registry", true);
        let list = store.list(&ctx).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.items[0].spec.color, "red");
        assert_eq!(list.metadata.resource_version.as_deref(), Some("3"));
    }
}
