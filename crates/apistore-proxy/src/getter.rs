//! REST options getters.
//!
//! A getter resolves the storage options for one resource. The proxied
//! getter wraps another and redirects storage to a translation listener in
//! front of the configured datastore.

use std::sync::Arc;

use apistore_types::GroupResource;
use async_trait::async_trait;
use tracing::debug;

use crate::endpoint::{EndpointConfig, EndpointRegistry};
use crate::error::{ProxyError, ProxyResult};
use crate::options::RestOptions;

#[async_trait]
pub trait RestOptionsGetter: Send + Sync {
    async fn rest_options(&self, resource: &GroupResource) -> ProxyResult<RestOptions>;
}

#[async_trait]
impl<G: RestOptionsGetter + ?Sized> RestOptionsGetter for Arc<G> {
    async fn rest_options(&self, resource: &GroupResource) -> ProxyResult<RestOptions> {
        (**self).rest_options(resource).await
    }
}

/// Hands out the same options for every resource, filling in the default
/// resource prefix when none is set.
#[derive(Clone, Debug, Default)]
pub struct StaticOptionsGetter {
    options: RestOptions,
}

impl StaticOptionsGetter {
    pub fn new(options: RestOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl RestOptionsGetter for StaticOptionsGetter {
    async fn rest_options(&self, resource: &GroupResource) -> ProxyResult<RestOptions> {
        let mut options = self.options.clone();
        if options.resource_prefix.is_empty() {
            options.resource_prefix = RestOptions::default_resource_prefix(resource);
        }
        Ok(options)
    }
}

/// Where the proxied getter finds its datastore.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointSource {
    /// The single entry of the delegate's server list is the datastore DSN.
    ServerList,
    /// A fixed endpoint; the delegate's server list is ignored.
    Fixed(EndpointConfig),
}

/// Rewrites delegate options to point at a translation listener.
///
/// Fails closed: any error setting up the listener is returned, never the
/// unmodified delegate options.
pub struct ProxiedOptionsGetter<G> {
    delegate: G,
    source: EndpointSource,
    registry: Arc<EndpointRegistry>,
}

impl<G: RestOptionsGetter> ProxiedOptionsGetter<G> {
    pub fn new(delegate: G, source: EndpointSource, registry: Arc<EndpointRegistry>) -> Self {
        Self {
            delegate,
            source,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    fn endpoint_config(&self, options: &RestOptions) -> ProxyResult<EndpointConfig> {
        match &self.source {
            EndpointSource::Fixed(config) => Ok(config.clone()),
            EndpointSource::ServerList => match options.storage_config.transport.server_list.as_slice() {
                [dsn] => Ok(EndpointConfig::for_endpoint(dsn.clone())),
                other => Err(ProxyError::InvalidConfiguration(format!(
                    "expected exactly one datastore endpoint in the server list, found {}",
                    other.len()
                ))),
            },
        }
    }
}

#[async_trait]
impl<G: RestOptionsGetter> RestOptionsGetter for ProxiedOptionsGetter<G> {
    async fn rest_options(&self, resource: &GroupResource) -> ProxyResult<RestOptions> {
        let mut options = self.delegate.rest_options(resource).await?;
        let config = self.endpoint_config(&options)?;
        let etcd = self.registry.listen(&config).await?;

        let transport = &mut options.storage_config.transport;
        transport.server_list = etcd.endpoints;
        transport.trusted_ca_file = etcd.tls.ca_file;
        transport.cert_file = etcd.tls.cert_file;
        transport.key_file = etcd.tls.key_file;
        debug!(
            resource = %resource,
            servers = ?transport.server_list,
            "storage redirected to listener"
        );
        Ok(options)
    }
}

impl<G> std::fmt::Debug for ProxiedOptionsGetter<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxiedOptionsGetter")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tigers() -> GroupResource {
        GroupResource::new("mysql.example.com", "tigers")
    }

    struct FailingGetter;

    #[async_trait]
    impl RestOptionsGetter for FailingGetter {
        async fn rest_options(&self, _resource: &GroupResource) -> ProxyResult<RestOptions> {
            Err(ProxyError::InvalidConfiguration("delegate down".into()))
        }
    }

    #[tokio::test]
    async fn static_getter_fills_resource_prefix() {
        let getter = StaticOptionsGetter::new(RestOptions::new("/registry", vec![]));
        let opts = getter.rest_options(&tigers()).await.unwrap();
        assert_eq!(opts.resource_prefix, "/mysql.example.com/tigers");
    }

    #[tokio::test]
    async fn server_list_is_rewritten() {
        let registry = Arc::new(EndpointRegistry::new());
        let delegate = StaticOptionsGetter::new(RestOptions::new("/registry", vec!["memory://tigers".into()]));
        let getter = ProxiedOptionsGetter::new(delegate, EndpointSource::ServerList, Arc::clone(&registry));

        let opts = getter.rest_options(&tigers()).await.unwrap();
        let transport = &opts.storage_config.transport;
        assert_eq!(transport.server_list.len(), 1);
        assert!(transport.server_list[0].starts_with("http://127.0.0.1:"));
        assert!(transport.trusted_ca_file.is_none());
        assert_eq!(opts.storage_config.prefix, "/registry");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn two_endpoints_rejected_before_listening() {
        let registry = Arc::new(EndpointRegistry::new());
        let delegate = StaticOptionsGetter::new(RestOptions::new(
            "/registry",
            vec!["memory://a".into(), "memory://b".into()],
        ));
        let getter = ProxiedOptionsGetter::new(delegate, EndpointSource::ServerList, Arc::clone(&registry));

        let err = getter.rest_options(&tigers()).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidConfiguration(_)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn empty_server_list_rejected() {
        let registry = Arc::new(EndpointRegistry::new());
        let delegate = StaticOptionsGetter::new(RestOptions::new("/registry", vec![]));
        let getter = ProxiedOptionsGetter::new(delegate, EndpointSource::ServerList, Arc::clone(&registry));
        assert!(getter.rest_options(&tigers()).await.is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn fixed_source_ignores_server_list() {
        let registry = Arc::new(EndpointRegistry::new());
        let delegate = StaticOptionsGetter::new(RestOptions::new(
            "/registry",
            vec!["mysql://one".into(), "mysql://two".into()],
        ));
        let source = EndpointSource::Fixed(EndpointConfig::for_endpoint("memory://tiks"));
        let getter = ProxiedOptionsGetter::new(delegate, source, Arc::clone(&registry));

        let opts = getter.rest_options(&GroupResource::new("sqlite", "tiks")).await.unwrap();
        assert!(opts.storage_config.transport.server_list[0].starts_with("http://"));
        assert!(registry.backend("memory://tiks").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delegate_errors_propagate() {
        let getter = ProxiedOptionsGetter::new(
            FailingGetter,
            EndpointSource::ServerList,
            Arc::new(EndpointRegistry::new()),
        );
        assert!(getter.rest_options(&tigers()).await.is_err());
    }

    #[tokio::test]
    async fn listener_setup_failure_fails_closed() {
        let registry = Arc::new(EndpointRegistry::new());
        let delegate = StaticOptionsGetter::new(RestOptions::new("/registry", vec!["postgres://db".into()]));
        let getter = ProxiedOptionsGetter::new(delegate, EndpointSource::ServerList, registry);
        assert!(matches!(
            getter.rest_options(&tigers()).await.unwrap_err(),
            ProxyError::InvalidConfiguration(_)
        ));
    }
}
