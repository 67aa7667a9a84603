use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::HeaderMap;
use url::Url;

use crate::proxy::ProxyConfig;

/// Configurable options for talking to the origin
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL used for origin-form request targets (reverse proxy mode).
    /// Without it, origin-form targets are resolved against the Host header.
    pub upstream: Option<Url>,

    /// Overall timeout for the entire HTTP request, zero for none
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Maximum time between two reads from the origin, zero for none
    pub read_timeout: Duration,

    /// Whether to follow redirects instead of relaying them
    pub follow_redirects: bool,

    /// Extra HTTP headers added to every upstream request
    pub headers: HeaderMap,

    /// Outbound proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    /// Idle connections kept per origin host
    pub pool_max_idle_per_host: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            upstream: None,
            // Package downloads can be large, so no overall deadline by default
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(90),
            follow_redirects: false,
            headers: HeaderMap::new(),
            proxy: None,
            use_system_proxy: false,
            pool_max_idle_per_host: 8,
        }
    }
}

impl UpstreamConfig {
    pub fn builder() -> crate::builder::UpstreamConfigBuilder {
        crate::builder::UpstreamConfigBuilder::new()
    }
}

/// Everything needed to start the proxy
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Absolute path of the cache root directory
    pub cache_root: PathBuf,

    /// Address the proxy listens on
    pub bind_addr: SocketAddr,

    /// Optional regex filters file
    pub filters_path: Option<PathBuf>,

    /// Number of body chunks buffered between the upstream and the client
    pub relay_buffer: usize,

    pub upstream: UpstreamConfig,
}

impl ServerConfig {
    pub fn new(cache_root: impl Into<PathBuf>, bind_addr: SocketAddr) -> Self {
        Self {
            cache_root: cache_root.into(),
            bind_addr,
            filters_path: None,
            relay_buffer: 16,
            upstream: UpstreamConfig::default(),
        }
    }

    pub fn with_filters(mut self, path: impl Into<PathBuf>) -> Self {
        self.filters_path = Some(path.into());
        self
    }

    pub fn with_upstream(mut self, upstream: UpstreamConfig) -> Self {
        self.upstream = upstream;
        self
    }
}
