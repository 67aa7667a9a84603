//! # Builder for UpstreamConfig
//!
//! Fluent construction of [`UpstreamConfig`] values.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use pkgproxy_engine::UpstreamConfig;
//! use pkgproxy_engine::proxy::{ProxyConfig, ProxyType};
//!
//! let config = UpstreamConfig::builder()
//!     .with_connect_timeout(Duration::from_secs(5))
//!     .with_header("X-Mirror-Client", "pkgproxy")
//!     .with_upstream("http://deb.debian.org")
//!     .unwrap()
//!     .with_proxy(ProxyConfig {
//!         url: "http://proxy.example.com:8080".to_string(),
//!         proxy_type: ProxyType::Http,
//!         auth: None,
//!     })
//!     .build();
//!
//! assert!(config.upstream.is_some());
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::{ProxyError, UpstreamConfig, proxy::ProxyConfig};

/// Builder for creating UpstreamConfig instances with a fluent API
#[derive(Debug, Clone, Default)]
pub struct UpstreamConfigBuilder {
    config: UpstreamConfig,
}

impl UpstreamConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve origin-form targets against `base`
    pub fn with_upstream(mut self, base: impl AsRef<str>) -> Result<Self, ProxyError> {
        let url = Url::parse(base.as_ref())
            .map_err(|e| ProxyError::InvalidTarget(format!("{}: {e}", base.as_ref())))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProxyError::InvalidTarget(format!(
                "unsupported upstream scheme {}",
                url.scheme()
            )));
        }
        self.config.upstream = Some(url);
        Ok(self)
    }

    /// Set the overall timeout for the entire HTTP request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Add a custom HTTP header
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Add a set of custom headers. Repeated names keep every value.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.config.headers.append(name.clone(), value.clone());
        }
        self
    }

    /// Route upstream requests through an outbound proxy
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self.config.use_system_proxy = false;
        self
    }

    pub fn with_system_proxy(mut self, enabled: bool) -> Self {
        self.config.use_system_proxy = enabled;
        self
    }

    pub fn build(self) -> UpstreamConfig {
        self.config
    }
}
