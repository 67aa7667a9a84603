// Upstream fetcher: forwards requests to the origin and hands back a
// streamable response.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Uri;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{self, HeaderMap, HeaderName};
use reqwest::{Client, Method, StatusCode};
use rustls::{ClientConfig, crypto::ring};
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::{debug, info};
use url::Url;

use crate::{ProxyError, UpstreamConfig};

/// A streamed message body, in either direction
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// A request to forward to the origin
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// Streamed as received. `None` when the client sent no body.
    pub body: Option<BodyStream>,
}

impl std::fmt::Debug for UpstreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body", &self.body.is_some())
            .finish()
    }
}

/// Status, headers and streaming body received from the origin
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Anything able to answer a request on behalf of the origin
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, ProxyError>;
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &UpstreamConfig) -> Result<Client, ProxyError> {
    let provider = Arc::new(ring::default_provider());

    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ProxyError::Initialization(format!("TLS protocol versions: {e}")))?
        .with_platform_verifier()
        .map_err(|e| ProxyError::Initialization(format!("TLS verifier: {e}")))?
        .with_no_client_auth();

    // Relay bodies byte-for-byte: no transparent decompression, and redirects
    // go back to the client unless asked otherwise
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .default_headers(config.headers.clone())
        .use_preconfigured_tls(tls_config)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        client_builder = client_builder.proxy(proxy_config.to_reqwest()?);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy for upstream requests");
    } else if config.use_system_proxy {
        // reqwest picks up system proxy settings unless no_proxy() is called
        info!("Using system proxy settings for upstream requests");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for upstream requests");
    }

    client_builder.build().map_err(ProxyError::from)
}

/// [`Upstream`] backed by a real HTTP client
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, ProxyError> {
        Ok(Self {
            client: create_client(config)?,
        })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, ProxyError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(reqwest::Body::wrap_stream(body));
        }

        let response = builder.send().await?;
        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed();

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Work out the absolute URL a request is meant for.
///
/// Absolute-form targets are used as-is. Origin-form targets are appended to
/// `base` when configured, or else sent to the host named by the `Host`
/// header over plain HTTP.
pub fn resolve_target(
    uri: &Uri,
    headers: &HeaderMap,
    base: Option<&Url>,
) -> Result<Url, ProxyError> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string())
            .map_err(|e| ProxyError::InvalidTarget(format!("{uri}: {e}")));
    }

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    let target = if let Some(base) = base {
        format!("{}{}", base.as_str().trim_end_matches('/'), path_and_query)
    } else if let Some(host) = headers.get(header::HOST).and_then(|h| h.to_str().ok()) {
        format!("http://{host}{path_and_query}")
    } else {
        return Err(ProxyError::InvalidTarget(format!(
            "{uri}: no upstream configured and no Host header"
        )));
    };

    Url::parse(&target).map_err(|e| ProxyError::InvalidTarget(format!("{target}: {e}")))
}

/// Remove headers that only apply to a single connection hop, including any
/// listed in the `Connection` header.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| name.trim().parse::<HeaderName>().ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }

    for name in [
        header::CONNECTION,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ] {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}
