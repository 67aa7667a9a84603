//! # Request Coordinator
//!
//! Drives one proxied request through two stages:
//!
//! 1. [`inspect_request`](Coordinator::inspect_request) looks at the request
//!    and may answer it directly from the cache.
//! 2. [`relay_response`](Coordinator::relay_response) takes the origin's
//!    response, relays it to the client and decides whether to tee it into
//!    the cache.
//!
//! If anything related to the local cache fails, the request is passed
//! upstream rather than failed.

use std::io;
use std::sync::Arc;

use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::Response;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use url::Url;

use crate::cache::{CacheError, CacheKey, CacheStore, RangeRead, RangeSpec, WriteOutcome};
use crate::filter::FilterSet;
use crate::relay::relay;
use crate::stats::Stats;
use crate::upstream::{BodyStream, Upstream, UpstreamRequest, UpstreamResponse, resolve_target, strip_hop_by_hop};
use crate::ProxyError;

/// Per-request state shared by both pipeline stages
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Log correlation id, wraps at 999
    pub id: u64,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// `None` when the path cannot be a cache entry
    pub key: Option<CacheKey>,
    /// Raw `Range` header, if any
    pub range: Option<String>,
    /// Whether a filter exempts this request from caching
    pub filtered: bool,
}

impl RequestContext {
    /// Whether this request may be answered from the cache
    pub fn may_read_cache(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD) && !self.filtered && self.key.is_some()
    }

    /// Whether a 200 answer to this request may be written to the cache
    pub fn may_write_cache(&self) -> bool {
        self.method == Method::GET && !self.filtered && self.range.is_none() && self.key.is_some()
    }
}

pub struct Coordinator {
    store: Arc<CacheStore>,
    filters: Arc<FilterSet>,
    upstream: Arc<dyn Upstream>,
    stats: Arc<Stats>,
    upstream_base: Option<Url>,
    relay_buffer: usize,
}

impl Coordinator {
    pub fn new(
        store: Arc<CacheStore>,
        filters: Arc<FilterSet>,
        upstream: Arc<dyn Upstream>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            store,
            filters,
            upstream,
            stats,
            upstream_base: None,
            relay_buffer: 16,
        }
    }

    /// Resolve origin-form request targets against `base`
    pub fn with_upstream_base(mut self, base: Option<Url>) -> Self {
        self.upstream_base = base;
        self
    }

    pub fn with_relay_buffer(mut self, chunks: usize) -> Self {
        self.relay_buffer = chunks.max(1);
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn filters(&self) -> &Arc<FilterSet> {
        &self.filters
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Answer one request
    pub async fn handle(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let ctx = self.context(&parts);
        let span = info_span!("request", id = ctx.id);

        async move {
            info!(method = %ctx.method, uri = %ctx.uri, "Incoming request");

            if let Some(response) = self.inspect_request(&ctx).await {
                return response;
            }

            let url = match resolve_target(&ctx.uri, &ctx.headers, self.upstream_base.as_ref()) {
                Ok(url) => url,
                Err(e) => {
                    warn!(error = %e, "Cannot resolve request target");
                    return error_response(&e);
                }
            };

            let request = UpstreamRequest {
                method: ctx.method.clone(),
                url,
                headers: forwarded_headers(&ctx),
                body: request_body(body),
            };

            match self.upstream.fetch(request).await {
                Ok(upstream) => self.relay_response(ctx, upstream).await,
                Err(e) => {
                    warn!(error = %e, "Upstream request failed");
                    error_response(&e)
                }
            }
        }
        .instrument(span)
        .await
    }

    fn context(&self, parts: &Parts) -> RequestContext {
        let key = match CacheKey::from_path(parts.uri.path()) {
            Ok(key) => Some(key),
            Err(e) => {
                debug!(error = %e, "Request is not cacheable");
                None
            }
        };

        RequestContext {
            id: self.stats.next_request_id(),
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            key,
            range: parts
                .headers
                .get(header::RANGE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            filtered: self.filters.matches(&parts.uri.to_string()),
        }
    }

    /// Request stage: serve a committed cache entry if there is one.
    ///
    /// Returns `None` when the request has to go upstream.
    pub async fn inspect_request(&self, ctx: &RequestContext) -> Option<Response> {
        if !ctx.may_read_cache() {
            return None;
        }
        let key = ctx.key.as_ref()?;

        // Never wait on an entry being written, fetch it instead
        if self.store.is_claimed(key) {
            debug!(key = %key, "Entry is being written, bypassing cache");
            return None;
        }

        let file = match self.store.open_for_read(key).await {
            Ok(file) => file,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to open cached entry");
                return None;
            }
        };

        let size = file.size();
        let path = file.path().to_path_buf();

        let requested = match ctx.range.as_deref().map(RangeSpec::parse).transpose() {
            Ok(requested) => requested,
            Err(e) => return Some(self.unsatisfiable(size, &e)),
        };

        match file.read_range(requested.as_ref()).await {
            Ok(read) => {
                match &ctx.range {
                    Some(range) => info!(path = ?path, range = %range, "Using cached entry (partial)"),
                    None => info!(path = ?path, "Using cached entry"),
                }
                Some(self.serve_cached(ctx, read))
            }
            Err(e @ CacheError::RangeNotSatisfiable(_)) => Some(self.unsatisfiable(size, &e)),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read cached entry");
                None
            }
        }
    }

    fn serve_cached(&self, ctx: &RequestContext, read: RangeRead) -> Response {
        let status = if read.is_partial() {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(read.length));
        if let Some(range) = read.content_range.as_deref().and_then(|r| HeaderValue::from_str(r).ok()) {
            headers.insert(header::CONTENT_RANGE, range);
        }

        let body = if ctx.method == Method::HEAD {
            Body::empty()
        } else {
            let stats = self.stats.clone();
            let span = Span::current();
            let stream = ReaderStream::new(read.reader).inspect(move |chunk| match chunk {
                Ok(chunk) => stats.add_cache_bytes(chunk.len() as u64),
                Err(e) => span.in_scope(|| warn!(error = %e, "Cached entry read failed mid-transfer")),
            });
            Body::from_stream(stream)
        };

        build_response(status, headers, body)
    }

    fn unsatisfiable(&self, size: u64, error: &CacheError) -> Response {
        info!(error = %error, "Range not satisfiable");
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
            headers.insert(header::CONTENT_RANGE, value);
        }
        build_response(StatusCode::RANGE_NOT_SATISFIABLE, headers, Body::empty())
    }

    /// Response stage: relay the origin's answer, teeing it into the cache
    /// when it is a cacheable 200.
    pub async fn relay_response(&self, ctx: RequestContext, upstream: UpstreamResponse) -> Response {
        let UpstreamResponse {
            status,
            headers,
            body,
        } = upstream;

        let writer = match &ctx.key {
            Some(key) if status == StatusCode::OK && ctx.may_write_cache() => {
                match self.store.begin_write(key).await {
                    Ok(WriteOutcome::Started(writer)) => {
                        info!(key = %key, "Saving to cache");
                        Some(writer)
                    }
                    Ok(WriteOutcome::InProgress) => {
                        debug!(key = %key, "Entry already being written, relaying uncached");
                        None
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to start cache write");
                        None
                    }
                }
            }
            _ => None,
        };

        let (tx, rx) = mpsc::channel(self.relay_buffer);
        tokio::spawn(relay(body, writer, tx, self.stats.clone()).instrument(Span::current()));

        build_response(status, headers, Body::from_stream(ReceiverStream::new(rx)))
    }
}

/// Stream the client's body through unbuffered
fn request_body(body: Body) -> Option<BodyStream> {
    if body.is_end_stream() {
        return None;
    }
    Some(
        body.into_data_stream()
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed(),
    )
}

/// Request headers sent to the origin
fn forwarded_headers(ctx: &RequestContext) -> HeaderMap {
    let mut headers = ctx.headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    // Cached entries are served without a Content-Encoding, so fetch them
    // as identity
    if ctx.may_write_cache() {
        headers.remove(header::ACCEPT_ENCODING);
    }
    headers
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn error_response(error: &ProxyError) -> Response {
    build_response(error.status_code(), HeaderMap::new(), Body::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBarrier;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Notify;

    #[inline]
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer() // Write to test output
            .try_init();
    }

    #[derive(Clone)]
    struct Route {
        status: StatusCode,
        body: Vec<u8>,
        /// Fail the body stream after this many bytes
        fail_after: Option<usize>,
    }

    /// Origin double answering from a fixed table of paths
    #[derive(Default)]
    struct ScriptedUpstream {
        routes: Mutex<HashMap<String, Route>>,
        hits: AtomicUsize,
        last_headers: Mutex<Option<HeaderMap>>,
        /// Size of the last request body, `None` if there was none
        last_body_len: Mutex<Option<usize>>,
        /// Held by the next fetch: its body pauses after the first chunk
        gate: Mutex<Option<Arc<Notify>>>,
    }

    impl ScriptedUpstream {
        fn route(&self, path: &str, status: StatusCode, body: &[u8]) {
            self.routes.lock().insert(
                path.to_owned(),
                Route {
                    status,
                    body: body.to_vec(),
                    fail_after: None,
                },
            );
        }

        fn failing_route(&self, path: &str, body: &[u8], fail_after: usize) {
            self.routes.lock().insert(
                path.to_owned(),
                Route {
                    status: StatusCode::OK,
                    body: body.to_vec(),
                    fail_after: Some(fail_after),
                },
            );
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for ScriptedUpstream {
        async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, ProxyError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            *self.last_headers.lock() = Some(request.headers.clone());

            let mut body_len = None;
            if let Some(mut body) = request.body {
                let mut n = 0;
                while let Some(chunk) = body.next().await {
                    n += chunk?.len();
                }
                body_len = Some(n);
            }
            *self.last_body_len.lock() = body_len;

            let Some(route) = self.routes.lock().get(request.url.path()).cloned() else {
                return Err(ProxyError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            };

            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/x-test"));
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(route.body.len()));

            let body = match (route.fail_after, self.gate.lock().take()) {
                (Some(n), _) => stream::iter(vec![
                    Ok(Bytes::copy_from_slice(&route.body[..n])),
                    Err(io::Error::other("connection reset by peer")),
                ])
                .boxed(),
                (None, Some(gate)) => {
                    let (head, tail) = route.body.split_at(route.body.len() / 2);
                    let tail = Bytes::copy_from_slice(tail);
                    stream::iter(vec![Ok(Bytes::copy_from_slice(head))])
                        .chain(stream::once(async move {
                            gate.notified().await;
                            Ok(tail)
                        }))
                        .boxed()
                }
                (None, None) => stream::iter(
                    route
                        .body
                        .chunks(128)
                        .map(|c| Ok(Bytes::copy_from_slice(c)))
                        .collect::<Vec<_>>(),
                )
                .boxed(),
            };

            Ok(UpstreamResponse {
                status: route.status,
                headers,
                body,
            })
        }
    }

    struct Harness {
        dir: TempDir,
        barrier: Arc<MemoryBarrier>,
        upstream: Arc<ScriptedUpstream>,
        coordinator: Coordinator,
    }

    async fn harness() -> Harness {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let barrier = Arc::new(MemoryBarrier::new());
        let store = Arc::new(CacheStore::open(dir.path(), barrier.clone()).await.unwrap());
        let upstream = Arc::new(ScriptedUpstream::default());
        let coordinator = Coordinator::new(
            store,
            Arc::new(FilterSet::new()),
            upstream.clone(),
            Arc::new(Stats::new()),
        );
        Harness {
            dir,
            barrier,
            upstream,
            coordinator,
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn get(path: &str) -> Request {
        Request::builder()
            .uri(format!("http://mirror.test{path}"))
            .body(Body::empty())
            .unwrap()
    }

    fn get_range(path: &str, range: &str) -> Request {
        Request::builder()
            .uri(format!("http://mirror.test{path}"))
            .header(header::RANGE, range)
            .body(Body::empty())
            .unwrap()
    }

    async fn body(response: Response) -> Result<Bytes, axum::Error> {
        axum::body::to_bytes(response.into_body(), usize::MAX).await
    }

    fn cached(h: &Harness, path: &str) -> Option<Vec<u8>> {
        let key = CacheKey::from_path(path).unwrap();
        std::fs::read(key.to_path(h.dir.path())).ok()
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let h = harness().await;
        let data = payload(1000);
        h.upstream.route("/pool/a.deb", StatusCode::OK, &data);

        let response = h.coordinator.handle(get("/pool/a.deb")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/x-test");
        assert_eq!(body(response).await.unwrap(), data);
        assert_eq!(h.upstream.hits(), 1);
        assert_eq!(cached(&h, "/pool/a.deb"), Some(data.clone()));

        let response = h.coordinator.handle(get("/pool/a.deb")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(body(response).await.unwrap(), data);
        assert_eq!(h.upstream.hits(), 1);

        let stats = h.coordinator.stats().snapshot();
        assert_eq!(stats.upstream_bytes, 1000);
        assert_eq!(stats.cache_bytes, 1000);
        assert!(h.barrier.is_empty());
    }

    #[tokio::test]
    async fn test_ranges_on_cached_entry() {
        let h = harness().await;
        let data = payload(1000);
        h.upstream.route("/blob", StatusCode::OK, &data);
        body(h.coordinator.handle(get("/blob")).await).await.unwrap();

        let response = h.coordinator.handle(get_range("/blob", "bytes=0-99")).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 0-99/1000");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "100");
        assert_eq!(body(response).await.unwrap(), &data[..100]);

        let response = h.coordinator.handle(get_range("/blob", "bytes=500-")).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(body(response).await.unwrap(), &data[500..]);

        let response = h.coordinator.handle(get_range("/blob", "bytes=2000-")).await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");

        // All served locally
        assert_eq!(h.upstream.hits(), 1);
    }

    #[tokio::test]
    async fn test_range_miss_is_not_cached() {
        let h = harness().await;
        h.upstream.route("/partial.iso", StatusCode::OK, &payload(300));

        let response = h
            .coordinator
            .handle(get_range("/partial.iso", "bytes=0-99"))
            .await;
        body(response).await.unwrap();

        assert_eq!(h.upstream.hits(), 1);
        assert_eq!(cached(&h, "/partial.iso"), None);
        // The range header went to the origin
        let sent = h.upstream.last_headers.lock().clone().unwrap();
        assert_eq!(sent[header::RANGE], "bytes=0-99");
    }

    #[tokio::test]
    async fn test_filtered_requests_always_go_upstream() {
        let h = harness().await;
        h.coordinator
            .filters()
            .load_from_reader(Cursor::new("InRelease$"))
            .unwrap();

        // Stale copy on disk must be ignored and left untouched
        let stale_path = CacheKey::from_path("/dists/stable/InRelease")
            .unwrap()
            .to_path(h.dir.path());
        std::fs::create_dir_all(stale_path.parent().unwrap()).unwrap();
        std::fs::write(&stale_path, b"stale").unwrap();

        h.upstream
            .route("/dists/stable/InRelease", StatusCode::OK, b"fresh");

        for _ in 0..2 {
            let response = h.coordinator.handle(get("/dists/stable/InRelease")).await;
            assert_eq!(body(response).await.unwrap(), &b"fresh"[..]);
        }

        assert_eq!(h.upstream.hits(), 2);
        assert_eq!(std::fs::read(&stale_path).unwrap(), b"stale");
    }

    #[tokio::test]
    async fn test_non_200_is_relayed_and_not_cached() {
        let h = harness().await;
        h.upstream
            .route("/missing.deb", StatusCode::NOT_FOUND, b"404 page not found");

        let response = h.coordinator.handle(get("/missing.deb")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body(response).await.unwrap(), &b"404 page not found"[..]);
        assert_eq!(cached(&h, "/missing.deb"), None);
        assert!(h.barrier.is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_halfway_leaves_no_artifact() {
        let h = harness().await;
        h.upstream.failing_route("/big.iso", &payload(1000), 500);

        let response = h.coordinator.handle(get("/big.iso")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body(response).await.is_err());

        assert_eq!(cached(&h, "/big.iso"), None);
        assert!(h.barrier.is_empty());

        let staging = std::fs::read_dir(h.dir.path().join(crate::cache::STAGING_DIR))
            .unwrap()
            .count();
        assert_eq!(staging, 0);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_service_unavailable() {
        let h = harness().await;
        let response = h.coordinator.handle(get("/nowhere.deb")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(h.barrier.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_miss_writes_once() {
        let h = harness().await;
        let data = payload(4096);
        h.upstream.route("/pool/hot.deb", StatusCode::OK, &data);
        let gate = Arc::new(Notify::new());
        *h.upstream.gate.lock() = Some(gate.clone());

        // First request starts writing and stalls halfway through the body
        let first = h.coordinator.handle(get("/pool/hot.deb")).await;
        let key = CacheKey::from_path("/pool/hot.deb").unwrap();
        assert!(h.coordinator.store().is_claimed(&key));
        assert!(!h.coordinator.store().exists(&key).await);

        // Second request must not read the in-progress entry
        let second = h.coordinator.handle(get("/pool/hot.deb")).await;
        assert_eq!(body(second).await.unwrap(), data);
        assert_eq!(h.upstream.hits(), 2);
        assert_eq!(cached(&h, "/pool/hot.deb"), None);

        gate.notify_one();
        assert_eq!(body(first).await.unwrap(), data);
        assert_eq!(cached(&h, "/pool/hot.deb"), Some(data));
        assert!(h.barrier.is_empty());
    }

    #[tokio::test]
    async fn test_head_hit_has_no_body() {
        let h = harness().await;
        h.upstream.route("/pool/b.deb", StatusCode::OK, &payload(64));
        body(h.coordinator.handle(get("/pool/b.deb")).await).await.unwrap();

        let request = Request::builder()
            .method(Method::HEAD)
            .uri("http://mirror.test/pool/b.deb")
            .body(Body::empty())
            .unwrap();
        let response = h.coordinator.handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "64");
        assert!(body(response).await.unwrap().is_empty());
        assert_eq!(h.upstream.hits(), 1);
    }

    #[tokio::test]
    async fn test_other_methods_and_bad_paths_pass_through() {
        let h = harness().await;
        h.upstream.route("/submit", StatusCode::OK, b"ok");
        h.upstream.route("/", StatusCode::OK, b"index");

        let request = Request::builder()
            .method(Method::POST)
            .uri("http://mirror.test/submit")
            .body(Body::from("payload"))
            .unwrap();
        body(h.coordinator.handle(request).await).await.unwrap();
        assert_eq!(cached(&h, "/submit"), None);

        let response = h.coordinator.handle(get("/")).await;
        assert_eq!(body(response).await.unwrap(), &b"index"[..]);
        assert_eq!(h.upstream.hits(), 2);
        assert!(h.barrier.is_empty());
    }

    #[tokio::test]
    async fn test_large_request_body_streams_to_origin() {
        let h = harness().await;
        h.upstream.route("/upload", StatusCode::OK, b"stored");

        let size = 33 * 1024 * 1024;
        let request = Request::builder()
            .method(Method::PUT)
            .uri("http://mirror.test/upload")
            .header(header::CONTENT_LENGTH, size)
            .body(Body::from(vec![7u8; size]))
            .unwrap();
        let response = h.coordinator.handle(request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await.unwrap(), &b"stored"[..]);
        assert_eq!(h.upstream.hits(), 1);
        assert_eq!(*h.upstream.last_body_len.lock(), Some(size));
        assert_eq!(cached(&h, "/upload"), None);
    }

    #[tokio::test]
    async fn test_bodyless_get_sends_no_body() {
        let h = harness().await;
        h.upstream.route("/pool/d.deb", StatusCode::OK, b"d");

        body(h.coordinator.handle(get("/pool/d.deb")).await).await.unwrap();
        assert_eq!(*h.upstream.last_body_len.lock(), None);
    }

    #[tokio::test]
    async fn test_unreadable_entry_falls_through_to_origin() {
        let h = harness().await;

        // A regular file where the entry needs a directory: opening the
        // entry fails with an I/O error other than not-found
        let blocker = h.dir.path().join("pool").join("e.deb");
        std::fs::create_dir_all(blocker.parent().unwrap()).unwrap();
        std::fs::write(&blocker, b"not a directory").unwrap();
        h.upstream
            .route("/pool/e.deb/signature", StatusCode::OK, b"sig");

        let response = h.coordinator.handle(get("/pool/e.deb/signature")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await.unwrap(), &b"sig"[..]);
        assert_eq!(h.upstream.hits(), 1);
        assert!(h.barrier.is_empty());

        // A directory sitting at the entry path is not a cached file either
        std::fs::create_dir_all(h.dir.path().join("pool").join("dir.deb")).unwrap();
        h.upstream.route("/pool/dir.deb", StatusCode::OK, b"dir");

        let response = h.coordinator.handle(get("/pool/dir.deb")).await;
        assert_eq!(body(response).await.unwrap(), &b"dir"[..]);
        assert_eq!(h.upstream.hits(), 2);
        assert!(h.barrier.is_empty());
    }

    #[tokio::test]
    async fn test_cacheable_fetch_asks_for_identity_encoding() {
        let h = harness().await;
        h.upstream.route("/pool/c.deb", StatusCode::OK, b"c");

        let request = Request::builder()
            .uri("http://mirror.test/pool/c.deb")
            .header(header::ACCEPT_ENCODING, "gzip")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::empty())
            .unwrap();
        body(h.coordinator.handle(request).await).await.unwrap();

        let sent = h.upstream.last_headers.lock().clone().unwrap();
        assert!(!sent.contains_key(header::ACCEPT_ENCODING));
        assert!(!sent.contains_key(header::CONNECTION));
    }
}
