//! Resolving fragment trees into output chunks.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::error::{EsiError, FetchError};
use super::fragment::{Fragment, Include};
use super::parser::BodyParser;
use crate::context::Context;
use crate::http::{CaptureBuffer, Method, Request, Response, StatusCode, headers::names};
use crate::middleware::Pipeline;

/// Ordered page output. Finite, forward-only, consumed once.
pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<String, EsiError>> + Send + 'a>>;

/// Produces the output of a fragment tree.
///
/// Chunks are produced lazily, as the consumer polls; an include that fails
/// surfaces as an `Err` item at its position in the stream, after every
/// chunk before it has already been yielded.
pub trait FragmentExecutor: Send + Sync {
    fn execute<'a>(&'a self, fragment: Arc<Fragment>) -> ChunkStream<'a>;
}

/// Where include URLs are fetched from.
pub trait FragmentSource: Send + Sync {
    /// Returns the body behind `url`.
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, FetchError>>;
}

/// The default [`FragmentExecutor`].
///
/// Walks the tree depth-first. Each include is fetched from the
/// [`FragmentSource`]; a failed `src` falls back to `alt`, and an include
/// marked `onerror="continue"` is dropped if both fail. Fetched bodies are
/// parsed and expanded in turn, down to `max_depth` levels of nesting.
pub struct IncludeExecutor {
    parser: Arc<dyn BodyParser>,
    source: Arc<dyn FragmentSource>,
    max_depth: usize,
}

impl IncludeExecutor {
    pub const DEFAULT_MAX_DEPTH: usize = 8;

    pub fn new(parser: Arc<dyn BodyParser>, source: Arc<dyn FragmentSource>) -> Self {
        Self {
            parser,
            source,
            max_depth: Self::DEFAULT_MAX_DEPTH,
        }
    }

    /// Limits how deeply includes may nest inside fetched fragments.
    #[must_use]
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    // `Ok(None)` means the include is skipped.
    async fn resolve(&self, include: &Include) -> Result<Option<String>, FetchError> {
        let err = match self.source.fetch(&include.src).await {
            Ok(body) => return Ok(Some(body)),
            Err(err) => err,
        };
        let err = match &include.alt {
            Some(alt) => {
                debug!(src = %include.src, %alt, error = %err, "include failed, trying alt");
                match self.source.fetch(alt).await {
                    Ok(body) => return Ok(Some(body)),
                    Err(alt_err) => alt_err,
                }
            }
            None => err,
        };
        if include.continue_on_error {
            warn!(src = %include.src, error = %err, "include skipped");
            Ok(None)
        } else {
            Err(err)
        }
    }
}

impl FragmentExecutor for IncludeExecutor {
    fn execute<'a>(&'a self, fragment: Arc<Fragment>) -> ChunkStream<'a> {
        Box::pin(self.walk(fragment))
    }
}

impl IncludeExecutor {
    fn walk(&self, root: Arc<Fragment>) -> impl Stream<Item = Result<String, EsiError>> + Send + '_ {
        try_stream! {
            // Pending nodes, last = next to emit.
            let mut stack = vec![(root, 0usize)];

            while let Some((node, depth)) = stack.pop() {
                match node.as_ref() {
                    Fragment::Text(text) => yield text.clone(),
                    Fragment::Sequence(children) => {
                        stack.extend(children.iter().rev().map(|child| (Arc::clone(child), depth)));
                    }
                    Fragment::Include(include) => {
                        // Rejected before fetching, so a runaway include costs no request.
                        if depth >= self.max_depth {
                            Err::<(), _>(EsiError::IncludeDepth {
                                src: include.src.clone(),
                                max_depth: self.max_depth,
                            })?;
                        }
                        let Some(body) = self.resolve(include).await? else {
                            continue;
                        };
                        let nested = self.parser.parse(&body)?;
                        stack.push((Arc::new(nested), depth + 1));
                    }
                }
            }
        }
    }
}

/// A [`FragmentSource`] that serves includes from an in-process
/// [`Pipeline`], the way a loopback HTTP request would.
///
/// Each sub-request is a `GET` carrying the internal marker header, so an
/// ESI layer inside `pipeline` lets it through untouched. Only a `200`
/// answer counts as content.
pub struct LoopbackSource {
    pipeline: Pipeline,
    marker_header: String,
}

impl LoopbackSource {
    pub fn new(pipeline: Pipeline, marker_header: impl Into<String>) -> Self {
        Self {
            pipeline,
            marker_header: marker_header.into(),
        }
    }
}

impl FragmentSource for LoopbackSource {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
        Box::pin(async move {
            let (host, target) = split_url(url).ok_or_else(|| FetchError::InvalidUrl {
                url: url.to_owned(),
            })?;

            let mut request = Request::new(Method::Get, &target);
            if let Some(host) = host {
                request.headers_mut().insert(names::HOST, host);
            }
            request.headers_mut().insert(self.marker_header.as_str(), "1");

            let mut ctx = Context::new(request, Response::new(Box::new(CaptureBuffer::new())));
            self.pipeline
                .dispatch(&mut ctx)
                .await
                .map_err(|source| FetchError::Handler {
                    url: url.to_owned(),
                    source,
                })?;

            let (_, mut response) = ctx.into_parts();
            let status = response.status();
            if status != StatusCode::Ok {
                return Err(FetchError::Status {
                    url: url.to_owned(),
                    status,
                });
            }
            let body = response.take_buffered().unwrap_or_default();
            Ok(String::from_utf8_lossy(&body).into_owned())
        })
    }
}

// Splits `http://host/path?q` or `/path?q` into (host, target). A URL with
// a query but no path gets the root path.
fn split_url(url: &str) -> Option<(Option<&str>, String)> {
    if url.starts_with('/') {
        return Some((None, url.to_owned()));
    }
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))?;
    let Some(at) = rest.find(['/', '?']) else {
        return Some((Some(rest), "/".to_owned()));
    };
    let (host, target) = rest.split_at(at);
    let target = if target.starts_with('?') {
        format!("/{target}")
    } else {
        target.to_owned()
    };
    Some((Some(host), target))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use futures::StreamExt;

    use super::*;
    use crate::esi::{IncludeParser, ParseError};
    use crate::middleware::{Endpoint, HandlerResult};

    #[derive(Default)]
    struct MapSource {
        bodies: HashMap<&'static str, &'static str>,
        fetched: Mutex<Vec<String>>,
    }

    impl MapSource {
        fn with(mut self, url: &'static str, body: &'static str) -> Self {
            self.bodies.insert(url, body);
            self
        }
    }

    impl FragmentSource for MapSource {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, FetchError>> {
            self.fetched.lock().unwrap().push(url.to_owned());
            let result = self
                .bodies
                .get(url)
                .map(|body| body.to_string())
                .ok_or_else(|| FetchError::Status {
                    url: url.to_owned(),
                    status: StatusCode::NotFound,
                });
            Box::pin(async move { result })
        }
    }

    fn executor(source: MapSource) -> (IncludeExecutor, Arc<MapSource>) {
        let source = Arc::new(source);
        let executor = IncludeExecutor::new(Arc::new(IncludeParser), source.clone());
        (executor, source)
    }

    fn tree(body: &str) -> Arc<Fragment> {
        Arc::new(IncludeParser.parse(body).unwrap())
    }

    async fn collect(executor: &IncludeExecutor, body: &str) -> Result<Vec<String>, EsiError> {
        let mut stream = executor.execute(tree(body));
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk?);
        }
        Ok(chunks)
    }

    #[tokio::test]
    async fn text_and_includes_in_order() {
        let (executor, _) = executor(MapSource::default().with("/nav", "<nav/>"));
        let chunks = collect(&executor, r#"<body><esi:include src="/nav"/></body>"#)
            .await
            .unwrap();
        assert_eq!(chunks, vec!["<body>", "<nav/>", "</body>"]);
    }

    #[tokio::test]
    async fn nested_includes_expand() {
        let (executor, _) = executor(
            MapSource::default()
                .with("/outer", r#"[<esi:include src="/inner"/>]"#)
                .with("/inner", "core"),
        );
        let chunks = collect(&executor, r#"<esi:include src="/outer"/>"#).await.unwrap();
        assert_eq!(chunks.concat(), "[core]");
    }

    #[tokio::test]
    async fn alt_is_used_when_src_fails() {
        let (executor, source) = executor(MapSource::default().with("/backup", "B"));
        let chunks = collect(&executor, r#"<esi:include src="/gone" alt="/backup"/>"#)
            .await
            .unwrap();
        assert_eq!(chunks, vec!["B"]);
        assert_eq!(*source.fetched.lock().unwrap(), vec!["/gone", "/backup"]);
    }

    #[tokio::test]
    async fn onerror_continue_skips() {
        let (executor, _) = executor(MapSource::default());
        let chunks = collect(&executor, r#"a<esi:include src="/gone" onerror="continue"/>b"#)
            .await
            .unwrap();
        assert_eq!(chunks, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failed_include_errors_mid_stream() {
        let (executor, _) = executor(MapSource::default());
        let mut stream = executor.execute(tree(r#"before<esi:include src="/gone"/>after"#));
        assert_eq!(stream.next().await.unwrap().unwrap(), "before");
        assert!(matches!(
            stream.next().await,
            Some(Err(EsiError::Fetch(FetchError::Status { status: StatusCode::NotFound, .. })))
        ));
    }

    #[tokio::test]
    async fn self_including_fragment_hits_depth_limit() {
        let (executor, source) = executor(MapSource::default().with("/loop", r#"<esi:include src="/loop"/>"#));
        let executor = executor.max_depth(3);
        let err = collect(&executor, r#"<esi:include src="/loop"/>"#).await.unwrap_err();
        assert!(matches!(err, EsiError::IncludeDepth { max_depth: 3, .. }));
        // One fetch per permitted level; the include past the limit is never fetched.
        assert_eq!(source.fetched.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn include_past_the_limit_is_not_fetched() {
        let (executor, source) = executor(MapSource::default().with("/loop", r#"<esi:include src="/loop"/>"#));
        let executor = executor.max_depth(1);
        let err = collect(&executor, r#"<esi:include src="/loop"/>"#).await.unwrap_err();
        assert!(matches!(err, EsiError::IncludeDepth { max_depth: 1, .. }));
        assert_eq!(*source.fetched.lock().unwrap(), vec!["/loop"]);
    }

    #[tokio::test]
    async fn malformed_fetched_body_is_a_parse_error() {
        let (executor, _) = executor(MapSource::default().with("/bad", "<esi:include alt='/x'/>"));
        let err = collect(&executor, r#"<esi:include src="/bad"/>"#).await.unwrap_err();
        assert!(matches!(err, EsiError::Parse(ParseError::MissingSrc { .. })));
    }

    struct Fragments;

    impl Endpoint for Fragments {
        fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async move {
                let marked = ctx.request().headers().contains("X-Esi");
                let host = ctx.request().headers().get("host").unwrap_or("-").to_owned();
                let path = ctx.request().path().to_owned();
                match path.as_str() {
                    "/frag" => {
                        let body = format!("marked={marked} host={host}");
                        ctx.response_mut().write(body).await?;
                    }
                    _ => ctx.response_mut().set_status(StatusCode::NotFound),
                }
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn loopback_marks_sub_requests() {
        let source = LoopbackSource::new(Pipeline::new(Fragments), "X-Esi");
        assert_eq!(source.fetch("/frag").await.unwrap(), "marked=true host=-");
        assert_eq!(
            source.fetch("http://shop.example/frag").await.unwrap(),
            "marked=true host=shop.example"
        );
    }

    #[tokio::test]
    async fn loopback_non_200_is_an_error() {
        let source = LoopbackSource::new(Pipeline::new(Fragments), "X-Esi");
        assert!(matches!(
            source.fetch("/missing").await,
            Err(FetchError::Status { status: StatusCode::NotFound, .. })
        ));
        assert!(matches!(
            source.fetch("ftp://elsewhere/x").await,
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn split_url_forms() {
        let split = |url: &str| split_url(url).map(|(host, target)| (host.map(str::to_owned), target));
        assert_eq!(split("/a?b"), Some((None, "/a?b".to_owned())));
        assert_eq!(split("http://h:8080/a"), Some((Some("h:8080".to_owned()), "/a".to_owned())));
        assert_eq!(split("https://h"), Some((Some("h".to_owned()), "/".to_owned())));
        assert_eq!(split("http://h?x=1"), Some((Some("h".to_owned()), "/?x=1".to_owned())));
        assert_eq!(split("http://h/p?next=/q"), Some((Some("h".to_owned()), "/p?next=/q".to_owned())));
        assert_eq!(split("relative"), None);
    }
}
