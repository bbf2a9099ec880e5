use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use super::cache::{FragmentCache, MemoryCache};
use super::error::{ConfigError, EsiError};
use super::executor::{FragmentExecutor, IncludeExecutor, LoopbackSource};
use super::gate::{Admission, admit};
use super::options::EsiOptions;
use super::orchestrator::resolve_page;
use super::parser::{BodyParser, IncludeParser};
use super::render::render;
use crate::context::Context;
use crate::middleware::{HandlerResult, Middleware, Next, Pipeline};

/// Middleware that assembles pages from ESI fragments.
///
/// For each admitted request the handlers below it run with their output
/// captured; the captured markup is parsed into a fragment tree, cached by
/// full request URL, and then expanded and streamed to the client. Later
/// requests for the same URL are served from the cached tree without
/// running the handlers again. Includes are still resolved on every
/// request.
///
/// Requests that an earlier layer already answered with `304 Not Modified`,
/// and fragment sub-requests carrying the marker header, pass straight
/// through.
///
/// # Examples
///
/// ```rust,no_run
/// # use futures::future::BoxFuture;
/// # use rttp_esi::{context::Context, middleware::{Endpoint, HandlerResult}};
/// # struct Site;
/// # impl Endpoint for Site {
/// #     fn call<'a>(&'a self, _ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
/// #         Box::pin(async { Ok(()) })
/// #     }
/// # }
/// use rttp_esi::esi::{EsiMiddleware, EsiOptions};
/// use rttp_esi::middleware::{LoggerMiddleware, Pipeline};
///
/// # fn main() -> Result<(), rttp_esi::esi::ConfigError> {
/// let origin = Pipeline::new(Site);
/// let pipeline = Pipeline::new(Site)
///     .with(LoggerMiddleware)
///     .with(EsiMiddleware::in_memory(origin, &EsiOptions::default())?);
/// # Ok(())
/// # }
/// ```
pub struct EsiMiddleware {
    parser: Arc<dyn BodyParser>,
    executor: Arc<dyn FragmentExecutor>,
    cache: Arc<dyn FragmentCache>,
    marker_header: String,
}

impl EsiMiddleware {
    pub const DEFAULT_MARKER_HEADER: &'static str = "X-Esi";

    pub fn new(
        parser: Arc<dyn BodyParser>,
        executor: Arc<dyn FragmentExecutor>,
        cache: Arc<dyn FragmentCache>,
    ) -> Self {
        Self {
            parser,
            executor,
            cache,
            marker_header: Self::DEFAULT_MARKER_HEADER.to_owned(),
        }
    }

    /// Sets the header that identifies fragment sub-requests.
    ///
    /// It must match the header the executor's fragment source sends.
    #[must_use]
    pub fn with_marker_header(mut self, name: impl Into<String>) -> Self {
        self.marker_header = name.into();
        self
    }

    /// Builds the layer from the in-process defaults: [`IncludeParser`],
    /// an [`IncludeExecutor`] that fetches includes from `origin` through a
    /// [`LoopbackSource`], and a [`MemoryCache`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `options` fails
    /// [`EsiOptions::validate`].
    pub fn in_memory(origin: Pipeline, options: &EsiOptions) -> Result<Self, ConfigError> {
        options.validate()?;

        let parser: Arc<dyn BodyParser> = Arc::new(IncludeParser);
        let source = LoopbackSource::new(origin, options.marker_header.clone());
        let executor = IncludeExecutor::new(Arc::clone(&parser), Arc::new(source))
            .max_depth(options.max_include_depth);

        let mut cache = MemoryCache::new();
        if let Some(ttl) = options.default_ttl() {
            cache = cache.with_default_ttl(ttl);
        }

        Ok(Self::new(parser, Arc::new(executor), Arc::new(cache))
            .with_marker_header(options.marker_header.clone()))
    }
}

impl Middleware for EsiMiddleware {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if let Admission::Bypass(reason) =
                admit(ctx.request(), ctx.response().status(), &self.marker_header)
            {
                debug!(?reason, path = %ctx.request().path(), "esi bypassed");
                return next.run(ctx).await;
            }

            let page = resolve_page(ctx, next, self.parser.as_ref(), self.cache.as_ref())
                .await
                .map_err(EsiError::into_boxed)?;
            render(ctx, self.executor.as_ref(), &page)
                .await
                .map_err(EsiError::into_boxed)?;
            Ok(())
        })
    }
}
