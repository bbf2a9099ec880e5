//! Middleware pipeline: composable before/after request handler logic.
//!
//! This module defines the core types for building an ordered middleware stack
//! in front of a single [`Endpoint`]. Each middleware wraps the next layer,
//! enabling request inspection, short-circuit responses and response
//! rewriting without coupling handlers to infrastructure concerns.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Endpoint`]: the innermost handler that produces the response.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`Pipeline`]: an endpoint plus its ordered middleware, cheap to clone.
//! - [`LoggerMiddleware`]: built-in request/response logger.
//!
//! Handlers write their output through `ctx.response_mut()` and report
//! failure through [`HandlerResult`]; a layer that wants to observe or
//! rewrite the body swaps the response's body sink around its call to
//! [`Next::run`].

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::context::Context;

/// Type-erased error surfaced by handlers and middleware.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of running a handler or middleware.
pub type HandlerResult = Result<(), BoxError>;

/// The innermost handler of a [`Pipeline`].
///
/// An endpoint writes the response into `ctx` (status, headers and body)
/// and returns `Ok(())`, or returns an error that the server turns into a
/// `500` when nothing has reached the client yet.
///
/// # Examples
///
/// ```rust,no_run
/// use futures::future::BoxFuture;
/// use rttp_esi::{context::Context, middleware::{Endpoint, HandlerResult}};
///
/// struct Hello;
///
/// impl Endpoint for Hello {
///     fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
///         Box::pin(async move {
///             ctx.response_mut().set_content_type("text/plain");
///             ctx.response_mut().write("hello").await?;
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Endpoint: Send + Sync + 'static {
    /// Handle the request carried by `ctx`.
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult>;
}

/// The core trait for all middleware.
///
/// Implementors receive the per-request [`Context`] and a [`Next`] cursor.
/// They may:
///
/// - **Pass through**: call `next.run(ctx).await` without modification.
/// - **Short-circuit**: write a response directly without calling `next`.
/// - **Decorate**: edit the request, call `next.run(ctx).await`, then
///   inspect or rewrite the response.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync` because middleware is shared
///   across Tokio tasks.
/// - `handle` **must** return a `Send` future so it can be awaited across
///   `.await` points in multi-threaded runtimes.
/// - Anything a middleware swaps into `ctx` for the duration of the
///   downstream call must be restored even if that future is dropped.
pub trait Middleware: Send + Sync + 'static {
    /// Handle the request and optionally delegate to the next layer.
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next) -> BoxFuture<'a, HandlerResult>;
}

#[derive(Clone)]
struct Chain {
    middlewares: Vec<Arc<dyn Middleware>>,
    endpoint: Arc<dyn Endpoint>,
}

/// A cursor into the remaining chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can delegate at
/// most once per invocation.
pub struct Next {
    chain: Arc<Chain>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

impl Next {
    /// Invokes the next middleware in the chain, or the endpoint once every
    /// middleware has been passed.
    pub fn run<'a>(self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            match self.chain.middlewares.get(self.index).cloned() {
                Some(middleware) => {
                    let next = Next {
                        chain: Arc::clone(&self.chain),
                        index: self.index + 1,
                    };
                    middleware.handle(ctx, next).await
                }
                None => self.chain.endpoint.call(ctx).await,
            }
        })
    }
}

/// An endpoint wrapped in an ordered middleware stack.
///
/// The first middleware added with [`with`](Self::with) is the outermost
/// layer. A `Pipeline` can only be built from an endpoint, so a request can
/// never run into a missing handler.
///
/// # Examples
///
/// ```rust,no_run
/// # use futures::future::BoxFuture;
/// # use rttp_esi::{context::Context, middleware::{Endpoint, HandlerResult}};
/// # struct Hello;
/// # impl Endpoint for Hello {
/// #     fn call<'a>(&'a self, _ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
/// #         Box::pin(async { Ok(()) })
/// #     }
/// # }
/// use rttp_esi::middleware::{LoggerMiddleware, Pipeline};
///
/// let pipeline = Pipeline::new(Hello).with(LoggerMiddleware);
/// ```
#[derive(Clone)]
pub struct Pipeline {
    chain: Arc<Chain>,
}

impl Pipeline {
    /// Creates a pipeline that routes every request straight to `endpoint`.
    pub fn new(endpoint: impl Endpoint) -> Self {
        Self {
            chain: Arc::new(Chain {
                middlewares: Vec::new(),
                endpoint: Arc::new(endpoint),
            }),
        }
    }

    /// Appends `middleware` inside every layer added before it.
    #[must_use]
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        Arc::make_mut(&mut self.chain)
            .middlewares
            .push(Arc::new(middleware));
        self
    }

    /// Returns the number of middleware layers.
    pub fn len(&self) -> usize {
        self.chain.middlewares.len()
    }

    /// Returns `true` if requests go straight to the endpoint.
    pub fn is_empty(&self) -> bool {
        self.chain.middlewares.is_empty()
    }

    /// Runs `ctx` through every layer and the endpoint.
    pub async fn dispatch(&self, ctx: &mut Context) -> HandlerResult {
        let next = Next {
            chain: Arc::clone(&self.chain),
            index: 0,
        };
        next.run(ctx).await
    }
}

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` record after the downstream chain
/// completes, or a `tracing::warn!` record when it fails. It never
/// short-circuits.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_owned();

            let result = next.run(ctx).await;

            let duration = start.elapsed();
            let status = ctx.response().status().as_u16();
            match &result {
                Ok(()) => tracing::info!(%method, %path, status, ?duration, "request completed"),
                Err(e) => tracing::warn!(%method, %path, error = %e, ?duration, "request failed"),
            }

            result
        })
    }
}
