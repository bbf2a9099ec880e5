//! # rttp-esi
//!
//! Edge Side Include assembly and per-URL fragment caching, built on a small
//! async HTTP/1.1 server framework.
//!
//! Pages are produced by ordinary [`Endpoint`](middleware::Endpoint)s that
//! emit `<esi:include>` markup. [`EsiMiddleware`](esi::EsiMiddleware)
//! captures that output once, caches the parsed fragment tree under the full
//! request URL, and serves every later request by expanding the cached tree.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::future::BoxFuture;
//! use rttp_esi::context::Context;
//! use rttp_esi::esi::{EsiMiddleware, EsiOptions};
//! use rttp_esi::middleware::{Endpoint, HandlerResult, LoggerMiddleware, Pipeline};
//! use rttp_esi::server::Server;
//!
//! struct Site;
//!
//! impl Endpoint for Site {
//!     fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
//!         Box::pin(async move {
//!             let path = ctx.request().path().to_owned();
//!             let response = ctx.response_mut();
//!             response.set_content_type("text/html; charset=utf-8");
//!             match path.as_str() {
//!                 "/nav" => response.write("<nav>home</nav>").await?,
//!                 _ => {
//!                     response.headers_mut().set("Cache-Control", "max-age=60");
//!                     response.write(r#"<esi:include src="/nav"/><main>hi</main>"#).await?;
//!                 }
//!             }
//!             Ok(())
//!         })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let esi = EsiMiddleware::in_memory(Pipeline::new(Site), &EsiOptions::default())?;
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server.run(Pipeline::new(Site).with(LoggerMiddleware).with(esi)).await?;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod esi;
pub mod http;
pub mod middleware;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use context::Context;
pub use esi::{EsiMiddleware, EsiOptions};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::{Middleware, Pipeline};
pub use server::{Server, ServerError};
