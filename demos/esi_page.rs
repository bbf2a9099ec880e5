//! Serves a page assembled from ESI fragments.
//!
//! ```text
//! RUST_LOG=rttp_esi=debug cargo run --example esi_page
//! curl -i http://127.0.0.1:8080/
//! ```
//!
//! The page itself is rendered once and cached for 60 seconds; the clock
//! fragment it includes is fetched again on every request.

use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use rttp_esi::context::Context;
use rttp_esi::esi::{EsiMiddleware, EsiOptions};
use rttp_esi::http::StatusCode;
use rttp_esi::middleware::{Endpoint, HandlerResult, LoggerMiddleware, Pipeline};
use rttp_esi::server::Server;
use tracing_subscriber::EnvFilter;

const PAGE: &str = r#"<!doctype html>
<html>
<head><title>rttp-esi</title></head>
<body>
<esi:include src="/fragments/header"/>
<p>Rendered at server time <esi:include src="/fragments/clock"/>.</p>
<esi:include src="/fragments/ad" onerror="continue"/>
<esi:remove><p>ESI is not being processed.</p></esi:remove>
</body>
</html>
"#;

struct Site;

impl Endpoint for Site {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let path = ctx.request().path().to_owned();
            let response = ctx.response_mut();
            match path.as_str() {
                "/" => {
                    response.set_content_type("text/html; charset=utf-8");
                    response.headers_mut().set("Cache-Control", "public, max-age=60");
                    response.write(PAGE).await?;
                }
                "/fragments/header" => {
                    response.write("<header><h1>Fragment demo</h1></header>").await?;
                }
                "/fragments/clock" => {
                    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
                    response.write(now.to_string()).await?;
                }
                _ => {
                    response.set_status(StatusCode::NotFound);
                    response.write("not found").await?;
                }
            }
            Ok(())
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rttp_esi=info")),
        )
        .init();

    let options = match std::env::var("RTTP_ESI_OPTIONS") {
        Ok(json) => EsiOptions::from_json(&json)?,
        Err(_) => EsiOptions::default(),
    };

    let esi = EsiMiddleware::in_memory(Pipeline::new(Site), &options)?;
    let pipeline = Pipeline::new(Site).with(LoggerMiddleware).with(esi);

    let server = Server::bind("127.0.0.1:8080").await?;
    server.run(pipeline).await?;
    Ok(())
}
