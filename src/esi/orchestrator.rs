use tracing::debug;

use crate::context::Context;
use crate::http::{CacheDirective, StatusCode, headers::names};
use crate::middleware::Next;

use super::cache::FragmentCache;
use super::capture::capture;
use super::error::EsiError;
use super::fragment::CachedPage;
use super::parser::BodyParser;

/// Produces the page for the current request, from the cache if possible.
///
/// On a hit the rest of the chain is not run at all; the cached tree is
/// served as-is, however old, for as long as the cache keeps it. On a miss
/// the chain runs with its output captured, the output is parsed, and the
/// result is written back to the cache only if the handler answered `200`.
pub(crate) async fn resolve_page(
    ctx: &mut Context,
    next: Next,
    parser: &dyn BodyParser,
    cache: &dyn FragmentCache,
) -> Result<CachedPage, EsiError> {
    let key = ctx.request().display_url();

    if let Some(page) = cache.try_get(&key).await? {
        debug!(%key, "esi cache hit");
        return Ok(page);
    }
    debug!(%key, "esi cache miss");

    let body = capture(ctx, next).await?;
    let fragment = parser.parse(&body)?;

    let response = ctx.response();
    let page = CachedPage::new(fragment, response.content_type().map(str::to_owned));
    let directive = response
        .headers()
        .get_joined(names::CACHE_CONTROL)
        .and_then(|value| CacheDirective::parse(&value));

    let status = response.status();
    if status == StatusCode::Ok {
        cache.set(&key, directive.as_ref(), page.clone()).await?;
        debug!(%key, ?directive, "esi page cached");
    } else {
        debug!(%key, status = status.as_u16(), "esi page not cached");
    }

    Ok(page)
}
