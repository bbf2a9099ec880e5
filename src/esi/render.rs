use futures::StreamExt;

use crate::context::Context;
use crate::http::headers::names;

use super::error::EsiError;
use super::executor::FragmentExecutor;
use super::fragment::CachedPage;

/// Streams the assembled page to the client.
///
/// The content type is the one stored with the page. The length is left
/// undeclared because the assembled body has nothing to do with the size of
/// what was captured. Each chunk is written as soon as the executor yields
/// it; if a chunk fails, whatever was already written stays written.
pub(crate) async fn render(
    ctx: &mut Context,
    executor: &dyn FragmentExecutor,
    page: &CachedPage,
) -> Result<(), EsiError> {
    let response = ctx.response_mut();
    match page.content_type() {
        Some(content_type) => response.set_content_type(content_type),
        None => {
            response.headers_mut().remove(names::CONTENT_TYPE);
        }
    }
    response.set_content_length(None);

    let mut chunks = executor.execute(page.fragment().clone());
    while let Some(chunk) = chunks.next().await {
        response.write(chunk?).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::esi::{ChunkStream, Fragment};
    use crate::http::{CaptureBuffer, Method, Request, Response};

    // Emits each text child of a sequence as its own chunk.
    struct Flatten;

    impl FragmentExecutor for Flatten {
        fn execute<'a>(&'a self, fragment: Arc<Fragment>) -> ChunkStream<'a> {
            let chunks: Vec<Result<String, EsiError>> = match fragment.as_ref() {
                Fragment::Sequence(children) => children
                    .iter()
                    .filter_map(|child| match child.as_ref() {
                        Fragment::Text(text) => Some(Ok(text.clone())),
                        _ => None,
                    })
                    .collect(),
                Fragment::Text(text) => vec![Ok(text.clone())],
                Fragment::Include(_) => Vec::new(),
            };
            Box::pin(futures::stream::iter(chunks))
        }
    }

    fn context() -> Context {
        let mut response = Response::new(Box::new(CaptureBuffer::new()));
        response.set_content_type("text/plain");
        response.set_content_length(Some(999));
        Context::new(Request::new(Method::Get, "/"), response)
    }

    #[tokio::test]
    async fn writes_chunks_in_order_with_stored_type() {
        let page = CachedPage::new(
            Fragment::sequence(vec![Fragment::Text("a".into()), Fragment::Text("b".into())]),
            Some("text/html".to_owned()),
        );
        let mut ctx = context();
        render(&mut ctx, &Flatten, &page).await.unwrap();

        assert_eq!(ctx.response().content_type(), Some("text/html"));
        assert_eq!(ctx.response().content_length(), None);
        assert_eq!(ctx.response_mut().take_buffered().unwrap(), "ab");
    }

    #[tokio::test]
    async fn missing_type_clears_header() {
        let page = CachedPage::new(Fragment::Text("x".into()), None);
        let mut ctx = context();
        render(&mut ctx, &Flatten, &page).await.unwrap();
        assert_eq!(ctx.response().content_type(), None);
    }
}
