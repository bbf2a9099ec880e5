//! Recording a downstream handler's raw output.

use crate::context::Context;
use crate::http::{BodySink, CaptureBuffer, headers::names};
use crate::middleware::Next;

use super::error::EsiError;

/// Holds a temporary body sink in place of the response's own.
///
/// The original sink goes back into the response when the scope is exited
/// or dropped, so it is restored whether the downstream call returns, fails,
/// panics, or the enclosing future is cancelled.
struct SinkScope<'a> {
    ctx: &'a mut Context,
    original: Option<Box<dyn BodySink>>,
}

impl<'a> SinkScope<'a> {
    fn enter(ctx: &'a mut Context, temporary: Box<dyn BodySink>) -> Self {
        let original = ctx.response_mut().replace_sink(temporary);
        Self {
            ctx,
            original: Some(original),
        }
    }

    fn context(&mut self) -> &mut Context {
        &mut *self.ctx
    }

    /// Restores the original sink and hands back the temporary one.
    fn exit(mut self) -> Option<Box<dyn BodySink>> {
        self.restore()
    }

    fn restore(&mut self) -> Option<Box<dyn BodySink>> {
        let original = self.original.take()?;
        Some(self.ctx.response_mut().replace_sink(original))
    }
}

impl Drop for SinkScope<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Runs the rest of the chain with its body redirected into memory and
/// returns what it wrote, as text.
///
/// The request's `Accept-Encoding` is removed first so the handler produces
/// an uncompressed body. Invalid UTF-8 is replaced, not rejected.
pub(crate) async fn capture(ctx: &mut Context, next: Next) -> Result<String, EsiError> {
    ctx.request_mut().headers_mut().remove(names::ACCEPT_ENCODING);

    let mut scope = SinkScope::enter(ctx, Box::new(CaptureBuffer::new()));
    let outcome = next.run(scope.context()).await;
    let buffer = scope.exit();
    outcome.map_err(EsiError::Downstream)?;

    let body = buffer
        .and_then(|mut sink| sink.take_buffered())
        .unwrap_or_default();
    Ok(String::from_utf8_lossy(&body).into_owned())
}
