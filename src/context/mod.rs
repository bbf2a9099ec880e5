//! Per-request context: the request being served and the response being
//! written for it.
//!
//! Middleware and endpoints receive `&mut Context`, so any layer can inspect
//! or rewrite both sides of the exchange before and after delegating.

use crate::http::{Request, Response};

/// Per-request state threaded through the pipeline.
#[derive(Debug)]
pub struct Context {
    request: Request,
    response: Response,
}

impl Context {
    /// Create a new context pairing `request` with the `response` it will be
    /// answered through.
    pub fn new(request: Request, response: Response) -> Self {
        Self { request, response }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Splits the context back into its request and response.
    pub fn into_parts(self) -> (Request, Response) {
        (self.request, self.response)
    }
}
