//! HTTP/1.1 response state and head serialisation.
//!
//! A [`Response`] is written incrementally: handlers set the status and
//! headers on its [`ResponseHead`], then stream body chunks through
//! [`Response::write`]. Whatever [`BodySink`] the response holds decides
//! where those chunks go.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};

use super::{BodySink, Headers, StatusCode, headers::names};

/// How the body length is communicated on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `Content-Length` was set; the body is written as-is.
    Fixed,
    /// No length is known; the body uses `Transfer-Encoding: chunked`.
    Chunked,
    /// The status forbids a body (204, 304).
    Empty,
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    status: StatusCode,
    headers: Headers,
}

impl ResponseHead {
    /// Creates a head with the given status and no headers.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
        }
    }

    /// Returns the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the `Content-Length` header parsed as `u64`, if present and valid.
    pub fn content_length(&self) -> Option<u64> {
        self.headers.get(names::CONTENT_LENGTH)?.parse().ok()
    }

    /// Serialises the head using HTTP/1.1 wire format.
    ///
    /// `body_complete_and_empty` lets a caller that is finishing a response
    /// without ever having written a body advertise `Content-Length: 0`
    /// instead of opening a chunked stream.
    ///
    /// Adds, as needed:
    /// - `Content-Length: 0` for an empty, unframed body.
    /// - `Transfer-Encoding: chunked` when no `Content-Length` is set.
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn encode(&self, keep_alive: bool, body_complete_and_empty: bool) -> (BytesMut, Framing) {
        let framing = if !self.status.permits_body() {
            Framing::Empty
        } else if self.content_length().is_some() {
            Framing::Fixed
        } else if body_complete_and_empty {
            Framing::Empty
        } else {
            Framing::Chunked
        };

        let estimated_size = 128 + self.headers.len() * 64;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case(names::CONNECTION)
                || name.eq_ignore_ascii_case(names::TRANSFER_ENCODING)
            {
                continue;
            }
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        match framing {
            Framing::Chunked => buf.put(&b"Transfer-Encoding: chunked\r\n"[..]),
            Framing::Empty if self.status.permits_body() => buf.put(&b"Content-Length: 0\r\n"[..]),
            _ => {}
        }

        let connection = if keep_alive { "keep-alive" } else { "close" };
        buf.put(format!("Connection: {connection}\r\n").as_bytes());

        // Header/body separator
        buf.put(&b"\r\n"[..]);

        (buf, framing)
    }
}

/// A response under construction, bound to a [`BodySink`].
///
/// # Examples
///
/// ```
/// use rttp_esi::http::{CaptureBuffer, Response, StatusCode};
///
/// let mut response = Response::new(Box::new(CaptureBuffer::new()));
/// response.set_status(StatusCode::NotFound);
/// response.set_content_type("text/html; charset=utf-8");
/// assert_eq!(response.content_type(), Some("text/html; charset=utf-8"));
/// assert_eq!(response.content_length(), None);
/// ```
pub struct Response {
    head: ResponseHead,
    sink: Box<dyn BodySink>,
}

impl Response {
    /// Creates a `200 OK` response with no headers that writes into `sink`.
    pub fn new(sink: Box<dyn BodySink>) -> Self {
        Self {
            head: ResponseHead::new(StatusCode::Ok),
            sink,
        }
    }

    /// Returns the head (status and headers).
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    /// Sets the status code. Has no effect on the wire once the head has
    /// been committed.
    pub fn set_status(&mut self, status: StatusCode) {
        self.head.status = status;
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }

    /// Returns the response headers for in-place edits.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.head.headers
    }

    /// Returns the `Content-Type` header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.head.headers.get(names::CONTENT_TYPE)
    }

    /// Replaces the `Content-Type` header.
    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.head.headers.set(names::CONTENT_TYPE, content_type);
    }

    /// Returns the declared `Content-Length`, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.head.content_length()
    }

    /// Sets or clears the declared body length. `None` removes the header,
    /// leaving the length to be determined by chunked framing.
    pub fn set_content_length(&mut self, length: Option<u64>) {
        match length {
            Some(len) => self.head.headers.set(names::CONTENT_LENGTH, len.to_string()),
            None => {
                self.head.headers.remove(names::CONTENT_LENGTH);
            }
        }
    }

    /// Returns `true` once the head has been committed to the client.
    pub fn has_started(&self) -> bool {
        self.sink.has_started()
    }

    /// Installs `sink` as the body destination and returns the previous one.
    pub fn replace_sink(&mut self, sink: Box<dyn BodySink>) -> Box<dyn BodySink> {
        std::mem::replace(&mut self.sink, sink)
    }

    /// Writes one body chunk through the current sink. Empty chunks are skipped.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> io::Result<()> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        self.sink.write(&self.head, chunk).await
    }

    /// Terminates the body on the current sink.
    pub async fn finish(&mut self) -> io::Result<()> {
        self.sink.finish(&self.head).await
    }

    /// Drains whatever the current sink holds in memory.
    ///
    /// Returns `None` when the sink forwards bytes instead of recording them.
    pub fn take_buffered(&mut self) -> Option<Bytes> {
        self.sink.take_buffered()
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("head", &self.head)
            .field("started", &self.sink.has_started())
            .finish()
    }
}
