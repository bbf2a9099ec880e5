//! Response body sinks.
//!
//! A [`Response`](super::Response) never writes to a socket directly; it
//! forwards every chunk to the [`BodySink`] it currently holds. The server
//! installs a sink that frames bytes onto the connection, and middleware can
//! swap in a [`CaptureBuffer`] to record a downstream handler's output
//! without the handler noticing.

use std::io;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;

use super::ResponseHead;

/// Destination for a response body.
///
/// Every call receives the current [`ResponseHead`] so that a sink fronting a
/// real connection can commit the status line and headers lazily, right
/// before the first body byte. Sinks that only record bytes ignore it.
pub trait BodySink: Send {
    /// Writes one body chunk.
    fn write<'a>(&'a mut self, head: &'a ResponseHead, chunk: Bytes) -> BoxFuture<'a, io::Result<()>>;

    /// Terminates the body. Writing after `finish` is an error for sinks
    /// that front a connection.
    fn finish<'a>(&'a mut self, head: &'a ResponseHead) -> BoxFuture<'a, io::Result<()>>;

    /// Returns `true` once the head has been committed to the client and can
    /// no longer change.
    fn has_started(&self) -> bool;

    /// Drains the bytes held in memory, for sinks that record rather than
    /// forward. Forwarding sinks return `None`.
    fn take_buffered(&mut self) -> Option<Bytes> {
        None
    }
}

/// An in-memory [`BodySink`] that records every chunk written to it.
///
/// Used to capture a handler's raw output and to serve in-process
/// sub-requests. It never commits a head.
///
/// # Examples
///
/// ```
/// use rttp_esi::http::{CaptureBuffer, Response};
///
/// # tokio_test_block(async {
/// let mut response = Response::new(Box::new(CaptureBuffer::new()));
/// response.write("hello, ").await.unwrap();
/// response.write("world").await.unwrap();
/// assert_eq!(response.take_buffered().unwrap(), "hello, world");
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    buf: BytesMut,
}

impl CaptureBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of bytes recorded so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl BodySink for CaptureBuffer {
    fn write<'a>(&'a mut self, _head: &'a ResponseHead, chunk: Bytes) -> BoxFuture<'a, io::Result<()>> {
        self.buf.extend_from_slice(&chunk);
        Box::pin(async { Ok(()) })
    }

    fn finish<'a>(&'a mut self, _head: &'a ResponseHead) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn has_started(&self) -> bool {
        false
    }

    fn take_buffered(&mut self) -> Option<Bytes> {
        Some(self.buf.split().freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StatusCode;

    #[tokio::test]
    async fn records_chunks_in_order() {
        let head = ResponseHead::new(StatusCode::Ok);
        let mut sink = CaptureBuffer::new();
        sink.write(&head, Bytes::from_static(b"ab")).await.unwrap();
        sink.write(&head, Bytes::from_static(b"cd")).await.unwrap();
        sink.finish(&head).await.unwrap();
        assert_eq!(sink.len(), 4);
        assert!(!sink.has_started());
        assert_eq!(sink.take_buffered().unwrap(), Bytes::from_static(b"abcd"));
    }

    #[tokio::test]
    async fn take_drains() {
        let head = ResponseHead::new(StatusCode::Ok);
        let mut sink = CaptureBuffer::new();
        sink.write(&head, Bytes::from_static(b"x")).await.unwrap();
        let _ = sink.take_buffered();
        assert!(sink.is_empty());
        assert_eq!(sink.take_buffered().unwrap(), Bytes::new());
    }
}
