//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests into a
//! [`Pipeline`]. Supports HTTP/1.1 persistent connections (keep-alive) out of
//! the box.
//!
//! Response bodies are streamed: each connection owns a writer task, and the
//! [`Response`] handed to the pipeline writes through a [`ConnectionSink`]
//! that commits the head on the first body chunk and frames the rest as
//! `Transfer-Encoding: chunked` unless a `Content-Length` was declared.

use std::io;
use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::http::{
    BodySink, ResponseHead, StatusCode,
    request::{Request, RequestError},
    response::{Framing, Response},
};
use crate::middleware::Pipeline;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Body frames queued per connection before a writing handler waits.
const WRITE_QUEUE_DEPTH: usize = 32;

/// The HTTP server.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests into a
/// [`Pipeline`].
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
/// use rttp_esi::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(Pipeline::new(Hello).with(LoggerMiddleware)).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching requests into `pipeline`.
    ///
    /// Each connection runs on its own Tokio task with a clone of the
    /// pipeline; requests on one connection are handled one at a time.
    ///
    /// This method runs until the process is terminated or an unrecoverable
    /// listener error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run(self, pipeline: Pipeline) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let pipeline = pipeline.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, pipeline).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// The read half stays with this task; the write half moves to a writer task
/// fed through a bounded channel, which every [`ConnectionSink`] on this
/// connection sends into.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    pipeline: Pipeline,
) -> io::Result<()> {
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
    let writer_task = tokio::spawn(write_loop(writer, rx));

    let served = serve(&mut reader, peer_addr, &pipeline, &tx).await;

    // Every sender must be gone before the writer task can finish.
    drop(tx);
    let written = writer_task.await.map_err(io::Error::other)?;
    served.and(written)
}

/// Reads requests off the connection until it closes or a request asks for
/// `Connection: close`.
async fn serve(
    reader: &mut OwnedReadHalf,
    peer_addr: SocketAddr,
    pipeline: &Pipeline,
    tx: &mpsc::Sender<Bytes>,
) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = reader.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        // Guard against excessively large requests.
        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            send_plain(tx, StatusCode::PayloadTooLarge, "Request entity too large", false).await?;
            break;
        }

        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                // Headers not yet fully received; read more data.
                continue;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                send_plain(tx, StatusCode::BadRequest, &format!("Bad Request: {e}"), false).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset + content_length;
        if buf.len() < total_needed {
            continue;
        }

        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let sink = ConnectionSink::new(tx.clone(), keep_alive);
        let mut ctx = Context::new(request, Response::new(Box::new(sink)));

        match pipeline.dispatch(&mut ctx).await {
            Ok(()) => ctx.response_mut().finish().await?,
            Err(e) if !ctx.response().has_started() => {
                error!(peer = %peer_addr, error = %e, "handler failed, sending 500");
                send_plain(tx, StatusCode::InternalServerError, "Internal Server Error", keep_alive)
                    .await?;
            }
            Err(e) => {
                // Part of the body is already on the wire; the only honest
                // signal left is an unterminated response.
                warn!(peer = %peer_addr, error = %e, "handler failed mid-body, closing connection");
                break;
            }
        }

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Bytes>) -> io::Result<()> {
    while let Some(frame) = rx.recv().await {
        writer.write_all(&frame).await?;
    }
    writer.flush().await?;
    writer.shutdown().await
}

async fn send_plain(
    tx: &mpsc::Sender<Bytes>,
    status: StatusCode,
    body: &str,
    keep_alive: bool,
) -> io::Result<()> {
    let mut response = Response::new(Box::new(ConnectionSink::new(tx.clone(), keep_alive)));
    response.set_status(status);
    response.set_content_type("text/plain; charset=utf-8");
    response.set_content_length(Some(body.len() as u64));
    response.write(body.to_owned()).await?;
    response.finish().await
}

/// A [`BodySink`] that frames a response onto a connection.
///
/// The head is encoded from whatever the [`ResponseHead`] holds at the first
/// write, or at `finish` if the body is empty. After that, status and header
/// changes no longer reach the client.
pub struct ConnectionSink {
    tx: mpsc::Sender<Bytes>,
    keep_alive: bool,
    // `Some` once the head is on its way.
    framing: Option<Framing>,
    finished: bool,
}

impl ConnectionSink {
    pub fn new(tx: mpsc::Sender<Bytes>, keep_alive: bool) -> Self {
        Self {
            tx,
            keep_alive,
            framing: None,
            finished: false,
        }
    }

    async fn send(&self, frame: Bytes) -> io::Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection writer has shut down"))
    }

    async fn start(&mut self, head: &ResponseHead, body_empty: bool) -> io::Result<Framing> {
        if let Some(framing) = self.framing {
            return Ok(framing);
        }
        let (encoded, framing) = head.encode(self.keep_alive, body_empty);
        self.send(encoded.freeze()).await?;
        self.framing = Some(framing);
        Ok(framing)
    }
}

impl BodySink for ConnectionSink {
    fn write<'a>(&'a mut self, head: &'a ResponseHead, chunk: Bytes) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            if self.finished {
                return Err(io::Error::other("response body already finished"));
            }
            match self.start(head, false).await? {
                Framing::Chunked => {
                    let mut frame = BytesMut::with_capacity(chunk.len() + 12);
                    frame.put(format!("{:X}\r\n", chunk.len()).as_bytes());
                    frame.put(chunk);
                    frame.put(&b"\r\n"[..]);
                    self.send(frame.freeze()).await
                }
                Framing::Fixed => self.send(chunk).await,
                Framing::Empty => Ok(()),
            }
        })
    }

    fn finish<'a>(&'a mut self, head: &'a ResponseHead) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            if self.finished {
                return Ok(());
            }
            let framing = self.start(head, true).await?;
            self.finished = true;
            if framing == Framing::Chunked {
                self.send(Bytes::from_static(b"0\r\n\r\n")).await?;
            }
            Ok(())
        })
    }

    fn has_started(&self) -> bool {
        self.framing.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::middleware::{Endpoint, HandlerResult};

    async fn drain(mut rx: mpsc::Receiver<Bytes>) -> String {
        let mut out = Vec::new();
        while let Some(frame) = rx.recv().await {
            out.extend_from_slice(&frame);
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn sink_chunks_body_without_length() {
        let (tx, rx) = mpsc::channel(8);
        let mut response = Response::new(Box::new(ConnectionSink::new(tx, true)));
        response.set_content_type("text/html");
        assert!(!response.has_started());
        response.write("hello").await.unwrap();
        assert!(response.has_started());
        response.write(" world").await.unwrap();
        response.finish().await.unwrap();
        drop(response);

        let wire = drain(rx).await;
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("Transfer-Encoding: chunked\r\n"));
        assert!(wire.ends_with("\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn sink_writes_fixed_length_body_verbatim() {
        let (tx, rx) = mpsc::channel(8);
        let mut response = Response::new(Box::new(ConnectionSink::new(tx, false)));
        response.set_content_length(Some(2));
        response.write("ok").await.unwrap();
        response.finish().await.unwrap();
        drop(response);

        let wire = drain(rx).await;
        assert!(wire.contains("Content-Length: 2\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        assert!(wire.ends_with("\r\n\r\nok"));
    }

    #[tokio::test]
    async fn sink_finishing_empty_body_sends_zero_length() {
        let (tx, rx) = mpsc::channel(8);
        let mut response = Response::new(Box::new(ConnectionSink::new(tx, true)));
        response.set_status(StatusCode::NotFound);
        response.finish().await.unwrap();
        drop(response);

        let wire = drain(rx).await;
        assert!(wire.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(wire.contains("Content-Length: 0\r\n"));
        assert!(!wire.contains("chunked"));
    }

    #[tokio::test]
    async fn sink_reports_closed_connection() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let mut response = Response::new(Box::new(ConnectionSink::new(tx, true)));
        let err = response.write("lost").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    struct Site;

    impl Endpoint for Site {
        fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async move {
                let path = ctx.request().path().to_owned();
                match path.as_str() {
                    "/stream" => {
                        ctx.response_mut().set_content_type("text/plain");
                        ctx.response_mut().write("one").await?;
                        ctx.response_mut().write("two").await?;
                        Ok(())
                    }
                    "/broken-late" => {
                        ctx.response_mut().write("half").await?;
                        Err(io::Error::other("upstream went away").into())
                    }
                    _ => Err(io::Error::other("no such page").into()),
                }
            })
        }
    }

    async fn exchange(request: &str) -> String {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run(Pipeline::new(Site)));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn streams_chunked_response_over_tcp() {
        let wire = exchange("GET /stream HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("Content-Type: text/plain\r\n"));
        assert!(wire.ends_with("3\r\none\r\n3\r\ntwo\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn failure_before_body_becomes_500() {
        let wire = exchange("GET /missing HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(wire.ends_with("Internal Server Error"));
    }

    #[tokio::test]
    async fn failure_mid_body_leaves_response_unterminated() {
        let wire = exchange("GET /broken-late HTTP/1.1\r\nHost: t\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.ends_with("4\r\nhalf\r\n"));
        assert!(!wire.contains("500"));
    }

    #[tokio::test]
    async fn malformed_request_gets_400() {
        let wire = exchange("NOT A REQUEST\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
