//! The connection protocol state machine.
//!
//! A [`Connection`] turns the byte stream of one transport into a sequence of
//! [`Request`]s. It owns the wire parser, the per-connection worker task and
//! the idle timeout, and it is the only producer into the worker's queue.
//!
//! # Lifecycle
//!
//! ```text
//!   CLOSED ──on_connect──▶ PENDING ──on_header──▶ HEADER
//!                            ▲                       │
//!                            │              on_headers_complete
//!                 on_message_complete                │
//!                            │                       ▼
//!                            └─────────────────────BODY
//!
//!   any state ──on_disconnect──▶ CLOSED
//! ```
//!
//! The parser callbacks run synchronously inside [`Connection::on_data`], so
//! enqueuing a request and resolving its body are atomic with respect to the
//! worker. Requests are not pipelined: only the most recent request can be
//! waiting for its body, which is why a single body slot suffices.

use std::mem;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::container::Container;
use crate::http::request::BodyPromise;
use crate::http::{Headers, HttpParser, ParseError, ParserCallbacks, Request, RequestLine};

mod timeout;
mod worker;

use timeout::IdleTimeout;

/// Where the connection is in the current request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport attached.
    Closed,
    /// Waiting for the next request.
    Pending,
    /// Receiving headers.
    Header,
    /// Headers complete, receiving the body.
    Body,
}

/// Protocol state for one transport stream.
///
/// A connection is never reused: after [`on_disconnect`](Self::on_disconnect)
/// it stays [`Closed`](ConnectionState::Closed).
pub struct Connection {
    container: Container,
    state: ConnectionState,
    parser: Option<HttpParser>,
    request_line: Option<RequestLine>,
    headers: Headers,
    body: BytesMut,
    pending_body: Option<BodyPromise>,
    queue: Option<mpsc::UnboundedSender<Request>>,
    worker: Option<JoinHandle<()>>,
    timeout: Option<IdleTimeout>,
}

impl Connection {
    pub fn new(container: Container) -> Self {
        Self {
            container,
            state: ConnectionState::Closed,
            parser: None,
            request_line: None,
            headers: Headers::new(),
            body: BytesMut::new(),
            pending_body: None,
            queue: None,
            worker: None,
            timeout: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Headers accumulated for the request currently being parsed.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Idle timeout applied to this connection.
    pub fn idle_timeout(&self) -> Duration {
        self.container.idle_timeout()
    }

    /// Body bytes accumulated for the request currently being parsed.
    pub fn buffered_body(&self) -> &[u8] {
        &self.body
    }

    /// Attaches the write half of a transport: starts the worker task that
    /// owns it and arms the idle timeout.
    pub fn on_connect<W>(&mut self, transport: W)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.reset_message();
        self.state = ConnectionState::Pending;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(worker::run(rx, transport, self.container.clone()));
        self.timeout = Some(IdleTimeout::arm(
            self.container.idle_timeout(),
            worker.abort_handle(),
        ));
        self.queue = Some(tx);
        self.worker = Some(worker);
        debug!("connection started");
    }

    /// Feeds bytes received from the transport and restarts the idle timeout.
    ///
    /// # Errors
    ///
    /// Returns the parser's error if the stream is not valid HTTP/1.x. The
    /// caller is expected to disconnect.
    pub fn on_data(&mut self, data: &[u8]) -> Result<(), ParseError> {
        if data.is_empty() {
            return Ok(());
        }
        if let Some(timeout) = self.timeout.as_mut() {
            timeout.reset();
        }

        let mut parser = self.parser.take().unwrap_or_default();
        let result = parser.feed(data, self);
        self.parser = Some(parser);
        result
    }

    /// Tears the connection down: cancels the worker and the idle timeout
    /// together and drops all per-request state. An unresolved body is
    /// cancelled, never completed.
    pub fn on_disconnect(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        if let Some(mut timeout) = self.timeout.take() {
            timeout.cancel();
        }
        self.queue = None;
        self.parser = None;
        self.reset_message();
        self.state = ConnectionState::Closed;
        debug!("connection closed");
    }

    /// Resolves once the worker task has ended, for whatever reason.
    /// Never resolves while no worker is running.
    pub async fn worker_finished(&mut self) {
        match self.worker.as_mut() {
            Some(worker) => {
                let _ = worker.await;
                self.worker = None;
            }
            None => std::future::pending().await,
        }
    }

    fn reset_message(&mut self) {
        self.request_line = None;
        self.headers.clear();
        self.body.clear();
        self.pending_body = None;
    }
}

impl ParserCallbacks for Connection {
    fn on_request_line(&mut self, line: RequestLine) {
        self.request_line = Some(line);
    }

    fn on_header(&mut self, name: &str, value: &[u8]) {
        self.headers.insert(name, Bytes::copy_from_slice(value));
        self.state = ConnectionState::Header;
    }

    fn on_headers_complete(&mut self) {
        self.state = ConnectionState::Body;

        let Some(line) = self.request_line.take() else {
            return;
        };
        let (promise, body) = BodyPromise::new();
        self.pending_body = Some(promise);

        let request = Request::new(line, mem::take(&mut self.headers), body);
        if let Some(queue) = &self.queue {
            if queue.send(request).is_err() {
                debug!("worker gone, dropping request");
            }
        }
    }

    fn on_body_chunk(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    fn on_message_complete(&mut self) {
        if let Some(promise) = self.pending_body.take() {
            promise.resolve(self.body.split().freeze());
        }
        self.body.clear();
        self.state = ConnectionState::Pending;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
