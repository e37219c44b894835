//! The handler contract and the request dispatch extension point.
//!
//! A handler is any async function taking the [`Request`] and the
//! [`Container`] it runs in, returning the response body:
//!
//! ```rust,no_run
//! use webcontainer::{Container, HandlerError, Request};
//!
//! async fn echo(request: Request, _container: Container) -> Result<Vec<u8>, HandlerError> {
//!     Ok(request.body().await?.to_vec())
//! }
//! ```
//!
//! Failures are reported as [`HandlerError`], which the worker loop turns into
//! a `500` response. Handler code creates them through
//! [`Container::create_error`] and inspects them through [`ErrorKind`] instead
//! of depending on a concrete error representation.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use thiserror::Error;

use crate::container::Container;
use crate::http::{BodyError, Request};

/// Boxed future returned by type-erased handlers and dispatchers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Bytes, HandlerError>> + Send>>;

/// What went wrong inside a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Raised by handler code via [`Container::create_error`].
    Handler,
    /// The connection closed before the request body was complete.
    BodyCancelled,
    /// The request body could not be decoded.
    InvalidBody,
    /// The handler panicked.
    Panicked,
}

/// An error produced while handling a request.
///
/// Displays as its message and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Wraps a payload caught from a panicking handler.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_owned()
        };
        Self::new(ErrorKind::Panicked, message)
    }
}

impl From<BodyError> for HandlerError {
    fn from(err: BodyError) -> Self {
        Self::new(ErrorKind::BodyCancelled, err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::InvalidBody, err.to_string())
    }
}

/// Type-erased request handler.
///
/// Implemented automatically for every
/// `Fn(Request, Container) -> impl Future<Output = Result<B, HandlerError>>`
/// where `B: Into<Bytes>`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request, container: Container) -> HandlerFuture;
}

impl<T, F, B> Handler for T
where
    T: Fn(Request, Container) -> F + Send + Sync + 'static,
    F: Future<Output = Result<B, HandlerError>> + Send + 'static,
    B: Into<Bytes> + Send,
{
    fn call(&self, request: Request, container: Container) -> HandlerFuture {
        let fut = (self)(request, container);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

/// Replaces the container's default request dispatch.
///
/// By default [`Container::handle_request`] hands every request to the
/// registered handler. Installing a `Dispatch` (for example a
/// [`Router`](crate::router::Router)) routes requests without touching the
/// connection or worker code. Implementations can still reach the registered
/// handler through [`Container::call_handler`].
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, request: Request, container: Container) -> HandlerFuture;
}
