//! The web container: handler registration, dispatch, and start/stop.
//!
//! A [`Container`] bundles everything the connections of one server share:
//! the user handler, an optional [`Dispatch`] strategy, the configuration and
//! the stop signal. It is cheap to clone; every clone refers to the same
//! container, so a handler receiving one can stop the server or create errors.
//!
//! ```rust,no_run
//! use webcontainer::{Container, HandlerError, Request};
//!
//! async fn hello(_request: Request, _container: Container) -> Result<&'static str, HandlerError> {
//!     Ok("Hello, World!")
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let container = Container::builder(hello).host("127.0.0.1").port(8080).build()?;
//!     container.start().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;

use crate::config::{ConfigError, ContainerConfig};
use crate::handler::{Dispatch, ErrorKind, Handler, HandlerError};
use crate::http::Request;
use crate::server::{Server, ServerError};

struct Inner {
    handler: Arc<dyn Handler>,
    dispatcher: Option<Arc<dyn Dispatch>>,
    config: ContainerConfig,
    idle_timeout: Duration,
    stop: watch::Sender<bool>,
}

/// Shared state for all connections of one server.
#[derive(Clone)]
pub struct Container {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("config", &self.inner.config)
            .field("idle_timeout", &self.inner.idle_timeout)
            .field("has_dispatcher", &self.inner.dispatcher.is_some())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Builder for [`Container`].
pub struct ContainerBuilder {
    handler: Arc<dyn Handler>,
    dispatcher: Option<Arc<dyn Dispatch>>,
    config: ContainerConfig,
    idle_timeout: Option<Duration>,
}

impl ContainerBuilder {
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the idle timeout with sub-second precision, overriding
    /// `idle_timeout_seconds` from the configuration.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Replaces host, port and idle timeout with `config`.
    #[must_use]
    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self.idle_timeout = None;
        self
    }

    /// Installs a dispatch strategy in front of the registered handler.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: impl Dispatch) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// Finishes the container.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroIdleTimeout`] if the effective idle timeout
    /// is zero, which would cancel every connection as soon as it opens.
    pub fn build(self) -> Result<Container, ConfigError> {
        match self.idle_timeout {
            Some(timeout) if timeout.is_zero() => return Err(ConfigError::ZeroIdleTimeout),
            Some(_) => {}
            None => self.config.validate()?,
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> Container {
        let idle_timeout = self
            .idle_timeout
            .unwrap_or_else(|| self.config.idle_timeout());
        let (stop, _) = watch::channel(false);

        Container {
            inner: Arc::new(Inner {
                handler: self.handler,
                dispatcher: self.dispatcher,
                config: self.config,
                idle_timeout,
                stop,
            }),
        }
    }
}

impl Container {
    /// Creates a container with default configuration around `handler`.
    pub fn new<H, F, B>(handler: H) -> Self
    where
        H: Fn(Request, Container) -> F + Send + Sync + 'static,
        F: Future<Output = Result<B, HandlerError>> + Send + 'static,
        B: Into<Bytes> + Send,
    {
        // The default configuration is always valid.
        Self::builder(handler).assemble()
    }

    /// Starts building a container around `handler`.
    pub fn builder<H, F, B>(handler: H) -> ContainerBuilder
    where
        H: Fn(Request, Container) -> F + Send + Sync + 'static,
        F: Future<Output = Result<B, HandlerError>> + Send + 'static,
        B: Into<Bytes> + Send,
    {
        ContainerBuilder {
            handler: Arc::new(handler),
            dispatcher: None,
            config: ContainerConfig::default(),
            idle_timeout: None,
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    /// Maximum silence tolerated on a connection.
    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    /// Produces the response body for `request`.
    ///
    /// Delegates to the installed [`Dispatch`] if there is one, otherwise to
    /// the registered handler.
    pub async fn handle_request(&self, request: Request) -> Result<Bytes, HandlerError> {
        match &self.inner.dispatcher {
            Some(dispatcher) => dispatcher.dispatch(request, self.clone()).await,
            None => self.call_handler(request).await,
        }
    }

    /// Invokes the registered handler directly, bypassing any dispatcher.
    pub async fn call_handler(&self, request: Request) -> Result<Bytes, HandlerError> {
        self.inner.handler.call(request, self.clone()).await
    }

    /// Creates the error a handler returns to signal failure. The client
    /// receives a `500` response carrying `message`.
    pub fn create_error(&self, message: impl Into<String>) -> HandlerError {
        HandlerError::new(ErrorKind::Handler, message)
    }

    /// Binds the configured address without accepting connections yet.
    pub async fn bind(&self) -> Result<Server, ServerError> {
        Server::bind(self.clone()).await
    }

    /// Binds the configured address and serves connections until
    /// [`stop`](Self::stop) is called.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound and
    /// [`ServerError::Io`] if accepting connections fails.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.bind().await?.run().await
    }

    /// Signals the accept loop to end. Safe to call from any task, any number
    /// of times. Connections already accepted are left to finish on their own.
    pub fn stop(&self) {
        self.inner.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stop.borrow()
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub(crate) async fn stopped(&self) {
        let mut rx = self.inner.stop.subscribe();
        // The sender lives in `inner`, so the channel cannot close while `self` exists.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerFuture;
    use crate::http::request::BodyPromise;
    use crate::http::{Headers, Method, RequestLine, Version};

    fn request(path: &str) -> Request {
        let (promise, rx) = BodyPromise::new();
        promise.resolve(Bytes::from_static(b"111"));
        Request::new(
            RequestLine {
                method: Method::Post,
                target: path.to_owned(),
                version: Version::Http11,
            },
            Headers::new(),
            rx,
        )
    }

    async fn abc(_request: Request, _container: Container) -> Result<&'static str, HandlerError> {
        Ok("abc")
    }

    #[test]
    fn create_error_displays_message() {
        let container = Container::new(abc);
        let err = container.create_error("blub");
        assert_eq!(err.to_string(), "blub");
        assert_eq!(err.kind(), ErrorKind::Handler);
    }

    #[test]
    fn builder_overrides() {
        let container = Container::builder(abc)
            .host("0.0.0.0")
            .port(9999)
            .idle_timeout(Duration::from_millis(250))
            .build()
            .unwrap();
        assert_eq!(container.config().bind_addr(), "0.0.0.0:9999");
        assert_eq!(container.idle_timeout(), Duration::from_millis(250));

        let from_config = Container::builder(abc)
            .config(ContainerConfig {
                idle_timeout_seconds: 7,
                ..ContainerConfig::default()
            })
            .build()
            .unwrap();
        assert_eq!(from_config.idle_timeout(), Duration::from_secs(7));
    }

    #[test]
    fn zero_idle_timeout_rejected() {
        let err = Container::builder(abc)
            .idle_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroIdleTimeout));

        let err = Container::builder(abc)
            .config(ContainerConfig {
                idle_timeout_seconds: 0,
                ..ContainerConfig::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroIdleTimeout));
    }

    #[tokio::test]
    async fn handle_request_defaults_to_handler() {
        let container = Container::new(abc);
        let body = container.handle_request(request("/")).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn dispatcher_takes_over() {
        struct Shout;

        impl Dispatch for Shout {
            fn dispatch(&self, request: Request, container: Container) -> HandlerFuture {
                Box::pin(async move {
                    if request.path() == "/shout" {
                        Ok(Bytes::from_static(b"ABC"))
                    } else {
                        container.call_handler(request).await
                    }
                })
            }
        }

        let container = Container::builder(abc).dispatcher(Shout).build().unwrap();
        assert_eq!(
            container.handle_request(request("/shout")).await.unwrap(),
            Bytes::from_static(b"ABC")
        );
        assert_eq!(
            container.handle_request(request("/other")).await.unwrap(),
            Bytes::from_static(b"abc")
        );
    }

    #[tokio::test]
    async fn stop_is_sticky_and_observable() {
        let container = Container::new(abc);
        assert!(!container.is_stopped());

        let waiter = {
            let container = container.clone();
            tokio::spawn(async move { container.stopped().await })
        };
        container.stop();
        waiter.await.unwrap();

        assert!(container.is_stopped());
        // A late waiter returns immediately.
        container.stopped().await;
    }
}
