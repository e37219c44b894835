//! # webcontainer
//!
//! A minimal async HTTP/1.1 web container.
//!
//! Every accepted TCP stream gets a [`Connection`](connection::Connection)
//! that parses requests as bytes arrive, a worker task that answers them one
//! at a time in arrival order, and an idle timeout that closes the stream
//! after a period of silence. The user supplies one async handler returning
//! the response body; a handler error becomes a `500` response.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use webcontainer::{Container, HandlerError, Request};
//!
//! async fn echo(request: Request, _container: Container) -> Result<Vec<u8>, HandlerError> {
//!     Ok(request.body().await?.to_vec())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let container = Container::builder(echo).port(8888).build()?;
//!     container.start().await?;
//!     Ok(())
//! }
//! ```
//!
//! Not supported: chunked transfer coding, compression, HTTP/2, HTTP/1.0
//! keep-alive and request pipelining.

pub mod config;
pub mod connection;
pub mod container;
pub mod handler;
pub mod http;
pub mod router;
pub mod server;

pub use config::ContainerConfig;
pub use container::{Container, ContainerBuilder};
pub use handler::{Dispatch, ErrorKind, HandlerError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
