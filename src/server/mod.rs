//! TCP accept loop and per-connection driver.
//!
//! Accepts TCP connections and runs one [`Connection`] per stream. The
//! driver task reads from the transport and feeds the connection; the
//! connection's worker task owns the write half and answers requests. When
//! either side ends (peer EOF, read error, parse error, idle timeout) the
//! driver runs the disconnect path and drops the stream.

use std::net::SocketAddr;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::container::Container;

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

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// A container bound to a listening socket.
///
/// Obtained from [`Container::bind`]; useful when the bound address must be
/// known before serving, e.g. with port `0`.
///
/// # Examples
///
/// ```rust,no_run
/// use webcontainer::{Container, HandlerError, Request};
///
/// async fn hello(_request: Request, _container: Container) -> Result<&'static str, HandlerError> {
///     Ok("Hello!")
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let container = Container::builder(hello).port(0).build()?;
///     let server = container.bind().await?;
///     println!("listening on {}", server.local_addr());
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    container: Container,
}

impl Server {
    /// Binds the container's configured `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(container: Container) -> Result<Self, ServerError> {
        let addr = container.config().bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            container,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until the container is stopped.
    ///
    /// Each accepted stream is served on its own task. Stopping only ends the
    /// accept loop; live connections finish through their normal close path.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if accepting a connection fails.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "container listening");

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = self.container.stopped() => {
                    info!(address = %self.local_addr, "container stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted?,
            };

            debug!(peer = %peer_addr, "connection accepted");
            let container = self.container.clone();
            tokio::spawn(serve_connection(stream, peer_addr, container));
        }
    }
}

/// Drives one transport stream through a [`Connection`] until it closes.
pub async fn serve_connection<S>(stream: S, peer_addr: SocketAddr, container: Container)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let mut conn = Connection::new(container);
    conn.on_connect(writer);

    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    loop {
        tokio::select! {
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
                Ok(_) => {
                    let data = buf.split();
                    if let Err(e) = conn.on_data(&data) {
                        warn!(peer = %peer_addr, error = %e, "malformed request, closing");
                        break;
                    }
                }
                Err(e) => {
                    debug!(peer = %peer_addr, error = %e, "read failed");
                    break;
                }
            },
            _ = conn.worker_finished() => {
                debug!(peer = %peer_addr, "worker ended");
                break;
            }
        }
    }

    conn.on_disconnect();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::net::TcpStream;

    use super::*;
    use crate::handler::HandlerError;
    use crate::http::Request;

    async fn echo(request: Request, _container: Container) -> Result<Bytes, HandlerError> {
        Ok(request.body().await?)
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    fn spawn_duplex(container: Container) -> (DuplexStream, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(serve_connection(server, peer(), container));
        (client, task)
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_closed_without_response() {
        let container = Container::builder(echo)
            .idle_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let (mut client, task) = spawn_duplex(container);

        let mut received = Vec::new();
        let n = client.read_to_end(&mut received).await.unwrap();
        assert_eq!(n, 0);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn trickling_bytes_keep_connection_alive() {
        let timeout = Duration::from_secs(5);
        let container = Container::builder(echo).idle_timeout(timeout).build().unwrap();
        let (mut client, task) = spawn_duplex(container);

        let raw = b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\n\r\nping";
        for byte in raw {
            tokio::time::sleep(timeout - Duration::from_millis(100)).await;
            client.write_all(&[*byte]).await.unwrap();
        }

        let mut buf = vec![0u8; 1024];
        let n = client.read(&mut buf).await.unwrap();
        let response = String::from_utf8(buf[..n].to_vec()).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("ping"));
        assert!(!task.is_finished());

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_while_waiting_for_body() {
        let container = Container::builder(echo)
            .idle_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let (mut client, task) = spawn_duplex(container);

        // The handler is dispatched and then suspends on the missing body bytes.
        client
            .write_all(b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap();

        let mut received = Vec::new();
        let n = client.read_to_end(&mut received).await.unwrap();
        assert_eq!(n, 0);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn handler_panic_answered_and_connection_kept() {
        async fn fragile(request: Request, _container: Container) -> Result<&'static str, HandlerError> {
            if request.path() == "/boom" {
                panic!("boom");
            }
            Ok("fine")
        }

        let (mut client, task) = spawn_duplex(Container::new(fragile));
        let mut buf = vec![0u8; 1024];

        client.write_all(b"GET /boom HTTP/1.1\r\n\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        let response = String::from_utf8(buf[..n].to_vec()).unwrap();
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(response.ends_with("boom"));

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        let response = String::from_utf8(buf[..n].to_vec()).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("fine"));
        assert!(!task.is_finished());

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn http10_connection_closed_after_response() {
        async fn ok(_request: Request, _container: Container) -> Result<&'static str, HandlerError> {
            Ok("OK")
        }

        let (mut client, task) = spawn_duplex(Container::new(ok));
        client
            .write_all(b"GET / HTTP/1.0\r\nHost: x\r\n\r\n")
            .await
            .unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        let response = String::from_utf8(received).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("\r\n\r\nOK"));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_request_closes_connection() {
        let (mut client, task) = spawn_duplex(Container::new(echo));
        client
            .write_all(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n")
            .await
            .unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn start_stop_over_tcp() {
        async fn abc(_request: Request, _container: Container) -> Result<&'static str, HandlerError> {
            Ok("abc")
        }

        let container = Container::builder(abc).port(0).build().unwrap();
        let server = container.bind().await.unwrap();
        let addr = server.local_addr();
        let running = tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 3\r\n\r\n111")
            .await
            .unwrap();
        let mut buf = vec![0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        let response = String::from_utf8(buf[..n].to_vec()).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(response.ends_with("abc"));

        container.stop();
        running.await.unwrap().unwrap();
        // Already-accepted connections outlive the accept loop.
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let n = stream.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).ends_with("abc"));
    }

    #[tokio::test]
    async fn start_returns_after_stop() {
        let container = Container::builder(echo).port(0).build().unwrap();
        let stopper = {
            let container = container.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                container.stop();
            })
        };
        container.start().await.unwrap();
        stopper.await.unwrap();
    }

    #[tokio::test]
    async fn bind_conflict_reported() {
        let first = Container::builder(echo)
            .port(0)
            .build()
            .unwrap()
            .bind()
            .await
            .unwrap();
        let taken = first.local_addr().port();
        let err = Container::builder(echo)
            .port(taken)
            .build()
            .unwrap()
            .bind()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
