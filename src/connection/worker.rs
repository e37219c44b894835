//! The per-connection worker loop.
//!
//! One worker task runs per connection. It takes requests off the
//! connection's queue strictly in arrival order, runs the container's
//! dispatch for each, and writes the response before looking at the next
//! request. Cancellation (idle timeout or disconnect) aborts the task at
//! whatever await point it is suspended on; nothing in here catches it.
//! Handler panics are caught and answered like handler errors.

use std::io;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::container::Container;
use crate::handler::HandlerError;
use crate::http::{Request, Response, StatusCode};

/// Runs until the queue closes, a request does not keep the connection
/// alive, or the transport reports it is closing.
pub(crate) async fn run<W>(
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut transport: W,
    container: Container,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(request) = requests.recv().await {
        let method = request.method().clone();
        let path = request.path().to_owned();
        let keep_alive = request.keep_alive();

        let outcome = AssertUnwindSafe(container.handle_request(request))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(HandlerError::from_panic(payload)));

        let response = match outcome {
            Ok(body) => Response::new(StatusCode::Ok).body(body),
            Err(e) => {
                warn!(%method, %path, error = %e, kind = ?e.kind(), "handler failed, sending 500");
                Response::new(StatusCode::InternalServerError).body(e.to_string())
            }
        };
        let status = response.status().as_u16();

        match write_response(&mut transport, response).await {
            Ok(()) => debug!(%method, %path, status, "response written"),
            Err(e) if is_closing(&e) => {
                debug!(error = %e, "transport closing, stopping worker");
                return;
            }
            Err(e) => {
                // Other write failures are dropped and the loop carries on.
                debug!(error = %e, "response write failed");
            }
        }

        if !keep_alive {
            debug!(%method, %path, "connection not kept alive, closing");
            break;
        }
    }

    // Teardown errors are irrelevant.
    let _ = transport.shutdown().await;
}

async fn write_response<W>(transport: &mut W, response: Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    transport.write_all(&response.into_bytes()).await?;
    transport.flush().await
}

/// Write errors meaning the peer or the transport is already shutting down.
fn is_closing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::WriteZero
    )
}
