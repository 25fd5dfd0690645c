use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

use super::http::{read_request, write_response, HttpResponse, Incoming, MAX_BODY_BYTES};
use super::routes::dispatch;
use crate::app::App;
use crate::db::Storage;
use crate::error::Result;

/// How long a client gets to deliver its whole request.
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts connections until the listener fails or the task is dropped.
/// Each connection is served on its own task.
pub async fn serve<S: Storage>(app: App<S>, listener: TcpListener) -> Result<()> {
    accept_loop(app, listener, READ_TIMEOUT).await
}

async fn accept_loop<S: Storage>(
    app: App<S>,
    listener: TcpListener,
    read_timeout: Duration,
) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("Listening on http://{}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let app = app.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(app, stream, read_timeout).await {
                        tracing::warn!("Connection error from {peer}: {e}");
                    }
                });
            }
            Err(e) => {
                // Usually EMFILE; back off before retrying.
                tracing::error!("Accept error: {e}");
                sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn handle_connection<S: Storage>(
    app: App<S>,
    mut stream: TcpStream,
    read_timeout: Duration,
) -> std::io::Result<()> {
    let incoming = match timeout(read_timeout, read_request(&mut stream)).await {
        Ok(incoming) => incoming?,
        Err(_) => {
            tracing::warn!("Client did not send a full request within {read_timeout:?}");
            let response = HttpResponse::error(408, "REQUEST_TIMEOUT", "Request timed out");
            write_response(&mut stream, &response).await?;
            return stream.shutdown().await;
        }
    };
    let response = match incoming {
        Incoming::Closed => return Ok(()),
        Incoming::Malformed => HttpResponse::error(400, "BAD_REQUEST", "Malformed HTTP request"),
        Incoming::BodyTooLarge => HttpResponse::error(
            413,
            "PAYLOAD_TOO_LARGE",
            &format!("Request body exceeds {MAX_BODY_BYTES} bytes"),
        ),
        Incoming::Request(request) => dispatch(&app, request).await,
    };
    write_response(&mut stream, &response).await?;
    stream.shutdown().await
}
