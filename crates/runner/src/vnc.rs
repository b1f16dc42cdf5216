// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framebuffer tunnel client for the vnc worker.
//!
//! Bridges the local RFB TCP port to the gateway's `/ws/vnc/{runId}`
//! endpoint, identifying as the runner side via `X-VNC-Client: true`.
//! Reconnects with backoff until shutdown.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Local RFB port served by x11vnc/vncserver.
pub const RFB_PORT: u16 = 5900;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Spawn the tunnel bridge task.
pub fn spawn_tunnel_bridge(tunnel_url: String, shutdown: CancellationToken) {
    tokio::spawn(async move {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match bridge_once(&tunnel_url, &shutdown).await {
                Ok(()) => tracing::info!("vnc tunnel closed"),
                Err(e) => tracing::warn!(err = %e, "vnc tunnel error"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    });
}

/// One bridge session: WS to the gateway, TCP to the local framebuffer.
async fn bridge_once(tunnel_url: &str, shutdown: &CancellationToken) -> anyhow::Result<()> {
    let mut request = tunnel_url.into_client_request()?;
    request.headers_mut().insert("x-vnc-client", HeaderValue::from_static("true"));
    let (ws, _resp) = tokio_tungstenite::connect_async(request).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let mut tcp = tokio::net::TcpStream::connect(("127.0.0.1", RFB_PORT)).await?;
    tracing::info!("vnc tunnel bridged to 127.0.0.1:{RFB_PORT}");

    let mut buf = vec![0u8; 64 * 1024];
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
            read = tcp.read(&mut buf) => {
                match read {
                    Ok(0) => return Ok(()),
                    Ok(n) => {
                        ws_tx.send(Message::Binary(buf[..n].to_vec().into())).await?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        tcp.write_all(&data).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }
}
