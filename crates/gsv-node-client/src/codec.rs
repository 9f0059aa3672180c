// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! JSON-text-frame codec over a `tokio-tungstenite` socket (§4.1). Binary
//! frames (transfer chunks) are handled by callers directly — this codec
//! only ever produces/consumes `Frame`.

use futures_util::{SinkExt, StreamExt};
use gsv_protocol::Frame;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn send_frame(ws: &mut WsStream, frame: &Frame) -> anyhow::Result<()> {
    let text = serde_json::to_string(frame)?;
    ws.send(Message::Text(text)).await?;
    Ok(())
}

/// Reads until the next text frame, skipping ping/pong/binary, returning
/// `None` on a clean close.
pub async fn next_frame(ws: &mut WsStream) -> anyhow::Result<Option<Frame>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(serde_json::from_str(&text)?)),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}
