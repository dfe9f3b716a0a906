//! WebSocket-транспорт к relay. Один кадр = одно текстовое сообщение.

use super::{SignalingEvent, SignalingLink, SignalingMessage};
use crate::error::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Подключается к relay. Первым событием всегда идёт `Connected`,
/// последним ровно один `Disconnected`; переподключения нет.
pub async fn connect(url: &str) -> Result<SignalingLink> {
    info!("Connecting to signaling relay at {url}");
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalingMessage>();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let _ = in_tx.send(SignalingEvent::Connected);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                outgoing = out_rx.recv() => {
                    // сессия закрыла свою сторону
                    let Some(msg) = outgoing else { break };
                    let text = match msg.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode '{}': {e}", msg.event_name());
                            continue;
                        }
                    };
                    debug!("-> '{}'", msg.event_name());
                    if let Err(e) = ws_tx.send(Message::Text(text)).await {
                        warn!("Signaling write failed: {e}");
                        break;
                    }
                }
                incoming = ws_rx.next() => {
                    let text = match incoming {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws_tx.send(Message::Pong(payload)).await;
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!("Signaling read failed: {e}");
                            break;
                        }
                    };
                    let event = match SignalingMessage::decode(&text) {
                        Ok(msg) => SignalingEvent::Message(msg),
                        Err(e) => SignalingEvent::Malformed(e.to_string()),
                    };
                    if in_tx.send(event).is_err() {
                        break;
                    }
                }
            }
        }

        let _ = ws_tx.close().await;
        info!("Signaling connection closed");
        let _ = in_tx.send(SignalingEvent::Disconnected);
    });

    Ok(SignalingLink {
        outbound: out_tx,
        inbound: in_rx,
    })
}
