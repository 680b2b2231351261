//! `tokio-tungstenite` implementation of [`StreamTransport`].
//!
//! `open` returns immediately; a background task performs the handshake and
//! reports `Open` once the socket is usable, then pumps frames both ways.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use noderpc_core::error::TransportError;
use noderpc_core::transport::{
    Headers, StreamConnection, StreamEvent, StreamSender, StreamTransport,
};

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

enum Outgoing {
    Text(String),
    Close,
}

struct SocketSender {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl StreamSender for SocketSender {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(Outgoing::Text(text))
            .map_err(|_| TransportError::ConnectionClosed("WS task closed".into()))
    }

    fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }
}

#[async_trait]
impl StreamTransport for TungsteniteTransport {
    async fn open(&self, url: &str, headers: &Headers) -> Result<StreamConnection, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::WebSocket(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::WebSocket(e.to_string()))?;
            request.headers_mut().insert(name, value);
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(socket_task(request, out_rx, event_tx));

        Ok(StreamConnection {
            sender: Box::new(SocketSender { tx: out_tx }),
            events: event_rx,
        })
    }
}

/// Background task that owns the WebSocket connection.
async fn socket_task(
    request: Request,
    mut out_rx: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<StreamEvent>,
) {
    let url = request.uri().to_string();
    tracing::info!(url = %url, "connecting via WebSocket");

    let ws_stream = match tokio_tungstenite::connect_async(request).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "WS connect failed");
            let _ = events.send(StreamEvent::Error(e.to_string()));
            let _ = events.send(StreamEvent::Close);
            return;
        }
    };

    let _ = events.send(StreamEvent::Open);
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            out = out_rx.recv() => {
                match out {
                    None | Some(Outgoing::Close) => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    Some(Outgoing::Text(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            let _ = events.send(StreamEvent::Error(e.to_string()));
                            break;
                        }
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    None => break,
                    Some(Err(e)) => {
                        tracing::warn!(url = %url, error = %e, "WS receive error");
                        let _ = events.send(StreamEvent::Error(e.to_string()));
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(StreamEvent::Message(text.to_string()));
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            let _ = events.send(StreamEvent::Message(text));
                        }
                        Err(e) => {
                            tracing::debug!(url = %url, len = bytes.len(), error = %e, "ignoring non-UTF-8 binary frame");
                        }
                    },
                    Some(Ok(Message::Close(_))) => break,
                    _ => {}
                }
            }
        }
    }

    tracing::info!(url = %url, "WS disconnected");
    let _ = events.send(StreamEvent::Close);
}
