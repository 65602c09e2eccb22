//! The production [`Transport`]: a real WebSocket over `async-tungstenite`.
//!
//! A plain binary-message transport that answers a peer-initiated `Ping`
//! with a `Pong` immediately: an unanswered ping is exactly the kind of
//! silent half-open connection the reconnect logic exists to catch.

use async_tungstenite::async_std::ConnectStream;
use async_tungstenite::tungstenite::Message as WsMessage;
use async_tungstenite::tungstenite::protocol::CloseFrame;
use async_tungstenite::{WebSocketStream, async_std::connect_async};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use url::Url;

use crate::error::TransportError;
use crate::transport::{Transport, TransportEvent};

type Stream = WebSocketStream<ConnectStream>;

/// A not-yet-connected `WsTransport`. Holds nothing until `connect` succeeds;
/// the socket is acquired inside an `async fn`, never at construction time.
#[derive(Default)]
pub struct WsTransport {
    stream: Option<Stream>,
}

impl WsTransport {
    pub fn new() -> Self {
        WsTransport { stream: None }
    }

    fn stream_mut(&mut self) -> Result<&mut Stream, TransportError> {
        self.stream
            .as_mut()
            .ok_or_else(|| TransportError::Send(String::from("transport is not connected")))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&mut self, url: &Url, protocols: &[String]) -> Result<(), TransportError> {
        let request = build_request(url, protocols)?;
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.stream_mut()?
            .send(WsMessage::Binary(payload.to_vec()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.stream_mut()?
            .send(WsMessage::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: code.into(),
            reason: reason.to_string().into(),
        };
        self.stream_mut()?
            .send(WsMessage::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            let stream = self.stream.as_mut()?;
            let item = stream.next().await;
            match item {
                None => return Some(TransportEvent::Close {
                    code: 1006,
                    reason: String::from("stream ended without a close frame"),
                    was_clean: false,
                }),
                Some(Ok(WsMessage::Binary(data))) => return Some(TransportEvent::Message(data)),
                Some(Ok(WsMessage::Text(text))) => return Some(TransportEvent::Message(text.into_bytes())),
                Some(Ok(WsMessage::Ping(payload))) => {
                    if let Err(e) = stream.send(WsMessage::Pong(payload)).await {
                        return Some(TransportEvent::Error(e.to_string()));
                    }
                    continue;
                },
                Some(Ok(WsMessage::Pong(_))) => return Some(TransportEvent::Pong),
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(TransportEvent::Close {
                        code,
                        reason,
                        was_clean: true,
                    });
                },
                Some(Ok(WsMessage::Frame(_))) => continue,
                Some(Err(e)) => return Some(TransportEvent::Error(e.to_string())),
            }
        }
    }
}

fn build_request(
    url: &Url,
    protocols: &[String],
) -> Result<async_tungstenite::tungstenite::handshake::client::Request, TransportError> {
    use async_tungstenite::tungstenite::client::IntoClientRequest;
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    if !protocols.is_empty() {
        let value = protocols.join(", ");
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            value
                .parse()
                .map_err(|_| TransportError::Connect(String::from("invalid protocol header value")))?,
        );
    }
    Ok(request)
}

