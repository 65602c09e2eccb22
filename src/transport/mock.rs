//! A scriptable [`Transport`] double for deterministic tests, driving the
//! machine through a scripted sequence of inputs without a real network: a
//! test queues up [`TransportEvent`]s a connect/send call should surface,
//! and records every outbound call for assertions.

use std::collections::VecDeque;

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;
use crate::transport::{Transport, TransportEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Connect { url: Url, protocols: Vec<String> },
    Send(Vec<u8>),
    Ping,
    Close { code: u16, reason: String },
}

/// A [`Transport`] whose `connect` outcome and subsequent events are
/// prescripted, and whose outbound calls are recorded for later assertion.
#[derive(Debug, Default)]
pub struct MockTransport {
    connect_result: Option<Result<(), TransportError>>,
    events: VecDeque<TransportEvent>,
    pub calls: Vec<RecordedCall>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport::default()
    }

    /// The next `connect` call returns `result`, once.
    pub fn will_connect(mut self, result: Result<(), TransportError>) -> Self {
        self.connect_result = Some(result);
        self
    }

    /// Queues an event `next_event` will hand out, in order.
    pub fn push_event(&mut self, event: TransportEvent) {
        self.events.push_back(event);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, url: &Url, protocols: &[String]) -> Result<(), TransportError> {
        self.calls.push(RecordedCall::Connect {
            url: url.clone(),
            protocols: protocols.to_vec(),
        });
        match self.connect_result.take() {
            Some(result) => result,
            None => Ok(()),
        }
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.calls.push(RecordedCall::Send(payload.to_vec()));
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.calls.push(RecordedCall::Ping);
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.calls.push(RecordedCall::Close {
            code,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[async_std::test]
    async fn records_calls_in_order() {
        let mut t = MockTransport::new();
        let url = Url::parse("wss://example.test/socket").unwrap();
        t.connect(&url, &[]).await.unwrap();
        t.send(b"hi").await.unwrap();
        t.close(1000, "done").await.unwrap();
        assert_eq!(t.calls.len(), 3);
        assert!(matches!(t.calls[0], RecordedCall::Connect { .. }));
        assert_eq!(t.calls[1], RecordedCall::Send(b"hi".to_vec()));
    }

    #[async_std::test]
    async fn replays_queued_events_in_order() {
        let mut t = MockTransport::new();
        t.push_event(TransportEvent::Open);
        t.push_event(TransportEvent::Message(vec![1, 2, 3]));
        assert!(matches!(t.next_event().await, Some(TransportEvent::Open)));
        assert!(matches!(t.next_event().await, Some(TransportEvent::Message(_))));
        assert!(t.next_event().await.is_none());
    }

    #[async_std::test]
    async fn connect_can_be_scripted_to_fail() {
        let mut t = MockTransport::new().will_connect(Err(TransportError::Connect(String::from("refused"))));
        let url = Url::parse("wss://example.test/socket").unwrap();
        assert!(t.connect(&url, &[]).await.is_err());
    }
}
