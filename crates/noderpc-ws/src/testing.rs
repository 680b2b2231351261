//! In-process stream transport for tests.
//!
//! [`MockStreamTransport`] records every frame the channel writes and lets a
//! test inject frames and lifecycle events as if they came from the node.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use noderpc_core::error::TransportError;
use noderpc_core::transport::{
    Headers, StreamConnection, StreamEvent, StreamSender, StreamTransport,
};

/// How a freshly opened mock connection behaves.
#[derive(Debug, Clone)]
enum OpenBehavior {
    Ready,
    Silent,
    Refuse(String),
}

#[derive(Default)]
struct Recorded {
    sent: Vec<String>,
    headers: Vec<Headers>,
    events: Option<mpsc::UnboundedSender<StreamEvent>>,
}

/// Scriptable [`StreamTransport`].
#[derive(Clone)]
pub struct MockStreamTransport {
    behavior: OpenBehavior,
    recorded: Arc<Mutex<Recorded>>,
    opens: Arc<AtomicUsize>,
    client_closes: Arc<AtomicUsize>,
}

impl MockStreamTransport {
    /// Connections report `Open` as soon as they are created.
    pub fn new() -> Self {
        Self::with_behavior(OpenBehavior::Ready)
    }

    /// Connections never become ready.
    pub fn silent() -> Self {
        Self::with_behavior(OpenBehavior::Silent)
    }

    /// Connections report an error and close before becoming ready.
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self::with_behavior(OpenBehavior::Refuse(reason.into()))
    }

    fn with_behavior(behavior: OpenBehavior) -> Self {
        Self {
            behavior,
            recorded: Arc::default(),
            opens: Arc::default(),
            client_closes: Arc::default(),
        }
    }

    /// Deliver a JSON frame on the latest connection.
    pub fn inject(&self, frame: Value) {
        self.emit(StreamEvent::Message(frame.to_string()));
    }

    /// Deliver a raw text frame on the latest connection.
    pub fn inject_text(&self, text: impl Into<String>) {
        self.emit(StreamEvent::Message(text.into()));
    }

    /// Report a transport error on the latest connection.
    pub fn fail(&self, reason: impl Into<String>) {
        self.emit(StreamEvent::Error(reason.into()));
    }

    /// Close the latest connection from the node side.
    pub fn close(&self) {
        self.emit(StreamEvent::Close);
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(events) = &self.recorded.lock().unwrap().events {
            let _ = events.send(event);
        }
    }

    /// Every frame written so far, parsed as JSON.
    pub fn sent(&self) -> Vec<Value> {
        self.recorded
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// Wait until at least `n` frames were written, then return them all.
    ///
    /// Panics after two seconds.
    pub async fn wait_for_sent(&self, n: usize) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let sent = self.sent();
            if sent.len() >= n {
                return sent;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {n} frames, saw {}",
                sent.len()
            );
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Headers passed to each `open`.
    pub fn handshake_headers(&self) -> Vec<Headers> {
        self.recorded.lock().unwrap().headers.clone()
    }

    /// Number of connections opened.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of times the client asked a connection to close.
    pub fn client_closes(&self) -> usize {
        self.client_closes.load(Ordering::SeqCst)
    }
}

impl Default for MockStreamTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct MockSender {
    recorded: Arc<Mutex<Recorded>>,
    events: mpsc::UnboundedSender<StreamEvent>,
    client_closes: Arc<AtomicUsize>,
}

impl StreamSender for MockSender {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.events.is_closed() {
            return Err(TransportError::ConnectionClosed("mock stream closed".into()));
        }
        self.recorded.lock().unwrap().sent.push(text);
        Ok(())
    }

    fn close(&self) {
        self.client_closes.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(StreamEvent::Close);
    }
}

#[async_trait]
impl StreamTransport for MockStreamTransport {
    async fn open(&self, _url: &str, headers: &Headers) -> Result<StreamConnection, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        match &self.behavior {
            OpenBehavior::Ready => {
                let _ = tx.send(StreamEvent::Open);
            }
            OpenBehavior::Silent => {}
            OpenBehavior::Refuse(reason) => {
                let _ = tx.send(StreamEvent::Error(reason.clone()));
                let _ = tx.send(StreamEvent::Close);
            }
        }

        {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.headers.push(headers.clone());
            recorded.events = Some(tx.clone());
        }

        Ok(StreamConnection {
            sender: Box::new(MockSender {
                recorded: self.recorded.clone(),
                events: tx,
                client_closes: self.client_closes.clone(),
            }),
            events: rx,
        })
    }
}
