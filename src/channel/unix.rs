//! Unix-domain-socket transport.
//!
//! One reader task decodes framed JSON and hands each value to the registered
//! listeners; one writer task drains the outbound queue. `post` never blocks.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::framing::{read_message, write_json};
use crate::channel::transport::{
    EventTarget, Listener, ListenerId, ListenerKind, ListenerSet, Terminate, Transport,
    TransportError,
};

/// Transport speaking Content-Length framed JSON over a Unix socket.
///
/// Offers the [`EventTarget`] listener style and supports [`Terminate`].
pub struct UnixChannel {
    listeners: Arc<ListenerSet>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
}

impl UnixChannel {
    /// Connect to a socket path.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the socket does not
    /// exist or the connection is refused.
    pub async fn connect(socket_path: &Path) -> Result<Self, TransportError> {
        let stream = UnixStream::connect(socket_path).await?;
        debug!(path = %socket_path.display(), "Connected to engine socket");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected stream. Must be called inside a tokio runtime.
    pub fn from_stream(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let listeners = Arc::new(ListenerSet::new());
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(read_half, listeners.clone(), closed.clone()));
        let writer = tokio::spawn(write_loop(write_half, rx, listeners.clone(), closed.clone()));

        Self {
            listeners,
            outbound: Mutex::new(Some(tx)),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn read_loop(read_half: OwnedReadHalf, listeners: Arc<ListenerSet>, closed: Arc<AtomicBool>) {
    let mut reader = BufReader::new(read_half);

    loop {
        let body = match read_message(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                if !closed.swap(true, Ordering::SeqCst) {
                    listeners.emit_error(TransportError::ConnectionLost(
                        "engine closed the socket".into(),
                    ));
                }
                return;
            }
            Err(e) => {
                if !closed.swap(true, Ordering::SeqCst) {
                    listeners.emit_error(TransportError::Protocol(format!("{:#}", e)));
                }
                return;
            }
        };

        match serde_json::from_str::<Value>(&body) {
            Ok(value) => listeners.emit_message(value),
            Err(e) => warn!("Dropping non-JSON frame: {}", e),
        }
    }
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Value>,
    listeners: Arc<ListenerSet>,
    closed: Arc<AtomicBool>,
) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = write_json(&mut write_half, &message).await {
            if !closed.swap(true, Ordering::SeqCst) {
                listeners.emit_error(TransportError::ConnectionLost(format!("{:#}", e)));
            }
            return;
        }
    }

    let _ = write_half.shutdown().await;
}

impl Transport for UnixChannel {
    fn post(&self, message: Value) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let outbound = self.outbound.lock().unwrap_or_else(|p| p.into_inner());
        match outbound.as_ref() {
            Some(tx) => tx.send(message).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn event_target(&self) -> Option<&dyn EventTarget> {
        Some(self)
    }

    fn terminator(&self) -> Option<&dyn Terminate> {
        Some(self)
    }
}

impl EventTarget for UnixChannel {
    fn add_event_listener(&self, listener: Listener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_event_listener(&self, kind: ListenerKind, id: ListenerId) {
        self.listeners.remove(kind, id);
    }
}

#[async_trait]
impl Terminate for UnixChannel {
    /// Flush queued messages, close the socket, and stop the reader.
    async fn terminate(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);

        // Dropping the sender lets the writer drain and shut the socket down.
        drop(self.outbound.lock().unwrap_or_else(|p| p.into_inner()).take());

        let writer = self.writer.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                if !e.is_cancelled() {
                    return Err(TransportError::Io(format!("writer task failed: {}", e)));
                }
            }
        }

        if let Some(reader) = self.reader.lock().unwrap_or_else(|p| p.into_inner()).take() {
            reader.abort();
        }

        Ok(())
    }
}

impl Drop for UnixChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().unwrap_or_else(|p| p.into_inner()).take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::framing::write_message;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_post_reaches_peer() {
        let (client, server) = UnixStream::pair().unwrap();
        let channel = UnixChannel::from_stream(client);

        channel.post(serde_json::json!({"id": 1, "type": "init"})).unwrap();

        let mut reader = BufReader::new(server);
        let body = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .unwrap();
        assert_eq!(body.as_deref(), Some(r#"{"id":1,"type":"init"}"#));
    }

    #[tokio::test]
    async fn test_inbound_frames_reach_listeners() {
        let (client, mut server) = UnixStream::pair().unwrap();
        let channel = UnixChannel::from_stream(client);

        let (tx, mut rx) = unbounded_channel();
        channel.add_event_listener(Listener::Message(Arc::new(move |value| {
            let _ = tx.send(value);
        })));

        write_message(&mut server, "not json").await.unwrap();
        write_message(&mut server, r#"{"id":1,"ok":true,"result":0}"#).await.unwrap();

        let value = timeout(TEST_TIMEOUT, rx.recv()).await.expect("Test timed out");
        assert_eq!(value, Some(serde_json::json!({"id": 1, "ok": true, "result": 0})));
    }

    #[tokio::test]
    async fn test_peer_close_is_reported_once() {
        let (client, server) = UnixStream::pair().unwrap();
        let channel = UnixChannel::from_stream(client);

        let (tx, mut rx) = unbounded_channel();
        channel.add_event_listener(Listener::Error(Arc::new(move |err| {
            let _ = tx.send(err);
        })));

        drop(server);

        let err = timeout(TEST_TIMEOUT, rx.recv()).await.expect("Test timed out");
        assert!(matches!(err, Some(TransportError::ConnectionLost(_))));
        assert!(channel.is_closed());
        assert_eq!(channel.post(Value::Null), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_terminate_flushes_and_closes() {
        let (client, server) = UnixStream::pair().unwrap();
        let channel = UnixChannel::from_stream(client);

        channel.post(serde_json::json!({"id": 2})).unwrap();
        timeout(TEST_TIMEOUT, channel.terminate())
            .await
            .expect("Test timed out")
            .unwrap();

        let mut reader = BufReader::new(server);
        assert_eq!(read_message(&mut reader).await.unwrap().as_deref(), Some(r#"{"id":2}"#));
        assert_eq!(read_message(&mut reader).await.unwrap(), None);
        assert_eq!(channel.post(Value::Null), Err(TransportError::Closed));
    }
}
