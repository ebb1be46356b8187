//! In-process duplex transport.
//!
//! [`MemoryChannel::pair`] returns the client-side transport and an
//! [`EnginePort`] for whatever plays the remote engine: an embedded engine
//! running on another task, or a scripted fake in tests. Messages from the
//! engine side are delivered to listeners synchronously on the caller's task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::channel::transport::{
    Emitter, Listener, ListenerId, ListenerKind, ListenerSet, Terminate, Transport, TransportError,
};
use crate::protocol::{CorrelationId, Response, StreamEvent};

/// Client half of an in-process channel. Offers the [`Emitter`] style.
pub struct MemoryChannel {
    outbound: mpsc::UnboundedSender<Value>,
    shared: Arc<Shared>,
}

/// State visible from both halves.
struct Shared {
    listeners: ListenerSet,
    terminated: AtomicBool,
}

impl MemoryChannel {
    /// Create a connected client transport and engine port.
    pub fn pair() -> (Self, EnginePort) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            listeners: ListenerSet::new(),
            terminated: AtomicBool::new(false),
        });

        let channel = Self {
            outbound: tx,
            shared: shared.clone(),
        };
        let port = EnginePort {
            inbound: rx,
            replier: Replier { shared },
        };
        (channel, port)
    }

    /// Number of listeners currently registered.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryChannel {
    fn post(&self, message: Value) -> Result<(), TransportError> {
        if self.is_terminated() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(message)
            .map_err(|_| TransportError::ConnectionLost("engine port dropped".into()))
    }

    fn emitter(&self) -> Option<&dyn Emitter> {
        Some(self)
    }

    fn terminator(&self) -> Option<&dyn Terminate> {
        Some(self)
    }
}

impl Emitter for MemoryChannel {
    fn on(&self, listener: Listener) -> ListenerId {
        self.shared.listeners.add(listener)
    }

    fn off(&self, kind: ListenerKind, id: ListenerId) -> bool {
        self.shared.listeners.remove(kind, id);
        true
    }
}

#[async_trait]
impl Terminate for MemoryChannel {
    async fn terminate(&self) -> Result<(), TransportError> {
        self.shared.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine half of an in-process channel.
pub struct EnginePort {
    inbound: mpsc::UnboundedReceiver<Value>,
    replier: Replier,
}

impl EnginePort {
    /// Wait for the next request posted by the client.
    pub async fn recv(&mut self) -> Option<Value> {
        self.inbound.recv().await
    }

    /// Take a request if one is already queued.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.inbound.try_recv().ok()
    }

    /// Handle for sending messages back to the client.
    pub fn replier(&self) -> Replier {
        self.replier.clone()
    }

    /// Answer every request with `handler` on a background task.
    ///
    /// The handler gets the raw request and a [`Replier`] for emitting stream
    /// events. `Ok` becomes `{ok: true, result}`, `Err` becomes
    /// `{ok: false, error}`. Requests without a numeric `id` are ignored.
    pub fn serve<F>(mut self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(&Value, &Replier) -> Result<Value, String> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(request) = self.inbound.recv().await {
                let Some(id) = request.get("id").and_then(Value::as_u64) else {
                    continue;
                };
                let response = match handler(&request, &self.replier) {
                    Ok(result) => Response::success(CorrelationId(id), result),
                    Err(error) => Response::failure(CorrelationId(id), error),
                };
                self.replier.respond(&response);
            }
            debug!("Engine port closed");
        })
    }
}

/// Cloneable sender for engine-to-client traffic.
#[derive(Clone)]
pub struct Replier {
    shared: Arc<Shared>,
}

impl Replier {
    /// Deliver a raw value to the client's message listeners.
    pub fn deliver(&self, message: Value) {
        self.shared.listeners.emit_message(message);
    }

    pub fn respond(&self, response: &Response) {
        match serde_json::to_value(response) {
            Ok(value) => self.deliver(value),
            Err(e) => debug!("Failed to encode response: {}", e),
        }
    }

    pub fn emit(&self, event: &StreamEvent) {
        self.deliver(event.to_value());
    }

    /// Signal a fatal channel error, as a crashed worker would.
    pub fn fail(&self, error: TransportError) {
        self.shared.listeners.emit_error(error);
    }

    /// Whether the client side has terminated the channel.
    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }
}
