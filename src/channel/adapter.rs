//! Uniform attach/detach over heterogeneous transports.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use crate::channel::transport::{Listener, ListenerId, ListenerKind, Transport, TransportError};
use crate::protocol::{Inbound, Request};

/// Registration style detected on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStyle {
    /// `add_event_listener` / `remove_event_listener`.
    EventTarget,
    /// `on` / `off`.
    Emitter,
    /// No registration API; nothing is attached.
    Unsupported,
}

/// What the adapter registered, kept so detach removes exactly that.
#[derive(Debug, Clone, Copy)]
struct Attachment {
    message: ListenerId,
    error: ListenerId,
}

/// Wraps one transport: posts requests, classifies inbound traffic, and owns
/// the one message listener and one error listener it attached.
pub struct ChannelAdapter {
    transport: Arc<dyn Transport>,
    style: ListenerStyle,
    attachment: Mutex<Option<Attachment>>,
}

impl ChannelAdapter {
    /// Probe the transport and attach listeners using the first style it offers.
    ///
    /// `on_inbound` receives every well-formed response or stream event;
    /// anything else is dropped here. `on_error` receives transport failures.
    pub fn attach<M, E>(transport: Arc<dyn Transport>, on_inbound: M, on_error: E) -> Self
    where
        M: Fn(Inbound) + Send + Sync + 'static,
        E: Fn(TransportError) + Send + Sync + 'static,
    {
        let message = Listener::Message(Arc::new(move |raw: Value| match Inbound::classify(raw) {
            Some(inbound) => on_inbound(inbound),
            None => warn!("Dropping malformed inbound message"),
        }));
        let error = Listener::Error(Arc::new(on_error));

        let (style, attachment) = if let Some(target) = transport.event_target() {
            let attachment = Attachment {
                message: target.add_event_listener(message),
                error: target.add_event_listener(error),
            };
            (ListenerStyle::EventTarget, Some(attachment))
        } else if let Some(emitter) = transport.emitter() {
            let attachment = Attachment {
                message: emitter.on(message),
                error: emitter.on(error),
            };
            (ListenerStyle::Emitter, Some(attachment))
        } else {
            warn!("Transport offers no listener API; inbound messages will not be received");
            (ListenerStyle::Unsupported, None)
        };

        debug!(?style, "Attached channel listeners");

        Self {
            transport,
            style,
            attachment: Mutex::new(attachment),
        }
    }

    pub fn style(&self) -> ListenerStyle {
        self.style
    }

    /// Whether listeners are currently attached.
    pub fn is_attached(&self) -> bool {
        self.lock().is_some()
    }

    /// Serialize and post one request.
    pub fn post(&self, request: &Request) -> Result<(), TransportError> {
        let message = request
            .to_value()
            .map_err(|e| TransportError::Protocol(format!("Failed to encode request: {}", e)))?;
        debug!(id = %request.id, kind = request.body.kind(), "Posting request");
        self.transport.post(message)
    }

    /// Remove the listeners attached in [`attach`](Self::attach). Idempotent.
    ///
    /// An emitter without `off` support keeps its listeners; shutting the
    /// transport down is then the only cleanup.
    pub fn detach(&self) {
        let Some(attachment) = self.lock().take() else {
            return;
        };

        match self.style {
            ListenerStyle::EventTarget => {
                if let Some(target) = self.transport.event_target() {
                    target.remove_event_listener(ListenerKind::Message, attachment.message);
                    target.remove_event_listener(ListenerKind::Error, attachment.error);
                }
            }
            ListenerStyle::Emitter => {
                if let Some(emitter) = self.transport.emitter() {
                    let removed_message = emitter.off(ListenerKind::Message, attachment.message);
                    let removed_error = emitter.off(ListenerKind::Error, attachment.error);
                    if !(removed_message && removed_error) {
                        debug!("Emitter cannot detach listeners; relying on shutdown");
                    }
                }
            }
            ListenerStyle::Unsupported => {}
        }
    }

    /// Ask the transport to shut down. Returns `false` if it cannot.
    pub async fn shutdown(&self) -> Result<bool, TransportError> {
        match self.transport.terminator() {
            Some(terminator) => terminator.terminate().await.map(|()| true),
            None => Ok(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Attachment>> {
        self.attachment.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
