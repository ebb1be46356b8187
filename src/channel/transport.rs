//! Transport capability traits.
//!
//! A transport moves JSON values across an execution-context boundary. How it
//! lets callers register for inbound traffic varies: some expose an
//! add/remove-listener pair ([`EventTarget`]), some an `on`/`off` pair
//! ([`Emitter`], where `off` may be unsupported), and some neither. Shutdown
//! is likewise optional ([`Terminate`]). The [`ChannelAdapter`] probes these
//! capabilities once so the client never branches on transport type.
//!
//! [`ChannelAdapter`]: crate::channel::ChannelAdapter

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a transport.
///
/// Cloneable so one fatal error can be delivered to several listeners.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not reach the remote side.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote execution context went away.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The transport was shut down locally.
    #[error("Channel closed")]
    Closed,

    /// Framing or encoding failure.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                TransportError::ConnectionFailed(err.to_string())
            }
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset => {
                TransportError::ConnectionLost(err.to_string())
            }
            _ => TransportError::Io(err.to_string()),
        }
    }
}

/// Callback for raw inbound messages.
pub type MessageListener = Arc<dyn Fn(Value) + Send + Sync>;

/// Callback for transport-level failures.
pub type ErrorListener = Arc<dyn Fn(TransportError) + Send + Sync>;

/// Which event a listener is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Message,
    Error,
}

/// A listener for one of the two channel events.
#[derive(Clone)]
pub enum Listener {
    Message(MessageListener),
    Error(ErrorListener),
}

impl Listener {
    pub fn kind(&self) -> ListenerKind {
        match self {
            Listener::Message(_) => ListenerKind::Message,
            Listener::Error(_) => ListenerKind::Error,
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Listener").field(&self.kind()).finish()
    }
}

/// Token returned on registration, used to detach the same listener later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// `addEventListener` / `removeEventListener` registration style.
pub trait EventTarget: Send + Sync {
    fn add_event_listener(&self, listener: Listener) -> ListenerId;
    fn remove_event_listener(&self, kind: ListenerKind, id: ListenerId);
}

/// `on` / `off` registration style.
pub trait Emitter: Send + Sync {
    fn on(&self, listener: Listener) -> ListenerId;

    /// Detach a listener. Returns `false` if this emitter cannot detach.
    fn off(&self, _kind: ListenerKind, _id: ListenerId) -> bool {
        false
    }
}

/// Transports that can be shut down from the client side.
#[async_trait]
pub trait Terminate: Send + Sync {
    async fn terminate(&self) -> Result<(), TransportError>;
}

/// An opaque bidirectional message channel.
///
/// Only `post` is mandatory. The capability accessors return `None` when the
/// transport does not offer that style.
pub trait Transport: Send + Sync + 'static {
    /// Queue one message for the remote side.
    fn post(&self, message: Value) -> Result<(), TransportError>;

    fn event_target(&self) -> Option<&dyn EventTarget> {
        None
    }

    fn emitter(&self) -> Option<&dyn Emitter> {
        None
    }

    fn terminator(&self) -> Option<&dyn Terminate> {
        None
    }
}

/// Listener bookkeeping shared by the bundled transports.
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Listener)>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock().push((id, listener));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove(&self, kind: ListenerKind, id: ListenerId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(entry_id, listener)| !(*entry_id == id && listener.kind() == kind));
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a message to every message listener.
    pub fn emit_message(&self, message: Value) {
        let listeners: Vec<MessageListener> = self
            .lock()
            .iter()
            .filter_map(|(_, listener)| match listener {
                Listener::Message(cb) => Some(cb.clone()),
                Listener::Error(_) => None,
            })
            .collect();

        for listener in listeners {
            listener(message.clone());
        }
    }

    /// Deliver a failure to every error listener.
    pub fn emit_error(&self, error: TransportError) {
        let listeners: Vec<ErrorListener> = self
            .lock()
            .iter()
            .filter_map(|(_, listener)| match listener {
                Listener::Error(cb) => Some(cb.clone()),
                Listener::Message(_) => None,
            })
            .collect();

        for listener in listeners {
            listener(error.clone());
        }
    }

    // Listeners are cloned out before being invoked, so a poisoned lock
    // still holds a consistent list.
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_listener_set_routes_by_kind() {
        let set = ListenerSet::new();
        let messages = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let m = messages.clone();
        set.add(Listener::Message(Arc::new(move |_| {
            m.fetch_add(1, Ordering::SeqCst);
        })));
        let e = errors.clone();
        set.add(Listener::Error(Arc::new(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        })));

        set.emit_message(Value::Null);
        set.emit_message(Value::Null);
        set.emit_error(TransportError::Closed);

        assert_eq!(messages.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_set_remove_requires_matching_kind() {
        let set = ListenerSet::new();
        let id = set.add(Listener::Message(Arc::new(|_| {})));

        assert!(!set.remove(ListenerKind::Error, id));
        assert_eq!(set.len(), 1);
        assert!(set.remove(ListenerKind::Message, id));
        assert!(set.is_empty());
        assert!(!set.remove(ListenerKind::Message, id));
    }

    #[test]
    fn test_transport_error_from_io() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            TransportError::from(refused),
            TransportError::ConnectionFailed(_)
        ));

        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(TransportError::from(eof), TransportError::ConnectionLost(_)));

        let other = std::io::Error::new(std::io::ErrorKind::Other, "other");
        assert!(matches!(TransportError::from(other), TransportError::Io(_)));
    }
}
