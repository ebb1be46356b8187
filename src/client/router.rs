//! Stream event routing.
//!
//! One handler per (stream, route key). An event addressed to an instance goes
//! to that instance's handler if one exists, else to the default handler,
//! else nowhere.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::protocol::{InstanceId, Stream, StreamEvent};

/// Callback receiving one line of engine output.
pub type StreamHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Key under which a handler is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKey {
    Default,
    Instance(InstanceId),
}

impl From<Option<InstanceId>> for RouteKey {
    fn from(instance: Option<InstanceId>) -> Self {
        instance.map_or(RouteKey::Default, RouteKey::Instance)
    }
}

#[derive(Default)]
pub struct Router {
    handlers: Mutex<HashMap<(Stream, RouteKey), StreamHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`, replacing any handler under the same key.
    ///
    /// Returns the handler that was replaced.
    pub fn register(
        &self,
        stream: Stream,
        key: RouteKey,
        handler: StreamHandler,
    ) -> Option<StreamHandler> {
        self.lock().insert((stream, key), handler)
    }

    /// Remove the handler registered under exactly this key.
    pub fn remove(&self, stream: Stream, key: RouteKey) -> Option<StreamHandler> {
        self.lock().remove(&(stream, key))
    }

    /// Handler that would receive an event for `instance` on `stream`.
    pub fn handler_for(
        &self,
        stream: Stream,
        instance: Option<InstanceId>,
    ) -> Option<StreamHandler> {
        let handlers = self.lock();
        instance
            .and_then(|id| handlers.get(&(stream, RouteKey::Instance(id))))
            .or_else(|| handlers.get(&(stream, RouteKey::Default)))
            .cloned()
    }

    /// Deliver an event to at most one handler. Returns whether one ran.
    ///
    /// The handler is chosen and cloned under the lock, then invoked after it
    /// is released, so handlers may register or replace handlers themselves.
    pub fn dispatch(&self, event: &StreamEvent) -> bool {
        match self.handler_for(event.stream, event.instance_id) {
            Some(handler) => {
                handler(&event.message);
                true
            }
            None => {
                trace!(
                    stream = %event.stream,
                    instance = ?event.instance_id,
                    "No handler for stream event"
                );
                false
            }
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(Stream, RouteKey), StreamHandler>> {
        self.handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (StreamHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let handler: StreamHandler =
            Arc::new(move |message: &str| s.lock().unwrap().push(message.to_string()));
        (handler, seen)
    }

    fn event(stream: Stream, instance: Option<u64>, message: &str) -> StreamEvent {
        StreamEvent {
            stream,
            instance_id: instance.map(InstanceId),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_instance_handler_takes_precedence() {
        let router = Router::new();
        let (default, default_seen) = recorder();
        let (five, five_seen) = recorder();
        router.register(Stream::Stdout, RouteKey::Default, default);
        router.register(Stream::Stdout, RouteKey::Instance(InstanceId(5)), five);

        assert!(router.dispatch(&event(Stream::Stdout, Some(5), "hi")));

        assert_eq!(*five_seen.lock().unwrap(), vec!["hi".to_string()]);
        assert!(default_seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_falls_back_to_default() {
        let router = Router::new();
        let (default, seen) = recorder();
        router.register(Stream::Stdout, RouteKey::Default, default);

        assert!(router.dispatch(&event(Stream::Stdout, Some(7), "x")));
        assert!(router.dispatch(&event(Stream::Stdout, None, "y")));
        assert_eq!(*seen.lock().unwrap(), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_streams_are_independent() {
        let router = Router::new();
        let (stdout, seen) = recorder();
        router.register(Stream::Stdout, RouteKey::Default, stdout);

        assert!(!router.dispatch(&event(Stream::Stderr, None, "fault")));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_register_replaces_previous() {
        let router = Router::new();
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();

        assert!(router.register(Stream::Stderr, RouteKey::Default, first).is_none());
        assert!(router.register(Stream::Stderr, RouteKey::Default, second).is_some());
        assert_eq!(router.len(), 1);

        router.dispatch(&event(Stream::Stderr, None, "e"));
        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(*second_seen.lock().unwrap(), vec!["e".to_string()]);
    }

    #[test]
    fn test_handler_may_reregister_during_dispatch() {
        let router = Arc::new(Router::new());
        let r = router.clone();
        let (replacement, seen) = recorder();
        let replacement = Mutex::new(Some(replacement));
        router.register(
            Stream::Stdout,
            RouteKey::Default,
            Arc::new(move |_: &str| {
                if let Some(next) = replacement.lock().unwrap().take() {
                    r.register(Stream::Stdout, RouteKey::Default, next);
                }
            }),
        );

        router.dispatch(&event(Stream::Stdout, None, "first"));
        router.dispatch(&event(Stream::Stdout, None, "second"));
        assert_eq!(*seen.lock().unwrap(), vec!["second".to_string()]);
    }

    #[test]
    fn test_remove_is_exact() {
        let router = Router::new();
        let (default, seen) = recorder();
        router.register(Stream::Stdout, RouteKey::Default, default);

        assert!(router.remove(Stream::Stdout, RouteKey::Instance(InstanceId(1))).is_none());
        assert!(router.remove(Stream::Stderr, RouteKey::Default).is_none());
        assert!(router.remove(Stream::Stdout, RouteKey::Default).is_some());
        assert!(!router.dispatch(&event(Stream::Stdout, None, "gone")));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_clear_drops_everything() {
        let router = Router::new();
        let (handler, seen) = recorder();
        router.register(Stream::Stdout, RouteKey::Instance(InstanceId(1)), handler);
        router.clear();

        assert!(router.is_empty());
        assert!(!router.dispatch(&event(Stream::Stdout, Some(1), "gone")));
        assert!(seen.lock().unwrap().is_empty());
    }
}
