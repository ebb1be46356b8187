//! Request/response correlation.
//!
//! Every request gets a fresh [`CorrelationId`] and a oneshot slot in the
//! pending table. Responses are matched by id only, so the remote side may
//! answer in any order. Unknown ids are ignored.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::channel::ChannelAdapter;
use crate::client::error::ClientError;
use crate::protocol::{CorrelationId, Request, RequestBody, Response};

type Slot = oneshot::Sender<Result<Value, ClientError>>;

/// Owns the id counter and the pending-request table of one client.
pub struct Correlator {
    next_id: AtomicU64,
    pending: DashMap<CorrelationId, Slot>,
    closed: AtomicBool,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Allocate an id, record it as pending, and post the request.
    ///
    /// The request is on its way once this returns; the returned future only
    /// waits for the answer. After [`close`](Self::close) every call fails
    /// immediately with [`ClientError::Terminated`] and nothing is sent.
    pub fn send(&self, body: RequestBody, adapter: &ChannelAdapter) -> PendingCall {
        if self.is_closed() {
            return PendingCall::failed(ClientError::Terminated);
        }

        let (id, rx) = self.register();

        // close() may have drained the table between the check and insert.
        if self.is_closed() {
            self.pending.remove(&id);
            return PendingCall::failed(ClientError::Terminated);
        }

        let request = Request { id, body };
        if let Err(e) = adapter.post(&request) {
            warn!(%id, "Failed to post request: {}", e);
            self.pending.remove(&id);
            return PendingCall::failed(e.into());
        }

        PendingCall::waiting(id, rx)
    }

    fn register(&self) -> (CorrelationId, oneshot::Receiver<Result<Value, ClientError>>) {
        let id = CorrelationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        (id, rx)
    }

    /// Settle the pending entry matching `response`.
    ///
    /// Returns `false` for a stale or unknown id; such responses are dropped.
    pub fn resolve(&self, response: Response) -> bool {
        let Some((id, slot)) = self.pending.remove(&response.id) else {
            debug!(id = %response.id, "Ignoring response with no pending request");
            return false;
        };

        let outcome = if response.ok {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            Err(ClientError::remote(response.error))
        };

        if slot.send(outcome).is_err() {
            debug!(%id, "Caller dropped the call before its response arrived");
        }
        true
    }

    /// Reject every pending entry with `error` and empty the table.
    ///
    /// Returns how many entries were rejected.
    pub fn reject_all(&self, error: ClientError) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut rejected = 0;

        for id in ids {
            if let Some((_, slot)) = self.pending.remove(&id) {
                let _ = slot.send(Err(error.clone()));
                rejected += 1;
            }
        }

        rejected
    }

    /// Stop accepting requests and reject everything outstanding.
    ///
    /// Returns `false` if the correlator was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let rejected = self.reject_all(ClientError::Terminated);
        debug!(rejected, "Correlator closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

enum CallState {
    Waiting(oneshot::Receiver<Result<Value, ClientError>>),
    Failed(Option<ClientError>),
}

/// Future for one outstanding request.
///
/// Resolves to the response's `result` (or `null` when absent) or to the
/// error that settled it. Dropping it does not cancel the request.
#[must_use = "the call has been sent; await the future to observe its result"]
pub struct PendingCall {
    id: Option<CorrelationId>,
    state: CallState,
}

impl PendingCall {
    fn waiting(id: CorrelationId, rx: oneshot::Receiver<Result<Value, ClientError>>) -> Self {
        Self {
            id: Some(id),
            state: CallState::Waiting(rx),
        }
    }

    /// A call rejected before it was sent.
    pub fn failed(error: ClientError) -> Self {
        Self {
            id: None,
            state: CallState::Failed(Some(error)),
        }
    }

    /// Correlation id, or `None` if the call was never sent.
    pub fn id(&self) -> Option<CorrelationId> {
        self.id
    }

    /// Decode the result into `T` once it arrives.
    pub fn typed<T: DeserializeOwned>(self) -> TypedCall<T> {
        TypedCall {
            inner: self,
            _marker: PhantomData,
        }
    }
}

impl Future for PendingCall {
    type Output = Result<Value, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            CallState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(ClientError::Terminated))),
            CallState::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(ClientError::Terminated)))
            }
        }
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall").field("id", &self.id).finish()
    }
}

/// A [`PendingCall`] whose result is deserialized into `T`.
#[must_use = "the call has been sent; await the future to observe its result"]
pub struct TypedCall<T> {
    inner: PendingCall,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedCall<T> {
    pub fn id(&self) -> Option<CorrelationId> {
        self.inner.id()
    }
}

impl<T: DeserializeOwned> Future for TypedCall<T> {
    type Output = Result<T, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll(cx).map(|result| {
            result.and_then(|value| serde_json::from_value(value).map_err(ClientError::from))
        })
    }
}
