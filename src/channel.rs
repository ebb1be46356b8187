//! Channel layer between the client and the remote engine.
//!
//! The engine runs in another execution context (a worker task, a separate
//! process behind a socket). This module hides how messages get there:
//!
//! ```text
//! ┌──────────────┐   Request (JSON)    ┌────────────────┐   bytes / values   ┌──────────────┐
//! │  PlcWorker   │ ──────────────────► │ ChannelAdapter │ ─────────────────► │ remote engine│
//! │ (correlator, │ ◄────────────────── │  (probe, attach│ ◄───────────────── │              │
//! │   router)    │  Response | Event   │   detach)      │    Transport       └──────────────┘
//! └──────────────┘                     └────────────────┘
//! ```
//!
//! Bundled transports:
//!
//! - [`UnixChannel`] - Content-Length framed JSON over a Unix domain socket
//! - [`MemoryChannel`] - in-process duplex channel for embedding and tests

mod adapter;
pub mod framing;
mod memory;
mod transport;
mod unix;

pub use adapter::{ChannelAdapter, ListenerStyle};
pub use memory::{EnginePort, MemoryChannel, Replier};
pub use transport::{
    Emitter, ErrorListener, EventTarget, Listener, ListenerId, ListenerKind, ListenerSet,
    MessageListener, Terminate, Transport, TransportError,
};
pub use unix::UnixChannel;
