//! Multiplexing client over a [`Transport`](crate::channel::Transport).
//!
//! - [`PlcWorker`]: facade for the default engine instance and lifecycle
//! - [`Instance`]: handle bound to one created engine instance
//! - [`EngineOps`]: named engine operations shared by both
//! - [`Correlator`] / [`Router`]: response matching and event routing

mod correlator;
mod error;
mod instance;
mod ops;
mod router;
mod worker;

pub use correlator::{Correlator, PendingCall, TypedCall};
pub use error::{ClientError, CALL_FAILED};
pub use instance::Instance;
pub use ops::{EngineOps, Language};
pub use router::{RouteKey, Router, StreamHandler};
pub use worker::PlcWorker;
