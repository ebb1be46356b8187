//! PLC Worker Client Library
//!
//! Asynchronous client for a PLC engine (bytecode VM plus compilers) running
//! in another execution context. Requests are correlated by id, calls can be
//! routed to individual engine instances, and engine output is delivered
//! through stdout/stderr subscriptions.
//!
//! - `protocol` - Wire messages exchanged with the engine
//! - `channel` - Transports and the adapter that attaches to them
//! - `client` - `PlcWorker` facade, instance handles, and engine operations
//! - `config` - Environment configuration for the bundled CLI
//!
//! # Example
//!
//! ```ignore
//! use plc_worker_client::{EngineOps, EngineOptions, PlcWorker};
//! use plc_worker_client::config::default_socket_path;
//!
//! let worker = PlcWorker::connect(&default_socket_path()).await?;
//! worker.initialize("dist/VovkPLC.wasm", EngineOptions::default()).await?;
//! worker.on_stdout(|line| println!("{line}"), None).await?;
//! worker.download_assembly("u8.const 1\nexit").await?;
//! worker.run().await?;
//! worker.terminate().await?;
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod protocol;

pub use channel::{MemoryChannel, Transport, TransportError, UnixChannel};
pub use client::{ClientError, EngineOps, Instance, Language, PendingCall, PlcWorker};
pub use protocol::{EngineOptions, InstanceId, Stream};
