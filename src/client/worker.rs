//! The client facade.

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::channel::{ChannelAdapter, ListenerStyle, Transport, TransportError, UnixChannel};
use crate::client::correlator::{Correlator, PendingCall};
use crate::client::error::ClientError;
use crate::client::instance::Instance;
use crate::client::ops::EngineOps;
use crate::client::router::{RouteKey, Router, StreamHandler};
use crate::config::ClientConfig;
use crate::protocol::{EngineOptions, Inbound, InstanceId, RequestBody, Stream};

/// State shared by a [`PlcWorker`] and every [`Instance`] derived from it.
pub(crate) struct Core {
    correlator: Correlator,
    router: Router,
    adapter: ChannelAdapter,
}

impl Core {
    fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Core>| {
            let inbound_core = weak.clone();
            let error_core = weak.clone();

            let adapter = ChannelAdapter::attach(
                transport,
                move |inbound| {
                    if let Some(core) = inbound_core.upgrade() {
                        core.handle_inbound(inbound);
                    }
                },
                move |err| {
                    if let Some(core) = error_core.upgrade() {
                        core.handle_channel_error(err);
                    }
                },
            );

            Core {
                correlator: Correlator::new(),
                router: Router::new(),
                adapter,
            }
        })
    }

    pub(crate) fn send(&self, body: RequestBody) -> PendingCall {
        self.correlator.send(body, &self.adapter)
    }

    pub(crate) fn call(
        &self,
        instance: Option<InstanceId>,
        method: &str,
        args: Vec<Value>,
    ) -> PendingCall {
        if method.trim().is_empty() {
            return PendingCall::failed(ClientError::InvalidMethod(method.to_string()));
        }
        self.send(RequestBody::call(instance, method, args))
    }

    /// Register `handler` and ask the engine to start forwarding `stream`.
    ///
    /// The handler is in place before the request leaves so no early event
    /// is missed. If the request is never sent, or the client terminates
    /// meanwhile, the registration is rolled back.
    pub(crate) fn subscribe(
        &self,
        stream: Stream,
        instance: Option<InstanceId>,
        handler: StreamHandler,
    ) -> PendingCall {
        if self.correlator.is_closed() {
            return PendingCall::failed(ClientError::Terminated);
        }

        let key = RouteKey::from(instance);
        let previous = self.router.register(stream, key, handler);
        let pending = self.send(RequestBody::Subscribe {
            instance_id: instance,
            stream,
        });

        if self.correlator.is_closed() {
            self.router.remove(stream, key);
        } else if pending.id().is_none() {
            match previous {
                Some(previous) => {
                    self.router.register(stream, key, previous);
                }
                None => {
                    self.router.remove(stream, key);
                }
            }
        }
        pending
    }

    fn handle_inbound(&self, inbound: Inbound) {
        match inbound {
            Inbound::Response(response) => {
                self.correlator.resolve(response);
            }
            Inbound::Event(event) => {
                self.router.dispatch(&event);
            }
        }
    }

    fn handle_channel_error(&self, err: TransportError) {
        let rejected = self.correlator.reject_all(ClientError::Channel(err.to_string()));
        error!(rejected, "Channel failed: {}", err);
    }

    async fn terminate(&self) -> Result<(), ClientError> {
        if !self.correlator.close() {
            return Ok(());
        }
        self.router.clear();
        self.adapter.detach();

        match self.adapter.shutdown().await {
            Ok(true) => info!("Client terminated; transport shut down"),
            Ok(false) => info!("Client terminated; transport has no shutdown"),
            Err(e) => {
                error!("Transport shutdown failed: {}", e);
                return Err(e.into());
            }
        }
        Ok(())
    }
}

/// Client for a PLC engine hosted in another execution context.
///
/// Every operation posts its request immediately and returns a future that
/// settles when the matching response arrives. Responses may come back in
/// any order. Cloning is cheap and clones share one connection.
///
/// # Example
///
/// ```ignore
/// use plc_worker_client::{EngineOps, EngineOptions, MemoryChannel, PlcWorker};
///
/// let (channel, port) = MemoryChannel::pair();
/// let worker = PlcWorker::new(channel);
/// worker.initialize("", EngineOptions::default()).await?;
/// worker.on_stdout(|line| println!("{line}"), None).await?;
/// let output = worker.compile_plcasm("u8.const 1\nexit").await?;
/// worker.terminate().await?;
/// ```
#[derive(Clone)]
pub struct PlcWorker {
    core: Arc<Core>,
}

impl PlcWorker {
    /// Wrap a transport and attach to it.
    pub fn new<T: Transport>(transport: T) -> Self {
        Self::from_transport(Arc::new(transport))
    }

    pub fn from_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            core: Core::new(transport),
        }
    }

    /// Connect to an engine listening on a Unix socket.
    pub async fn connect(socket_path: &Path) -> Result<Self, ClientError> {
        let channel = UnixChannel::connect(socket_path).await?;
        Ok(Self::new(channel))
    }

    /// Connect with exponential backoff (100ms, 200ms, 400ms, ...).
    ///
    /// Useful when the engine process is still starting up.
    ///
    /// # Errors
    ///
    /// Returns the last connection error if all attempts fail.
    pub async fn connect_with_retry(
        socket_path: &Path,
        max_attempts: u32,
    ) -> Result<Self, ClientError> {
        let mut last_error = ClientError::Transport(TransportError::ConnectionFailed(
            "no connection attempts made".into(),
        ));

        for attempt in 1..=max_attempts {
            match Self::connect(socket_path).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    debug!(attempt, "Connection attempt failed: {}", e);
                    last_error = e;
                    if attempt < max_attempts {
                        let delay = Duration::from_millis(100 * (1 << (attempt - 1).min(6)));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    /// Connect per `config` and initialize the default engine instance.
    pub async fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = Self::connect_with_retry(&config.socket_path, config.connect_attempts).await?;
        client.initialize(&config.engine_path, config.options).await?;
        Ok(client)
    }

    /// Initialize the default engine instance.
    pub fn initialize(&self, engine_path: &str, options: EngineOptions) -> PendingCall {
        info!(engine_path, debug = options.debug, "Initializing engine");
        self.core.send(RequestBody::init(engine_path, options))
    }

    /// Call an exported operation on the default instance.
    pub fn call(&self, method: &str, args: Vec<Value>) -> PendingCall {
        self.core.call(None, method, args)
    }

    /// Call an exported operation on a specific instance.
    pub fn call_instance(
        &self,
        instance: InstanceId,
        method: &str,
        args: Vec<Value>,
    ) -> PendingCall {
        self.core.call(Some(instance), method, args)
    }

    /// Create a new engine instance on the remote side.
    ///
    /// The `create` request is posted before this returns.
    pub fn create_instance(
        &self,
        engine_path: &str,
        options: EngineOptions,
    ) -> impl Future<Output = Result<Instance, ClientError>> + Send + 'static {
        let pending = self
            .core
            .send(RequestBody::create(engine_path, options))
            .typed::<InstanceId>();
        let core = self.core.clone();
        async move {
            let id = pending.await?;
            info!(instance = %id, "Created engine instance");
            Ok(Instance::new(id, core))
        }
    }

    /// Handle for an instance id obtained elsewhere.
    pub fn instance(&self, id: InstanceId) -> Instance {
        Instance::new(id, self.core.clone())
    }

    /// Dispose an instance on the remote side. Local handler registrations
    /// for it are left in place.
    pub fn dispose_instance(&self, instance: InstanceId) -> PendingCall {
        debug!(%instance, "Disposing engine instance");
        self.core.send(RequestBody::Dispose {
            instance_id: Some(instance),
        })
    }

    /// Dispose the default instance; a later `initialize` recreates it.
    pub fn dispose_default_instance(&self) -> PendingCall {
        self.core.send(RequestBody::Dispose { instance_id: None })
    }

    /// Route stdout lines to `handler`, for one instance or by default.
    pub fn on_stdout<F>(&self, handler: F, instance: Option<InstanceId>) -> PendingCall
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.core.subscribe(Stream::Stdout, instance, Arc::new(handler))
    }

    /// Route stderr lines to `handler`, for one instance or by default.
    pub fn on_stderr<F>(&self, handler: F, instance: Option<InstanceId>) -> PendingCall
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.core.subscribe(Stream::Stderr, instance, Arc::new(handler))
    }

    /// Subscribe by topic name. Anything but `stdout`/`stderr` is rejected
    /// without contacting the remote side.
    pub fn subscribe<F>(&self, topic: &str, instance: Option<InstanceId>, handler: F) -> PendingCall
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        match topic.parse::<Stream>() {
            Ok(stream) => self.core.subscribe(stream, instance, Arc::new(handler)),
            Err(topic) => PendingCall::failed(ClientError::UnknownStream(topic)),
        }
    }

    /// Reject everything outstanding, drop all handlers, detach from the
    /// transport, and shut it down if it supports that.
    ///
    /// Idempotent: later calls return `Ok(())` without doing anything, and
    /// any request made after termination fails with
    /// [`ClientError::Terminated`].
    pub async fn terminate(&self) -> Result<(), ClientError> {
        self.core.terminate().await
    }

    pub fn is_terminated(&self) -> bool {
        self.core.correlator.is_closed()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.core.correlator.pending_count()
    }

    /// Number of registered stream handlers.
    pub fn stream_handlers(&self) -> usize {
        self.core.router.len()
    }

    pub fn listener_style(&self) -> ListenerStyle {
        self.core.adapter.style()
    }
}

impl EngineOps for PlcWorker {
    fn invoke(&self, method: &str, args: Vec<Value>) -> PendingCall {
        self.call(method, args)
    }
}

impl std::fmt::Debug for PlcWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlcWorker")
            .field("pending", &self.pending_requests())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
