use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::client::correlator::PendingCall;
use crate::client::ops::EngineOps;
use crate::client::worker::Core;
use crate::protocol::{InstanceId, RequestBody, Stream};

/// Handle to one engine instance created with
/// [`PlcWorker::create_instance`](crate::client::PlcWorker::create_instance).
///
/// Every request made through the handle carries the instance id. The handle
/// shares the connection of the client that created it.
#[derive(Clone)]
pub struct Instance {
    id: InstanceId,
    core: Arc<Core>,
}

impl Instance {
    pub(crate) fn new(id: InstanceId, core: Arc<Core>) -> Self {
        Self { id, core }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn call(&self, method: &str, args: Vec<Value>) -> PendingCall {
        self.core.call(Some(self.id), method, args)
    }

    /// Route this instance's stdout to `handler`.
    pub fn on_stdout<F>(&self, handler: F) -> PendingCall
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.core.subscribe(Stream::Stdout, Some(self.id), Arc::new(handler))
    }

    /// Route this instance's stderr to `handler`.
    pub fn on_stderr<F>(&self, handler: F) -> PendingCall
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.core.subscribe(Stream::Stderr, Some(self.id), Arc::new(handler))
    }

    /// Dispose the instance remotely.
    pub fn dispose(self) -> PendingCall {
        self.core.send(RequestBody::Dispose {
            instance_id: Some(self.id),
        })
    }
}

impl EngineOps for Instance {
    fn invoke(&self, method: &str, args: Vec<Value>) -> PendingCall {
        self.call(method, args)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance").field("id", &self.id).finish()
    }
}
