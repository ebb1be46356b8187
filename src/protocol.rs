//! Wire types exchanged with the remote PLC engine.
//!
//! Every message is a JSON object. Requests carry a caller-assigned `id` and a
//! `type` tag; responses echo the `id`; stream events carry `type: "event"`
//! and are never correlated to a request.
//!
//! ```text
//! request   {"id":1,"type":"call","method":"run","args":[]}
//! response  {"id":1,"ok":true,"result":0}
//! event     {"type":"event","event":"stdout","instanceId":5,"message":"hi"}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Integer tag pairing a request with its response.
///
/// Allocated from 1 upwards by the correlator and never reused within one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of one engine instance hosted by the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output stream topic an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(Stream::Stdout),
            "stderr" => Ok(Stream::Stderr),
            other => Err(other.to_string()),
        }
    }
}

/// Engine start-up flags sent with `init` and `create`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Build the engine with debug output enabled.
    pub debug: bool,
    /// Suppress the engine's start-up banner.
    pub silent: bool,
}

/// An outgoing request: the correlation id plus a typed body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub id: CorrelationId,
    #[serde(flatten)]
    pub body: RequestBody,
}

/// Request payloads, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RequestBody {
    /// Initialize the default engine instance.
    Init {
        #[serde(rename = "wasmPath")]
        engine_path: String,
        debug: bool,
        silent: bool,
    },
    /// Invoke an exported engine operation.
    Call {
        #[serde(rename = "instanceId", skip_serializing_if = "Option::is_none")]
        instance_id: Option<InstanceId>,
        method: String,
        args: Vec<Value>,
    },
    /// Create a new engine instance; the result is its id.
    Create {
        #[serde(rename = "wasmPath")]
        engine_path: String,
        debug: bool,
        silent: bool,
    },
    /// Dispose an instance, or the default instance when no id is given.
    Dispose {
        #[serde(rename = "instanceId", skip_serializing_if = "Option::is_none")]
        instance_id: Option<InstanceId>,
    },
    /// Ask the remote side to forward one output stream.
    Subscribe {
        #[serde(rename = "instanceId", skip_serializing_if = "Option::is_none")]
        instance_id: Option<InstanceId>,
        stream: Stream,
    },
}

impl RequestBody {
    pub fn init(engine_path: impl Into<String>, options: EngineOptions) -> Self {
        RequestBody::Init {
            engine_path: engine_path.into(),
            debug: options.debug,
            silent: options.silent,
        }
    }

    pub fn create(engine_path: impl Into<String>, options: EngineOptions) -> Self {
        RequestBody::Create {
            engine_path: engine_path.into(),
            debug: options.debug,
            silent: options.silent,
        }
    }

    pub fn call(
        instance_id: Option<InstanceId>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        RequestBody::Call {
            instance_id,
            method: method.into(),
            args,
        }
    }

    /// Wire name of the request type.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestBody::Init { .. } => "init",
            RequestBody::Call { .. } => "call",
            RequestBody::Create { .. } => "create",
            RequestBody::Dispose { .. } => "dispose",
            RequestBody::Subscribe { .. } => "subscribe",
        }
    }
}

impl Request {
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// A response to exactly one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: CorrelationId,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn success(id: CorrelationId, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: CorrelationId, error: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// An unsolicited stdout/stderr notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "event")]
    pub stream: Stream,
    #[serde(rename = "instanceId", default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    pub message: String,
}

impl StreamEvent {
    /// Wire form, including the `type: "event"` tag.
    pub fn to_value(&self) -> Value {
        let mut value = serde_json::json!({
            "type": "event",
            "event": self.stream,
            "message": self.message,
        });
        if let (Some(id), Some(map)) = (self.instance_id, value.as_object_mut()) {
            map.insert("instanceId".into(), Value::from(id.0));
        }
        value
    }
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response(Response),
    Event(StreamEvent),
}

impl Inbound {
    /// Classify a raw inbound value.
    ///
    /// Payloads nested under `data` are unwrapped first. Returns `None` for
    /// anything that is neither a well-formed response nor a stream event.
    pub fn classify(raw: Value) -> Option<Self> {
        let message = unwrap_data(raw);
        let map = message.as_object()?;

        if map.get("type").and_then(Value::as_str) == Some("event") {
            return serde_json::from_value(message).ok().map(Inbound::Event);
        }

        let id = map.get("id")?;
        let id = CorrelationId::deserialize(id).ok()?;
        Some(Inbound::Response(Response::from_fields(id, map)))
    }
}

impl Response {
    /// Build a response from a wire object whose `id` already parsed.
    ///
    /// Anything past the id is read leniently so the matching call always
    /// settles: a missing or non-boolean `ok` counts as a failure, and a
    /// non-string `error` is reduced to its `message` field or its JSON text.
    fn from_fields(id: CorrelationId, map: &Map<String, Value>) -> Self {
        let ok = map.get("ok").and_then(Value::as_bool).unwrap_or(false);
        let result = map.get("result").filter(|v| !v.is_null()).cloned();
        let error = match map.get("error") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(other) => Some(
                other
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string()),
            ),
        };

        Self { id, ok, result, error }
    }
}

/// Peel one `data` envelope off a message-event style payload.
fn unwrap_data(raw: Value) -> Value {
    match raw {
        Value::Object(mut map)
            if !map.contains_key("id") && !map.contains_key("type") && map.contains_key("data") =>
        {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}
