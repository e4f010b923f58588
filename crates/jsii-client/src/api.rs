//! Wire-level message shapes: requests, responses, callback
//! descriptors, and the `$jsii.*` tagged-value markers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::JsiiError;

/// Tag key for a by-reference object: `{"$jsii.byref": handle}`.
pub const BYREF_TAG: &str = "$jsii.byref";
/// Optional companion to [`BYREF_TAG`] listing implemented interfaces.
pub const INTERFACES_TAG: &str = "$jsii.interfaces";
/// Tag key for a by-value struct: `{"$jsii.struct": {"fqn", "data"}}`.
pub const STRUCT_TAG: &str = "$jsii.struct";
/// Tag key for an enum member: `{"$jsii.enum": "<fqn>/<MEMBER>"}`.
pub const ENUM_TAG: &str = "$jsii.enum";
/// Tag key for a date: `{"$jsii.date": "<ISO-8601>"}`.
pub const DATE_TAG: &str = "$jsii.date";

/// A host-to-kernel request. Serializes as a JSON object whose single
/// top-level key is the request name.
#[derive(Debug, Clone, Serialize)]
pub enum Request {
    #[serde(rename = "load")]
    Load(LoadRequest),
    #[serde(rename = "create")]
    Create(CreateRequest),
    #[serde(rename = "del")]
    Del(DelRequest),
    #[serde(rename = "invoke")]
    Invoke(InvokeRequest),
    #[serde(rename = "sinvoke")]
    StaticInvoke(StaticInvokeRequest),
    #[serde(rename = "get")]
    Get(GetRequest),
    #[serde(rename = "sget")]
    StaticGet(StaticGetRequest),
    #[serde(rename = "set")]
    Set(SetRequest),
    #[serde(rename = "sset")]
    StaticSet(StaticSetRequest),
    #[serde(rename = "begin")]
    Begin(BeginRequest),
    #[serde(rename = "end")]
    End(EndRequest),
    #[serde(rename = "callbacks")]
    Callbacks(CallbacksRequest),
    #[serde(rename = "complete")]
    Complete(CompleteRequest),
    #[serde(rename = "naming")]
    Naming(NamingRequest),
    #[serde(rename = "stats")]
    Stats(StatsRequest),
}

impl Request {
    /// The request's wire tag, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Load(_) => "load",
            Request::Create(_) => "create",
            Request::Del(_) => "del",
            Request::Invoke(_) => "invoke",
            Request::StaticInvoke(_) => "sinvoke",
            Request::Get(_) => "get",
            Request::StaticGet(_) => "sget",
            Request::Set(_) => "set",
            Request::StaticSet(_) => "sset",
            Request::Begin(_) => "begin",
            Request::End(_) => "end",
            Request::Callbacks(_) => "callbacks",
            Request::Complete(_) => "complete",
            Request::Naming(_) => "naming",
            Request::Stats(_) => "stats",
        }
    }
}

/// Loads an assembly into the kernel.
#[derive(Debug, Clone, Serialize)]
pub struct LoadRequest {
    pub name: String,
    pub version: String,
    pub tarball: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateRequest {
    pub fqn: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Override>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
}

/// Declares a member the host overrides on a created object; the kernel
/// routes matching calls back as callbacks carrying `cookie`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Override {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DelRequest {
    pub objref: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvokeRequest {
    pub objref: String,
    pub method: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaticInvokeRequest {
    pub fqn: String,
    pub method: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetRequest {
    pub objref: String,
    pub property: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaticGetRequest {
    pub fqn: String,
    pub property: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetRequest {
    pub objref: String,
    pub property: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaticSetRequest {
    pub fqn: String,
    pub property: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeginRequest {
    pub objref: String,
    pub method: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndRequest {
    pub promiseid: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CallbacksRequest {}

/// Completion of a callback. Exactly one of `result`/`err` is present;
/// both absent means void success.
#[derive(Debug, Clone, Serialize)]
pub struct CompleteRequest {
    pub cbid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamingRequest {
    pub assembly: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsRequest {}

/// A kernel-to-host response frame.
#[derive(Debug)]
pub(crate) enum Response {
    Hello { version: String },
    Ok(Value),
    Error { message: String, stack: Option<String> },
    Callback(Callback),
}

impl Response {
    /// Classifies one wire object into the four legal response shapes.
    pub(crate) fn from_wire(mut map: Map<String, Value>) -> Result<Self, JsiiError> {
        if let Some(hello) = map.remove("hello") {
            let version = hello.as_str().ok_or_else(|| {
                JsiiError::Protocol(format!("hello version must be a string, got: {hello}"))
            })?;
            return Ok(Response::Hello {
                version: version.to_string(),
            });
        }

        if let Some(error) = map.remove("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            let stack = map
                .remove("stack")
                .and_then(|value| value.as_str().map(str::to_string));
            return Ok(Response::Error { message, stack });
        }

        if let Some(callback) = map.remove("callback") {
            let descriptor: Callback = serde_json::from_value(callback).map_err(|source| {
                JsiiError::Protocol(format!("malformed callback descriptor: {source}"))
            })?;
            return Ok(Response::Callback(descriptor));
        }

        if let Some(ok) = map.remove("ok") {
            return Ok(Response::Ok(ok));
        }

        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        Err(JsiiError::Protocol(format!(
            "unrecognized response shape with keys {keys:?}"
        )))
    }
}

/// A request-from-kernel-to-host embedded in a response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Callback {
    pub cbid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke: Option<CallbackInvoke>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<CallbackGet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<CallbackSet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackInvoke {
    pub objref: Value,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackGet {
    pub objref: Value,
    pub property: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackSet {
    pub objref: Value,
    pub property: String,
    pub value: Value,
}

/// Extracts the handle from an objref that may be a bare handle string
/// or a `$jsii.byref` object.
pub fn objref_handle(value: &Value) -> Option<&str> {
    match value {
        Value::String(handle) => Some(handle),
        Value::Object(map) => map.get(BYREF_TAG).and_then(Value::as_str),
        _ => None,
    }
}

/// Extracts the `$jsii.interfaces` list from a byref objref, if any.
pub fn objref_interfaces(value: &Value) -> Vec<String> {
    value
        .as_object()
        .and_then(|map| map.get(INTERFACES_TAG))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
