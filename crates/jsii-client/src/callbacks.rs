//! Resolution of kernel callback descriptors to host method
//! invocations, and the trait host objects implement to receive them.

use std::{error, fmt, sync::Arc};

use serde_json::Value;
use tracing::debug;

use crate::api::{objref_handle, Callback, CallbackGet, CallbackInvoke, CallbackSet};
use crate::marshal::{JsiiValue, Marshaler, TypeRef};
use crate::registry::ObjectRegistry;
use crate::schema::TypeCache;

/// A host object the kernel can call back into. Implementations are
/// registered with [`ObjectRegistry::track`] and looked up by the
/// dispatcher when a callback names their handle.
pub trait JsiiCallable: Send + Sync {
    fn invoke(&self, method: &str, args: Vec<JsiiValue>) -> Result<JsiiValue, HostError>;

    fn get(&self, property: &str) -> Result<JsiiValue, HostError> {
        Err(HostError::new(format!("no such property: {property}")))
    }

    fn set(&self, property: &str, value: JsiiValue) -> Result<(), HostError> {
        let _ = value;
        Err(HostError::new(format!("no such property: {property}")))
    }
}

/// A host-side failure raised inside a callback. Carries an optional
/// cause chain so the dispatcher can report the innermost user message
/// to the kernel.
#[derive(Debug)]
pub struct HostError {
    message: String,
    cause: Option<Box<HostError>>,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(message: impl Into<String>, cause: HostError) -> Self {
        Self {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// The innermost message in the cause chain; the outermost when no
    /// wrapping is present.
    pub fn innermost_message(&self) -> &str {
        let mut error = self;
        while let Some(cause) = &error.cause {
            error = cause;
        }
        &error.message
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl error::Error for HostError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn error::Error + 'static))
    }
}

/// Receives callback descriptors from the protocol engine and produces
/// either a wire result or an error string for the `complete` frame.
pub trait CallbackHandler: Send + Sync {
    fn handle(&self, callback: &Callback) -> Result<Value, String>;
}

/// Default handler: resolves descriptors against tracked host objects,
/// marshaling arguments with the schema cache's member descriptors.
pub struct CallbackDispatcher {
    registry: Arc<ObjectRegistry>,
    schemas: Arc<TypeCache>,
    marshaler: Marshaler,
}

impl CallbackDispatcher {
    pub fn new(registry: Arc<ObjectRegistry>, schemas: Arc<TypeCache>, marshaler: Marshaler) -> Self {
        Self {
            registry,
            schemas,
            marshaler,
        }
    }

    fn dispatch_invoke(&self, request: &CallbackInvoke) -> Result<Value, String> {
        let (handle, target) = self.target(&request.objref)?;
        let interfaces = self.registry.host_interfaces(&handle);
        let schema = self.schemas.method(&interfaces, &request.method);

        let mut args = Vec::with_capacity(request.args.len());
        for (index, arg) in request.args.iter().enumerate() {
            let descriptor = schema
                .as_ref()
                .and_then(|schema| schema.parameters.get(index))
                .cloned()
                .unwrap_or(TypeRef::Any);
            args.push(
                self.marshaler
                    .from_wire(arg, &descriptor)
                    .map_err(|err| err.to_string())?,
            );
        }

        let result = target
            .invoke(&request.method, args)
            .map_err(|err| err.innermost_message().to_string())?;
        let returns = schema
            .and_then(|schema| schema.returns)
            .unwrap_or(TypeRef::Any);
        self.marshaler
            .to_wire(&result, &returns)
            .map_err(|err| err.to_string())
    }

    fn dispatch_get(&self, request: &CallbackGet) -> Result<Value, String> {
        let (handle, target) = self.target(&request.objref)?;
        let interfaces = self.registry.host_interfaces(&handle);
        let descriptor = self
            .schemas
            .property(&interfaces, &request.property)
            .map(|schema| schema.value_type)
            .unwrap_or(TypeRef::Any);

        let value = target
            .get(&request.property)
            .map_err(|err| err.innermost_message().to_string())?;
        self.marshaler
            .to_wire(&value, &descriptor)
            .map_err(|err| err.to_string())
    }

    fn dispatch_set(&self, request: &CallbackSet) -> Result<Value, String> {
        let (handle, target) = self.target(&request.objref)?;
        let interfaces = self.registry.host_interfaces(&handle);
        let descriptor = self
            .schemas
            .property(&interfaces, &request.property)
            .map(|schema| schema.value_type)
            .unwrap_or(TypeRef::Any);

        let value = self
            .marshaler
            .from_wire(&request.value, &descriptor)
            .map_err(|err| err.to_string())?;
        target
            .set(&request.property, value)
            .map_err(|err| err.innermost_message().to_string())?;
        Ok(Value::Null)
    }

    fn target(&self, objref: &Value) -> Result<(String, Arc<dyn JsiiCallable>), String> {
        let handle = objref_handle(objref)
            .ok_or_else(|| format!("malformed callback objref: {objref}"))?;
        let target = self
            .registry
            .resolve_host(handle)
            .ok_or_else(|| format!("no registered host object for `{handle}`"))?;
        Ok((handle.to_string(), target))
    }
}

impl CallbackHandler for CallbackDispatcher {
    fn handle(&self, callback: &Callback) -> Result<Value, String> {
        debug!(cbid = %callback.cbid, "dispatching callback");
        if let Some(invoke) = &callback.invoke {
            self.dispatch_invoke(invoke)
        } else if let Some(get) = &callback.get {
            self.dispatch_get(get)
        } else if let Some(set) = &callback.set {
            self.dispatch_set(set)
        } else {
            Err("callback descriptor carries no operation".to_string())
        }
    }
}
