use std::{fmt, path::Path, sync::Arc};

use serde_json::Value;

use crate::api::{
    objref_handle, objref_interfaces, BeginRequest, Callback, CallbacksRequest, CreateRequest,
    EndRequest, GetRequest, InvokeRequest, LoadRequest, NamingRequest, Request, SetRequest,
    StaticGetRequest, StaticInvokeRequest, StaticSetRequest, StatsRequest,
};
use crate::builder::KernelClientBuilder;
use crate::callbacks::CallbackHandler;
use crate::engine::Engine;
use crate::marshal::Marshaler;
use crate::registry::{ObjectProxy, ObjectRegistry};
use crate::schema::TypeCache;
use crate::JsiiError;

/// High-level client for the jsii kernel.
///
/// The kernel is spawned lazily on first use and all requests are
/// serialized through a single engine; see the crate docs for the
/// protocol model. Cloning is cheap and clones share the kernel.
#[derive(Clone)]
pub struct KernelClient {
    engine: Arc<Engine>,
    registry: Arc<ObjectRegistry>,
    schemas: Arc<TypeCache>,
    marshaler: Marshaler,
}

impl KernelClient {
    /// Returns a builder preloaded with environment-driven defaults.
    pub fn builder() -> KernelClientBuilder {
        KernelClientBuilder::default()
    }

    pub(crate) fn assemble(
        engine: Arc<Engine>,
        registry: Arc<ObjectRegistry>,
        schemas: Arc<TypeCache>,
        marshaler: Marshaler,
    ) -> Self {
        Self {
            engine,
            registry,
            schemas,
            marshaler,
        }
    }

    /// Sends one raw request and returns the kernel's `ok` value.
    /// Generated bindings funnel every operation through here.
    pub async fn request(&self, request: Request) -> Result<Value, JsiiError> {
        self.engine.request(&request).await
    }

    /// Loads an assembly tarball into the kernel.
    pub async fn load(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
        tarball: impl AsRef<Path>,
    ) -> Result<Value, JsiiError> {
        self.request(Request::Load(LoadRequest {
            name: name.into(),
            version: version.into(),
            tarball: tarball.as_ref().to_string_lossy().into_owned(),
        }))
        .await
    }

    /// Instantiates a kernel object and resolves its proxy.
    pub async fn create(&self, request: CreateRequest) -> Result<Arc<ObjectProxy>, JsiiError> {
        let fqn = request.fqn.clone();
        let value = self.request(Request::Create(request)).await?;
        let handle = objref_handle(&value).ok_or_else(|| {
            JsiiError::Protocol(format!(
                "create response for `{fqn}` is not an object reference: {value}"
            ))
        })?;
        Ok(self.registry.resolve(handle, &objref_interfaces(&value)))
    }

    pub async fn invoke(
        &self,
        objref: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Value, JsiiError> {
        self.request(Request::Invoke(InvokeRequest {
            objref: objref.into(),
            method: method.into(),
            args,
        }))
        .await
    }

    pub async fn sinvoke(
        &self,
        fqn: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Value, JsiiError> {
        self.request(Request::StaticInvoke(StaticInvokeRequest {
            fqn: fqn.into(),
            method: method.into(),
            args,
        }))
        .await
    }

    pub async fn get(
        &self,
        objref: impl Into<String>,
        property: impl Into<String>,
    ) -> Result<Value, JsiiError> {
        self.request(Request::Get(GetRequest {
            objref: objref.into(),
            property: property.into(),
        }))
        .await
    }

    pub async fn sget(
        &self,
        fqn: impl Into<String>,
        property: impl Into<String>,
    ) -> Result<Value, JsiiError> {
        self.request(Request::StaticGet(StaticGetRequest {
            fqn: fqn.into(),
            property: property.into(),
        }))
        .await
    }

    pub async fn set(
        &self,
        objref: impl Into<String>,
        property: impl Into<String>,
        value: Value,
    ) -> Result<(), JsiiError> {
        self.request(Request::Set(SetRequest {
            objref: objref.into(),
            property: property.into(),
            value,
        }))
        .await?;
        Ok(())
    }

    pub async fn sset(
        &self,
        fqn: impl Into<String>,
        property: impl Into<String>,
        value: Value,
    ) -> Result<(), JsiiError> {
        self.request(Request::StaticSet(StaticSetRequest {
            fqn: fqn.into(),
            property: property.into(),
            value,
        }))
        .await?;
        Ok(())
    }

    /// Starts an async kernel method; the result names a promise id to
    /// pass to [`Self::end`].
    pub async fn begin(
        &self,
        objref: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Value, JsiiError> {
        self.request(Request::Begin(BeginRequest {
            objref: objref.into(),
            method: method.into(),
            args,
        }))
        .await
    }

    /// Awaits an async kernel method started with [`Self::begin`].
    pub async fn end(&self, promiseid: impl Into<String>) -> Result<Value, JsiiError> {
        self.request(Request::End(EndRequest {
            promiseid: promiseid.into(),
        }))
        .await
    }

    /// Callbacks pending on async flows, for the host to service.
    pub async fn callbacks(&self) -> Result<Vec<Callback>, JsiiError> {
        let value = self.request(Request::Callbacks(CallbacksRequest {})).await?;
        let descriptors = value
            .as_object()
            .and_then(|map| map.get("callbacks"))
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(descriptors).map_err(|source| {
            JsiiError::Protocol(format!("malformed callbacks response: {source}"))
        })
    }

    /// The naming tables for an assembly.
    pub async fn naming(&self, assembly: impl Into<String>) -> Result<Value, JsiiError> {
        self.request(Request::Naming(NamingRequest {
            assembly: assembly.into(),
        }))
        .await
    }

    /// Kernel runtime statistics.
    pub async fn stats(&self) -> Result<Value, JsiiError> {
        self.request(Request::Stats(StatsRequest {})).await
    }

    /// Releases a kernel object: forgets the proxy and sends `del`
    /// (now, if the kernel is running). Safe to call more than once.
    pub async fn release(&self, handle: &str) -> Result<(), JsiiError> {
        self.registry.release(handle);
        self.engine.flush_releases().await
    }

    /// The runtime version the kernel reported during the handshake,
    /// starting the kernel if it has not run yet.
    pub async fn runtime_version(&self) -> Result<String, JsiiError> {
        self.engine.runtime_version().await
    }

    /// Replaces the callback handler. The default dispatcher resolves
    /// callbacks against objects tracked in the registry.
    pub fn set_callback_handler(&self, handler: Arc<dyn CallbackHandler>) {
        self.engine.set_callback_handler(handler);
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    pub fn schemas(&self) -> &Arc<TypeCache> {
        &self.schemas
    }

    pub fn marshaler(&self) -> &Marshaler {
        &self.marshaler
    }

    /// Shuts the kernel down: closes stdin, waits out the grace
    /// period, then kills. The client is unusable afterwards.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}

impl fmt::Debug for KernelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelClient").finish_non_exhaustive()
    }
}

#[cfg(test)]
impl KernelClient {
    /// A client wired to an in-memory duplex stream instead of a
    /// spawned kernel; the test drives the other end.
    pub(crate) fn in_memory(stream: tokio::io::DuplexStream, expected_version: &str) -> Self {
        use std::time::Duration;

        use crate::callbacks::CallbackDispatcher;
        use crate::engine::LaunchOptions;
        use crate::wire::WireStream;

        let (read_half, write_half) = tokio::io::split(stream);
        let registry = Arc::new(ObjectRegistry::new());
        let schemas = Arc::new(TypeCache::new());
        let marshaler = Marshaler::new(registry.clone(), schemas.clone());
        let launch = LaunchOptions {
            binary: None,
            expected_version: expected_version.to_string(),
            debug: Some(false),
            stop_grace: Duration::from_millis(100),
        };
        let engine = Arc::new(Engine::connected(
            WireStream::new(read_half, write_half),
            launch,
            registry.clone(),
        ));
        engine.set_callback_handler(Arc::new(CallbackDispatcher::new(
            registry.clone(),
            schemas.clone(),
            marshaler.clone(),
        )));
        KernelClient::assemble(engine, registry, schemas, marshaler)
    }
}
