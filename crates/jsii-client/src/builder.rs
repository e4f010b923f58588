use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::callbacks::CallbackDispatcher;
use crate::client::KernelClient;
use crate::defaults::{DEFAULT_STOP_GRACE, RUNTIME_VERSION};
use crate::engine::{Engine, LaunchOptions};
use crate::marshal::Marshaler;
use crate::registry::ObjectRegistry;
use crate::schema::TypeCache;

/// Configures and constructs a [`KernelClient`].
///
/// Defaults resolve the kernel from `JSII_RUNTIME`/`PATH`, expect the
/// runtime version this crate was built against, honor `JSII_DEBUG`,
/// and install the default callback dispatcher.
#[derive(Debug, Clone)]
pub struct KernelClientBuilder {
    binary: Option<PathBuf>,
    expected_runtime_version: Option<String>,
    debug: Option<bool>,
    stop_grace: Duration,
    default_dispatcher: bool,
}

impl Default for KernelClientBuilder {
    fn default() -> Self {
        Self {
            binary: None,
            expected_runtime_version: None,
            debug: None,
            stop_grace: DEFAULT_STOP_GRACE,
            default_dispatcher: true,
        }
    }
}

impl KernelClientBuilder {
    /// Pins the kernel executable, bypassing discovery.
    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = Some(path.into());
        self
    }

    /// Overrides the runtime version required during the handshake.
    pub fn expected_runtime_version(mut self, version: impl Into<String>) -> Self {
        self.expected_runtime_version = Some(version.into());
        self
    }

    /// Forces the debug flag instead of reading `JSII_DEBUG`.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Grace period between requesting kernel exit and killing it.
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Skips installing [`CallbackDispatcher`]; callers must register
    /// their own handler before the kernel issues callbacks.
    pub fn without_default_dispatcher(mut self) -> Self {
        self.default_dispatcher = false;
        self
    }

    pub fn build(self) -> KernelClient {
        let registry = Arc::new(ObjectRegistry::new());
        let schemas = Arc::new(TypeCache::new());
        let marshaler = Marshaler::new(registry.clone(), schemas.clone());

        let launch = LaunchOptions {
            binary: self.binary,
            expected_version: self
                .expected_runtime_version
                .unwrap_or_else(|| RUNTIME_VERSION.to_string()),
            debug: self.debug,
            stop_grace: self.stop_grace,
        };
        let engine = Arc::new(Engine::new(launch, registry.clone()));

        if self.default_dispatcher {
            engine.set_callback_handler(Arc::new(CallbackDispatcher::new(
                registry.clone(),
                schemas.clone(),
                marshaler.clone(),
            )));
        }

        KernelClient::assemble(engine, registry, schemas, marshaler)
    }
}
