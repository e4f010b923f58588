#![forbid(unsafe_code)]
//! Host-side client for the jsii runtime kernel.
//!
//! The kernel is a child process hosting the authoritative object
//! instances of a jsii assembly; this crate spawns and supervises it,
//! speaks the line-delimited JSON protocol over its stdio, and hands
//! generated bindings a small, typed surface: requests in, values out,
//! with object references and tagged values marshaled at the boundary.
//!
//! ## Setup: kernel binary discovery
//! - `JSII_RUNTIME` points at the kernel executable; otherwise
//!   `jsii-runtime` is searched on `PATH`. [`KernelClientBuilder::binary`]
//!   pins a path programmatically.
//! - `JSII_DEBUG` (any value other than empty, `"0"`, or `"false"`)
//!   propagates to the child and mirrors its stderr to the host.
//!
//! ```rust,no_run
//! use jsii_client::KernelClient;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KernelClient::builder().build();
//! client.load("my-assembly", "1.0.0", "/path/to/assembly.tgz").await?;
//! let calc = client
//!     .create(jsii_client::CreateRequest { fqn: "my.Calculator".into(), ..Default::default() })
//!     .await?;
//! let sum = client.invoke(calc.handle(), "add", vec![1.into(), 2.into()]).await?;
//! println!("{sum}");
//! client.shutdown().await;
//! # Ok(()) }
//! ```
//!
//! ## Protocol model
//! - The kernel's first line must be `{"hello": "<version>"}`; the
//!   handshake requires version compatibility (build metadata ignored)
//!   and failure poisons the engine.
//! - Responses are matched to requests by FIFO order; there is no id
//!   field. All requests serialize through one engine lock whose
//!   critical section spans write-through-terminal-response.
//! - A `callback` response interrupts a pending request: the engine
//!   dispatches it to the registered [`CallbackHandler`] on the task
//!   holding the lock, answers with `complete`, and resumes reading for
//!   the original response. Nesting is unbounded.
//! - Unexpected kernel exit, malformed frames, and handshake failures
//!   are fatal: the engine is poisoned and every further call fails
//!   with the original cause (including a tail of the kernel's
//!   stderr). Kernel-reported errors and marshaling failures are
//!   recoverable.
//!
//! ## Object identity
//! - Kernel objects resolve to at most one [`ObjectProxy`] per handle;
//!   dropping the last reference enqueues a `del` that is flushed on
//!   the next engine acquisition.
//! - Host objects implementing [`JsiiCallable`] are tracked under
//!   synthetic `jsii@<n>` handles so the kernel can call back into
//!   them; the [`CallbackDispatcher`] routes `invoke`/`get`/`set`
//!   callbacks to them, marshaling with [`TypeCache`] schemas when the
//!   member is known.

mod api;
mod builder;
mod callbacks;
mod client;
mod defaults;
mod engine;
mod error;
mod marshal;
mod process;
mod registry;
mod schema;
mod version;
mod wire;

pub use api::{
    objref_handle, objref_interfaces, BeginRequest, Callback, CallbackGet, CallbackInvoke,
    CallbackSet, CallbacksRequest, CompleteRequest, CreateRequest, DelRequest, EndRequest,
    GetRequest, InvokeRequest, LoadRequest, NamingRequest, Override, Request, SetRequest,
    StaticGetRequest, StaticInvokeRequest, StaticSetRequest, StatsRequest, BYREF_TAG, DATE_TAG,
    ENUM_TAG, INTERFACES_TAG, STRUCT_TAG,
};
pub use builder::KernelClientBuilder;
pub use callbacks::{CallbackDispatcher, CallbackHandler, HostError, JsiiCallable};
pub use client::KernelClient;
pub use defaults::{JSII_DEBUG_ENV, JSII_RUNTIME_ENV, KERNEL_BINARY_NAME, RUNTIME_VERSION};
pub use error::JsiiError;
pub use marshal::{HostRef, JsiiValue, Marshaler, PrimitiveKind, TypeRef};
pub use registry::{ObjectProxy, ObjectRegistry, HOST_HANDLE_PREFIX};
pub use schema::{ClassSchema, MethodSchema, PropertySchema, StructSchema, TypeCache};

#[cfg(test)]
mod tests;
