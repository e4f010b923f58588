//! The synchronous request/response loop: one serialized request
//! stream, FIFO response matching, and reentrant callback dispatch
//! while a response is pending.

use std::{
    path::PathBuf,
    sync::{Arc, OnceLock, RwLock as StdRwLock},
    time::Duration,
};

use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{CompleteRequest, DelRequest, Request, Response};
use crate::callbacks::CallbackHandler;
use crate::defaults::EXIT_NOTICE_WAIT;
use crate::process::KernelProcess;
use crate::registry::ObjectRegistry;
use crate::version::check_runtime_compat;
use crate::wire::{WireRead, WireStream};
use crate::JsiiError;

/// How the engine starts and stops its kernel.
pub(crate) struct LaunchOptions {
    pub(crate) binary: Option<PathBuf>,
    pub(crate) expected_version: String,
    pub(crate) debug: Option<bool>,
    pub(crate) stop_grace: Duration,
}

/// Why the engine refuses further work. Stored once; every later call
/// reproduces the same failure without touching the kernel.
#[derive(Debug, Clone)]
pub(crate) enum PoisonReason {
    Incompatible { expected: String, actual: String },
    Protocol(String),
    Terminated { status: Option<i32>, stderr: String },
    Closed,
}

impl PoisonReason {
    fn to_error(&self) -> JsiiError {
        match self {
            PoisonReason::Incompatible { expected, actual } => JsiiError::IncompatibleRuntime {
                expected: expected.clone(),
                actual: actual.clone(),
            },
            PoisonReason::Protocol(message) => JsiiError::Protocol(message.clone()),
            PoisonReason::Terminated { status, stderr } => JsiiError::Terminated {
                status: *status,
                stderr: stderr.clone(),
            },
            PoisonReason::Closed => JsiiError::Protocol("kernel client is shut down".into()),
        }
    }
}

/// A live connection: the wire plus, for spawned kernels, the
/// supervised process. `runtime_version` is set once the handshake
/// completes.
struct Conn {
    wire: WireStream,
    process: Option<KernelProcess>,
    runtime_version: Option<String>,
}

pub(crate) struct Engine {
    conn: tokio::sync::Mutex<Option<Conn>>,
    poison: OnceLock<PoisonReason>,
    launch: LaunchOptions,
    registry: Arc<ObjectRegistry>,
    handler: StdRwLock<Option<Arc<dyn CallbackHandler>>>,
}

impl Engine {
    pub(crate) fn new(launch: LaunchOptions, registry: Arc<ObjectRegistry>) -> Self {
        Self {
            conn: tokio::sync::Mutex::new(None),
            poison: OnceLock::new(),
            launch,
            registry,
            handler: StdRwLock::new(None),
        }
    }

    /// An engine already connected over an in-memory wire; the
    /// handshake still runs on first use.
    #[cfg(test)]
    pub(crate) fn connected(
        wire: WireStream,
        launch: LaunchOptions,
        registry: Arc<ObjectRegistry>,
    ) -> Self {
        Self {
            conn: tokio::sync::Mutex::new(Some(Conn {
                wire,
                process: None,
                runtime_version: None,
            })),
            poison: OnceLock::new(),
            launch,
            registry,
            handler: StdRwLock::new(None),
        }
    }

    pub(crate) fn set_callback_handler(&self, handler: Arc<dyn CallbackHandler>) {
        let mut slot = match self.handler.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(handler);
    }

    fn callback_handler(&self) -> Option<Arc<dyn CallbackHandler>> {
        let slot = match self.handler.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.clone()
    }

    fn poison_reason(&self) -> Option<&PoisonReason> {
        self.poison.get()
    }

    /// Records the first poisoning cause; later causes lose.
    fn poison_now(&self, reason: PoisonReason) -> JsiiError {
        let _ = self.poison.set(reason);
        // get() is infallible after a successful or lost set().
        match self.poison.get() {
            Some(reason) => reason.to_error(),
            None => JsiiError::Protocol("engine poisoned".into()),
        }
    }

    /// Sends one request and drives the response loop to a terminal
    /// `ok`/`error`, dispatching any callback interrupts in between.
    /// Pending proxy releases are drained first.
    pub(crate) async fn request(&self, request: &Request) -> Result<Value, JsiiError> {
        let mut slot = self.conn.lock().await;
        if let Some(reason) = self.poison_reason() {
            return Err(reason.to_error());
        }

        self.ensure_ready(&mut slot).await?;

        // Fail fast when the exit monitor already saw the kernel die.
        let dead = slot
            .as_ref()
            .and_then(|conn| conn.process.as_ref())
            .and_then(|process| {
                process
                    .unexpected_exit()
                    .map(|notice| (notice.status, process.stderr_tail()))
            });
        if let Some((status, stderr)) = dead {
            *slot = None;
            return Err(self.poison_now(PoisonReason::Terminated { status, stderr }));
        }

        self.drain_releases(&mut slot).await?;

        let result = match slot.as_mut() {
            Some(conn) => self.roundtrip(conn, request).await,
            None => Err(JsiiError::Protocol("kernel connection unavailable".into())),
        };
        if let Err(error) = &result {
            if !error.is_recoverable() {
                *slot = None;
            }
        }
        result
    }

    /// The kernel's reported runtime version, handshaking first if
    /// necessary.
    pub(crate) async fn runtime_version(&self) -> Result<String, JsiiError> {
        let mut slot = self.conn.lock().await;
        if let Some(reason) = self.poison_reason() {
            return Err(reason.to_error());
        }
        self.ensure_ready(&mut slot).await?;
        match slot.as_ref().and_then(|conn| conn.runtime_version.clone()) {
            Some(version) => Ok(version),
            None => Err(JsiiError::Protocol("handshake did not complete".into())),
        }
    }

    /// Issues `del` requests for proxies released since the last
    /// acquisition. No-op when nothing is pending or the engine never
    /// started.
    pub(crate) async fn flush_releases(&self) -> Result<(), JsiiError> {
        let mut slot = self.conn.lock().await;
        if self.poison_reason().is_some() || slot.is_none() {
            // Nothing to free: the kernel is gone or never existed.
            self.registry.take_pending_releases();
            return Ok(());
        }
        self.drain_releases(&mut slot).await
    }

    pub(crate) async fn shutdown(&self) {
        let mut slot = self.conn.lock().await;
        let _ = self.poison.set(PoisonReason::Closed);
        if let Some(conn) = slot.take() {
            // Dropping the wire closes the kernel's stdin, which is the
            // graceful-exit request; the monitor enforces the grace.
            let Conn { wire, process, .. } = conn;
            drop(wire);
            if let Some(process) = process {
                process.stop(self.launch.stop_grace).await;
            }
        }
    }

    async fn ensure_ready(&self, slot: &mut Option<Conn>) -> Result<(), JsiiError> {
        if slot.is_none() {
            let mut process =
                KernelProcess::spawn(self.launch.binary.as_deref(), self.launch.debug).await?;
            let (stdout, stdin) = match process.take_pipes() {
                Some(pipes) => pipes,
                None => return Err(JsiiError::Protocol("kernel pipes unavailable".into())),
            };
            *slot = Some(Conn {
                wire: WireStream::new(stdout, stdin),
                process: Some(process),
                runtime_version: None,
            });
        }

        let needs_handshake = matches!(slot, Some(conn) if conn.runtime_version.is_none());
        if needs_handshake {
            if let Err(error) = self.handshake(slot).await {
                *slot = None;
                return Err(error);
            }
        }
        Ok(())
    }

    /// Reads the `hello` line and verifies version compatibility.
    /// Any other first frame, or an incompatible version, poisons.
    async fn handshake(&self, slot: &mut Option<Conn>) -> Result<(), JsiiError> {
        let conn = match slot.as_mut() {
            Some(conn) => conn,
            None => return Err(JsiiError::Protocol("kernel connection unavailable".into())),
        };

        let message = match conn.wire.read_message().await {
            Ok(WireRead::Message(map)) => map,
            Ok(WireRead::Eof) => return Err(self.fatal_eof(conn).await),
            Err(error) => return Err(self.fatal(conn, error).await),
        };
        let response = match Response::from_wire(message) {
            Ok(response) => response,
            Err(error) => return Err(self.fatal(conn, error).await),
        };

        let version = match response {
            Response::Hello { version } => version,
            other => {
                let error = JsiiError::Protocol(format!(
                    "expected hello before any response, got {other:?}"
                ));
                return Err(self.fatal(conn, error).await);
            }
        };

        if let Err(error) = check_runtime_compat(&self.launch.expected_version, &version) {
            if let JsiiError::IncompatibleRuntime { expected, actual } = &error {
                self.poison_now(PoisonReason::Incompatible {
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
            return Err(error);
        }

        debug!(%version, "jsii kernel handshake complete");
        conn.runtime_version = Some(version);
        Ok(())
    }

    async fn drain_releases(&self, slot: &mut Option<Conn>) -> Result<(), JsiiError> {
        let pending = self.registry.take_pending_releases();
        for handle in pending {
            let request = Request::Del(DelRequest {
                objref: handle.clone(),
            });
            let conn = match slot.as_mut() {
                Some(conn) => conn,
                None => return Ok(()),
            };
            match self.roundtrip(conn, &request).await {
                Ok(_) => debug!(%handle, "released kernel object"),
                // The kernel may already have dropped its side.
                Err(JsiiError::Kernel { message, .. }) => {
                    warn!(%handle, %message, "kernel rejected del")
                }
                Err(fatal) => {
                    *slot = None;
                    return Err(fatal);
                }
            }
        }
        Ok(())
    }

    async fn roundtrip(&self, conn: &mut Conn, request: &Request) -> Result<Value, JsiiError> {
        if let Err(error) = conn.wire.write_message(request).await {
            return Err(self.fatal(conn, error).await);
        }

        let mut interrupts: usize = 0;
        loop {
            let message = match conn.wire.read_message().await {
                Ok(WireRead::Message(map)) => map,
                Ok(WireRead::Eof) => return Err(self.fatal_eof(conn).await),
                Err(error) => return Err(self.fatal(conn, error).await),
            };
            let response = match Response::from_wire(message) {
                Ok(response) => response,
                Err(error) => return Err(self.fatal(conn, error).await),
            };

            match response {
                Response::Ok(value) => return Ok(value),
                Response::Error { message, stack } => {
                    return Err(JsiiError::Kernel { message, stack })
                }
                Response::Callback(callback) => {
                    interrupts += 1;
                    debug!(cbid = %callback.cbid, interrupts, "callback interrupt");
                    let completion = self.run_callback(&callback);
                    if let Err(error) =
                        conn.wire.write_message(&Request::Complete(completion)).await
                    {
                        return Err(self.fatal(conn, error).await);
                    }
                }
                Response::Hello { version } => {
                    let error = JsiiError::Protocol(format!(
                        "unexpected hello (version {version}) while awaiting a response to `{}`",
                        request.name()
                    ));
                    return Err(self.fatal(conn, error).await);
                }
            }
        }
    }

    /// Runs one callback on the task that holds the engine lock. Host
    /// failures become the `err` completion field and are never
    /// surfaced locally.
    fn run_callback(&self, callback: &crate::api::Callback) -> CompleteRequest {
        let outcome = match self.callback_handler() {
            Some(handler) => handler.handle(callback),
            None => Err("no callback handler registered".to_string()),
        };
        match outcome {
            Ok(Value::Null) => CompleteRequest {
                cbid: callback.cbid.clone(),
                result: None,
                err: None,
            },
            Ok(value) => CompleteRequest {
                cbid: callback.cbid.clone(),
                result: Some(value),
                err: None,
            },
            Err(message) => CompleteRequest {
                cbid: callback.cbid.clone(),
                result: None,
                err: Some(message),
            },
        }
    }

    /// Converts a fatal wire error into the poisoning cause, preferring
    /// a kernel-terminated diagnosis when the child is gone.
    async fn fatal(&self, conn: &mut Conn, error: JsiiError) -> JsiiError {
        if let Some(process) = &conn.process {
            if let Some(notice) = process.wait_exit(EXIT_NOTICE_WAIT).await {
                if !notice.expected {
                    return self.poison_now(PoisonReason::Terminated {
                        status: notice.status,
                        stderr: process.stderr_tail(),
                    });
                }
            }
        }
        match &error {
            JsiiError::Protocol(message) => self.poison_now(PoisonReason::Protocol(message.clone())),
            other => self.poison_now(PoisonReason::Protocol(other.to_string())),
        }
    }

    async fn fatal_eof(&self, conn: &mut Conn) -> JsiiError {
        self.fatal(
            conn,
            JsiiError::Protocol("kernel closed its stdout mid-stream".into()),
        )
        .await
    }
}
