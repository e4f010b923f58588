use thiserror::Error;

/// Errors that may occur while talking to the jsii kernel.
#[derive(Debug, Error)]
pub enum JsiiError {
    /// The kernel executable could not be located or launched.
    ///
    /// Retrying after fixing the environment (installing the runtime or
    /// pointing the override variable at it) may succeed.
    #[error("unable to launch jsii kernel (checked `{override_var}`, then `{fallback}` on PATH): {reason}")]
    EnvMisconfigured {
        override_var: &'static str,
        fallback: &'static str,
        reason: String,
    },

    /// The kernel greeted us with a runtime version this client was not
    /// built against. The engine is poisoned.
    #[error("incompatible jsii runtime: expected {expected}, actual {actual}")]
    IncompatibleRuntime { expected: String, actual: String },

    /// The kernel answered a request with an `error` response. The engine
    /// remains usable.
    #[error("{message}{}", .stack.as_deref().map(|s| format!("\n{s}")).unwrap_or_default())]
    Kernel {
        message: String,
        stack: Option<String>,
    },

    /// A value could not be translated across the type-system boundary.
    /// The engine remains usable.
    #[error("cannot marshal value: {0}")]
    Marshal(String),

    /// The kernel violated the wire protocol (unexpected shape, oversize
    /// line, malformed JSON). Fatal; the engine is poisoned and the
    /// kernel is terminated.
    #[error("jsii protocol violation: {0}")]
    Protocol(String),

    /// The kernel process exited when the client did not ask it to.
    /// Fatal; carries the tail of the kernel's stderr for diagnostics.
    #[error("jsii kernel exited unexpectedly{}{}", .status.map(|code| format!(" with status {code}")).unwrap_or_default(), if .stderr.is_empty() { String::new() } else { format!("; stderr tail:\n{stderr}") })]
    Terminated {
        status: Option<i32>,
        stderr: String,
    },
}

impl JsiiError {
    /// Whether the engine survives this error. Only kernel-reported
    /// errors and marshaling failures leave the protocol in a usable
    /// state; everything else poisons the engine.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, JsiiError::Kernel { .. } | JsiiError::Marshal(_))
    }
}
