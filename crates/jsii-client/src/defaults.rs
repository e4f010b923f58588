use std::{env, time::Duration};

/// Environment variable overriding kernel executable discovery.
pub const JSII_RUNTIME_ENV: &str = "JSII_RUNTIME";

/// Environment variable enabling kernel debug diagnostics.
pub const JSII_DEBUG_ENV: &str = "JSII_DEBUG";

/// Well-known kernel executable name searched on `PATH` when no
/// override is present.
pub const KERNEL_BINARY_NAME: &str = "jsii-runtime";

/// Runtime version this client was built against; the handshake
/// requires the kernel to report a compatible version.
pub const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) const LANG_ENV: &str = "LANG";
pub(crate) const DEFAULT_LANG: &str = "C.UTF-8";

pub(crate) const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// How long fatal-path handling waits for the exit monitor to observe
/// child termination before blaming the pipe instead of the process.
pub(crate) const EXIT_NOTICE_WAIT: Duration = Duration::from_millis(250);

/// Interprets a `JSII_DEBUG`-style value: enabled for any non-empty
/// string other than `"0"` and case-insensitive `"false"`.
pub(crate) fn debug_flag_enabled(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

pub(crate) fn debug_env_enabled() -> bool {
    env::var(JSII_DEBUG_ENV)
        .map(|value| debug_flag_enabled(&value))
        .unwrap_or(false)
}
