use std::{
    collections::VecDeque,
    env,
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    sync::{oneshot, watch},
    task::JoinHandle,
    time,
};
use tracing::{debug, warn};

use crate::defaults::{
    debug_env_enabled, DEFAULT_LANG, JSII_DEBUG_ENV, JSII_RUNTIME_ENV, KERNEL_BINARY_NAME,
    LANG_ENV,
};
use crate::JsiiError;

const STDERR_TAIL_LINES: usize = 64;

/// How the child exited, as observed by the exit monitor.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExitNotice {
    pub(crate) status: Option<i32>,
    /// True when the host asked for termination via [`KernelProcess::stop`]
    /// or teardown; false for spontaneous death.
    pub(crate) expected: bool,
}

/// Bounded ring of the kernel's most recent stderr lines, kept for the
/// kernel-terminated diagnostic.
#[derive(Clone, Default)]
pub(crate) struct StderrTail(Arc<StdMutex<VecDeque<String>>>);

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub(crate) fn snapshot(&self) -> String {
        let lines = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Resolves the kernel executable: the `JSII_RUNTIME` override wins,
/// else `jsii-runtime` is searched on `PATH`.
pub(crate) fn locate_runtime(override_path: Option<&Path>) -> Result<PathBuf, JsiiError> {
    if let Some(path) = override_path {
        return Ok(path.to_path_buf());
    }

    if let Some(value) = env::var_os(JSII_RUNTIME_ENV) {
        if !value.is_empty() {
            return Ok(PathBuf::from(value));
        }
    }

    let candidates = env::var_os("PATH").ok_or_else(|| env_misconfigured("PATH is not set"))?;
    for dir in env::split_paths(&candidates) {
        let candidate = dir.join(format!("{KERNEL_BINARY_NAME}{}", env::consts::EXE_SUFFIX));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(env_misconfigured("no kernel executable found"))
}

fn env_misconfigured(reason: impl Into<String>) -> JsiiError {
    JsiiError::EnvMisconfigured {
        override_var: JSII_RUNTIME_ENV,
        fallback: KERNEL_BINARY_NAME,
        reason: reason.into(),
    }
}

/// Retries transient `ETXTBSY` spawn failures with a short backoff.
async fn spawn_with_retry(command: &mut Command, binary: &Path) -> Result<Child, JsiiError> {
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(env_misconfigured(format!(
                    "`{}` could not be spawned: {source}",
                    binary.display()
                )));
            }
        }
    }

    unreachable!("spawn_with_retry returns before exhausting retries")
}

/// A supervised kernel child process: piped stdio, a stderr drain that
/// keeps a diagnostic tail, and an exit monitor owning the [`Child`].
pub(crate) struct KernelProcess {
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr_tail: StderrTail,
    exit_rx: watch::Receiver<Option<ExitNotice>>,
    stop_tx: Option<oneshot::Sender<Duration>>,
    monitor: Option<JoinHandle<()>>,
    stderr_task: JoinHandle<()>,
}

impl KernelProcess {
    /// Spawns the kernel with piped stdio. When the debug flag is on it
    /// is propagated to the child as `JSII_DEBUG=1` and stderr is
    /// mirrored to the host's stderr.
    pub(crate) async fn spawn(
        binary_override: Option<&Path>,
        debug_override: Option<bool>,
    ) -> Result<Self, JsiiError> {
        let binary = locate_runtime(binary_override)?;
        let debug_enabled = debug_override.unwrap_or_else(debug_env_enabled);

        let mut command = Command::new(&binary);
        command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if env::var_os(LANG_ENV).is_none() {
            command.env(LANG_ENV, DEFAULT_LANG);
        }
        if debug_enabled {
            command.env(JSII_DEBUG_ENV, "1");
        }

        let mut child = spawn_with_retry(&mut command, &binary).await?;
        debug!(binary = %binary.display(), debug = debug_enabled, "spawned jsii kernel");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| JsiiError::Protocol("kernel stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JsiiError::Protocol("kernel stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| JsiiError::Protocol("kernel stderr unavailable".into()))?;

        let stderr_tail = StderrTail::default();
        let stderr_task = tokio::spawn(stderr_task(stderr, stderr_tail.clone(), debug_enabled));

        let (exit_tx, exit_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_task(child, stop_rx, exit_tx));

        Ok(Self {
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr_tail,
            exit_rx,
            stop_tx: Some(stop_tx),
            monitor: Some(monitor),
            stderr_task,
        })
    }

    /// Hands the pipe ends to the wire layer; valid exactly once.
    pub(crate) fn take_pipes(&mut self) -> Option<(ChildStdout, ChildStdin)> {
        Some((self.stdout.take()?, self.stdin.take()?))
    }

    pub(crate) fn stderr_tail(&self) -> String {
        self.stderr_tail.snapshot()
    }

    /// The unexpected-exit notice, if the monitor has recorded one.
    pub(crate) fn unexpected_exit(&self) -> Option<ExitNotice> {
        self.exit_rx.borrow().filter(|notice| !notice.expected)
    }

    /// Waits up to `wait` for the monitor to observe child termination.
    /// Used on pipe failures to attribute the fault to process death.
    pub(crate) async fn wait_exit(&self, wait: Duration) -> Option<ExitNotice> {
        let mut rx = self.exit_rx.clone();
        let result = match time::timeout(wait, rx.wait_for(|notice| notice.is_some())).await {
            Ok(Ok(notice)) => *notice,
            _ => None,
        };
        result
    }

    /// Requests graceful termination: the caller must already have
    /// dropped stdin; the monitor waits out `grace` before killing.
    pub(crate) async fn stop(mut self, grace: Duration) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(grace);
        }
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.await;
        }
        self.stderr_task.abort();
    }
}

impl Drop for KernelProcess {
    fn drop(&mut self) {
        // Dropping stop_tx without sending tells the monitor to kill
        // immediately; the child also has kill_on_drop set.
        self.stop_tx.take();
        self.stderr_task.abort();
    }
}

async fn monitor_task(
    mut child: Child,
    mut stop_rx: oneshot::Receiver<Duration>,
    exit_tx: watch::Sender<Option<ExitNotice>>,
) {
    tokio::select! {
        status = child.wait() => {
            let status = status.ok().and_then(|s| s.code());
            warn!(?status, "jsii kernel exited unexpectedly");
            let _ = exit_tx.send(Some(ExitNotice { status, expected: false }));
        }
        request = &mut stop_rx => {
            let grace = match request {
                Ok(grace) => grace,
                // Sender dropped: tear down without grace.
                Err(_) => Duration::ZERO,
            };
            let status = match time::timeout(grace, child.wait()).await {
                Ok(status) => status.ok().and_then(|s| s.code()),
                Err(_) => {
                    let _ = child.start_kill();
                    child.wait().await.ok().and_then(|s| s.code())
                }
            };
            let _ = exit_tx.send(Some(ExitNotice { status, expected: true }));
        }
    }
}

async fn stderr_task(stderr: ChildStderr, tail: StderrTail, mirror: bool) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if mirror {
            eprintln!("[jsii-runtime] {line}");
        } else {
            debug!(target: "jsii_client::kernel", "{line}");
        }
        tail.push(line);
    }
}
