use std::fs as std_fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

use crate::api::Callback;
use crate::callbacks::CallbackHandler;
use crate::KernelClient;

fn env_mutex() -> &'static tokio::sync::Mutex<()> {
    static ENV_MUTEX: OnceLock<tokio::sync::Mutex<()>> = OnceLock::new();
    ENV_MUTEX.get_or_init(|| tokio::sync::Mutex::new(()))
}

pub(super) async fn env_guard_async() -> tokio::sync::MutexGuard<'static, ()> {
    env_mutex().lock().await
}

/// Writes an executable fake kernel named `jsii-runtime` into `dir`.
pub(super) fn write_fake_kernel(dir: &Path, script: &str) -> PathBuf {
    let path = dir.join("jsii-runtime");
    std_fs::write(&path, script).unwrap();
    let mut perms = std_fs::metadata(&path).unwrap().permissions();
    #[cfg(unix)]
    {
        perms.set_mode(0o755);
    }
    std_fs::set_permissions(&path, perms).unwrap();
    path
}

/// The kernel side of an in-memory wire, for scripting transcripts.
pub(super) struct FakeKernel {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeKernel {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub(super) async fn hello(&mut self, version: &str) {
        self.send(serde_json::json!({ "hello": version })).await;
    }

    pub(super) async fn send(&mut self, value: Value) {
        let mut line = value.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    /// Reads exactly one request line and parses it.
    pub(super) async fn recv(&mut self) -> Value {
        serde_json::from_str(self.recv_line().await.trim_end()).unwrap()
    }

    pub(super) async fn recv_line(&mut self) -> String {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).await.unwrap();
        assert_ne!(read, 0, "host closed the wire");
        line
    }
}

/// A client over an in-memory duplex wire plus the kernel end driving
/// it; the handshake runs on the client's first request.
pub(super) fn wired_client(expected_version: &str) -> (KernelClient, FakeKernel) {
    let (host_end, kernel_end) = tokio::io::duplex(64 * 1024);
    let client = KernelClient::in_memory(host_end, expected_version);
    (client, FakeKernel::new(kernel_end))
}

/// Callback handler backed by a closure.
pub(super) struct FnHandler<F>(pub(super) F);

impl<F> CallbackHandler for FnHandler<F>
where
    F: Fn(&Callback) -> Result<Value, String> + Send + Sync,
{
    fn handle(&self, callback: &Callback) -> Result<Value, String> {
        (self.0)(callback)
    }
}
