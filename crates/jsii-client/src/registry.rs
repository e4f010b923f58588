use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex as StdMutex, Weak},
};

use tracing::debug;

use crate::callbacks::JsiiCallable;

/// Prefix of synthetic handles minted for host-originated objects.
pub const HOST_HANDLE_PREFIX: &str = "jsii@";

/// A host-side stand-in for an object that lives in the kernel.
///
/// Holds exactly one handle. At most one proxy exists per (registry,
/// handle) pair; re-receiving a handle yields the same proxy. Dropping
/// the last reference enqueues a deferred `del` for the engine.
#[derive(Debug)]
pub struct ObjectProxy {
    handle: String,
    interfaces: Vec<String>,
    releases: Weak<ReleaseQueue>,
}

impl ObjectProxy {
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Interface FQNs reported by the kernel when the proxy was first
    /// observed.
    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }
}

impl PartialEq for ObjectProxy {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for ObjectProxy {}

impl Drop for ObjectProxy {
    fn drop(&mut self) {
        if let Some(releases) = self.releases.upgrade() {
            releases.enqueue(&self.handle);
        }
    }
}

/// Handles waiting for a `del`, deduplicated for the registry lifetime
/// so a handle is never released twice on the wire.
#[derive(Default)]
struct ReleaseQueue {
    inner: StdMutex<ReleaseQueueInner>,
}

#[derive(Default)]
struct ReleaseQueueInner {
    queued: Vec<String>,
    seen: HashSet<String>,
}

impl ReleaseQueue {
    fn enqueue(&self, handle: &str) {
        let mut inner = lock(&self.inner);
        if inner.seen.insert(handle.to_string()) {
            inner.queued.push(handle.to_string());
        }
    }

    fn drain(&self) -> Vec<String> {
        std::mem::take(&mut lock(&self.inner).queued)
    }
}

#[derive(Default)]
struct RegistryState {
    /// Kernel handle -> live proxy. Weak so collection of the last host
    /// reference frees the entry (via the release queue).
    proxies: HashMap<String, Weak<ObjectProxy>>,
    /// Synthetic handle -> host object sent into the kernel.
    host_objects: HashMap<String, HostEntry>,
    /// Host object identity (by allocation) -> synthetic handle.
    host_handles: HashMap<usize, String>,
    next_host_id: u64,
}

struct HostEntry {
    object: Arc<dyn JsiiCallable>,
    interfaces: Vec<String>,
}

/// Bidirectional object-reference table binding kernel handles to host
/// proxies and host objects to synthetic handles.
#[derive(Default)]
pub struct ObjectRegistry {
    state: StdMutex<RegistryState>,
    releases: Arc<ReleaseQueue>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the proxy for `handle`, constructing one on first
    /// observation. Identity-preserving: the same live handle always
    /// resolves to the same proxy.
    pub fn resolve(&self, handle: &str, interfaces: &[String]) -> Arc<ObjectProxy> {
        let mut state = lock(&self.state);
        if let Some(existing) = state.proxies.get(handle).and_then(Weak::upgrade) {
            return existing;
        }

        let proxy = Arc::new(ObjectProxy {
            handle: handle.to_string(),
            interfaces: interfaces.to_vec(),
            releases: Arc::downgrade(&self.releases),
        });
        state
            .proxies
            .insert(handle.to_string(), Arc::downgrade(&proxy));
        debug!(handle, "registered kernel object proxy");
        proxy
    }

    /// Registers a host object so the kernel can call back into it,
    /// minting a `jsii@<n>` handle. Tracking the same object again
    /// returns the original handle.
    pub fn track(&self, object: Arc<dyn JsiiCallable>, interfaces: &[String]) -> String {
        let identity = Arc::as_ptr(&object) as *const () as usize;
        let mut state = lock(&self.state);
        if let Some(handle) = state.host_handles.get(&identity) {
            return handle.clone();
        }

        state.next_host_id += 1;
        let handle = format!("{HOST_HANDLE_PREFIX}{}", state.next_host_id);
        state.host_handles.insert(identity, handle.clone());
        state.host_objects.insert(
            handle.clone(),
            HostEntry {
                object,
                interfaces: interfaces.to_vec(),
            },
        );
        debug!(%handle, "tracked host object");
        handle
    }

    /// The host object registered under a synthetic handle.
    pub fn resolve_host(&self, handle: &str) -> Option<Arc<dyn JsiiCallable>> {
        lock(&self.state)
            .host_objects
            .get(handle)
            .map(|entry| entry.object.clone())
    }

    /// Interfaces a tracked host object was registered with.
    pub fn host_interfaces(&self, handle: &str) -> Vec<String> {
        lock(&self.state)
            .host_objects
            .get(handle)
            .map(|entry| entry.interfaces.clone())
            .unwrap_or_default()
    }

    /// Forgets `handle`. Kernel handles are queued for a `del` on the
    /// next engine acquisition; synthetic host handles are only
    /// unregistered. Idempotent.
    pub fn release(&self, handle: &str) {
        let mut state = lock(&self.state);
        if handle.starts_with(HOST_HANDLE_PREFIX) {
            if let Some(entry) = state.host_objects.remove(handle) {
                let identity = Arc::as_ptr(&entry.object) as *const () as usize;
                state.host_handles.remove(&identity);
            }
            return;
        }

        state.proxies.remove(handle);
        self.releases.enqueue(handle);
    }

    /// Drains handles whose proxies were dropped or explicitly
    /// released. Called by the engine before issuing a request, never
    /// from inside one.
    pub(crate) fn take_pending_releases(&self) -> Vec<String> {
        // Prune map entries whose proxies died; their handles are
        // already in the queue courtesy of ObjectProxy::drop.
        lock(&self.state)
            .proxies
            .retain(|_, weak| weak.strong_count() > 0);
        self.releases.drain()
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
