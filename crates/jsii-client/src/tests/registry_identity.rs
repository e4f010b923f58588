use super::*;

use crate::callbacks::{HostError, JsiiCallable};
use crate::marshal::JsiiValue;
use crate::registry::ObjectRegistry;

struct Greeter;

impl JsiiCallable for Greeter {
    fn invoke(&self, method: &str, _args: Vec<JsiiValue>) -> Result<JsiiValue, HostError> {
        Ok(JsiiValue::String(format!("hello from {method}")))
    }
}

#[test]
fn resolve_preserves_identity_for_repeated_handles() {
    let registry = ObjectRegistry::new();
    let first = registry.resolve("Obj@1", &["my.IFace".to_string()]);
    let second = registry.resolve("Obj@1", &[]);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.interfaces(), ["my.IFace".to_string()]);
}

#[test]
fn dropping_the_last_reference_enqueues_exactly_one_release() {
    let registry = ObjectRegistry::new();
    let proxy = registry.resolve("Obj@1", &[]);
    let alias = proxy.clone();
    drop(proxy);
    assert!(registry.take_pending_releases().is_empty());

    drop(alias);
    assert_eq!(registry.take_pending_releases(), ["Obj@1".to_string()]);
    assert!(registry.take_pending_releases().is_empty());
}

#[test]
fn release_is_idempotent_per_handle() {
    let registry = ObjectRegistry::new();
    let proxy = registry.resolve("Obj@1", &[]);
    registry.release("Obj@1");
    registry.release("Obj@1");
    assert_eq!(registry.take_pending_releases(), ["Obj@1".to_string()]);

    // The proxy dropping later must not queue a second del.
    drop(proxy);
    assert!(registry.take_pending_releases().is_empty());
}

#[test]
fn a_released_handle_resolves_to_a_fresh_proxy() {
    let registry = ObjectRegistry::new();
    let first = registry.resolve("Obj@1", &[]);
    registry.release("Obj@1");
    let second = registry.resolve("Obj@1", &[]);
    assert!(!Arc::ptr_eq(&first, &second));
}

#[test]
fn track_mints_sentinel_handles_and_preserves_host_identity() {
    let registry = ObjectRegistry::new();
    let greeter: Arc<dyn JsiiCallable> = Arc::new(Greeter);

    let handle = registry.track(greeter.clone(), &["my.IGreeter".to_string()]);
    assert!(handle.starts_with("jsii@"), "handle: {handle}");
    assert_eq!(registry.track(greeter.clone(), &[]), handle);
    assert_eq!(
        registry.host_interfaces(&handle),
        ["my.IGreeter".to_string()]
    );

    let resolved = registry.resolve_host(&handle).expect("tracked object");
    assert!(Arc::ptr_eq(&resolved, &greeter));

    registry.release(&handle);
    assert!(registry.resolve_host(&handle).is_none());
    // Host handles never travel through the del queue.
    assert!(registry.take_pending_releases().is_empty());
}

#[test]
fn distinct_host_objects_get_distinct_handles() {
    let registry = ObjectRegistry::new();
    let first: Arc<dyn JsiiCallable> = Arc::new(Greeter);
    let second: Arc<dyn JsiiCallable> = Arc::new(Greeter);
    assert_ne!(
        registry.track(first, &[]),
        registry.track(second, &[])
    );
}
