use super::*;

use crate::JsiiError;

#[tokio::test]
async fn handshake_ignores_build_metadata_on_both_sides() {
    let (client, mut kernel) = wired_client("1.2.3+xyz");
    let kernel_task = tokio::spawn(async move {
        kernel.hello("1.2.3+abc").await;
        let request = kernel.recv().await;
        assert!(request.get("stats").is_some(), "request: {request}");
        kernel.send(json!({ "ok": {} })).await;
    });

    client.stats().await.unwrap();
    kernel_task.await.unwrap();
}

#[tokio::test]
async fn handshake_version_mismatch_poisons_the_engine() {
    let (client, mut kernel) = wired_client("1.2.3");
    let kernel_task = tokio::spawn(async move {
        kernel.hello("1.2.4").await;
        kernel
    });

    let error = client.stats().await.unwrap_err();
    match &error {
        JsiiError::IncompatibleRuntime { expected, actual } => {
            assert_eq!(expected, "1.2.3");
            assert_eq!(actual, "1.2.4");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        error.to_string(),
        "incompatible jsii runtime: expected 1.2.3, actual 1.2.4"
    );

    // Poisoned: the next call fails without touching the wire.
    let again = client.stats().await.unwrap_err();
    assert!(
        matches!(again, JsiiError::IncompatibleRuntime { .. }),
        "unexpected error: {again:?}"
    );
    drop(kernel_task.await.unwrap());
}

#[tokio::test]
async fn non_hello_first_frame_is_a_protocol_violation() {
    let (client, mut kernel) = wired_client("1.2.3");
    let kernel_task = tokio::spawn(async move {
        kernel.send(json!({ "ok": null })).await;
        kernel
    });

    let error = client.stats().await.unwrap_err();
    assert!(
        matches!(error, JsiiError::Protocol(_)),
        "unexpected error: {error:?}"
    );
    drop(kernel_task.await.unwrap());
}

#[tokio::test]
async fn simple_call_returns_the_ok_value() {
    let (client, mut kernel) = wired_client("0.2.0");
    let kernel_task = tokio::spawn(async move {
        kernel.hello("0.2.0").await;
        let request = kernel.recv().await;
        assert_eq!(request["invoke"]["objref"], "Calc@1");
        assert_eq!(request["invoke"]["method"], "add");
        assert_eq!(request["invoke"]["args"], json!([1, 2]));
        kernel.send(json!({ "ok": { "result": 3 } })).await;
    });

    let value = client
        .invoke("Calc@1", "add", vec![1.into(), 2.into()])
        .await
        .unwrap();
    assert_eq!(value["result"], 3);
    kernel_task.await.unwrap();
}

#[tokio::test]
async fn error_response_surfaces_and_leaves_the_engine_usable() {
    let (client, mut kernel) = wired_client("0.2.0");
    let kernel_task = tokio::spawn(async move {
        kernel.hello("0.2.0").await;
        let _ = kernel.recv().await;
        kernel
            .send(json!({ "error": "divide by zero", "stack": "at calc.js:7" }))
            .await;
        let _ = kernel.recv().await;
        kernel.send(json!({ "ok": {} })).await;
    });

    let error = client
        .invoke("Calc@1", "div", vec![1.into(), 0.into()])
        .await
        .unwrap_err();
    match &error {
        JsiiError::Kernel { message, stack } => {
            assert_eq!(message, "divide by zero");
            assert_eq!(stack.as_deref(), Some("at calc.js:7"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(error.to_string(), "divide by zero\nat calc.js:7");

    // Still Ready after a kernel-reported error.
    client.stats().await.unwrap();
    kernel_task.await.unwrap();
}

#[tokio::test]
async fn callback_interrupt_runs_the_handler_and_resumes() {
    let (client, mut kernel) = wired_client("0.2.0");
    client.set_callback_handler(Arc::new(FnHandler(|callback: &Callback| {
        let invoke = callback.invoke.as_ref().expect("invoke descriptor");
        assert_eq!(invoke.method, "g");
        Ok(json!(7))
    })));

    let kernel_task = tokio::spawn(async move {
        kernel.hello("0.2.0").await;
        let request = kernel.recv().await;
        assert_eq!(request["invoke"]["method"], "f");
        kernel
            .send(json!({
                "callback": {
                    "cbid": "cb1",
                    "invoke": { "objref": "H@1", "method": "g", "args": [] }
                }
            }))
            .await;
        let complete = kernel.recv().await;
        assert_eq!(complete["complete"]["cbid"], "cb1");
        assert_eq!(complete["complete"]["result"], 7);
        assert!(complete["complete"].get("err").is_none());
        kernel.send(json!({ "ok": { "result": 14 } })).await;
    });

    let value = client.invoke("Calc@1", "f", vec![]).await.unwrap();
    assert_eq!(value["result"], 14);
    kernel_task.await.unwrap();
}

#[tokio::test]
async fn nested_callbacks_balance_each_with_one_complete() {
    let (client, mut kernel) = wired_client("0.2.0");
    client.set_callback_handler(Arc::new(FnHandler(|callback: &Callback| {
        let invoke = callback.invoke.as_ref().expect("invoke descriptor");
        match invoke.method.as_str() {
            "outer" => Ok(json!("outer-done")),
            "inner" => Ok(json!("inner-done")),
            other => Err(format!("unexpected method {other}")),
        }
    })));

    let kernel_task = tokio::spawn(async move {
        kernel.hello("0.2.0").await;
        let _ = kernel.recv().await;
        kernel
            .send(json!({
                "callback": { "cbid": "cb-outer", "invoke": { "objref": "H@1", "method": "outer" } }
            }))
            .await;
        let outer = kernel.recv().await;
        assert_eq!(outer["complete"]["cbid"], "cb-outer");
        assert_eq!(outer["complete"]["result"], "outer-done");

        // A second interrupt before the terminal response.
        kernel
            .send(json!({
                "callback": { "cbid": "cb-inner", "invoke": { "objref": "H@1", "method": "inner" } }
            }))
            .await;
        let inner = kernel.recv().await;
        assert_eq!(inner["complete"]["cbid"], "cb-inner");
        assert_eq!(inner["complete"]["result"], "inner-done");

        kernel.send(json!({ "ok": "all-done" })).await;
    });

    let value = client.invoke("Calc@1", "f", vec![]).await.unwrap();
    assert_eq!(value, json!("all-done"));
    kernel_task.await.unwrap();
}

#[tokio::test]
async fn host_error_inside_callback_becomes_err_completion() {
    let (client, mut kernel) = wired_client("0.2.0");
    client.set_callback_handler(Arc::new(FnHandler(|_: &Callback| {
        Err("boom".to_string())
    })));

    let kernel_task = tokio::spawn(async move {
        kernel.hello("0.2.0").await;
        let _ = kernel.recv().await;
        kernel
            .send(json!({
                "callback": { "cbid": "cb1", "invoke": { "objref": "H@1", "method": "g", "args": [] } }
            }))
            .await;
        let complete = kernel.recv().await;
        assert_eq!(complete["complete"]["cbid"], "cb1");
        assert_eq!(complete["complete"]["err"], "boom");
        assert!(complete["complete"].get("result").is_none());
        kernel.send(json!({ "ok": { "result": 0 } })).await;
    });

    // No exception surfaces on the host side.
    let value = client.invoke("Calc@1", "f", vec![]).await.unwrap();
    assert_eq!(value["result"], 0);
    kernel_task.await.unwrap();
}

#[tokio::test]
async fn missing_callback_target_reports_err_not_protocol_failure() {
    // The default dispatcher is installed; "H@1" was never tracked.
    let (client, mut kernel) = wired_client("0.2.0");
    let kernel_task = tokio::spawn(async move {
        kernel.hello("0.2.0").await;
        let _ = kernel.recv().await;
        kernel
            .send(json!({
                "callback": { "cbid": "cb1", "invoke": { "objref": "H@1", "method": "g" } }
            }))
            .await;
        let complete = kernel.recv().await;
        let err = complete["complete"]["err"].as_str().unwrap();
        assert!(err.contains("H@1"), "err: {err}");
        kernel.send(json!({ "ok": null })).await;
    });

    client.invoke("Calc@1", "f", vec![]).await.unwrap();
    kernel_task.await.unwrap();
}

#[tokio::test]
async fn concurrent_requests_never_interleave_on_the_wire() {
    let (client, mut kernel) = wired_client("0.2.0");
    let kernel_task = tokio::spawn(async move {
        kernel.hello("0.2.0").await;
        for _ in 0..2 {
            let request = kernel.recv().await;
            let object = request.as_object().unwrap();
            assert_eq!(object.len(), 1, "one top-level key per request");
            let tag = object.keys().next().unwrap().clone();
            kernel.send(json!({ "ok": tag })).await;
        }
    });

    let stats = client.stats();
    let naming = client.naming("my.assembly");
    let (stats, naming) = tokio::join!(stats, naming);
    let mut tags = vec![
        stats.unwrap().as_str().unwrap().to_string(),
        naming.unwrap().as_str().unwrap().to_string(),
    ];
    tags.sort();
    assert_eq!(tags, ["naming", "stats"]);
    kernel_task.await.unwrap();
}

#[tokio::test]
async fn pending_proxy_releases_drain_before_the_next_request() {
    let (client, mut kernel) = wired_client("0.2.0");
    let proxy = client.registry().resolve("Obj@1", &[]);
    drop(proxy);

    let kernel_task = tokio::spawn(async move {
        kernel.hello("0.2.0").await;
        let del = kernel.recv().await;
        assert_eq!(del["del"]["objref"], "Obj@1");
        kernel.send(json!({ "ok": null })).await;
        let stats = kernel.recv().await;
        assert!(stats.get("stats").is_some());
        kernel.send(json!({ "ok": {} })).await;
    });

    client.stats().await.unwrap();
    kernel_task.await.unwrap();
}

#[tokio::test]
async fn eof_mid_stream_poisons_the_engine() {
    let (client, mut kernel) = wired_client("0.2.0");
    let kernel_task = tokio::spawn(async move {
        kernel.hello("0.2.0").await;
        let _ = kernel.recv().await;
        // Kernel vanishes without answering.
    });

    let error = client.stats().await.unwrap_err();
    assert!(
        matches!(error, JsiiError::Protocol(_)),
        "unexpected error: {error:?}"
    );

    let again = client.stats().await.unwrap_err();
    assert!(
        matches!(again, JsiiError::Protocol(_)),
        "unexpected error: {again:?}"
    );
    kernel_task.await.unwrap();
}

#[tokio::test]
async fn explicit_release_sends_del_immediately_and_is_idempotent() {
    let (client, mut kernel) = wired_client("0.2.0");
    let kernel_task = tokio::spawn(async move {
        kernel.hello("0.2.0").await;
        let stats = kernel.recv().await;
        assert!(stats.get("stats").is_some());
        kernel.send(json!({ "ok": {} })).await;
        let del = kernel.recv().await;
        assert_eq!(del["del"]["objref"], "Obj@1");
        kernel.send(json!({ "ok": null })).await;
        let stats = kernel.recv().await;
        assert!(stats.get("stats").is_some(), "a second del must not appear");
        kernel.send(json!({ "ok": {} })).await;
    });

    // Start the kernel, then release.
    client.stats().await.unwrap();
    let proxy = client.registry().resolve("Obj@1", &[]);
    client.release("Obj@1").await.unwrap();
    client.release("Obj@1").await.unwrap();
    drop(proxy);
    client.stats().await.unwrap();
    kernel_task.await.unwrap();
}
