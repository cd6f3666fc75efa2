#![cfg(feature = "loopback")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use polycrypt::loopback::LoopbackBackend;
use polycrypt_channel::MemoryChannel;
use polycrypt_client::{ClientConfig, OperationStatus, Polycrypt};
use serde_json::json;

async fn connected() -> Polycrypt {
    let ((caller, caller_in), (backend, backend_in)) =
        MemoryChannel::pair("http://caller.test", "http://backend.test");
    tokio::spawn(LoopbackBackend::new(backend).serve(backend_in));

    let client =
        Polycrypt::connect(caller, caller_in, ClientConfig::default()).expect("client should start");
    tokio::time::timeout(Duration::from_secs(2), client.wait_until_alive())
        .await
        .expect("backend should announce itself")
        .expect("channel should stay open");
    client
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_completed_key_operation_runs_its_listener() {
    let client = connected().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut ops = Vec::new();
    for _ in 0..500 {
        let op = client.generate_key(json!({"name": "AES-GCM", "length": 256}), true, vec![]);
        let count = calls.clone();
        op.on_complete(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        ops.push(op);
    }

    for op in &ops {
        let status = tokio::time::timeout(Duration::from_secs(5), op.completion())
            .await
            .expect("key operation should settle");
        assert_eq!(status, OperationStatus::Completed);
    }
    client.flush().await;

    assert_eq!(calls.load(Ordering::SeqCst), ops.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_caller_still_sees_the_outcome() {
    let client = connected().await;
    let op = client.digest("SHA-256", Some(b"abc".to_vec()));
    op.finish();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let count = calls.clone();
    op.on_complete(move |event| {
        assert_eq!(event.target.result(), Some(json!(b"abc".to_vec())));
        count.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::timeout(Duration::from_secs(2), op.completion())
        .await
        .expect("digest should settle");
    client.flush().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
