// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Exercises event/service/resource traffic between two peers sharing one
//! in-process [`peerlink::mock::MockBroker`], the way `hebo`'s own
//! integration tests drive a broker without a real socket.

use std::sync::Arc;
use std::time::Duration;

use codec::Value;
use tokio::sync::{mpsc, oneshot};

use peerlink::mock::MockBroker;
use peerlink::{
    BoxFuture, EventInfo, Peer, PeerOptions, ProvisionOutcome, ResourceData, ResourceInfo, ResourceOutcome,
    ServiceCallInfo,
};

fn short_timeout_options() -> PeerOptions {
    let mut options = PeerOptions::new();
    options.set_timeout(Duration::from_millis(100));
    options
}

#[tokio::test]
async fn test_event_round_trip_broadcast() {
    let broker = MockBroker::new();
    let a = Peer::new(broker.connect(), PeerOptions::new());
    let b = Peer::new(broker.connect(), PeerOptions::new());

    let (tx, mut rx) = mpsc::unbounded_channel::<(Vec<Value>, EventInfo)>();
    b.subscribe(
        "greeting",
        None,
        Arc::new(move |params: Vec<Value>, info: EventInfo| -> BoxFuture<'static, ()> {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send((params, info));
            })
        }),
    )
    .await
    .unwrap();

    a.emit("greeting", Some(vec![Value::from("hi")]), None, None).await.unwrap();

    let (params, info) = rx.recv().await.unwrap();
    assert_eq!(params, vec![Value::from("hi")]);
    assert_eq!(info.sender.as_deref(), Some(a.id().as_str()));
    assert_eq!(info.receiver, None);
}

#[tokio::test]
async fn test_event_round_trip_directed() {
    let broker = MockBroker::new();
    let a = Peer::new(broker.connect(), PeerOptions::new());
    let b = Peer::new(broker.connect(), PeerOptions::new());
    let c = Peer::new(broker.connect(), PeerOptions::new());

    let (tx_b, mut rx_b) = mpsc::unbounded_channel::<Vec<Value>>();
    let (tx_c, mut rx_c) = mpsc::unbounded_channel::<Vec<Value>>();
    b.subscribe(
        "greeting",
        None,
        Arc::new(move |params: Vec<Value>, _info: EventInfo| -> BoxFuture<'static, ()> {
            let tx_b = tx_b.clone();
            Box::pin(async move {
                let _ = tx_b.send(params);
            })
        }),
    )
    .await
    .unwrap();
    c.subscribe(
        "greeting",
        None,
        Arc::new(move |params: Vec<Value>, _info: EventInfo| -> BoxFuture<'static, ()> {
            let tx_c = tx_c.clone();
            Box::pin(async move {
                let _ = tx_c.send(params);
            })
        }),
    )
    .await
    .unwrap();

    a.emit("greeting", Some(vec![Value::from("only-b")]), Some(b.id().as_str()), None)
        .await
        .unwrap();

    let params = rx_b.recv().await.unwrap();
    assert_eq!(params, vec![Value::from("only-b")]);

    // c never subscribed to the direct topic, so it must not see anything.
    let nothing = tokio::time::timeout(Duration::from_millis(100), rx_c.recv()).await;
    assert!(nothing.is_err(), "c should not have received a directed event meant for b");
}

#[tokio::test]
async fn test_emit_dry_run_does_not_touch_transport() {
    let peer = Peer::new_dry_run(PeerOptions::new());
    let dry = peer
        .emit_dry("shutdown", Some(vec![Value::from("bye")]), None, None)
        .unwrap();
    assert!(dry.topic.starts_with("shutdown/event-emission/"));
    assert!(!dry.payload.is_empty());

    // Any network-touching call on a dry-run peer must fail instead of
    // silently succeeding.
    let err = peer.emit("shutdown", None, None, None).await.unwrap_err();
    assert!(matches!(err, peerlink::Error::Transport(_)));
}

#[tokio::test]
async fn test_service_call_success() {
    let broker = MockBroker::new();
    let a = Peer::new(broker.connect(), PeerOptions::new());
    let b = Peer::new(broker.connect(), PeerOptions::new());

    b.register(
        "add",
        None,
        Arc::new(
            move |params: Vec<Value>, _info: ServiceCallInfo| -> BoxFuture<'static, Result<Value, String>> {
                Box::pin(async move {
                    let sum: i64 = params
                        .iter()
                        .map(|v| if let Value::Int(i) = v { *i } else { 0 })
                        .sum();
                    Ok(Value::Int(sum))
                })
            },
        ),
    )
    .await
    .unwrap();

    let result = a
        .call("add", Some(vec![Value::Int(2), Value::Int(3)]), None, None)
        .await
        .unwrap();
    assert_eq!(result, Value::Int(5));
}

#[tokio::test]
async fn test_service_call_handler_error_is_propagated() {
    let broker = MockBroker::new();
    let a = Peer::new(broker.connect(), PeerOptions::new());
    let b = Peer::new(broker.connect(), PeerOptions::new());

    b.register(
        "divide",
        None,
        Arc::new(
            move |params: Vec<Value>, _info: ServiceCallInfo| -> BoxFuture<'static, Result<Value, String>> {
                Box::pin(async move {
                    let (Value::Int(x), Value::Int(y)) = (&params[0], &params[1]) else {
                        return Err("arguments must be integers".to_string());
                    };
                    if *y == 0 {
                        Err("division by zero".to_string())
                    } else {
                        Ok(Value::Int(x / y))
                    }
                })
            },
        ),
    )
    .await
    .unwrap();

    let err = a
        .call("divide", Some(vec![Value::Int(1), Value::Int(0)]), None, None)
        .await
        .unwrap_err();
    match err {
        peerlink::Error::Service(message) => assert_eq!(message, "division by zero"),
        other => panic!("expected Error::Service, got {other:?}"),
    }
}

#[tokio::test]
async fn test_service_call_without_provisioner_times_out() {
    // Same broker, but nobody ever subscribes a request topic, so the
    // broker itself never delivers anything back: the caller must hit the
    // timeout branch rather than hang forever.
    let broker = MockBroker::new();
    let a = Peer::new(broker.connect(), short_timeout_options());

    let err = a.call("ghost", None, None, None).await.unwrap_err();
    assert!(matches!(err, peerlink::Error::Timeout));
}

#[tokio::test]
async fn test_service_unregister_then_call_times_out() {
    let broker = MockBroker::new();
    let a = Peer::new(broker.connect(), short_timeout_options());
    let b = Peer::new(broker.connect(), PeerOptions::new());

    let registration = b
        .register(
            "echo",
            None,
            Arc::new(
                |params: Vec<Value>, _info: ServiceCallInfo| -> BoxFuture<'static, Result<Value, String>> {
                    Box::pin(async move { Ok(params.into_iter().next().unwrap_or(Value::Null)) })
                },
            ),
        )
        .await
        .unwrap();
    registration.unregister().await.unwrap();
    assert!(matches!(
        registration.unregister().await.unwrap_err(),
        peerlink::Error::NotRegistered(_)
    ));

    let err = a.call("echo", None, None, None).await.unwrap_err();
    assert!(matches!(err, peerlink::Error::Timeout));
}

#[tokio::test]
async fn test_resource_fetch_success_buffer() {
    let broker = MockBroker::new();
    let a = Peer::new(broker.connect(), PeerOptions::new());
    let b = Peer::new(broker.connect(), PeerOptions::new());

    b.provision(
        "file",
        None,
        Arc::new(
            move |_params: Vec<Value>, _info: ResourceInfo| -> BoxFuture<'static, Result<ResourceOutcome, String>> {
                Box::pin(async move {
                    Ok(ResourceOutcome::Serve(ProvisionOutcome {
                        meta: None,
                        data: ResourceData::Buffer(b"hello world".to_vec()),
                    }))
                })
            },
        ),
    )
    .await
    .unwrap();

    let handle = a.fetch("file", None, None, None).await.unwrap();
    let bytes = handle.buffer().await.unwrap();
    assert_eq!(bytes, b"hello world".to_vec());
}

#[tokio::test]
async fn test_resource_fetch_chunks_large_buffer() {
    let broker = MockBroker::new();
    let a = Peer::new(broker.connect(), PeerOptions::new());
    let mut small_chunk_options = PeerOptions::new();
    small_chunk_options.set_chunk_size(4);
    let b = Peer::new(broker.connect(), small_chunk_options);

    let payload: Vec<u8> = (0u8..20).collect();
    let expected = payload.clone();
    b.provision(
        "blob",
        None,
        Arc::new(
            move |_params: Vec<Value>, _info: ResourceInfo| -> BoxFuture<'static, Result<ResourceOutcome, String>> {
                let payload = payload.clone();
                Box::pin(async move {
                    Ok(ResourceOutcome::Serve(ProvisionOutcome {
                        meta: None,
                        data: ResourceData::Buffer(payload),
                    }))
                })
            },
        ),
    )
    .await
    .unwrap();

    let handle = a.fetch("blob", None, None, None).await.unwrap();
    let bytes = handle.buffer().await.unwrap();
    assert_eq!(bytes, expected);
}

#[tokio::test]
async fn test_resource_fetch_without_provisioner_times_out() {
    let broker = MockBroker::new();
    let a = Peer::new(broker.connect(), short_timeout_options());

    let handle = a.fetch("missing", None, None, None).await.unwrap();
    let err = handle.buffer().await.unwrap_err();
    assert!(matches!(err, peerlink::Error::Timeout));
}

#[tokio::test]
async fn test_resource_push_drains_into_provisioner() {
    let broker = MockBroker::new();
    let a = Peer::new(broker.connect(), PeerOptions::new());
    let b = Peer::new(broker.connect(), PeerOptions::new());

    let (tx, rx) = oneshot::channel::<Vec<u8>>();
    let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
    b.provision(
        "upload",
        None,
        Arc::new(
            move |_params: Vec<Value>, info: ResourceInfo| -> BoxFuture<'static, Result<ResourceOutcome, String>> {
                let tx = Arc::clone(&tx);
                Box::pin(async move {
                    let mut inbound = info.inbound.expect("push invocation must carry an inbound stream");
                    let mut collected = Vec::new();
                    while let Some(chunk) = inbound.recv().await {
                        collected.extend(chunk.map_err(|e| e.to_string())?);
                    }
                    if let Some(tx) = tx.lock().unwrap().take() {
                        let _ = tx.send(collected);
                    }
                    Ok(ResourceOutcome::Consumed)
                })
            },
        ),
    )
    .await
    .unwrap();

    a.push("upload", ResourceData::Buffer(b"payload-bytes".to_vec()), None, None, None, None)
        .await
        .unwrap();

    let collected = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
    assert_eq!(collected, b"payload-bytes".to_vec());
}

#[tokio::test]
async fn test_resource_unprovision_stops_future_fetches() {
    let broker = MockBroker::new();
    let a = Peer::new(broker.connect(), short_timeout_options());
    let b = Peer::new(broker.connect(), PeerOptions::new());

    let provisioning = b
        .provision(
            "doc",
            None,
            Arc::new(
                |_params: Vec<Value>, _info: ResourceInfo| -> BoxFuture<'static, Result<ResourceOutcome, String>> {
                    Box::pin(async move {
                        Ok(ResourceOutcome::Serve(ProvisionOutcome {
                            meta: None,
                            data: ResourceData::Buffer(b"doc".to_vec()),
                        }))
                    })
                },
            ),
        )
        .await
        .unwrap();

    provisioning.unprovision().await.unwrap();

    let handle = a.fetch("doc", None, None, None).await.unwrap();
    let err = handle.buffer().await.unwrap_err();
    assert!(matches!(err, peerlink::Error::Timeout));
}
