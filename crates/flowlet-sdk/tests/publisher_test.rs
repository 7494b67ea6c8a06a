// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Publish path tests: size threshold, compression and failure handling.

use std::sync::Arc;

use flowlet_protocol::{Envelope, MessageKind, codec};
use flowlet_sdk::{
    MemoryBroker, NodeConfig, Payload, PublishOptions, Publisher, SdkError,
};

fn publisher(broker: &MemoryBroker) -> Publisher {
    let config = NodeConfig::new("scorer").with_output_subject("scored");
    Publisher::new(Arc::new(broker.clone()), &config)
}

/// Deterministic bytes that gzip cannot shrink.
fn noise(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

#[tokio::test]
async fn test_small_message_published_unmodified() {
    let broker = MemoryBroker::with_max_payload(512);
    let request_id = publisher(&broker)
        .publish(
            Payload::new("text", "hello"),
            PublishOptions::new().with_request_id("r1"),
        )
        .await
        .unwrap();
    assert_eq!(request_id, "r1");

    let published = broker.published_to("scored");
    assert_eq!(published.len(), 1);
    assert!(!codec::is_compressed(&published[0].data));

    let envelope = codec::decode(&published[0].data).unwrap();
    assert_eq!(envelope.request_id(), "r1");
    assert_eq!(envelope.from_node(), "scorer");
    assert_eq!(envelope.kind(), MessageKind::Ok);
    assert_eq!(envelope.payload().unwrap().value(), b"hello");
}

#[tokio::test]
async fn test_oversized_compressible_message_published_compressed() {
    let broker = MemoryBroker::with_max_payload(512);
    let body = vec![b'a'; 4096];

    publisher(&broker)
        .publish(Payload::new("text", body.clone()), PublishOptions::new())
        .await
        .unwrap();

    let published = broker.published_to("scored");
    assert_eq!(published.len(), 1);
    assert!(codec::is_compressed(&published[0].data));
    assert!(published[0].data.len() <= 512);

    let envelope = codec::decode_wire(&published[0].data).unwrap();
    assert_eq!(envelope.payload().unwrap().value(), body.as_slice());
}

/// Encoded size of the envelope `publisher()` builds for `body` under "r1".
fn encoded_len(body: &[u8]) -> usize {
    let envelope = Envelope::ok("r1", "scorer", Payload::new("text", body.to_vec()));
    codec::encode(&envelope).len()
}

#[tokio::test]
async fn test_message_exactly_at_limit_is_not_compressed() {
    let body = vec![b'a'; 600];
    let max = encoded_len(&body);
    let broker = MemoryBroker::with_max_payload(max);

    publisher(&broker)
        .publish(
            Payload::new("text", body),
            PublishOptions::new().with_request_id("r1"),
        )
        .await
        .unwrap();

    let published = broker.published_to("scored");
    assert_eq!(published.len(), 1);
    assert!(!codec::is_compressed(&published[0].data));
    assert_eq!(published[0].data.len(), max);
}

#[tokio::test]
async fn test_message_one_byte_over_limit_is_compressed() {
    let body = vec![b'a'; 600];
    let max = encoded_len(&body) - 1;
    let broker = MemoryBroker::with_max_payload(max);

    publisher(&broker)
        .publish(
            Payload::new("text", body.clone()),
            PublishOptions::new().with_request_id("r1"),
        )
        .await
        .unwrap();

    let published = broker.published_to("scored");
    assert_eq!(published.len(), 1);
    assert!(codec::is_compressed(&published[0].data));
    assert!(published[0].data.len() <= max);

    let envelope = codec::decode_wire(&published[0].data).unwrap();
    assert_eq!(envelope.payload().unwrap().value(), body.as_slice());
}

#[tokio::test]
async fn test_incompressible_message_is_not_published() {
    let broker = MemoryBroker::with_max_payload(512);

    let err = publisher(&broker)
        .publish(Payload::new("blob", noise(4096)), PublishOptions::new())
        .await
        .unwrap_err();

    match err {
        SdkError::MessageTooLarge {
            size,
            compressed,
            max,
        } => {
            assert!(size > max);
            assert!(compressed > max);
            assert_eq!(max, 512);
        }
        other => panic!("expected MessageTooLarge, got {other}"),
    }
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_stream_limit_tighter_than_connection() {
    let broker = MemoryBroker::new().with_stream("flowlet", Some(256));

    publisher(&broker)
        .publish(Payload::new("text", vec![b'z'; 1024]), PublishOptions::new())
        .await
        .unwrap();

    let published = broker.published();
    assert!(codec::is_compressed(&published[0].data));
}

#[tokio::test]
async fn test_missing_request_id_is_minted() {
    let broker = MemoryBroker::new();
    let p = publisher(&broker);

    let a = p.publish(Payload::raw("x"), PublishOptions::new()).await.unwrap();
    let b = p
        .publish(Payload::raw("x"), PublishOptions::new().with_request_id(""))
        .await
        .unwrap();

    assert_ne!(a, b);
    assert!(uuid_like(&a));
    assert!(uuid_like(&b));
}

fn uuid_like(id: &str) -> bool {
    id.len() == 36 && id.chars().filter(|c| *c == '-').count() == 4
}

#[tokio::test]
async fn test_subtopic_routing() {
    let broker = MemoryBroker::new();
    publisher(&broker)
        .publish(
            Payload::raw("x"),
            PublishOptions::new().with_subtopic("eu"),
        )
        .await
        .unwrap();

    assert_eq!(broker.published_to("scored.eu").len(), 1);
    assert!(broker.published_to("scored").is_empty());
}

#[tokio::test]
async fn test_specialised_envelopes() {
    let broker = MemoryBroker::new();
    let p = publisher(&broker);

    p.publish_error("r1", "boom").await.unwrap();
    p.publish_early_reply(Payload::raw("partial"), PublishOptions::new().with_request_id("r2"))
        .await
        .unwrap();
    p.publish_early_exit(Payload::raw("stop"), PublishOptions::new().with_request_id("r3"))
        .await
        .unwrap();

    let kinds: Vec<_> = broker
        .published()
        .iter()
        .map(|m| codec::decode(&m.data).unwrap())
        .map(|e| (e.request_id().to_string(), e.kind()))
        .collect();

    assert_eq!(
        kinds,
        vec![
            ("r1".to_string(), MessageKind::Error),
            ("r2".to_string(), MessageKind::EarlyReply),
            ("r3".to_string(), MessageKind::EarlyExit),
        ]
    );
}

#[tokio::test]
async fn test_broker_failures_are_typed() {
    let broker = MemoryBroker::new();
    let p = publisher(&broker);

    broker.fail_publish(true);
    let err = p.publish(Payload::raw("x"), PublishOptions::new()).await.unwrap_err();
    assert!(matches!(err, SdkError::Publish { ref subject, .. } if subject == "scored"));

    broker.fail_publish(false);
    broker.fail_stream_info(true);
    let err = p.publish(Payload::raw("x"), PublishOptions::new()).await.unwrap_err();
    assert!(matches!(err, SdkError::Broker(_)));
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_missing_stream_is_broker_error() {
    let broker = MemoryBroker::new();
    let config = NodeConfig::new("scorer")
        .with_output_subject("scored")
        .with_stream_name("absent");
    let p = Publisher::new(Arc::new(broker.clone()), &config);

    let err = p.publish(Payload::raw("x"), PublishOptions::new()).await.unwrap_err();
    assert!(matches!(err, SdkError::Broker(_)));
}
