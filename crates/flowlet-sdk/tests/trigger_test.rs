// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trigger runner tests: request/response correlation through a pipeline.

use std::sync::Arc;
use std::time::Duration;

use flowlet_protocol::codec;
use flowlet_sdk::{
    ConfigStore, Envelope, MemoryBroker, MessageKind, NodeConfig, Payload, PublishOptions,
    RunnerState, Scope, SdkError, TaskRunner, TriggerRunner, handler_fn,
};
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(5);

fn trigger_config() -> NodeConfig {
    NodeConfig::new("api")
        .with_input_subject("pipeline.done")
        .with_output_subject("pipeline.start")
}

/// Task node answering every request with the upper-cased payload.
fn upper_task(broker: &MemoryBroker) -> TaskRunner {
    let config = NodeConfig::new("upper")
        .with_input_subject("pipeline.start")
        .with_output_subject("pipeline.done");
    TaskRunner::new(config, Arc::new(broker.clone())).with_default_handler(handler_fn(
        |ctx, envelope| async move {
            let text = String::from_utf8_lossy(envelope.payload().unwrap().value()).to_uppercase();
            ctx.reply(Payload::new("text", text)).await?;
            Ok(())
        },
    ))
}

#[tokio::test]
async fn test_request_round_trip_through_task() {
    let broker = MemoryBroker::new();

    let task = upper_task(&broker);
    let task_token = task.shutdown_token();
    let mut task_state = task.state();
    let task_run = tokio::spawn(task.run_until(std::future::pending()));
    tokio::time::timeout(WAIT, task_state.wait_for(|s| *s == RunnerState::Running))
        .await
        .unwrap()
        .unwrap();

    let (tx, rx) = oneshot::channel();
    let trigger = TriggerRunner::new(trigger_config(), Arc::new(broker.clone()));
    let trigger_token = trigger.shutdown_token();
    let trigger_run = tokio::spawn(trigger.run_until(
        move |handle| async move {
            let response = handle.request(Payload::new("text", "ping")).await;
            let _ = tx.send((response, handle.pending_requests()));
            handle.cancelled().await;
            Ok(())
        },
        std::future::pending(),
    ));

    let (response, pending) = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
    let response = response.unwrap();
    assert_eq!(response.kind(), MessageKind::Ok);
    assert_eq!(response.from_node(), "upper");
    assert_eq!(response.payload().unwrap().value(), b"PING");
    assert_eq!(pending, 0);

    // The request carried the id the response came back with.
    let request = codec::decode_wire(&broker.published_to("pipeline.start")[0].data).unwrap();
    assert_eq!(request.request_id(), response.request_id());
    assert_eq!(request.from_node(), "api");

    trigger_token.cancel();
    task_token.cancel();
    trigger_run.await.unwrap().unwrap();
    task_run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_duplicate_response_is_dropped() {
    let broker = MemoryBroker::new();
    let (ready_tx, ready_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();

    let trigger = TriggerRunner::new(trigger_config(), Arc::new(broker.clone()));
    let token = trigger.shutdown_token();
    let run = tokio::spawn(trigger.run_until(
        move |handle| async move {
            let rx = handle.response_channel("r1");
            let _ = ready_tx.send(());
            let _ = done_tx.send(rx.recv().await);
            handle.cancelled().await;
            Ok(())
        },
        std::future::pending(),
    ));
    tokio::time::timeout(WAIT, ready_rx).await.unwrap().unwrap();

    let response = Envelope::ok("r1", "upper", Payload::new("text", "first"));
    broker.inject("pipeline.done", codec::encode(&response));
    assert!(broker.wait_for_acks(1, WAIT).await);

    let duplicate = Envelope::ok("r1", "upper", Payload::new("text", "second"));
    broker.inject("pipeline.done", codec::encode(&duplicate));
    assert!(broker.wait_for_acks(2, WAIT).await);

    let received = tokio::time::timeout(WAIT, done_rx).await.unwrap().unwrap().unwrap();
    assert_eq!(received.payload().unwrap().value(), b"first");
    // Unknown ids are dropped, not answered with an error.
    assert!(broker.published().is_empty());

    token.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_error_envelope_is_delivered_to_caller() {
    let broker = MemoryBroker::new();
    let (tx, rx) = oneshot::channel();

    let trigger = TriggerRunner::new(trigger_config(), Arc::new(broker.clone()));
    let token = trigger.shutdown_token();
    let run = tokio::spawn(trigger.run_until(
        move |handle| async move {
            let receiver = handle.response_channel("r5");
            handle
                .publish(Payload::raw("go"), PublishOptions::new().with_request_id("r5"))
                .await?;
            let _ = tx.send(receiver.recv().await);
            handle.cancelled().await;
            Ok(())
        },
        std::future::pending(),
    ));

    broker.wait_for_published(1, WAIT).await.unwrap();
    let failure = Envelope::error("r5", "scorer", "model not loaded");
    broker.inject("pipeline.done", codec::encode(&failure));

    let envelope = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap().unwrap();
    assert!(envelope.is_error());
    assert_eq!(envelope.error_message(), Some("model not loaded"));

    token.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_pending_requests() {
    let broker = MemoryBroker::new();
    let (tx, rx) = oneshot::channel();

    let trigger = TriggerRunner::new(trigger_config(), Arc::new(broker.clone()));
    let token = trigger.shutdown_token();
    let state = trigger.state();
    let run = tokio::spawn(trigger.run_until(
        move |handle| async move {
            // Nothing answers: this only returns once the runner shuts down.
            let _ = tx.send(handle.request(Payload::raw("lost")).await);
            Ok(())
        },
        std::future::pending(),
    ));

    broker.wait_for_published(1, WAIT).await.unwrap();
    token.cancel();

    let result = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
    assert!(matches!(result, Err(SdkError::ResponseClosed(_))));

    run.await.unwrap().unwrap();
    assert_eq!(*state.borrow(), RunnerState::Terminated);
    assert!(broker.durable_names().is_empty());
}

#[tokio::test]
async fn test_request_after_shutdown_fails_fast() {
    let broker = MemoryBroker::new();
    let (tx, rx) = oneshot::channel();

    let trigger = TriggerRunner::new(trigger_config(), Arc::new(broker.clone()));
    let token = trigger.shutdown_token();
    let mut state = trigger.state();
    let run = tokio::spawn(trigger.run_until(
        move |handle| async move {
            handle.cancelled().await;
            // Work still draining after shutdown started.
            tokio::time::sleep(Duration::from_millis(50)).await;
            let request = handle.request(Payload::raw("late")).await;
            let channel = handle.response_channel("late-channel").recv().await;
            let _ = tx.send((request, channel));
            Ok(())
        },
        std::future::pending(),
    ));

    tokio::time::timeout(WAIT, state.wait_for(|s| *s == RunnerState::Running))
        .await
        .unwrap()
        .unwrap();
    token.cancel();

    // The run completes instead of waiting on responses that cannot arrive.
    tokio::time::timeout(WAIT, run)
        .await
        .expect("runner did not stop")
        .unwrap()
        .unwrap();

    let (request, channel) = rx.await.unwrap();
    assert!(matches!(request, Err(SdkError::ResponseClosed(_))));
    assert!(matches!(channel, Err(SdkError::ResponseClosed(ref id)) if id == "late-channel"));
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_request_timeout_is_opt_in() {
    let broker = MemoryBroker::new();
    let (tx, rx) = oneshot::channel();

    let trigger = TriggerRunner::new(trigger_config(), Arc::new(broker.clone()));
    let run = tokio::spawn(trigger.run_until(
        move |handle| async move {
            let result = handle
                .request_timeout(Payload::raw("slow"), Duration::from_millis(20))
                .await;
            let _ = tx.send((result, handle.pending_requests()));
            Ok(())
        },
        // Shut down well after the request has timed out.
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
        },
    ));

    let (result, pending) = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
    assert!(matches!(result, Err(SdkError::ResponseTimeout(_))));
    assert_eq!(pending, 0);

    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_trigger_durable_names_are_unique() {
    let broker = MemoryBroker::new();
    let mut names = Vec::new();

    for _ in 0..2 {
        let trigger = TriggerRunner::new(trigger_config(), Arc::new(broker.clone()));
        let token = trigger.shutdown_token();
        let mut state = trigger.state();
        let run = tokio::spawn(trigger.run_until(
            |handle| async move {
                handle.cancelled().await;
                Ok(())
            },
            std::future::pending(),
        ));

        tokio::time::timeout(WAIT, state.wait_for(|s| *s == RunnerState::Running))
            .await
            .unwrap()
            .unwrap();
        names.extend(broker.durable_names());

        token.cancel();
        run.await.unwrap().unwrap();
    }

    assert_eq!(names.len(), 2);
    assert_ne!(names[0], names[1]);
    assert!(names.iter().all(|n| n.starts_with("pipeline-done-api-")));
}

#[tokio::test]
async fn test_trigger_sees_config_store() {
    let broker = MemoryBroker::new();
    let config = trigger_config();
    let store = ConfigStore::in_memory(&config);
    store
        .set_config("greeting", "hello", Some(Scope::Product))
        .await
        .unwrap();

    let (tx, rx) = oneshot::channel();
    TriggerRunner::new(config, Arc::new(broker))
        .with_config_store(store)
        .run_until(
            move |handle| async move {
                let value = handle.config_store()?.get_config("greeting", None).await?;
                let _ = tx.send(value);
                Ok(())
            },
            async {},
        )
        .await
        .unwrap();

    assert_eq!(rx.await.unwrap(), "hello");
}
