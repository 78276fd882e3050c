//! Failure handling and shutdown behaviour

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use stagehand::stages::{AddStage, MultiplyStage};
use stagehand::{ChannelSink, Manager, ManagerBuilder, Stage, StagehandError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Fails on negative numbers, echoes everything else
#[derive(Default)]
struct RejectNegative;

#[async_trait]
impl Stage for RejectNegative {
    fn namespace(&self) -> &str {
        "reject_negative"
    }

    async fn process(&mut self, value: Value) -> anyhow::Result<Value> {
        match value.as_f64() {
            Some(n) if n < 0.0 => anyhow::bail!("negative input {}", n),
            _ => Ok(value),
        }
    }
}

/// Sleeps before echoing
struct Slow {
    delay: Duration,
}

#[async_trait]
impl Stage for Slow {
    fn namespace(&self) -> &str {
        "slow"
    }

    async fn process(&mut self, value: Value) -> anyhow::Result<Value> {
        sleep(self.delay).await;
        Ok(value)
    }
}

async fn wait_until_stopped(manager: &Manager, stage: &str) {
    timeout(Duration::from_secs(5), async {
        while manager.is_serving(stage) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker kept running");
}

#[tokio::test]
async fn test_stage_failure_loses_request_and_stops_worker() {
    let (sink, mut rx) = ChannelSink::new();
    let manager = ManagerBuilder::new()
        .register_default::<RejectNegative>()
        .unwrap()
        .register_default::<AddStage>()
        .unwrap()
        .with_sink(Arc::new(sink))
        .build()
        .await
        .unwrap();

    manager
        .submit(json!(-1), ["reject_negative", "module_add"])
        .await
        .unwrap();
    wait_until_stopped(&manager, "reject_negative").await;

    // Other stages keep serving.
    assert!(manager.is_serving("module_add"));
    manager.submit(json!(1), ["module_add"]).await.unwrap();
    let done = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(done.value, json!(11));

    let err = manager
        .submit(json!(2), ["reject_negative"])
        .await
        .unwrap_err();
    assert!(matches!(err, StagehandError::Channel { ref channel, .. } if channel == "reject_negative"));

    // Rejected submits are not counted.
    let stats = manager.stats();
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.lost, 1);
    assert_eq!(stats.completed, 1);

    let report = manager.shutdown().await.unwrap();
    assert_eq!(report.worker_failures.len(), 1);
    assert_eq!(report.worker_failures[0].stage, "reject_negative");
    assert!(report.worker_failures[0].error.contains("negative input"));
    assert!(report.drained);
}

#[tokio::test]
async fn test_routing_into_dead_stage_keeps_upstream_serving() {
    let (sink, mut rx) = ChannelSink::new();
    let manager = ManagerBuilder::new()
        .register_default::<RejectNegative>()
        .unwrap()
        .register_default::<MultiplyStage>()
        .unwrap()
        .register_stage("slow", || {
            Box::new(Slow {
                delay: Duration::from_millis(200),
            })
        })
        .unwrap()
        .with_sink(Arc::new(sink))
        .build()
        .await
        .unwrap();

    // Held in `slow` while `reject_negative` dies, then multiplied and sent
    // on to the dead stage.
    manager
        .submit(json!(1), ["slow", "module_multiply", "reject_negative"])
        .await
        .unwrap();
    manager.submit(json!(-1), ["reject_negative"]).await.unwrap();
    wait_until_stopped(&manager, "reject_negative").await;

    timeout(Duration::from_secs(5), async {
        while manager.stats().lost < 2 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("request routed to the dead stage was not dropped");

    assert!(manager.is_serving("module_multiply"));
    assert!(manager.is_serving("slow"));

    // Routes through the dead stage are refused up front.
    let err = manager
        .submit(json!(1), ["module_multiply", "reject_negative"])
        .await
        .unwrap_err();
    assert!(matches!(err, StagehandError::Channel { ref channel, .. } if channel == "reject_negative"));
    assert_eq!(manager.stats().submitted, 2);

    manager.submit(json!(3), ["module_multiply"]).await.unwrap();
    let done = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(done.value, json!(6));

    let report = manager.shutdown().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.lost, 2);
    assert_eq!(report.worker_failures.len(), 1);
    assert_eq!(report.worker_failures[0].stage, "reject_negative");
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_requests() {
    let (sink, mut rx) = ChannelSink::new();
    let manager = ManagerBuilder::new()
        .register_stage("slow", || {
            Box::new(Slow {
                delay: Duration::from_millis(20),
            })
        })
        .unwrap()
        .register_default::<MultiplyStage>()
        .unwrap()
        .with_sink(Arc::new(sink))
        .build()
        .await
        .unwrap();

    for i in 0..5 {
        manager.submit(json!(i), ["slow", "module_multiply"]).await.unwrap();
    }

    let report = manager.shutdown().await.unwrap();
    assert!(report.drained);
    assert_eq!(report.submitted, 5);
    assert_eq!(report.completed, 5);
    assert_eq!(report.abandoned, 0);
    assert!(report.worker_failures.is_empty());

    let mut values = Vec::new();
    while let Ok(done) = rx.try_recv() {
        values.push(done.value.as_i64().unwrap());
    }
    values.sort();
    assert_eq!(values, vec![0, 2, 4, 6, 8]);
}

#[tokio::test]
async fn test_drain_timeout_abandons_stuck_requests() {
    let (sink, _rx) = ChannelSink::new();
    let manager = ManagerBuilder::new()
        .register_stage("slow", || {
            Box::new(Slow {
                delay: Duration::from_secs(60),
            })
        })
        .unwrap()
        .with_drain_timeout(Duration::from_millis(100))
        .with_sink(Arc::new(sink))
        .build()
        .await
        .unwrap();

    manager.submit(json!(1), ["slow"]).await.unwrap();
    // Let the worker pick it up.
    sleep(Duration::from_millis(20)).await;

    let report = timeout(Duration::from_secs(5), manager.shutdown())
        .await
        .expect("shutdown hung")
        .unwrap();
    assert!(!report.drained);
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(report.worker_failures.len(), 1);
    assert_eq!(report.worker_failures[0].stage, "slow");
}

#[tokio::test]
async fn test_shutdown_of_idle_manager() {
    let (sink, _rx) = ChannelSink::new();
    let manager = ManagerBuilder::new()
        .register_default::<AddStage>()
        .unwrap()
        .with_sink(Arc::new(sink))
        .build()
        .await
        .unwrap();

    let report = manager.shutdown().await.unwrap();
    assert_eq!(report.submitted, 0);
    assert!(report.drained);
    assert!(report.worker_failures.is_empty());
}
