//! Coordinated shutdown through the runtime.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use campus_events::RuntimePhase;
use common::{started_runtime, test_config};

#[tokio::test]
async fn test_hanging_handler_does_not_block_past_deadline() {
    let mut config = test_config();
    config.shutdown.timeout_secs = 1;
    let (runtime, _broker) = started_runtime(config).await;
    runtime.initialize().await.unwrap();
    runtime.start().await.unwrap();

    let flushed = Arc::new(AtomicBool::new(false));
    let coordinator = runtime.shutdown_coordinator();
    coordinator.register("stuck_exporter", || async {
        std::future::pending::<()>().await;
        Ok(())
    });
    let flag = flushed.clone();
    coordinator.register("metrics_flush", move || async move {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });
    coordinator.register("broken_sink", || async { Err(anyhow::anyhow!("sink closed")) });

    let started = Instant::now();
    let report = runtime.shutdown().await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(report.timed_out.contains(&"stuck_exporter".to_string()));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "broken_sink");
    assert!(report.completed.contains(&"consumer_group".to_string()));
    assert!(report.completed.contains(&"metrics_flush".to_string()));
    assert!(flushed.load(Ordering::SeqCst));
    assert!(!runtime.consumer().is_running());
    assert_eq!(runtime.phase(), RuntimePhase::Stopped);
}

#[tokio::test]
async fn test_second_shutdown_is_a_no_op() {
    let (runtime, _broker) = started_runtime(test_config()).await;
    runtime.initialize().await.unwrap();
    runtime.start().await.unwrap();

    let first = runtime.shutdown().await;
    assert_eq!(first.attempted(), 2);

    let second = runtime.shutdown().await;
    assert_eq!(second.attempted(), 0);
    assert!(runtime.shutdown_coordinator().is_shutdown_initiated());
}

#[tokio::test]
async fn test_shutdown_signal_reaches_subscribers() {
    let (runtime, _broker) = started_runtime(test_config()).await;
    let mut signal = runtime.shutdown_coordinator().subscribe();
    assert!(!*signal.borrow());

    runtime.shutdown().await;
    signal.changed().await.unwrap();
    assert!(*signal.borrow());
}
