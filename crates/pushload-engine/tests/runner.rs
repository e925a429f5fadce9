//! LoadRunner scheduling tests: stagger, remainder policy, spawn, finished.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use pushload_engine::{parse_test_plan, ScenarioRegistry, ScenarioSpec};
use support::{MockPushServer, RecordingMetrics};

const FINISH_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::test]
async fn stagger_spreads_launches_over_seconds() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());
    let registry = Arc::new(ScenarioRegistry::with_builtins());
    let runner = support::runner(&server, registry.clone(), metrics.clone());

    let started = Instant::now();
    let entries = parse_test_plan(&registry, "scenarios:basic, 10, 5, 0").unwrap();
    runner.start(entries).unwrap();
    tokio::time::timeout(FINISH_TIMEOUT, runner.wait_finished())
        .await
        .expect("stagger run did not finish");

    // 10 drivers at 5/s: the second batch launches one second in.
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(metrics.counter("notification.sent"), 10);
    assert_eq!(metrics.counter("notification.ack"), 10);
}

#[tokio::test]
async fn quantity_remainder_is_dropped() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());
    let registry = Arc::new(ScenarioRegistry::with_builtins());
    let runner = support::runner(&server, registry.clone(), metrics.clone());

    let entries = parse_test_plan(&registry, "scenarios:basic, 7, 5, 0").unwrap();
    runner.start(entries).unwrap();
    tokio::time::timeout(FINISH_TIMEOUT, runner.wait_finished())
        .await
        .expect("run did not finish");

    // 7 requested at stagger 5: only one full batch of 5 launches.
    assert_eq!(metrics.counter("notification.sent"), 5);
}

#[tokio::test]
async fn spawned_plans_run_additional_drivers() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());

    let mut registry = ScenarioRegistry::with_builtins();
    registry.register(ScenarioSpec::new("scenarios:spawner", |client, _args| async move {
        for _ in 0..4 {
            client.spawn("scenarios:basic, 1, 1, 0").await?;
        }
        Ok(())
    }));
    let registry = Arc::new(registry);
    let runner = support::runner(&server, registry.clone(), metrics.clone());

    let entries = parse_test_plan(&registry, "scenarios:spawner, 1, 1, 0").unwrap();
    runner.start(entries).unwrap();
    tokio::time::timeout(FINISH_TIMEOUT, runner.wait_finished())
        .await
        .expect("spawned run did not finish");

    assert_eq!(metrics.counter("notification.sent"), 4);
    assert_eq!(metrics.counter("notification.ack"), 4);
}

#[tokio::test]
async fn bad_spawn_plan_is_fatal_to_the_caller_only() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());

    let mut registry = ScenarioRegistry::with_builtins();
    registry.register(ScenarioSpec::new("scenarios:bad_spawner", |client, _args| async move {
        client.spawn("scenarios:no_such_scenario, 1, 1, 0").await?;
        client.counter("unreachable", 1).await?;
        Ok(())
    }));
    let registry = Arc::new(registry);
    let runner = support::runner(&server, registry.clone(), metrics.clone());

    let entries = parse_test_plan(&registry, "scenarios:bad_spawner, 1, 1, 0").unwrap();
    runner.start(entries).unwrap();
    tokio::time::timeout(FINISH_TIMEOUT, runner.wait_finished())
        .await
        .expect("run did not finish");

    assert_eq!(metrics.counter("unreachable"), 0);
}

#[tokio::test]
async fn finished_is_monotone() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());
    let registry = Arc::new(ScenarioRegistry::with_builtins());
    let runner = support::runner(&server, registry.clone(), metrics);

    assert!(!runner.finished(), "must not be finished before start");

    let entries = parse_test_plan(&registry, "scenarios:basic, 1, 1, 0").unwrap();
    runner.start(entries).unwrap();
    tokio::time::timeout(FINISH_TIMEOUT, runner.wait_finished())
        .await
        .expect("run did not finish");

    for _ in 0..3 {
        assert!(runner.finished());
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
