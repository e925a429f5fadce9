//! End-to-end scenario tests against the mock push server.

mod support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pushload_engine::{
    parse_test_plan, ScenarioError, ScenarioRegistry, ScenarioSpec,
};
use support::{MockPushServer, RecordingMetrics};

const FINISH_TIMEOUT: Duration = Duration::from_secs(30);

async fn run_to_completion(
    server: &MockPushServer,
    registry: Arc<ScenarioRegistry>,
    metrics: Arc<RecordingMetrics>,
    plan: &str,
) {
    let runner = support::runner(server, registry.clone(), metrics);
    let entries = parse_test_plan(&registry, plan).unwrap();
    runner.start(entries).unwrap();
    tokio::time::timeout(FINISH_TIMEOUT, runner.wait_finished())
        .await
        .expect("load run did not finish in time");
    assert!(runner.finished());
}

#[tokio::test]
async fn basic_scenario_round_trips() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());
    let registry = Arc::new(ScenarioRegistry::with_builtins());

    run_to_completion(&server, registry, metrics.clone(), "scenarios:basic, 1, 1, 0").await;

    assert_eq!(metrics.counter("notification.sent"), 1);
    assert_eq!(metrics.counter("notification.received"), 1);
    assert_eq!(metrics.counter("notification.ack"), 1);
    assert_eq!(metrics.timing_count("update.latency"), 1);
}

#[tokio::test]
async fn expect_notification_times_out_with_none() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());

    let mut registry = ScenarioRegistry::with_builtins();
    registry.register(ScenarioSpec::new("scenarios:expect_nothing", |client, _args| async move {
        client.connect().await?;
        client.hello(None).await?;
        let started = Instant::now();
        let notification = client
            .expect_notification("no-such-channel", Duration::from_secs(1))
            .await?;
        if notification.is_some() {
            return Err(ScenarioError::failed("got a notification from nowhere"));
        }
        if started.elapsed() < Duration::from_millis(900) {
            return Err(ScenarioError::failed("timeout fired early"));
        }
        client.disconnect().await?;
        Ok(())
    }));

    run_to_completion(
        &server,
        Arc::new(registry),
        metrics,
        "scenarios:expect_nothing, 1, 1, 0",
    )
    .await;
}

#[tokio::test]
async fn buffered_notification_resumes_synchronously() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());

    let mut registry = ScenarioRegistry::with_builtins();
    registry.register(ScenarioSpec::new("scenarios:buffered", |client, _args| async move {
        client.connect().await?;
        client.hello(None).await?;
        let reg = client
            .register(&pushload_engine::util::random_channel_id())
            .await?;
        client
            .send_notification(&reg.push_endpoint, Some(b"payload!".to_vec()), 60, None)
            .await?
            .map_err(ScenarioError::failed)?;
        // Give the delivery time to land in the driver's buffer.
        client.wait(Duration::from_millis(300)).await?;
        let started = Instant::now();
        let notification = client
            .expect_notification(&reg.channel_id, Duration::from_secs(5))
            .await?
            .ok_or_else(|| ScenarioError::failed("nothing buffered"))?;
        if started.elapsed() > Duration::from_millis(100) {
            return Err(ScenarioError::failed("buffered expect should not wait"));
        }
        client.ack(&notification.channel_id, &notification.version).await?;
        client.unregister(&reg.channel_id).await?;
        client.disconnect().await?;
        Ok(())
    }));

    run_to_completion(
        &server,
        Arc::new(registry),
        metrics,
        "scenarios:buffered, 1, 1, 0",
    )
    .await;
}

#[tokio::test]
async fn expect_notifications_matches_any_of_the_set() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());

    let mut registry = ScenarioRegistry::with_builtins();
    registry.register(ScenarioSpec::new("scenarios:multi", |client, _args| async move {
        client.connect().await?;
        client.hello(None).await?;
        let mut regs = Vec::new();
        for _ in 0..3 {
            regs.push(
                client
                    .register(&pushload_engine::util::random_channel_id())
                    .await?,
            );
        }
        let target = regs[1].clone();
        client
            .send_notification(&target.push_endpoint, Some(b"ping".to_vec()), 60, None)
            .await?
            .map_err(ScenarioError::failed)?;

        let ids: Vec<String> = regs.iter().map(|r| r.channel_id.clone()).collect();
        let notification = client
            .expect_notifications(ids, Duration::from_secs(5))
            .await?
            .ok_or_else(|| ScenarioError::failed("no notification across the set"))?;
        if notification.channel_id != target.channel_id {
            return Err(ScenarioError::failed("matched the wrong channel"));
        }
        client.ack(&notification.channel_id, &notification.version).await?;
        for reg in &regs {
            client.unregister(&reg.channel_id).await?;
        }
        client.disconnect().await?;
        Ok(())
    }));

    run_to_completion(
        &server,
        Arc::new(registry),
        metrics,
        "scenarios:multi, 1, 1, 0",
    )
    .await;
}

#[tokio::test]
async fn retry_budget_restarts_then_terminates() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());

    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let mut registry = ScenarioRegistry::with_builtins();
    registry.register(
        ScenarioSpec::new("scenarios:explode", move |client, _args| {
            let attempts = seen.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                client.connect().await?;
                // A second connect on a live socket is driver-fatal.
                client.connect().await?;
                Ok(())
            }
        })
        .with_retries(2),
    );

    run_to_completion(
        &server,
        Arc::new(registry),
        metrics,
        "scenarios:explode, 1, 1, 0",
    )
    .await;

    // Two restarts, three attempts total.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn delivery_failure_is_survivable() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());

    let mut registry = ScenarioRegistry::with_builtins();
    registry.register(ScenarioSpec::new("scenarios:bad_endpoint", |client, _args| async move {
        client.connect().await?;
        client.hello(None).await?;
        let delivery = client
            .send_notification("/zoot/allures/cgi-bin/xyz", Some(b"x".to_vec()), 60, None)
            .await?;
        if delivery.is_ok() {
            return Err(ScenarioError::failed("expected a delivery failure"));
        }
        // The scenario keeps going after the failed POST.
        client.counter("survived", 1).await?;
        client.disconnect().await?;
        Ok(())
    }));

    run_to_completion(
        &server,
        Arc::new(registry),
        metrics.clone(),
        "scenarios:bad_endpoint, 1, 1, 0",
    )
    .await;
    assert_eq!(metrics.counter("survived"), 1);
}

#[tokio::test]
async fn nested_scenario_runs_to_completion_first() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());

    let sub = ScenarioSpec::new("scenarios:sub_counts", |client, _args| async move {
        client.counter("nested.step", 1).await?;
        client.wait(Duration::from_millis(50)).await?;
        client.counter("nested.step", 1).await?;
        Ok(())
    });

    let mut registry = ScenarioRegistry::with_builtins();
    registry.register(ScenarioSpec::new("scenarios:parent", move |client, _args| {
        let sub = sub.clone();
        async move {
            client.run_scenario(&sub, Default::default()).await?;
            client.counter("parent.resumed", 1).await?;
            Ok(())
        }
    }));

    run_to_completion(
        &server,
        Arc::new(registry),
        metrics.clone(),
        "scenarios:parent, 1, 1, 0",
    )
    .await;

    assert_eq!(metrics.counter("nested.step"), 2);
    assert_eq!(metrics.counter("parent.resumed"), 1);
}

#[tokio::test]
async fn timer_discipline_and_error_injection() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());

    let mut registry = ScenarioRegistry::with_builtins();
    registry.register(ScenarioSpec::new("scenarios:timers", |client, _args| async move {
        client.timer_start("bracket").await?;
        client.wait(Duration::from_millis(20)).await?;
        client.timer_end("bracket").await?;

        // Ending a timer that was never started is thrown into the
        // scenario, which may catch it and continue.
        match client.timer_end("bracket").await {
            Err(ScenarioError::TimerNotStarted(name)) if name == "bracket" => {}
            other => {
                return Err(ScenarioError::failed(format!(
                    "expected TimerNotStarted, got {other:?}"
                )))
            }
        }
        client.counter("caught", 1).await?;
        Ok(())
    }));

    run_to_completion(
        &server,
        Arc::new(registry),
        metrics.clone(),
        "scenarios:timers, 1, 1, 0",
    )
    .await;
    assert_eq!(metrics.counter("caught"), 1);
    assert_eq!(metrics.timing_count("bracket"), 1);
}

#[tokio::test]
async fn disconnect_without_connection_is_fatal() {
    support::init_tracing();
    let server = MockPushServer::start().await;
    let metrics = Arc::new(RecordingMetrics::default());

    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let mut registry = ScenarioRegistry::with_builtins();
    registry.register(ScenarioSpec::new("scenarios:premature", move |client, _args| {
        let attempts = seen.clone();
        async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            client.disconnect().await?;
            Ok(())
        }
    }));

    run_to_completion(
        &server,
        Arc::new(registry),
        metrics,
        "scenarios:premature, 1, 1, 0",
    )
    .await;
    // No retry budget: a single failed attempt.
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
