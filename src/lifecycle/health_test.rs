//! Tests for the health-check engine

use super::clock::ManualClock;
use super::*;
use crate::server::metrics::MetricsRegistry;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn counting_probe(
    calls: Arc<AtomicUsize>,
    passing: bool,
) -> impl Fn(Context) -> futures::future::Ready<anyhow::Result<()>> + Send + Sync + 'static {
    move |_ctx| {
        calls.fetch_add(1, Ordering::SeqCst);
        if passing {
            futures::future::ready(Ok(()))
        } else {
            futures::future::ready(Err(anyhow::anyhow!("connection refused")))
        }
    }
}

/// Let spawned probe loops run their immediate first execution
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_empty_coordinator_reports_no_checks() {
    let health = HealthCoordinator::new();
    let report = health.health_status();
    assert_eq!(report.checks, None);
    assert!(!report.any_failing);
}

#[tokio::test(start_paused = true)]
async fn test_state_matches_check_result_after_first_run() {
    let health = HealthCoordinator::new();
    health
        .register_probe("db", Duration::from_secs(5), |_ctx| async { Ok(()) })
        .expect("register db");
    health
        .register_probe("bus", Duration::from_secs(5), |_ctx| async {
            Err(anyhow::anyhow!("broker unreachable"))
        })
        .expect("register bus");

    settle().await;

    let report = health.health_status();
    let checks = report.checks.expect("checks present");
    assert_eq!(checks.get("db"), Some(&ProbeState::Ok));
    assert_eq!(checks.get("bus"), Some(&ProbeState::Fail));
    assert!(report.any_failing);
}

#[tokio::test(start_paused = true)]
async fn test_all_passing_is_not_failing() {
    let health = HealthCoordinator::new();
    for name in ["a", "b", "c"] {
        health
            .register_probe(name, Duration::from_secs(1), |_ctx| async { Ok(()) })
            .expect("register");
    }
    settle().await;

    let report = health.health_status();
    assert!(!report.any_failing);
    assert_eq!(report.checks.map(|c| c.len()), Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_state_is_unknown_before_first_run() {
    let health = HealthCoordinator::new();
    health
        .register_probe("slow", Duration::from_secs(5), |_ctx| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(())
        })
        .expect("register");

    settle().await;
    let checks = health.health_status().checks.expect("checks present");
    assert_eq!(checks.get("slow"), Some(&ProbeState::Unknown));

    tokio::time::sleep(Duration::from_secs(3)).await;
    let checks = health.health_status().checks.expect("checks present");
    assert_eq!(checks.get("slow"), Some(&ProbeState::Ok));
}

#[tokio::test(start_paused = true)]
async fn test_validation_errors() {
    let health = HealthCoordinator::new();

    let err = health
        .register_probe("   ", Duration::from_secs(1), |_ctx| async { Ok(()) })
        .unwrap_err();
    assert!(matches!(err, HealthError::EmptyName));

    let err = health
        .register_probe("zero", Duration::ZERO, |_ctx| async { Ok(()) })
        .unwrap_err();
    assert!(matches!(err, HealthError::InvalidInterval(name) if name == "zero"));

    let err = health
        .register("nocheck", Duration::from_secs(1), None)
        .unwrap_err();
    assert!(matches!(err, HealthError::MissingCheck(name) if name == "nocheck"));

    assert_eq!(health.health_status().checks, None);
}

#[test]
fn test_register_outside_runtime_is_an_error() {
    let health = HealthCoordinator::new();
    let err = health
        .register_probe("db", Duration::from_secs(1), |_ctx| async { Ok(()) })
        .unwrap_err();
    assert!(matches!(err, HealthError::NoRuntime(ref name) if name == "db"));

    // Nothing is left half-registered
    assert_eq!(health.health_status().checks, None);
}

#[tokio::test(start_paused = true)]
async fn test_name_is_trimmed() {
    let health = HealthCoordinator::new();
    health
        .register_probe("  disk  ", Duration::from_secs(1), |_ctx| async { Ok(()) })
        .expect("register");
    settle().await;

    let checks = health.health_status().checks.expect("checks present");
    assert!(checks.contains_key("disk"));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_name_rejected_and_original_keeps_running() {
    let health = HealthCoordinator::new();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    health
        .register_probe("dup", Duration::from_secs(1), counting_probe(first.clone(), true))
        .expect("first registration");
    let err = health
        .register_probe("dup", Duration::from_secs(1), counting_probe(second.clone(), false))
        .unwrap_err();
    assert!(matches!(err, HealthError::AlreadyExists(ref name) if name == "dup"));
    assert!(err.to_string().contains("already exists"));

    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(first.load(Ordering::SeqCst), 3, "runs at t=0s, 1s, 2s");
    assert_eq!(second.load(Ordering::SeqCst), 0);
    let checks = health.health_status().checks.expect("checks present");
    assert_eq!(checks.get("dup"), Some(&ProbeState::Ok));
}

#[tokio::test(start_paused = true)]
async fn test_sub_floor_interval_runs_no_faster_than_floor() {
    let health = HealthCoordinator::new();
    let calls = Arc::new(AtomicUsize::new(0));
    health
        .register_probe(
            "fast",
            Duration::from_millis(200),
            counting_probe(calls.clone(), true),
        )
        .expect("register");

    tokio::time::sleep(Duration::from_millis(3500)).await;

    let runs = calls.load(Ordering::SeqCst);
    assert!(runs <= 4, "expected at most 4 runs in 3.5s, got {}", runs);
    assert!(runs >= 3, "expected the probe to keep running, got {}", runs);

    let snapshot = &health.probes()[0];
    assert_eq!(snapshot.interval, MIN_PROBE_INTERVAL);
    assert_eq!(snapshot.requested_interval, Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_probe_is_isolated() {
    let health = HealthCoordinator::new();
    health
        .register_probe("boom", Duration::from_secs(1), |_ctx| async {
            if true {
                panic!("probe bug");
            }
            Ok(())
        })
        .expect("register boom");
    health
        .register_probe("fine", Duration::from_secs(1), |_ctx| async { Ok(()) })
        .expect("register fine");

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let checks = health.health_status().checks.expect("checks present");
    assert_eq!(checks.get("boom"), Some(&ProbeState::Fail));
    assert_eq!(checks.get("fine"), Some(&ProbeState::Ok));

    // The panicking probe keeps being scheduled
    let boom = health
        .probes()
        .into_iter()
        .find(|p| p.name == "boom")
        .expect("boom snapshot");
    assert_eq!(boom.consecutive_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_resets_failures() {
    let health = HealthCoordinator::new();
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    health
        .register_probe("flappy", Duration::from_secs(1), move |_ctx| {
            let ok = flag.load(Ordering::SeqCst);
            async move {
                if ok {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("not yet"))
                }
            }
        })
        .expect("register");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(health.health_status().any_failing);

    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let report = health.health_status();
    assert!(!report.any_failing);
    assert_eq!(health.probes()[0].consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_gives_one_final_run_that_observes_cancellation() {
    let health = HealthCoordinator::new();
    let observed = Arc::new(AtomicUsize::new(0));
    let seen = observed.clone();
    health
        .register_probe("watcher", Duration::from_secs(1), move |ctx: Context| {
            if ctx.is_done() {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            async { Ok(()) }
        })
        .expect("register");
    settle().await;
    assert_eq!(observed.load(Ordering::SeqCst), 0);

    let deadline = Context::background().with_timeout(Duration::from_secs(1));
    health.stop(&deadline).await.expect("stop in time");

    assert_eq!(observed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_times_out_on_probe_ignoring_cancellation() {
    let health = HealthCoordinator::new();
    health
        .register_probe("stuck", Duration::from_secs(1), |_ctx| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .expect("register");
    settle().await;

    let started = tokio::time::Instant::now();
    let deadline = Context::background().with_timeout(Duration::from_millis(100));
    let err = health.stop(&deadline).await.unwrap_err();

    assert!(matches!(err, HealthError::StopTimeout));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_register_after_stop_is_rejected() {
    let health = HealthCoordinator::new();
    health
        .stop(&Context::background().with_timeout(Duration::from_secs(1)))
        .await
        .expect("stop with no probes");

    let err = health
        .register_probe("late", Duration::from_secs(1), |_ctx| async { Ok(()) })
        .unwrap_err();
    assert!(matches!(err, HealthError::Stopped));
}

#[tokio::test(start_paused = true)]
async fn test_probe_metrics_are_recorded() {
    let metrics = MetricsRegistry::new();
    let probe_metrics = ProbeMetrics::register(&metrics).expect("register metrics");
    let health = HealthCoordinator::with_clock(Arc::new(SystemClock), Some(probe_metrics));
    health
        .register_probe("bus", Duration::from_secs(1), |_ctx| async {
            Err(anyhow::anyhow!("down"))
        })
        .expect("register");
    settle().await;

    let body = metrics.encode().expect("encode");
    assert!(body.contains(r#"probe_runs_total{probe="bus",result="fail"} 1"#));
    assert!(body.contains(r#"probe_failing{probe="bus"} 1"#));
}

#[tokio::test(start_paused = true)]
async fn test_last_run_uses_injected_clock() {
    let fixed = chrono::DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
    let health = HealthCoordinator::with_clock(Arc::new(ManualClock::at(fixed)), None);
    health
        .register_probe("db", Duration::from_secs(1), |_ctx| async { Ok(()) })
        .expect("register");
    settle().await;

    let snapshot = &health.probes()[0];
    assert_eq!(snapshot.last_run_at, Some(fixed));
    assert_eq!(snapshot.state, ProbeState::Ok);
}
