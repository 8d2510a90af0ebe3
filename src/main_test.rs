use super::*;
use vigil::lifecycle::ProbeState;

#[tokio::test]
async fn test_runtime_probe_passes_on_idle_runtime() {
    assert!(runtime_probe(Context::background()).await.is_ok());
}

#[tokio::test]
async fn test_builtin_probes_register_and_pass() {
    let metrics = create_metrics();
    let health = HealthCoordinator::new();
    register_builtin_probes(&health, &metrics).expect("register builtin probes");

    // Both probes run immediately on registration
    let mut checks = None;
    for _ in 0..50 {
        let report = health.health_status();
        let done = report
            .checks
            .as_ref()
            .map(|c| c.values().all(|s| *s != ProbeState::Unknown))
            .unwrap_or(false);
        if done {
            checks = report.checks;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let checks = checks.expect("builtin probes should complete a run");
    assert_eq!(checks.get("runtime"), Some(&ProbeState::Ok));
    assert_eq!(checks.get("metrics"), Some(&ProbeState::Ok));

    // Registering them twice is rejected
    assert!(register_builtin_probes(&health, &metrics).is_err());
}
