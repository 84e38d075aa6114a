use std::{sync::Arc, time::Duration};

use qos::{
    control::{ControllerOptions, QosController, RecordingExecutor},
    probe::{LatencyProbe, ProbeOptions},
    tc::RuleCompiler,
    MarkerFile,
};
use tokio::{sync::watch, time::Instant};

use crate::fakes::{transit_routers, ScriptedPinger};

/// Polls `condition` until it holds or `timeout` passes.
async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Probe and controller only share the marker path, as two separate processes would.
#[tokio::test]
async fn marker_file_couples_probe_and_controller() {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("latency.alert");

    let pinger = ScriptedPinger::new([Some(9.0), Some(1.0)]);
    let exec = Arc::new(RecordingExecutor::new());

    let probe = LatencyProbe::new(
        pinger,
        MarkerFile::new(&path),
        ProbeOptions::default()
            .with_interval(Duration::from_millis(20))
            .with_cooldown(Duration::from_millis(300)),
    );
    let controller = QosController::new(
        MarkerFile::new(&path),
        exec.clone(),
        transit_routers(),
        &RuleCompiler::default(),
        ControllerOptions { poll_interval: Duration::from_millis(20) },
    )
    .unwrap();

    let (tx, rx) = watch::channel(false);
    let probe = tokio::spawn(probe.run(rx.clone()));
    let controller = tokio::spawn(controller.run(rx));

    assert!(eventually(Duration::from_secs(5), || !exec.is_pristine()).await);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "9.00");

    assert!(eventually(Duration::from_secs(5), || exec.is_pristine() && !path.exists()).await);

    tx.send(true).unwrap();
    probe.await.unwrap();
    controller.await.unwrap();
    assert!(!path.exists());
}
