use std::{sync::Arc, time::Duration};

use qos::{
    control::{ControllerOptions, QosController, RecordingExecutor},
    probe::{LatencyProbe, ProbeOptions},
    tc::{RuleCompiler, TcCommand},
    MemoryChannel,
};
use tokio::{sync::watch, time::sleep};

use crate::fakes::{transit_routers, ScriptedPinger};

fn installed_roots(exec: &RecordingExecutor) -> usize {
    exec.trace().iter().filter(|(_, c)| matches!(c, TcCommand::AddHtbRoot { .. })).count()
}

#[tokio::test(start_paused = true)]
async fn latency_spike_shapes_then_recovers() {
    let _ = tracing_subscriber::fmt::try_init();

    let pinger = ScriptedPinger::new([Some(2.0), Some(3.0), Some(7.0), Some(2.0)]);
    let channel = MemoryChannel::new();
    let exec = Arc::new(RecordingExecutor::new());

    let probe = LatencyProbe::new(
        pinger.clone(),
        channel.clone(),
        ProbeOptions::default().with_cooldown(Duration::from_secs(10)),
    );
    let controller = QosController::new(
        channel.clone(),
        exec.clone(),
        transit_routers(),
        &RuleCompiler::default(),
        ControllerOptions { poll_interval: Duration::from_secs(1) },
    )
    .unwrap();
    let managed = controller.managed_interfaces();
    assert_eq!(managed, 9);

    let (tx, rx) = watch::channel(false);
    let probe = tokio::spawn(probe.run(rx.clone()));
    let controller = tokio::spawn(controller.run(rx));

    sleep(Duration::from_millis(1_500)).await;
    assert!(!channel.is_raised());
    assert!(exec.is_pristine());

    // The 7ms sample lands at t=2s, the controller sees it at most one poll later.
    sleep(Duration::from_secs(2)).await;
    assert!(channel.is_raised());
    assert_eq!(installed_roots(&exec), managed);
    assert!(!exec.configuration("r_trans3", "r_trans3-eth1").is_empty());

    // Quiet from t=3s, cleared at t=13s.
    sleep(Duration::from_secs(9)).await;
    assert!(channel.is_raised());
    assert!(!exec.is_pristine());

    sleep(Duration::from_secs(2)).await;
    assert!(!channel.is_raised());
    assert!(exec.is_pristine());

    // A single apply for the whole episode.
    assert_eq!(installed_roots(&exec), managed);

    // Raise again and interrupt: both sides clean up.
    pinger.push([Some(12.0)]);
    sleep(Duration::from_secs(3)).await;
    assert!(channel.is_raised());
    assert!(!exec.is_pristine());

    tx.send(true).unwrap();
    probe.await.unwrap();
    controller.await.unwrap();

    assert!(!channel.is_raised());
    assert!(exec.is_pristine());
}

#[tokio::test(start_paused = true)]
async fn timeouts_alone_never_shape() {
    let pinger = ScriptedPinger::new([None]);
    let channel = MemoryChannel::new();
    let exec = Arc::new(RecordingExecutor::new());

    let probe = LatencyProbe::new(pinger, channel.clone(), ProbeOptions::default());
    let controller = QosController::new(
        channel.clone(),
        exec.clone(),
        transit_routers(),
        &RuleCompiler::default(),
        ControllerOptions::default(),
    )
    .unwrap();

    let (tx, rx) = watch::channel(false);
    let probe = tokio::spawn(probe.run(rx.clone()));
    let controller = tokio::spawn(controller.run(rx));

    sleep(Duration::from_secs(30)).await;
    drop(tx);
    probe.await.unwrap();
    controller.await.unwrap();

    assert!(!channel.is_raised());
    assert!(exec.trace().is_empty());
}
