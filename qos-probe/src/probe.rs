use std::time::Duration;

use qos_alert::AlertChannel;
use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior},
};
use tracing::Instrument;

use crate::{
    hysteresis::{AlertState, Hysteresis, MarkerAction},
    LatencyMeasurement, Pinger, SampleLog,
};

/// Timing and threshold of a [`LatencyProbe`].
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Time between two samples.
    pub interval: Duration,
    /// Latencies strictly above this raise the alert.
    pub threshold_ms: f64,
    /// How long latency must stay at or below the threshold before the alert is cleared.
    pub cooldown: Duration,
}

impl ProbeOptions {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_threshold_ms(mut self, threshold_ms: f64) -> Self {
        self.threshold_ms = threshold_ms;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            threshold_ms: 5.0,
            cooldown: Duration::from_secs(70),
        }
    }
}

/// Samples latency at a fixed cadence and drives the alert marker through [`Hysteresis`].
pub struct LatencyProbe<P, A> {
    pinger: P,
    channel: A,
    machine: Hysteresis,
    interval: Duration,
    sample_log: Option<SampleLog>,
}

impl<P, A> LatencyProbe<P, A>
where
    P: Pinger,
    A: AlertChannel,
{
    pub fn new(pinger: P, channel: A, options: ProbeOptions) -> Self {
        Self {
            pinger,
            channel,
            machine: Hysteresis::new(options.threshold_ms, options.cooldown),
            interval: options.interval,
            sample_log: None,
        }
    }

    pub fn with_sample_log(mut self, log: SampleLog) -> Self {
        self.sample_log = Some(log);
        self
    }

    pub fn state(&self) -> AlertState {
        self.machine.state()
    }

    pub fn channel(&self) -> &A {
        &self.channel
    }

    /// Removes an alert left raised by a previous run, so a fresh probe starts from NORMAL with
    /// no marker. Channel failures are logged and never abort start-up.
    pub async fn clear_stale_alert(&self) {
        match self.channel.is_alert_active().await {
            Ok(false) => {}
            Ok(true) => {
                tracing::info!("removing stale alert marker");
                if let Err(e) = self.channel.clear_alert().await {
                    tracing::warn!(err = %e, "failed to remove stale alert marker");
                }
            }
            Err(e) => tracing::warn!(err = %e, "failed to check for a stale alert marker"),
        }
    }

    /// Takes one sample. Any ping failure yields an invalid measurement.
    pub async fn sample(&self) -> LatencyMeasurement {
        let started = Instant::now();
        match self.pinger.ping().await {
            Ok(rtt) => LatencyMeasurement::ok(started, rtt),
            Err(e) => {
                tracing::warn!(err = %e, "ping failed");
                LatencyMeasurement::failed(started)
            }
        }
    }

    /// Feeds a sample through the state machine and performs the resulting marker action.
    ///
    /// Alert channel failures are logged and otherwise ignored: the state machine has already
    /// moved, and the next matching transition is the next chance to write the marker.
    pub async fn observe(&mut self, sample: LatencyMeasurement) {
        match sample.latency_ms() {
            Some(ms) => tracing::info!(latency_ms = format_args!("{ms:.2}"), "latency sample"),
            None => tracing::warn!("latency sample timed out"),
        }

        if let Some(log) = self.sample_log.as_mut() {
            if let Err(e) = log.record(&sample).await {
                tracing::warn!(err = %e, path = ?log.path(), "failed to append sample");
            }
        }

        match self.machine.observe(&sample) {
            Some(MarkerAction::Assert) => {
                let detail = format!("{:.2}", sample.value_ms);
                tracing::warn!(
                    latency_ms = %detail,
                    threshold_ms = self.machine.threshold_ms(),
                    "latency above threshold, raising alert"
                );
                if let Err(e) = self.channel.assert_alert(&detail).await {
                    tracing::warn!(err = %e, "failed to raise alert");
                }
            }
            Some(MarkerAction::Clear) => {
                tracing::info!(cooldown = ?self.machine.cooldown(), "latency recovered, clearing alert");
                if let Err(e) = self.channel.clear_alert().await {
                    tracing::warn!(err = %e, "failed to clear alert");
                }
            }
            None => {}
        }
    }

    /// One cycle: sample, then observe.
    pub async fn tick(&mut self) -> LatencyMeasurement {
        let sample = self.sample().await;
        self.observe(sample).await;
        sample
    }

    /// Runs the probe until `shutdown` flips to `true` or its sender is dropped, then clears the
    /// alert marker.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let span = tracing::info_span!("probe", destination = %self.pinger.destination());

        async move {
            tracing::info!(
                interval = ?self.interval,
                threshold_ms = self.machine.threshold_ms(),
                cooldown = ?self.machine.cooldown(),
                "starting latency probe"
            );

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }

            tracing::info!("stopping latency probe");
            if let Err(e) = self.channel.clear_alert().await {
                tracing::warn!(err = %e, "failed to clear alert on shutdown");
            }
        }
        .instrument(span)
        .await
    }
}
