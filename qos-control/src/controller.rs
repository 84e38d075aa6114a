use std::{sync::Arc, time::Duration};

use qos_alert::AlertChannel;
use qos_probe::Pinger;
use qos_tc::{RuleCompiler, TcCommand};
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::Instrument;

use crate::{
    executor::{ExecError, NodeExecutor},
    node::{NetworkNode, NodeId, NodeRegistry},
    Error, Result,
};

/// Tuning of a [`QosController`].
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Time between two reads of the alert channel.
    pub poll_interval: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(5) }
    }
}

/// Which sweep produced a [`SweepReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    /// Installed the shaping plan on every managed interface.
    Apply,
    /// Restored the kernel default on every interface.
    Remove,
}

/// An interface a sweep had to leave as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedInterface {
    pub node: String,
    pub dev: String,
    /// The error that made the sweep move on.
    pub reason: String,
}

/// What one apply or remove sweep did across the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub sweep: Sweep,
    /// Interfaces the sweep completed on.
    pub completed: usize,
    /// Interfaces that failed, in sweep order. A skip never stops the sweep.
    pub skipped: Vec<SkippedInterface>,
    /// Outcome of the post-apply reachability check, if one ran.
    pub verified: Option<bool>,
}

impl SweepReport {
    fn new(sweep: Sweep) -> Self {
        Self { sweep, completed: 0, skipped: Vec::new(), verified: None }
    }

    fn skip(&mut self, node: &NetworkNode, dev: &str, reason: impl ToString) {
        self.skipped.push(SkippedInterface {
            node: node.name.clone(),
            dev: dev.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// A compiled plan for one managed interface.
#[derive(Debug, Clone)]
struct InterfacePlan {
    node: NodeId,
    dev: String,
    commands: Vec<TcCommand>,
}

/// Watches the alert channel and applies or removes shaping across all managed nodes on every
/// transition.
///
/// Plans are compiled once, when the controller is built, so a bad node definition is reported
/// before the loop starts rather than on the first alert.
pub struct QosController<A, E> {
    channel: A,
    executor: E,
    registry: NodeRegistry,
    plans: Vec<InterfacePlan>,
    verifier: Option<Arc<dyn Pinger>>,
    poll_interval: Duration,
    /// Whether shaping is believed to be installed.
    active: bool,
}

impl<A, E> QosController<A, E>
where
    A: AlertChannel,
    E: NodeExecutor,
{
    pub fn new(
        channel: A,
        executor: E,
        registry: NodeRegistry,
        compiler: &RuleCompiler,
        options: ControllerOptions,
    ) -> Result<Self> {
        let mut plans = Vec::new();
        for (id, node) in registry.iter() {
            for (interface, direction) in node.managed() {
                let commands = compiler
                    .compile(&interface.name, interface.capacity, direction)
                    .map_err(|source| Error::Interface {
                        node: node.name.clone(),
                        dev: interface.name.clone(),
                        source,
                    })?;
                plans.push(InterfacePlan { node: id, dev: interface.name.clone(), commands });
            }
        }

        Ok(Self {
            channel,
            executor,
            registry,
            plans,
            verifier: None,
            poll_interval: options.poll_interval,
            active: false,
        })
    }

    /// Runs a reachability check through `pinger` after every apply sweep.
    pub fn with_verifier(mut self, pinger: Arc<dyn Pinger>) -> Self {
        self.verifier = Some(pinger);
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// The number of interfaces that receive a plan.
    pub fn managed_interfaces(&self) -> usize {
        self.plans.len()
    }

    /// Reads the alert channel once and runs a sweep if the signal changed since the last tick.
    ///
    /// A failed read counts as "no alert": shaping is removed rather than left in place on a
    /// signal that can't be confirmed.
    pub async fn tick(&mut self) -> Option<SweepReport> {
        let alert = match self.channel.is_alert_active().await {
            Ok(alert) => alert,
            Err(e) => {
                tracing::warn!(err = %e, "failed to read alert channel, treating as inactive");
                false
            }
        };

        match (self.active, alert) {
            (false, true) => {
                tracing::info!("alert raised, applying shaping");
                self.active = true;
                Some(self.apply().await)
            }
            (true, false) => {
                tracing::info!("alert cleared, removing shaping");
                self.active = false;
                Some(self.remove().await)
            }
            _ => None,
        }
    }

    /// Installs the compiled plan on every managed interface, then checks reachability.
    ///
    /// Each interface is cleared first, so applying twice yields the same configuration as
    /// applying once. A failing interface is logged and skipped.
    pub async fn apply(&self) -> SweepReport {
        let span = tracing::debug_span!("apply", interfaces = self.plans.len());

        async move {
            let mut report = SweepReport::new(Sweep::Apply);

            for plan in &self.plans {
                let Some(node) = self.registry.get(plan.node) else { continue };

                match self.apply_interface(node, plan).await {
                    Ok(()) => report.completed += 1,
                    Err(e) => {
                        tracing::warn!(node = %node.name, dev = %plan.dev, err = %e, "failed to shape interface, skipping");
                        report.skip(node, &plan.dev, e);
                    }
                }
            }

            if let Some(pinger) = &self.verifier {
                let destination = pinger.destination();
                let ok = match pinger.ping().await {
                    Ok(rtt) => {
                        tracing::info!(%destination, ?rtt, "destination reachable after apply");
                        true
                    }
                    Err(e) => {
                        tracing::warn!(%destination, err = %e, "destination unreachable after apply");
                        false
                    }
                };
                report.verified = Some(ok);
            }

            tracing::info!(
                completed = report.completed,
                skipped = report.skipped.len(),
                "shaping applied"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn apply_interface(
        &self,
        node: &NetworkNode,
        plan: &InterfacePlan,
    ) -> std::result::Result<(), ExecError> {
        let span = tracing::debug_span!("interface", node = %node.name, dev = %plan.dev);

        async move {
            for command in &plan.commands {
                match self.executor.execute(node, command).await {
                    Ok(()) => {}
                    Err(ExecError::NothingToClear(_)) if command.is_clear() => {}
                    Err(e) => return Err(e),
                }
            }
            tracing::debug!(commands = plan.commands.len(), "interface shaped");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Clears shaping on every interface of every node, managed or not.
    pub async fn remove(&self) -> SweepReport {
        let span = tracing::debug_span!("remove", nodes = self.registry.len());

        async move {
            let mut report = SweepReport::new(Sweep::Remove);

            for (_, node) in self.registry.iter() {
                for interface in &node.interfaces {
                    let clear = TcCommand::clear(&interface.name);
                    match self.executor.execute(node, &clear).await {
                        Ok(()) | Err(ExecError::NothingToClear(_)) => report.completed += 1,
                        Err(e) => {
                            tracing::warn!(node = %node.name, dev = %interface.name, err = %e, "failed to clear interface, skipping");
                            report.skip(node, &interface.name, e);
                        }
                    }
                }
            }

            tracing::info!(
                completed = report.completed,
                skipped = report.skipped.len(),
                "shaping removed"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// Polls the alert channel until `shutdown` flips to `true` or its sender is dropped. Shaping
    /// still installed at that point is removed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let span = tracing::info_span!("controller");

        async move {
            tracing::info!(
                poll_interval = ?self.poll_interval,
                nodes = self.registry.len(),
                interfaces = self.plans.len(),
                "starting qos controller"
            );

            let mut ticker = tokio::time::interval(self.poll_interval);
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

            tracing::info!("stopping qos controller");
            if self.active {
                self.remove().await;
                self.active = false;
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use qos_alert::MemoryChannel;
    use qos_common::Rate;
    use qos_tc::Direction;

    use super::*;
    use crate::{node::Interface, recording::RecordingExecutor};

    fn registry() -> NodeRegistry {
        NodeRegistry::new(vec![
            NetworkNode::new("r1")
                .with_interface(Interface::backward("r1-eth0"))
                .with_interface(Interface::forward("r1-eth1")),
            NetworkNode::new("r3")
                .with_interface(Interface::backward("r3-eth0"))
                .with_interface(Interface::backward("r3-eth1").with_capacity(Rate::mbit(50)))
                .with_interface(Interface::forward("r3-eth2"))
                .with_interface(Interface::unmanaged("r3-eth3")),
        ])
        .unwrap()
    }

    fn controller(channel: MemoryChannel) -> QosController<MemoryChannel, Arc<RecordingExecutor>> {
        QosController::new(
            channel,
            Arc::new(RecordingExecutor::new()),
            registry(),
            &RuleCompiler::default(),
            ControllerOptions::default(),
        )
        .unwrap()
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl Pinger for Unreachable {
        fn destination(&self) -> IpAddr {
            IpAddr::from([172, 19, 40, 100])
        }

        async fn ping(&self) -> qos_probe::Result<Duration> {
            Err(qos_probe::Error::NoReply)
        }
    }

    #[tokio::test]
    async fn sweeps_only_on_transitions() {
        let _ = tracing_subscriber::fmt::try_init();

        let channel = MemoryChannel::new();
        let mut controller = controller(channel.clone());

        assert!(controller.tick().await.is_none());

        channel.assert_alert("7.00").await.unwrap();
        let report = controller.tick().await.unwrap();
        assert_eq!(report.sweep, Sweep::Apply);
        assert_eq!(report.completed, 5);
        assert!(controller.is_active());

        let traced = controller.executor().trace().len();
        assert!(controller.tick().await.is_none());
        assert_eq!(controller.executor().trace().len(), traced);

        channel.clear_alert().await.unwrap();
        let report = controller.tick().await.unwrap();
        assert_eq!(report.sweep, Sweep::Remove);
        assert_eq!(report.completed, 6);
        assert!(!controller.is_active());
        assert!(controller.executor().is_pristine());
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let controller = controller(MemoryChannel::new());
        let exec = controller.executor().clone();

        controller.apply().await;
        let first = exec.configuration("r3", "r3-eth2");
        assert!(!first.is_empty());
        exec.take_trace();

        let report = controller.apply().await;
        assert!(report.skipped.is_empty());

        let trace = exec.take_trace();
        assert_eq!(trace[0], ("r1".to_string(), TcCommand::clear("r1-eth0")));
        assert_eq!(exec.configuration("r3", "r3-eth2"), first);
    }

    #[tokio::test]
    async fn plans_follow_interface_role() {
        let controller = controller(MemoryChannel::new());
        controller.apply().await;

        let expected =
            RuleCompiler::default().compile("r3-eth1", Rate::mbit(50), Direction::Backward).unwrap();
        assert_eq!(controller.executor().configuration("r3", "r3-eth1"), expected[1..]);
        assert!(controller.executor().configuration("r3", "r3-eth3").is_empty());
    }

    #[tokio::test]
    async fn apply_then_remove_restores_default() {
        let controller = controller(MemoryChannel::new());
        let exec = controller.executor().clone();

        controller.apply().await;
        let report = controller.remove().await;
        assert!(report.skipped.is_empty());
        assert!(exec.is_pristine());

        // Removing again is a no-op.
        let report = controller.remove().await;
        assert!(report.skipped.is_empty());
        assert!(exec.is_pristine());

        let unmanaged = exec
            .trace()
            .into_iter()
            .filter(|(_, command)| command.dev() == "r3-eth3")
            .count();
        assert_eq!(unmanaged, 2);
    }

    #[tokio::test]
    async fn failing_interfaces_are_skipped() {
        let exec = Arc::new(
            RecordingExecutor::new()
                .with_missing_device("r1", "r1-eth1")
                .with_failing_installs("r3", "r3-eth0"),
        );

        let controller = QosController::new(
            MemoryChannel::new(),
            exec.clone(),
            registry(),
            &RuleCompiler::default(),
            ControllerOptions::default(),
        )
        .unwrap()
        .with_verifier(Arc::new(Unreachable));

        let report = controller.apply().await;
        assert_eq!(report.completed, 3);
        let skipped: Vec<&str> = report.skipped.iter().map(|s| s.dev.as_str()).collect();
        assert_eq!(skipped, ["r1-eth1", "r3-eth0"]);
        assert_eq!(report.verified, Some(false));

        // Later interfaces were still shaped.
        assert!(!exec.configuration("r3", "r3-eth2").is_empty());

        let report = controller.remove().await;
        assert_eq!(report.skipped.len(), 1);
        assert!(exec.is_pristine());
    }

    #[tokio::test]
    async fn unreadable_channel_removes_shaping() {
        let channel = MemoryChannel::new();
        let mut controller = controller(channel.clone());

        channel.assert_alert("9.10").await.unwrap();
        controller.tick().await;
        assert!(controller.is_active());

        channel.set_available(false);
        let report = controller.tick().await.unwrap();
        assert_eq!(report.sweep, Sweep::Remove);
        assert!(!controller.is_active());
    }

    #[test]
    fn rejects_unshapeable_links() {
        let registry = NodeRegistry::new(vec![NetworkNode::new("r1")
            .with_interface(Interface::forward("eth0").with_capacity(Rate::mbit(10)))])
        .unwrap();

        let res = QosController::new(
            MemoryChannel::new(),
            RecordingExecutor::new(),
            registry,
            &RuleCompiler::default(),
            ControllerOptions::default(),
        );
        assert!(matches!(res, Err(Error::Interface { dev, .. }) if dev == "eth0"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_removes_active_shaping() {
        let channel = MemoryChannel::new();
        let controller = controller(channel.clone());
        let exec = controller.executor().clone();

        channel.assert_alert("7.00").await.unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(controller.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!exec.is_pristine());

        tx.send(true).unwrap();
        task.await.unwrap();
        assert!(exec.is_pristine());
    }
}
