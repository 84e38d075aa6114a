//! The `qosd` configuration file.
//!
//! ```toml
//! [probe]
//! destination = "172.19.40.100"
//! namespace = "h_uRLLC1"
//!
//! [controller]
//! verify_destination = "172.18.1.1"
//!
//! [[nodes]]
//! name = "r_trans1"
//! namespace = "r_trans1"
//! interfaces = [
//!     { name = "r_trans1-eth0", role = "backward" },
//!     { name = "r_trans1-eth1", role = "forward", capacity_mbit = 100 },
//! ]
//! ```
//!
//! Everything except `probe.destination` and the node list has a default.

use std::{
    net::IpAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use qos_common::Rate;
use qos_control::{ControllerOptions, Interface, InterfaceRole, NetworkNode, NodeRegistry};
use qos_probe::{PingCommand, Pinger, ProbeOptions};
use qos_tc::{ClassShape, RuleCompiler, ShapingPolicy, MAX_LINK_SHARE_PERCENT};
use serde::Deserialize;

/// Errors loading a [`Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range, or the sections contradict each other.
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid class policy: {0}")]
    Policy(#[from] qos_tc::Error),
    #[error("invalid node list: {0}")]
    Nodes(#[from] qos_control::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// The daemon configuration, one TOML file. Only `[probe]` is mandatory.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub probe: ProbeConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub classes: ClassesConfig,
    /// The transit routers the controller shapes, as `[[nodes]]` tables.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// The `[probe]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// The monitored destination.
    pub destination: IpAddr,
    #[serde(default = "default_probe_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    /// Latencies strictly above this raise the alert.
    #[serde(default = "default_threshold_ms")]
    pub threshold_ms: f64,
    /// Quiet period before the alert clears.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Network namespace to ping from.
    pub namespace: Option<String>,
    /// File every sample is appended to.
    pub sample_log: Option<PathBuf>,
}

/// The `[alert]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertConfig {
    /// The marker file shared by the probe and the controller.
    #[serde(default = "default_marker_path")]
    pub marker_path: PathBuf,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { marker_path: default_marker_path() }
    }
}

/// The `[controller]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Destination of the post-apply reachability check. Defaults to the probe destination.
    pub verify_destination: Option<IpAddr>,
    /// Namespace to run the reachability check from. Defaults to the probe namespace.
    pub verify_namespace: Option<String>,
    /// Deadline for a single `tc` invocation.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            verify_destination: None,
            verify_namespace: None,
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

/// The `[classes]` section. Every key defaults to the built-in three-class policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClassesConfig {
    pub critical_port: u16,
    pub bulk_port: u16,
    /// Share of the link capacity guaranteed to the parent class.
    pub link_share_percent: u8,
    pub sfq_perturb_secs: u32,
    pub critical: ShapeConfig,
    pub bulk: ShapeConfig,
    pub background: ShapeConfig,
}

impl Default for ClassesConfig {
    fn default() -> Self {
        ShapingPolicy::default().into()
    }
}

impl From<ShapingPolicy> for ClassesConfig {
    fn from(policy: ShapingPolicy) -> Self {
        Self {
            critical_port: policy.critical_port,
            bulk_port: policy.bulk_port,
            link_share_percent: policy.link_share_percent,
            sfq_perturb_secs: policy.sfq_perturb_secs,
            critical: policy.critical.into(),
            bulk: policy.bulk.into(),
            background: policy.background.into(),
        }
    }
}

/// Guarantee and ceiling in Mbit/s. Priority 1 is served first.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShapeConfig {
    pub guarantee_mbit: f64,
    pub ceiling_mbit: f64,
    pub priority: u8,
}

impl From<ClassShape> for ShapeConfig {
    fn from(shape: ClassShape) -> Self {
        Self {
            guarantee_mbit: shape.guarantee.as_mbit_f64(),
            ceiling_mbit: shape.ceiling.as_mbit_f64(),
            priority: shape.priority,
        }
    }
}

impl From<ShapeConfig> for ClassShape {
    fn from(shape: ShapeConfig) -> Self {
        ClassShape::new(
            Rate::from_mbit_f64(shape.guarantee_mbit),
            Rate::from_mbit_f64(shape.ceiling_mbit),
            shape.priority,
        )
    }
}

/// One `[[nodes]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub name: String,
    /// Network namespace to run the node's `tc` commands in.
    pub namespace: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
}

/// One `[[nodes.interfaces]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceConfig {
    pub name: String,
    pub role: InterfaceRole,
    /// Nominal link capacity. 100 Mbit/s when absent.
    pub capacity_mbit: Option<f64>,
}

fn default_probe_interval_ms() -> u64 {
    1_000
}

fn default_probe_timeout_ms() -> u64 {
    1_000
}

fn default_threshold_ms() -> f64 {
    5.0
}

fn default_cooldown_secs() -> u64 {
    70
}

fn default_marker_path() -> PathBuf {
    PathBuf::from("latency.alert")
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_command_timeout_ms() -> u64 {
    5_000
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    /// Parses and validates a configuration.
    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Reads, parses and validates the configuration file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        std::fs::read_to_string(path)?.parse()
    }

    /// Checks everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.probe.interval_ms == 0 {
            return invalid("probe.interval_ms must be greater than 0");
        }
        if self.probe.timeout_ms == 0 {
            return invalid("probe.timeout_ms must be greater than 0");
        }
        if !self.probe.threshold_ms.is_finite() || self.probe.threshold_ms <= 0.0 {
            return invalid("probe.threshold_ms must be a positive number");
        }
        if self.controller.poll_interval_ms == 0 {
            return invalid("controller.poll_interval_ms must be greater than 0");
        }
        if self.controller.command_timeout_ms == 0 {
            return invalid("controller.command_timeout_ms must be greater than 0");
        }
        if self.classes.link_share_percent == 0
            || self.classes.link_share_percent > MAX_LINK_SHARE_PERCENT
        {
            return Err(ConfigError::Invalid(format!(
                "classes.link_share_percent must be within 1..={MAX_LINK_SHARE_PERCENT}"
            )));
        }

        self.compiler()?;
        self.registry()?;
        Ok(())
    }

    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions::default()
            .with_interval(Duration::from_millis(self.probe.interval_ms))
            .with_threshold_ms(self.probe.threshold_ms)
            .with_cooldown(Duration::from_secs(self.probe.cooldown_secs))
    }

    /// The pinger the probe samples with.
    pub fn pinger(&self) -> PingCommand {
        let ping =
            PingCommand::new(self.probe.destination, Duration::from_millis(self.probe.timeout_ms));
        match &self.probe.namespace {
            Some(namespace) => ping.in_namespace(namespace),
            None => ping,
        }
    }

    /// The pinger for the controller's post-apply reachability check.
    pub fn verifier(&self) -> Arc<dyn Pinger> {
        let destination = self.controller.verify_destination.unwrap_or(self.probe.destination);
        let namespace =
            self.controller.verify_namespace.as_ref().or(self.probe.namespace.as_ref());

        let ping = PingCommand::new(destination, Duration::from_millis(self.probe.timeout_ms));
        Arc::new(match namespace {
            Some(namespace) => ping.in_namespace(namespace),
            None => ping,
        })
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions { poll_interval: Duration::from_millis(self.controller.poll_interval_ms) }
    }

    /// Deadline of a single `tc` invocation on a node.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.controller.command_timeout_ms)
    }

    pub fn shaping_policy(&self) -> ShapingPolicy {
        let classes = &self.classes;
        ShapingPolicy {
            link_share_percent: classes.link_share_percent,
            critical_port: classes.critical_port,
            bulk_port: classes.bulk_port,
            critical: classes.critical.into(),
            bulk: classes.bulk.into(),
            background: classes.background.into(),
            sfq_perturb_secs: classes.sfq_perturb_secs,
        }
    }

    /// A rule compiler for the `[classes]` policy. Fails if the policy is inconsistent.
    pub fn compiler(&self) -> Result<RuleCompiler> {
        Ok(RuleCompiler::new(self.shaping_policy())?)
    }

    pub fn registry(&self) -> Result<NodeRegistry> {
        let nodes = self
            .nodes
            .iter()
            .map(|node| {
                let mut network_node = NetworkNode::new(&node.name);
                if let Some(namespace) = &node.namespace {
                    network_node = network_node.in_namespace(namespace);
                }
                node.interfaces.iter().fold(network_node, |n, i| {
                    let mut interface = Interface::new(&i.name, i.role);
                    if let Some(mbit) = i.capacity_mbit {
                        interface = interface.with_capacity(Rate::from_mbit_f64(mbit));
                    }
                    n.with_interface(interface)
                })
            })
            .collect();

        Ok(NodeRegistry::new(nodes)?)
    }
}
