//! The traffic-control command grammar.
//!
//! A [`TcCommand`] is one `tc` invocation against a single interface. Commands are built by
//! the [`RuleCompiler`](crate::RuleCompiler) and rendered to an argument vector only when
//! they are submitted to a node.

use std::fmt;

use qos_common::Rate;

use crate::handle::TcHandle;

/// Which way traffic flows through an interface, relative to the monitored path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Egress toward the monitored destination. Classified by destination port.
    Forward,
    /// Egress toward the monitored source. Classified by source port.
    Backward,
}

impl Direction {
    pub fn port_field(self) -> PortField {
        match self {
            Self::Forward => PortField::Destination,
            Self::Backward => PortField::Source,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => f.write_str("forward"),
            Self::Backward => f.write_str("backward"),
        }
    }
}

/// Which transport port a [`FilterMatch::Port`] compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortField {
    Source,
    Destination,
}

impl PortField {
    fn as_u32_key(self) -> &'static str {
        match self {
            Self::Source => "sport",
            Self::Destination => "dport",
        }
    }
}

/// The link-layer protocol a filter is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterProtocol {
    Ip,
    Arp,
}

impl FilterProtocol {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Arp => "arp",
        }
    }
}

/// IP protocol number of ICMP.
pub const IPPROTO_ICMP: u8 = 1;

/// What a filter matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMatch {
    /// `u32 match ip protocol <n> 0xff`.
    IpProtocol(u8),
    /// `u32 match ip sport|dport <port> 0xffff`.
    Port { field: PortField, port: u16 },
    /// `matchall`: every frame of the filter's protocol.
    All,
}

impl FilterMatch {
    fn push_args(&self, args: &mut Vec<String>) {
        match *self {
            Self::IpProtocol(proto) => {
                args.extend(["u32", "match", "ip", "protocol"].map(String::from));
                args.push(proto.to_string());
                args.push("0xff".to_string());
            }
            Self::Port { field, port } => {
                args.extend(["u32", "match", "ip", field.as_u32_key()].map(String::from));
                args.push(port.to_string());
                args.push("0xffff".to_string());
            }
            Self::All => args.push("matchall".to_string()),
        }
    }
}

/// One `tc` operation on one interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TcCommand {
    /// `tc qdisc del dev <dev> root`: drop all shaping, back to the kernel default qdisc.
    ClearRoot { dev: String },
    /// `tc qdisc add dev <dev> root handle 1: htb default <minor>`.
    AddHtbRoot { dev: String, handle: TcHandle, default_class: TcHandle },
    /// `tc class add dev <dev> parent <p> classid <id> htb rate <r> [ceil <c>] [prio <n>]`.
    AddHtbClass {
        dev: String,
        parent: TcHandle,
        class_id: TcHandle,
        rate: Rate,
        ceil: Option<Rate>,
        prio: Option<u8>,
    },
    /// `tc qdisc add dev <dev> parent <class> handle <h> sfq perturb <secs>`.
    AddSfq { dev: String, parent: TcHandle, handle: TcHandle, perturb_secs: u32 },
    /// `tc filter add dev <dev> protocol <p> parent <q> prio <pref> <match> flowid <class>`.
    AddFilter {
        dev: String,
        parent: TcHandle,
        protocol: FilterProtocol,
        pref: u16,
        matcher: FilterMatch,
        flow_id: TcHandle,
    },
}

impl TcCommand {
    pub fn clear(dev: impl Into<String>) -> Self {
        Self::ClearRoot { dev: dev.into() }
    }

    /// The interface this command targets.
    pub fn dev(&self) -> &str {
        match self {
            Self::ClearRoot { dev }
            | Self::AddHtbRoot { dev, .. }
            | Self::AddHtbClass { dev, .. }
            | Self::AddSfq { dev, .. }
            | Self::AddFilter { dev, .. } => dev,
        }
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, Self::ClearRoot { .. })
    }

    /// The arguments passed to the `tc` binary.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::with_capacity(20);
        let s = |v: &str| v.to_string();

        match self {
            Self::ClearRoot { dev } => {
                args.extend([s("qdisc"), s("del"), s("dev"), dev.clone(), s("root")]);
            }
            Self::AddHtbRoot { dev, handle, default_class } => {
                args.extend([s("qdisc"), s("add"), s("dev"), dev.clone(), s("root")]);
                args.extend([s("handle"), handle.to_string(), s("htb"), s("default")]);
                args.push(format!("{:x}", default_class.minor));
            }
            Self::AddHtbClass { dev, parent, class_id, rate, ceil, prio } => {
                args.extend([s("class"), s("add"), s("dev"), dev.clone()]);
                args.extend([s("parent"), parent.to_string(), s("classid"), class_id.to_string()]);
                args.extend([s("htb"), s("rate"), rate.to_string()]);
                if let Some(ceil) = ceil {
                    args.extend([s("ceil"), ceil.to_string()]);
                }
                if let Some(prio) = prio {
                    args.extend([s("prio"), prio.to_string()]);
                }
            }
            Self::AddSfq { dev, parent, handle, perturb_secs } => {
                args.extend([s("qdisc"), s("add"), s("dev"), dev.clone()]);
                args.extend([s("parent"), parent.to_string(), s("handle"), handle.to_string()]);
                args.extend([s("sfq"), s("perturb"), perturb_secs.to_string()]);
            }
            Self::AddFilter { dev, parent, protocol, pref, matcher, flow_id } => {
                args.extend([s("filter"), s("add"), s("dev"), dev.clone()]);
                args.extend([s("protocol"), s(protocol.as_str())]);
                args.extend([s("parent"), parent.to_string(), s("prio"), pref.to_string()]);
                matcher.push_args(&mut args);
                args.extend([s("flowid"), flow_id.to_string()]);
            }
        }

        args
    }
}

impl fmt::Display for TcCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tc {}", self.args().join(" "))
    }
}
