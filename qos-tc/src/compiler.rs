//! The 3-class HTB+SFQ plan compiler.

use std::collections::HashSet;

use qos_common::Rate;

use crate::{
    command::{Direction, FilterMatch, FilterProtocol, TcCommand, IPPROTO_ICMP},
    handle::TcHandle,
    Error, Result,
};

/// Largest share of the nominal link capacity the parent class may guarantee. The rest is
/// reserved for link overhead and control traffic.
pub const MAX_LINK_SHARE_PERCENT: u8 = 95;

/// Filters sharing a pref must share a protocol, so ARP gets a pref of its own.
const ARP_FILTER_PREF: u16 = 100;

/// HTB supports eight priorities, 0 to 7. Priority 0 is left unused.
const MAX_HTB_PRIO: u8 = 7;

/// Linux interface names are limited to 15 characters (IFNAMSIZ - 1).
const MAX_DEV_NAME_LEN: usize = 15;

/// The three traffic classes of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    /// Class A: critical, latency-sensitive traffic.
    Critical,
    /// Class B: bulk, throughput-oriented traffic.
    Bulk,
    /// Class C: everything else. Served through the root's default class.
    Background,
}

/// Guarantee, ceiling and priority of one class. Priority 1 is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassShape {
    pub guarantee: Rate,
    pub ceiling: Rate,
    pub priority: u8,
}

impl ClassShape {
    #[inline]
    pub const fn new(guarantee: Rate, ceiling: Rate, priority: u8) -> Self {
        Self { guarantee, ceiling, priority }
    }
}

/// Everything that parameterises a compiled plan apart from the link itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapingPolicy {
    /// Percentage of the link capacity guaranteed to the parent class.
    pub link_share_percent: u8,
    /// Port of the critical flow (Class A).
    pub critical_port: u16,
    /// Port of the bulk flow (Class B).
    pub bulk_port: u16,
    pub critical: ClassShape,
    pub bulk: ClassShape,
    pub background: ClassShape,
    /// SFQ hash perturbation period.
    pub sfq_perturb_secs: u32,
}

impl Default for ShapingPolicy {
    fn default() -> Self {
        Self {
            link_share_percent: MAX_LINK_SHARE_PERCENT,
            critical_port: 5202,
            bulk_port: 5201,
            critical: ClassShape::new(Rate::mbit(5), Rate::mbit(20), 1),
            bulk: ClassShape::new(Rate::mbit(10), Rate::mbit(15), 2),
            background: ClassShape::new(Rate::mbit(1), Rate::mbit(5), 3),
            sfq_perturb_secs: 10,
        }
    }
}

impl ShapingPolicy {
    fn shapes(&self) -> [(ClassKind, ClassShape); 3] {
        [
            (ClassKind::Critical, self.critical),
            (ClassKind::Bulk, self.bulk),
            (ClassKind::Background, self.background),
        ]
    }

    /// Checks the link-independent parts of the policy.
    pub fn validate(&self) -> Result<()> {
        if self.link_share_percent == 0 || self.link_share_percent > MAX_LINK_SHARE_PERCENT {
            return Err(Error::LinkShareOutOfRange(self.link_share_percent));
        }
        if self.critical_port == self.bulk_port {
            return Err(Error::PortCollision(self.critical_port));
        }

        let mut seen = HashSet::new();
        for (kind, shape) in self.shapes() {
            if shape.priority == 0 || shape.priority > MAX_HTB_PRIO {
                return Err(Error::InvalidPriority { class: kind, priority: shape.priority });
            }
            if !seen.insert(shape.priority) {
                return Err(Error::DuplicatePriority(shape.priority));
            }
            if shape.ceiling < shape.guarantee {
                return Err(Error::CeilingBelowGuarantee {
                    class: kind,
                    ceiling: shape.ceiling,
                    guarantee: shape.guarantee,
                });
            }
        }

        Ok(())
    }
}

/// One packet predicate steering traffic into a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Classifier {
    pub protocol: FilterProtocol,
    pub matcher: FilterMatch,
}

/// A leaf class of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficClass {
    pub kind: ClassKind,
    /// `1:<10 * priority>`.
    pub class_id: TcHandle,
    pub priority: u8,
    pub guaranteed: Rate,
    pub ceiling: Rate,
    /// Explicit filters. Empty for the default class, which catches all unmatched traffic.
    pub classifiers: Vec<Classifier>,
}

/// The classification for one interface, derived from its capacity and direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationPlan {
    pub capacity: Rate,
    pub direction: Direction,
    pub parent_rate: Rate,
    pub default_class: TcHandle,
    /// Ordered by priority, highest first.
    pub classes: Vec<TrafficClass>,
    sfq_perturb_secs: u32,
}

impl ClassificationPlan {
    pub fn guaranteed_total(&self) -> Rate {
        self.classes.iter().map(|c| c.guaranteed).sum()
    }

    pub fn class(&self, kind: ClassKind) -> Option<&TrafficClass> {
        self.classes.iter().find(|c| c.kind == kind)
    }

    /// Checks that `sum(guarantees) <= parent rate <= share of capacity`, that every handle is
    /// unique and that the default class exists.
    pub fn validate(&self) -> Result<()> {
        if self.parent_rate > self.capacity.percent(MAX_LINK_SHARE_PERCENT) {
            return Err(Error::ParentExceedsLinkShare {
                parent: self.parent_rate,
                capacity: self.capacity,
            });
        }

        let guaranteed = self.guaranteed_total();
        if guaranteed > self.parent_rate {
            return Err(Error::Oversubscribed { guaranteed, parent: self.parent_rate });
        }

        let mut handles = HashSet::from([TcHandle::root(), TcHandle::parent_class()]);
        for class in &self.classes {
            if class.ceiling < class.guaranteed {
                return Err(Error::CeilingBelowGuarantee {
                    class: class.kind,
                    ceiling: class.ceiling,
                    guarantee: class.guaranteed,
                });
            }
            for handle in [class.class_id, TcHandle::leaf_qdisc(class.class_id)] {
                if !handles.insert(handle) {
                    return Err(Error::DuplicateHandle(handle));
                }
            }
        }

        if !self.classes.iter().any(|c| c.class_id == self.default_class) {
            return Err(Error::MissingDefaultClass(self.default_class));
        }

        Ok(())
    }

    /// The commands that install this plan on `dev`, from an empty root.
    pub fn commands(&self, dev: &str) -> Vec<TcCommand> {
        let dev = dev.to_string();
        let mut commands = Vec::with_capacity(2 + self.classes.len() * 3);

        commands.push(TcCommand::AddHtbRoot {
            dev: dev.clone(),
            handle: TcHandle::root(),
            default_class: self.default_class,
        });
        commands.push(TcCommand::AddHtbClass {
            dev: dev.clone(),
            parent: TcHandle::root(),
            class_id: TcHandle::parent_class(),
            rate: self.parent_rate,
            ceil: None,
            prio: None,
        });

        for class in &self.classes {
            commands.push(TcCommand::AddHtbClass {
                dev: dev.clone(),
                parent: TcHandle::parent_class(),
                class_id: class.class_id,
                rate: class.guaranteed,
                ceil: Some(class.ceiling),
                prio: Some(class.priority),
            });
        }

        for class in &self.classes {
            commands.push(TcCommand::AddSfq {
                dev: dev.clone(),
                parent: class.class_id,
                handle: TcHandle::leaf_qdisc(class.class_id),
                perturb_secs: self.sfq_perturb_secs,
            });
        }

        for class in &self.classes {
            for classifier in &class.classifiers {
                let pref = match classifier.protocol {
                    FilterProtocol::Ip => class.priority as u16,
                    FilterProtocol::Arp => ARP_FILTER_PREF,
                };
                commands.push(TcCommand::AddFilter {
                    dev: dev.clone(),
                    parent: TcHandle::root(),
                    protocol: classifier.protocol,
                    pref,
                    matcher: classifier.matcher,
                    flow_id: class.class_id,
                });
            }
        }

        commands
    }
}

/// Compiles a [`ShapingPolicy`] into per-interface plans. Pure: the same inputs always yield
/// the same commands.
#[derive(Debug, Clone, Default)]
pub struct RuleCompiler {
    policy: ShapingPolicy,
}

impl RuleCompiler {
    pub fn new(policy: ShapingPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &ShapingPolicy {
        &self.policy
    }

    /// Derives the classification for a link of the given capacity.
    ///
    /// Ceilings are capped at the parent rate, since a child can never borrow more than its
    /// parent holds.
    pub fn classify(&self, capacity: Rate, direction: Direction) -> Result<ClassificationPlan> {
        if capacity.is_zero() {
            return Err(Error::ZeroCapacity);
        }

        let policy = &self.policy;
        let parent_rate = capacity.percent(policy.link_share_percent);
        let field = direction.port_field();

        let mut classes: Vec<TrafficClass> = policy
            .shapes()
            .into_iter()
            .map(|(kind, shape)| {
                let classifiers = match kind {
                    ClassKind::Critical => vec![
                        Classifier {
                            protocol: FilterProtocol::Ip,
                            matcher: FilterMatch::IpProtocol(IPPROTO_ICMP),
                        },
                        Classifier { protocol: FilterProtocol::Arp, matcher: FilterMatch::All },
                        Classifier {
                            protocol: FilterProtocol::Ip,
                            matcher: FilterMatch::Port { field, port: policy.critical_port },
                        },
                    ],
                    ClassKind::Bulk => vec![Classifier {
                        protocol: FilterProtocol::Ip,
                        matcher: FilterMatch::Port { field, port: policy.bulk_port },
                    }],
                    ClassKind::Background => Vec::new(),
                };

                TrafficClass {
                    kind,
                    class_id: TcHandle::priority_class(shape.priority),
                    priority: shape.priority,
                    guaranteed: shape.guarantee,
                    ceiling: shape.ceiling.min(parent_rate),
                    classifiers,
                }
            })
            .collect();
        classes.sort_by_key(|c| c.priority);

        let plan = ClassificationPlan {
            capacity,
            direction,
            parent_rate,
            default_class: TcHandle::priority_class(policy.background.priority),
            classes,
            sfq_perturb_secs: policy.sfq_perturb_secs,
        };
        plan.validate()?;

        Ok(plan)
    }

    /// Compiles the full, ordered command list for `dev`: a clear of whatever is installed,
    /// followed by the plan built from scratch.
    pub fn compile(&self, dev: &str, capacity: Rate, direction: Direction) -> Result<Vec<TcCommand>> {
        validate_dev(dev)?;
        let plan = self.classify(capacity, direction)?;

        tracing::trace!(dev, %capacity, %direction, parent = %plan.parent_rate, "compiled plan");

        let mut commands = vec![TcCommand::clear(dev)];
        commands.extend(plan.commands(dev));
        Ok(commands)
    }
}

/// Rejects names `tc` could not address as a single interface.
pub fn validate_dev(dev: &str) -> Result<()> {
    if dev.is_empty()
        || dev.len() > MAX_DEV_NAME_LEN
        || dev.chars().any(|c| c.is_whitespace() || c == '/')
    {
        return Err(Error::InvalidDevice(dev.to_string()));
    }
    Ok(())
}
