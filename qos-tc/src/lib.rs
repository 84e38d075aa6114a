//! # Traffic Control Plans
//!
//! This crate compiles the priority-shaping policy for one interface into an ordered list of
//! typed `tc` commands. It never talks to the network itself: a node executor renders each
//! [`TcCommand`] to `tc` arguments and runs it.
//!
//! ## Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                      HTB Root Qdisc (1:)  default 30                        │
//! └─────────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//!                  ┌──────────────────────────────────────┐
//!                  │  Parent Class 1:1                    │
//!                  │  rate = 95% of link capacity         │
//!                  └──────────────────────────────────────┘
//!                                    │
//!            ┌───────────────────────┼───────────────────────┐
//!            ▼                       ▼                       ▼
//! ┌──────────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │  Class 1:10 (A)  │    │  Class 1:20 (B)  │    │  Class 1:30 (C)  │
//! │  critical        │    │  bulk            │    │  background      │
//! │  5 / 20 mbit     │    │  10 / 15 mbit    │    │  1 / 5 mbit      │
//! │  prio 1          │    │  prio 2          │    │  prio 3          │
//! └──────────────────┘    └──────────────────┘    └──────────────────┘
//!          │                       │                       │
//!          ▼                       ▼                       ▼
//! ┌──────────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │  SFQ (10:)       │    │  SFQ (20:)       │    │  SFQ (30:)       │
//! └──────────────────┘    └──────────────────┘    └──────────────────┘
//! ```
//!
//! ## Classification
//!
//! Filters are attached to the root and evaluated by pref:
//!
//! 1. ICMP and ARP go to class A.
//! 2. The critical port goes to class A.
//! 3. The bulk port goes to class B.
//! 4. Everything else falls through to the default class C.
//!
//! On forward interfaces (egress toward the monitored destination) ports are matched on the
//! destination port; on backward interfaces on the source port.
//!
//! ## Idempotence
//!
//! Every compiled command list starts with a clear of the root qdisc, so applying a plan twice
//! leaves the interface exactly as applying it once.

pub mod command;
pub mod compiler;
pub mod handle;

pub use command::{Direction, FilterMatch, FilterProtocol, PortField, TcCommand};
pub use compiler::{
    validate_dev, ClassKind, ClassShape, ClassificationPlan, Classifier, RuleCompiler,
    ShapingPolicy, TrafficClass, MAX_LINK_SHARE_PERCENT,
};
pub use handle::TcHandle;

use qos_common::Rate;

/// Errors raised while compiling or validating a plan.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The interface declares no bandwidth to share.
    #[error("link capacity must be non-zero")]
    ZeroCapacity,
    #[error("link share must be within 1..={max}%, got {0}%", max = MAX_LINK_SHARE_PERCENT)]
    LinkShareOutOfRange(u8),
    #[error("parent rate {parent} exceeds {max}% of link capacity {capacity}", max = MAX_LINK_SHARE_PERCENT)]
    ParentExceedsLinkShare { parent: Rate, capacity: Rate },
    /// The link is too small for the sum of the class guarantees.
    #[error("class guarantees {guaranteed} exceed parent rate {parent}")]
    Oversubscribed { guaranteed: Rate, parent: Rate },
    #[error("{class:?} ceiling {ceiling} is below its guarantee {guarantee}")]
    CeilingBelowGuarantee { class: ClassKind, ceiling: Rate, guarantee: Rate },
    #[error("{class:?} priority {priority} is out of range")]
    InvalidPriority { class: ClassKind, priority: u8 },
    #[error("priority {0} is used by more than one class")]
    DuplicatePriority(u8),
    #[error("critical and bulk traffic share port {0}")]
    PortCollision(u16),
    #[error("handle {0} is used twice")]
    DuplicateHandle(TcHandle),
    #[error("default class {0} is not part of the plan")]
    MissingDefaultClass(TcHandle),
    /// Empty, longer than 15 bytes, or containing whitespace or `/`.
    #[error("invalid interface name: {0:?}")]
    InvalidDevice(String),
}

pub type Result<T> = std::result::Result<T, Error>;
