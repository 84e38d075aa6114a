//! TC handle computation.
//!
//! TC handles are 32-bit values split into major:minor (16:16 bits). `tc` parses both halves
//! as hexadecimal, so class `1:10` has minor `0x10`.

use std::fmt;

/// Major number of the HTB root qdisc (`1:`).
pub const ROOT_MAJOR: u16 = 1;

/// Minor number of the guaranteed-rate parent class (`1:1`).
pub const PARENT_MINOR: u16 = 0x1;

/// Minor numbers of the priority subclasses are `CLASS_MINOR_STEP * priority`, e.g. priority 1
/// maps to class `1:10`. The fairness qdisc attached to a class reuses the class minor as its
/// own major (`10:`), which keeps handles unique across the hierarchy.
pub const CLASS_MINOR_STEP: u16 = 0x10;

/// A `major:minor` traffic-control handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TcHandle {
    pub major: u16,
    pub minor: u16,
}

impl TcHandle {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// A qdisc handle. Qdisc handles always have minor 0.
    pub const fn qdisc(major: u16) -> Self {
        Self { major, minor: 0 }
    }

    /// The HTB root qdisc, `1:`.
    pub const fn root() -> Self {
        Self::qdisc(ROOT_MAJOR)
    }

    /// The guaranteed-rate parent class, `1:1`.
    pub const fn parent_class() -> Self {
        Self::new(ROOT_MAJOR, PARENT_MINOR)
    }

    /// The class for the given (1-based) priority, `1:(0x10 * priority)`.
    pub const fn priority_class(priority: u8) -> Self {
        Self::new(ROOT_MAJOR, CLASS_MINOR_STEP * priority as u16)
    }

    /// The fairness qdisc attached below `class`, `(class minor):`.
    pub const fn leaf_qdisc(class: TcHandle) -> Self {
        Self::qdisc(class.minor)
    }

    pub const fn is_qdisc(&self) -> bool {
        self.minor == 0
    }

    pub const fn as_u32(&self) -> u32 {
        (self.major as u32) << 16 | self.minor as u32
    }
}

impl From<u32> for TcHandle {
    fn from(value: u32) -> Self {
        Self { major: (value >> 16) as u16, minor: (value & 0xFFFF) as u16 }
    }
}

impl fmt::Display for TcHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_qdisc() {
            write!(f, "{:x}:", self.major)
        } else {
            write!(f, "{:x}:{:x}", self.major, self.minor)
        }
    }
}
