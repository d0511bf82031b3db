//! Operator control flags, tree-preparation flags and lifecycle state.

use std::fmt;
use std::ops::BitOr;

/// Per-operator control bits, set during preparation or by control operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlFlags(u32);

impl ControlFlags {
    pub const NONE: ControlFlags = ControlFlags(0);
    /// The operator sits below a repeat boundary and must loop on reset.
    pub const REPEATED: ControlFlags = ControlFlags(1 << 0);
    /// The current epoch is the last one; leaves emit end-of-stream after it.
    pub const LAST_REPEAT: ControlFlags = ControlFlags(1 << 1);

    pub const fn from_bits(bits: u32) -> Self {
        ControlFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: ControlFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ControlFlags {
    type Output = ControlFlags;
    fn bitor(self, rhs: Self) -> Self {
        ControlFlags(self.0 | rhs.0)
    }
}

/// Structural requirements an operator declares to the preparation pass.
/// They apply to the declaring operator's whole subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrepareFlags(u32);

impl PrepareFlags {
    pub const NONE: PrepareFlags = PrepareFlags(0);
    /// The operator is a repeat boundary.
    pub const REPEAT: PrepareFlags = PrepareFlags(1 << 0);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: PrepareFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PrepareFlags {
    type Output = PrepareFlags;
    fn bitor(self, rhs: Self) -> Self {
        PrepareFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Running,
    /// Final epoch delivered; for a repeat operator, the final end-of-epoch
    /// has been handed to the parent.
    Idle,
    Terminated,
}

impl OpState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            OpState::Running => 0,
            OpState::Idle => 1,
            OpState::Terminated => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => OpState::Running,
            1 => OpState::Idle,
            _ => OpState::Terminated,
        }
    }
}

impl fmt::Display for OpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpState::Running => "running",
            OpState::Idle => "idle",
            OpState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}
