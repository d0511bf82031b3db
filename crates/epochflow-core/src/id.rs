//! Strongly-typed identifiers used across the engine.
//!
//! Downstream crates (exec, operators, planner) should *not* use raw integers for IDs.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

new_id!(OpId);
new_id!(BufferId);

impl OpId {
    /// Id carried by an operator that has not been associated with a tree yet.
    pub const UNASSIGNED: OpId = OpId::new(u64::MAX);

    pub const fn is_assigned(self) -> bool {
        self.0 != u64::MAX
    }
}
