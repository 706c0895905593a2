use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type StageName = String;
pub type GroupKey = String;

/// Durable status of a work unit.
///
/// The integer codes are written to the store and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pending,
    Done,
    Retired,
    Claimed,
}

impl UnitStatus {
    pub fn code(self) -> i64 {
        match self {
            UnitStatus::Pending => 0,
            UnitStatus::Done => 1,
            UnitStatus::Retired => 2,
            UnitStatus::Claimed => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(UnitStatus::Pending),
            1 => Some(UnitStatus::Done),
            2 => Some(UnitStatus::Retired),
            3 => Some(UnitStatus::Claimed),
            _ => None,
        }
    }

    /// Done or Retired: the unit's work is finished and its consumers may run.
    pub fn is_complete(self) -> bool {
        matches!(self, UnitStatus::Done | UnitStatus::Retired)
    }

    /// Transitions permitted by the claim protocol.
    ///
    /// `Claimed -> Pending` is the undo applied by compensation.
    pub fn can_transition_to(self, next: UnitStatus) -> bool {
        use UnitStatus::*;
        matches!(
            (self, next),
            (Pending, Claimed)
                | (Claimed, Done)
                | (Claimed, Pending)
                | (Pending, Retired)
                | (Done, Retired)
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Done => "done",
            UnitStatus::Retired => "retired",
            UnitStatus::Claimed => "claimed",
        };
        f.write_str(s)
    }
}

/// Role of a unit within its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// Reference preparation output; a global precondition for later stages.
    Index,
    /// One fine-grained piece of work within a group.
    Leaf,
    /// A balanced pool of items, scheduled as one unit.
    Pool,
    /// Fan-in unit consuming every leaf-like unit of its group.
    Merge,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Index => "index",
            UnitKind::Leaf => "leaf",
            UnitKind::Pool => "pool",
            UnitKind::Merge => "merge",
        }
    }

    /// Units a merge waits on.
    pub fn is_leaf_like(self) -> bool {
        !matches!(self, UnitKind::Merge)
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "index" => Ok(UnitKind::Index),
            "leaf" => Ok(UnitKind::Leaf),
            "pool" => Ok(UnitKind::Pool),
            "merge" => Ok(UnitKind::Merge),
            other => Err(format!(
                "invalid unit kind: {other} (expected \"index\", \"leaf\", \"pool\" or \"merge\")"
            )),
        }
    }
}
