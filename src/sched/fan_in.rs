// src/sched/fan_in.rs

//! Merge eligibility: a merge may run once every leaf-like unit of its
//! stage and group is Done or Retired.

use crate::store::WorkUnit;
use crate::types::UnitStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanIn {
    Eligible,
    /// Some leaves are unfinished; re-evaluate on a later pass.
    Waiting { pending: usize, claimed: usize },
}

impl FanIn {
    pub fn is_eligible(self) -> bool {
        self == FanIn::Eligible
    }
}

/// Leaf-like units feeding `merge`, drawn from `stage_units`.
pub fn leaves_of<'a>(
    merge: &'a WorkUnit,
    stage_units: &'a [WorkUnit],
) -> impl Iterator<Item = &'a WorkUnit> + 'a {
    stage_units.iter().filter(move |u| {
        u.stage == merge.stage && u.group_key == merge.group_key && u.kind.is_leaf_like()
    })
}

/// Decide whether `merge` can be claimed given the current rows of its
/// stage. An empty leaf set is immediately eligible.
pub fn evaluate(merge: &WorkUnit, stage_units: &[WorkUnit]) -> FanIn {
    let mut pending = 0;
    let mut claimed = 0;
    for leaf in leaves_of(merge, stage_units) {
        match leaf.status {
            UnitStatus::Pending => pending += 1,
            UnitStatus::Claimed => claimed += 1,
            UnitStatus::Done | UnitStatus::Retired => {}
        }
    }
    if pending == 0 && claimed == 0 {
        FanIn::Eligible
    } else {
        FanIn::Waiting { pending, claimed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UnitKind;

    fn unit(path: &str, group: &str, kind: UnitKind, status: UnitStatus) -> WorkUnit {
        let mut u = WorkUnit::new("map", path, group, kind);
        u.status = status;
        u
    }

    #[test]
    fn merge_waits_for_every_leaf() {
        let merge = unit("s.bam", "S", UnitKind::Merge, UnitStatus::Pending);
        let mut rows = vec![
            unit("l1.bam", "S", UnitKind::Leaf, UnitStatus::Done),
            unit("l2.bam", "S", UnitKind::Leaf, UnitStatus::Pending),
            merge.clone(),
        ];
        assert_eq!(
            evaluate(&merge, &rows),
            FanIn::Waiting {
                pending: 1,
                claimed: 0
            }
        );

        rows[1].status = UnitStatus::Claimed;
        assert!(!evaluate(&merge, &rows).is_eligible());

        rows[1].status = UnitStatus::Retired;
        assert!(evaluate(&merge, &rows).is_eligible());
    }

    #[test]
    fn other_groups_do_not_count() {
        let merge = unit("s.bam", "S", UnitKind::Merge, UnitStatus::Pending);
        let rows = vec![
            unit("l1.bam", "S", UnitKind::Leaf, UnitStatus::Done),
            unit("t1.bam", "T", UnitKind::Leaf, UnitStatus::Pending),
        ];
        assert!(evaluate(&merge, &rows).is_eligible());
    }

    #[test]
    fn empty_leaf_set_is_eligible() {
        let merge = unit("s.bam", "S", UnitKind::Merge, UnitStatus::Pending);
        assert!(evaluate(&merge, &[merge.clone()]).is_eligible());
    }
}
