// src/sched/scheduler.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, StagehandError};
use crate::exec::{Executor, Operation, stderr_path};
use crate::fs::FileSystem;
use crate::layout::Resolver;
use crate::sched::claim::{self, ClaimOutcome};
use crate::sched::compensation::{self, ReconcileReport};
use crate::sched::fan_in::{self, FanIn};
use crate::sched::filter::UnitFilter;
use crate::sched::planning::{Manifest, PlanRecorder};
use crate::sched::pools::{self, Pool};
use crate::sched::stage_graph::StageGraph;
use crate::sched::worker_pool::WorkerPool;
use crate::store::{Store, WorkUnit};
use crate::types::{GroupKey, UnitKind, UnitStatus};

/// Knobs for one scheduling invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Treat every unit as Pending and assume upstream stages are done.
    /// Planning only.
    pub ignore_store: bool,
    /// Skip upstream-stage and on-disk input checks.
    pub ignore_deps: bool,
    /// Retire (and delete) leaves once their merge succeeded.
    pub remove_consumed: bool,
    /// Never offer merge units.
    pub no_merge: bool,
    /// Groups processed in parallel.
    pub jobs: usize,
    /// Set on the scheduler that drives a planning session.
    pub planning: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            ignore_store: false,
            ignore_deps: false,
            remove_consumed: false,
            no_merge: false,
            jobs: 1,
            planning: false,
        }
    }
}

/// A unit this caller owns, with the operation to run for it.
#[derive(Debug, Clone)]
pub struct Claimed {
    pub unit: WorkUnit,
    pub operation: Operation,
    /// For merges: the leaf artifacts it consumes.
    pub leaves: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    /// Failing unit, or the group's first waiting unit for dependency errors.
    pub artifact: PathBuf,
    pub group: GroupKey,
    pub reason: String,
}

/// Outcome of [`Scheduler::run_stage`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub completed: Vec<PathBuf>,
    pub retired: Vec<PathBuf>,
    /// Claims another runner won.
    pub lost: Vec<PathBuf>,
    /// Merges whose leaves are not all finished.
    pub deferred: Vec<PathBuf>,
    /// Claimed rows seen; possibly orphaned by a crashed run.
    pub in_flight: Vec<PathBuf>,
    pub failed: Vec<UnitFailure>,
}

impl StageReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn absorb(&mut self, tally: Tally) {
        self.completed.extend(tally.completed);
        self.retired.extend(tally.retired);
        self.lost.extend(tally.lost);
        self.deferred.extend(tally.deferred);
        self.in_flight.extend(tally.in_flight);
        self.failed.extend(tally.failed);
    }
}

/// Per-group bookkeeping collected by one worker.
#[derive(Debug, Default)]
struct Tally {
    completed: Vec<PathBuf>,
    retired: Vec<PathBuf>,
    lost: Vec<PathBuf>,
    deferred: Vec<PathBuf>,
    in_flight: BTreeSet<PathBuf>,
    failed: Vec<UnitFailure>,
    /// Unit being checked when the last error occurred.
    attempting: Option<PathBuf>,
}

/// Scheduler facade: decides what still needs to run, claims it, hands it
/// to the executor and records the outcome.
///
/// All state lives in the injected [`Store`]; a scheduler holds no
/// progress of its own and many may share one store across processes.
pub struct Scheduler {
    store: Arc<Store>,
    resolver: Arc<dyn Resolver>,
    executor: Arc<dyn Executor>,
    fs: Arc<dyn FileSystem>,
    graph: StageGraph,
    options: RunOptions,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        resolver: Arc<dyn Resolver>,
        executor: Arc<dyn Executor>,
        fs: Arc<dyn FileSystem>,
        graph: StageGraph,
        options: RunOptions,
    ) -> Result<Self> {
        if options.ignore_store && !options.planning {
            return Err(StagehandError::ConfigError(
                "ignoring the store is only allowed for dry runs".to_string(),
            ));
        }
        Ok(Self {
            store,
            resolver,
            executor,
            fs,
            graph,
            options,
        })
    }

    fn ensure_stage(&self, stage: &str) -> Result<()> {
        if self.graph.contains(stage) {
            Ok(())
        } else {
            Err(StagehandError::UnknownStage(stage.to_string()))
        }
    }

    /// Claim the next runnable unit of `stage` within `filter`.
    ///
    /// Leaf-like units come first, then merges whose fan-in is complete.
    /// Lost races are skipped. Returns `Ok(None)` when nothing is left.
    pub fn claim_next(&self, stage: &str, filter: &UnitFilter) -> Result<Option<Claimed>> {
        self.ensure_stage(stage)?;
        let mut filter = filter.clone();
        self.next_claim(stage, &mut filter, &mut Tally::default())
    }

    fn next_claim(
        &self,
        stage: &str,
        filter: &mut UnitFilter,
        tally: &mut Tally,
    ) -> Result<Option<Claimed>> {
        loop {
            let rows = self.store.stage_units(stage)?;
            let visible: Vec<&WorkUnit> = rows.iter().filter(|u| filter.matches(u)).collect();

            for unit in visible.iter().filter(|u| u.status == UnitStatus::Claimed) {
                tally.in_flight.insert(unit.artifact_path.clone());
            }

            let leaf = visible
                .iter()
                .find(|u| u.status == UnitStatus::Pending && u.kind.is_leaf_like());

            let candidate = match leaf {
                Some(unit) => (*unit).clone(),
                None => match self.next_merge(&visible, &rows, filter, tally) {
                    Some(unit) => unit,
                    None => return Ok(None),
                },
            };

            // One attempt per unit per pass, whatever the outcome.
            filter.exclude(candidate.artifact_path.clone());
            tally.attempting = Some(candidate.artifact_path.clone());

            self.check_upstream(stage, &candidate)?;
            let (operation, leaves) = self.operation_for(&candidate, &rows)?;
            self.check_inputs(&candidate, &operation)?;

            let guards: Vec<PathBuf> = operation.outputs.clone();
            match claim::claim(
                &self.store,
                &candidate.artifact_path,
                &guards,
                self.options.ignore_store,
            )? {
                ClaimOutcome::Claimed(unit) => {
                    return Ok(Some(Claimed {
                        unit,
                        operation,
                        leaves,
                    }));
                }
                ClaimOutcome::Lost { artifact, observed } => {
                    debug!(artifact = ?artifact, status = %observed, "lost claim race, skipping");
                    tally.lost.push(artifact);
                }
            }
        }
    }

    fn next_merge(
        &self,
        visible: &[&WorkUnit],
        rows: &[WorkUnit],
        filter: &mut UnitFilter,
        tally: &mut Tally,
    ) -> Option<WorkUnit> {
        if self.options.no_merge || filter.is_subset() {
            return None;
        }
        for merge in visible
            .iter()
            .filter(|u| u.status == UnitStatus::Pending && u.kind == UnitKind::Merge)
        {
            match fan_in::evaluate(merge, rows) {
                FanIn::Eligible => return Some((*merge).clone()),
                FanIn::Waiting { pending, claimed } => {
                    debug!(
                        artifact = %merge.key(),
                        pending,
                        claimed,
                        "merge deferred until its leaves finish"
                    );
                    filter.exclude(merge.artifact_path.clone());
                    tally.deferred.push(merge.artifact_path.clone());
                }
            }
        }
        None
    }

    /// Upstream stages must have finished every unit relevant to `unit`:
    /// those of the same group, plus index units.
    ///
    /// Skipped when ignoring dependencies, and when planning from scratch:
    /// that plan assumes upstream outputs are available.
    fn check_upstream(&self, stage: &str, unit: &WorkUnit) -> Result<()> {
        if self.options.ignore_deps || self.options.ignore_store {
            return Ok(());
        }
        for upstream in self.graph.upstream_of(stage) {
            let rows = self.store.stage_units(upstream)?;
            if rows.is_empty() {
                continue;
            }
            let relevant: Vec<&WorkUnit> = rows
                .iter()
                .filter(|u| u.group_key == unit.group_key || u.kind == UnitKind::Index)
                .collect();
            let waiting = relevant.iter().filter(|u| !u.status.is_complete()).count();
            if relevant.is_empty() || waiting > 0 {
                return Err(StagehandError::UnmetDependency {
                    stage: stage.to_string(),
                    group: unit.group_key.clone(),
                    upstream: upstream.clone(),
                    waiting,
                });
            }
        }
        Ok(())
    }

    fn check_inputs(&self, unit: &WorkUnit, op: &Operation) -> Result<()> {
        if self.options.planning || self.options.ignore_deps {
            return Ok(());
        }
        // Merge inputs are this stage's leaves, already known complete.
        let leaf_inputs = unit.kind == UnitKind::Merge;
        for input in op.inputs.iter() {
            if leaf_inputs && self.is_retired(input)? {
                continue;
            }
            if !self.fs.exists(input) {
                return Err(StagehandError::MissingArtifact {
                    unit: unit.key(),
                    path: input.clone(),
                });
            }
        }
        Ok(())
    }

    fn is_retired(&self, artifact: &std::path::Path) -> Result<bool> {
        Ok(self
            .store
            .get_unit(artifact)?
            .is_some_and(|u| u.status == UnitStatus::Retired))
    }

    fn operation_for(&self, unit: &WorkUnit, rows: &[WorkUnit]) -> Result<(Operation, Vec<PathBuf>)> {
        let resolved = self.resolver.resolve(unit, rows)?;
        let leaves = if unit.kind == UnitKind::Merge {
            let mut leaves: Vec<PathBuf> = fan_in::leaves_of(unit, rows)
                .map(|u| u.artifact_path.clone())
                .collect();
            leaves.sort();
            leaves
        } else {
            Vec::new()
        };
        let op = Operation {
            stage: unit.stage.clone(),
            artifact: unit.artifact_path.clone(),
            group: unit.group_key.clone(),
            kind: unit.kind,
            command: resolved.command,
            inputs: resolved.inputs,
            outputs: resolved.outputs,
            checksum: resolved.checksum,
        };
        Ok((op, leaves))
    }

    /// Record success of a claimed unit. Merges retire their leaves when
    /// `remove_consumed` is set. Returns the retired leaves.
    pub fn commit(&self, claimed: &Claimed) -> Result<Vec<PathBuf>> {
        if claimed.unit.kind == UnitKind::Merge && self.options.remove_consumed {
            claim::retire(
                &self.store,
                self.fs.as_ref(),
                &claimed.unit.artifact_path,
                &claimed.leaves,
                !self.options.planning,
            )
        } else {
            claim::commit(&self.store, &claimed.unit.artifact_path)?;
            Ok(Vec::new())
        }
    }

    /// Undo a claim whose operation failed. The unit's stderr log is kept
    /// so the failure can be diagnosed.
    pub fn abandon(&self, claimed: &Claimed) -> Result<()> {
        let artifact = &claimed.unit.artifact_path;
        compensation::rollback(
            &self.store,
            self.fs.as_ref(),
            artifact,
            &[stderr_path(artifact)],
        )?;
        Ok(())
    }

    /// Resolve orphaned claims. Must not overlap live scheduling.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        compensation::reconcile(&self.store, self.fs.as_ref())
    }

    /// Claimed units with a pending compensation record.
    pub fn orphan_candidates(&self) -> Result<Vec<WorkUnit>> {
        let mut out = Vec::new();
        for record in self.store.compensations()? {
            if let Some(unit) = self.store.get_unit(&record.artifact_path)? {
                if unit.status == UnitStatus::Claimed {
                    out.push(unit);
                }
            }
        }
        Ok(out)
    }

    /// Deterministic pool partition of a pooled stage.
    pub fn list_pools(&self, stage: &str) -> Result<Vec<Pool>> {
        self.ensure_stage(stage)?;
        let plan = self.resolver.pool_plan(stage).ok_or_else(|| {
            StagehandError::PartitionError(format!("stage '{stage}' is not pooled"))
        })?;
        pools::partition(&plan.items, plan.pool_count)
    }

    /// Run every outstanding unit of `stage` within `filter`.
    ///
    /// Groups are spread over the worker pool. Within a group units run one
    /// at a time; the first failure stops that group for this pass.
    pub fn run_stage(&self, stage: &str, filter: &UnitFilter) -> Result<StageReport> {
        self.ensure_stage(stage)?;

        let groups: Vec<GroupKey> = self
            .store
            .list_units(stage, filter)?
            .into_iter()
            .map(|u| u.group_key)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        info!(
            stage = %stage,
            groups = groups.len(),
            jobs = self.options.jobs,
            planning = self.options.planning,
            "running stage"
        );

        let pool = WorkerPool::new(self.options.jobs);
        let tallies = pool.run(groups, |group| self.run_group(stage, filter, group))?;

        let mut report = StageReport {
            stage: stage.to_string(),
            ..StageReport::default()
        };
        for tally in tallies {
            report.absorb(tally);
        }

        info!(
            stage = %stage,
            completed = report.completed.len(),
            lost = report.lost.len(),
            deferred = report.deferred.len(),
            in_flight = report.in_flight.len(),
            failed = report.failed.len(),
            "stage pass finished"
        );
        Ok(report)
    }

    fn run_group(&self, stage: &str, base: &UnitFilter, group: GroupKey) -> Tally {
        let mut tally = Tally::default();
        let mut filter = base.clone().with_groups([group.clone()]);

        loop {
            let claimed = match self.next_claim(stage, &mut filter, &mut tally) {
                Ok(Some(c)) => c,
                Ok(None) => break,
                Err(e) => {
                    warn!(stage = %stage, group = %group, error = %e, "group blocked");
                    tally.failed.push(UnitFailure {
                        artifact: tally
                            .attempting
                            .take()
                            .unwrap_or_else(|| PathBuf::from(&group)),
                        group: group.clone(),
                        reason: e.to_string(),
                    });
                    break;
                }
            };

            let artifact = claimed.unit.artifact_path.clone();
            if let Err(e) = self.executor.execute(&claimed.operation) {
                let failure = StagehandError::ExecutionFailed {
                    unit: claimed.unit.key(),
                    reason: format!("{e:#}"),
                };
                error!(artifact = ?artifact, error = %failure, "operation failed, rolling back");
                if let Err(rb) = self.abandon(&claimed) {
                    error!(artifact = ?artifact, error = %rb, "rollback failed; run `sync`");
                }
                tally.failed.push(UnitFailure {
                    artifact,
                    group: group.clone(),
                    reason: failure.to_string(),
                });
                break;
            }

            match self.commit(&claimed) {
                Ok(retired) => {
                    tally.completed.push(artifact);
                    tally.retired.extend(retired);
                }
                Err(e) => {
                    error!(artifact = ?artifact, error = %e, "commit failed");
                    tally.failed.push(UnitFailure {
                        artifact,
                        group: group.clone(),
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }
        tally
    }

    /// Dry-run `stages` in order against a snapshot of the store.
    ///
    /// The durable store is only read. Returns the manifest of everything
    /// that would run plus a report per stage.
    pub fn plan_stages(
        &self,
        stages: &[String],
        filter: &UnitFilter,
    ) -> Result<(Manifest, Vec<StageReport>)> {
        for stage in stages {
            self.ensure_stage(stage)?;
        }

        let snapshot = self.store.snapshot()?;
        if self.options.ignore_store {
            snapshot.reset_all()?;
        }

        let recorder = Arc::new(PlanRecorder::new());
        let session = Scheduler {
            store: Arc::new(snapshot),
            resolver: Arc::clone(&self.resolver),
            executor: recorder.clone(),
            fs: Arc::clone(&self.fs),
            graph: self.graph.clone(),
            options: RunOptions {
                planning: true,
                // Manifest order must not depend on thread timing.
                jobs: 1,
                ..self.options.clone()
            },
        };

        let mut reports = Vec::with_capacity(stages.len());
        for stage in stages {
            reports.push(session.run_stage(stage, filter)?);
        }

        let manifest = recorder.take_manifest();
        info!(operations = manifest.len(), "planning session finished");
        Ok((manifest, reports))
    }

    pub fn plan(&self, stage: &str, filter: &UnitFilter) -> Result<Manifest> {
        let (manifest, _) = self.plan_stages(&[stage.to_string()], filter)?;
        Ok(manifest)
    }

    /// Per-stage status counts, in stage order.
    pub fn status_counts(&self) -> Result<Vec<(String, BTreeMap<UnitStatus, usize>)>> {
        let mut out = Vec::new();
        for stage in self.graph.order()? {
            let mut counts = BTreeMap::new();
            for unit in self.store.stage_units(&stage)? {
                *counts.entry(unit.status).or_insert(0) += 1;
            }
            out.push((stage, counts));
        }
        Ok(out)
    }
}
