// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod layout;
pub mod logging;
pub mod sched;
pub mod store;
pub mod types;

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command, RunArgs};
use crate::config::{ConfigFile, load_and_validate};
use crate::exec::ShellExecutor;
use crate::fs::{FileSystem, RealFileSystem};
use crate::layout::PipelineLayout;
use crate::sched::{RunOptions, Scheduler, StageGraph, StageReport, UnitFilter};
use crate::store::Store;
use crate::types::UnitStatus;

/// High-level entry point used by `main.rs`.
///
/// This wires together config loading, the store, the layout (resolver)
/// and the shell executor, then dispatches the subcommand.
pub fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config {}", args.config))?;
    let layout = Arc::new(PipelineLayout::from_config(&cfg)?);
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let store = Store::open(
        &cfg.config.db_file,
        Duration::from_millis(cfg.config.lock_timeout_ms),
    )?;

    match args.command {
        Command::Prepare => {
            let report = layout.prepare(&store, fs.as_ref())?;
            println!(
                "registered {} new unit(s); {} index unit(s) done, {} pending",
                report.added, report.index_done, report.index_pending
            );
            Ok(())
        }
        Command::Run(ref run) => run_stages(&cfg, layout, fs, store, run),
        Command::Pools { ref stage, level } => {
            let sched = scheduler(&cfg, layout, fs, store, RunOptions::default())?;
            for pool in sched.list_pools(stage)? {
                if level >= 2 {
                    println!("{}\t{}\t{}", pool.pool_id, pool.weight, pool.members.join(","));
                } else {
                    println!("{}\t{}", pool.pool_id, pool.weight);
                }
            }
            Ok(())
        }
        Command::Sync { yes } => {
            let sched = scheduler(&cfg, layout, fs, store, RunOptions::default())?;
            sync(&sched, yes)
        }
        Command::Status { ref stage } => {
            let sched = scheduler(&cfg, layout, fs, store, RunOptions::default())?;
            print_status(&sched, stage.as_deref())
        }
    }
}

fn scheduler(
    cfg: &ConfigFile,
    layout: Arc<PipelineLayout>,
    fs: Arc<dyn FileSystem>,
    store: Store,
    options: RunOptions,
) -> Result<Scheduler> {
    let executor = Arc::new(ShellExecutor::new(Arc::clone(&fs)));
    Ok(Scheduler::new(
        Arc::new(store),
        layout,
        executor,
        fs,
        StageGraph::from_config(cfg),
        options,
    )?)
}

fn run_stages(
    cfg: &ConfigFile,
    layout: Arc<PipelineLayout>,
    fs: Arc<dyn FileSystem>,
    store: Store,
    args: &RunArgs,
) -> Result<()> {
    let filter = UnitFilter::all()
        .with_groups(args.groups.iter().cloned())
        .with_pools(args.pools.iter().copied())
        .with_items(&args.items)?;

    let options = RunOptions {
        ignore_store: args.ignore_db,
        ignore_deps: args.ignore_deps,
        remove_consumed: args.remove || cfg.config.remove_consumed,
        no_merge: args.no_merge,
        jobs: args.jobs.unwrap_or(cfg.config.jobs),
        planning: args.is_dry_run(),
    };
    debug!(?options, ?filter, "run options");

    if options.planning {
        // Register into a private copy so a dry run never writes the shared store.
        let snapshot = store.snapshot()?;
        layout.prepare(&snapshot, fs.as_ref())?;
        let sched = scheduler(cfg, layout, fs, snapshot, options)?;
        let (manifest, reports) = sched.plan_stages(&args.stages, &filter)?;

        match args.json.as_deref() {
            Some(path) if path == Path::new("-") => println!("{}", manifest.to_json()?),
            Some(path) => {
                std::fs::write(path, manifest.to_json()?)
                    .with_context(|| format!("writing manifest {:?}", path))?;
                info!(path = ?path, operations = manifest.len(), "wrote manifest");
            }
            None => manifest.write_trace(io::stdout().lock())?,
        }
        return finish(&reports);
    }

    layout.prepare(&store, fs.as_ref())?;
    let sched = scheduler(cfg, layout, fs, store, options)?;
    let mut reports = Vec::with_capacity(args.stages.len());
    for stage in args.stages.iter() {
        let report = sched.run_stage(stage, &filter)?;
        let ok = report.is_success();
        reports.push(report);
        if !ok {
            break;
        }
    }
    finish(&reports)
}

fn finish(reports: &[StageReport]) -> Result<()> {
    let mut failed = 0;
    for report in reports {
        for orphan in report.in_flight.iter() {
            warn!(
                stage = %report.stage,
                artifact = ?orphan,
                "unit is claimed by another run (or orphaned; see `stagehand sync`)"
            );
        }
        for failure in report.failed.iter() {
            eprintln!(
                "{}: {} ({}): {}",
                report.stage,
                failure.artifact.display(),
                failure.group,
                failure.reason
            );
        }
        failed += report.failed.len();
    }
    if failed > 0 {
        bail!("{failed} unit(s) failed or were blocked");
    }
    Ok(())
}

fn sync(sched: &Scheduler, yes: bool) -> Result<()> {
    let orphans = sched.orphan_candidates()?;
    if orphans.is_empty() {
        println!("no orphaned claims");
        return Ok(());
    }

    for unit in orphans.iter() {
        println!("{}\t{}\t{}", unit.stage, unit.group_key, unit.artifact_path.display());
    }

    if !yes {
        print!(
            "Reset {} claimed unit(s) and delete their partial outputs? \
             Make sure no other stagehand is running. [y/N] ",
            orphans.len()
        );
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("aborted");
            return Ok(());
        }
    }

    let report = sched.reconcile()?;
    println!("reconciled {} claim(s)", report.resolved.len());
    Ok(())
}

fn print_status(sched: &Scheduler, only: Option<&str>) -> Result<()> {
    for (stage, counts) in sched.status_counts()? {
        if only.is_some_and(|s| s != stage) {
            continue;
        }
        let count = |s: UnitStatus| counts.get(&s).copied().unwrap_or(0);
        println!(
            "{stage}\tpending {}\tclaimed {}\tdone {}\tretired {}",
            count(UnitStatus::Pending),
            count(UnitStatus::Claimed),
            count(UnitStatus::Done),
            count(UnitStatus::Retired)
        );
    }

    let orphans = sched.orphan_candidates()?;
    if !orphans.is_empty() {
        println!();
        println!("claimed ({}), run `stagehand sync` if no other run is active:", orphans.len());
        for unit in orphans {
            println!("  {}\t{}", unit.stage, unit.artifact_path.display());
        }
    }
    Ok(())
}
