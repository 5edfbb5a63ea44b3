use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cli_table::{Cell, CellStruct, Style, Table, format::Justify, print_stdout};
use crossbeam_channel::unbounded;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

use crate::catalog::{self, Entry, SortOrder};
use crate::cli::JobSourceArgs;
use crate::config::Config;
use crate::executor::{CommandRunner, Executor, InterruptHandle};
use crate::job::{JobBuilder, PlannedJob, plan};
use crate::joblist::{JobListHeader, read_job_list, reconcile_manifest, write_job_list};
use crate::report::{self, ReportOptions};
use crate::tier::TierTable;
use crate::util::{human_bytes, write_failures_jsonl};

/// How a `run` ended, mapped to the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Clean,
    /// Strict mode and at least one job failed.
    Failed,
    Interrupted,
}

impl RunExit {
    pub fn code(self) -> i32 {
        match self {
            RunExit::Clean => 0,
            RunExit::Failed => 1,
            RunExit::Interrupted => 130,
        }
    }
}

pub struct RunArgs {
    pub jobs: JobSourceArgs,
    pub start_from: Option<usize>,
    pub json: bool,
    pub quiet: bool,
}

pub fn handle_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => Config::default_path().context("Cannot find user's home dir")?,
    };
    if path.exists() && !force {
        eprintln!(
            "⚠️ 配置文件已存在 — config already exists: {} (use --force to overwrite)",
            path.display()
        );
        return Ok(());
    }
    Config::default().save(&path)?;
    println!("✅ Wrote default config to {}", path.display());
    println!("   Set source_root and dest_root (e.g. \"onedrive:\", \"gdrive:Migration/\") first.");
    Ok(())
}

pub fn handle_tiers(config: &Config) -> Result<()> {
    let tiers = config.tier_table()?;
    let title = vec![
        "Tier".cell().bold(true),
        "Range".cell().bold(true),
        "rclone flags".cell().bold(true),
    ];
    let rows: Vec<Vec<CellStruct>> = tiers
        .tiers()
        .iter()
        .map(|t| {
            vec![
                t.label.as_str().cell(),
                t.range_display().cell(),
                t.profile.to_args().join(" ").cell(),
            ]
        })
        .collect();
    print_stdout(rows.table().title(title)).context("print tier table")?;
    if !config.common_flags.is_empty() {
        println!("Common flags: {}", config.common_flags.join(" "));
    }
    Ok(())
}

/// Entries from a saved listing, or from a live listing of the source root.
fn load_entries(config: &Config, listing: Option<&Path>) -> Result<Vec<Entry>> {
    let parsed = match listing {
        Some(path) => catalog::read_listing_file(path)?,
        None => {
            let rclone = config.resolve_rclone()?;
            let root = config.source()?.normalized();
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
                spinner.set_style(style);
            }
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner.set_message(format!("listing {} ...", root));
            let mut count = 0usize;
            let res = catalog::list_remote(
                &rclone,
                config.rclone_config.as_deref(),
                &root,
                config.listing_format,
                |_| {
                    count += 1;
                    if count % 500 == 0 {
                        spinner.set_message(format!("listing {} ... {} files", root, count));
                    }
                },
            );
            spinner.finish_and_clear();
            res?
        }
    };
    if parsed.skipped > 0 {
        tracing::warn!("{} listing line(s) skipped", parsed.skipped);
    }
    if parsed.entries.is_empty() {
        eprintln!("⚠️ listing produced no files");
    }
    Ok(parsed.entries)
}

fn build_jobs(
    config: &Config,
    mut entries: Vec<Entry>,
    order: SortOrder,
    log_dir: &Path,
) -> Result<Vec<PlannedJob>> {
    let translator = config.translator()?;
    let tiers = config.tier_table()?;
    catalog::order_entries(&mut entries, order);
    let built = JobBuilder::new(&translator, &tiers, log_dir).build(&entries);
    if !built.rejected.is_empty() {
        eprintln!("⚠️ {} malformed entr(ies) skipped", built.rejected.len());
    }
    Ok(plan(built.jobs, &config.invocation_settings(), &tiers))
}

/// Build the jobs for `order` into that order's log dir and reconcile its
/// manifest, so every existing log belongs to the transfer its ordinal names.
fn build_logged_jobs(
    config: &Config,
    entries: Vec<Entry>,
    order: SortOrder,
) -> Result<Vec<PlannedJob>> {
    let log_dir = order_log_dir(config, order);
    let jobs = build_jobs(config, entries, order, &log_dir)?;
    let source = config.source()?.normalized();
    let dest = config.dest()?.normalized();
    let header = JobListHeader {
        title: "manifest",
        source: &source,
        destination: &dest,
        ordering: order.describe(),
    };
    let r = reconcile_manifest(&log_dir, &header, &jobs)?;
    if r.moved > 0 || r.dropped > 0 {
        println!(
            "♻️ {}: {} log(s) moved to their file's new ordinal, {} stale log(s) removed",
            log_dir.display(),
            r.moved,
            r.dropped
        );
    }
    Ok(jobs)
}

fn load_jobs(config: &Config, src: &JobSourceArgs) -> Result<Vec<PlannedJob>> {
    match src.from_file {
        Some(ref path) => {
            let tiers = config.tier_table()?;
            Ok(read_job_list(path, &tiers, &config.log_dir)?)
        }
        None => {
            config.validate()?;
            let entries = load_entries(config, src.listing.as_deref())?;
            build_logged_jobs(config, entries, config.order)
        }
    }
}

fn apply_start_from(jobs: &mut Vec<PlannedJob>, start_from: Option<usize>) {
    if let Some(n) = start_from
        && n > 1
    {
        let before = jobs.len();
        jobs.retain(|p| p.job.ordinal >= n);
        println!("⏩ Starting from job {} ({} earlier job(s) left out)", n, before - jobs.len());
    }
}

pub fn handle_list(config: &Config, listing: Option<&Path>, save: Option<&Path>) -> Result<()> {
    if listing.is_none() {
        config.source()?;
    }
    let entries = load_entries(config, listing)?;
    let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    println!("📁 {} file(s), {}", entries.len(), human_bytes(total));
    let tiers = config.tier_table()?;
    let rows = report::tier_breakdown(&tiers, entries.iter().map(|e| e.size_bytes));
    report::print_tier_breakdown(&rows);
    if let Some(path) = save {
        catalog::write_listing(path, &entries)
            .with_context(|| format!("无法写入清单 {}", path.display()))?;
        println!("✅ Listing saved to {}", path.display());
    }
    Ok(())
}

fn order_file_name(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Listing => "jobs_all.txt",
        SortOrder::LargestFirst => "jobs_largest_first.txt",
        SortOrder::SmallestFirst => "jobs_smallest_first.txt",
    }
}

fn order_slug(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Listing => "listing",
        SortOrder::LargestFirst => "largest-first",
        SortOrder::SmallestFirst => "smallest-first",
    }
}

/// Log directory for jobs built in `order`; ordinals of different orders
/// never share a log file.
pub fn order_log_dir(config: &Config, order: SortOrder) -> PathBuf {
    config.log_dir.join(order_slug(order))
}

pub fn handle_plan(config: &Config, listing: Option<&Path>, out: &Path) -> Result<()> {
    config.validate()?;
    let entries = load_entries(config, listing)?;
    let source = config.source()?.normalized();
    let dest = config.dest()?.normalized();
    for order in [SortOrder::Listing, SortOrder::LargestFirst, SortOrder::SmallestFirst] {
        let jobs = build_logged_jobs(config, entries.clone(), order)?;
        let path = out.join(order_file_name(order));
        let header = JobListHeader {
            title: order_slug(order),
            source: &source,
            destination: &dest,
            ordering: order.describe(),
        };
        write_job_list(&path, &header, &jobs)
            .with_context(|| format!("无法写入任务清单 {}", path.display()))?;
        println!("✅ {} job(s) → {}", jobs.len(), path.display());
    }
    let tiers = config.tier_table()?;
    let rows = report::tier_breakdown(&tiers, entries.iter().map(|e| e.size_bytes));
    report::print_tier_breakdown(&rows);
    Ok(())
}

pub fn handle_status(
    config: &Config,
    src: &JobSourceArgs,
    start_from: Option<usize>,
) -> Result<()> {
    let mut jobs = load_jobs(config, src)?;
    apply_start_from(&mut jobs, start_from);
    let oracle = config.oracle();
    let tiers = match src.from_file {
        Some(_) => config.tier_table().unwrap_or_else(|_| TierTable::default()),
        None => config.tier_table()?,
    };
    let mut rows: Vec<(String, usize, usize, u64)> =
        tiers.tiers().iter().map(|t| (t.label.clone(), 0, 0, 0)).collect();
    let mut first_pending: Option<usize> = None;
    for p in &jobs {
        let done = oracle.is_already_done(&p.job.log_path);
        if !done {
            first_pending = Some(first_pending.map_or(p.job.ordinal, |o| o.min(p.job.ordinal)));
        }
        if let Some(row) = rows.iter_mut().find(|r| r.0 == p.job.tier_label) {
            if done {
                row.1 += 1;
            } else {
                row.2 += 1;
                row.3 += p.job.size_bytes;
            }
        }
    }
    let title = vec![
        "Tier".cell().bold(true),
        "Done".cell().bold(true),
        "Pending".cell().bold(true),
        "Pending size".cell().bold(true),
    ];
    let table: Vec<Vec<CellStruct>> = rows
        .iter()
        .map(|(label, done, pending, bytes)| {
            vec![
                label.as_str().cell(),
                done.cell().justify(Justify::Right),
                pending.cell().justify(Justify::Right),
                human_bytes(*bytes).cell().justify(Justify::Right),
            ]
        })
        .collect();
    print_stdout(table.table().title(title)).context("print status table")?;
    let done: usize = rows.iter().map(|r| r.1).sum();
    let pending: usize = rows.iter().map(|r| r.2).sum();
    if !config.resume.enabled {
        println!("(resume is disabled: every job would run)");
    }
    match first_pending {
        Some(o) => println!("{} done, {} pending; first pending job: {}", done, pending, o),
        None => println!("🎉 {} job(s), all done", done),
    }
    Ok(())
}

fn install_interrupt(handle: InterruptHandle) {
    let res = ctrlc::set_handler(move || {
        if handle.is_interrupted() {
            eprintln!("{} second interrupt, exiting now", "🛑".red());
            std::process::exit(RunExit::Interrupted.code());
        }
        eprintln!(
            "{} Received interrupt: no new transfers will start; waiting for running ones",
            "🛑".red()
        );
        handle.interrupt();
    });
    if let Err(e) = res {
        tracing::warn!("cannot install Ctrl-C handler: {}", e);
    }
}

pub fn handle_run(config: &Config, args: RunArgs) -> Result<RunExit> {
    let RunArgs { jobs: src, start_from, json, quiet } = args;
    let mut jobs = load_jobs(config, &src)?;
    if config.parallelism == 0 {
        return Err(crate::error::ConfigError::ZeroParallelism.into());
    }
    apply_start_from(&mut jobs, start_from);
    if jobs.is_empty() {
        println!("Nothing to do: no jobs.");
        return Ok(RunExit::Clean);
    }
    if src.from_file.is_none() {
        config.resolve_rclone()?;
    }

    let total = jobs.len();
    let total_bytes: u64 = jobs.iter().map(|p| p.job.size_bytes).sum();
    let (tx, rx) = unbounded();
    let executor =
        Executor::new(config.effective_parallelism(), Arc::new(CommandRunner), config.oracle())
            .with_events(tx);
    install_interrupt(executor.interrupt_handle());

    let opts = ReportOptions {
        quiet,
        json,
        stats_interval: (config.stats_interval_secs > 0)
            .then(|| Duration::from_secs(config.stats_interval_secs)),
    };
    if !quiet {
        println!(
            "🚀 {} job(s), {} | workers: {} | resume: {} | logs: {}",
            total,
            human_bytes(total_bytes),
            executor.parallelism(),
            if config.resume.enabled { "on" } else { "off" },
            config.log_dir.display()
        );
    }
    let reporter = report::spawn_reporter(rx, executor.monitor(), total, opts);
    let outcome = executor.run(jobs);
    // dropping the executor closes the event channel and ends the reporter
    drop(executor);
    if reporter.join().is_err() {
        tracing::warn!("reporter thread panicked");
    }

    let failures_path = write_failures_jsonl(&config.log_dir, &outcome.failures);
    report::print_summary(&outcome, failures_path.as_deref(), opts);

    Ok(if outcome.interrupted {
        RunExit::Interrupted
    } else if config.strict && outcome.stats.failed > 0 {
        RunExit::Failed
    } else {
        RunExit::Clean
    })
}
