//! Progress reporter: consumes executor events on its own thread so that a
//! slow terminal never holds up dispatch.

use std::io::IsTerminal;
use std::path::Path;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cli_table::{Cell, CellStruct, Style, Table, TableStruct, format::Justify, print_stdout};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

use crate::executor::{ActiveJob, JobResult, Outcome, RunEvent, RunMonitor, RunOutcome, RunStats};
use crate::tier::TierTable;
use crate::util::{format_duration, human_bytes, mib_per_sec, try_enable_ansi_on_windows};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    pub quiet: bool,
    pub json: bool,
    /// Period of the active-jobs table; None disables it.
    pub stats_interval: Option<Duration>,
}

fn use_color() -> bool {
    let _ = try_enable_ansi_on_windows();
    std::io::stdout().is_terminal()
}

/// One status line per finished job.
pub fn event_line(
    result: &JobResult,
    display_path: &str,
    stats: &RunStats,
    run_elapsed: Duration,
    color: bool,
) -> String {
    let glyph = match (&result.outcome, color) {
        (Outcome::Completed, true) => "✓".green().to_string(),
        (Outcome::Failed(_), true) => "✗".red().to_string(),
        (Outcome::SkippedAlreadyDone, true) => "↷".yellow().to_string(),
        (Outcome::Completed, false) => "✓".to_string(),
        (Outcome::Failed(_), false) => "✗".to_string(),
        (Outcome::SkippedAlreadyDone, false) => "↷".to_string(),
    };
    let mut line = format!(
        "{} [{}] {} {} ({})",
        glyph,
        result.ordinal,
        result.outcome.label(),
        display_path,
        human_bytes(result.size_bytes)
    );
    if !matches!(result.outcome, Outcome::SkippedAlreadyDone) {
        line.push_str(&format!(" in {}", format_duration(result.elapsed)));
    }
    if let Outcome::Failed(ref e) = result.outcome {
        line.push_str(&format!(": {}", e));
    }
    line.push_str(&format!(
        " | {}/{} | {:.2} MiB/s",
        stats.terminal(),
        stats.total_jobs,
        mib_per_sec(stats.bytes_transferred, run_elapsed.as_secs_f64())
    ));
    line
}

pub fn active_table(active: &[ActiveJob]) -> TableStruct {
    let title = vec![
        "#".cell().bold(true),
        "File".cell().bold(true),
        "Tier".cell().bold(true),
        "Size".cell().bold(true),
        "Running".cell().bold(true),
    ];
    let rows: Vec<Vec<CellStruct>> = active
        .iter()
        .map(|a| {
            vec![
                a.ordinal.cell().justify(Justify::Right),
                a.display_path.as_str().cell(),
                a.tier_label.as_str().cell(),
                human_bytes(a.size_bytes).cell().justify(Justify::Right),
                format_duration(a.started.elapsed()).cell().justify(Justify::Right),
            ]
        })
        .collect();
    rows.table().title(title)
}

/// Spawn the reporter thread. It exits once every event sender is dropped.
pub fn spawn_reporter(
    rx: Receiver<RunEvent>,
    monitor: RunMonitor,
    total_jobs: usize,
    opts: ReportOptions,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let color = use_color();
        let pb =
            if opts.quiet { ProgressBar::hidden() } else { ProgressBar::new(total_jobs as u64) };
        match ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} jobs {msg}",
        ) {
            Ok(style) => pb.set_style(style.progress_chars("=> ")),
            Err(e) => tracing::debug!("[report] progress template rejected: {}", e),
        }
        pb.enable_steady_tick(Duration::from_millis(120));
        let start = Instant::now();
        let mut last_table = Instant::now();
        loop {
            match rx.recv_timeout(Duration::from_millis(250)) {
                Ok(RunEvent::Started { ordinal, display_path, .. }) => {
                    pb.set_message(format!("▶ [{}] {}", ordinal, display_path));
                }
                Ok(RunEvent::Finished { result, display_path, stats }) => {
                    pb.set_position(stats.terminal() as u64);
                    if !opts.quiet {
                        let line =
                            event_line(&result, &display_path, &stats, start.elapsed(), color);
                        pb.println(line);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if let Some(every) = opts.stats_interval
                && !opts.quiet
                && last_table.elapsed() >= every
            {
                last_table = Instant::now();
                let (_, active) = monitor.snapshot();
                if !active.is_empty() {
                    pb.suspend(|| {
                        println!("📋 Active transfers ({}):", active.len());
                        let _ = print_stdout(active_table(&active));
                    });
                }
            }
        }
        pb.finish_and_clear();
    })
}

pub fn summary_json(outcome: &RunOutcome, failures_path: Option<&Path>) -> serde_json::Value {
    let secs = outcome.elapsed.as_secs_f64();
    serde_json::json!({
        "total_jobs": outcome.stats.total_jobs,
        "completed": outcome.stats.completed,
        "failed": outcome.stats.failed,
        "skipped": outcome.stats.skipped,
        "bytes_transferred": outcome.stats.bytes_transferred,
        "elapsed_secs": secs,
        "avg_mib_per_sec": mib_per_sec(outcome.stats.bytes_transferred, secs),
        "interrupted": outcome.interrupted,
        "last_dispatched": outcome.last_dispatched,
        "not_started": outcome.not_started.len(),
        "resume_from": outcome.resume_point(),
        "failures_path": failures_path.map(|p| p.to_string_lossy().to_string()),
    })
}

/// Final summary. The human block is skipped in quiet mode; the JSON line
/// is printed in addition to it, never instead.
pub fn print_summary(outcome: &RunOutcome, failures_path: Option<&Path>, opts: ReportOptions) {
    let s = &outcome.stats;
    let secs = outcome.elapsed.as_secs_f64();
    if !opts.quiet {
        println!();
        println!("📊 Run summary");
        println!(
            "   ✅ completed: {}   ⏭️  skipped: {}   ❌ failed: {}   (of {} job(s))",
            s.completed, s.skipped, s.failed, s.total_jobs
        );
        let files_per_min = if secs > 0.0 { s.completed as f64 / (secs / 60.0) } else { 0.0 };
        println!(
            "   📦 transferred {} in {} | avg {:.2} MiB/s | {:.1} files/min",
            human_bytes(s.bytes_transferred),
            format_duration(outcome.elapsed),
            mib_per_sec(s.bytes_transferred, secs),
            files_per_min
        );
        if outcome.interrupted {
            let last = outcome.last_dispatched.map(|o| o.to_string()).unwrap_or_else(|| "-".into());
            println!(
                "⚠️  Interrupted after dispatching job {}; {} job(s) not started.",
                last,
                outcome.not_started.len()
            );
            match outcome.resume_point() {
                Some(next) => println!(
                    "   Re-run to resume (finished jobs are skipped), or add --start-from {}.",
                    next
                ),
                None => println!("   Re-run the same command to retry anything unfinished."),
            }
        } else if s.all_succeeded() {
            println!("🎉 All transfers completed.");
        } else if s.failed > 0 {
            println!("   Re-run the same command to retry the {} failed job(s).", s.failed);
        }
        if let Some(p) = failures_path {
            println!("失败清单已写入 — failure list written: {}", p.display());
        }
    }
    if opts.json
        && let Ok(line) = serde_json::to_string(&summary_json(outcome, failures_path))
    {
        println!("{}", line);
    }
}

/// Count and volume per tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierCount {
    pub label: String,
    pub range: String,
    pub count: usize,
    pub bytes: u64,
}

pub fn tier_breakdown(tiers: &TierTable, sizes: impl IntoIterator<Item = u64>) -> Vec<TierCount> {
    let mut out: Vec<TierCount> = tiers
        .tiers()
        .iter()
        .map(|t| TierCount { label: t.label.clone(), range: t.range_display(), count: 0, bytes: 0 })
        .collect();
    for size in sizes {
        let label = &tiers.classify(size).label;
        if let Some(row) = out.iter_mut().find(|r| &r.label == label) {
            row.count += 1;
            row.bytes += size;
        }
    }
    out
}

pub fn print_tier_breakdown(rows: &[TierCount]) {
    let title = vec![
        "Tier".cell().bold(true),
        "Range".cell().bold(true),
        "Files".cell().bold(true),
        "Size".cell().bold(true),
    ];
    let mut table: Vec<Vec<CellStruct>> = rows
        .iter()
        .map(|r| {
            vec![
                r.label.as_str().cell(),
                r.range.as_str().cell(),
                r.count.cell().justify(Justify::Right),
                human_bytes(r.bytes).cell().justify(Justify::Right),
            ]
        })
        .collect();
    let total_files: usize = rows.iter().map(|r| r.count).sum();
    let total_bytes: u64 = rows.iter().map(|r| r.bytes).sum();
    table.push(vec![
        "total".cell().bold(true),
        "".cell(),
        total_files.cell().justify(Justify::Right).bold(true),
        human_bytes(total_bytes).cell().justify(Justify::Right).bold(true),
    ]);
    if let Err(e) = print_stdout(table.table().title(title)) {
        tracing::debug!("[report] table print failed: {}", e);
    }
}
