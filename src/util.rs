use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::JobError;
use crate::job::TransferJob;

/// Try to enable ANSI escape sequence support on Windows consoles.
/// Returns true if enabling succeeded, false otherwise.
#[cfg(windows)]
pub fn try_enable_ansi_on_windows() -> bool {
    enable_ansi_support::enable_ansi_support().is_ok()
}

#[cfg(not(windows))]
pub fn try_enable_ansi_on_windows() -> bool {
    false
}

/// Convert a byte count into a human readable string using IEC units (KiB/MiB/GiB/TiB).
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    const TB: f64 = GB * 1024.0;
    let b = bytes as f64;
    if b >= TB {
        format!("{:.2} TiB", b / TB)
    } else if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// `12.3s`, `4m 05s`, `2h 03m 09s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Throughput in MiB/s; zero when no time has elapsed.
pub fn mib_per_sec(bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 { bytes as f64 / 1024.0 / 1024.0 / elapsed_secs } else { 0.0 }
}

/// Install the global tracing subscriber.
///
/// stderr always gets the `EnvFilter` layer (`RUST_LOG`, default `warn`).
/// With `verbose`, a debug-level file log is also written to
/// `<log_dir>/tierlift.log`; keep the returned guard alive until exit or
/// the tail of the file is lost.
pub fn init_logging(verbose: bool, log_dir: &Path) -> Result<Option<WorkerGuard>> {
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    if !verbose {
        tracing_subscriber::registry()
            .with(stderr_layer.with_filter(stderr_filter))
            .try_init()
            .map_err(|e| anyhow::anyhow!("logging init failed: {}", e))?;
        return Ok(None);
    }

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("无法创建日志目录 {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::never(log_dir, "tierlift.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_filter(EnvFilter::new("tierlift=debug,tl=debug"));
    tracing_subscriber::registry()
        .with(stderr_layer.with_filter(stderr_filter))
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("logging init failed: {}", e))?;
    Ok(Some(guard))
}

/// Write failed jobs as JSON Lines to `<log_dir>/failures_<UTC>.jsonl`.
/// Returns the path written, or None when there is nothing to write or the
/// file could not be created.
pub fn write_failures_jsonl(
    log_dir: &Path,
    failures: &[(TransferJob, JobError)],
) -> Option<PathBuf> {
    if failures.is_empty() {
        return None;
    }
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        tracing::warn!("cannot create {}: {}", log_dir.display(), e);
        return None;
    }
    let path = log_dir.join(format!("failures_{}.jsonl", Utc::now().format("%Y%m%dT%H%M%SZ")));
    let mut f = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("cannot write failure report {}: {}", path.display(), e);
            return None;
        }
    };
    for (job, err) in failures {
        let mut obj = serde_json::json!({
            "ordinal": job.ordinal,
            "source": job.source_path,
            "destination": job.destination_path,
            "size_bytes": job.size_bytes,
            "tier": job.tier_label,
            "log": job.log_path.to_string_lossy(),
            "variant": err.variant(),
            "message": err.to_string(),
        });
        if let JobError::Exit(Some(code)) = err {
            obj["exit_code"] = serde_json::json!(code);
        }
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(f, "{}", line);
        }
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.50 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.00 MiB");
        assert_eq!(human_bytes(3 * 1024 * 1024 * 1024), "3.00 GiB");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_millis(12_340)), "12.3s");
        assert_eq!(format_duration(Duration::from_secs(245)), "4m 05s");
        assert_eq!(format_duration(Duration::from_secs(7389)), "2h 03m 09s");
    }

    #[test]
    fn failure_report_lines() {
        let dir = tempfile::tempdir().unwrap();
        let job = TransferJob {
            ordinal: 7,
            source_path: "src:a b.txt".into(),
            destination_path: "dst:a b.txt".into(),
            display_path: "a b.txt".into(),
            size_bytes: 3,
            tier_label: "tiny".into(),
            log_path: dir.path().join("transfer_7.log"),
        };
        assert!(write_failures_jsonl(dir.path(), &[]).is_none());
        let p = write_failures_jsonl(
            dir.path(),
            &[(job.clone(), JobError::Exit(Some(5))), (job, JobError::Launch("nope".into()))],
        )
        .expect("report written");
        let text = std::fs::read_to_string(p).unwrap();
        let lines: Vec<serde_json::Value> =
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["variant"], "JobExitError");
        assert_eq!(lines[0]["exit_code"], 5);
        assert_eq!(lines[1]["variant"], "JobLaunchError");
        assert_eq!(lines[1]["source"], "src:a b.txt");
    }
}
