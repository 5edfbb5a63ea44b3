//! Resume oracle: decides from durable evidence alone (a job's log file)
//! whether an earlier attempt already finished the job.
//!
//! This is an at-least-once check. A job whose success marker never reached
//! disk simply runs again.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

pub trait ResumeOracle: Send + Sync {
    fn is_already_done(&self, log_path: &Path) -> bool;
}

/// Resume switched off: every job runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverDone;

impl ResumeOracle for NeverDone {
    fn is_already_done(&self, _log_path: &Path) -> bool {
        false
    }
}

/// Scans rclone's free-text log.
///
/// Any error/failure marker wins over success markers. In lenient mode a
/// log is done when it mentions `100%`, `Transferred:` or `Elapsed time:`
/// anywhere. In strict mode its last non-empty line must be the
/// `Elapsed time:` line that closes rclone's final stats block, so a
/// warning that merely quotes those strings cannot pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogScanOracle {
    pub strict: bool,
}

const SUCCESS_MARKERS: &[&str] = &["100%", "Transferred:", "Elapsed time:"];

fn error_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // whole words only: file names such as `failover.cfg` show up in "Copied" lines
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:errors?|failed|failure)\b").expect("valid error marker regex")
    })
}

fn zero_error_counter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // rclone stats counter with nothing to report, e.g. "Errors:   0"
    RE.get_or_init(|| Regex::new(r"(?i)^\s*errors:\s*0\s*$").expect("valid counter regex"))
}

impl LogScanOracle {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn has_error_marker(content: &str) -> bool {
        content
            .lines()
            .filter(|l| !zero_error_counter_re().is_match(l))
            .any(|l| error_marker_re().is_match(l))
    }

    pub fn judge(&self, content: &str) -> bool {
        if Self::has_error_marker(content) {
            return false;
        }
        if self.strict {
            content
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .is_some_and(|l| l.contains("Elapsed time:"))
        } else {
            SUCCESS_MARKERS.iter().any(|m| content.contains(m))
        }
    }
}

impl ResumeOracle for LogScanOracle {
    fn is_already_done(&self, log_path: &Path) -> bool {
        let bytes = match std::fs::read(log_path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
            Err(e) => {
                tracing::warn!("[resume] cannot read {}: {}", log_path.display(), e);
                return false;
            }
        };
        // rclone logs may carry non-UTF-8 file names
        self.judge(&String::from_utf8_lossy(&bytes))
    }
}
