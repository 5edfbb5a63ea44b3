//! Job list files: the optional on-disk hand-off between planning and
//! execution.
//!
//! Shape, per job:
//!
//! ```text
//! # File <ordinal>: <display_path> (<size> MB) - <bytes> B
//! !rclone <args...>
//! ```
//!
//! The reader tokenizes command lines itself (double quotes group, `\`
//! escapes inside quotes); no shell is ever involved.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

use crate::error::JobListError;
use crate::job::{Invocation, PlannedJob, TransferJob, log_path_for};
use crate::tier::{MIB, TierTable};

/// Leading marker of a command line.
pub const COMMAND_MARKER: char = '!';

/// Job list kept next to the logs, recording which transfer each ordinal
/// named the last time jobs were built for that directory.
pub const MANIFEST_FILE: &str = "jobs_manifest.txt";

const TRANSFER_VERBS: &[&str] = &["copy", "copyto", "move", "moveto", "sync"];

pub struct JobListHeader<'a> {
    pub title: &'a str,
    pub source: &'a str,
    pub destination: &'a str,
    pub ordering: &'a str,
}

pub fn size_mb(bytes: u64) -> f64 {
    (bytes as f64 / MIB as f64 * 100.0).round() / 100.0
}

pub fn write_job_list(
    path: &Path,
    header: &JobListHeader<'_>,
    jobs: &[PlannedJob],
) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = std::io::BufWriter::new(std::fs::File::create(path)?);
    writeln!(f, "# tierlift job list - {}", header.title)?;
    writeln!(f, "# Generated on: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(f, "# Source: {}", header.source)?;
    writeln!(f, "# Destination: {}", header.destination)?;
    writeln!(f, "# Total jobs: {}", jobs.len())?;
    writeln!(f, "# Ordering: {}", header.ordering)?;
    writeln!(f)?;
    for p in jobs {
        writeln!(
            f,
            "# File {}: {} ({} MB) - {} B",
            p.job.ordinal,
            p.job.display_path,
            size_mb(p.job.size_bytes),
            p.job.size_bytes
        )?;
        writeln!(f, "{}{}", COMMAND_MARKER, p.invocation.to_command_line())?;
        writeln!(f)?;
    }
    f.flush()
}

fn file_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // display path may itself contain parentheses; the size group is the last one.
        // The MB figure is rounded, so an exact `- <bytes> B` suffix wins when present.
        Regex::new(
            r"^#\s*(?:\w+\s+)?File\s+(\d+):\s*(.*)\s+\((\d+(?:\.\d+)?)\s*MB\)(?:\s+-\s+(\d+)\s*B|\s+-\s+.*)?$",
        )
        .expect("valid file comment regex")
    })
}

/// Split a command line into arguments.
pub fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_token = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        None => return Err("unterminated quote".to_string()),
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(esc @ ('"' | '\\')) => cur.push(esc),
                            Some(other) => {
                                cur.push('\\');
                                cur.push(other);
                            }
                            None => return Err("unterminated quote".to_string()),
                        },
                        Some(other) => cur.push(other),
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    out.push(std::mem::take(&mut cur));
                    in_token = false;
                }
            }
            other => {
                in_token = true;
                cur.push(other);
            }
        }
    }
    if in_token {
        out.push(cur);
    }
    Ok(out)
}

struct PendingComment {
    display: String,
    size_bytes: u64,
}

/// Read a job list back into planned jobs. Ordinals are the 1-based
/// position of each command line in the file.
///
/// A command without `--log-file=` gets one derived from `log_dir`; the
/// shell redirect form `> file 2>&1` is also recognised and turned into the
/// job's log path.
pub fn read_job_list(
    path: &Path,
    tiers: &TierTable,
    log_dir: &Path,
) -> Result<Vec<PlannedJob>, JobListError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| JobListError::Io(path.display().to_string(), e.to_string()))?;
    parse_job_list(&text, tiers, log_dir)
}

pub fn parse_job_list(
    text: &str,
    tiers: &TierTable,
    log_dir: &Path,
) -> Result<Vec<PlannedJob>, JobListError> {
    let mut jobs = Vec::new();
    let mut pending: Option<PendingComment> = None;
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if let Some(caps) = file_comment_re().captures(line) {
            let exact = caps.get(4).and_then(|m| m.as_str().parse::<u64>().ok());
            let size_bytes = exact.unwrap_or_else(|| {
                let mb: f64 = caps[3].parse().unwrap_or(0.0);
                (mb * MIB as f64).round() as u64
            });
            pending = Some(PendingComment { display: caps[2].trim().to_string(), size_bytes });
            continue;
        }
        let Some(cmd) = line.strip_prefix(COMMAND_MARKER) else {
            continue;
        };
        let tokens =
            tokenize(cmd).map_err(|reason| JobListError::BadCommand { line: line_no, reason })?;
        let ordinal = jobs.len() + 1;
        let comment = pending.take();
        jobs.push(planned_from_tokens(tokens, ordinal, comment, tiers, log_dir).map_err(
            |reason| JobListError::BadCommand { line: line_no, reason },
        )?);
    }
    Ok(jobs)
}

fn planned_from_tokens(
    tokens: Vec<String>,
    ordinal: usize,
    comment: Option<PendingComment>,
    tiers: &TierTable,
    log_dir: &Path,
) -> Result<PlannedJob, String> {
    let mut iter = tokens.into_iter();
    let program = iter.next().ok_or_else(|| "empty command".to_string())?;
    let mut args = Vec::new();
    let mut log_path: Option<PathBuf> = None;
    while let Some(tok) = iter.next() {
        if tok == ">" || tok == ">>" {
            let target = iter.next().ok_or_else(|| "redirect without a file".to_string())?;
            log_path = Some(PathBuf::from(target));
            continue;
        }
        if let Some(target) = tok.strip_prefix(">>").or_else(|| tok.strip_prefix('>'))
            && !target.is_empty()
            && !target.starts_with('&')
        {
            log_path = Some(PathBuf::from(target));
            continue;
        }
        if tok == "2>&1" {
            continue;
        }
        if let Some(p) = tok.strip_prefix("--log-file=") {
            log_path = Some(PathBuf::from(p));
        }
        args.push(tok);
    }

    let verb_at = args
        .iter()
        .position(|a| TRANSFER_VERBS.contains(&a.as_str()))
        .ok_or_else(|| "no transfer verb (copy/copyto/move/moveto/sync)".to_string())?;
    let source_path =
        args.get(verb_at + 1).cloned().ok_or_else(|| "missing source".to_string())?;
    let destination_path =
        args.get(verb_at + 2).cloned().ok_or_else(|| "missing destination".to_string())?;

    let log_path = match log_path {
        Some(p) => {
            if !args.iter().any(|a| a.starts_with("--log-file=")) {
                args.push(format!("--log-file={}", p.display()));
            }
            p
        }
        None => {
            let p = log_path_for(log_dir, ordinal);
            args.push(format!("--log-file={}", p.display()));
            p
        }
    };

    let (display_path, size_bytes) = match comment {
        Some(c) => (c.display, c.size_bytes),
        None => {
            let shown = source_path.split_once(':').map(|(_, p)| p).unwrap_or(&source_path);
            (shown.to_string(), 0)
        }
    };
    let job = TransferJob {
        ordinal,
        source_path,
        destination_path,
        display_path,
        size_bytes,
        tier_label: tiers.classify(size_bytes).label.clone(),
        log_path,
    };
    Ok(PlannedJob { job, invocation: Invocation { program: PathBuf::from(program), args } })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    /// Logs moved to the ordinal their transfer has now.
    pub moved: usize,
    /// Logs that belonged to no transfer of the new plan, removed.
    pub dropped: usize,
}

fn io_err(path: &Path, e: std::io::Error) -> JobListError {
    JobListError::Io(path.display().to_string(), e.to_string())
}

fn parked_name(log: &Path) -> PathBuf {
    let mut s = log.as_os_str().to_os_string();
    s.push(".moving");
    PathBuf::from(s)
}

/// Line the logs in `log_dir` up with `jobs` before the resume check reads
/// them, then record `jobs` as the new manifest.
///
/// Logs are named by ordinal only. Where an ordinal now names another
/// transfer than in the previous manifest, its log follows its transfer to
/// the new ordinal, or is removed when that transfer is gone. A log for an
/// ordinal the previous manifest does not know (or with no manifest at all)
/// has unknown origin and is removed.
pub fn reconcile_manifest(
    log_dir: &Path,
    header: &JobListHeader<'_>,
    jobs: &[PlannedJob],
) -> Result<Reconciled, JobListError> {
    if jobs.is_empty() {
        return Ok(Reconciled::default());
    }
    let manifest = log_dir.join(MANIFEST_FILE);
    let previous = if manifest.exists() {
        read_job_list(&manifest, &TierTable::untiered(), log_dir)?
    } else {
        Vec::new()
    };
    let previous_at = |ordinal: usize| {
        ordinal.checked_sub(1).and_then(|i| previous.get(i)).filter(|p| p.job.ordinal == ordinal)
    };
    let key = |j: &TransferJob| (j.source_path.clone(), j.destination_path.clone());

    // two passes, so swapped ordinals never overwrite each other's logs
    let mut parked: HashMap<(String, String), PathBuf> = HashMap::new();
    let mut orphans = Vec::new();
    for p in jobs {
        let old = previous_at(p.job.ordinal);
        if old.is_some_and(|o| key(&o.job) == key(&p.job) && o.job.log_path == p.job.log_path) {
            continue;
        }
        let old_log = old.map_or(&p.job.log_path, |o| &o.job.log_path);
        if !old_log.exists() {
            continue;
        }
        let tmp = parked_name(old_log);
        std::fs::rename(old_log, &tmp).map_err(|e| io_err(old_log, e))?;
        match old {
            Some(o) => {
                parked.insert(key(&o.job), tmp);
            }
            None => orphans.push(tmp),
        }
    }

    let mut report = Reconciled::default();
    for p in jobs {
        if let Some(tmp) = parked.remove(&key(&p.job)) {
            std::fs::rename(&tmp, &p.job.log_path).map_err(|e| io_err(&p.job.log_path, e))?;
            tracing::debug!(
                "[manifest] log of {} moved to ordinal {}",
                p.job.display_path,
                p.job.ordinal
            );
            report.moved += 1;
        }
    }
    for tmp in parked.into_values().chain(orphans) {
        std::fs::remove_file(&tmp).map_err(|e| io_err(&tmp, e))?;
        report.dropped += 1;
    }

    write_job_list(&manifest, header, jobs).map_err(|e| io_err(&manifest, e))?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_handles_quotes_and_escapes() {
        let t = tokenize(r#"rclone copy "a b/c.txt" "x:\"q\"\\z" --flag=1"#).unwrap();
        assert_eq!(t, vec!["rclone", "copy", "a b/c.txt", "x:\"q\"\\z", "--flag=1"]);
        assert!(tokenize("rclone \"open").is_err());
        assert_eq!(tokenize("a\"\"").unwrap(), vec!["a"]);
        assert_eq!(tokenize("\"\"").unwrap(), vec![""]);
    }

    #[test]
    fn parses_comment_and_command_shape() {
        let text = r#"# Rclone Copy Commands - LARGEST FILES FIRST
# Total files: 2

# File 1: Work Files/big (1).iso (1536.5 MB)
!rclone --config=/content/rclone.conf copy -P "onedrive:Work Files/big (1).iso" "drivemig:Data_Migration/Work Files/big (1).iso" --transfers=64 --log-level INFO --log-file=/tmp/logs/rclone_output.log

# File 2: notes.txt (0.01 MB) - TINY optimization
!rclone --config=/content/rclone20.conf copy -P "s1:notes.txt" "d1:all/notes.txt" --fast-list > rclone_output01.log 2>&1
"#;
        let tiers = TierTable::default();
        let jobs = parse_job_list(text, &tiers, Path::new("logs")).unwrap();
        assert_eq!(jobs.len(), 2);

        let a = &jobs[0].job;
        assert_eq!(a.ordinal, 1);
        assert_eq!(a.display_path, "Work Files/big (1).iso");
        assert_eq!(a.source_path, "onedrive:Work Files/big (1).iso");
        assert_eq!(a.tier_label, "huge");
        assert_eq!(a.log_path, PathBuf::from("/tmp/logs/rclone_output.log"));

        let b = &jobs[1];
        assert_eq!(b.job.destination_path, "d1:all/notes.txt");
        assert_eq!(b.job.tier_label, "tiny");
        assert_eq!(b.job.log_path, PathBuf::from("rclone_output01.log"));
        assert!(!b.invocation.args.iter().any(|a| a == ">" || a == "2>&1"));
        assert_eq!(b.invocation.args.last().unwrap(), "--log-file=rclone_output01.log");
    }

    #[test]
    fn exact_size_keeps_tier_at_boundary() {
        let text = "# File 1: near.bin (1 MB) - 1047576 B\n!rclone copyto a:near.bin b:near.bin\n";
        let jobs = parse_job_list(text, &TierTable::default(), Path::new("L")).unwrap();
        assert_eq!(jobs[0].job.size_bytes, MIB - 1000);
        assert_eq!(jobs[0].job.tier_label, "tiny");
    }

    fn jobs_for(dir: &Path, names: &[&str]) -> Vec<PlannedJob> {
        let text: String =
            names.iter().map(|n| format!("!rclone copyto s:{n} d:{n}\n")).collect();
        parse_job_list(&text, &TierTable::default(), dir).unwrap()
    }

    fn header() -> JobListHeader<'static> {
        JobListHeader { title: "t", source: "s:", destination: "d:", ordering: "listing order" }
    }

    fn log_of(dir: &Path, ordinal: usize) -> Option<String> {
        std::fs::read_to_string(log_path_for(dir, ordinal)).ok()
    }

    #[test]
    fn logs_follow_their_transfer_when_ordinals_shift() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();

        let v1 = jobs_for(dir, &["a", "b"]);
        assert_eq!(reconcile_manifest(dir, &header(), &v1).unwrap(), Reconciled::default());
        std::fs::write(log_path_for(dir, 1), "A done").unwrap();
        std::fs::write(log_path_for(dir, 2), "B done").unwrap();

        // same plan again: nothing moves
        assert_eq!(reconcile_manifest(dir, &header(), &v1).unwrap(), Reconciled::default());
        assert_eq!(log_of(dir, 1).as_deref(), Some("A done"));

        let v2 = jobs_for(dir, &["b", "new", "a"]);
        let r = reconcile_manifest(dir, &header(), &v2).unwrap();
        assert_eq!(r, Reconciled { moved: 2, dropped: 0 });
        assert_eq!(log_of(dir, 1).as_deref(), Some("B done"));
        assert_eq!(log_of(dir, 2), None);
        assert_eq!(log_of(dir, 3).as_deref(), Some("A done"));

        // "b" left the plan; its log must not vouch for "c"
        let v3 = jobs_for(dir, &["c"]);
        assert_eq!(reconcile_manifest(dir, &header(), &v3).unwrap().dropped, 1);
        assert_eq!(log_of(dir, 1), None);

        // ordinal 3 is unknown to the one-job manifest, so its old log goes
        let v4 = jobs_for(dir, &["c", "x", "y"]);
        assert_eq!(reconcile_manifest(dir, &header(), &v4).unwrap().dropped, 1);
        assert_eq!(log_of(dir, 3), None);
    }

    #[test]
    fn logs_without_a_manifest_are_not_trusted() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        std::fs::write(log_path_for(dir, 1), "Elapsed time: 1s").unwrap();
        let r = reconcile_manifest(dir, &header(), &jobs_for(dir, &["a"])).unwrap();
        assert_eq!(r.dropped, 1);
        assert!(dir.join(MANIFEST_FILE).exists());
    }

    #[test]
    fn missing_log_file_is_derived_from_ordinal() {
        let jobs = parse_job_list("!rclone copyto a:x b:y\n", &TierTable::default(), Path::new("L"))
            .unwrap();
        assert_eq!(jobs[0].job.log_path, Path::new("L").join("transfer_1.log"));
        assert_eq!(jobs[0].job.display_path, "x");
        assert_eq!(jobs[0].job.size_bytes, 0);
    }

    #[test]
    fn command_without_verb_is_rejected_with_line_number() {
        let err = parse_job_list("# header\n!rclone lsd a:\n", &TierTable::default(), Path::new("L"))
            .unwrap_err();
        match err {
            JobListError::BadCommand { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
