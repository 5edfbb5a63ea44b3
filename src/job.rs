//! Job builder: entries + tier table + path translator → immutable transfer
//! jobs, and the explicit mapping from a job to its subprocess arguments.
//!
//! Building is pure: nothing is written and nothing is spawned here.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::catalog::Entry;
use crate::error::TranslationError;
use crate::tier::TierTable;
use crate::translate::PathTranslator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferJob {
    /// 1-based position in the job list; never reused within a run.
    pub ordinal: usize,
    pub source_path: String,
    pub destination_path: String,
    /// Path shown to the operator (relative to the source root).
    pub display_path: String,
    pub size_bytes: u64,
    pub tier_label: String,
    pub log_path: PathBuf,
}

/// Log location is a pure function of the ordinal, so the resume check
/// never needs a side table.
pub fn log_path_for(log_dir: &Path, ordinal: usize) -> PathBuf {
    log_dir.join(format!("transfer_{}.log", ordinal))
}

#[derive(Debug, Default)]
pub struct BuildOutput {
    pub jobs: Vec<TransferJob>,
    pub rejected: Vec<(Entry, TranslationError)>,
}

pub struct JobBuilder<'a> {
    translator: &'a PathTranslator,
    tiers: &'a TierTable,
    log_dir: PathBuf,
}

impl<'a> JobBuilder<'a> {
    pub fn new(translator: &'a PathTranslator, tiers: &'a TierTable, log_dir: &Path) -> Self {
        Self { translator, tiers, log_dir: log_dir.to_path_buf() }
    }

    /// Ordinals follow the order of `entries`; callers sort beforehand.
    /// Malformed entries are skipped with a warning and do not consume an ordinal.
    pub fn build(&self, entries: &[Entry]) -> BuildOutput {
        let mut out = BuildOutput::default();
        for entry in entries {
            let paths = self
                .translator
                .source_path(entry)
                .and_then(|src| self.translator.translate(entry).map(|dst| (src, dst)));
            let (source_path, destination_path) = match paths {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("[build] skipping entry {:?}: {}", entry.display_path(), e);
                    out.rejected.push((entry.clone(), e));
                    continue;
                }
            };
            let ordinal = out.jobs.len() + 1;
            let display_path = self
                .translator
                .relative(entry)
                .map(|r| r.join("/"))
                .unwrap_or_else(|_| entry.display_path());
            out.jobs.push(TransferJob {
                ordinal,
                source_path,
                destination_path,
                display_path,
                size_bytes: entry.size_bytes,
                tier_label: self.tiers.classify(entry.size_bytes).label.clone(),
                log_path: log_path_for(&self.log_dir, ordinal),
            });
        }
        out
    }
}

/// Program plus argument list; never a concatenated shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    /// Render for the job list file. Arguments with spaces or quotes are
    /// double-quoted (inner `"` and `\` escaped with `\`).
    pub fn to_command_line(&self) -> String {
        let mut parts = vec![quote_arg(&self.program.to_string_lossy())];
        parts.extend(self.args.iter().map(|a| quote_arg(a)));
        parts.join(" ")
    }
}

fn quote_arg(a: &str) -> String {
    let needs = a.is_empty() || a.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\');
    if !needs {
        return a.to_string();
    }
    let mut s = String::with_capacity(a.len() + 2);
    s.push('"');
    for c in a.chars() {
        if c == '"' || c == '\\' {
            s.push('\\');
        }
        s.push(c);
    }
    s.push('"');
    s
}

/// Everything needed to turn a job into an rclone invocation.
#[derive(Debug, Clone)]
pub struct InvocationSettings {
    pub program: PathBuf,
    pub rclone_config: Option<PathBuf>,
    /// `copyto` copies one file to an exact destination path.
    pub verb: String,
    pub common_flags: Vec<String>,
}

impl InvocationSettings {
    pub fn invocation(&self, job: &TransferJob, tiers: &TierTable) -> Invocation {
        let mut args = Vec::new();
        if let Some(ref cfg) = self.rclone_config {
            args.push(format!("--config={}", cfg.display()));
        }
        args.push(self.verb.clone());
        args.push(job.source_path.clone());
        args.push(job.destination_path.clone());
        if let Some(tier) = tiers.get(&job.tier_label) {
            args.extend(tier.profile.to_args());
        }
        args.extend(self.common_flags.iter().cloned());
        args.push("--log-level".to_string());
        args.push("INFO".to_string());
        args.push(format!("--log-file={}", job.log_path.display()));
        Invocation { program: self.program.clone(), args }
    }
}

/// A job together with the exact process it will run.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub job: TransferJob,
    pub invocation: Invocation,
}

pub fn plan(
    jobs: Vec<TransferJob>,
    settings: &InvocationSettings,
    tiers: &TierTable,
) -> Vec<PlannedJob> {
    jobs.into_iter()
        .map(|job| {
            let invocation = settings.invocation(&job, tiers);
            PlannedJob { job, invocation }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::MIB;
    use crate::translate::{BaseFolderPolicy, RemoteRoot};

    fn translator() -> PathTranslator {
        PathTranslator::new(
            RemoteRoot::parse("remote:base").unwrap(),
            RemoteRoot::parse("other:out/").unwrap(),
            BaseFolderPolicy::Strip,
        )
    }

    fn settings() -> InvocationSettings {
        InvocationSettings {
            program: PathBuf::from("rclone"),
            rclone_config: Some(PathBuf::from("/content/rclone.conf")),
            verb: "copyto".to_string(),
            common_flags: vec!["--retries=10".to_string()],
        }
    }

    #[test]
    fn ascending_sizes_map_to_ascending_tiers() {
        let t = translator();
        let tiers = TierTable::default();
        let mb = |x: f64| (x * MIB as f64) as u64;
        let entries: Vec<Entry> = [0.5, 5.0, 50.0, 500.0, 5000.0]
            .iter()
            .enumerate()
            .map(|(i, s)| Entry::from_path(&format!("f{}.bin", i), mb(*s)))
            .collect();
        let out = JobBuilder::new(&t, &tiers, Path::new("logs")).build(&entries);
        let labels: Vec<_> = out.jobs.iter().map(|j| j.tier_label.as_str()).collect();
        assert_eq!(labels, vec!["tiny", "small", "medium", "large", "huge"]);
        let ords: Vec<_> = out.jobs.iter().map(|j| j.ordinal).collect();
        assert_eq!(ords, vec![1, 2, 3, 4, 5]);
        assert_eq!(out.jobs[2].log_path, PathBuf::from("logs").join("transfer_3.log"));
    }

    #[test]
    fn malformed_entries_do_not_consume_ordinals() {
        let t = translator();
        let tiers = TierTable::default();
        let entries = vec![
            Entry::from_path("a.txt", 1),
            Entry::new(vec![], 1),
            Entry::from_path("x//y", 1),
            Entry::from_path("b.txt", 1),
        ];
        let out = JobBuilder::new(&t, &tiers, Path::new("logs")).build(&entries);
        assert_eq!(out.jobs.len(), 2);
        assert_eq!(out.rejected.len(), 2);
        assert_eq!(out.jobs[1].ordinal, 2);
        assert_eq!(out.jobs[1].destination_path, "other:out/b.txt");
        assert_eq!(out.jobs[1].source_path, "remote:base/b.txt");
    }

    #[test]
    fn invocation_is_an_argument_list() {
        let t = translator();
        let tiers = TierTable::default();
        let out = JobBuilder::new(&t, &tiers, Path::new("logs"))
            .build(&[Entry::from_path("dir with space/f \"q\".txt", 10)]);
        let inv = settings().invocation(&out.jobs[0], &tiers);
        assert_eq!(inv.args[0], "--config=/content/rclone.conf");
        assert_eq!(inv.args[1], "copyto");
        assert_eq!(inv.args[2], "remote:base/dir with space/f \"q\".txt");
        assert_eq!(inv.args[3], "other:out/dir with space/f \"q\".txt");
        assert!(inv.args.contains(&"--transfers=200".to_string()));
        assert!(inv.args.contains(&"--retries=10".to_string()));
        let log_arg = format!("--log-file={}", out.jobs[0].log_path.display());
        assert_eq!(inv.args.last(), Some(&log_arg));
        let line = inv.to_command_line();
        assert!(line.starts_with("rclone --config=/content/rclone.conf copyto \"remote:base/dir"));
        assert!(line.contains("f \\\"q\\\".txt\""));
    }
}
