use std::fs::{File, OpenOptions};
use std::process::{Command, Stdio};

use crate::error::JobError;
use crate::job::PlannedJob;

/// Executes one planned job to completion. Called from worker threads.
pub trait JobRunner: Send + Sync {
    fn run(&self, planned: &PlannedJob) -> Result<(), JobError>;
}

/// Runs the job's invocation as a blocking child process.
///
/// The log file is truncated first: rclone appends to `--log-file`, and an
/// error block left by an earlier attempt would otherwise keep the job
/// "not done" forever. The child's stderr is appended to the same file;
/// stdout (the `-P` progress stream) is discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandRunner;

impl JobRunner for CommandRunner {
    fn run(&self, planned: &PlannedJob) -> Result<(), JobError> {
        let log_path = &planned.job.log_path;
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                JobError::Launch(format!("cannot create log dir {}: {}", parent.display(), e))
            })?;
        }
        File::create(log_path).map_err(|e| {
            JobError::Launch(format!("cannot reset log {}: {}", log_path.display(), e))
        })?;
        let stderr_sink = OpenOptions::new().append(true).open(log_path).map_err(|e| {
            JobError::Launch(format!("cannot open log {}: {}", log_path.display(), e))
        })?;

        let inv = &planned.invocation;
        tracing::debug!(
            "[exec][spawn] ordinal={} program={} args={}",
            planned.job.ordinal,
            inv.program.display(),
            inv.args.len()
        );
        let status = Command::new(&inv.program)
            .args(&inv.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_sink))
            .status()
            .map_err(|e| JobError::Launch(format!("{}: {}", inv.program.display(), e)))?;
        if status.success() { Ok(()) } else { Err(JobError::Exit(status.code())) }
    }
}
