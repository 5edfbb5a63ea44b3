#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tierlift::JobError;
use tierlift::executor::{CommandRunner, Executor, JobRunner};
use tierlift::job::{Invocation, PlannedJob, TransferJob, log_path_for};
use tierlift::resume::{LogScanOracle, ResumeOracle};

fn sh_job(ordinal: usize, log_dir: &Path, script: &str) -> PlannedJob {
    PlannedJob {
        job: TransferJob {
            ordinal,
            source_path: "src:a.txt".into(),
            destination_path: "dst:a.txt".into(),
            display_path: "a.txt".into(),
            size_bytes: 42,
            tier_label: "tiny".into(),
            log_path: log_path_for(log_dir, ordinal),
        },
        invocation: Invocation {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), script.into()],
        },
    }
}

const OK_SCRIPT: &str = "echo 'Transferred:   1 / 1, 100%' >&2; echo 'Elapsed time:  0.1s' >&2";

#[test]
fn success_writes_stderr_into_fresh_log() {
    let dir = tempfile::tempdir().unwrap();
    let logs = dir.path().join("logs");
    let job = sh_job(1, &logs, OK_SCRIPT);
    std::fs::create_dir_all(&logs).unwrap();
    std::fs::write(&job.job.log_path, "ERROR : stale failure from last run\n").unwrap();

    CommandRunner.run(&job).expect("job succeeds");
    let log = std::fs::read_to_string(&job.job.log_path).unwrap();
    assert!(!log.contains("stale"));
    assert!(log.contains("Elapsed time:"));
    assert!(LogScanOracle::new(true).is_already_done(&job.job.log_path));
}

#[test]
fn nonzero_exit_and_missing_program() {
    let dir = tempfile::tempdir().unwrap();
    let failing = sh_job(2, dir.path(), "echo 'ERROR : quota exceeded' >&2; exit 3");
    match CommandRunner.run(&failing) {
        Err(JobError::Exit(Some(3))) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert!(!LogScanOracle::new(false).is_already_done(&failing.job.log_path));

    let mut missing = sh_job(3, dir.path(), "");
    missing.invocation.program = PathBuf::from("/definitely/not/rclone");
    assert!(matches!(CommandRunner.run(&missing), Err(JobError::Launch(_))));
}

#[test]
fn second_run_skips_what_the_first_finished() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = || {
        vec![
            sh_job(1, dir.path(), OK_SCRIPT),
            sh_job(2, dir.path(), "exit 1"),
            sh_job(3, dir.path(), OK_SCRIPT),
        ]
    };
    let oracle = Arc::new(LogScanOracle::new(false));
    let first = Executor::new(2, Arc::new(CommandRunner), oracle.clone()).run(jobs());
    assert_eq!((first.stats.completed, first.stats.failed, first.stats.skipped), (2, 1, 0));

    let second = Executor::new(2, Arc::new(CommandRunner), oracle).run(jobs());
    assert_eq!((second.stats.completed, second.stats.failed, second.stats.skipped), (0, 1, 2));
    assert_eq!(second.failures[0].0.ordinal, 2);
}
