// executor module: bounded worker pool over planned jobs with log-based resume
mod runner;
mod stats;

pub use runner::{CommandRunner, JobRunner};
pub use stats::{ActiveJob, JobResult, Outcome, RunStats};

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::error::JobError;
use crate::job::{PlannedJob, TransferJob};
use crate::resume::ResumeOracle;

/// Upper bound on worker threads regardless of configuration.
pub const MAX_PARALLELISM: usize = 64;

/// Executor → reporter notifications. Each carries the counters as they
/// were right after the change, so the reporter never has to lock.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Started { ordinal: usize, display_path: String, tier_label: String, size_bytes: u64 },
    Finished { result: JobResult, display_path: String, stats: RunStats },
}

/// Everything guarded by the run lock. Held only for in-memory updates,
/// never across a child process wait.
#[derive(Debug, Default)]
struct RunState {
    stats: RunStats,
    active: BTreeMap<usize, ActiveJob>,
    interrupted: bool,
    last_dispatched: Option<usize>,
    results: Vec<JobResult>,
    failures: Vec<(TransferJob, JobError)>,
    not_started: Vec<usize>,
}

type SharedState = Arc<Mutex<RunState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, RunState> {
    // a worker panic is caught before it can poison the lock; tolerate it anyway
    state.lock().unwrap_or_else(|p| p.into_inner())
}

/// Stops dispatch of new jobs. Cloneable and safe to call from a signal
/// handler thread; jobs already running are drained, not killed.
#[derive(Clone)]
pub struct InterruptHandle {
    state: SharedState,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        let mut st = lock(&self.state);
        if !st.interrupted {
            st.interrupted = true;
            tracing::warn!(
                "[exec] interrupt received; {} job(s) still running will be allowed to finish",
                st.active.len()
            );
        }
    }

    pub fn is_interrupted(&self) -> bool {
        lock(&self.state).interrupted
    }
}

/// Read-only view for the reporter's periodic active-job table.
#[derive(Clone)]
pub struct RunMonitor {
    state: SharedState,
}

impl RunMonitor {
    pub fn snapshot(&self) -> (RunStats, Vec<ActiveJob>) {
        let st = lock(&self.state);
        (st.stats, st.active.values().cloned().collect())
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub stats: RunStats,
    /// In completion order.
    pub results: Vec<JobResult>,
    pub failures: Vec<(TransferJob, JobError)>,
    pub interrupted: bool,
    /// Highest ordinal that entered `Running`.
    pub last_dispatched: Option<usize>,
    /// Ordinals never dispatched because of an interrupt, ascending.
    pub not_started: Vec<usize>,
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Ordinal to pass as `--start-from` to continue an interrupted run.
    pub fn resume_point(&self) -> Option<usize> {
        self.not_started.first().copied()
    }
}

pub struct Executor {
    parallelism: usize,
    runner: Arc<dyn JobRunner>,
    oracle: Arc<dyn ResumeOracle>,
    events: Option<Sender<RunEvent>>,
    state: SharedState,
}

impl Executor {
    pub fn new(
        parallelism: usize,
        runner: Arc<dyn JobRunner>,
        oracle: Arc<dyn ResumeOracle>,
    ) -> Self {
        Self {
            parallelism: parallelism.clamp(1, MAX_PARALLELISM),
            runner,
            oracle,
            events: None,
            state: Arc::new(Mutex::new(RunState::default())),
        }
    }

    pub fn with_events(mut self, tx: Sender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle { state: self.state.clone() }
    }

    pub fn monitor(&self) -> RunMonitor {
        RunMonitor { state: self.state.clone() }
    }

    /// Run every job to a terminal state (or stop dispatching on interrupt)
    /// and block until the pool has drained.
    ///
    /// Counters start from zero on every call. An interrupt raised before
    /// the call is honoured: nothing is dispatched.
    pub fn run(&self, jobs: Vec<PlannedJob>) -> RunOutcome {
        let total = jobs.len();
        {
            let mut st = lock(&self.state);
            let interrupted = st.interrupted;
            *st = RunState { stats: RunStats::new(total), interrupted, ..RunState::default() };
        }
        let start = Instant::now();
        tracing::info!("[exec] run start: {} job(s), parallelism {}", total, self.parallelism);

        let (tx, rx) = unbounded::<PlannedJob>();
        for j in jobs {
            let _ = tx.send(j);
        }
        drop(tx);

        let workers = self.parallelism.min(total.max(1));
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let ctx = WorkerCtx {
                worker_id,
                rx: rx.clone(),
                runner: self.runner.clone(),
                oracle: self.oracle.clone(),
                events: self.events.clone(),
                state: self.state.clone(),
            };
            handles.push(std::thread::spawn(move || worker_loop(ctx)));
        }
        for h in handles {
            if h.join().is_err() {
                tracing::error!("[exec] worker thread panicked outside a job");
            }
        }

        let mut st = lock(&self.state);
        // whatever is left in the queue was never picked up
        st.not_started.extend(rx.try_iter().map(|p| p.job.ordinal));
        st.not_started.sort_unstable();
        let outcome = RunOutcome {
            stats: st.stats,
            results: std::mem::take(&mut st.results),
            failures: std::mem::take(&mut st.failures),
            interrupted: st.interrupted,
            last_dispatched: st.last_dispatched,
            not_started: std::mem::take(&mut st.not_started),
            elapsed: start.elapsed(),
        };
        tracing::info!(
            "[exec] run end: completed={} failed={} skipped={} interrupted={}",
            outcome.stats.completed,
            outcome.stats.failed,
            outcome.stats.skipped,
            outcome.interrupted
        );
        outcome
    }
}

struct WorkerCtx {
    worker_id: usize,
    rx: Receiver<PlannedJob>,
    runner: Arc<dyn JobRunner>,
    oracle: Arc<dyn ResumeOracle>,
    events: Option<Sender<RunEvent>>,
    state: SharedState,
}

impl WorkerCtx {
    fn emit(&self, ev: RunEvent) {
        if let Some(ref tx) = self.events {
            // reporter gone: keep working, reporting is best-effort
            let _ = tx.send(ev);
        }
    }

    fn finish(&self, planned: &PlannedJob, result: JobResult) {
        let stats = {
            let mut st = lock(&self.state);
            st.active.remove(&result.ordinal);
            st.stats.record(&result);
            if let Outcome::Failed(ref e) = result.outcome {
                st.failures.push((planned.job.clone(), e.clone()));
            }
            st.results.push(result.clone());
            st.stats
        };
        self.emit(RunEvent::Finished {
            result,
            display_path: planned.job.display_path.clone(),
            stats,
        });
    }
}

fn worker_loop(ctx: WorkerCtx) {
    loop {
        if lock(&ctx.state).interrupted {
            break;
        }
        let Ok(planned) = ctx.rx.recv() else {
            break;
        };
        let job = &planned.job;

        // Pending -> Skipped; the log read happens outside the lock
        if ctx.oracle.is_already_done(&job.log_path) {
            tracing::debug!(
                "[exec] worker_id={} skip ordinal={} (log shows done)",
                ctx.worker_id,
                job.ordinal
            );
            let result = JobResult {
                ordinal: job.ordinal,
                outcome: Outcome::SkippedAlreadyDone,
                elapsed: Duration::ZERO,
                size_bytes: job.size_bytes,
            };
            ctx.finish(&planned, result);
            continue;
        }

        // Pending -> Running, decided under the same lock the interrupt takes
        let started = Instant::now();
        {
            let mut st = lock(&ctx.state);
            if st.interrupted {
                st.not_started.push(job.ordinal);
                break;
            }
            st.active.insert(
                job.ordinal,
                ActiveJob {
                    ordinal: job.ordinal,
                    display_path: job.display_path.clone(),
                    tier_label: job.tier_label.clone(),
                    size_bytes: job.size_bytes,
                    started,
                },
            );
            st.last_dispatched =
                Some(st.last_dispatched.map_or(job.ordinal, |o| o.max(job.ordinal)));
        }
        tracing::debug!(
            "[exec] worker_id={} start ordinal={} tier={} size={}",
            ctx.worker_id,
            job.ordinal,
            job.tier_label,
            job.size_bytes
        );
        ctx.emit(RunEvent::Started {
            ordinal: job.ordinal,
            display_path: job.display_path.clone(),
            tier_label: job.tier_label.clone(),
            size_bytes: job.size_bytes,
        });

        let res = std::panic::catch_unwind(AssertUnwindSafe(|| ctx.runner.run(&planned)))
            .unwrap_or_else(|payload| Err(JobError::Fault(panic_message(payload.as_ref()))));
        let outcome = match res {
            Ok(()) => Outcome::Completed,
            Err(e) => {
                tracing::debug!(
                    "[exec] worker_id={} ordinal={} failed: {}",
                    ctx.worker_id,
                    job.ordinal,
                    e
                );
                Outcome::Failed(e)
            }
        };
        let result = JobResult {
            ordinal: job.ordinal,
            outcome,
            elapsed: started.elapsed(),
            size_bytes: job.size_bytes,
        };
        ctx.finish(&planned, result);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic in job runner".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Invocation;
    use crate::resume::NeverDone;
    use std::path::PathBuf;

    struct PanicRunner;
    impl JobRunner for PanicRunner {
        fn run(&self, _planned: &PlannedJob) -> Result<(), JobError> {
            panic!("runner blew up");
        }
    }

    fn planned(ordinal: usize) -> PlannedJob {
        PlannedJob {
            job: TransferJob {
                ordinal,
                source_path: format!("s:f{}", ordinal),
                destination_path: format!("d:f{}", ordinal),
                display_path: format!("f{}", ordinal),
                size_bytes: 10,
                tier_label: "tiny".to_string(),
                log_path: PathBuf::from(format!("/nonexistent/transfer_{}.log", ordinal)),
            },
            invocation: Invocation { program: PathBuf::from("true"), args: vec![] },
        }
    }

    #[test]
    fn runner_panic_becomes_fault() {
        let ex = Executor::new(2, Arc::new(PanicRunner), Arc::new(NeverDone));
        let out = ex.run(vec![planned(1), planned(2)]);
        assert_eq!(out.stats.failed, 2);
        assert!(out.failures.iter().all(|(_, e)| matches!(e, JobError::Fault(m) if m.contains("blew up"))));
        assert!(!out.interrupted);
    }

    #[test]
    fn interrupt_before_run_dispatches_nothing() {
        let ex = Executor::new(3, Arc::new(PanicRunner), Arc::new(NeverDone));
        ex.interrupt_handle().interrupt();
        let out = ex.run((1..=4).map(planned).collect());
        assert_eq!(out.stats.terminal(), 0);
        assert_eq!(out.not_started, vec![1, 2, 3, 4]);
        assert_eq!(out.resume_point(), Some(1));
        assert_eq!(out.last_dispatched, None);
    }

    #[test]
    fn parallelism_is_clamped() {
        let ex = Executor::new(0, Arc::new(PanicRunner), Arc::new(NeverDone));
        assert_eq!(ex.parallelism(), 1);
        let ex = Executor::new(1000, Arc::new(PanicRunner), Arc::new(NeverDone));
        assert_eq!(ex.parallelism(), MAX_PARALLELISM);
    }
}
