/// Repository-wide structured errors. Each component owns one enum; the
/// application edge wraps them in `anyhow::Error`.

/// Remote enumeration failed (or produced nothing usable).
#[derive(Debug, Clone)]
pub enum ListingError {
    /// The listing tool could not be started at all.
    Spawn(String, String),
    /// The listing tool exited nonzero and no entry was recovered.
    Failed { root: String, code: Option<i32>, stderr: String },
    /// Reading a saved listing file failed.
    Io(String, String),
}

impl std::fmt::Display for ListingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListingError::Spawn(program, msg) => {
                write!(f, "failed to start listing tool '{}': {}", program, msg)
            }
            ListingError::Failed { root, code, stderr } => {
                let code = code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
                write!(f, "listing {} failed (exit {}) with no usable output", root, code)?;
                if !stderr.is_empty() {
                    write!(f, ": {}", stderr.trim())?;
                }
                Ok(())
            }
            ListingError::Io(path, msg) => write!(f, "cannot read listing {}: {}", path, msg),
        }
    }
}

impl std::error::Error for ListingError {}

/// A single entry could not be mapped to a destination. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    /// No path segments remain to name a file.
    Empty,
    /// A segment is empty or a dot segment (`.` / `..`).
    BadSegment(String),
}

impl std::fmt::Display for TranslationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslationError::Empty => write!(f, "entry has no path segments"),
            TranslationError::BadSegment(p) => write!(f, "malformed entry path: {:?}", p),
        }
    }
}

impl std::error::Error for TranslationError {}

/// Per-job failure. Always counted as `Failed`, never aborts the run.
#[derive(Debug, Clone)]
pub enum JobError {
    /// The transfer process could not be started (or its log could not be prepared).
    Launch(String),
    /// The transfer process ran and reported failure.
    Exit(Option<i32>),
    /// The invocation panicked or otherwise faulted inside the worker.
    Fault(String),
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::Launch(msg) => write!(f, "could not launch transfer: {}", msg),
            JobError::Exit(Some(code)) => write!(f, "transfer exited with status {}", code),
            JobError::Exit(None) => write!(f, "transfer terminated by signal"),
            JobError::Fault(msg) => write!(f, "unexpected fault while running transfer: {}", msg),
        }
    }
}

impl std::error::Error for JobError {}

impl JobError {
    pub fn variant(&self) -> &'static str {
        match self {
            JobError::Launch(_) => "JobLaunchError",
            JobError::Exit(_) => "JobExitError",
            JobError::Fault(_) => "JobFault",
        }
    }
}

/// Configuration rejected before any work starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingRoot(&'static str),
    NotARemote(String),
    ZeroParallelism,
    NoTiers,
    TierGap { label: String, expected: u64, found: u64 },
    TierEmpty(String),
    TierUnboundedNotLast(String),
    TierTopBounded(String),
    DuplicateTier(String),
    Read(String, String),
    Parse(String, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ConfigError::*;
        match self {
            MissingRoot(which) => write!(f, "{} root is not configured", which),
            NotARemote(r) => write!(f, "'{}' is not a remote root (expected name:path)", r),
            ZeroParallelism => write!(f, "parallelism must be at least 1"),
            NoTiers => write!(f, "tier table is empty"),
            TierGap { label, expected, found } => write!(
                f,
                "tier '{}' starts at {} bytes but the previous tier ends at {}",
                label, found, expected
            ),
            TierEmpty(label) => write!(f, "tier '{}' has an empty range", label),
            TierUnboundedNotLast(label) => {
                write!(f, "tier '{}' is unbounded but is not the last tier", label)
            }
            TierTopBounded(label) => {
                write!(f, "last tier '{}' must have no upper bound", label)
            }
            DuplicateTier(label) => write!(f, "tier label '{}' is used twice", label),
            Read(path, msg) => write!(f, "cannot read config {}: {}", path, msg),
            Parse(path, msg) => write!(f, "invalid config {}: {}", path, msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Job list file could not be read back.
#[derive(Debug, Clone)]
pub enum JobListError {
    Io(String, String),
    /// A command line was found but its arguments do not describe a transfer.
    BadCommand { line: usize, reason: String },
}

impl std::fmt::Display for JobListError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobListError::Io(path, msg) => write!(f, "cannot read job list {}: {}", path, msg),
            JobListError::BadCommand { line, reason } => {
                write!(f, "job list line {}: {}", line, reason)
            }
        }
    }
}

impl std::error::Error for JobListError {}
