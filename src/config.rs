use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::{ListingFormat, SortOrder};
use crate::error::ConfigError;
use crate::executor::MAX_PARALLELISM;
use crate::job::InvocationSettings;
use crate::resume::{LogScanOracle, NeverDone, ResumeOracle};
use crate::tier::{SizeTier, TierTable, default_tiers};
use crate::translate::{BaseFolderPolicy, PathTranslator, RemoteRoot};

pub const DEFAULT_PARALLELISM: usize = 6;

const DEFAULT_COMMON_FLAGS: &[&str] = &[
    "--stats=30s",
    "--tpslimit=0",
    "--tpslimit-burst=0",
    "--bwlimit=0",
    "--low-level-retries=10",
    "--timeout=5m",
    "--retries=10",
];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ResumeConfig {
    pub enabled: bool,
    /// Require rclone's closing `Elapsed time:` line instead of any marker.
    pub strict_markers: bool,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self { enabled: true, strict_markers: false }
    }
}

/// On-disk configuration (`~/.tierlift/config.json`). Every field has a
/// default, so a partial file is fine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub rclone_path: PathBuf,
    /// Passed as `--config=` to every rclone call when set.
    pub rclone_config: Option<PathBuf>,
    pub source_root: String,
    pub dest_root: String,
    /// Repeat the source base folder under the destination root.
    pub mirror_base_folder: bool,
    pub parallelism: usize,
    pub log_dir: PathBuf,
    pub order: SortOrder,
    pub transfer_verb: String,
    pub listing_format: ListingFormat,
    pub resume: ResumeConfig,
    /// Off: one catch-all tier, only `common_flags` apply.
    pub tiered: bool,
    pub common_flags: Vec<String>,
    pub tiers: Vec<SizeTier>,
    /// Period of the active-transfers table; 0 turns it off.
    pub stats_interval_secs: u64,
    /// Exit nonzero when any job fails.
    pub strict: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rclone_path: PathBuf::from("rclone"),
            rclone_config: None,
            source_root: String::new(),
            dest_root: String::new(),
            mirror_base_folder: false,
            parallelism: DEFAULT_PARALLELISM,
            log_dir: PathBuf::from("logs"),
            order: SortOrder::Listing,
            transfer_verb: "copyto".to_string(),
            listing_format: ListingFormat::Json,
            resume: ResumeConfig::default(),
            tiered: true,
            common_flags: DEFAULT_COMMON_FLAGS.iter().map(|s| s.to_string()).collect(),
            tiers: default_tiers(),
            stats_interval_secs: 60,
            strict: false,
        }
    }
}

/// Per-invocation CLI values layered over the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub source: Option<String>,
    pub dest: Option<String>,
    pub parallel: Option<usize>,
    pub order: Option<SortOrder>,
    pub no_resume: bool,
    pub strict: bool,
    pub mirror_base: bool,
}

impl Config {
    /// `~/.tierlift/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir()
            .map(|h| h.join(".".to_owned() + env!("CARGO_PKG_NAME")).join("config.json"))
    }

    /// Read the config file. A missing file at the default location yields
    /// the defaults; an explicitly named file must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => {
                    tracing::debug!("[config] no config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
        Self::from_json(&text).map_err(|e| match e {
            ConfigError::Parse(_, msg) => ConfigError::Parse(path.display().to_string(), msg),
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text)
            .map_err(|e| ConfigError::Parse("<inline>".to_string(), e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("无法创建配置目录 {}", dir.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("serialize config")?;
        std::fs::write(path, text + "\n")
            .with_context(|| format!("无法写入配置文件 {}", path.display()))?;
        Ok(())
    }

    pub fn apply(&mut self, o: &Overrides) {
        if let Some(ref s) = o.source {
            self.source_root = s.clone();
        }
        if let Some(ref d) = o.dest {
            self.dest_root = d.clone();
        }
        if let Some(p) = o.parallel {
            self.parallelism = p;
        }
        if let Some(order) = o.order {
            self.order = order;
        }
        if o.no_resume {
            self.resume.enabled = false;
        }
        if o.strict {
            self.strict = true;
        }
        if o.mirror_base {
            self.mirror_base_folder = true;
        }
    }

    /// Everything checked before any work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.translator()?;
        if self.parallelism == 0 {
            return Err(ConfigError::ZeroParallelism);
        }
        self.tier_table()?;
        Ok(())
    }

    pub fn effective_parallelism(&self) -> usize {
        self.parallelism.clamp(1, MAX_PARALLELISM)
    }

    pub fn source(&self) -> Result<RemoteRoot, ConfigError> {
        if self.source_root.trim().is_empty() {
            return Err(ConfigError::MissingRoot("source"));
        }
        RemoteRoot::parse(&self.source_root)
    }

    pub fn dest(&self) -> Result<RemoteRoot, ConfigError> {
        if self.dest_root.trim().is_empty() {
            return Err(ConfigError::MissingRoot("destination"));
        }
        RemoteRoot::parse(&self.dest_root)
    }

    pub fn translator(&self) -> Result<PathTranslator, ConfigError> {
        Ok(PathTranslator::new(
            self.source()?,
            self.dest()?,
            BaseFolderPolicy::from_mirror_flag(self.mirror_base_folder),
        ))
    }

    pub fn tier_table(&self) -> Result<TierTable, ConfigError> {
        if self.tiered { TierTable::new(self.tiers.clone()) } else { Ok(TierTable::untiered()) }
    }

    pub fn invocation_settings(&self) -> InvocationSettings {
        InvocationSettings {
            program: self.rclone_path.clone(),
            rclone_config: self.rclone_config.clone(),
            verb: self.transfer_verb.clone(),
            common_flags: self.common_flags.clone(),
        }
    }

    pub fn oracle(&self) -> Arc<dyn ResumeOracle> {
        if self.resume.enabled {
            Arc::new(LogScanOracle::new(self.resume.strict_markers))
        } else {
            Arc::new(NeverDone)
        }
    }

    /// Locate the rclone binary on PATH (or accept an existing explicit path).
    pub fn resolve_rclone(&self) -> Result<PathBuf> {
        if self.rclone_path.components().count() > 1 {
            if self.rclone_path.exists() {
                return Ok(self.rclone_path.clone());
            }
            anyhow::bail!("rclone not found at {}", self.rclone_path.display());
        }
        which::which(&self.rclone_path).with_context(|| {
            format!(
                "找不到 {} — rclone is not on PATH (set rclone_path in the config)",
                self.rclone_path.display()
            )
        })
    }
}
