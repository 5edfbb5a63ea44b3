//! Size tiers: an ordered, contiguous partition of `[0, ∞)` where every
//! range carries its own rclone parameter profile.
//!
//! The table is data (it lives in the config file), so operators can retune
//! boundaries and flags without touching any logic here.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const MIB: u64 = 1024 * 1024;

/// rclone flags tuned for one size range. Unset fields emit nothing.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TierProfile {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transfers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checkers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub multi_thread_streams: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub buffer_size: Option<String>,
    /// Upload chunk size, passed as `--drive-chunk-size`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chunk_size: Option<String>,
    #[serde(default)]
    pub extra_flags: Vec<String>,
}

impl TierProfile {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(n) = self.transfers {
            args.push(format!("--transfers={}", n));
        }
        if let Some(n) = self.checkers {
            args.push(format!("--checkers={}", n));
        }
        if let Some(n) = self.multi_thread_streams {
            args.push(format!("--multi-thread-streams={}", n));
        }
        if let Some(ref b) = self.buffer_size {
            args.push(format!("--buffer-size={}", b));
        }
        if let Some(ref c) = self.chunk_size {
            args.push(format!("--drive-chunk-size={}", c));
        }
        args.extend(self.extra_flags.iter().cloned());
        args
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SizeTier {
    pub label: String,
    pub lower_bytes: u64,
    /// Exclusive upper bound; `None` only on the last tier.
    #[serde(default)]
    pub upper_bytes: Option<u64>,
    #[serde(default)]
    pub profile: TierProfile,
}

impl SizeTier {
    pub fn contains(&self, size_bytes: u64) -> bool {
        size_bytes >= self.lower_bytes && self.upper_bytes.is_none_or(|u| size_bytes < u)
    }

    pub fn range_display(&self) -> String {
        match self.upper_bytes {
            Some(u) => format!(
                "[{}, {})",
                crate::util::human_bytes(self.lower_bytes),
                crate::util::human_bytes(u)
            ),
            None => format!("[{}, ∞)", crate::util::human_bytes(self.lower_bytes)),
        }
    }
}

/// Validated tier table. Construction checks the partition, after which
/// `classify` cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    tiers: Vec<SizeTier>,
}

impl TierTable {
    pub fn new(tiers: Vec<SizeTier>) -> Result<Self, ConfigError> {
        if tiers.is_empty() {
            return Err(ConfigError::NoTiers);
        }
        let mut expected_lower = 0u64;
        let last = tiers.len() - 1;
        for (i, tier) in tiers.iter().enumerate() {
            if tiers[..i].iter().any(|t| t.label.eq_ignore_ascii_case(&tier.label)) {
                return Err(ConfigError::DuplicateTier(tier.label.clone()));
            }
            if tier.lower_bytes != expected_lower {
                return Err(ConfigError::TierGap {
                    label: tier.label.clone(),
                    expected: expected_lower,
                    found: tier.lower_bytes,
                });
            }
            match tier.upper_bytes {
                Some(_) if i == last => return Err(ConfigError::TierTopBounded(tier.label.clone())),
                None if i != last => {
                    return Err(ConfigError::TierUnboundedNotLast(tier.label.clone()));
                }
                Some(u) if u <= tier.lower_bytes => {
                    return Err(ConfigError::TierEmpty(tier.label.clone()));
                }
                Some(u) => expected_lower = u,
                None => {}
            }
        }
        Ok(Self { tiers })
    }

    /// Single catch-all tier with an empty profile, used when size tiering is
    /// switched off: every job gets only the common flags.
    pub fn untiered() -> Self {
        Self {
            tiers: vec![SizeTier {
                label: "all".to_string(),
                lower_bytes: 0,
                upper_bytes: None,
                profile: TierProfile::default(),
            }],
        }
    }

    pub fn classify(&self, size_bytes: u64) -> &SizeTier {
        // first tier starts at 0, so partition_point is at least 1
        let idx = self.tiers.partition_point(|t| t.lower_bytes <= size_bytes);
        &self.tiers[idx.saturating_sub(1)]
    }

    pub fn get(&self, label: &str) -> Option<&SizeTier> {
        self.tiers.iter().find(|t| t.label == label)
    }

    pub fn tiers(&self) -> &[SizeTier] {
        &self.tiers
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self { tiers: default_tiers() }
    }
}

fn profile(
    transfers: u32,
    checkers: u32,
    streams: u32,
    buffer: &str,
    chunk: &str,
    extra: &[&str],
) -> TierProfile {
    TierProfile {
        transfers: Some(transfers),
        checkers: Some(checkers),
        multi_thread_streams: Some(streams),
        buffer_size: Some(buffer.to_string()),
        chunk_size: Some(chunk.to_string()),
        extra_flags: extra.iter().map(|s| s.to_string()).collect(),
    }
}

/// Five tiers: tiny files get very high concurrency and small buffers, huge
/// files get few transfers with many streams and large buffers.
pub fn default_tiers() -> Vec<SizeTier> {
    vec![
        SizeTier {
            label: "tiny".to_string(),
            lower_bytes: 0,
            upper_bytes: Some(MIB),
            profile: profile(
                200,
                100,
                2,
                "32M",
                "32M",
                &[
                    "--fast-list",
                    "--max-backlog=100000",
                    "--order-by=size,mixed",
                    "--no-traverse",
                    "--use-mmap",
                ],
            ),
        },
        SizeTier {
            label: "small".to_string(),
            lower_bytes: MIB,
            upper_bytes: Some(10 * MIB),
            profile: profile(
                128,
                64,
                4,
                "128M",
                "64M",
                &["--fast-list", "--max-backlog=50000", "--order-by=size,mixed", "--use-mmap"],
            ),
        },
        SizeTier {
            label: "medium".to_string(),
            lower_bytes: 10 * MIB,
            upper_bytes: Some(100 * MIB),
            profile: profile(64, 128, 16, "2G", "128M", &["--fast-list", "--use-mmap"]),
        },
        SizeTier {
            label: "large".to_string(),
            lower_bytes: 100 * MIB,
            upper_bytes: Some(1000 * MIB),
            profile: profile(32, 64, 32, "4G", "256M", &["--use-mmap", "--ignore-times"]),
        },
        SizeTier {
            label: "huge".to_string(),
            lower_bytes: 1000 * MIB,
            upper_bytes: None,
            profile: profile(16, 32, 64, "8G", "512M", &["--use-mmap", "--size-only"]),
        },
    ]
}
