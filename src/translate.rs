//! Source → destination path mapping.
//!
//! A root looks like `remote:base/folder`. The part after the colon is the
//! base-folder prefix. Whether that prefix is mirrored under the
//! destination root is one explicit policy, fixed at construction.

use crate::catalog::Entry;
use crate::error::{ConfigError, TranslationError};

/// A parsed `name:path` root. `base` never contains empty segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRoot {
    pub remote: String,
    pub base: Vec<String>,
}

impl RemoteRoot {
    pub fn parse(root: &str) -> Result<Self, ConfigError> {
        let root = root.trim();
        let Some((remote, path)) = root.split_once(':') else {
            return Err(ConfigError::NotARemote(root.to_string()));
        };
        if remote.is_empty() {
            return Err(ConfigError::NotARemote(root.to_string()));
        }
        let base = path.split('/').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect();
        Ok(Self { remote: remote.to_string(), base })
    }

    /// `remote:seg/seg`, or `remote:` when there are no segments.
    pub fn render(&self, segments: &[String]) -> String {
        format!("{}:{}", self.remote, segments.join("/"))
    }

    /// The root itself with any trailing separator dropped.
    pub fn normalized(&self) -> String {
        self.render(&self.base)
    }

    fn with_base(&self, rel: &[String]) -> Vec<String> {
        let mut v = self.base.clone();
        v.extend(rel.iter().cloned());
        v
    }
}

impl std::fmt::Display for RemoteRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.normalized())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaseFolderPolicy {
    /// The source base folder is not repeated under the destination root.
    #[default]
    Strip,
    /// `src:base/x` lands at `dst:<dest base>/base/x`.
    Mirror,
}

impl BaseFolderPolicy {
    pub fn from_mirror_flag(mirror: bool) -> Self {
        if mirror { BaseFolderPolicy::Mirror } else { BaseFolderPolicy::Strip }
    }
}

#[derive(Debug, Clone)]
pub struct PathTranslator {
    source: RemoteRoot,
    dest: RemoteRoot,
    policy: BaseFolderPolicy,
}

impl PathTranslator {
    pub fn new(source: RemoteRoot, dest: RemoteRoot, policy: BaseFolderPolicy) -> Self {
        Self { source, dest, policy }
    }

    pub fn source_root(&self) -> &RemoteRoot {
        &self.source
    }

    pub fn dest_root(&self) -> &RemoteRoot {
        &self.dest
    }

    /// Entry path relative to the source root, with a leading copy of the
    /// base folder removed. Listings taken from the bare remote carry that
    /// prefix; stripping it is what keeps translation idempotent.
    pub fn relative<'a>(&self, entry: &'a Entry) -> Result<&'a [String], TranslationError> {
        let segs = entry.relative_path.as_slice();
        if segs.is_empty() {
            return Err(TranslationError::Empty);
        }
        if let Some(bad) = segs.iter().find(|s| s.is_empty() || *s == "." || *s == "..") {
            tracing::debug!("[translate] bad segment {:?} in {:?}", bad, segs);
            return Err(TranslationError::BadSegment(entry.display_path()));
        }
        let base = self.source.base.as_slice();
        if !base.is_empty() && segs.starts_with(base) {
            Ok(&segs[base.len()..])
        } else {
            Ok(segs)
        }
    }

    pub fn source_path(&self, entry: &Entry) -> Result<String, TranslationError> {
        let rel = self.relative(entry)?;
        Ok(self.source.render(&self.source.with_base(rel)))
    }

    pub fn translate(&self, entry: &Entry) -> Result<String, TranslationError> {
        let rel = self.relative(entry)?;
        let tail: Vec<String> = match self.policy {
            BaseFolderPolicy::Strip => rel.to_vec(),
            BaseFolderPolicy::Mirror => self.source.with_base(rel),
        };
        // empty tail renders the destination root itself
        Ok(self.dest.render(&self.dest.with_base(&tail)))
    }

    /// Reinterpret a destination path produced by `translate` as an entry
    /// relative to the destination root.
    pub fn entry_from_destination(&self, dest_path: &str, size_bytes: u64) -> Option<Entry> {
        let root = RemoteRoot::parse(dest_path).ok()?;
        if root.remote != self.dest.remote || !root.base.starts_with(&self.dest.base) {
            return None;
        }
        Some(Entry::new(root.base[self.dest.base.len()..].to_vec(), size_bytes))
    }
}
