//! Entry catalog: turns raw remote-listing output into a flat list of
//! `(path, size)` entries, whatever shape the listing tool printed.
//!
//! Accepted line shapes (mixed freely, detected per line):
//! - `<size> <path>` as printed by `rclone ls`
//! - one `lsjson` record per line: `{"Path":"a/b.txt","Size":12,...},`
//! - quoted segments `"remote"/"dir"/"file.txt"/"0.04"` (size in MB); a `/`
//!   inside quotes belongs to the segment
//!
//! Bad lines are skipped with a warning; they never abort the listing.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::ListingError;
use crate::tier::MIB;

/// One remote file. Segments are the path split on `/` (after unescaping).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    pub relative_path: Vec<String>,
    pub size_bytes: u64,
}

impl Entry {
    pub fn new(relative_path: Vec<String>, size_bytes: u64) -> Self {
        Self { relative_path, size_bytes }
    }

    /// Split a plain `a/b/c` path into segments.
    pub fn from_path(path: &str, size_bytes: u64) -> Self {
        let segments = if path.is_empty() {
            Vec::new()
        } else {
            path.split('/').map(|s| s.to_string()).collect()
        };
        Self { relative_path: segments, size_bytes }
    }

    pub fn display_path(&self) -> String {
        self.relative_path.join("/")
    }
}

/// Ordering applied by callers before jobs are built.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    /// Keep the order the listing produced.
    #[default]
    Listing,
    SmallestFirst,
    LargestFirst,
}

impl SortOrder {
    pub fn describe(&self) -> &'static str {
        match self {
            SortOrder::Listing => "listing order",
            SortOrder::SmallestFirst => "smallest → largest",
            SortOrder::LargestFirst => "largest → smallest",
        }
    }
}

/// Size orders break ties by path, so the same set of entries always gets
/// the same ordinals no matter how the listing happened to arrive.
pub fn order_entries(entries: &mut [Entry], order: SortOrder) {
    match order {
        SortOrder::Listing => {}
        SortOrder::SmallestFirst => entries.sort_by(|a, b| {
            a.size_bytes.cmp(&b.size_bytes).then_with(|| a.relative_path.cmp(&b.relative_path))
        }),
        SortOrder::LargestFirst => entries.sort_by(|a, b| {
            b.size_bytes.cmp(&a.size_bytes).then_with(|| a.relative_path.cmp(&b.relative_path))
        }),
    }
}

/// Which listing subcommand to run against the remote.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ListingFormat {
    /// `rclone lsjson --recursive --files-only`
    #[default]
    Json,
    /// `rclone ls`
    Plain,
}

#[derive(Debug, Default, Clone)]
pub struct ParsedListing {
    pub entries: Vec<Entry>,
    /// Lines that looked like entries but could not be used.
    pub skipped: usize,
}

#[derive(Debug, PartialEq)]
enum LineOutcome {
    Entry(Entry),
    Ignore,
    Skip(String),
}

#[derive(Deserialize)]
struct JsonRecord {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Size", default)]
    size: i64,
    #[serde(rename = "IsDir", default)]
    is_dir: bool,
}

fn parse_json_record(line: &str) -> LineOutcome {
    let body = line.trim_end_matches(',');
    let rec: JsonRecord = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => return LineOutcome::Skip(format!("bad record: {}", e)),
    };
    if rec.is_dir {
        return LineOutcome::Ignore;
    }
    if rec.size < 0 {
        return LineOutcome::Skip(format!("unknown size for {}", rec.path));
    }
    LineOutcome::Entry(Entry::from_path(&rec.path, rec.size as u64))
}

/// Split `"a"/"b/c"/"d"` into `["a", "b/c", "d"]`. `None` if the quoting is broken.
fn split_quoted_segments(line: &str) -> Option<Vec<String>> {
    let mut parts = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        if chars.next()? != '"' {
            return None;
        }
        let mut seg = String::new();
        loop {
            match chars.next()? {
                '"' => break,
                c => seg.push(c),
            }
        }
        parts.push(seg);
        match chars.next() {
            None => return Some(parts),
            Some('/') => continue,
            Some(_) => return None,
        }
    }
}

fn parse_quoted(line: &str) -> LineOutcome {
    let Some(mut parts) = split_quoted_segments(line) else {
        return LineOutcome::Skip("unbalanced quotes".to_string());
    };
    // remote name, at least one path segment, size
    if parts.len() < 3 {
        return LineOutcome::Skip(format!("expected remote/path/size, got {} part(s)", parts.len()));
    }
    let size_tok = parts.pop().unwrap_or_default();
    let size_mb: f64 = match size_tok.trim().parse() {
        Ok(v) if v >= 0.0 => v,
        _ => return LineOutcome::Skip(format!("non-numeric size {:?}", size_tok)),
    };
    let segments = parts.split_off(1);
    LineOutcome::Entry(Entry::new(segments, (size_mb * MIB as f64).round() as u64))
}

fn parse_plain(line: &str) -> LineOutcome {
    let trimmed = line.trim_start();
    let Some((size_tok, rest)) = trimmed.split_once(char::is_whitespace) else {
        return LineOutcome::Skip("expected '<size> <path>'".to_string());
    };
    let size: u64 = match size_tok.parse() {
        Ok(s) => s,
        Err(_) => return LineOutcome::Skip(format!("non-numeric size {:?}", size_tok)),
    };
    // exactly one separator after the size; further spaces belong to the name
    if rest.trim().is_empty() {
        return LineOutcome::Skip("missing path".to_string());
    }
    LineOutcome::Entry(Entry::from_path(rest, size))
}

fn parse_line(raw: &str) -> LineOutcome {
    let line = raw.trim_end_matches(['\r', '\n']);
    let t = line.trim();
    if t.is_empty() || t == "[" || t == "]" {
        return LineOutcome::Ignore;
    }
    if t.starts_with('{') {
        parse_json_record(t)
    } else if t.starts_with('"') {
        parse_quoted(t)
    } else {
        parse_plain(line)
    }
}

/// Incremental parser so a streamed listing can be consumed line by line.
#[derive(Default)]
pub struct ListingParser {
    seen: HashSet<Vec<String>>,
    out: ParsedListing,
    line_no: usize,
}

impl ListingParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) {
        self.line_no += 1;
        match parse_line(line) {
            LineOutcome::Ignore => {}
            LineOutcome::Skip(reason) => {
                self.out.skipped += 1;
                tracing::warn!("[catalog] line {} skipped: {}", self.line_no, reason);
            }
            LineOutcome::Entry(entry) => {
                if self.seen.insert(entry.relative_path.clone()) {
                    self.out.entries.push(entry);
                } else {
                    self.out.skipped += 1;
                    tracing::warn!(
                        "[catalog] line {} skipped: duplicate path {}",
                        self.line_no,
                        entry.display_path()
                    );
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.out.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.entries.is_empty()
    }

    pub fn finish(self) -> ParsedListing {
        self.out
    }
}

pub fn parse_listing(text: &str) -> ParsedListing {
    let mut p = ListingParser::new();
    for line in text.lines() {
        p.push_line(line);
    }
    p.finish()
}

pub fn read_listing_file(path: &Path) -> Result<ParsedListing, ListingError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ListingError::Io(path.display().to_string(), e.to_string()))?;
    Ok(parse_listing(&text))
}

/// Save entries in the `<size> <path>` shape so they can be re-read later.
pub fn write_listing(path: &Path, entries: &[Entry]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = std::io::BufWriter::new(std::fs::File::create(path)?);
    for e in entries {
        writeln!(f, "{:>12} {}", e.size_bytes, e.display_path())?;
    }
    f.flush()
}

/// Run the listing tool against `root` and stream its output into the parser.
///
/// A nonzero exit is only an error when nothing usable was recovered; a
/// partial listing up to the failure point is returned with a warning.
pub fn list_remote(
    rclone: &Path,
    rclone_config: Option<&Path>,
    root: &str,
    format: ListingFormat,
    mut on_entry: impl FnMut(&Entry),
) -> Result<ParsedListing, ListingError> {
    let mut cmd = Command::new(rclone);
    match format {
        ListingFormat::Json => cmd.args(["lsjson", "--recursive", "--files-only"]),
        ListingFormat::Plain => cmd.arg("ls"),
    };
    if let Some(cfg) = rclone_config {
        cmd.arg("--config").arg(cfg);
    }
    cmd.arg(root).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    tracing::debug!("[catalog] spawning {:?}", cmd);

    let mut child = cmd
        .spawn()
        .map_err(|e| ListingError::Spawn(rclone.display().to_string(), e.to_string()))?;

    // stderr is drained on its own thread so a chatty tool cannot block stdout
    let stderr_handle = child.stderr.take().map(|mut err| {
        std::thread::spawn(move || {
            let mut s = String::new();
            let _ = err.read_to_string(&mut s);
            s
        })
    });

    let mut parser = ListingParser::new();
    if let Some(out) = child.stdout.take() {
        for line in BufReader::new(out).lines() {
            let Ok(line) = line else { break };
            let before = parser.len();
            parser.push_line(&line);
            if parser.len() > before
                && let Some(e) = parser.out.entries.last()
            {
                on_entry(e);
            }
        }
    }
    let status =
        child.wait().map_err(|e| ListingError::Spawn(rclone.display().to_string(), e.to_string()))?;
    let stderr = stderr_handle.and_then(|h| h.join().ok()).unwrap_or_default();

    let parsed = parser.finish();
    if !status.success() {
        if parsed.entries.is_empty() {
            return Err(ListingError::Failed { root: root.to_string(), code: status.code(), stderr });
        }
        tracing::warn!(
            "[catalog] listing of {} exited with {:?}; continuing with {} entries recovered",
            root,
            status.code(),
            parsed.entries.len()
        );
    }
    for line in stderr.lines().filter(|l| !l.trim().is_empty()).take(5) {
        tracing::warn!("[catalog] {}", line);
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_with_padding_and_spaces_in_names() {
        let text = "    46080 Work Files/ABBREVIATIONS.xls\n\n 12 top.txt\n";
        let p = parse_listing(text);
        assert_eq!(p.skipped, 0);
        assert_eq!(p.entries.len(), 2);
        assert_eq!(p.entries[0].relative_path, vec!["Work Files", "ABBREVIATIONS.xls"]);
        assert_eq!(p.entries[0].size_bytes, 46080);
        assert_eq!(p.entries[1].display_path(), "top.txt");
    }

    #[test]
    fn non_numeric_sizes_are_skipped_not_fatal() {
        let p = parse_listing("abc some/file\n10 ok.bin\n-5 neg.bin\n");
        assert_eq!(p.entries.len(), 1);
        assert_eq!(p.skipped, 2);
        assert_eq!(p.entries[0].display_path(), "ok.bin");
    }

    #[test]
    fn lsjson_records_line_by_line() {
        let text = r#"[
{"Path":"a/b.txt","Name":"b.txt","Size":5,"MimeType":"text/plain","ModTime":"2024-01-01T00:00:00Z","IsDir":false},
{"Path":"a","Name":"a","Size":-1,"IsDir":true},
{"Path":"c.bin","Name":"c.bin","Size":-1,"IsDir":false}
]"#;
        let p = parse_listing(text);
        assert_eq!(p.entries, vec![Entry::from_path("a/b.txt", 5)]);
        assert_eq!(p.skipped, 1);
    }

    #[test]
    fn quoted_segments_keep_embedded_separator() {
        let p = parse_listing("\"drive\"/\"2023/24 budget\"/\"q1.xlsx\"/\"0.5\"\n");
        assert_eq!(p.entries.len(), 1);
        assert_eq!(p.entries[0].relative_path, vec!["2023/24 budget", "q1.xlsx"]);
        assert_eq!(p.entries[0].size_bytes, MIB / 2);
    }

    #[test]
    fn quoted_with_too_few_parts_is_skipped() {
        let p = parse_listing("\"drive\"/\"1.0\"\n\"drive\"/\"x\n");
        assert!(p.entries.is_empty());
        assert_eq!(p.skipped, 2);
    }

    #[test]
    fn duplicate_paths_are_dropped() {
        let p = parse_listing("1 a.txt\n2 a.txt\n");
        assert_eq!(p.entries.len(), 1);
        assert_eq!(p.entries[0].size_bytes, 1);
        assert_eq!(p.skipped, 1);
    }

    #[test]
    fn size_orders_break_ties_by_path() {
        let mut v = vec![
            Entry::from_path("c", 5),
            Entry::from_path("a", 1),
            Entry::from_path("b", 5),
        ];
        let mut shuffled = vec![v[1].clone(), v[2].clone(), v[0].clone()];
        order_entries(&mut v, SortOrder::LargestFirst);
        let names: Vec<_> = v.iter().map(|e| e.display_path()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
        order_entries(&mut shuffled, SortOrder::LargestFirst);
        assert_eq!(shuffled, v);
        order_entries(&mut v, SortOrder::SmallestFirst);
        let names: Vec<_> = v.iter().map(|e| e.display_path()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn leading_spaces_in_names_survive() {
        let p = parse_listing("      12  indented.txt\n 3 plain.txt\n 4    \n");
        assert_eq!(p.entries.len(), 2);
        assert_eq!(p.entries[0].display_path(), " indented.txt");
        assert_eq!(p.entries[0].size_bytes, 12);
        assert_eq!(p.entries[1].display_path(), "plain.txt");
        assert_eq!(p.skipped, 1);
    }

    #[test]
    fn saved_listing_reads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("listing.txt");
        let entries = vec![Entry::from_path("x/y z.txt", 7), Entry::from_path("w", 0)];
        write_listing(&path, &entries).expect("write");
        let back = read_listing_file(&path).expect("read");
        assert_eq!(back.entries, entries);
    }
}
