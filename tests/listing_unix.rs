#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tierlift::ListingError;
use tierlift::catalog::{ListingFormat, list_remote};

fn fake_rclone(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// kept as a single test: exec'ing a script another test thread is still
// writing fails with ETXTBSY
#[test]
fn nonzero_exit_keeps_partial_output_and_fails_when_empty() {
    let dir = tempfile::tempdir().unwrap();

    let partial = fake_rclone(
        dir.path(),
        "rclone-partial",
        "echo '      10 a.txt'\necho '      20 b/c.txt'\necho 'ERROR : listing aborted' >&2\nexit 1",
    );
    let mut seen = Vec::new();
    let parsed = list_remote(&partial, None, "src:", ListingFormat::Plain, |e| {
        seen.push(e.display_path())
    })
    .expect("partial listing is still usable");
    assert_eq!(parsed.entries.len(), 2);
    assert_eq!(parsed.entries[1].relative_path, vec!["b", "c.txt"]);
    assert_eq!(parsed.entries[1].size_bytes, 20);
    assert_eq!(seen, vec!["a.txt", "b/c.txt"]);

    let empty = fake_rclone(dir.path(), "rclone-empty", "echo 'Failed to ls: 403' >&2\nexit 1");
    match list_remote(&empty, None, "src:", ListingFormat::Plain, |_| {}) {
        Err(ListingError::Failed { root, code, stderr }) => {
            assert_eq!(root, "src:");
            assert_eq!(code, Some(1));
            assert!(stderr.contains("403"));
        }
        other => panic!("expected Failed, got {:?}", other.map(|p| p.entries.len())),
    }

    let ok = fake_rclone(dir.path(), "rclone-ok", "echo '       5 only.bin'");
    let parsed = list_remote(&ok, None, "src:", ListingFormat::Plain, |_| {}).unwrap();
    assert_eq!(parsed.entries.len(), 1);
}
