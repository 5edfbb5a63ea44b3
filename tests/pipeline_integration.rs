use std::path::Path;

use tierlift::catalog::{SortOrder, order_entries, parse_listing};
use tierlift::config::Config;
use tierlift::job::{JobBuilder, plan};
use tierlift::joblist::{JobListHeader, read_job_list, write_job_list};
use tierlift::tier::{MIB, TierTable};

fn mb(x: f64) -> u64 {
    (x * MIB as f64) as u64
}

#[test]
fn sizes_ascending_map_to_tiers_ascending() {
    let listing: String = [5000.0, 0.5, 500.0, 5.0, 50.0]
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{:>12} data/file_{}.bin\n", mb(*s), i))
        .collect();
    let mut parsed = parse_listing(&listing);
    assert_eq!(parsed.entries.len(), 5);
    order_entries(&mut parsed.entries, SortOrder::SmallestFirst);

    let cfg = Config {
        source_root: "onedrive:".into(),
        dest_root: "gdrive:Data_Migration/".into(),
        ..Config::default()
    };
    cfg.validate().unwrap();
    let tiers = cfg.tier_table().unwrap();
    let built = JobBuilder::new(&cfg.translator().unwrap(), &tiers, Path::new("logs")).build(&parsed.entries);
    let tags: Vec<_> = built.jobs.iter().map(|j| j.tier_label.as_str()).collect();
    assert_eq!(tags, vec!["tiny", "small", "medium", "large", "huge"]);
    assert_eq!(built.jobs[0].destination_path, "gdrive:Data_Migration/data/file_1.bin");
    assert_eq!(built.jobs[4].ordinal, 5);
}

#[test]
fn job_list_round_trip_preserves_the_plan() {
    let dir = tempfile::tempdir().unwrap();
    let log_dir = dir.path().join("logs");
    let cfg = Config {
        source_root: "onedrive:Work Files".into(),
        dest_root: "gdrive:mig".into(),
        rclone_config: Some("/content/rclone.conf".into()),
        ..Config::default()
    };
    let parsed = parse_listing(
        "  46080 Work Files/ABBREVIATIONS.xls\n 734003200 Work Files/video \"final\".mp4\n 1047576 Work Files/edge.bin\n",
    );
    let tiers = cfg.tier_table().unwrap();
    let built = JobBuilder::new(&cfg.translator().unwrap(), &tiers, &log_dir).build(&parsed.entries);
    let planned = plan(built.jobs, &cfg.invocation_settings(), &tiers);

    let path = dir.path().join("jobs_all.txt");
    let header = JobListHeader {
        title: "listing",
        source: "onedrive:Work Files",
        destination: "gdrive:mig",
        ordering: SortOrder::Listing.describe(),
    };
    write_job_list(&path, &header, &planned).unwrap();
    let back = read_job_list(&path, &tiers, &log_dir).unwrap();

    assert_eq!(back.len(), planned.len());
    for (a, b) in planned.iter().zip(&back) {
        assert_eq!(a.invocation, b.invocation);
        assert_eq!(a.job.ordinal, b.job.ordinal);
        assert_eq!(a.job.source_path, b.job.source_path);
        assert_eq!(a.job.destination_path, b.job.destination_path);
        assert_eq!(a.job.display_path, b.job.display_path);
        assert_eq!(a.job.size_bytes, b.job.size_bytes);
        assert_eq!(a.job.tier_label, b.job.tier_label);
        assert_eq!(a.job.log_path, b.job.log_path);
    }
    assert_eq!(back[1].job.source_path, "onedrive:Work Files/video \"final\".mp4");
    assert_eq!(back[1].job.tier_label, "large");
    // just under the 1 MiB boundary; the rounded MB figure alone would read as 1.00 MB
    assert_eq!(back[2].job.size_bytes, MIB - 1000);
    assert_eq!(back[2].job.tier_label, "tiny");
}

#[test]
fn untiered_config_uses_one_catch_all_tier() {
    let cfg = Config {
        source_root: "a:".into(),
        dest_root: "b:".into(),
        tiered: false,
        ..Config::default()
    };
    let tiers: TierTable = cfg.tier_table().unwrap();
    let built = JobBuilder::new(&cfg.translator().unwrap(), &tiers, Path::new("logs"))
        .build(&parse_listing("1 x\n999999999999 y\n").entries);
    assert!(built.jobs.iter().all(|j| j.tier_label == "all"));
    let planned = plan(built.jobs, &cfg.invocation_settings(), &tiers);
    assert!(!planned[0].invocation.args.iter().any(|a| a.starts_with("--transfers")));
    assert!(planned[0].invocation.args.contains(&"--retries=10".to_string()));
}
