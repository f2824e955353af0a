//! Retention policy to forget flags

use backup_sidecar::api::RetentionPolicy;
use backup_sidecar::utils::retention::build_forget_args;

#[test]
fn test_empty_policy_skips_cleanup() {
    assert!(build_forget_args(&RetentionPolicy::default()).is_none());
}

#[test]
fn test_dry_run_alone_skips_cleanup() {
    let policy = RetentionPolicy {
        dry_run: true,
        ..Default::default()
    };
    assert!(build_forget_args(&policy).is_none());
}

#[test]
fn test_all_keeps_in_order() {
    let policy = RetentionPolicy {
        name: "full".to_string(),
        keep_last: 1,
        keep_hourly: 2,
        keep_daily: 3,
        keep_weekly: 4,
        keep_monthly: 5,
        keep_yearly: 6,
        keep_tags: vec!["pinned".to_string(), "release".to_string()],
        prune: true,
        dry_run: true,
    };

    assert_eq!(
        build_forget_args(&policy).unwrap(),
        vec![
            "--keep-last", "1", "--keep-hourly", "2", "--keep-daily", "3", "--keep-weekly", "4",
            "--keep-monthly", "5", "--keep-yearly", "6", "--keep-tag", "pinned", "--keep-tag",
            "release", "--prune", "--dry-run",
        ]
    );
}

#[test]
fn test_keep_tags_alone_is_a_constraint() {
    let policy = RetentionPolicy {
        keep_tags: vec!["pinned".to_string()],
        ..Default::default()
    };
    assert_eq!(build_forget_args(&policy).unwrap(), vec!["--keep-tag", "pinned"]);
}
