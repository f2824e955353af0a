//! Parsing of restic JSON output

use backup_sidecar::utils::output::{
    extract_backup_info, extract_check_info, extract_cleanup_info, extract_snapshots,
    extract_stats_info, format_bytes, format_duration, parse_duration, parse_size, ParseError,
};
use rstest::rstest;
use std::time::Duration;
use test_utils::{BACKUP_OUTPUT, FORGET_OUTPUT, STATS_OUTPUT};

#[test]
fn test_backup_summary_among_progress_lines() {
    let stats = extract_backup_info(BACKUP_OUTPUT.as_bytes(), "/data").unwrap();

    assert_eq!(stats.name, "abc123");
    assert_eq!(stats.path, "/data");
    assert_eq!(stats.size, "2.000 MiB");
    assert_eq!(stats.uploaded, "1.000 MiB");
    assert_eq!(stats.processing_time, "0:12");
    assert_eq!(stats.file_stats.total_files, Some(17));
    assert_eq!(stats.file_stats.new_files, Some(5));
    assert_eq!(stats.file_stats.modified_files, Some(2));
    assert_eq!(stats.file_stats.unmodified_files, Some(10));
}

#[test]
fn test_backup_without_summary() {
    let output = b"{\"message_type\":\"status\",\"percent_done\":1}\nnot json at all\n";
    let err = extract_backup_info(output, "/data").unwrap_err();
    assert!(matches!(err, ParseError::NoSummary));
}

#[test]
fn test_cleanup_sums_groups() {
    assert_eq!(extract_cleanup_info(FORGET_OUTPUT.as_bytes()).unwrap(), (3, 1));
}

#[test]
fn test_cleanup_with_warnings_around_json() {
    let output = format!("Applying Policy: keep 5 latest snapshots\n{}\nwarning: done\n", FORGET_OUTPUT);
    assert_eq!(extract_cleanup_info(output.as_bytes()).unwrap(), (3, 1));
}

#[test]
fn test_cleanup_empty_array() {
    assert_eq!(extract_cleanup_info(b"[]\n").unwrap(), (0, 0));
}

#[test]
fn test_cleanup_without_groups() {
    assert!(extract_cleanup_info(b"nothing to see\n").is_err());
}

#[rstest]
#[case("using temporary cache\nno errors were found\n", true)]
#[case("Fatal: repository contains errors\n", false)]
#[case("", false)]
fn test_check_result(#[case] output: &str, #[case] expected: bool) {
    assert_eq!(extract_check_info(output.as_bytes()), expected);
}

#[test]
fn test_stats_size() {
    assert_eq!(extract_stats_info(STATS_OUTPUT.as_bytes()).unwrap(), "1.000 GiB");
}

#[test]
fn test_snapshots_empty_output() {
    assert!(extract_snapshots(b"  \n").unwrap().is_empty());
}

#[test]
fn test_snapshots_list() {
    let output = r#"[{"id":"0123456789abcdef","short_id":"01234567","time":"2026-10-01T02:00:00Z","hostname":"host-0","paths":["/data"],"tags":["deployment/api/host-0"]}]"#;
    let snapshots = extract_snapshots(output.as_bytes()).unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].hostname, "host-0");
    assert_eq!(snapshots[0].tags, vec!["deployment/api/host-0"]);
}

#[rstest]
#[case(512, "512 B")]
#[case(1536, "1.500 KiB")]
#[case(1 << 30, "1.000 GiB")]
fn test_format_bytes(#[case] bytes: u64, #[case] expected: &str) {
    assert_eq!(format_bytes(bytes), expected);
    assert_eq!(parse_size(expected), Some(bytes as f64));
}

#[rstest]
#[case(Duration::from_millis(4250), "4.250s")]
#[case(Duration::from_secs(62), "1m2.000s")]
#[case(Duration::from_millis(3_723_500), "1h2m3.500s")]
fn test_duration_format(#[case] duration: Duration, #[case] expected: &str) {
    assert_eq!(format_duration(duration), expected);
    assert_eq!(parse_duration(expected), Some(duration.as_secs_f64()));
}

#[test]
fn test_parse_duration_rejects_garbage() {
    assert_eq!(parse_duration("soon"), None);
    assert_eq!(parse_duration("12"), None);
}
