//! Retention policy to `restic forget` arguments

use crate::api::RetentionPolicy;

/// Flags for `restic forget`, or `None` when the policy sets no constraint
///
/// An unconstrained forget keeps nothing, so an empty policy must skip
/// cleanup entirely rather than run the command.
pub fn build_forget_args(policy: &RetentionPolicy) -> Option<Vec<String>> {
    let keeps = [
        ("--keep-last", policy.keep_last),
        ("--keep-hourly", policy.keep_hourly),
        ("--keep-daily", policy.keep_daily),
        ("--keep-weekly", policy.keep_weekly),
        ("--keep-monthly", policy.keep_monthly),
        ("--keep-yearly", policy.keep_yearly),
    ];

    let has_keep = keeps.iter().any(|(_, n)| *n > 0);
    if !has_keep && policy.keep_tags.is_empty() && !policy.prune {
        return None;
    }

    let mut args = Vec::new();
    for (flag, n) in keeps.iter().filter(|(_, n)| *n > 0) {
        args.push(flag.to_string());
        args.push(n.to_string());
    }
    for tag in &policy.keep_tags {
        args.push("--keep-tag".to_string());
        args.push(tag.clone());
    }
    if policy.prune {
        args.push("--prune".to_string());
    }
    if policy.dry_run {
        args.push("--dry-run".to_string());
    }
    Some(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_last_daily_prune() {
        let policy = RetentionPolicy {
            keep_last: 3,
            keep_daily: 7,
            prune: true,
            ..Default::default()
        };
        assert_eq!(
            build_forget_args(&policy).unwrap(),
            vec!["--keep-last", "3", "--keep-daily", "7", "--prune"]
        );
    }

    #[test]
    fn test_empty_policy_skips() {
        assert!(build_forget_args(&RetentionPolicy::default()).is_none());

        // dry-run alone constrains nothing
        let dry = RetentionPolicy {
            dry_run: true,
            ..Default::default()
        };
        assert!(build_forget_args(&dry).is_none());
    }

    #[test]
    fn test_every_flag_in_order() {
        let policy = RetentionPolicy {
            name: "full".into(),
            keep_last: 1,
            keep_hourly: 2,
            keep_daily: 3,
            keep_weekly: 4,
            keep_monthly: 5,
            keep_yearly: 6,
            keep_tags: vec!["release".into(), "manual".into()],
            prune: true,
            dry_run: true,
        };
        assert_eq!(
            build_forget_args(&policy).unwrap(),
            vec![
                "--keep-last", "1", "--keep-hourly", "2", "--keep-daily", "3",
                "--keep-weekly", "4", "--keep-monthly", "5", "--keep-yearly", "6",
                "--keep-tag", "release", "--keep-tag", "manual", "--prune", "--dry-run",
            ]
        );
    }

    #[test]
    fn test_tags_only() {
        let policy = RetentionPolicy {
            keep_tags: vec!["pinned".into()],
            ..Default::default()
        };
        assert_eq!(build_forget_args(&policy).unwrap(), vec!["--keep-tag", "pinned"]);
    }
}
