//! Retention planning.
//!
//! Pure selection over records; the manager does the deleting.

use gw_common::BackupId;
use gw_config::BackupSettings;

use super::record::{BackupRecord, BackupType};

const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub max_local_backups: u32,
}

impl RetentionPolicy {
    pub fn from_settings(settings: &BackupSettings) -> Self {
        Self {
            retention_days: settings.retention_days,
            max_local_backups: settings.max_local_backups,
        }
    }
}

/// Ids to delete, oldest first.
///
/// Non-weekly records older than `retention_days` go first. If more than
/// `max_local_backups` remain after that, the oldest of the survivors go
/// too, weekly or not. Ties on `created_at` are broken by id.
pub fn plan_cleanup(records: &[BackupRecord], policy: RetentionPolicy, now: i64) -> Vec<BackupId> {
    let cutoff = now - i64::from(policy.retention_days) * SECS_PER_DAY;

    let mut ordered: Vec<&BackupRecord> = records.iter().collect();
    ordered.sort_by_key(|r| (r.created_at, r.id));

    let (expired, kept): (Vec<&BackupRecord>, Vec<&BackupRecord>) = ordered
        .into_iter()
        .partition(|r| r.backup_type != BackupType::Weekly && r.created_at < cutoff);

    let cap = policy.max_local_backups as usize;
    let excess = kept.len().saturating_sub(cap);

    let mut doomed: Vec<&BackupRecord> = expired;
    doomed.extend(kept.into_iter().take(excess));
    doomed.sort_by_key(|r| (r.created_at, r.id));
    doomed.into_iter().map(|r| r.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::record::RecordStatus;
    use proptest::prelude::*;
    use std::path::PathBuf;

    const NOW: i64 = 1_770_000_000;

    fn rec(id: i64, kind: BackupType, age_days: i64) -> BackupRecord {
        BackupRecord {
            id: BackupId(id),
            backup_type: kind,
            name: format!("{kind}_{id}"),
            file_path: PathBuf::from(format!("/b/{id}.zip")),
            created_at: NOW - age_days * SECS_PER_DAY - id,
            size_bytes: 1,
            checksum: None,
            status: RecordStatus::Completed,
            description: None,
        }
    }

    fn policy(days: u32, max: u32) -> RetentionPolicy {
        RetentionPolicy {
            retention_days: days,
            max_local_backups: max,
        }
    }

    #[test]
    fn test_weekly_exempt_from_age() {
        let records = vec![
            rec(1, BackupType::Weekly, 60),
            rec(2, BackupType::Daily, 60),
            rec(3, BackupType::Daily, 1),
        ];
        assert_eq!(plan_cleanup(&records, policy(30, 10), NOW), vec![BackupId(2)]);
    }

    #[test]
    fn test_cap_keeps_most_recent_regardless_of_type() {
        let records = vec![
            rec(1, BackupType::Weekly, 5),
            rec(2, BackupType::Daily, 4),
            rec(3, BackupType::Manual, 3),
            rec(4, BackupType::Daily, 2),
            rec(5, BackupType::Daily, 1),
        ];
        let doomed = plan_cleanup(&records, policy(30, 3), NOW);
        assert_eq!(doomed, vec![BackupId(1), BackupId(2)]);
    }

    #[test]
    fn test_nothing_to_do() {
        let records = vec![rec(1, BackupType::Daily, 1)];
        assert!(plan_cleanup(&records, policy(30, 10), NOW).is_empty());
    }

    fn kind_strategy() -> impl Strategy<Value = BackupType> {
        prop_oneof![
            Just(BackupType::Daily),
            Just(BackupType::Weekly),
            Just(BackupType::Manual),
        ]
    }

    proptest! {
        #[test]
        fn prop_cap_never_exceeded(
            specs in proptest::collection::vec((kind_strategy(), 0i64..90), 0..40),
            days in 1u32..60,
            max in 1u32..15,
        ) {
            let records: Vec<_> = specs
                .iter()
                .enumerate()
                .map(|(i, (kind, age))| rec(i as i64 + 1, *kind, *age))
                .collect();
            let doomed = plan_cleanup(&records, policy(days, max), NOW);
            let survivors: Vec<_> = records.iter().filter(|r| !doomed.contains(&r.id)).collect();

            prop_assert!(survivors.len() <= max as usize);
            let cutoff = NOW - i64::from(days) * SECS_PER_DAY;
            for s in &survivors {
                prop_assert!(s.backup_type == BackupType::Weekly || s.created_at >= cutoff);
            }
            // Every survivor is newer than every record removed by the cap.
            if let Some(oldest_survivor) = survivors.iter().map(|r| (r.created_at, r.id)).min() {
                for d in records.iter().filter(|r| doomed.contains(&r.id)) {
                    let aged_out = d.backup_type != BackupType::Weekly && d.created_at < cutoff;
                    if !aged_out {
                        prop_assert!((d.created_at, d.id) < oldest_survivor);
                    }
                }
            }
        }
    }
}
