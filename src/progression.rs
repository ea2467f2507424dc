//! Experience, levels and the bounded disposal history.
//!
//! Everything here is pure: callers read the current profile and history,
//! hand them in, and persist the returned [`Progression`] themselves.

use crate::error::{Error, Result};
use crate::model::{DisposalRecord, Progress, UserProfile};

/// Experience needed per level: level `L` needs `L * EXP_PER_LEVEL`
pub const EXP_PER_LEVEL: i64 = 100;

/// Maximum number of disposal records kept per user
pub const HISTORY_CAP: usize = 3;

/// Experience required to leave `level`
pub fn required_exp(level: i64) -> Option<i64> {
    level.checked_mul(EXP_PER_LEVEL)
}

/// Apply an experience gain to `progress`. Levels up at most once per call;
/// any overflow past the threshold carries into the next level.
pub fn gain(progress: Progress, xp_gained: i64) -> Result<(Progress, bool)> {
    validate(&progress, xp_gained)?;

    let required = required_exp(progress.level)
        .ok_or_else(|| Error::InvalidInput(format!("level {} too large", progress.level)))?;
    let total = progress
        .exp
        .checked_add(xp_gained)
        .ok_or_else(|| Error::InvalidInput("experience overflow".to_string()))?;
    let total_disposal = progress
        .total_disposal
        .checked_add(1)
        .ok_or_else(|| Error::InvalidInput("disposal count overflow".to_string()))?;

    if total >= required {
        Ok((
            Progress {
                exp: total - required,
                level: progress.level + 1,
                total_disposal,
            },
            true,
        ))
    } else {
        Ok((
            Progress {
                exp: total,
                level: progress.level,
                total_disposal,
            },
            false,
        ))
    }
}

fn validate(progress: &Progress, xp_gained: i64) -> Result<()> {
    if progress.level < 1 {
        return Err(Error::InvalidInput(format!(
            "level must be at least 1, got {}",
            progress.level
        )));
    }
    if progress.exp < 0 {
        return Err(Error::InvalidInput(format!(
            "experience must not be negative, got {}",
            progress.exp
        )));
    }
    if progress.total_disposal < 0 {
        return Err(Error::InvalidInput(format!(
            "disposal count must not be negative, got {}",
            progress.total_disposal
        )));
    }
    if xp_gained < 0 {
        return Err(Error::InvalidInput(format!(
            "experience gain must not be negative, got {}",
            xp_gained
        )));
    }
    Ok(())
}

/// Changes to apply to a user's disposal history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMutation {
    /// Oldest records to delete, deleted before the insert
    pub evict: Vec<DisposalRecord>,
    pub insert: DisposalRecord,
}

impl HistoryMutation {
    /// The history as it looks once the mutation is applied
    pub fn apply_to(&self, history: &[DisposalRecord]) -> Vec<DisposalRecord> {
        let mut kept: Vec<DisposalRecord> = history
            .iter()
            .filter(|r| !self.evict.iter().any(|e| e.id == r.id))
            .cloned()
            .collect();
        kept.push(self.insert.clone());
        kept
    }
}

/// Plan the insert of `record`, evicting the oldest entries so that at most
/// [`HISTORY_CAP`] remain afterwards. `history` must be in store order;
/// among equal timestamps the earlier entry is evicted first.
pub fn plan_history(history: &[DisposalRecord], record: DisposalRecord) -> HistoryMutation {
    let excess = (history.len() + 1).saturating_sub(HISTORY_CAP);

    let mut by_age: Vec<(usize, &DisposalRecord)> = history.iter().enumerate().collect();
    by_age.sort_by_key(|(idx, r)| (r.created_at, *idx));

    HistoryMutation {
        evict: by_age
            .into_iter()
            .take(excess)
            .map(|(_, r)| r.clone())
            .collect(),
        insert: record,
    }
}

/// Result of applying one accepted disposal
#[derive(Debug, Clone)]
pub struct Progression {
    pub previous: Progress,
    pub profile: UserProfile,
    pub xp_gained: i64,
    pub leveled_up: bool,
    pub history: HistoryMutation,
    /// History after the mutation, never longer than [`HISTORY_CAP`]
    pub retained: Vec<DisposalRecord>,
}

/// Compute the post-disposal profile and the history changes for `record`.
pub fn apply_disposal(
    profile: &UserProfile,
    xp_gained: i64,
    history: &[DisposalRecord],
    record: DisposalRecord,
) -> Result<Progression> {
    if record.user_id != profile.id {
        return Err(Error::InvalidInput(format!(
            "disposal for {} applied to profile {}",
            record.user_id, profile.id
        )));
    }
    if let Some(foreign) = history.iter().find(|r| r.user_id != profile.id) {
        return Err(Error::InvalidInput(format!(
            "history of {} contains record {} of {}",
            profile.id, foreign.id, foreign.user_id
        )));
    }

    let previous = profile.progress();
    let (next, leveled_up) = gain(previous, xp_gained)?;
    let mutation = plan_history(history, record);
    let retained = mutation.apply_to(history);

    Ok(Progression {
        previous,
        profile: profile.clone().with_progress(next),
        xp_gained,
        leveled_up,
        history: mutation,
        retained,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WasteCategory;
    use chrono::{TimeZone, Utc};

    fn profile(level: i64, exp: i64) -> UserProfile {
        UserProfile {
            id: "u-1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            image: String::new(),
            region: "Taipei".to_string(),
            exp,
            level,
            total_disposal: 4,
        }
    }

    fn record_at(secs: i64) -> DisposalRecord {
        let mut r = DisposalRecord::new("u-1", WasteCategory::Recyclable, "plastics");
        r.created_at = Utc.timestamp_opt(secs, 0).unwrap();
        r
    }

    #[test]
    fn test_gain_below_threshold() {
        let p = profile(3, 120);
        let out = apply_disposal(&p, 100, &[], record_at(10)).unwrap();
        assert_eq!(out.profile.level, 3);
        assert_eq!(out.profile.exp, 220);
        assert!(!out.leveled_up);
        assert_eq!(out.profile.total_disposal, 5);
    }

    #[test]
    fn test_level_up_carries_remainder() {
        let p = profile(1, 80);
        let out = apply_disposal(&p, 50, &[], record_at(10)).unwrap();
        assert_eq!(out.profile.level, 2);
        assert_eq!(out.profile.exp, 30);
        assert_eq!(out.profile.total_disposal, 5);
        assert!(out.leveled_up);
    }

    #[test]
    fn test_exact_threshold_levels_up() {
        let (next, up) = gain(
            Progress {
                exp: 150,
                level: 2,
                total_disposal: 0,
            },
            50,
        )
        .unwrap();
        assert!(up);
        assert_eq!(next.level, 3);
        assert_eq!(next.exp, 0);
    }

    #[test]
    fn test_large_gain_levels_up_once() {
        let (next, up) = gain(
            Progress {
                exp: 0,
                level: 1,
                total_disposal: 0,
            },
            1_000,
        )
        .unwrap();
        assert!(up);
        assert_eq!(next.level, 2);
        assert_eq!(next.exp, 900);
    }

    #[test]
    fn test_threshold_rule_over_grid() {
        for level in 1..6 {
            for exp in (0..level * 100).step_by(37) {
                for xp in [0, 1, 25, 99, 100, 250] {
                    let start = Progress {
                        exp,
                        level,
                        total_disposal: 0,
                    };
                    let (next, up) = gain(start, xp).unwrap();
                    if exp + xp < level * 100 {
                        assert_eq!((next.level, next.exp, up), (level, exp + xp, false));
                    } else {
                        assert_eq!(
                            (next.level, next.exp, up),
                            (level + 1, exp + xp - level * 100, true)
                        );
                    }
                    assert_eq!(next.total_disposal, 1);
                }
            }
        }
    }

    #[test]
    fn test_rejects_invalid_input() {
        let bad = [
            (profile(0, 0), 10),
            (profile(1, -5), 10),
            (profile(1, 0), -1),
        ];
        for (p, xp) in bad {
            let err = apply_disposal(&p, xp, &[], record_at(1)).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_rejects_overflow() {
        let p = profile(1, i64::MAX - 1);
        assert!(apply_disposal(&p, 10, &[], record_at(1)).is_err());
    }

    #[test]
    fn test_rejects_foreign_record() {
        let p = profile(1, 0);
        let mut r = record_at(1);
        r.user_id = "u-2".to_string();
        assert!(matches!(
            apply_disposal(&p, 10, &[], r),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_empty_history_gets_one_record() {
        let out = apply_disposal(&profile(1, 0), 10, &[], record_at(1)).unwrap();
        assert!(out.history.evict.is_empty());
        assert_eq!(out.retained.len(), 1);
    }

    #[test]
    fn test_full_history_evicts_oldest() {
        let t1 = record_at(100);
        let t2 = record_at(200);
        let t3 = record_at(300);
        let t4 = record_at(400);
        // store order deliberately differs from age order
        let history = vec![t2.clone(), t1.clone(), t3.clone()];

        let out = apply_disposal(&profile(1, 0), 10, &history, t4.clone()).unwrap();
        assert_eq!(out.history.evict, vec![t1]);
        let mut ids: Vec<_> = out.retained.iter().map(|r| r.id).collect();
        ids.sort();
        let mut expected = vec![t2.id, t3.id, t4.id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_equal_timestamps_evict_in_store_order() {
        let first = record_at(100);
        let second = record_at(100);
        let third = record_at(300);
        let history = vec![first.clone(), second.clone(), third];

        let plan = plan_history(&history, record_at(400));
        assert_eq!(plan.evict, vec![first]);
    }

    #[test]
    fn test_overfull_history_is_trimmed_to_cap() {
        let history: Vec<_> = (1..=5).map(|i| record_at(i * 10)).collect();
        let plan = plan_history(&history, record_at(100));
        assert_eq!(plan.evict.len(), 3);
        assert_eq!(plan.apply_to(&history).len(), HISTORY_CAP);
    }

    #[test]
    fn test_history_never_exceeds_cap() {
        let mut history = Vec::new();
        let mut p = profile(1, 0);
        for i in 0..10 {
            let out = apply_disposal(&p, 40, &history, record_at(i)).unwrap();
            history = out.retained;
            p = out.profile;
            assert!(history.len() <= HISTORY_CAP);
        }
        assert_eq!(history.len(), HISTORY_CAP);
        let secs: Vec<_> = history.iter().map(|r| r.created_at.timestamp()).collect();
        assert_eq!(secs, vec![7, 8, 9]);
        assert_eq!(p.total_disposal, 14);
    }
}
