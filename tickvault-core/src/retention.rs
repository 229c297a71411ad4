//! OHLC retention: tiered max-age-by-timeframe rules.
//!
//! A bar of timeframe `t` falls under the first tier whose ceiling is `>= t`
//! and may be purged once older than that tier's max age. Timeframes above
//! every ceiling are kept forever.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DAY_SECS: u64 = 86_400;

/// One `(timeframe ceiling, max age)` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionTier {
    pub timeframe_ceiling_secs: u32,
    pub max_age_secs: u64,
}

impl RetentionTier {
    pub fn new(timeframe_ceiling_secs: u32, max_age_secs: u64) -> Self {
        Self {
            timeframe_ceiling_secs,
            max_age_secs,
        }
    }

    pub fn days(timeframe_ceiling_secs: u32, days: u64) -> Self {
        Self::new(timeframe_ceiling_secs, days * DAY_SECS)
    }
}

/// Bulk-delete criteria for one tier: `timeframe <= ceiling AND timestamp < cutoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupTarget {
    pub timeframe_ceiling_secs: u32,
    pub cutoff_ms: i64,
}

#[derive(Debug, Error, PartialEq)]
pub enum RetentionError {
    #[error("retention tiers must be strictly ascending by timeframe ceiling (tier {index}: {ceiling}s after {previous}s)")]
    NotAscending {
        index: usize,
        ceiling: u32,
        previous: u32,
    },
}

/// Ordered retention tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RetentionTier>", into = "Vec<RetentionTier>")]
pub struct RetentionPolicy {
    tiers: Vec<RetentionTier>,
}

impl RetentionPolicy {
    /// Tiers must be strictly ascending by ceiling. An empty policy never deletes.
    pub fn new(tiers: Vec<RetentionTier>) -> Result<Self, RetentionError> {
        for (index, pair) in tiers.windows(2).enumerate() {
            if pair[1].timeframe_ceiling_secs <= pair[0].timeframe_ceiling_secs {
                return Err(RetentionError::NotAscending {
                    index: index + 1,
                    ceiling: pair[1].timeframe_ceiling_secs,
                    previous: pair[0].timeframe_ceiling_secs,
                });
            }
        }
        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[RetentionTier] {
        &self.tiers
    }

    /// Tier that governs bars of this timeframe, if any.
    pub fn tier_for(&self, timeframe_secs: u32) -> Option<&RetentionTier> {
        self.tiers
            .iter()
            .find(|t| t.timeframe_ceiling_secs >= timeframe_secs)
    }

    pub fn is_eligible(&self, timeframe_secs: u32, bar_age_secs: u64) -> bool {
        self.tier_for(timeframe_secs)
            .is_some_and(|tier| bar_age_secs >= tier.max_age_secs)
    }

    /// One delete target per tier, `cutoff = now - max_age`.
    pub fn cleanup_targets(&self, now_ms: i64) -> Vec<CleanupTarget> {
        self.tiers
            .iter()
            .map(|tier| CleanupTarget {
                timeframe_ceiling_secs: tier.timeframe_ceiling_secs,
                cutoff_ms: now_ms.saturating_sub(
                    i64::try_from(tier.max_age_secs.saturating_mul(1000)).unwrap_or(i64::MAX),
                ),
            })
            .collect()
    }
}

impl Default for RetentionPolicy {
    /// Minute bars up to 5m kept 8 days, up to 30m kept 21 days, up to 2h kept 90 days.
    fn default() -> Self {
        Self {
            tiers: vec![
                RetentionTier::days(300, 8),
                RetentionTier::days(1800, 21),
                RetentionTier::days(7200, 90),
            ],
        }
    }
}

impl TryFrom<Vec<RetentionTier>> for RetentionPolicy {
    type Error = RetentionError;

    fn try_from(tiers: Vec<RetentionTier>) -> Result<Self, Self::Error> {
        Self::new(tiers)
    }
}

impl From<RetentionPolicy> for Vec<RetentionTier> {
    fn from(policy: RetentionPolicy) -> Self {
        policy.tiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u64 = DAY_SECS;

    #[test]
    fn default_tiers_eligibility() {
        let p = RetentionPolicy::default();
        assert!(p.is_eligible(300, 9 * DAY));
        assert!(!p.is_eligible(300, 7 * DAY));
        assert!(p.is_eligible(3600, 100 * DAY)); // falls under the 7200 tier
        assert!(!p.is_eligible(3600, 30 * DAY));
        assert!(!p.is_eligible(86_400, 1000 * DAY)); // no covering tier
    }

    #[test]
    fn age_equal_to_max_is_eligible() {
        let p = RetentionPolicy::new(vec![RetentionTier::new(60, 100)]).unwrap();
        assert!(p.is_eligible(60, 100));
        assert!(!p.is_eligible(60, 99));
    }

    #[test]
    fn rejects_non_ascending_tiers() {
        let err = RetentionPolicy::new(vec![
            RetentionTier::days(300, 8),
            RetentionTier::days(300, 21),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            RetentionError::NotAscending {
                index: 1,
                ceiling: 300,
                previous: 300
            }
        );
    }

    #[test]
    fn empty_policy_never_deletes() {
        let p = RetentionPolicy::new(Vec::new()).unwrap();
        assert!(!p.is_eligible(60, u64::MAX));
        assert!(p.cleanup_targets(0).is_empty());
    }

    #[test]
    fn cleanup_targets_one_per_tier() {
        let p = RetentionPolicy::default();
        let now = 1_000 * DAY as i64 * 1000;
        let targets = p.cleanup_targets(now);
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].timeframe_ceiling_secs, 300);
        assert_eq!(targets[0].cutoff_ms, now - 8 * DAY as i64 * 1000);
        assert_eq!(targets[2].cutoff_ms, now - 90 * DAY as i64 * 1000);
    }

    #[test]
    fn deserialization_validates_order() {
        let ok: RetentionPolicy = serde_json::from_str(
            r#"[{"timeframe_ceiling_secs":60,"max_age_secs":10},{"timeframe_ceiling_secs":120,"max_age_secs":20}]"#,
        )
        .unwrap();
        assert_eq!(ok.tiers().len(), 2);

        let bad = serde_json::from_str::<RetentionPolicy>(
            r#"[{"timeframe_ceiling_secs":120,"max_age_secs":10},{"timeframe_ceiling_secs":60,"max_age_secs":20}]"#,
        );
        assert!(bad.is_err());
    }
}
