use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ScanError};

use super::{ids::ResourceKey, scan::ScanTarget};

/// Upper bound on boundaries walked while looking for the latest due one.
const MAX_BOUNDARY_WALK: usize = 100_000;

/// Parsed cron cadence. Accepts the classic 5-field form (seconds are
/// pinned to zero) as well as 6/7-field expressions.
#[derive(Clone)]
pub struct Cadence {
    expression: String,
    schedule: Schedule,
}

impl Cadence {
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let normalized = match trimmed.split_whitespace().count() {
            5 => format!("0 {trimmed}"),
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(ScanError::InvalidCadence {
                    expression: expression.to_string(),
                    reason: format!("expected 5, 6 or 7 fields, found {n}"),
                });
            }
        };
        let schedule = Schedule::from_str(&normalized).map_err(|err| {
            ScanError::InvalidCadence {
                expression: expression.to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First boundary strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Most recent boundary in `(after, now]`, if any.
    ///
    /// Missed boundaries collapse into this single one.
    pub fn latest_due(
        &self,
        after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let first = self.next_after(after)?;
        if first > now {
            return None;
        }

        // Long outages on dense cadences: only look at the last day first.
        let window_start = now - ChronoDuration::days(1);
        if window_start > after
            && let Some(found) = self.last_in(window_start, now)
        {
            return Some(found);
        }
        self.last_in(after, now)
    }

    fn last_in(
        &self,
        after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after)
            .take(MAX_BOUNDARY_WALK)
            .take_while(|boundary| *boundary <= now)
            .last()
    }
}

impl fmt::Debug for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cadence").field(&self.expression).finish()
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl PartialEq for Cadence {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for Cadence {}

impl FromStr for Cadence {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        Cadence::parse(s)
    }
}

impl Serialize for Cadence {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.expression)
    }
}

impl<'de> Deserialize<'de> for Cadence {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Cadence::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// What to do when a boundary arrives while the previous scan is in flight.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// Skip the firing.
    #[default]
    Forbid,
    /// Cancel the previous scan, then spawn.
    Replace,
    /// Spawn unconditionally.
    Allow,
}

/// Cadence-driven generator of scan requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub key: ResourceKey,
    pub cadence: Cadence,
    /// Profile for every spawned scan; `None` uses the cluster default.
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub target: ScanTarget,
    #[serde(default)]
    pub concurrency: ConcurrencyPolicy,
    /// Spawned requests to keep; `None` uses the reconciler default.
    #[serde(default)]
    pub history_limit: Option<usize>,
    /// Deadline copied onto spawned requests.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    #[serde(default)]
    pub suspended: bool,
    pub created_at: DateTime<Utc>,
}

impl ScheduleDefinition {
    pub fn new(key: ResourceKey, cadence: Cadence) -> Self {
        Self {
            key,
            cadence,
            profile: None,
            target: ScanTarget::Cluster,
            concurrency: ConcurrencyPolicy::Forbid,
            history_limit: None,
            deadline_secs: None,
            suspended: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_concurrency(mut self, policy: ConcurrencyPolicy) -> Self {
        self.concurrency = policy;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    /// Name of the scan request spawned for `boundary`.
    pub fn spawned_name(&self, boundary: DateTime<Utc>) -> String {
        format!("{}-{}", self.key.name, boundary.format("%Y%m%d%H%M%S"))
    }
}

/// Bookkeeping the schedule reconciler keeps per definition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStatus {
    /// Last boundary evaluated, fired or skipped.
    pub last_boundary: Option<DateTime<Utc>>,
    pub last_fired_at: Option<DateTime<Utc>>,
    /// Most recently spawned request.
    pub active: Option<ResourceKey>,
    /// Spawned requests, oldest first.
    #[serde(default)]
    pub spawned: VecDeque<ResourceKey>,
    #[serde(default)]
    pub skipped_firings: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub definition: ScheduleDefinition,
    pub status: ScheduleStatus,
    pub resource_version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn five_field_expressions_get_a_seconds_column() {
        let cadence = Cadence::parse("*/15 * * * *").unwrap();
        assert_eq!(cadence.expression(), "*/15 * * * *");
        assert_eq!(cadence.next_after(at(10, 1, 0)), Some(at(10, 15, 0)));
    }

    #[test]
    fn bad_expressions_are_rejected() {
        assert!(matches!(
            Cadence::parse("every tuesday"),
            Err(ScanError::InvalidCadence { .. })
        ));
        assert!(matches!(
            Cadence::parse("99 * * * *"),
            Err(ScanError::InvalidCadence { .. })
        ));
    }

    #[test]
    fn latest_due_collapses_missed_boundaries() {
        let cadence = Cadence::parse("0 * * * *").unwrap();
        let due = cadence.latest_due(at(6, 0, 0), at(9, 30, 0));
        assert_eq!(due, Some(at(9, 0, 0)));
    }

    #[test]
    fn latest_due_is_none_before_first_boundary() {
        let cadence = Cadence::parse("0 * * * *").unwrap();
        assert_eq!(cadence.latest_due(at(6, 0, 0), at(6, 59, 59)), None);
        assert_eq!(
            cadence.latest_due(at(6, 0, 0), at(7, 0, 0)),
            Some(at(7, 0, 0))
        );
    }

    #[test]
    fn latest_due_handles_long_outages_on_dense_cadences() {
        let cadence = Cadence::parse("* * * * * *").unwrap();
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = at(12, 0, 0);
        assert_eq!(cadence.latest_due(since, now), Some(now));
    }

    #[test]
    fn cadence_round_trips_through_serde_as_a_string() {
        let def = ScheduleDefinition::new(
            ResourceKey::new("ops", "nightly"),
            Cadence::parse("0 2 * * *").unwrap(),
        );
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["cadence"], "0 2 * * *");
        let back: ScheduleDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back.cadence, def.cadence);
    }

    #[test]
    fn spawned_names_embed_the_boundary() {
        let def = ScheduleDefinition::new(
            ResourceKey::new("ops", "nightly"),
            Cadence::parse("0 2 * * *").unwrap(),
        );
        assert_eq!(def.spawned_name(at(2, 0, 0)), "nightly-20250301020000");
    }
}
