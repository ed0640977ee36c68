//! Online/offline evaluation heuristic.
//!
//! A stored `online = true` is only trusted while it is fresh: the record
//! must have been seen within the online window and, when the client sends
//! heartbeats, heartbeated within the heartbeat window. This demotes users
//! whose disconnect cleanup never ran.

use chrono::{DateTime, Utc};

use presencekit_core::config::StalenessConfig;
use presencekit_core::types::{PresenceRecord, ProfileMirror};

use super::status::PresenceStatus;

/// Staleness-aware online check.
#[derive(Debug, Clone, Copy)]
pub struct OnlineEvaluator {
    online_window: chrono::Duration,
    heartbeat_window: chrono::Duration,
}

impl OnlineEvaluator {
    /// Build an evaluator from configured thresholds.
    pub fn new(config: &StalenessConfig) -> Self {
        Self {
            online_window: config.online_window(),
            heartbeat_window: config.heartbeat_window(),
        }
    }

    /// Whether `record` shows the user online at `now`.
    pub fn evaluate(&self, record: &PresenceRecord, now: DateTime<Utc>) -> bool {
        if !record.online || now - record.last_seen > self.online_window {
            return false;
        }
        match record.heartbeat {
            Some(heartbeat) => now - heartbeat <= self.heartbeat_window,
            None => true,
        }
    }

    /// Whether the durable mirror shows the user online at `now`.
    ///
    /// Profiles carry no heartbeat, so only the online window applies.
    pub fn evaluate_profile(&self, profile: &ProfileMirror, now: DateTime<Utc>) -> bool {
        profile.is_online
            && profile
                .last_seen
                .is_some_and(|last_seen| now - last_seen <= self.online_window)
    }

    /// Status for display.
    pub fn status(&self, record: &PresenceRecord, now: DateTime<Utc>) -> PresenceStatus {
        if self.evaluate(record, now) {
            PresenceStatus::Online
        } else {
            PresenceStatus::Offline {
                last_seen: Some(record.last_seen),
            }
        }
    }
}

impl Default for OnlineEvaluator {
    fn default() -> Self {
        Self::new(&StalenessConfig::default())
    }
}

/// [`OnlineEvaluator::evaluate`] with the default thresholds.
pub fn evaluate(record: &PresenceRecord, now: DateTime<Utc>) -> bool {
    OnlineEvaluator::default().evaluate(record, now)
}

/// [`OnlineEvaluator::status`] with the default thresholds.
pub fn presence_status(record: &PresenceRecord, now: DateTime<Utc>) -> PresenceStatus {
    OnlineEvaluator::default().status(record, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    use presencekit_core::types::PresenceSource;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn online_record(heartbeat: Option<DateTime<Utc>>) -> PresenceRecord {
        let mut record = PresenceRecord::offline(t0());
        record.online = true;
        record.heartbeat = heartbeat;
        record
    }

    #[test]
    fn test_offline_flag_is_never_online() {
        let record = PresenceRecord::offline(t0());
        assert!(!evaluate(&record, t0()));
    }

    #[test]
    fn test_online_window_boundary() {
        let record = online_record(None);
        assert!(evaluate(&record, t0() + Duration::seconds(120)));
        assert!(!evaluate(&record, t0() + Duration::seconds(121)));
    }

    #[test]
    fn test_stale_heartbeat_demotes() {
        let mut record = online_record(Some(t0()));
        record.last_seen = t0() + Duration::seconds(90);
        assert!(evaluate(&record, t0() + Duration::seconds(60)));
        assert!(!evaluate(&record, t0() + Duration::seconds(61)));
    }

    #[test]
    fn test_false_stays_false_after_window() {
        let record = online_record(Some(t0()));
        let evaluator = OnlineEvaluator::default();
        let first_offline = (0..600)
            .map(|s| t0() + Duration::seconds(s))
            .position(|now| !evaluator.evaluate(&record, now))
            .unwrap();

        for s in first_offline as i64..3600 {
            assert!(!evaluator.evaluate(&record, t0() + Duration::seconds(s)));
        }
    }

    #[test]
    fn test_custom_thresholds() {
        let evaluator = OnlineEvaluator::new(&StalenessConfig {
            online_window_seconds: 10,
            heartbeat_window_seconds: 5,
        });
        let record = online_record(None);
        assert!(evaluator.evaluate(&record, t0() + Duration::seconds(10)));
        assert!(!evaluator.evaluate(&record, t0() + Duration::seconds(11)));
    }

    #[test]
    fn test_profile_uses_online_window_only() {
        let mut profile = ProfileMirror::empty();
        let evaluator = OnlineEvaluator::default();
        assert!(!evaluator.evaluate_profile(&profile, t0()));

        profile.apply(&presencekit_core::types::ProfilePatch::presence(true, PresenceSource::Manual), t0());
        assert!(evaluator.evaluate_profile(&profile, t0() + Duration::seconds(120)));
        assert!(!evaluator.evaluate_profile(&profile, t0() + Duration::seconds(121)));
    }

    #[test]
    fn test_status_reports_last_seen() {
        let record = online_record(None);
        assert_eq!(presence_status(&record, t0()), PresenceStatus::Online);
        let status = presence_status(&record, t0() + Duration::seconds(300));
        assert_eq!(status, PresenceStatus::Offline { last_seen: Some(t0()) });
        assert_eq!(status.as_str(), "offline");
    }
}
