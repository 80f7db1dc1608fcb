//! Utility functions for the matchmaking service

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique match ID
pub fn generate_match_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique ready check ID
pub fn generate_ready_check_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique formation ID
pub fn generate_formation_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Whole seconds elapsed between `since` and `now`, never negative
pub fn waiting_seconds(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_seconds().max(0)
}

/// Match duration in minutes, rounded to the nearest minute
pub fn duration_minutes(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> i64 {
    let seconds = (ended_at - started_at).num_seconds().max(0);
    (seconds + 30) / 60
}

/// Convert a std duration into a chrono duration, saturating on overflow
pub fn to_chrono_duration(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_generate_unique_ids() {
        assert_ne!(generate_match_id(), generate_match_id());
        assert_ne!(generate_ready_check_id(), generate_ready_check_id());
    }

    #[test]
    fn test_waiting_seconds() {
        let now = current_timestamp();
        assert_eq!(waiting_seconds(now - Duration::seconds(75), now), 75);
        // Clock skew never yields a negative wait
        assert_eq!(waiting_seconds(now + Duration::seconds(5), now), 0);
    }

    #[test]
    fn test_duration_minutes_rounds() {
        let start = current_timestamp();
        assert_eq!(duration_minutes(start, start + Duration::seconds(89)), 1);
        assert_eq!(duration_minutes(start, start + Duration::seconds(90)), 2);
        assert_eq!(duration_minutes(start, start), 0);
    }
}
