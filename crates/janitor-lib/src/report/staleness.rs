//! Age decoration for stopped orphan containers
//!
//! Orphan status does not depend on how long a container has been stopped;
//! age only raises the urgency a finding is reported with.

use chrono::{DateTime, Duration, Utc};

/// Default age after which a stopped orphan is flagged (24 hours)
pub const DEFAULT_STALE_AFTER_SECS: i64 = 24 * 60 * 60;

/// Flags findings whose container exited more than `threshold` ago
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessClassifier {
    threshold: Duration,
}

impl StalenessClassifier {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// True when the container has exited and `now - exit_time` exceeds the threshold
    pub fn is_aged(&self, exit_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        exit_time.is_some_and(|exited| now - exited > self.threshold)
    }
}

impl Default for StalenessClassifier {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_STALE_AFTER_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_container_is_never_aged() {
        let classifier = StalenessClassifier::default();
        assert!(!classifier.is_aged(None, Utc::now()));
    }

    #[test]
    fn test_default_threshold_is_24h() {
        let classifier = StalenessClassifier::default();
        let now = Utc::now();

        assert!(classifier.is_aged(Some(now - Duration::hours(25)), now));
        assert!(!classifier.is_aged(Some(now - Duration::hours(23)), now));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let classifier = StalenessClassifier::new(Duration::minutes(10));
        let now = Utc::now();

        assert!(!classifier.is_aged(Some(now - Duration::minutes(10)), now));
        assert!(classifier.is_aged(
            Some(now - Duration::minutes(10) - Duration::seconds(1)),
            now
        ));
    }

    #[test]
    fn test_exit_time_in_future_is_not_aged() {
        let classifier = StalenessClassifier::default();
        let now = Utc::now();
        assert!(!classifier.is_aged(Some(now + Duration::hours(48)), now));
    }
}
