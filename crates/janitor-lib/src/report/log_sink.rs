//! Structured-log rendering of pass reports

use super::{PassReport, ReportSink, StalenessClassifier};
use crate::models::OrphanKind;
use crate::observability::StructuredLogger;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, SecondsFormat};

/// Writes one warning per finding plus the pass summary
pub struct LogSink {
    logger: StructuredLogger,
    age_label: String,
}

impl LogSink {
    pub fn new(logger: StructuredLogger, staleness: &StalenessClassifier) -> Self {
        Self {
            logger,
            age_label: humanize(staleness.threshold()),
        }
    }
}

#[async_trait]
impl ReportSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, report: &PassReport) -> Result<()> {
        for finding in &report.findings {
            let exit_time = finding
                .exit_time
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));

            match finding.kind {
                OrphanKind::OrphanPause => self.logger.log_orphan_sandbox(
                    &finding.pod_uid,
                    &finding.sandbox_id,
                    exit_time.as_deref(),
                ),
                kind => self.logger.log_orphan_container(
                    kind,
                    &finding.container_id,
                    &finding.pod_uid,
                    &finding.sandbox_id,
                    exit_time.as_deref(),
                    finding.aged.then_some(self.age_label.as_str()),
                ),
            }
        }

        self.logger.log_pass_complete(
            report.pass_id,
            report.runtime.as_str(),
            report.containers_scanned,
            report.known_pods,
            report.findings.len(),
            (report.completed_at - report.started_at)
                .num_milliseconds()
                .max(0) as u128,
        );

        Ok(())
    }
}

/// Render a threshold the way operators write it ("24h", "90m", "45s")
fn humanize(duration: Duration) -> String {
    let secs = duration.num_seconds();
    if secs > 0 && secs % 86_400 == 0 && secs / 86_400 > 1 {
        format!("{}d", secs / 86_400)
    } else if secs > 0 && secs % 3_600 == 0 {
        format!("{}h", secs / 3_600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::{report, reported};
    use chrono::Utc;

    #[test]
    fn test_humanize() {
        assert_eq!(humanize(Duration::hours(24)), "24h");
        assert_eq!(humanize(Duration::days(3)), "3d");
        assert_eq!(humanize(Duration::minutes(90)), "90m");
        assert_eq!(humanize(Duration::seconds(45)), "45s");
    }

    #[tokio::test]
    async fn test_log_sink_accepts_every_kind() {
        let sink = LogSink::new(
            StructuredLogger::new("test-node"),
            &StalenessClassifier::default(),
        );
        let report = report(vec![
            reported("a", OrphanKind::OrphanApi, None, false),
            reported(
                "b",
                OrphanKind::OrphanApi,
                Some(Utc::now() - Duration::days(2)),
                true,
            ),
            reported("c", OrphanKind::OrphanPause, None, false),
        ]);

        assert!(sink.publish(&report).await.is_ok());
        assert_eq!(sink.name(), "log");
    }
}
