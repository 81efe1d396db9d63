//! Job notification processor - picks up newly queued jobs

use super::reporter::StatusReporter;
use crate::transport::{QoS, Transport};
use bytes::Bytes;
use iot_jobs_shared::{codec, protocol, DeviceTopics, JobStatus};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Handles payloads from the `notify` topic.
///
/// Every job in the QUEUED bucket is marked IN_PROGRESS and its document is
/// requested, one job at a time in notification order. There is no guard
/// against a job being notified again before its first run has finished.
pub struct NotificationProcessor {
    topics: DeviceTopics,
    transport: Arc<dyn Transport>,
    reporter: StatusReporter,
}

impl NotificationProcessor {
    pub fn new(
        topics: DeviceTopics,
        transport: Arc<dyn Transport>,
        reporter: StatusReporter,
    ) -> Self {
        Self {
            topics,
            transport,
            reporter,
        }
    }

    pub async fn on_notification(&self, payload: &[u8]) {
        let notification = match codec::decode_notification(payload) {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to parse job notification: {}", e);
                return;
            }
        };

        let queued = notification.queued();
        if queued.is_empty() {
            debug!("No QUEUED jobs to process");
            return;
        }

        for job in queued {
            info!(
                job_id = %job.job_id,
                execution_number = job.execution_number,
                "Processing QUEUED job"
            );
            self.reporter
                .report(&job.job_id, JobStatus::InProgress, protocol::JOB_STARTED)
                .await;
            self.request_document(&job.job_id).await;
        }
    }

    /// Ask the orchestrator for a job's document; the answer arrives on `get/accepted`
    async fn request_document(&self, job_id: &str) {
        let topic = self.topics.job_get(job_id);
        let body = Bytes::from_static(codec::EMPTY_REQUEST);

        let result = match self.transport.publish(&topic, body, QoS::AtLeastOnce).await {
            Ok(delivery) => delivery.wait(protocol::ACK_TIMEOUT).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            error!(job_id, "Failed to request job document: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::RecordingTransport;
    use serde_json::json;

    fn processor(transport: &Arc<RecordingTransport>) -> NotificationProcessor {
        let topics = DeviceTopics::new("thing-1");
        let reporter = StatusReporter::new(topics.clone(), transport.clone());
        NotificationProcessor::new(topics, transport.clone(), reporter)
    }

    #[tokio::test]
    async fn test_no_queued_bucket_publishes_nothing() {
        let transport = Arc::new(RecordingTransport::new());
        let processor = processor(&transport);

        for payload in [
            r#"{}"#,
            r#"{"timestamp": 1, "jobs": {}}"#,
            r#"{"timestamp": 1, "jobs": {"QUEUED": []}}"#,
            r#"{"timestamp": 1, "jobs": {"QUEUED": null}}"#,
            r#"{"timestamp": 1, "jobs": {"IN_PROGRESS": [{"jobId": "j0"}]}}"#,
        ] {
            processor.on_notification(payload.as_bytes()).await;
        }

        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_queued_jobs_marked_and_requested_in_order() {
        let transport = Arc::new(RecordingTransport::new());
        let payload = json!({
            "timestamp": 1700000000,
            "jobs": {
                "QUEUED": [
                    {"jobId": "j1", "queuedAt": 1, "lastUpdatedAt": 1, "executionNumber": 1, "versionNumber": 1},
                    {"jobId": "j2", "queuedAt": 2, "lastUpdatedAt": 2, "executionNumber": 1, "versionNumber": 1},
                    {"jobId": "j3", "queuedAt": 3, "lastUpdatedAt": 3, "executionNumber": 1, "versionNumber": 1}
                ]
            }
        });

        processor(&transport)
            .on_notification(payload.to_string().as_bytes())
            .await;

        let topics: Vec<String> = transport.published().into_iter().map(|p| p.topic).collect();
        assert_eq!(
            topics,
            vec![
                "$aws/things/thing-1/jobs/j1/update",
                "$aws/things/thing-1/jobs/j1/get",
                "$aws/things/thing-1/jobs/j2/update",
                "$aws/things/thing-1/jobs/j2/get",
                "$aws/things/thing-1/jobs/j3/update",
                "$aws/things/thing-1/jobs/j3/get",
            ]
        );
    }

    #[tokio::test]
    async fn test_in_progress_update_then_empty_get() {
        let transport = Arc::new(RecordingTransport::new());
        processor(&transport)
            .on_notification(br#"{"jobs":{"QUEUED":[{"jobId":"j1"}]}}"#)
            .await;

        let published = transport.published();
        assert_eq!(published.len(), 2);
        assert_eq!(
            published[0].json(),
            json!({"status": "IN_PROGRESS", "statusDetails": {"details": "Job started"}})
        );
        assert_eq!(published[1].topic, "$aws/things/thing-1/jobs/j1/get");
        assert_eq!(&published[1].payload[..], b"{}");
        assert_eq!(published[1].qos, QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn test_malformed_notification_publishes_nothing() {
        let transport = Arc::new(RecordingTransport::new());
        let processor = processor(&transport);

        processor.on_notification(b"not json").await;
        processor.on_notification(br#"{"jobs": ["QUEUED"]}"#).await;
        processor.on_notification(br#"{"jobs":{"QUEUED":[{"queuedAt": 1}]}}"#).await;

        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_failed_publishes_do_not_stop_processing() {
        let transport = Arc::new(RecordingTransport::failing());
        processor(&transport)
            .on_notification(br#"{"jobs":{"QUEUED":[{"jobId":"j1"},{"jobId":"j2"}]}}"#)
            .await;

        // every attempt is still made
        assert_eq!(transport.published().len(), 4);
    }
}
