//! Status reporter - publishes job status updates to the orchestrator

use crate::transport::{QoS, Transport};
use iot_jobs_shared::{codec, protocol, DeviceTopics, JobExecutionResult, JobStatus, StatusUpdate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Publishes `{status, statusDetails}` on a job's `update` topic.
///
/// Delivery is best-effort: the publish is queued inline so updates leave in
/// call order, and the wait for the broker's PUBACK runs on a detached task
/// whose outcome is only logged. Nothing is retried.
#[derive(Clone)]
pub struct StatusReporter {
    topics: DeviceTopics,
    transport: Arc<dyn Transport>,
    ack_timeout: Duration,
}

impl StatusReporter {
    pub fn new(topics: DeviceTopics, transport: Arc<dyn Transport>) -> Self {
        Self {
            topics,
            transport,
            ack_timeout: protocol::ACK_TIMEOUT,
        }
    }

    /// Override how long the detached task waits for the broker
    #[cfg(test)]
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub async fn report(&self, job_id: &str, status: JobStatus, details: &str) {
        let topic = self.topics.job_update(job_id);

        let body = match codec::encode_status(&StatusUpdate::new(status, details)) {
            Ok(body) => body,
            Err(e) => {
                error!(job_id, %status, "Failed to encode status: {}", e);
                return;
            }
        };

        let delivery = match self.transport.publish(&topic, body, QoS::AtLeastOnce).await {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(job_id, %status, "Failed to publish status: {}", e);
                return;
            }
        };

        if status.is_terminal() {
            info!(job_id, %status, details, "Reporting job outcome");
        } else {
            debug!(job_id, %status, "Reporting job progress");
        }

        let job_id = job_id.to_string();
        let ack_timeout = self.ack_timeout;
        tokio::spawn(async move {
            match delivery.wait(ack_timeout).await {
                Ok(()) => debug!(job_id = %job_id, %status, "Status update delivered"),
                Err(e) => warn!(job_id = %job_id, %status, "Failed to publish status: {}", e),
            }
        });
    }

    pub async fn report_result(&self, result: &JobExecutionResult) {
        self.report(&result.job_id, result.status, &result.details)
            .await;
    }
}
