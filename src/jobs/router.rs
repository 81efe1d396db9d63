//! Message router - single entry point for inbound broker messages

use super::document::DocumentProcessor;
use super::executor::CommandRunner;
use super::notification::NotificationProcessor;
use super::reporter::StatusReporter;
use crate::transport::{InboundMessage, Transport};
use iot_jobs_shared::{DeviceTopics, JobTopic};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Classifies inbound messages by topic and hands them to the right stage.
///
/// Holds no per-message state, so concurrent deliveries may share one router.
pub struct MessageRouter {
    topics: DeviceTopics,
    transport: Arc<dyn Transport>,
    notifications: NotificationProcessor,
    documents: DocumentProcessor,
}

impl MessageRouter {
    /// Wire up the pipeline for one device
    pub fn new(
        topics: DeviceTopics,
        transport: Arc<dyn Transport>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let reporter = StatusReporter::new(topics.clone(), transport.clone());
        Self {
            notifications: NotificationProcessor::new(
                topics.clone(),
                transport.clone(),
                reporter.clone(),
            ),
            documents: DocumentProcessor::new(runner, reporter),
            topics,
            transport,
        }
    }

    /// Route one message, then acknowledge it whatever the outcome
    pub async fn route(&self, message: &InboundMessage) {
        let topic = message.topic.as_str();
        debug!(
            topic,
            payload = %String::from_utf8_lossy(&message.payload),
            "Received message"
        );

        match self.topics.classify(topic) {
            JobTopic::Notify => {
                self.notifications.on_notification(&message.payload).await;
            }
            JobTopic::DocumentAccepted { job_id } => {
                debug!(job_id, "Job document received");
                self.documents.on_document(&message.payload).await;
            }
            JobTopic::UpdateAccepted { job_id } => {
                info!(job_id, "Job status update acknowledged");
            }
            JobTopic::Unhandled { job_id } => {
                info!(job_id, topic, "Unhandled job-related message");
            }
            JobTopic::Unknown => {
                warn!(topic, "Unknown message type");
            }
        }

        if let Err(e) = self.transport.ack(message).await {
            error!(topic, "Failed to acknowledge message: {}", e);
        }
    }
}
