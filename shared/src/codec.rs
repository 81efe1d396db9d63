//! JSON codec for jobs topics
//!
//! Inbound payloads are decoded strictly enough to reject non-JSON and
//! structurally wrong messages, and leniently enough to tolerate fields the
//! orchestrator omits. Outbound bodies are always well-formed JSON, so status
//! details containing quotes or newlines survive the trip.

use bytes::Bytes;
use thiserror::Error;

use crate::{JobDocumentResponse, JobNotification, StatusUpdate};

/// Body of a job document request
pub const EMPTY_REQUEST: &[u8] = b"{}";

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid job notification: {0}")]
    InvalidNotification(#[source] serde_json::Error),

    #[error("Invalid job document: {0}")]
    InvalidDocument(#[source] serde_json::Error),

    #[error("Status update encode error: {0}")]
    EncodeError(#[from] serde_json::Error),
}

/// Decode a payload received on the `notify` topic
pub fn decode_notification(payload: &[u8]) -> Result<JobNotification, CodecError> {
    serde_json::from_slice(payload).map_err(CodecError::InvalidNotification)
}

/// Decode a payload received on a job's `get/accepted` topic
pub fn decode_document(payload: &[u8]) -> Result<JobDocumentResponse, CodecError> {
    serde_json::from_slice(payload).map_err(CodecError::InvalidDocument)
}

/// Encode a status update body for a job's `update` topic
pub fn encode_status(update: &StatusUpdate) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(serde_json::to_vec(update)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobStatus;

    #[test]
    fn test_decode_notification_with_queued_jobs() {
        let payload = br#"{
            "timestamp": 1700000000,
            "jobs": {
                "QUEUED": [
                    {"jobId": "j1", "queuedAt": 1, "lastUpdatedAt": 2, "executionNumber": 1, "versionNumber": 1},
                    {"jobId": "j2", "queuedAt": 3, "lastUpdatedAt": 4, "executionNumber": 1, "versionNumber": 1}
                ],
                "IN_PROGRESS": [
                    {"jobId": "j0", "queuedAt": 0, "lastUpdatedAt": 0, "executionNumber": 1, "versionNumber": 2}
                ]
            }
        }"#;

        let notification = decode_notification(payload).expect("decode failed");
        assert_eq!(notification.timestamp, 1700000000);

        let queued: Vec<&str> = notification
            .queued()
            .iter()
            .map(|j| j.job_id.as_str())
            .collect();
        assert_eq!(queued, vec!["j1", "j2"]);
    }

    #[test]
    fn test_decode_notification_minimal() {
        let notification =
            decode_notification(br#"{"jobs":{"QUEUED":[{"jobId":"j1"}]}}"#).expect("decode failed");
        assert_eq!(notification.timestamp, 0);
        assert_eq!(notification.queued()[0].job_id, "j1");
        assert_eq!(notification.queued()[0].execution_number, 0);
    }

    #[test]
    fn test_decode_notification_not_json() {
        let result = decode_notification(b"not json at all");
        assert!(matches!(result, Err(CodecError::InvalidNotification(_))));
    }

    #[test]
    fn test_decode_document() {
        let payload = br#"{
            "execution": {
                "jobId": "j1",
                "status": "IN_PROGRESS",
                "jobDocument": {
                    "version": "1.0",
                    "steps": [
                        {"action": {"name": "greet", "type": "runCommand", "input": {"command": "echo hi"}, "runAsUser": "pi"}},
                        {"action": {"name": "wait", "type": "sleep"}}
                    ]
                }
            }
        }"#;

        let response = decode_document(payload).expect("decode failed");
        let execution = response.execution;
        assert_eq!(execution.job_id, "j1");
        assert_eq!(execution.job_document.version, "1.0");
        assert_eq!(execution.job_document.steps.len(), 2);

        let first = &execution.job_document.steps[0].action;
        assert!(first.is_run_command());
        assert_eq!(first.input.command, "echo hi");
        assert_eq!(first.run_as_user, "pi");

        let second = &execution.job_document.steps[1].action;
        assert_eq!(second.action_type, "sleep");
        assert!(second.input.command.is_empty());
        assert!(second.run_as_user.is_empty());
    }

    #[test]
    fn test_decode_notification_null_bucket() {
        let notification = decode_notification(br#"{"timestamp":null,"jobs":{"QUEUED":null}}"#)
            .expect("decode failed");
        assert_eq!(notification.timestamp, 0);
        assert!(notification.queued().is_empty());

        let notification = decode_notification(br#"{"jobs":null}"#).expect("decode failed");
        assert!(notification.jobs_by_status.is_empty());
    }

    #[test]
    fn test_decode_document_null_fields() {
        let payload = br#"{
            "execution": {
                "jobId": "j1",
                "status": null,
                "jobDocument": {
                    "version": null,
                    "steps": [
                        {"action": {"name": null, "type": "runCommand", "input": {"command": "echo hi"}, "runAsUser": null}},
                        {"action": {"name": "noop", "type": "runCommand", "input": null}}
                    ]
                }
            }
        }"#;

        let execution = decode_document(payload).expect("decode failed").execution;
        assert!(execution.status.is_empty());
        assert!(execution.job_document.version.is_empty());

        let first = &execution.job_document.steps[0].action;
        assert!(first.is_run_command());
        assert_eq!(first.input.command, "echo hi");
        assert!(first.run_as_user.is_empty());
        assert!(first.name.is_empty());

        let second = &execution.job_document.steps[1].action;
        assert!(second.input.command.is_empty());
    }

    #[test]
    fn test_decode_document_null_steps() {
        let response =
            decode_document(br#"{"execution":{"jobId":"j1","jobDocument":{"steps":null}}}"#)
                .expect("decode failed");
        assert!(response.execution.job_document.steps.is_empty());

        let response = decode_document(br#"{"execution":{"jobId":"j1","jobDocument":null}}"#)
            .expect("decode failed");
        assert!(response.execution.job_document.steps.is_empty());
    }

    #[test]
    fn test_decode_document_without_execution() {
        let result = decode_document(br#"{"timestamp": 1}"#);
        assert!(matches!(result, Err(CodecError::InvalidDocument(_))));
    }

    #[test]
    fn test_encode_status_body() {
        let body = encode_status(&StatusUpdate::new(JobStatus::Succeeded, "All steps executed"))
            .expect("encode failed");
        assert_eq!(
            &body[..],
            br#"{"status":"SUCCEEDED","statusDetails":{"details":"All steps executed"}}"#
        );
    }

    #[test]
    fn test_encode_status_escapes_details() {
        let body = encode_status(&StatusUpdate::new(
            JobStatus::Failed,
            "Error: exit status 1: \"quoted\"\nsecond line",
        ))
        .expect("encode failed");

        let parsed: StatusUpdate = serde_json::from_slice(&body).expect("body is not JSON");
        assert_eq!(parsed.status, JobStatus::Failed);
        assert!(parsed.status_details.details.contains("\"quoted\"\nsecond"));
    }
}
