//! IoT Jobs Shared Protocol Types
//!
//! This crate provides the wire types, JSON codec and topic addressing used by
//! the device-side jobs agent to talk to the jobs orchestrator over MQTT.

pub mod codec;
pub mod topics;

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use topics::{DeviceTopics, JobTopic};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Protocol parameters for the jobs agent
pub mod protocol {
    use std::time::Duration;

    /// How long a status publish waits for the broker's PUBACK
    pub const ACK_TIMEOUT: Duration = Duration::from_secs(5);

    /// Status bucket holding jobs that have not been picked up yet
    pub const QUEUED: &str = "QUEUED";

    /// The only executable action type
    pub const RUN_COMMAND: &str = "runCommand";

    /// Details sent with the IN_PROGRESS update when a job is picked up
    pub const JOB_STARTED: &str = "Job started";

    /// Details sent with the terminal SUCCEEDED update
    pub const ALL_STEPS_EXECUTED: &str = "All steps executed";
}

/// Read an explicit `null` as the field's default, like an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Status buckets where either the map or a single bucket may be `null`
fn null_buckets_as_empty<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, Vec<JobSummary>>, D::Error>
where
    D: Deserializer<'de>,
{
    let buckets: Option<HashMap<String, Option<Vec<JobSummary>>>> =
        Option::deserialize(deserializer)?;
    Ok(buckets
        .unwrap_or_default()
        .into_iter()
        .map(|(status, jobs)| (status, jobs.unwrap_or_default()))
        .collect())
}

/// Lifecycle status of a job execution as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Whether this status ends the job's lifecycle on the device
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification delivered on `$aws/things/<thing>/jobs/notify`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobNotification {
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: i64,
    /// Pending jobs grouped by status label, in orchestrator order
    #[serde(rename = "jobs", default, deserialize_with = "null_buckets_as_empty")]
    pub jobs_by_status: HashMap<String, Vec<JobSummary>>,
}

impl JobNotification {
    /// Jobs waiting in the QUEUED bucket, empty when the bucket is absent
    pub fn queued(&self) -> &[JobSummary] {
        self.jobs_by_status
            .get(protocol::QUEUED)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub queued_at: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub last_updated_at: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub execution_number: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version_number: i64,
}

/// Response delivered on `$aws/things/<thing>/jobs/<job>/get/accepted`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobDocumentResponse {
    pub execution: JobExecution,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
    pub job_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub job_document: JobDocument,
}

/// Ordered list of steps to run for a job
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobDocument {
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Step {
    #[serde(default, deserialize_with = "null_as_default")]
    pub action: Action,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub action_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub input: ActionInput,
    /// Local user to run the command as; empty runs as the agent
    #[serde(default, deserialize_with = "null_as_default")]
    pub run_as_user: String,
}

impl Action {
    pub fn is_run_command(&self) -> bool {
        self.action_type == protocol::RUN_COMMAND
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ActionInput {
    #[serde(default, deserialize_with = "null_as_default")]
    pub command: String,
}

/// Body published on `$aws/things/<thing>/jobs/<job>/update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub status_details: StatusDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDetails {
    pub details: String,
}

impl StatusUpdate {
    pub fn new(status: JobStatus, details: impl Into<String>) -> Self {
        Self {
            status,
            status_details: StatusDetails {
                details: details.into(),
            },
        }
    }
}

/// Outcome of running one job document
#[derive(Debug, Clone, PartialEq)]
pub struct JobExecutionResult {
    pub job_id: String,
    pub status: JobStatus,
    pub details: String,
}

impl JobExecutionResult {
    /// Every executable step ran and exited cleanly
    pub fn succeeded(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Succeeded,
            details: protocol::ALL_STEPS_EXECUTED.into(),
        }
    }

    /// A step failed; `error` describes the failure
    pub fn failed(job_id: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            details: format!("Error: {}", error),
        }
    }
}
