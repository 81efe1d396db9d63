//! Topic addressing for the jobs protocol
//!
//! Every address is derived from the device's thing name:
//! ```text
//! $aws/things/<thing>/jobs/#                    subscription filter
//! $aws/things/<thing>/jobs/notify               queue notifications (in)
//! $aws/things/<thing>/jobs/<job>/get            document request (out)
//! $aws/things/<thing>/jobs/<job>/get/accepted   document response (in)
//! $aws/things/<thing>/jobs/<job>/update         status update (out)
//! $aws/things/<thing>/jobs/<job>/update/accepted status ack (in)
//! ```

const NOTIFY_SUFFIX: &str = "/jobs/notify";
const GET_ACCEPTED_SUFFIX: &str = "/get/accepted";
const UPDATE_ACCEPTED_SUFFIX: &str = "/update/accepted";

/// First segments under `jobs/` that name an API rather than a job
const RESERVED_SEGMENTS: &[&str] = &["notify", "notify-next", "get", "start-next"];

/// Classification of an inbound topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTopic<'a> {
    /// Queue notification
    Notify,
    /// Job document response
    DocumentAccepted { job_id: &'a str },
    /// Broker accepted one of our status updates
    UpdateAccepted { job_id: &'a str },
    /// Job-specific topic we have no handler for (rejections, our own requests)
    Unhandled { job_id: &'a str },
    /// Anything else
    Unknown,
}

/// Topic builder bound to one device identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    /// `$aws/things/<thing>/jobs/`
    jobs_prefix: String,
    /// `/jobs/<thing>/jobs/`
    response_marker: String,
}

impl DeviceTopics {
    pub fn new(thing_name: impl Into<String>) -> Self {
        let thing_name = thing_name.into();
        Self {
            jobs_prefix: format!("$aws/things/{}/jobs/", thing_name),
            response_marker: format!("/jobs/{}/jobs/", thing_name),
        }
    }

    /// Wildcard filter covering every jobs topic of this device
    pub fn jobs_filter(&self) -> String {
        format!("{}#", self.jobs_prefix)
    }

    pub fn notify(&self) -> String {
        format!("{}notify", self.jobs_prefix)
    }

    pub fn job_get(&self, job_id: &str) -> String {
        format!("{}{}/get", self.jobs_prefix, job_id)
    }

    pub fn job_update(&self, job_id: &str) -> String {
        format!("{}{}/update", self.jobs_prefix, job_id)
    }

    /// Classify an inbound topic by its shape.
    ///
    /// Pure function of the topic and the thing name, safe to call from any
    /// number of concurrent deliveries.
    pub fn classify<'a>(&self, topic: &'a str) -> JobTopic<'a> {
        if topic.ends_with(NOTIFY_SUFFIX) {
            return JobTopic::Notify;
        }

        let Some(job_id) = self.job_id_of(topic) else {
            return JobTopic::Unknown;
        };

        if topic.ends_with(GET_ACCEPTED_SUFFIX) {
            JobTopic::DocumentAccepted { job_id }
        } else if topic.ends_with(UPDATE_ACCEPTED_SUFFIX) {
            JobTopic::UpdateAccepted { job_id }
        } else {
            JobTopic::Unhandled { job_id }
        }
    }

    /// Extract the job id from a job-specific topic, if `topic` is one
    fn job_id_of<'a>(&self, topic: &'a str) -> Option<&'a str> {
        if let Some(pos) = topic.find(&self.response_marker) {
            let rest = &topic[pos + self.response_marker.len()..];
            return Some(rest.split('/').next().unwrap_or(rest));
        }

        let rest = topic.strip_prefix(&self.jobs_prefix)?;
        let (job_id, suffix) = rest.split_once('/')?;
        if job_id.is_empty() || suffix.is_empty() || RESERVED_SEGMENTS.contains(&job_id) {
            return None;
        }
        Some(job_id)
    }
}
