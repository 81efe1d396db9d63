//! Job document processor - runs a fetched job's steps and reports the outcome

use super::executor::CommandRunner;
use super::parameters;
use super::reporter::StatusReporter;
use iot_jobs_shared::{codec, now_ms, JobDocument, JobExecutionResult};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Handles payloads from a job's `get/accepted` topic
pub struct DocumentProcessor {
    runner: Arc<dyn CommandRunner>,
    reporter: StatusReporter,
}

impl DocumentProcessor {
    pub fn new(runner: Arc<dyn CommandRunner>, reporter: StatusReporter) -> Self {
        Self { runner, reporter }
    }

    pub async fn on_document(&self, payload: &[u8]) {
        let response = match codec::decode_document(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!("Failed to parse job document: {}", e);
                return;
            }
        };

        let execution = response.execution;
        info!(
            job_id = %execution.job_id,
            version = %execution.job_document.version,
            steps = execution.job_document.steps.len(),
            "Processing job document"
        );

        let result = self.execute(&execution.job_id, &execution.job_document).await;
        self.reporter.report_result(&result).await;
    }

    /// Run the document's steps in order, stopping at the first failure.
    ///
    /// Steps whose action is not `runCommand` are skipped and do not affect
    /// the outcome.
    pub async fn execute(&self, job_id: &str, document: &JobDocument) -> JobExecutionResult {
        let start_time = now_ms();

        for (index, step) in document.steps.iter().enumerate() {
            let action = &step.action;
            let step_no = index + 1;

            if !action.is_run_command() {
                info!(job_id, step = step_no, "Skipping action type: {}", action.action_type);
                continue;
            }

            let command = parameters::resolve(&action.input.command);
            let run_as_user = parameters::resolve(&action.run_as_user);
            debug!(job_id, step = step_no, name = %action.name, run_as_user = %run_as_user, "Running command");

            match self.runner.run(&command, &run_as_user).await {
                Ok(output) => {
                    info!(job_id, step = step_no, "Command executed successfully: {}", output.trim_end());
                }
                Err(e) => {
                    error!(
                        job_id,
                        step = step_no,
                        elapsed_ms = now_ms().saturating_sub(start_time),
                        "Command failed: {}, Output: {}",
                        e,
                        e.output().trim_end()
                    );
                    return JobExecutionResult::failed(job_id, e);
                }
            }
        }

        debug!(job_id, elapsed_ms = now_ms().saturating_sub(start_time), "All steps executed");
        JobExecutionResult::succeeded(job_id)
    }
}
