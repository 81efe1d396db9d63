//! Job protocol pipeline for the device
//!
//! This module handles:
//! - Routing inbound messages by topic shape
//! - Picking up QUEUED jobs from notifications and requesting their documents
//! - Running job document steps through the shell, fail-fast
//! - Resolving `${aws:iot:parameter:...}` placeholders from the environment
//! - Reporting job status back to the orchestrator

mod document;
mod executor;
mod notification;
mod parameters;
mod reporter;
mod router;

pub use executor::ShellCommandRunner;
pub use router::MessageRouter;
