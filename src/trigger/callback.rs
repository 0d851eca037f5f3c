use std::collections::HashMap;
use tracing::{debug, info};

/// Receives matched messages for a job
///
/// Called synchronously from inside a worker's receive, so implementations
/// must return promptly; a slow callback delays the next receive cycle.
pub trait TriggerCallback: Send + Sync {
    fn on_message(&self, job_name: &str, diagnostic: &str, properties: &HashMap<String, String>);
}

/// Callback that only logs the trigger
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCallback;

impl TriggerCallback for LoggingCallback {
    fn on_message(&self, job_name: &str, diagnostic: &str, properties: &HashMap<String, String>) {
        info!(
            job = %job_name,
            property_count = properties.len(),
            "Job triggered by message"
        );
        debug!(job = %job_name, "{diagnostic}");
    }
}

impl<F> TriggerCallback for F
where
    F: Fn(&str, &str, &HashMap<String, String>) + Send + Sync,
{
    fn on_message(&self, job_name: &str, diagnostic: &str, properties: &HashMap<String, String>) {
        self(job_name, diagnostic, properties)
    }
}
