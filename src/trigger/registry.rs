use super::{TriggerCallback, TriggerHandle, TriggerLoop};
use crate::config::{ConfigError, ListenerConfig, MessagingConfig};
use crate::transport::create_worker;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Running trigger loops keyed by job name; at most one loop per job
#[derive(Default)]
pub struct ListenerSet {
    handles: HashMap<String, TriggerHandle>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `trigger`, first stopping any loop already running for the same job
    pub async fn start(&mut self, trigger: TriggerLoop) {
        let job_name = trigger.job_name().to_string();
        if let Some(previous) = self.handles.remove(&job_name) {
            info!(job = %job_name, "Replacing running listener");
            previous.request_stop().await;
        }
        self.handles.insert(job_name, trigger.start());
    }

    /// Build a worker for `listener` from `config` and start its loop
    pub async fn start_listener(
        &mut self,
        config: &MessagingConfig,
        listener: &ListenerConfig,
        callback: Arc<dyn TriggerCallback>,
    ) -> Result<(), ConfigError> {
        let provider = config
            .provider(&listener.provider)
            .ok_or_else(|| ConfigError::UnknownProvider(listener.provider.clone()))?;
        let timing = config.retry_timing();
        let worker = create_worker(provider, &listener.job, callback, &timing);

        info!(
            job = %listener.job,
            provider = %provider.name(),
            backend = %provider.kind(),
            "Starting listener"
        );
        self.start(TriggerLoop::new(
            listener.job.clone(),
            listener.selector.clone(),
            worker,
            timing,
        ))
        .await;
        Ok(())
    }

    /// Start a loop for every configured listener
    pub async fn start_all(
        &mut self,
        config: &MessagingConfig,
        callback: Arc<dyn TriggerCallback>,
    ) -> Result<(), ConfigError> {
        for listener in &config.listeners {
            self.start_listener(config, listener, Arc::clone(&callback))
                .await?;
        }
        Ok(())
    }

    /// Stop one job's loop; false if it was not running
    pub async fn stop(&mut self, job_name: &str) -> bool {
        match self.handles.remove(job_name) {
            Some(handle) => {
                handle.request_stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop every loop and wait for all of them to finish
    pub async fn stop_all(&mut self) {
        for handle in self.handles.values() {
            handle.signal_stop();
        }
        for (_, handle) in self.handles.drain() {
            handle.request_stop().await;
        }
    }

    pub fn contains(&self, job_name: &str) -> bool {
        self.handles.contains_key(job_name)
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
