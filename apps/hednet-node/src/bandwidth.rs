use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ConfigError, NodeConfig};
use crate::report::UsageReporter;
use crate::state::RunState;

/// Round-robin list of download targets used to simulate sustained activity.
#[derive(Debug, Clone)]
pub struct ResourceCycle {
    resources: Vec<Url>,
    index: usize,
}

impl ResourceCycle {
    /// An empty list is a configuration error, rejected here rather than
    /// discovered mid-loop.
    pub fn new(resources: Vec<Url>) -> Result<Self, ConfigError> {
        if resources.is_empty() {
            return Err(ConfigError::EmptyResources);
        }
        Ok(Self {
            resources,
            index: 0,
        })
    }

    pub fn current(&self) -> &Url {
        &self.resources[self.index]
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.resources.len();
    }

    /// Always at least 1; the constructor rejects empty lists.
    pub fn len(&self) -> usize {
        self.resources.len()
    }
}

/// True when `after` reached or passed a multiple of `threshold` that
/// `before` had not. Crossing-based so a report fires for every threshold
/// passed regardless of how the stream happens to chunk the bytes.
pub(crate) fn crossed_threshold(before: u64, after: u64, threshold: u64) -> bool {
    threshold > 0 && before / threshold < after / threshold
}

enum CycleOutcome {
    Completed,
    Stopped,
}

/// Long-running task that cycles through the configured resources, streams
/// them chunk by chunk and accrues byte counters, reporting usage at
/// threshold crossings and at end of resource.
pub struct BandwidthWorker {
    client: reqwest::Client,
    cycle: ResourceCycle,
    state: Arc<RunState>,
    reporter: Arc<UsageReporter>,
    chunk_delay: Duration,
    report_threshold: u64,
    idle_wait: Duration,
    error_backoff: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BandwidthWorker {
    pub fn new(
        config: &NodeConfig,
        client: reqwest::Client,
        state: Arc<RunState>,
        reporter: Arc<UsageReporter>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            client,
            cycle: ResourceCycle::new(config.resources.clone())?,
            state,
            reporter,
            chunk_delay: config.chunk_delay,
            report_threshold: config.report_threshold,
            idle_wait: config.idle_wait,
            error_backoff: config.error_backoff,
            shutdown,
        })
    }

    /// Runs until the owner clears the running flag. Transient download or
    /// report errors never terminate the worker; each one is logged and
    /// followed by a fixed backoff before the cycle restarts.
    pub async fn run(mut self) {
        info!("starting bandwidth simulation");
        while self.state.is_running() {
            match self.run_cycle().await {
                Ok(CycleOutcome::Stopped) => break,
                Ok(CycleOutcome::Completed) => {
                    if !self.state.is_running() {
                        break;
                    }
                    info!(idle = ?self.idle_wait, "resource consumed; entering idle window");
                    if !self.sleep_cancellable(self.idle_wait).await {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, backoff = ?self.error_backoff, "bandwidth cycle failed");
                    if !self.sleep_cancellable(self.error_backoff).await {
                        break;
                    }
                }
            }
        }
        info!("bandwidth worker stopped");
    }

    async fn run_cycle(&mut self) -> Result<CycleOutcome, reqwest::Error> {
        let url = self.cycle.current().clone();
        info!(url = %url, index = self.cycle.current_index(), "downloading resource");

        let response = self.client.get(url).send().await?.error_for_status()?;
        let mut stream = Box::pin(response.bytes_stream());
        let mut resource_bytes: u64 = 0;

        loop {
            if !self.state.is_running() {
                return Ok(CycleOutcome::Stopped);
            }
            let item = tokio::select! {
                item = stream.next() => item,
                _ = self.shutdown.changed() => return Ok(CycleOutcome::Stopped),
            };
            let chunk = match item {
                Some(chunk) => chunk?,
                None => break,
            };
            if chunk.is_empty() {
                continue;
            }

            let before = resource_bytes;
            resource_bytes += chunk.len() as u64;
            self.state.add_bytes(chunk.len() as u64);

            if crossed_threshold(before, resource_bytes, self.report_threshold) {
                self.reporter.report().await;
            }

            // Throttle between chunks; this is simulated activity, not a
            // bandwidth measurement.
            if !self.sleep_cancellable(self.chunk_delay).await {
                return Ok(CycleOutcome::Stopped);
            }
        }

        self.cycle.advance();
        debug!(
            resource_bytes,
            next_index = self.cycle.current_index(),
            "resource exhausted"
        );
        self.reporter.report().await;
        Ok(CycleOutcome::Completed)
    }

    /// Sleep that resolves early (returning false) when shutdown is
    /// signalled, so a stop request is honoured promptly even inside the
    /// hour-long idle window.
    async fn sleep_cancellable(&mut self, duration: Duration) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown.changed() => false,
        }
    }
}
