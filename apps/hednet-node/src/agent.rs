use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::{self, ApiClient, ApiError};
use crate::bandwidth::BandwidthWorker;
use crate::config::{ConfigError, NodeConfig};
use crate::realtime::ChannelManager;
use crate::report::UsageReporter;
use crate::state::RunState;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// The node agent: owns the shared counters and the shutdown signal, and
/// supervises the bandwidth worker and realtime channel tasks.
pub struct NodeAgent {
    state: Arc<RunState>,
    api: ApiClient,
    reporter: Arc<UsageReporter>,
    worker: Option<BandwidthWorker>,
    channel: Option<ChannelManager>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for NodeAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeAgent")
            .field("worker", &self.worker.is_some())
            .field("channel", &self.channel.is_some())
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl NodeAgent {
    pub fn new(config: NodeConfig) -> Result<Self, AgentError> {
        let state = Arc::new(RunState::new());
        let api = ApiClient::new(config.base_url.clone(), &config.token)?;
        let reporter = Arc::new(UsageReporter::new(
            api.clone(),
            state.clone(),
            config.points_per_hour,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Downloads get their own client: same headers, but no overall
        // request timeout since a resource takes minutes to stream.
        let download_client = reqwest::Client::builder()
            .default_headers(api::default_headers(&config.token)?)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(ApiError::from)?;

        let worker = BandwidthWorker::new(
            &config,
            download_client,
            state.clone(),
            reporter.clone(),
            shutdown_rx.clone(),
        )?;
        let channel = ChannelManager::new(&config, shutdown_rx);

        Ok(Self {
            state,
            api,
            reporter,
            worker: Some(worker),
            channel: Some(channel),
            shutdown_tx,
            tasks: Vec::new(),
        })
    }

    pub fn state(&self) -> Arc<RunState> {
        self.state.clone()
    }

    /// Authenticate once, then spawn the bandwidth worker and the realtime
    /// channel as supervised tasks. Returns false (and starts nothing) when
    /// the probe is rejected.
    pub async fn start(&mut self) -> bool {
        if !self.api.authenticate().await {
            error!("cannot start node: authentication failed");
            return false;
        }

        let (Some(worker), Some(channel)) = (self.worker.take(), self.channel.take()) else {
            warn!("agent already started");
            return false;
        };

        self.state.set_running(true);
        self.tasks.push(tokio::spawn(worker.run()));
        self.tasks.push(tokio::spawn(channel.run()));
        info!("node is running");
        true
    }

    /// Clear the running flag, signal shutdown to both tasks, wait for them
    /// to drain, then flush accrued points with one final report.
    pub async fn stop(&mut self) {
        info!("stopping node");
        self.state.set_running(false);
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }

        if self.state.session_points() > 0.0 {
            self.reporter.report().await;
        }

        info!(
            total_bytes = self.state.total_bytes(),
            session_points = self.state.session_points(),
            "node stopped"
        );
    }
}
