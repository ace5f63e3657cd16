//! Glue server orchestration
//!
//! Bind, wait for Agent, Environment and Experiment, serve the Experiment
//! until it terminates or disconnects, then tear the peers down.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use morlglue_common::{GlueError, Result, LISTEN_BACKLOG};
use morlglue_network::{transport, RecordCodec};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::GlueConfig;
use crate::dispatch::{Dispatcher, LoopExit};
use crate::metrics::DispatchMetrics;
use crate::peers::{AgentPort, EnvironmentPort, RemoteAgent, RemoteEnvironment};
use crate::registry::ConnectionRegistry;
use crate::session::GlueSession;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The dispatch loop stopped on its own
    Completed(LoopExit),
    /// The shutdown signal fired first
    Interrupted,
}

/// Bound glue server, ready to accept its three peers
pub struct GlueServer {
    config: GlueConfig,
    listener: TcpListener,
    metrics: Arc<DispatchMetrics>,
}

impl GlueServer {
    /// Bind the listening socket described by `config`
    pub fn bind(config: GlueConfig) -> Result<Self> {
        let listener = transport::listen(&config.host, config.port, LISTEN_BACKLOG)?;

        let metrics = DispatchMetrics::new()
            .map_err(|e| GlueError::Config(format!("metrics: {}", e)))?;

        info!(host = %config.host, port = config.port, "Listening for connections");
        Ok(Self {
            config,
            listener,
            metrics: Arc::new(metrics),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run until the Experiment finishes
    pub async fn run(self) -> Result<RunOutcome> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until the Experiment finishes or `shutdown` resolves.
    ///
    /// The listening socket is closed as soon as all three peers are
    /// connected. On shutdown an initialised run is cleaned up (best effort)
    /// before the peers are disconnected. Any error from the dispatch loop
    /// aborts the run: peers are disconnected and the error is returned.
    pub async fn run_until<F>(self, shutdown: F) -> Result<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        let Self {
            config,
            listener,
            metrics,
        } = self;
        tokio::pin!(shutdown);
        let codec = RecordCodec::new(config.decode_strategy);

        let mut registry = ConnectionRegistry::new(config.io_timeout());
        tokio::select! {
            result = registry.bootstrap(&listener) => result?,
            _ = &mut shutdown => {
                info!("Interrupted while waiting for connections");
                registry.close_all().await;
                return Ok(RunOutcome::Interrupted);
            }
        }
        // No further peers are accepted
        drop(listener);

        let peers = registry
            .into_peers()
            .ok_or_else(|| GlueError::Config("bootstrap ended with an empty slot".to_string()))?;
        info!("Agent, Environment and Experiment connected");

        let agent = RemoteAgent::new(peers.agent, codec)?;
        let environment = RemoteEnvironment::new(peers.environment, codec)?;
        let mut dispatcher = Dispatcher::new(peers.experiment, codec, metrics.clone())?;
        let mut session = GlueSession::new(agent, environment);

        let result = tokio::select! {
            result = dispatcher.run(&mut session) => result.map(RunOutcome::Completed),
            _ = &mut shutdown => Ok(RunOutcome::Interrupted),
        };

        match &result {
            Ok(RunOutcome::Interrupted) => {
                info!("Interrupted, shutting the run down");
                if session.needs_cleanup() {
                    if let Err(e) = session.cleanup().await {
                        warn!(error = %e, "Cleanup on interrupt failed");
                    }
                }
            }
            Ok(RunOutcome::Completed(exit)) => info!(?exit, "Experiment finished"),
            Err(e) if e.is_fatal() => {
                metrics.fatal_errors_total.inc();
                error!(error = %e, "Fatal error, tearing the run down");
            }
            Err(e) => warn!(error = %e, "Run aborted, tearing it down"),
        }

        teardown(session, dispatcher).await;
        metrics.log_summary();
        result
    }
}

async fn teardown<A, E>(session: GlueSession<A, E>, dispatcher: Dispatcher)
where
    A: AgentPort,
    E: EnvironmentPort,
{
    let (mut agent, mut environment) = session.into_parts();
    environment.disconnect().await;
    agent.disconnect().await;
    dispatcher.close().await;
}
