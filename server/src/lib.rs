//! Shared whiteboard server.
//!
//! [`serve`] binds the listener and spawns the acceptor; the returned
//! [`RunningServer`] is the host's handle for approvals and shutdown.

pub mod acceptor;
pub mod config;
pub mod handler;
pub mod pool;
pub mod services;
pub mod shutdown;
pub mod state;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

pub use acceptor::ShutdownReport;
pub use config::ServerConfig;
pub use services::approval::{JoinApprovalGateway, JoinPrompt, JoinPrompts};
pub use shutdown::ShutdownSignal;
pub use state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] std::io::Error),
    #[error("acceptor task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Handle to a server started with [`serve`].
pub struct RunningServer {
    local_addr: SocketAddr,
    state: AppState,
    prompts: Option<JoinPrompts>,
    acceptor: JoinHandle<ShutdownReport>,
}

/// Bind `config.bind_target()` and start accepting connections.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] when the address cannot be bound.
pub async fn serve(config: ServerConfig) -> Result<RunningServer, ServerError> {
    let addr = config.bind_target();
    let listener = TcpListener::bind(&addr).await.map_err(|source| ServerError::Bind { addr, source })?;
    let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

    let (approvals, prompts) = JoinApprovalGateway::new(config.approval_timeout);
    let state = AppState::new(config, approvals);
    info!(%local_addr, manager = %state.manager(), workers = state.pool.size(), "whiteboard server listening");

    let acceptor = tokio::spawn(acceptor::run(listener, state.clone()));
    Ok(RunningServer { local_addr, state, prompts: Some(prompts), acceptor })
}

impl RunningServer {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    #[must_use]
    pub fn approvals(&self) -> JoinApprovalGateway {
        self.state.approvals.clone()
    }

    /// Take the approval prompt queue. Until it is taken, requests wait out
    /// their timeout; once taken and dropped, requests are denied at once.
    pub fn take_join_prompts(&mut self) -> Option<JoinPrompts> {
        self.prompts.take()
    }

    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.state.shutdown.clone()
    }

    /// Trigger shutdown and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Task`] if the acceptor task panicked.
    pub async fn shutdown(self) -> Result<ShutdownReport, ServerError> {
        self.state.shutdown.trigger();
        self.wait().await
    }

    /// Wait for a shutdown triggered elsewhere (e.g. the manager's quit).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Task`] if the acceptor task panicked.
    pub async fn wait(self) -> Result<ShutdownReport, ServerError> {
        Ok(self.acceptor.await?)
    }
}
