//! Relay Runtime
//!
//! Starts and stops the services configured for one process under a shared shutdown
//! token. A failed start never leaves an already-started service running.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::RelayError;
use crate::executor::Executor;
use crate::service::ServiceState;
use crate::verifier::Verifier;

/// The services of one relay process.
pub struct RelayServices {
    shutdown: CancellationToken,
    verifier: Option<Arc<Verifier>>,
    executor: Option<Arc<Executor>>,
}

impl RelayServices {
    pub fn new(verifier: Option<Arc<Verifier>>, executor: Option<Arc<Executor>>) -> Self {
        Self {
            shutdown: CancellationToken::new(),
            verifier,
            executor,
        }
    }

    /// Token cancelled when the process shuts down.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Starts the verifier, then the executor.
    ///
    /// If the executor fails to start, the verifier is stopped and the shutdown token is
    /// cancelled before the error is returned.
    pub async fn start(&self) -> Result<(), RelayError> {
        if let Some(verifier) = &self.verifier {
            if let Err(e) = verifier.start(&self.shutdown).await {
                self.shutdown.cancel();
                return Err(e);
            }
        }

        if let Some(executor) = &self.executor {
            if let Err(e) = executor.start(&self.shutdown).await {
                error!("Executor failed to start: {}", e);
                self.stop().await;
                return Err(e);
            }
        }

        Ok(())
    }

    /// Stops every running service and cancels the shutdown token.
    ///
    /// Services that never reached `Running` are skipped.
    pub async fn stop(&self) {
        if let Some(verifier) = &self.verifier {
            stop_service("Verifier", verifier.state().await, verifier.stop()).await;
        }
        if let Some(executor) = &self.executor {
            stop_service("Executor", executor.state().await, executor.stop()).await;
        }
        self.shutdown.cancel();
        info!("Relay services stopped");
    }
}

async fn stop_service(
    name: &str,
    state: ServiceState,
    stop: impl std::future::Future<Output = Result<(), RelayError>>,
) {
    if !matches!(state, ServiceState::Running | ServiceState::Stopping) {
        return;
    }
    if let Err(e) = stop.await {
        error!("{} shutdown failed: {}", name, e);
    }
}
