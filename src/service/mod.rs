//! Service Lifecycle
//!
//! Shared start/stop plumbing for the long-lived relay services. A service moves through
//! `Created → Started → Running → Stopping → Stopped`:
//!
//! - `Started`: one-time setup in progress (filter registration, checkpoint recovery)
//! - `Running`: the poll loop task has been spawned
//! - `Stopping`: cancellation observed, loop exiting
//! - `Stopped`: the loop task has been joined
//!
//! Each service owns a child of the caller's [`CancellationToken`]. The loop races every
//! tick against that token, so an in-flight adapter or store call is dropped on shutdown.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Started,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One unit of periodic work.
#[async_trait]
pub trait PollingWorker: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Runs one tick. Errors are logged by the loop and the next tick runs regardless.
    async fn poll_once(&self) -> Result<(), RelayError>;
}

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Tracks the state and the background task of one service.
pub struct Lifecycle {
    name: &'static str,
    state: Arc<RwLock<ServiceState>>,
    task: Mutex<Option<RunningTask>>,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle").field("name", &self.name).finish()
    }
}

impl Lifecycle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(RwLock::new(ServiceState::Created)),
            task: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> ServiceState {
        *self.state.read().await
    }

    /// Moves `Created → Started`. Any other state is a lifecycle error.
    pub async fn begin_start(&self) -> Result<(), RelayError> {
        let mut state = self.state.write().await;
        if *state != ServiceState::Created {
            return Err(RelayError::Lifecycle(format!(
                "{} cannot start from state {}",
                self.name, *state
            )));
        }
        *state = ServiceState::Started;
        Ok(())
    }

    /// Returns to `Created` after failed setup so `start` can be retried.
    pub async fn abort_start(&self) {
        *self.state.write().await = ServiceState::Created;
    }

    /// Spawns the poll loop for `worker` and moves to `Running`.
    ///
    /// # Arguments
    ///
    /// * `parent` - Caller's token; the loop runs on a child of it
    /// * `worker` - Work performed on every tick
    /// * `interval` - Time between tick starts
    pub async fn spawn<W: PollingWorker + ?Sized>(
        &self,
        parent: &CancellationToken,
        worker: Arc<W>,
        interval: Duration,
    ) -> Result<(), RelayError> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(RelayError::Lifecycle(format!("{} is already running", self.name)));
        }

        // Running must be visible before the loop can write Stopping
        *self.state.write().await = ServiceState::Running;
        let token = parent.child_token();
        let handle = spawn_poll_loop(worker, interval, token.clone(), self.state.clone());
        *task = Some(RunningTask { token, handle });

        info!("{} running (interval {:?})", self.name, interval);
        Ok(())
    }

    /// Cancels the loop and returns once its task has exited.
    ///
    /// Stopping a service that was never started, or stopping twice, is a lifecycle error.
    pub async fn stop(&self) -> Result<(), RelayError> {
        let running = self.task.lock().await.take().ok_or_else(|| {
            RelayError::Lifecycle(format!("{} is not running", self.name))
        })?;

        *self.state.write().await = ServiceState::Stopping;
        running.token.cancel();
        let joined = running.handle.await;
        *self.state.write().await = ServiceState::Stopped;

        joined.map_err(|e| RelayError::Lifecycle(format!("{} task failed: {}", self.name, e)))?;
        info!("{} stopped", self.name);
        Ok(())
    }
}

/// Runs `worker.poll_once()` every `interval` until `token` is cancelled.
///
/// The first tick fires immediately. Ticks that overrun are delayed rather than bunched.
pub fn spawn_poll_loop<W: PollingWorker + ?Sized>(
    worker: Arc<W>,
    interval: Duration,
    token: CancellationToken,
    state: Arc<RwLock<ServiceState>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = token.cancelled() => {
                    debug!("{} tick interrupted by shutdown", worker.name());
                    break;
                }
                result = worker.poll_once() => {
                    if let Err(e) = result {
                        error!("{} poll failed: {}", worker.name(), e);
                    }
                }
            }
        }

        *state.write().await = ServiceState::Stopping;
        debug!("{} loop exited", worker.name());
    })
}
