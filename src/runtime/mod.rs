//! Lifecycle controller for the dispatch subsystem.
//!
//! Owns construction, ordered startup, and ordered shutdown:
//! start = listener pumps -> readiness barrier -> open dispatcher -> sweep;
//! shutdown runs the reverse, best-effort, and always completes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::{init_broker, BrokerError, MessageBroker};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::listener::{ResultGroups, ResultListener};
use crate::readiness::{GroupExpectation, ReadinessError, ReadinessTracker};
use crate::registry::PendingRegistry;
use crate::utils::retry::RetryConfig;

/// How long shutdown waits for each worker task before giving up on it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Errors that can occur starting the subsystem.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Broker initialization failed: {0}")]
    Init(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The readiness barrier failed; the subsystem must not run
    /// half-ready and has not started.
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
}

/// Builder for `Runtime`.
///
/// Every instance is explicitly constructed and independently owned, so
/// several can coexist in one process (and in one test).
#[derive(Default)]
pub struct RuntimeBuilder {
    config: Option<Config>,
    broker: Option<Arc<dyn MessageBroker>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use an already-constructed broker instead of building one from the
    /// messaging config.
    pub fn with_broker(mut self, broker: Arc<dyn MessageBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub async fn build(self) -> Result<Runtime, StartupError> {
        let config = self.config.unwrap_or_default();

        let broker = match self.broker {
            Some(broker) => broker,
            None => init_broker(&config.messaging)
                .await
                .map_err(|e| StartupError::Init(e.to_string()))?,
        };

        let instance_id = Uuid::new_v4().to_string();
        let registry = Arc::new(PendingRegistry::new());

        let groups = ResultGroups::for_instance(&config.topics.group_prefix, &instance_id);

        let listener = ResultListener::new(
            Arc::clone(&broker),
            Arc::clone(&registry),
            config.topics.failed_results.name.clone(),
            config.topics.handled_results.name.clone(),
            &groups,
        );

        let readiness = ReadinessTracker::new(
            Arc::clone(&broker),
            vec![
                GroupExpectation::new(groups.failed.clone(), config.topics.failed_results.partitions),
                GroupExpectation::new(
                    groups.handled.clone(),
                    config.topics.handled_results.partitions,
                ),
            ],
        );

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&broker),
            Arc::clone(&registry),
            config.topics.commands.clone(),
            config.dispatch.default_timeout(),
            RetryConfig::from(&config.dispatch.publish_retry),
        ));

        let cancel = CancellationToken::new();

        Ok(Runtime {
            registry,
            dispatcher,
            listener,
            readiness,
            config,
            instance_id,
            pump_cancel: cancel.child_token(),
            sweep_cancel: cancel.child_token(),
            cancel,
            pump_tasks: Vec::new(),
            sweep_task: None,
            started: false,
        })
    }
}

/// The assembled subsystem: registry, dispatcher, listener, readiness
/// barrier, and the periodic timeout sweep.
pub struct Runtime {
    registry: Arc<PendingRegistry>,
    dispatcher: Arc<Dispatcher>,
    listener: ResultListener,
    readiness: ReadinessTracker,
    config: Config,
    instance_id: String,
    cancel: CancellationToken,
    pump_cancel: CancellationToken,
    sweep_cancel: CancellationToken,
    pump_tasks: Vec<JoinHandle<()>>,
    sweep_task: Option<JoinHandle<()>>,
    started: bool,
}

impl Runtime {
    /// Start the subsystem.
    ///
    /// Ordered: (1) result pumps subscribe and start; (2) the readiness
    /// barrier blocks until every result partition is assigned; (3) the
    /// dispatcher opens; (4) the timeout sweep starts. A barrier failure
    /// tears the pumps back down and leaves the dispatcher closed.
    pub async fn start(&mut self) -> Result<(), StartupError> {
        if self.started {
            return Ok(());
        }

        self.pump_tasks = self.listener.start(self.pump_cancel.clone()).await?;

        if let Err(e) = self
            .readiness
            .wait_until_ready(
                self.config.readiness.poll_interval(),
                self.config.readiness.max_wait(),
                &self.cancel,
            )
            .await
        {
            error!(error = %e, "Readiness barrier failed, subsystem not started");
            self.cancel.cancel();
            return Err(e.into());
        }

        self.dispatcher.open();

        let registry = Arc::clone(&self.registry);
        let sweep_cancel = self.sweep_cancel.clone();
        let sweep_interval = self.config.sweep.interval();

        self.sweep_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = sweep_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = registry.sweep_expired(Instant::now());
                        if !expired.is_empty() {
                            info!(count = expired.len(), "Expired pending commands");
                        }
                    }
                }
            }
        }));

        self.started = true;
        info!(instance = %self.instance_id, "Command dispatch subsystem started");

        Ok(())
    }

    /// The dispatcher for submitting commands. Closed until `start`
    /// passes the readiness barrier.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Number of in-flight correlations.
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    /// Token an operator can fire to abort a start blocked on the
    /// readiness barrier.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shut the subsystem down.
    ///
    /// Reverse order of start: (1) stop accepting sends; (2) stop the
    /// sweep; (3) drain pending correlations, each waiter observing
    /// `Cancelled`; (4) stop the result pumps. Every step is best-effort;
    /// failures are logged and shutdown continues.
    pub async fn shutdown(mut self) {
        info!(instance = %self.instance_id, "Shutting down command dispatch subsystem");

        self.dispatcher.close();

        self.sweep_cancel.cancel();
        if let Some(task) = self.sweep_task.take() {
            await_worker(task, "timeout sweep").await;
        }

        let drained = self.registry.drain_all();
        if !drained.is_empty() {
            info!(count = drained.len(), "Cancelled pending commands at shutdown");
        }

        self.pump_cancel.cancel();
        for task in self.pump_tasks.drain(..) {
            await_worker(task, "result pump").await;
        }

        info!(instance = %self.instance_id, "Command dispatch subsystem stopped");
    }
}

/// Await a worker with a grace period; log, never propagate.
async fn await_worker(task: JoinHandle<()>, name: &str) {
    match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(worker = name, error = %e, "Worker ended abnormally"),
        Err(_) => warn!(worker = name, "Worker did not stop within grace period"),
    }
}
