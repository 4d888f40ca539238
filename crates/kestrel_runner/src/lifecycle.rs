use crate::config::RunnerConfig;
use crate::fetch::JobFetcher;
use crate::identity::{self, RetryPolicy};
use crate::log::ExecutionLog;
use crate::notify::Notifications;
use crate::publish::{PublishReport, ResultPublisher};
use crate::stream::{LogStreamHandle, LogStreamer};
use crate::task::TaskRunner;
use crate::watchdog::Watchdog;
use kestrel_core::prelude::*;
use tracing::{error, info, warn};

/// Everything the lifecycle learned on its way to `Terminating`.
#[derive(Debug)]
pub struct LifecycleReport {
    pub terminal: TerminalStatus,
    /// Every state entered, starting with `Booting`.
    pub history: Vec<LifecycleState>,
    pub identity: Option<ExecutorIdentity>,
    pub job: Option<JobSpec>,
    pub outcome: Option<ExecutionOutcome>,
    pub publish: Option<PublishReport>,
    /// The error that decided a failed outcome.
    pub failure: Option<LifecycleError>,
    /// Best-effort errors that were logged and ignored.
    pub warnings: Vec<LifecycleError>,
}

impl LifecycleReport {
    fn new() -> Self {
        Self {
            terminal: TerminalStatus::Failed,
            history: Vec::new(),
            identity: None,
            job: None,
            outcome: None,
            publish: None,
            failure: None,
            warnings: Vec::new(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.terminal.exit_code()
    }
}

/// Drives one executor from boot to host shutdown.
pub struct Lifecycle<S: RunnerServices> {
    services: S,
    config: RunnerConfig,
    log: ExecutionLog,
    notifications: Notifications<S::Notifier>,
    state: LifecycleState,
    history: Vec<LifecycleState>,
}

impl<S: RunnerServices> Lifecycle<S> {
    /// Must be called inside a Tokio runtime.
    pub fn new(services: S, config: RunnerConfig, log: ExecutionLog) -> Self {
        let notifications = Notifications::new(services.notifier().clone(), config.notify_timeout);
        Self {
            services,
            config,
            log,
            notifications,
            state: LifecycleState::Booting,
            history: vec![LifecycleState::Booting],
        }
    }

    /// Runs the whole lifecycle. Always ends in `Terminating` with a host
    /// shutdown request, whatever failed along the way.
    pub async fn run(mut self) -> LifecycleReport {
        let watchdog = Watchdog::spawn(
            self.config.max_lifetime,
            self.notifications.clone(),
            self.services.host().clone(),
        );

        info!("Executor booting");
        self.notifications.emit(StatusEvent::new(Status::Booting));

        let mut report = LifecycleReport::new();
        let mut streamer = None;

        let terminal = match self.drive(&mut report, &mut streamer).await {
            Ok(terminal) => terminal,
            Err(e) => {
                self.fail(&e);
                report.failure = Some(e);
                TerminalStatus::Failed
            }
        };

        self.terminate(terminal, streamer, &mut report).await;
        watchdog.disarm();

        report.terminal = terminal;
        report.history = self.history;
        report
    }

    async fn drive(
        &mut self,
        report: &mut LifecycleReport,
        streamer: &mut Option<LogStreamHandle<S::Store>>,
    ) -> Result<TerminalStatus, LifecycleError> {
        let policy = RetryPolicy {
            attempts: self.config.identity_attempts,
            initial_delay: self.config.identity_backoff,
            timeout: self.config.metadata_timeout,
        };
        let identity = identity::resolve(
            self.services.metadata(),
            &policy,
            &self.config.default_image_tag,
        )
        .await?;

        self.notifications.set_instance(&identity.name);
        self.notifications.emit(
            StatusEvent::new(Status::IdentityResolved)
                .with("instance_id", &identity.instance_id)
                .with("region", &identity.region)
                .with("image_tag", &identity.image_tag),
        );
        report.identity = Some(identity.clone());

        *streamer = Some(LogStreamer::spawn(
            self.services.store().clone(),
            self.log.path(),
            self.config.logs_container(&identity),
            identity.log_key(),
            self.config.log_interval,
        ));

        self.transition(LifecycleState::FetchingJob);
        self.notifications.emit(StatusEvent::new(Status::FetchingJob));

        let job = JobFetcher::new(self.services.metadata(), self.services.store(), &self.config)
            .fetch(&identity)
            .await?;

        let mut fetched = StatusEvent::new(Status::JobFetched).with("source", job.source);
        if let Some(task_id) = &job.task_id {
            fetched = fetched.with("task_id", task_id);
        }
        self.notifications.emit(fetched);
        report.job = Some(job.clone());

        self.transition(LifecycleState::Running);
        let runner = TaskRunner::new(&self.services, &self.config, &self.log, &self.notifications);

        self.notifications.emit(
            StatusEvent::new(Status::PullingImage)
                .with("image", self.config.image_reference(&identity)),
        );
        let image = runner.pull(&identity).await?;
        let outcome = runner.execute(&image, &job, &identity).await?;

        let task_event = match outcome.exit {
            TaskExit::Exited(0) => StatusEvent::new(Status::TaskCompleted).with("exit_code", 0),
            TaskExit::Exited(code) => StatusEvent::new(Status::TaskFailed).with("exit_code", code),
            TaskExit::TimedOut => StatusEvent::new(Status::TaskTimedOut)
                .with("timeout_secs", self.config.task_timeout.as_secs()),
        };
        self.notifications.emit(task_event);

        self.transition(LifecycleState::PublishingResult);
        self.notifications.emit(StatusEvent::new(Status::PublishingResult));

        let publisher =
            ResultPublisher::new(self.services.store(), self.config.jobs_container(&identity));
        match publisher.publish(&outcome, &identity).await {
            Ok(publish) => {
                let mut event = StatusEvent::new(publish.status());
                if let PublishReport::Uploaded { key, sha256, .. } = &publish {
                    event = event.with("key", key).with("sha256", sha256);
                }
                self.notifications.emit(event);
                report.publish = Some(publish);
            }
            Err(e) => {
                warn!("Continuing without a published result: {e}");
                self.notifications
                    .emit(StatusEvent::new(e.status()).with("error", &e));
                report.warnings.push(e);
            }
        }

        let terminal = match outcome.exit {
            TaskExit::Exited(0) => TerminalStatus::Success,
            TaskExit::Exited(code) => {
                report.failure = Some(LifecycleError::TaskExecutionFailed(code));
                TerminalStatus::Failed
            }
            TaskExit::TimedOut => {
                report.failure = Some(LifecycleError::TaskTimedOut(
                    self.config.task_timeout.as_secs(),
                ));
                TerminalStatus::Failed
            }
        };
        report.outcome = Some(outcome);

        Ok(terminal)
    }

    fn fail(&mut self, err: &LifecycleError) {
        error!("Lifecycle failed in {}: {err}", self.state);

        let mut event = StatusEvent::new(err.status()).with("error", err);
        if let LifecycleError::JobFetchFailed(fetch) = err {
            event = event.with("reason", fetch.reason());
        }
        self.notifications.emit(event);

        self.transition(LifecycleState::Failed);
    }

    fn transition(&mut self, next: LifecycleState) {
        if !self.state.can_transition_to(&next) {
            error!(from = %self.state, to = %next, "Illegal lifecycle transition ignored");
            return;
        }

        info!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
        self.history.push(next);
    }

    async fn terminate(
        &mut self,
        terminal: TerminalStatus,
        streamer: Option<LogStreamHandle<S::Store>>,
        report: &mut LifecycleReport,
    ) {
        self.transition(LifecycleState::Terminating(terminal));
        info!(
            exit_code = terminal.exit_code(),
            "Terminating ({terminal:?})"
        );
        self.notifications.emit(
            StatusEvent::new(Status::Terminating)
                .with("result", format!("{terminal:?}").to_lowercase())
                .with("exit_code", terminal.exit_code()),
        );

        if let Some(streamer) = streamer {
            if let Err(e) = streamer.finish(self.config.flush_grace).await {
                let e = LifecycleError::LogUploadFailed(e);
                warn!("{e}");
                self.notifications
                    .emit(StatusEvent::new(e.status()).with("error", &e));
                report.warnings.push(e);
            }
        }

        self.notifications.drain(self.config.notify_timeout).await;

        if let Err(e) = self.services.host().request_shutdown().await {
            error!("Host shutdown request failed: {e}");
        }
    }
}
