use crate::config::RunnerConfig;
use crate::log::{ExecutionLog, LineAssembler};
use crate::notify::Notifications;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use kestrel_core::prelude::*;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How long to keep pumping output after the container has exited.
const OUTPUT_DRAIN: Duration = Duration::from_secs(5);

/// Runs the job's container to completion.
pub struct TaskRunner<'a, S: RunnerServices> {
    services: &'a S,
    config: &'a RunnerConfig,
    log: &'a ExecutionLog,
    notifications: &'a Notifications<S::Notifier>,
}

impl<'a, S: RunnerServices> TaskRunner<'a, S> {
    pub fn new(
        services: &'a S,
        config: &'a RunnerConfig,
        log: &'a ExecutionLog,
        notifications: &'a Notifications<S::Notifier>,
    ) -> Self {
        Self {
            services,
            config,
            log,
            notifications,
        }
    }

    /// Pulls the image, then runs it.
    pub async fn run(
        &self,
        job: &JobSpec,
        identity: &ExecutorIdentity,
    ) -> Result<ExecutionOutcome, LifecycleError> {
        let image = self.pull(identity).await?;
        self.execute(&image, job, identity).await
    }

    /// Resolves registry credentials and pulls the task image. Returns the image reference.
    pub async fn pull(&self, identity: &ExecutorIdentity) -> Result<String, LifecycleError> {
        let runtime = self.services.runtime();
        runtime.init().await.map_err(LifecycleError::TaskRuntime)?;

        let image = self.config.image_reference(identity);
        let registry = self.config.registry_host(identity);

        let credentials = self
            .services
            .registry()
            .credentials(&registry)
            .await
            .map_err(LifecycleError::ImagePullFailed)?;

        info!(image = %image, authenticated = credentials.is_some(), "Pulling image");
        runtime
            .pull(&image, credentials)
            .await
            .map_err(LifecycleError::ImagePullFailed)?;

        Ok(image)
    }

    /// Starts the container, streams its output into the execution log and
    /// waits for its exit code. A non-zero exit is still `Ok`.
    pub async fn execute(
        &self,
        image: &str,
        job: &JobSpec,
        identity: &ExecutorIdentity,
    ) -> Result<ExecutionOutcome, LifecycleError> {
        let runtime = self.services.runtime();
        let result_path = self.config.workdir.join(keys::RESULT_FILE);

        match tokio::fs::remove_file(&result_path).await {
            Ok(()) => warn!(path = %result_path.display(), "Removed stale result file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(LifecycleError::TaskRuntime(RuntimeError::System(format!(
                    "failed to remove stale result {}: {e}",
                    result_path.display()
                ))));
            }
        }

        let invocation = self.invocation(image, job, identity);
        let started = Instant::now();

        let id = runtime
            .start(&invocation)
            .await
            .map_err(LifecycleError::TaskRuntime)?;

        info!(container = %id, image, "Task started");
        let mut event = StatusEvent::new(Status::TaskStarted).with("image_tag", &identity.image_tag);
        if let Some(task_id) = &job.task_id {
            event = event.with("task_id", task_id);
        }
        self.notifications.emit(event);

        let mut pump = match runtime.attach(&id).await {
            Ok(output) => Some(tokio::spawn(pump_output(output, self.log.clone()))),
            Err(e) => {
                warn!(container = %id, "Could not attach to task output: {e}");
                None
            }
        };

        let exit = match tokio::time::timeout(self.config.task_timeout, runtime.wait(&id)).await {
            Ok(Ok(code)) => TaskExit::Exited(code),
            Ok(Err(e)) => {
                if let Some(pump) = pump.take() {
                    pump.abort();
                }
                self.remove(&id).await;
                return Err(LifecycleError::TaskRuntime(e));
            }
            Err(_) => {
                warn!(
                    container = %id,
                    timeout_secs = self.config.task_timeout.as_secs(),
                    "Task timed out, killing container"
                );
                if let Err(e) = runtime.kill(&id).await {
                    error!(container = %id, "Failed to kill timed out task: {e}");
                }
                TaskExit::TimedOut
            }
        };
        let duration = started.elapsed();

        if let Some(mut pump) = pump {
            if tokio::time::timeout(OUTPUT_DRAIN, &mut pump).await.is_err() {
                warn!(container = %id, "Output stream still open after exit, detaching");
                pump.abort();
            }
        }

        match exit {
            TaskExit::Exited(code) => info!(
                container = %id,
                exit_code = code,
                duration_secs = duration.as_secs(),
                "Task exited"
            ),
            TaskExit::TimedOut => warn!(container = %id, "Task killed after timeout"),
        }

        let result = read_result(&result_path).await;
        self.remove(&id).await;

        Ok(ExecutionOutcome {
            exit,
            result,
            duration,
        })
    }

    fn invocation(&self, image: &str, job: &JobSpec, identity: &ExecutorIdentity) -> TaskInvocation {
        let command = match job.payload {
            PayloadRef::Bundled => &self.config.bundled_entrypoint,
            PayloadRef::Downloaded { .. } => &self.config.entrypoint,
        };

        let mut entrypoint = Vec::with_capacity(command.len() + 2);
        if self.config.virtual_display {
            entrypoint.extend(["xvfb-run".to_string(), "-a".to_string()]);
        }
        entrypoint.extend(command.iter().cloned());

        TaskInvocation {
            image: image.to_string(),
            name: format!("{}-{}", identity.name, &uuid::Uuid::new_v4().simple().to_string()[..8]),
            entrypoint,
            args: job.entrypoint_args(&identity.name, &identity.region),
            env: vec![
                (container::RESULT_PATH_ENV.into(), container::RESULT_PATH.into()),
                ("PYTHONUNBUFFERED".into(), "1".into()),
            ],
            secrets: job.secrets.clone(),
            workdir: self.config.workdir.clone(),
            mount_point: container::WORKSPACE.into(),
            shm_size: self.config.shm_size,
        }
    }

    async fn remove(&self, id: &str) {
        if let Err(e) = self.services.runtime().remove(id).await {
            warn!(container = %id, "Failed to remove container: {e}");
        }
    }
}

/// Copies runtime output into the execution log, one tagged line at a time.
async fn pump_output(mut output: BoxStream<'static, Result<LogOutput, RuntimeError>>, log: ExecutionLog) {
    let mut assemblers: HashMap<LogSource, LineAssembler> = HashMap::new();

    while let Some(frame) = output.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Task output stream failed: {e}");
                break;
            }
        };

        let lines = assemblers.entry(frame.source).or_default().push(&frame.message);
        for line in lines {
            if let Err(e) = log.append_output(frame.source, &line).await {
                warn!("Failed to write task output: {e}");
            }
        }
    }

    for (source, mut assembler) in assemblers {
        if let Some(rest) = assembler.finish() {
            if let Err(e) = log.append_output(source, &rest).await {
                warn!("Failed to write task output: {e}");
            }
        }
    }
}

async fn read_result(path: &std::path::Path) -> Option<ResultArtifact> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let artifact = ResultArtifact::new(Bytes::from(bytes));
            info!(
                bytes = artifact.bytes.len(),
                reported_status = artifact.reported_status().unwrap_or("-"),
                "Result file found"
            );
            Some(artifact)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), "Failed to read result file: {e}");
            None
        }
    }
}
