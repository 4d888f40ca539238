//! # Kestrel Docker Runtime
//!
//! Runs the task container through the local Docker daemon.

use bollard::auth::DockerCredentials;
use bollard::config::ContainerCreateBody;
use bollard::container::LogOutput as DockerLogOutput;
use bollard::errors::Error as DockerError;
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, KillContainerOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::{Docker, models::HostConfig};
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use kestrel_core::prelude::*;
use tracing::{debug, info};

#[derive(Clone)]
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker socket (defaults to /var/run/docker.sock on Linux)
    pub fn connect_local() -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::System(format!("Failed to connect to Docker: {}", e)))?;
        Ok(Self { client })
    }
}

/// Splits `registry/repo:tag` into `("registry/repo", "tag")`. A port in the
/// registry host is not mistaken for a tag.
pub fn split_image(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}

impl TaskRuntime for DockerRuntime {
    async fn init(&self) -> Result<(), RuntimeError> {
        self.client
            .version()
            .await
            .map_err(|e| RuntimeError::System(format!("Docker unavailable: {}", e)))?;

        Ok(())
    }

    async fn pull(
        &self,
        image: &str,
        credentials: Option<RegistryCredentials>,
    ) -> Result<(), RuntimeError> {
        let (from_image, tag) = split_image(image);

        let options = CreateImageOptions {
            from_image: Some(from_image.to_string()),
            tag: Some(tag.to_string()),
            ..Default::default()
        };

        let credentials = credentials.map(|c| DockerCredentials {
            username: Some(c.username),
            password: Some(c.password.expose().to_string()),
            serveraddress: Some(c.server),
            ..Default::default()
        });

        let mut progress = self.client.create_image(Some(options), None, credentials);
        while let Some(info) = progress
            .try_next()
            .await
            .map_err(|e| RuntimeError::Pull(format!("{image}: {e}")))?
        {
            if let Some(status) = info.status {
                debug!(image, "{}", status);
            }
        }

        info!(image, "Image pulled");
        Ok(())
    }

    async fn start(&self, invocation: &TaskInvocation) -> Result<String, RuntimeError> {
        let options = CreateContainerOptions {
            name: Some(invocation.name.clone()),
            ..Default::default()
        };

        let bind = format!(
            "{}:{}",
            invocation.workdir.to_string_lossy(),
            invocation.mount_point
        );

        let body = ContainerCreateBody {
            image: Some(invocation.image.clone()),
            entrypoint: Some(invocation.entrypoint.clone()),
            cmd: Some(invocation.args.clone()),
            env: Some(invocation.env_pairs()),
            working_dir: Some(invocation.mount_point.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(HostConfig {
                binds: Some(vec![bind]),
                shm_size: invocation.shm_size,
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .client
            .create_container(Some(options), body)
            .await
            .map_err(|e| RuntimeError::Start(e.to_string()))?;

        self.client
            .start_container(created.id.as_str(), None::<StartContainerOptions>)
            .await
            .map_err(|e| RuntimeError::Start(format!("Failed to start: {}", e)))?;

        Ok(created.id)
    }

    async fn attach(
        &self,
        id: &str,
    ) -> Result<BoxStream<'static, Result<LogOutput, RuntimeError>>, RuntimeError> {
        let options = LogsOptions {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: false,
            tail: "all".to_string(),
            ..Default::default()
        };

        let stream = self.client.logs(id, Some(options));
        let mapped_stream = stream.map(|res| match res {
            Ok(output) => {
                let (source, bytes) = match output {
                    DockerLogOutput::StdOut { message } => (LogSource::Stdout, message),
                    DockerLogOutput::StdErr { message } => (LogSource::Stderr, message),
                    DockerLogOutput::Console { message } => (LogSource::Console, message),
                    DockerLogOutput::StdIn { message } => (LogSource::Console, message),
                };

                Ok(LogOutput {
                    source,
                    message: String::from_utf8_lossy(&bytes).into_owned(),
                })
            }
            Err(e) => Err(RuntimeError::System(e.to_string())),
        });

        Ok(mapped_stream.boxed())
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running".to_string(),
        };

        let mut stream = self.client.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(DockerError::DockerResponseServerError {
                status_code: 404,
                ..
            })) => Err(RuntimeError::NotFound(id.to_string())),
            Some(Err(e)) => Err(RuntimeError::System(e.to_string())),
            None => Err(RuntimeError::System(format!(
                "wait stream for {id} ended without a status"
            ))),
        }
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        let options = KillContainerOptions {
            signal: "SIGKILL".to_string(),
        };

        self.client
            .kill_container(id, Some(options))
            .await
            .map_err(|e| RuntimeError::System(format!("Failed to kill {id}: {e}")))
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.client
            .remove_container(id, Some(options))
            .await
            .map_err(|e| RuntimeError::System(format!("Failed to remove {id}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::split_image;

    #[test]
    fn splits_registry_image_and_tag() {
        assert_eq!(
            split_image("123456789012.dkr.ecr.us-east-1.amazonaws.com/ai-executor-ec2:runtime-1a2b"),
            (
                "123456789012.dkr.ecr.us-east-1.amazonaws.com/ai-executor-ec2",
                "runtime-1a2b"
            )
        );
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        assert_eq!(
            split_image("localhost:5000/worker"),
            ("localhost:5000/worker", "latest")
        );
        assert_eq!(
            split_image("localhost:5000/worker:v2"),
            ("localhost:5000/worker", "v2")
        );
    }
}
