use kestrel_core::prelude::*;
use tokio::process::Command;
use tracing::{info, warn};

/// Powers the host off with `shutdown -h now`. Instances are launched with
/// shutdown behaviour `terminate`, so this also releases the instance.
#[derive(Clone, Debug)]
pub struct SystemShutdown {
    program: String,
    args: Vec<String>,
}

impl Default for SystemShutdown {
    fn default() -> Self {
        Self {
            program: "shutdown".into(),
            args: vec!["-h".into(), "now".into()],
        }
    }
}

impl SystemShutdown {
    pub fn with_command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl HostControl for SystemShutdown {
    async fn request_shutdown(&self) -> Result<(), std::io::Error> {
        warn!(command = %self.program, "Requesting host shutdown");

        let status = Command::new(&self.program).args(&self.args).status().await?;
        if !status.success() {
            return Err(std::io::Error::other(format!(
                "{} exited with {status}",
                self.program
            )));
        }
        Ok(())
    }
}

/// Leaves the host running. For local runs and debugging.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoShutdown;

impl HostControl for NoShutdown {
    async fn request_shutdown(&self) -> Result<(), std::io::Error> {
        info!("Host shutdown skipped");
        Ok(())
    }
}
