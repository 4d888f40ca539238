use kestrel_core::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// The local, append-only execution log.
///
/// Task output is written here line by line as `[task:stdout] ...`. The
/// orchestration's own tracing output is appended to the same file by the
/// telemetry layer.
#[derive(Clone)]
pub struct ExecutionLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl ExecutionLog {
    /// Opens `path` for appending, creating it and its parent directory.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `[tag] line`. Each line goes out in a single write.
    pub async fn append(&self, tag: &str, line: &str) -> std::io::Result<()> {
        let entry = format!("[{tag}] {line}\n");
        let mut file = self.file.lock().await;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await
    }

    pub async fn append_output(&self, source: LogSource, line: &str) -> std::io::Result<()> {
        self.append(source.tag(), line).await
    }
}

/// Reassembles output chunks into whole lines. Chunk boundaries from the
/// runtime do not line up with newlines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: String,
}

impl LineAssembler {
    /// Returns the lines completed by `chunk`, without their line endings.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(end) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=end).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Whatever is left after the last newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim_end_matches('\r');
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_split_chunks() {
        let mut lines = LineAssembler::default();
        assert!(lines.push("Step 1: open").is_empty());
        assert_eq!(lines.push("ing browser\nStep 2"), vec!["Step 1: opening browser"]);
        assert_eq!(lines.push(": search\r\n\n"), vec!["Step 2: search", ""]);
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn keeps_trailing_partial_line() {
        let mut lines = LineAssembler::default();
        assert_eq!(lines.push("a\nb"), vec!["a"]);
        assert_eq!(lines.finish().as_deref(), Some("b"));
        assert_eq!(lines.finish(), None);
    }

    #[tokio::test]
    async fn appends_tagged_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = ExecutionLog::open(dir.path().join("logs/kestrel.log"))
            .await
            .unwrap();

        log.append_output(LogSource::Stdout, "hello").await.unwrap();
        log.append_output(LogSource::Stderr, "oops").await.unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents, "[task:stdout] hello\n[task:stderr] oops\n");
    }
}
