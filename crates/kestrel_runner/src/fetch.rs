use crate::config::RunnerConfig;
use bytes::Bytes;
use kestrel_core::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where the job definition comes from, decided by which tags are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    Inline {
        task_text: String,
    },
    Indirect {
        task_key: String,
        script_key: Option<String>,
        assets_key: Option<String>,
    },
}

impl JobSource {
    /// `TASK_KEY` selects indirect sourcing and wins over `TASK_PROMPT`.
    pub async fn detect<M: MetadataSource>(metadata: &M) -> Result<Self, FetchError> {
        if let Some(task_key) = read_tag(metadata, tags::TASK_KEY).await? {
            return Ok(JobSource::Indirect {
                task_key,
                script_key: read_tag(metadata, tags::SCRIPT_KEY).await?,
                assets_key: read_tag(metadata, tags::SCRAPERS_KEY).await?,
            });
        }

        if let Some(task_text) = read_tag(metadata, tags::TASK_PROMPT).await? {
            return Ok(JobSource::Inline { task_text });
        }

        Err(FetchError::NoJobDefinition)
    }

    pub fn kind(&self) -> JobSourceKind {
        match self {
            JobSource::Inline { .. } => JobSourceKind::Inline,
            JobSource::Indirect { .. } => JobSourceKind::Indirect,
        }
    }
}

/// Reads a tag, treating blank values as absent.
async fn read_tag<M: MetadataSource>(metadata: &M, key: &str) -> Result<Option<String>, FetchError> {
    Ok(metadata
        .tag(key)
        .await?
        .filter(|v| !v.trim().is_empty()))
}

/// Turns instance metadata and stored objects into a [`JobSpec`] and a
/// populated working directory.
pub struct JobFetcher<'a, M, S> {
    metadata: &'a M,
    store: &'a S,
    config: &'a RunnerConfig,
}

impl<'a, M: MetadataSource, S: ObjectStore> JobFetcher<'a, M, S> {
    pub fn new(metadata: &'a M, store: &'a S, config: &'a RunnerConfig) -> Self {
        Self {
            metadata,
            store,
            config,
        }
    }

    pub async fn fetch(&self, identity: &ExecutorIdentity) -> Result<JobSpec, FetchError> {
        let source = JobSource::detect(self.metadata).await?;
        info!(source = %source.kind(), "Job definition found");

        reset_dir(&self.config.workdir).await?;

        let result = self.assemble(source, identity).await;
        if result.is_err() {
            if let Err(e) = reset_dir(&self.config.workdir).await {
                warn!(path = %self.config.workdir.display(), "Failed to clear working directory: {e}");
            }
        }
        let job = result?;

        info!(
            source = %job.source,
            task_id = job.task_id.as_deref().unwrap_or("-"),
            sub_task = job.sub_task.as_deref().unwrap_or("-"),
            secrets = job.secrets.len(),
            "Job fetched"
        );

        Ok(job)
    }

    /// Any error here leaves a partially populated working directory behind.
    async fn assemble(
        &self,
        source: JobSource,
        identity: &ExecutorIdentity,
    ) -> Result<JobSpec, FetchError> {
        let (task_text, payload, assets, source) = self.load(source, identity).await?;

        Ok(JobSpec {
            source,
            task_text,
            payload,
            assets,
            task_id: read_tag(self.metadata, tags::TASK_ID).await?,
            sub_task: read_tag(self.metadata, tags::SCRAPER).await?,
            secrets: self.secrets().await?,
        })
    }

    async fn load(
        &self,
        source: JobSource,
        identity: &ExecutorIdentity,
    ) -> Result<(String, PayloadRef, Option<AssetBundleRef>, JobSourceKind), FetchError> {
        match source {
            JobSource::Inline { task_text } => {
                Ok((task_text, PayloadRef::Bundled, None, JobSourceKind::Inline))
            }
            JobSource::Indirect {
                task_key,
                script_key,
                assets_key,
            } => {
                let container = self.config.jobs_container(identity);

                let task_text = self
                    .download(&container, &task_key)
                    .await
                    .map_err(|e| FetchError::TaskTextMissing(format!("{task_key}: {e}")))?;
                let task_text = String::from_utf8_lossy(&task_text).trim().to_string();
                if task_text.is_empty() {
                    return Err(FetchError::TaskTextMissing(format!("{task_key}: empty")));
                }

                let script_key = script_key.ok_or_else(|| {
                    FetchError::PayloadMissing(format!("{} tag not set", tags::SCRIPT_KEY))
                })?;
                let script = self
                    .download(&container, &script_key)
                    .await
                    .map_err(|e| FetchError::PayloadMissing(format!("{script_key}: {e}")))?;
                let path = self.config.workdir.join(&self.config.payload_file_name);
                tokio::fs::write(&path, &script).await?;
                debug!(key = %script_key, path = %path.display(), "Payload written");

                let assets = match assets_key {
                    Some(key) => {
                        let archive = self.download(&container, &key).await.map_err(|e| {
                            FetchError::AssetBundleMissing(format!("{key}: {e}"))
                        })?;
                        let entries = extract_archive(archive, self.config.workdir.clone()).await?;
                        info!(key = %key, entries, "Asset bundle extracted");
                        Some(AssetBundleRef {
                            key,
                            extracted_to: self.config.workdir.clone(),
                            entries,
                        })
                    }
                    None => None,
                };

                Ok((
                    task_text,
                    PayloadRef::Downloaded {
                        key: script_key,
                        path,
                    },
                    assets,
                    JobSourceKind::Indirect,
                ))
            }
        }
    }

    async fn download(&self, container: &str, key: &str) -> Result<Bytes, StorageError> {
        let data = self.store.get(container, key).await?;
        debug!(container, key, bytes = data.len(), "Downloaded");
        Ok(data)
    }

    async fn secrets(&self) -> Result<Vec<SecretEnv>, FetchError> {
        let mut secrets = Vec::with_capacity(self.config.secret_tags.len());
        for name in &self.config.secret_tags {
            match read_tag(self.metadata, name).await? {
                Some(value) => secrets.push(SecretEnv {
                    name: name.clone(),
                    value: SecretString::new(value),
                }),
                None => warn!(tag = %name, "Secret tag not set"),
            }
        }
        Ok(secrets)
    }
}

/// Removes `dir` and everything in it, then recreates it empty.
pub async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}

/// Extracts a zip archive into `dest`. Entries that would land outside `dest`
/// fail the whole extraction. Returns the number of files written.
pub async fn extract_archive(archive: Bytes, dest: PathBuf) -> Result<usize, FetchError> {
    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest))
        .await
        .map_err(|e| FetchError::AssetExtraction(format!("extraction task failed: {e}")))?
}

fn extract_blocking(archive: &[u8], dest: &Path) -> Result<usize, FetchError> {
    let extraction = |e: zip::result::ZipError| FetchError::AssetExtraction(e.to_string());

    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).map_err(extraction)?;
    let mut files = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(extraction)?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            FetchError::AssetExtraction(format!("unsafe entry name: {}", entry.name()))
        })?;
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        files += 1;
    }

    Ok(files)
}
