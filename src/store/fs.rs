//! Filesystem storage backend.
//!
//! Lays one directory out as:
//!
//! ```text
//! <root>/objects/<key>     artefacts, keys mapped to sub-paths
//! <root>/jobs/<id>.json    job records
//! <root>/agents/<id>.json  agent records
//! ```
//!
//! All writes go through a temp file followed by a rename so a crash never
//! leaves a half-written record behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use crate::agent::LectureAgent;
use crate::error::LectureError;
use crate::job::Job;
use crate::store::{AgentStore, JobStore, ObjectStore};

pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, LectureError> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(LectureError::Storage(format!(
                "object key '{key}' is not a clean relative path"
            )));
        }
        let mut path = self.root.join("objects");
        for part in key.split('/') {
            path.push(part);
        }
        Ok(path)
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.root.join("jobs").join(format!("{id}.json"))
    }

    fn agent_path(&self, id: &str) -> PathBuf {
        self.root.join("agents").join(format!("{id}.json"))
    }
}

/// Write via temp file + rename.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), LectureError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read every `.json` record in a directory, skipping unparsable files with
/// a warning. A missing directory reads as empty.
async fn read_records<T: serde::de::DeserializeOwned>(
    dir: &Path,
) -> Result<Vec<T>, LectureError> {
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = tokio::fs::read(&path).await?;
        match serde_json::from_slice(&bytes) {
            Ok(record) => out.push(record),
            Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
        }
    }
    Ok(out)
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), LectureError> {
        let path = self.object_path(key)?;
        write_atomic(&path, data).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, LectureError> {
        let path = self.object_path(key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                LectureError::ObjectNotFound {
                    key: key.to_string(),
                }
            } else {
                e.into()
            }
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, LectureError> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, LectureError> {
        let objects_root = self.root.join("objects");
        let mut keys = Vec::new();
        // Iterative walk; keys are rebuilt from path components so the
        // separator is always '/' regardless of platform.
        let mut stack: Vec<(PathBuf, String)> = vec![(objects_root.clone(), String::new())];
        while let Some((dir, key_prefix)) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if key_prefix.is_empty() {
                    name
                } else {
                    format!("{key_prefix}/{name}")
                };
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push((entry.path(), key));
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), LectureError> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl JobStore for FsStore {
    async fn put_job(&self, job: &Job) -> Result<(), LectureError> {
        let data = serde_json::to_vec_pretty(job)?;
        write_atomic(&self.job_path(&job.id), &data).await
    }

    async fn get_job(&self, id: &str) -> Result<Job, LectureError> {
        let bytes = tokio::fs::read(self.job_path(id)).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                LectureError::JobNotFound { id: id.to_string() }
            } else {
                LectureError::from(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, LectureError> {
        let mut jobs: Vec<Job> = read_records(&self.root.join("jobs")).await?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }
}

#[async_trait]
impl AgentStore for FsStore {
    async fn put_agent(&self, agent: &LectureAgent) -> Result<(), LectureError> {
        agent.validate()?;
        let data = serde_json::to_vec_pretty(agent)?;
        write_atomic(&self.agent_path(&agent.id), &data).await
    }

    async fn get_agent(&self, id: &str) -> Result<LectureAgent, LectureError> {
        let bytes = tokio::fs::read(self.agent_path(id)).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                LectureError::AgentNotFound { id: id.to_string() }
            } else {
                LectureError::from(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list_agents(&self) -> Result<Vec<LectureAgent>, LectureError> {
        let mut agents: Vec<LectureAgent> = read_records(&self.root.join("agents")).await?;
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn delete_agent(&self, id: &str) -> Result<(), LectureError> {
        match tokio::fs::remove_file(self.agent_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
