//! Storage traits and backends.
//!
//! Three narrow traits split what the pipeline persists: binary artefacts
//! ([`ObjectStore`]), job records ([`JobStore`]) and agent records
//! ([`AgentStore`]). The in-memory backend serves tests and single-process
//! deployments, the filesystem backend survives restarts, and the S3 backend
//! (feature `s3`) puts artefacts where a fleet can reach them.

pub mod fs;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{builtin_agents, LectureAgent};
use crate::error::LectureError;
use crate::job::Job;

/// Binary artefact storage: PDFs, page images, audio, JSON artefacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), LectureError>;

    /// Fails with [`LectureError::ObjectNotFound`] when the key is absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>, LectureError>;

    async fn exists(&self, key: &str) -> Result<bool, LectureError>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, LectureError>;

    /// Idempotent: deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), LectureError>;
}

/// Job record storage.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or overwrite the record.
    async fn put_job(&self, job: &Job) -> Result<(), LectureError>;

    /// Fails with [`LectureError::JobNotFound`] when the id is absent.
    async fn get_job(&self, id: &str) -> Result<Job, LectureError>;

    /// All jobs, newest first.
    async fn list_jobs(&self) -> Result<Vec<Job>, LectureError>;
}

/// Agent record storage.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn put_agent(&self, agent: &LectureAgent) -> Result<(), LectureError>;

    /// Fails with [`LectureError::AgentNotFound`] when the id is absent.
    async fn get_agent(&self, id: &str) -> Result<LectureAgent, LectureError>;

    /// All agents, sorted by id.
    async fn list_agents(&self) -> Result<Vec<LectureAgent>, LectureError>;

    async fn delete_agent(&self, id: &str) -> Result<(), LectureError>;
}

/// The three stores a running service needs, behind one clonable handle.
#[derive(Clone)]
pub struct Stores {
    pub objects: Arc<dyn ObjectStore>,
    pub jobs: Arc<dyn JobStore>,
    pub agents: Arc<dyn AgentStore>,
}

impl Stores {
    /// Everything in process memory. Tests and one-shot CLI runs.
    pub fn in_memory() -> Self {
        let store = Arc::new(memory::MemoryStore::new());
        Self {
            objects: store.clone(),
            jobs: store.clone(),
            agents: store,
        }
    }

    /// Everything under one directory on disk.
    pub fn on_disk(root: impl Into<std::path::PathBuf>) -> Self {
        let store = Arc::new(fs::FsStore::new(root));
        Self {
            objects: store.clone(),
            jobs: store.clone(),
            agents: store,
        }
    }
}

/// Insert the built-in agents wherever they are missing. Existing records
/// (including edited copies of built-ins) are left alone.
pub async fn seed_builtin_agents(agents: &dyn AgentStore) -> Result<(), LectureError> {
    for agent in builtin_agents() {
        if agents.get_agent(&agent.id).await.is_err() {
            agents.put_agent(&agent).await?;
        }
    }
    Ok(())
}

/// Storage key layout for lecture artefacts.
///
/// Page images live under a `{job_id}_pages/` prefix with 1-indexed,
/// unpadded names. Consumers always compute a page's key from its number
/// rather than relying on listing order.
pub mod keys {
    pub fn original_pdf(job_id: &str) -> String {
        format!("{job_id}/original.pdf")
    }

    pub fn page_image(job_id: &str, page: usize) -> String {
        format!("{job_id}_pages/page_{page}.png")
    }

    pub fn page_prefix(job_id: &str) -> String {
        format!("{job_id}_pages/")
    }

    pub fn segments(job_id: &str) -> String {
        format!("{job_id}/segments.json")
    }

    pub fn script(job_id: &str) -> String {
        format!("{job_id}/script.json")
    }

    pub fn audio(job_id: &str, extension: &str) -> String {
        format!("{job_id}/audio.{extension}")
    }

    pub fn timings(job_id: &str) -> String {
        format!("{job_id}/timings.json")
    }
}
