//! In-memory storage backend.
//!
//! Backs tests and one-shot CLI runs. One [`MemoryStore`] implements all
//! three storage traits over concurrent maps; nothing survives the process.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::agent::LectureAgent;
use crate::error::LectureError;
use crate::job::Job;
use crate::store::{AgentStore, JobStore, ObjectStore};

#[derive(Default)]
pub struct MemoryStore {
    objects: DashMap<String, Vec<u8>>,
    jobs: DashMap<String, Job>,
    agents: DashMap<String, LectureAgent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), LectureError> {
        self.objects.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, LectureError> {
        self.objects
            .get(key)
            .map(|e| e.value().clone())
            .ok_or_else(|| LectureError::ObjectNotFound {
                key: key.to_string(),
            })
    }

    async fn exists(&self, key: &str) -> Result<bool, LectureError> {
        Ok(self.objects.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, LectureError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), LectureError> {
        self.objects.remove(key);
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn put_job(&self, job: &Job) -> Result<(), LectureError> {
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Job, LectureError> {
        self.jobs
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| LectureError::JobNotFound { id: id.to_string() })
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, LectureError> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn put_agent(&self, agent: &LectureAgent) -> Result<(), LectureError> {
        agent.validate()?;
        self.agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> Result<LectureAgent, LectureError> {
        self.agents
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| LectureError::AgentNotFound { id: id.to_string() })
    }

    async fn list_agents(&self) -> Result<Vec<LectureAgent>, LectureError> {
        let mut agents: Vec<LectureAgent> = self.agents.iter().map(|e| e.value().clone()).collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn delete_agent(&self, id: &str) -> Result<(), LectureError> {
        self.agents.remove(id);
        Ok(())
    }
}
