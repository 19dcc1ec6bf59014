//! S3-compatible object storage backend (feature `s3`).
//!
//! Holds artefacts only. Job and agent records stay in the in-process or
//! filesystem stores; they are small, hot, and queried in ways object
//! storage is bad at.

use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::Region;

use crate::error::LectureError;
use crate::store::ObjectStore;

#[derive(Clone)]
pub struct S3Config {
    pub bucket_name: String,
    pub region: String,
    pub endpoint: Option<String>,
}

impl S3Config {
    /// Read `PDF2LECTURE_S3_BUCKET` (required), `PDF2LECTURE_S3_REGION`
    /// (default `us-east-1`) and `PDF2LECTURE_S3_ENDPOINT` (optional, for
    /// MinIO and friends). Returns None when no bucket is configured.
    pub fn from_env() -> Option<Self> {
        let bucket_name = std::env::var("PDF2LECTURE_S3_BUCKET").ok()?;
        let region =
            std::env::var("PDF2LECTURE_S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let endpoint = std::env::var("PDF2LECTURE_S3_ENDPOINT").ok();
        Some(Self {
            bucket_name,
            region,
            endpoint,
        })
    }

    fn bucket_internal(&self) -> Result<Box<Bucket>, LectureError> {
        let region = match &self.endpoint {
            Some(ep) => Region::Custom {
                region: self.region.clone(),
                endpoint: ep.clone(),
            },
            None => self
                .region
                .parse()
                .map_err(|e| LectureError::Storage(format!("Invalid region: {e}")))?,
        };
        let creds = Credentials::default()
            .map_err(|e| LectureError::Storage(format!("S3 credentials: {e}")))?;
        let bucket = Bucket::new(&self.bucket_name, region, creds)
            .map_err(|e| LectureError::Storage(format!("S3 bucket: {e}")))?;
        Ok(bucket)
    }
}

/// [`ObjectStore`] over one S3 bucket.
pub struct S3Store {
    config: S3Config,
}

impl S3Store {
    pub fn new(config: S3Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), LectureError> {
        let bucket = self.config.bucket_internal()?;
        bucket
            .put_object(key, data)
            .await
            .map_err(|e| LectureError::Storage(format!("S3 upload: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, LectureError> {
        let bucket = self.config.bucket_internal()?;
        let response = bucket
            .get_object(key)
            .await
            .map_err(|e| LectureError::Storage(format!("S3 download: {e}")))?;
        match response.status_code() {
            200 => Ok(response.to_vec()),
            404 => Err(LectureError::ObjectNotFound {
                key: key.to_string(),
            }),
            code => Err(LectureError::Storage(format!(
                "S3 download failed: HTTP {code}"
            ))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, LectureError> {
        // A prefix listing sidesteps head_object's inconsistent 404 handling
        // across S3-compatible servers.
        Ok(self.list(key).await?.iter().any(|k| k == key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, LectureError> {
        let bucket = self.config.bucket_internal()?;
        let results = bucket
            .list(prefix.to_string(), None)
            .await
            .map_err(|e| LectureError::Storage(format!("S3 list: {e}")))?;
        let mut keys: Vec<String> = results
            .into_iter()
            .flat_map(|r| r.contents)
            .map(|obj| obj.key)
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), LectureError> {
        let bucket = self.config.bucket_internal()?;
        bucket
            .delete_object(key)
            .await
            .map_err(|e| LectureError::Storage(format!("S3 delete: {e}")))?;
        Ok(())
    }
}
