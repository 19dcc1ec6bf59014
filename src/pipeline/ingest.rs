//! Intake: turn a user-supplied path, URL or raw upload into a lecture job.
//!
//! Everything is validated here, before any object is written: magic bytes
//! first (a wrong file should fail fast with a real message, not a pdfium
//! crash later), then the size cap, then the agent reference. Only a fully
//! valid upload produces a job record and a `JobCreated` event.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::bus::{EventBus, JobEvent};
use crate::config::{AnalysisMode, PipelineConfig};
use crate::error::LectureError;
use crate::job::Job;
use crate::store::{keys, Stores};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Reject anything that is not a PDF within the size cap.
pub fn validate_pdf(bytes: &[u8], name: &str, max_bytes: usize) -> Result<(), LectureError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(LectureError::NotAPdf {
            name: name.to_string(),
            magic,
        });
    }
    if bytes.len() > max_bytes {
        return Err(LectureError::PdfTooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }
    Ok(())
}

/// Resolve a path or URL to PDF bytes plus a display filename.
pub async fn fetch_input(
    input: &str,
    config: &PipelineConfig,
) -> Result<(Vec<u8>, String), LectureError> {
    if is_url(input) {
        download_url(input, config.download_timeout_secs).await
    } else {
        read_local(input)
    }
}

/// Read a local file, distinguishing missing from unreadable.
fn read_local(path_str: &str) -> Result<(Vec<u8>, String), LectureError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(LectureError::FileNotFound { path });
    }

    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(LectureError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(LectureError::FileNotFound { path });
        }
    };

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());

    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok((bytes, filename))
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<(Vec<u8>, String), LectureError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LectureError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            LectureError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            LectureError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(LectureError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = extract_filename(url);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                LectureError::DownloadTimeout {
                    url: url.to_string(),
                    secs: timeout_secs,
                }
            } else {
                LectureError::DownloadFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?
        .to_vec();

    info!("Downloaded {} bytes from {}", bytes.len(), url);
    Ok((bytes, filename))
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

/// Validate an upload, persist it and announce the new job.
///
/// The agent is looked up before anything is written so a dangling agent id
/// never leaves a half-created job behind.
pub async fn create_job(
    stores: &Stores,
    bus: &EventBus,
    config: &PipelineConfig,
    bytes: &[u8],
    filename: &str,
    agent_id: &str,
    mode: AnalysisMode,
) -> Result<Job, LectureError> {
    validate_pdf(bytes, filename, config.max_pdf_bytes)?;
    stores.agents.get_agent(agent_id).await?;

    let job = Job::new(filename, agent_id, mode);
    stores
        .objects
        .put(&keys::original_pdf(&job.id), bytes)
        .await?;
    stores.jobs.put_job(&job).await?;

    bus.publish(JobEvent::JobCreated {
        job_id: job.id.clone(),
    });
    info!(
        "Job {} created: '{}' ({} bytes, agent '{}')",
        job.id,
        filename,
        bytes.len(),
        agent_id
    );
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::seed_builtin_agents;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn validate_accepts_a_minimal_pdf() {
        assert!(validate_pdf(b"%PDF-1.7\n%%EOF", "a.pdf", 1024).is_ok());
    }

    #[test]
    fn validate_rejects_wrong_magic() {
        let err = validate_pdf(b"PK\x03\x04zip", "a.pdf", 1024).unwrap_err();
        match err {
            LectureError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn validate_rejects_truncated_input() {
        assert!(matches!(
            validate_pdf(b"%P", "a.pdf", 1024),
            Err(LectureError::NotAPdf { .. })
        ));
    }

    #[test]
    fn validate_enforces_the_size_cap() {
        let mut bytes = b"%PDF".to_vec();
        bytes.resize(2048, 0);
        assert!(matches!(
            validate_pdf(&bytes, "a.pdf", 1024),
            Err(LectureError::PdfTooLarge { size: 2048, max: 1024 })
        ));
    }

    #[test]
    fn filename_comes_from_the_url_path() {
        assert_eq!(
            extract_filename("https://arxiv.org/pdf/1706.03762.pdf"),
            "1706.03762.pdf"
        );
        assert_eq!(extract_filename("https://example.com/"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn create_job_stores_pdf_and_record() {
        let stores = Stores::in_memory();
        seed_builtin_agents(stores.agents.as_ref()).await.unwrap();
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let config = PipelineConfig::default();

        let job = create_job(
            &stores,
            &bus,
            &config,
            b"%PDF-1.4 fake",
            "paper.pdf",
            "professor",
            AnalysisMode::Vision,
        )
        .await
        .unwrap();

        let stored = stores.jobs.get_job(&job.id).await.unwrap();
        assert_eq!(stored.filename, "paper.pdf");
        assert!(stores
            .objects
            .exists(&keys::original_pdf(&job.id))
            .await
            .unwrap());

        match events.recv().await.unwrap() {
            JobEvent::JobCreated { job_id } => assert_eq!(job_id, job.id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_job_rejects_unknown_agent_without_writing() {
        let stores = Stores::in_memory();
        let bus = EventBus::default();
        let config = PipelineConfig::default();

        let err = create_job(
            &stores,
            &bus,
            &config,
            b"%PDF-1.4 fake",
            "paper.pdf",
            "nobody",
            AnalysisMode::Vision,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LectureError::AgentNotFound { .. }));
        assert!(stores.jobs.list_jobs().await.unwrap().is_empty());
    }
}
