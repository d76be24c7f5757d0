//! Source resolution: make sure a job's rules PDF is on disk before conversion.
//!
//! The converter is an external process that only reports "non-zero exit"
//! when handed a missing or bogus file. Checking existence and the `%PDF`
//! magic bytes first turns that into an error that names the job and path.
//! When enabled, a missing PDF is fetched from the job's `link_to_rules`.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::job::Job;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Resolve the rules PDF of `job`, downloading it when allowed.
pub async fn resolve_source(
    job: &Job,
    config: &PipelineConfig,
    client: &reqwest::Client,
) -> Result<PathBuf, PipelineError> {
    let path = config.pdf_path(job.id);

    let exists = tokio::fs::try_exists(&path)
        .await
        .map_err(|source| PipelineError::Io {
            path: path.clone(),
            source,
        })?;
    if exists {
        check_pdf_magic(&path)?;
        debug!(job_id = job.id, path = %path.display(), "Resolved local rules PDF");
        return Ok(path);
    }

    if config.fetch_missing_pdfs && is_url(&job.link_to_rules) {
        download_pdf(job, &path, client).await?;
        return Ok(path);
    }

    Err(PipelineError::SourcePdfNotFound {
        job_id: job.id,
        path,
    })
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

const PDF_MAGIC: &[u8; 4] = b"%PDF";

fn has_pdf_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// Reject files whose first four bytes are not `%PDF`, including files
/// shorter than that.
fn check_pdf_magic(path: &Path) -> Result<(), PipelineError> {
    use std::io::Read;

    let io_err = |source: std::io::Error| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::open(path).map_err(io_err)?;
    let mut magic = Vec::with_capacity(PDF_MAGIC.len());
    file.take(PDF_MAGIC.len() as u64)
        .read_to_end(&mut magic)
        .map_err(io_err)?;
    if !has_pdf_magic(&magic) {
        return Err(PipelineError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Download `job.link_to_rules` to `dest`.
///
/// The body lands in a temp file next to `dest` and is renamed into place
/// only once complete, so an interrupted download never leaves a truncated
/// PDF that a later run would trust.
async fn download_pdf(job: &Job, dest: &Path, client: &reqwest::Client) -> Result<(), PipelineError> {
    let url = job.link_to_rules.as_str();
    info!(job_id = job.id, url, "Downloading rules PDF");

    let failed = |reason: String| PipelineError::DownloadFailed {
        job_id: job.id,
        url: url.to_string(),
        reason,
    };

    let response = client.get(url).send().await.map_err(|e| failed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.starts_with("application/pdf") {
        return Err(failed(format!("wrong content type '{content_type}'")));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    if !has_pdf_magic(&bytes) {
        return Err(failed("body does not start with %PDF".to_string()));
    }

    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let io_err = |source: std::io::Error| PipelineError::Io {
        path: dest.to_path_buf(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(io_err)?;

    let dest = dest.to_path_buf();
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), PipelineError> {
        let io_err = |source: std::io::Error| PipelineError::Io {
            path: dest.clone(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.persist(&dest).map_err(|e| io_err(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("Download write task panicked: {e}")))??;

    info!(job_id = job.id, "Rules PDF saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfig::builder()
            .pdf_root(dir)
            .image_root(dir.join("img"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/rules.pdf"));
        assert!(is_url("http://example.com/rules.pdf"));
        assert!(!is_url("/tmp/rules.pdf"));
        assert!(!is_url(""));
    }

    #[tokio::test]
    async fn resolves_existing_pdf() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("7.pdf"), b"%PDF-1.7\n").unwrap();
        let cfg = config(dir.path());

        let path = resolve_source(&Job::pending(7, "x"), &cfg, &reqwest::Client::new())
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("7.pdf"));
    }

    #[tokio::test]
    async fn rejects_non_pdf() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("7.pdf"), b"<html>").unwrap();
        let cfg = config(dir.path());

        let err = resolve_source(&Job::pending(7, "x"), &cfg, &reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotAPdf { magic, .. } if magic == b"<htm"));
    }

    #[tokio::test]
    async fn rejects_empty_and_truncated_files() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());

        std::fs::write(dir.path().join("7.pdf"), b"").unwrap();
        let err = resolve_source(&Job::pending(7, "x"), &cfg, &reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotAPdf { ref magic, .. } if magic.is_empty()));

        std::fs::write(dir.path().join("7.pdf"), b"%PD").unwrap();
        let err = resolve_source(&Job::pending(7, "x"), &cfg, &reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotAPdf { ref magic, .. } if magic == b"%PD"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_pdf_root_is_io_error_not_missing() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::write(locked.join("7.pdf"), b"%PDF-1.7\n").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        // Privileged users bypass permission bits, so there is nothing to observe.
        if std::fs::metadata(locked.join("7.pdf")).is_ok() {
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }
        let cfg = PipelineConfig::builder()
            .pdf_root(&locked)
            .image_root(dir.path().join("img"))
            .fetch_missing_pdfs(true)
            .build()
            .unwrap();
        let mut job = Job::pending(7, "x");
        job.link_to_rules = "http://127.0.0.1:9/7.pdf".into();

        let result = resolve_source(&job, &cfg, &reqwest::Client::new()).await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(result, Err(PipelineError::Io { .. })));
    }

    #[test]
    fn pdf_magic_requires_four_bytes() {
        assert!(has_pdf_magic(b"%PDF-1.7"));
        assert!(has_pdf_magic(b"%PDF"));
        assert!(!has_pdf_magic(b"%PD"));
        assert!(!has_pdf_magic(b""));
        assert!(!has_pdf_magic(b"<html>"));
    }

    #[tokio::test]
    async fn missing_pdf_without_download_is_not_found() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let mut job = Job::pending(8, "x");
        job.link_to_rules = "https://example.com/8.pdf".into();

        let err = resolve_source(&job, &cfg, &reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SourcePdfNotFound { job_id: 8, .. }));
    }
}
