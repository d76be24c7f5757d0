//! Page extraction: turn a job's rules PDF into one image file per page.
//!
//! Rasterisation is delegated to an external converter (poppler's
//! `pdftoppm` by default), invoked as
//! `<converter…> <pdf> <image_root>/<id>/page <format flag>`. When the
//! converter runs in another filesystem namespace (WSL), the two paths are
//! rewritten with the configured converter prefixes. The converter names its outputs `page-1.png`, `page-01.png`, … depending on page count;
//! [`parse_page_number`] recovers the page index from any of those shapes.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::job::Job;
use crate::pipeline::source::resolve_source;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::btree_map::{BTreeMap, Entry};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One rendered page: 1-based page index plus the image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub page: u32,
    pub path: PathBuf,
}

/// Produces a directory of page images for a job.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Render every page of the job's PDF and return the output directory.
    async fn extract(&self, job: &Job) -> Result<PathBuf, PipelineError>;
}

/// [`PageExtractor`] backed by an external PDF-to-image converter process.
pub struct ConverterExtractor {
    config: Arc<PipelineConfig>,
    client: reqwest::Client,
}

impl ConverterExtractor {
    pub fn new(config: Arc<PipelineConfig>, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl PageExtractor for ConverterExtractor {
    async fn extract(&self, job: &Job) -> Result<PathBuf, PipelineError> {
        resolve_source(job, &self.config, &self.client).await?;

        let output_dir = self.config.image_dir(job.id);
        reset_dir(&output_dir).await?;

        let (program, args) = converter_command(&self.config, job.id)?;
        debug!(
            job_id = job.id,
            program = %program,
            args = ?args,
            "Running converter"
        );

        let output = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| PipelineError::ConverterSpawn {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(PipelineError::ConverterFailed {
                job_id: job.id,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(job_id = job.id, dir = %output_dir.display(), "Pages extracted");
        Ok(output_dir)
    }
}

/// Program and arguments of the converter invocation for a job:
/// `<leading args…> <pdf> <output prefix> <format flag>`, with the PDF and
/// output paths expressed in the converter's namespace.
pub fn converter_command(
    config: &PipelineConfig,
    job_id: i64,
) -> Result<(&str, Vec<OsString>), PipelineError> {
    let (program, leading_args) = config
        .converter
        .split_first()
        .ok_or_else(|| PipelineError::InvalidConfig("empty converter command".into()))?;

    let mut args: Vec<OsString> = leading_args.iter().map(OsString::from).collect();
    args.push(config.converter_pdf_path(job_id));
    args.push(config.converter_output_prefix(job_id));
    args.push(OsString::from(&config.image_format));
    Ok((program.as_str(), args))
}

/// Empty `dir`, creating it if needed. Images left by an earlier run would
/// otherwise be picked up next to the fresh ones.
async fn reset_dir(dir: &Path) -> Result<(), PipelineError> {
    let io_err = |source: std::io::Error| PipelineError::Io {
        path: dir.to_path_buf(),
        source,
    };
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "Cleared stale page images"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(e)),
    }
    tokio::fs::create_dir_all(dir).await.map_err(io_err)
}

static RE_PAGE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)page[-_\s]*(\d+)").unwrap());

/// Recover the page number embedded in a file name.
///
/// Case-insensitive; `page` may be followed by `-`, `_` or whitespace before
/// the digits. Returns `None` when there is no such token or the number does
/// not fit.
pub fn parse_page_number(name: &str) -> Option<u32> {
    RE_PAGE_NUMBER
        .captures(name)
        .and_then(|caps| caps[1].parse().ok())
}

/// List the page images in `dir`, sorted by page.
///
/// Only regular files whose name carries a page number count; anything else
/// (sub-directories, stray files) is skipped silently. When several files map
/// to the same page (`page-1.png` and `page-01.png`), the smallest path wins.
pub async fn discover_page_images(dir: &Path) -> Result<Vec<PageImage>, PipelineError> {
    let io_err = |source: std::io::Error| PipelineError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut by_page: BTreeMap<u32, PathBuf> = BTreeMap::new();

    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        if !entry.file_type().await.map_err(io_err)?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(page) = parse_page_number(&name.to_string_lossy()) else {
            continue;
        };
        let path = entry.path();
        match by_page.entry(page) {
            Entry::Vacant(slot) => {
                slot.insert(path);
            }
            Entry::Occupied(mut slot) => {
                let ignored = if path < *slot.get() {
                    slot.insert(path)
                } else {
                    path
                };
                warn!(
                    page,
                    kept = %slot.get().display(),
                    ignored = %ignored.display(),
                    "Duplicate page index, ignoring image"
                );
            }
        }
    }

    let pages: Vec<PageImage> = by_page
        .into_iter()
        .map(|(page, path)| PageImage { page, path })
        .collect();

    debug!(dir = %dir.display(), count = pages.len(), "Discovered page images");
    Ok(pages)
}
