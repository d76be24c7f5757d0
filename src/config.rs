//! Configuration for a digest run.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The config is shared read-only by all workers
//! behind an `Arc`, and [`build_http_client`] turns it into the single
//! long-lived `reqwest::Client` that every HTTP component receives.

use crate::error::PipelineError;
use crate::prompts::SUMMARY_SYSTEM_PROMPT;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a digest run.
///
/// Built via [`PipelineConfig::builder()`]; the two filesystem roots have no
/// sensible default and must be provided.
///
/// # Example
/// ```rust
/// use rules_digest::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .pdf_root("./files/rules")
///     .image_root("./files/rules_img")
///     .workers(3)
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 30);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Directory holding one `<job id>.pdf` per job.
    pub pdf_root: PathBuf,

    /// Directory under which each job gets a `<job id>/` folder of page images.
    pub image_root: PathBuf,

    /// Converter program followed by any leading arguments. Default: `["pdftoppm"]`.
    ///
    /// Hosts that only have poppler inside WSL can use `["wsl", "pdftoppm"]`.
    pub converter: Vec<String>,

    /// Output format flag handed to the converter. Default: `-png`.
    pub image_format: String,

    /// Where the converter sees `pdf_root`, when it runs in another filesystem
    /// namespace (e.g. `/mnt/c/rules/` under WSL). None means `pdf_root` itself.
    pub converter_pdf_prefix: Option<String>,

    /// Where the converter sees `image_root`. None means `image_root` itself.
    pub converter_image_prefix: Option<String>,

    /// Base URL of the OCR service (the client posts to `{ocr_url}/ocr`).
    pub ocr_url: String,

    /// Full URL of the streaming generation endpoint.
    pub summary_url: String,

    /// Model identifier sent with every summarization request.
    pub summary_model: String,

    /// Bearer token for the summarization endpoint.
    ///
    /// Absence is reported per job as [`PipelineError::MissingCredential`]
    /// instead of at startup, so OCR work can still proceed.
    pub summary_api_key: Option<String>,

    /// `keep_alive` value sent to the generation endpoint. Default: `"0"`.
    pub keep_alive: String,

    /// Upper bound on generated tokens (`options.num_predict`). Default: 8192.
    pub num_predict: u32,

    /// Custom system instruction. If None, uses [`SUMMARY_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Number of concurrent job workers. Default: 3.
    pub workers: usize,

    /// Maximum number of pending jobs pulled per run. Default: 30.
    pub batch_size: i64,

    /// Timeout applied to every outbound HTTP call, in seconds. Default: 300.
    pub http_timeout_secs: u64,

    /// Table holding the game-detail records. Default: `game_detail`.
    pub table: String,

    /// Write a fresh OCR aggregate to the store before summarizing. Default: true.
    pub persist_ocr_eagerly: bool,

    /// Download a job's PDF from `link_to_rules` when it is missing locally. Default: false.
    pub fetch_missing_pdfs: bool,
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("pdf_root", &self.pdf_root)
            .field("image_root", &self.image_root)
            .field("converter", &self.converter)
            .field("image_format", &self.image_format)
            .field("converter_pdf_prefix", &self.converter_pdf_prefix)
            .field("converter_image_prefix", &self.converter_image_prefix)
            .field("ocr_url", &self.ocr_url)
            .field("summary_url", &self.summary_url)
            .field("summary_model", &self.summary_model)
            .field(
                "summary_api_key",
                &self.summary_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("workers", &self.workers)
            .field("batch_size", &self.batch_size)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("table", &self.table)
            .field("persist_ocr_eagerly", &self.persist_ocr_eagerly)
            .field("fetch_missing_pdfs", &self.fetch_missing_pdfs)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// The system instruction sent with every summarization request.
    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(SUMMARY_SYSTEM_PROMPT)
    }

    /// Path of the rules PDF for a job.
    pub fn pdf_path(&self, job_id: i64) -> PathBuf {
        self.pdf_root.join(format!("{job_id}.pdf"))
    }

    /// Directory receiving the page images of a job.
    pub fn image_dir(&self, job_id: i64) -> PathBuf {
        self.image_root.join(job_id.to_string())
    }

    /// The PDF path as handed to the converter.
    pub fn converter_pdf_path(&self, job_id: i64) -> OsString {
        match &self.converter_pdf_prefix {
            Some(prefix) => join_prefix(prefix, &format!("{job_id}.pdf")),
            None => self.pdf_path(job_id).into_os_string(),
        }
    }

    /// The output prefix (`<dir>/page`) as handed to the converter.
    pub fn converter_output_prefix(&self, job_id: i64) -> OsString {
        match &self.converter_image_prefix {
            Some(prefix) => join_prefix(prefix, &format!("{job_id}/page")),
            None => self.image_dir(job_id).join("page").into_os_string(),
        }
    }
}

/// Converter prefixes live in the converter's namespace, so they are joined
/// with `/` as strings rather than as host paths.
fn join_prefix(prefix: &str, rest: &str) -> OsString {
    if prefix.ends_with('/') {
        format!("{prefix}{rest}").into()
    } else {
        format!("{prefix}/{rest}").into()
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    pdf_root: Option<PathBuf>,
    image_root: Option<PathBuf>,
    converter: Vec<String>,
    image_format: String,
    converter_pdf_prefix: Option<String>,
    converter_image_prefix: Option<String>,
    ocr_url: String,
    summary_url: String,
    summary_model: String,
    summary_api_key: Option<String>,
    keep_alive: String,
    num_predict: u32,
    system_prompt: Option<String>,
    workers: usize,
    batch_size: i64,
    http_timeout_secs: u64,
    table: String,
    persist_ocr_eagerly: bool,
    fetch_missing_pdfs: bool,
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self {
            pdf_root: None,
            image_root: None,
            converter: vec!["pdftoppm".to_string()],
            image_format: "-png".to_string(),
            converter_pdf_prefix: None,
            converter_image_prefix: None,
            ocr_url: "http://localhost:8000".to_string(),
            summary_url: "https://ollama.com/api/generate".to_string(),
            summary_model: "qwen3-vl:235b".to_string(),
            summary_api_key: None,
            keep_alive: "0".to_string(),
            num_predict: 8192,
            system_prompt: None,
            workers: 3,
            batch_size: 30,
            http_timeout_secs: 300,
            table: "game_detail".to_string(),
            persist_ocr_eagerly: true,
            fetch_missing_pdfs: false,
        }
    }
}

impl PipelineConfigBuilder {
    pub fn pdf_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.pdf_root = Some(path.into());
        self
    }

    pub fn image_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_root = Some(path.into());
        self
    }

    pub fn converter<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.converter = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn image_format(mut self, flag: impl Into<String>) -> Self {
        self.image_format = flag.into();
        self
    }

    pub fn converter_pdf_prefix(mut self, prefix: Option<String>) -> Self {
        self.converter_pdf_prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    pub fn converter_image_prefix(mut self, prefix: Option<String>) -> Self {
        self.converter_image_prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    pub fn ocr_url(mut self, url: impl Into<String>) -> Self {
        self.ocr_url = url.into();
        self
    }

    pub fn summary_url(mut self, url: impl Into<String>) -> Self {
        self.summary_url = url.into();
        self
    }

    pub fn summary_model(mut self, model: impl Into<String>) -> Self {
        self.summary_model = model.into();
        self
    }

    pub fn summary_api_key(mut self, key: Option<String>) -> Self {
        self.summary_api_key = key.filter(|k| !k.is_empty());
        self
    }

    pub fn keep_alive(mut self, v: impl Into<String>) -> Self {
        self.keep_alive = v.into();
        self
    }

    pub fn num_predict(mut self, n: u32) -> Self {
        self.num_predict = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn batch_size(mut self, n: i64) -> Self {
        self.batch_size = n;
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.http_timeout_secs = secs;
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn persist_ocr_eagerly(mut self, v: bool) -> Self {
        self.persist_ocr_eagerly = v;
        self
    }

    pub fn fetch_missing_pdfs(mut self, v: bool) -> Self {
        self.fetch_missing_pdfs = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let pdf_root = self.pdf_root.ok_or(PipelineError::MissingConfig {
            name: "pdf_root",
            flag: "pdf-root",
            env: "RULES_PDF_PATH",
        })?;
        let image_root = self.image_root.ok_or(PipelineError::MissingConfig {
            name: "image_root",
            flag: "image-root",
            env: "RULES_IMG_PATH",
        })?;

        if self.workers == 0 {
            return Err(PipelineError::InvalidConfig("workers must be ≥ 1".into()));
        }
        if self.batch_size < 1 {
            return Err(PipelineError::InvalidConfig(format!(
                "batch size must be ≥ 1, got {}",
                self.batch_size
            )));
        }
        if self.converter.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(PipelineError::InvalidConfig(
                "converter command must name a program".into(),
            ));
        }
        if !is_sql_identifier(&self.table) {
            return Err(PipelineError::InvalidConfig(format!(
                "table name '{}' is not a plain SQL identifier",
                self.table
            )));
        }

        Ok(PipelineConfig {
            pdf_root,
            image_root,
            converter: self.converter,
            image_format: self.image_format,
            converter_pdf_prefix: self.converter_pdf_prefix,
            converter_image_prefix: self.converter_image_prefix,
            ocr_url: self.ocr_url.trim_end_matches('/').to_string(),
            summary_url: self.summary_url,
            summary_model: self.summary_model,
            summary_api_key: self.summary_api_key,
            keep_alive: self.keep_alive,
            num_predict: self.num_predict,
            system_prompt: self.system_prompt,
            workers: self.workers,
            batch_size: self.batch_size,
            http_timeout_secs: self.http_timeout_secs,
            table: self.table,
            persist_ocr_eagerly: self.persist_ocr_eagerly,
            fetch_missing_pdfs: self.fetch_missing_pdfs,
        })
    }
}

static RE_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap());

/// The table name is interpolated into SQL, so only `name` or `schema.name` is accepted.
fn is_sql_identifier(s: &str) -> bool {
    RE_IDENTIFIER.is_match(s)
}

/// Build the process-wide HTTP client.
///
/// Constructed once at startup and cloned into every component; `reqwest`
/// clients share their connection pool across clones.
pub fn build_http_client(config: &PipelineConfig) -> Result<reqwest::Client, PipelineError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .map_err(|e| PipelineError::InvalidConfig(format!("cannot build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> PipelineConfigBuilder {
        PipelineConfig::builder().pdf_root("/pdf").image_root("/img")
    }

    #[test]
    fn defaults() {
        let c = base().build().unwrap();
        assert_eq!(c.workers, 3);
        assert_eq!(c.batch_size, 30);
        assert_eq!(c.converter, vec!["pdftoppm"]);
        assert_eq!(c.image_format, "-png");
        assert_eq!(c.keep_alive, "0");
        assert_eq!(c.num_predict, 8192);
        assert!(c.persist_ocr_eagerly);
        assert_eq!(c.system_prompt(), SUMMARY_SYSTEM_PROMPT);
    }

    #[test]
    fn missing_roots_are_config_errors() {
        let err = PipelineConfig::builder().image_root("/img").build().unwrap_err();
        assert!(matches!(err, PipelineError::MissingConfig { name: "pdf_root", .. }));

        let err = PipelineConfig::builder().pdf_root("/pdf").build().unwrap_err();
        assert!(matches!(err, PipelineError::MissingConfig { name: "image_root", .. }));
    }

    #[test]
    fn rejects_zero_workers_and_batch() {
        assert!(base().workers(0).build().is_err());
        assert!(base().batch_size(0).build().is_err());
    }

    #[test]
    fn rejects_empty_converter() {
        assert!(base().converter(Vec::<String>::new()).build().is_err());
        assert!(base().converter([" "]).build().is_err());
    }

    #[test]
    fn table_name_must_be_identifier() {
        assert!(base().table("public.game_detail").build().is_ok());
        assert!(base().table("game_detail; DROP TABLE x").build().is_err());
        assert!(base().table("").build().is_err());
    }

    #[test]
    fn paths_are_keyed_by_job_id() {
        let c = base().build().unwrap();
        assert_eq!(c.pdf_path(42), PathBuf::from("/pdf/42.pdf"));
        assert_eq!(c.image_dir(42), PathBuf::from("/img/42"));
    }

    #[test]
    fn converter_paths_default_to_host_roots() {
        let c = base().build().unwrap();
        assert_eq!(c.converter_pdf_path(42), OsString::from("/pdf/42.pdf"));
        assert_eq!(c.converter_output_prefix(42), OsString::from("/img/42/page"));
    }

    #[test]
    fn converter_prefixes_replace_host_roots() {
        let c = base()
            .converter_pdf_prefix(Some("/mnt/c/files/rules/".into()))
            .converter_image_prefix(Some("/mnt/c/files/rules_img".into()))
            .build()
            .unwrap();
        assert_eq!(c.converter_pdf_path(42), OsString::from("/mnt/c/files/rules/42.pdf"));
        assert_eq!(
            c.converter_output_prefix(42),
            OsString::from("/mnt/c/files/rules_img/42/page")
        );
        // Host-side paths are untouched.
        assert_eq!(c.image_dir(42), PathBuf::from("/img/42"));
    }

    #[test]
    fn empty_converter_prefix_is_none() {
        let c = base().converter_pdf_prefix(Some(String::new())).build().unwrap();
        assert!(c.converter_pdf_prefix.is_none());
    }

    #[test]
    fn empty_api_key_is_none() {
        let c = base().summary_api_key(Some(String::new())).build().unwrap();
        assert!(c.summary_api_key.is_none());
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = base().summary_api_key(Some("secret".into())).build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn ocr_url_trailing_slash_trimmed() {
        let c = base().ocr_url("http://ocr:8000/").build().unwrap();
        assert_eq!(c.ocr_url, "http://ocr:8000");
    }
}
