//! The game-detail record and its processing state machine.
//!
//! The store only knows two statuses, `pending` and `finished`. The pipeline
//! derives a finer [`JobStage`] from what the record already holds so that a
//! job whose OCR text survived a previous run resumes at summarization
//! instead of paying for extraction and OCR again.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Persisted status of a game-detail record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Finished,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "finished" => Ok(JobStatus::Finished),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// One game-detail record moving through extract → OCR → summarize → persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub link_to_rules: String,
    pub link_to_illustration: String,
    pub editor: String,
    pub status: JobStatus,
    /// Serialised OCR aggregate. Immutable once non-empty.
    pub ocr_result: Option<String>,
    /// Summary of the rules.
    pub resume: Option<String>,
}

impl Job {
    /// A fresh pending job with only an identifier and a name.
    pub fn pending(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            link_to_rules: String::new(),
            link_to_illustration: String::new(),
            editor: String::new(),
            status: JobStatus::Pending,
            ocr_result: None,
            resume: None,
        }
    }

    /// The OCR text, when a previous stage (or run) produced some.
    pub fn ocr_text(&self) -> Option<&str> {
        self.ocr_result.as_deref().filter(|s| !s.is_empty())
    }

    /// Where this job currently sits in the pipeline.
    pub fn stage(&self) -> JobStage {
        if self.status == JobStatus::Finished {
            JobStage::Finished
        } else if self.ocr_text().is_none() {
            JobStage::NeedsOcr
        } else {
            JobStage::NeedsSummary
        }
    }

    /// `NeedsOcr → NeedsSummary`: attach a freshly computed OCR aggregate.
    pub fn record_ocr(&mut self, aggregate: String) -> Result<(), PipelineError> {
        self.stage().check(self.id, JobStage::NeedsSummary)?;
        if aggregate.is_empty() {
            return Err(PipelineError::Internal(format!(
                "job {}: refusing to record an empty OCR aggregate",
                self.id
            )));
        }
        self.ocr_result = Some(aggregate);
        Ok(())
    }

    /// `NeedsSummary → Finished`: attach the summary and close the job.
    pub fn finish(&mut self, summary: String) -> Result<(), PipelineError> {
        self.stage().check(self.id, JobStage::Finished)?;
        self.resume = Some(summary);
        self.status = JobStatus::Finished;
        Ok(())
    }
}

/// Pipeline position of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    /// No OCR text yet: extraction and OCR fan-out are needed.
    NeedsOcr,
    /// OCR text present, summary missing.
    NeedsSummary,
    /// Terminal. Never revisited.
    Finished,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::NeedsOcr => "needs_ocr",
            JobStage::NeedsSummary => "needs_summary",
            JobStage::Finished => "finished",
        }
    }

    /// Whether `self → to` is one of the two legal transitions.
    pub fn can_advance_to(&self, to: JobStage) -> bool {
        matches!(
            (self, to),
            (JobStage::NeedsOcr, JobStage::NeedsSummary)
                | (JobStage::NeedsSummary, JobStage::Finished)
        )
    }

    fn check(&self, job_id: i64, to: JobStage) -> Result<(), PipelineError> {
        if self.can_advance_to(to) {
            Ok(())
        } else {
            Err(PipelineError::IllegalTransition {
                job_id,
                from: self.as_str(),
                to: to.as_str(),
            })
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_db_strings() {
        assert_eq!("pending".parse::<JobStatus>().unwrap(), JobStatus::Pending);
        assert_eq!("finished".parse::<JobStatus>().unwrap(), JobStatus::Finished);
        assert!("done".parse::<JobStatus>().is_err());
        assert_eq!(JobStatus::Finished.to_string(), "finished");
    }

    #[test]
    fn stage_is_derived_from_record() {
        let mut job = Job::pending(1, "Azul");
        assert_eq!(job.stage(), JobStage::NeedsOcr);

        job.ocr_result = Some(String::new());
        assert_eq!(job.stage(), JobStage::NeedsOcr, "empty OCR text counts as missing");

        job.ocr_result = Some("[]".into());
        assert_eq!(job.stage(), JobStage::NeedsSummary);

        job.status = JobStatus::Finished;
        assert_eq!(job.stage(), JobStage::Finished);
    }

    #[test]
    fn legal_path_reaches_finished() {
        let mut job = Job::pending(1, "Azul");
        job.record_ocr("[{\"page\":1}]".into()).unwrap();
        job.finish("Summary".into()).unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.resume.as_deref(), Some("Summary"));
    }

    #[test]
    fn finishing_without_ocr_is_rejected() {
        let mut job = Job::pending(3, "Azul");
        let err = job.finish("Summary".into()).unwrap_err();
        assert!(matches!(err, PipelineError::IllegalTransition { job_id: 3, .. }));
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.resume.is_none());
    }

    #[test]
    fn ocr_is_immutable_once_present() {
        let mut job = Job::pending(4, "Azul");
        job.record_ocr("first".into()).unwrap();
        assert!(job.record_ocr("second".into()).is_err());
        assert_eq!(job.ocr_text(), Some("first"));
    }

    #[test]
    fn finished_is_terminal() {
        let mut job = Job::pending(5, "Azul");
        job.record_ocr("ocr".into()).unwrap();
        job.finish("a".into()).unwrap();
        assert!(job.finish("b".into()).is_err());
        assert!(!JobStage::Finished.can_advance_to(JobStage::NeedsOcr));
        assert!(!JobStage::NeedsOcr.can_advance_to(JobStage::Finished));
    }
}
