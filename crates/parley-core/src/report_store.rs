//! Report persistence
//!
//! Reports are stored as pretty JSON, one file per job:
//! `<dir>/<job_id>.json`.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::report::AggregatedReport;

/// File-backed report store
#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    /// Store rooted at `dir` (created on first save)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Report directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a report, replacing any earlier one for the same job
    pub fn save(&self, report: &AggregatedReport) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(report.job_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(report)?)?;
        std::fs::rename(&tmp, &path)?;

        debug!(job_id = %report.job_id, path = %path.display(), "Saved report");
        Ok(path)
    }

    /// Load the report for a job
    pub fn load(&self, job_id: Uuid) -> Result<AggregatedReport> {
        let content = match std::fs::read_to_string(self.path_for(job_id)) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ReportNotFound(job_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// All readable reports, oldest first
    pub fn list(&self) -> Result<Vec<AggregatedReport>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reports = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|content| serde_json::from_str::<AggregatedReport>(&content).map_err(Error::from));
            match parsed {
                Ok(report) => reports.push(report),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable report"),
            }
        }
        reports.sort_by(|a, b| {
            a.generated_at
                .cmp(&b.generated_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(reports)
    }

    fn path_for(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", job_id))
    }
}
