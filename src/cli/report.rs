//! CLI command: `parley report`

use anyhow::{bail, Context};
use parley_core::ReportStore;
use uuid::Uuid;

use super::render;
use crate::settings::AppSettings;

/// Run the report subcommand.
pub fn run(settings: &AppSettings, job_id: Option<&str>, list: bool, json: bool) -> anyhow::Result<()> {
    let store = ReportStore::new(settings.engine.reports.dir.clone());

    if list || job_id.is_none() {
        let reports = store.list()?;
        if reports.is_empty() {
            println!("No reports in {}", store.dir().display());
            return Ok(());
        }
        for report in reports {
            println!(
                "{}  {}  answered={}/{}{}",
                report.job_id,
                report.generated_at.format("%Y-%m-%d %H:%M:%S"),
                report.answered(),
                report.per_service_responses.len(),
                if report.confidential { "  confidential" } else { "" }
            );
        }
        return Ok(());
    }

    let Some(raw) = job_id else {
        bail!("A job id is required");
    };
    let job_id = Uuid::parse_str(raw).with_context(|| format!("'{}' is not a job id", raw))?;
    let report = store.load(job_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        render::print_report(&report);
    }
    Ok(())
}
