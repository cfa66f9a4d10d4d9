//! CLI command: `parley ask`

use anyhow::bail;
use clap::Args;
use parley_core::JobRequest;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::render;
use crate::settings::AppSettings;

/// Arguments for `parley ask`
#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question
    pub prompt: String,
    /// Target service (repeatable); all configured services when omitted
    #[arg(short, long = "service")]
    pub services: Vec<String>,
    /// Answer with the local model only
    #[arg(long)]
    pub confidential: bool,
    /// Per-service response timeout, in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Retries per service
    #[arg(long)]
    pub retries: Option<u32>,
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskArgs {
    fn request(self) -> JobRequest {
        let mut request = JobRequest::new(self.prompt, self.services);
        if self.confidential {
            request = request.confidential();
        }
        if let Some(secs) = self.timeout {
            request = request.with_timeout(Duration::from_secs(secs));
        }
        if let Some(retries) = self.retries {
            request = request.with_max_retries(retries);
        }
        request
    }
}

/// Run the ask subcommand.
pub async fn run(settings: &AppSettings, args: AskArgs) -> anyhow::Result<()> {
    if !args.confidential && settings.engine.services.is_empty() {
        bail!("No services configured. Add [[services]] tables to config/local.toml.");
    }
    if args.confidential && !settings.local.enabled {
        bail!("Confidential prompts need the [local] model endpoint enabled.");
    }

    let manager = super::build_manager(settings)?;
    let json = args.json;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling job");
                cancel.cancel();
            }
        })
    };

    let report = manager.submit_job_with_cancel(args.request(), cancel).await;
    interrupt.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        render::print_report(&report);
    }
    Ok(())
}
