//! CLI commands: `parley status` and `parley watch`
//!
//! `status` prints readiness per configured service; with `--check` every
//! service is validated first (re-authenticating where needed). `watch`
//! runs the health loop until Ctrl-C.

use anyhow::bail;
use chrono::{DateTime, Utc};
use parley_core::{RelayLauncher, ServiceState, ServiceStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::render;
use crate::settings::AppSettings;

/// Run the status subcommand.
pub async fn run(settings: &AppSettings, check: bool, json: bool) -> anyhow::Result<()> {
    let manager = super::build_manager(settings)?;
    if check {
        let relay = RelayLauncher::new(&settings.engine.relay)?;
        if !relay.is_available().await {
            warn!(url = %settings.engine.relay.url, "Browser relay is not reachable");
            eprintln!(
                "Browser relay at {} is not reachable; every service will report unavailable.",
                settings.engine.relay.url
            );
        }
        manager.check_all().await;
    }
    let statuses = manager.get_service_status().await;

    if json {
        let services: BTreeMap<&String, serde_json::Value> = statuses
            .iter()
            .map(|(id, status)| {
                (
                    id,
                    serde_json::json!({
                        "ready": status.is_ready(),
                        "state": status.state,
                        "last_validated_at": status.last_validated_at.map(|t| t.to_rfc3339()),
                        "last_error": status.last_error,
                    }),
                )
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&services)?);
    } else {
        print_table(&statuses);
    }
    Ok(())
}

/// Run the health loop until interrupted.
pub async fn watch(settings: &AppSettings) -> anyhow::Result<()> {
    if !settings.engine.health.enabled {
        bail!("Health checks are disabled ([health] enabled = false).");
    }
    let manager = Arc::new(super::build_manager(settings)?);
    let handle = manager.clone().spawn_health_loop();

    tokio::signal::ctrl_c().await?;
    info!("Stopping health loop");
    manager.cancel();
    handle.await?;

    print_table(&manager.get_service_status().await);
    Ok(())
}

fn print_table(statuses: &BTreeMap<String, ServiceStatus>) {
    println!();
    println!("  Services");
    println!("  {}", "-".repeat(72));
    println!("  {:<16} {:<13} {:<22} Last Error", "Service", "State", "Last Validated");
    println!("  {}", "-".repeat(72));

    if statuses.is_empty() {
        println!("  (no services configured)");
    }
    for (id, status) in statuses {
        println!(
            "  {:<16} {:<13} {:<22} {}",
            id,
            state_label(status.state),
            format_time(status.last_validated_at),
            status
                .last_error
                .as_deref()
                .map(|e| render::truncate(e, 40))
                .unwrap_or_default()
        );
    }
    println!();
}

fn state_label(state: ServiceState) -> &'static str {
    match state {
        ServiceState::Unknown => "unknown",
        ServiceState::Checking => "checking",
        ServiceState::Ready => "ready",
        ServiceState::Unavailable => "unavailable",
    }
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}
