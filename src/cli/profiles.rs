//! CLI command: `parley profiles`

use clap::Subcommand;
use parley_core::{LockState, ProfileStore};

use crate::settings::AppSettings;

/// Profile subcommands
#[derive(Subcommand, Debug, Default)]
pub enum ProfilesCommand {
    /// List registered profiles
    #[default]
    List,
    /// Register (or update) a profile
    Add {
        /// Service id
        service: String,
        /// Credential reference, defaults to the descriptor's
        #[arg(long)]
        credentials: Option<String>,
    },
}

/// Run the profiles subcommand.
pub fn run(settings: &AppSettings, command: ProfilesCommand) -> anyhow::Result<()> {
    let store = ProfileStore::new(&settings.engine.profiles);

    match command {
        ProfilesCommand::List => {
            let profiles = store.list()?;
            println!();
            println!("  Profiles in {}", store.root().display());
            println!("  {}", "-".repeat(72));
            if profiles.is_empty() {
                println!("  (none registered)");
            }
            for profile in profiles {
                let lock = match &profile.lock_state {
                    LockState::Unlocked => "free".to_string(),
                    LockState::Held { owner } => format!("held by pid {}", owner.pid),
                    LockState::Pending => "lock being written".to_string(),
                    LockState::Stale { .. } => "stale lock".to_string(),
                };
                println!(
                    "  {:<16} creds={:<12} validated={:<22} {}",
                    profile.service_id,
                    profile.credentials_ref.as_deref().unwrap_or("-"),
                    profile
                        .last_validated_at
                        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                        .unwrap_or_else(|| "never".to_string()),
                    lock
                );
            }
            println!();
        }
        ProfilesCommand::Add {
            service,
            credentials,
        } => {
            let reference = credentials.or_else(|| {
                settings
                    .engine
                    .service(&service)
                    .and_then(|d| d.credentials_ref.clone())
            });
            let profile = store.register(&service, reference.as_deref())?;
            println!(
                "Registered profile '{}' at {}",
                profile.service_id,
                profile.profile_dir.display()
            );
            if settings.engine.service(&service).is_none() {
                println!("Note: no [[services]] entry with id '{}' is configured yet.", service);
            }
        }
    }
    Ok(())
}
