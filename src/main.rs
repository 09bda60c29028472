//! Committee configuration registry (v1)
//!
//! Operator tool for a two-slot, content-addressed committee config registry.
//!
//! # Architecture Overview
//!
//! ```text
//!   propose / promote / revoke                     watch
//!            │                                       │
//!            ▼                                       ▼
//!   ┌─────────────────┐    transitions     ┌──────────────────┐
//!   │   ConfigStore   │◀──── reads ────────│   ConfigReader   │
//!   │ (memory | evm)  │                    │ poll + snapshots │
//!   └────────┬────────┘                    └────────┬─────────┘
//!            │ validates + hashes via               │ ConfigChange
//!            ▼                                      ▼
//!   ┌─────────────────┐                     structured logs
//!   │ ConfigRegistry  │
//!   │ (pure rules)    │    config · observability · lifecycle
//!   └─────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use committee_registry::config::{load_config, AppConfig};
use committee_registry::lifecycle::signals::wait_for_termination;
use committee_registry::lifecycle::startup::{
    build_store, require_durable_store, start_reader, Access,
};
use committee_registry::observability::{logging, metrics};
use committee_registry::registry::codec::config_digest;
use committee_registry::registry::{
    ConfigDigest, DomainId, DomainSpec, DynamicConfig, SlotState, StaticConfig,
};
use committee_registry::store::ConfigStore;

#[derive(Parser)]
#[command(name = "committee-registry")]
#[command(about = "Manage and observe committee configuration registries", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "registry.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll all configured domains and log config changes until interrupted
    Watch,
    /// Print a domain's active and candidate configs as JSON
    Show {
        #[arg(short, long)]
        domain: String,
    },
    /// Compute the digest a domain would assign to a proposal
    Digest {
        #[arg(short, long)]
        domain: String,
        #[arg(long)]
        version: u32,
        /// JSON file with `static_config` and `dynamic_config`
        #[arg(short, long)]
        proposal: PathBuf,
    },
    /// Stage a proposal as the candidate
    Propose {
        #[arg(short, long)]
        domain: String,
        #[arg(short, long)]
        proposal: PathBuf,
        /// Candidate digest being replaced (zero when the slot is empty)
        #[arg(long, default_value_t = ConfigDigest::ZERO)]
        expected: ConfigDigest,
    },
    /// Promote the candidate and revoke the current active
    Promote {
        #[arg(short, long)]
        domain: String,
        #[arg(long)]
        candidate: ConfigDigest,
        /// Current active digest (zero when the slot is empty)
        #[arg(long, default_value_t = ConfigDigest::ZERO)]
        active: ConfigDigest,
    },
    /// Clear the candidate slot
    Revoke {
        #[arg(short, long)]
        domain: String,
        #[arg(long)]
        digest: ConfigDigest,
    },
}

/// Proposal file contents.
#[derive(Deserialize)]
struct Proposal {
    static_config: StaticConfig,
    dynamic_config: DynamicConfig,
}

fn read_proposal(path: &Path) -> Result<Proposal, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn domain_spec(config: &AppConfig, name: &str) -> Result<DomainSpec, Box<dyn std::error::Error>> {
    let domain = config
        .domains
        .iter()
        .find(|d| d.name == name)
        .ok_or_else(|| format!("domain '{}' is not configured", name))?;
    Ok(domain.to_spec(config.reader.retained_history)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init_logging(&config.observability);
    tracing::info!(
        config = %cli.config.display(),
        backend = ?config.store.backend,
        domains = config.domains.len(),
        "committee-registry v0.1.0 starting"
    );

    if !matches!(cli.command, Commands::Digest { .. }) {
        require_durable_store(&config)?;
    }

    match cli.command {
        Commands::Watch => watch(&config).await?,
        Commands::Show { domain } => {
            let store = build_store(&config, Access::ReadOnly).await?;
            show(store.as_ref(), &DomainId::from(domain)).await?;
        }
        Commands::Digest {
            domain,
            version,
            proposal,
        } => {
            let spec = domain_spec(&config, &domain)?;
            let proposal = read_proposal(&proposal)?;
            let digest = config_digest(
                &spec,
                version,
                &proposal.static_config,
                &proposal.dynamic_config,
            );
            println!("{}", digest);
        }
        Commands::Propose {
            domain,
            proposal,
            expected,
        } => {
            let proposal = read_proposal(&proposal)?;
            let store = build_store(&config, Access::ReadWrite).await?;
            let digest = store
                .set_candidate(
                    &DomainId::from(domain),
                    proposal.static_config,
                    proposal.dynamic_config,
                    expected,
                )
                .await?;
            println!("{}", digest);
        }
        Commands::Promote {
            domain,
            candidate,
            active,
        } => {
            let store = build_store(&config, Access::ReadWrite).await?;
            store
                .promote_candidate_and_revoke_active(&DomainId::from(domain), candidate, active)
                .await?;
        }
        Commands::Revoke { domain, digest } => {
            let store = build_store(&config, Access::ReadWrite).await?;
            store.revoke_candidate(&DomainId::from(domain), digest).await?;
        }
    }

    Ok(())
}

async fn show(store: &dyn ConfigStore, domain: &DomainId) -> Result<(), Box<dyn std::error::Error>> {
    let (active, candidate) = store.get_all_configs(domain).await?;
    let slot_state = SlotState::from_digests(
        active.as_ref().map(|c| c.digest).unwrap_or_default(),
        candidate.as_ref().map(|c| c.digest).unwrap_or_default(),
    );
    let output = serde_json::json!({
        "domain": domain,
        "slot_state": slot_state.to_string(),
        "active": active,
        "candidate": candidate,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn watch(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let store: Arc<dyn ConfigStore> = build_store(config, Access::ReadOnly).await?;
    let reader = start_reader(config, store).await?;
    let mut changes = reader.subscribe_changes();

    let termination = wait_for_termination();
    tokio::pin!(termination);

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => tracing::info!(change = %serde_json::to_string(&change)?, "Config change"),
                Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "Change stream lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = &mut termination => break,
        }
    }

    reader.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
