//! Liquid CLI - command-line access to a sled-backed delegation graph

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use liquid_core::{Collaborators, CreateOptions, CreateRequest, DelegationEngine, EngineConfig};
use liquid_store::{DelegationId, DelegationMode, Scope, SledStore, UserId};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "liquid")]
#[command(about = "Liquid delegation - resolve, create and audit delegation chains")]
struct Cli {
    /// Database directory
    #[arg(long, global = true, default_value = "liquid.db")]
    db: PathBuf,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Record that a user has cast a final decision on a scope
    Decide { user: String, scope: Scope },
    /// Delegate a user's weight to another user
    Delegate {
        from: String,
        to: String,
        /// legacy | flexible | hybrid
        #[arg(short, long, default_value = "flexible")]
        mode: DelegationMode,
        /// global or <kind>:<id>
        #[arg(short, long, default_value = "global")]
        scope: Scope,
        /// RFC 3339 start (defaults to now)
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// RFC 3339 end
        #[arg(long)]
        end: Option<DateTime<Utc>>,
        /// RFC 3339 legacy term end
        #[arg(long)]
        term: Option<DateTime<Utc>>,
        #[arg(long)]
        anonymous: bool,
    },
    /// Revoke a delegation by id
    Revoke { id: DelegationId },
    /// Show who finally decides for a user
    Resolve {
        user: String,
        #[arg(short, long, default_value = "global")]
        scope: Scope,
        /// Print the full chain
        #[arg(long)]
        trace: bool,
    },
    /// Share of active delegations pointing at a user
    Concentration {
        user: String,
        #[arg(short, long)]
        scope: Option<Scope>,
    },
    /// Would one more delegation make this user a super-delegate?
    Risk {
        user: String,
        #[arg(short, long)]
        scope: Option<Scope>,
    },
    /// Fault-tolerant overview of a user's delegations
    Summary {
        user: String,
        #[arg(long)]
        trace_id: Option<String>,
    },
    /// Effective voting weight for a set of voters
    Tally {
        scope: Scope,
        #[arg(required = true)]
        voters: Vec<String>,
    },
    /// Describe the delegation modes
    Modes,
    /// Validate and print the effective configuration
    CheckConfig,
}

#[derive(Subcommand)]
enum UserAction {
    /// Register users
    Add {
        #[arg(required = true)]
        users: Vec<String>,
    },
    /// Soft-delete a user
    Remove { user: String },
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_ref())?;

    if let Commands::CheckConfig = cli.command {
        config.validate()?;
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let store = Arc::new(
        SledStore::open(&cli.db).with_context(|| format!("opening {}", cli.db.display()))?,
    );
    debug!(db = %cli.db.display(), "database opened");

    let engine = DelegationEngine::new(
        config,
        Collaborators::new(store.clone(), store.clone(), store.clone()),
    )?;

    match cli.command {
        Commands::User { action } => match action {
            UserAction::Add { users } => {
                for user in users {
                    store.register_user(&UserId::new(user.as_str()))?;
                    println!("registered {user}");
                }
            }
            UserAction::Remove { user } => {
                if store.soft_delete_user(&UserId::new(user.as_str()))? {
                    println!("removed {user}");
                } else {
                    anyhow::bail!("unknown user {user}");
                }
            }
        },
        Commands::Decide { user, scope } => {
            store.record_decision(&UserId::new(user.as_str()), &scope)?;
            println!("{user} decided on {scope}");
        }
        Commands::Delegate {
            from,
            to,
            mode,
            scope,
            start,
            end,
            term,
            anonymous,
        } => {
            let options = CreateOptions {
                start_date: start,
                end_date: end,
                legacy_term_ends_at: term,
                is_anonymous: anonymous,
            };
            let created = engine
                .create(CreateRequest::new(from, to, mode, scope).with_options(options))
                .await?;
            print_json(&created)?;
        }
        Commands::Revoke { id } => {
            let outcome = engine.revoke(&id).await?;
            print_json(&outcome)?;
        }
        Commands::Resolve { user, scope, trace } => {
            let resolution = engine.resolve_with_trace(&UserId::new(user), &scope).await;
            if trace {
                print_json(&resolution)?;
            } else {
                println!("{}", resolution.delegatee);
            }
        }
        Commands::Concentration { user, scope } => {
            let report = engine
                .concentration(&UserId::new(user), scope.as_ref())
                .await?;
            print_json(&report)?;
        }
        Commands::Risk { user, scope } => {
            let report = engine
                .super_delegate_risk(&UserId::new(user), scope.as_ref())
                .await?;
            print_json(&report)?;
        }
        Commands::Summary { user, trace_id } => {
            let summary = engine.safe_summary(&UserId::new(user), trace_id).await;
            print_json(&summary)?;
        }
        Commands::Tally { scope, voters } => {
            let voters: Vec<UserId> = voters.into_iter().map(UserId::from).collect();
            let tally = engine.tally(&voters, &scope).await;
            print_json(&tally)?;
        }
        Commands::Modes => {
            print_json(&engine.modes().all())?;
        }
        Commands::CheckConfig => {}
    }

    store.flush()?;
    Ok(())
}
