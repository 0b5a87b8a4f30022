//! CLI entry point for Quire.
//!
//! The `quire` binary opens the membership, role, profile and event stores
//! described by the settings file and runs one administrative command
//! against them.

mod cli;
mod config;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use quire_providers::{EventStore, MembershipStore, NewUser, ProfileStore, RoleStore};
use quire_store::Manager;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, RoleAction, UserAction};
use crate::config::CliConfig;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(if cli.verbose { "debug" } else { "info" });

    let config = CliConfig::load(cli.config.as_deref())?;
    let manager = config.manager()?;
    std::fs::create_dir_all(manager.home())
        .with_context(|| format!("failed to create {}", manager.home().display()))?;

    match cli.command {
        Commands::Init => cmd_init(&manager, &config).await,
        Commands::Stats => cmd_stats(&manager, &config).await,
        Commands::Users { action } => cmd_users(&manager, &config, action).await,
        Commands::Roles { action } => cmd_roles(&manager, &config, action).await,
        Commands::Events { minutes } => cmd_events(&manager, &config, minutes).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_init(manager: &Manager, config: &CliConfig) -> Result<()> {
    let members = open_membership(manager, config)?;
    let roles = open_roles(manager, config)?;
    let profiles = ProfileStore::open(manager, &config.files.profiles)
        .context("failed to open profile store")?;
    let events = EventStore::open(manager, &config.files.events).context("failed to open event store")?;

    for path in [
        &config.files.membership,
        &config.files.roles,
        &config.files.profiles,
        &config.files.events,
    ] {
        println!("  {}", manager.resolve(path).display());
    }

    members.close().await?;
    roles.close().await?;
    profiles.close().await?;
    events.shutdown().await?;
    info!(home = %manager.home().display(), "stores initialized");
    Ok(())
}

async fn cmd_stats(manager: &Manager, config: &CliConfig) -> Result<()> {
    let members = open_membership(manager, config)?;
    let roles = open_roles(manager, config)?;

    let users = members.number_of_users().await?;
    let online = members.number_of_users_online(Utc::now() - Duration::minutes(15)).await?;
    let all_roles = roles.get_all_roles().await?;

    println!();
    println!("  Quire v{}", env!("CARGO_PKG_VERSION"));
    println!("  Manager:            {} ({})", manager.name(), manager.home().display());
    println!("  Users:              {users} ({online} active in the last 15 minutes)");
    println!("  Roles:              {}", all_roles.len());
    println!("  Registered queries: {}", manager.registry().len());
    println!("  Membership cache:   {}", members.container().cache_stats());
    println!("  Role cache:         {}", roles.container().cache_stats());
    println!();
    Ok(())
}

async fn cmd_users(manager: &Manager, config: &CliConfig, action: UserAction) -> Result<()> {
    let members = open_membership(manager, config)?;
    match action {
        UserAction::List {
            pattern,
            page,
            size,
        } => {
            let found = match pattern {
                Some(p) => members.get_users_by_name(&p, page, size).await?,
                None => members.get_all_users(page, size).await?,
            };
            for user in &found.users {
                let email = user.email.as_deref().unwrap_or("-");
                let state = if user.is_locked_out { "locked" } else if user.is_approved { "active" } else { "pending" };
                println!("  {:<24} {:<32} {state}", user.username, email);
            }
            println!("  ({} of {} users)", found.users.len(), found.total_records);
        }
        UserAction::Create {
            username,
            password,
            email,
        } => {
            let user = members
                .create_user(NewUser {
                    username,
                    password,
                    email,
                    is_approved: true,
                    ..NewUser::default()
                })
                .await?;
            println!("  created {} ({})", user.username, user.user_key);
        }
        UserAction::Delete { username } => {
            if members.delete_user(&username).await? {
                let profiles = ProfileStore::open(manager, &config.files.profiles)?;
                profiles.delete_profiles(&[username.as_str()]).await?;
                profiles.close().await?;
                println!("  deleted {username}");
            } else {
                println!("  no such user: {username}");
            }
        }
        UserAction::Unlock { username } => {
            if members.unlock_user(&username).await? {
                println!("  unlocked {username}");
            } else {
                println!("  no such user: {username}");
            }
        }
    }
    members.close().await?;
    Ok(())
}

async fn cmd_roles(manager: &Manager, config: &CliConfig, action: RoleAction) -> Result<()> {
    let roles = open_roles(manager, config)?;
    match action {
        RoleAction::List => {
            for role in roles.get_all_roles().await? {
                let users = roles.get_users_in_role(&role).await?;
                println!("  {role:<24} {}", users.join(", "));
            }
        }
        RoleAction::Create { role } => {
            roles.create_role(&role).await?;
            println!("  created role {role}");
        }
        RoleAction::Add { username, role } => {
            roles.add_users_to_roles(&[username.as_str()], &[role.as_str()]).await?;
            println!("  added {username} to {role}");
        }
        RoleAction::Remove { username, role } => {
            roles
                .remove_users_from_roles(&[username.as_str()], &[role.as_str()])
                .await?;
            println!("  removed {username} from {role}");
        }
    }
    roles.close().await?;
    Ok(())
}

async fn cmd_events(manager: &Manager, config: &CliConfig, minutes: i64) -> Result<()> {
    let events = EventStore::open(manager, &config.files.events).context("failed to open event store")?;
    let since = Utc::now() - Duration::minutes(minutes);
    for event in events.events_since(since).await? {
        println!(
            "  {} {:<20} {:>5} {}",
            event.occurred_at.format("%Y-%m-%d %H:%M:%S"),
            event.type_name,
            event.code,
            event.message
        );
    }
    events.shutdown().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open_membership(manager: &Manager, config: &CliConfig) -> Result<MembershipStore> {
    MembershipStore::open(manager, &config.files.membership, config.membership.clone())
        .context("failed to open membership store")
}

fn open_roles(manager: &Manager, config: &CliConfig) -> Result<RoleStore> {
    RoleStore::open(manager, &config.files.roles, &config.membership.application_name)
        .context("failed to open role store")
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
