//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Quire: document stores with prepared queries.
#[derive(Parser)]
#[command(
    name = "quire",
    version,
    about = "Administer Quire membership, role, profile and event stores"
)]
pub struct Cli {
    /// Settings file. Falls back to `quire.toml` in the working directory.
    #[arg(long, short, global = true, env = "QUIRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the store containers if they do not exist.
    Init,

    /// Show document counts and prepared query statistics.
    Stats,

    /// Manage user accounts.
    Users {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage roles.
    Roles {
        #[command(subcommand)]
        action: RoleAction,
    },

    /// Show recent web events.
    Events {
        /// How many minutes back to look.
        #[arg(long, short, default_value_t = 60)]
        minutes: i64,
    },
}

#[derive(Subcommand)]
pub enum UserAction {
    /// List users, optionally filtered by a LIKE pattern.
    List {
        #[arg(long, short)]
        pattern: Option<String>,
        /// One-based page number.
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 20)]
        size: i64,
    },
    /// Create a new user.
    Create {
        username: String,
        #[arg(long, short)]
        password: String,
        #[arg(long, short)]
        email: Option<String>,
    },
    /// Delete a user and their profile.
    Delete { username: String },
    /// Clear a lockout.
    Unlock { username: String },
}

#[derive(Subcommand)]
pub enum RoleAction {
    /// List roles and their members.
    List,
    /// Create a role.
    Create { role: String },
    /// Add a user to a role.
    Add { username: String, role: String },
    /// Remove a user from a role.
    Remove { username: String, role: String },
}
