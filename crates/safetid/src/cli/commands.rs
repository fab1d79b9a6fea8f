//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// Serve command arguments.
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Address to bind (overrides `server.bind_address`)
    #[arg(short, long)]
    pub bind: Option<IpAddr>,

    /// Port to listen on (overrides `server.port`)
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Medical profile commands.
#[derive(Debug, Subcommand)]
pub enum ProfileCommand {
    /// Show an owner's profile
    Show {
        /// Owner id
        owner_id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// Print a blank profile prefilled from the owner's identity
    Draft {
        /// Owner id
        owner_id: String,

        /// Display name reported by the identity provider
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Save a profile from a JSON file
    Save {
        /// Owner id
        owner_id: String,

        /// JSON file with the profile fields
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,

        /// Reject the save unless the stored version matches
        #[arg(long)]
        expected_version: Option<u64>,
    },

    /// Delete an owner's profile and access credential
    Delete {
        /// Owner id
        owner_id: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Access credential commands.
#[derive(Debug, Subcommand)]
pub enum CredentialCommand {
    /// Show an owner's credential
    Show {
        /// Owner id
        owner_id: String,

        /// Print the access code instead of masking it
        #[arg(short, long)]
        reveal: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// Issue a credential, or return the active one
    Issue {
        /// Owner id
        owner_id: String,
    },

    /// Replace the access code with a new one
    Rotate {
        /// Owner id
        owner_id: String,
    },

    /// Stop the current code from granting access
    Deactivate {
        /// Owner id
        owner_id: String,
    },

    /// Check an access code against the owner's credential
    Validate {
        /// Owner id
        owner_id: String,

        /// The five-digit access code
        code: String,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// JSON output
    Json,
}
