//! Command-line interface for safetid.
//!
//! This module provides the CLI structure for the `safetid` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, CredentialCommand, OutputFormat, ProfileCommand, ServeCommand, StatusCommand,
};

/// safetid - A shareable medical record behind a five-digit code
///
/// Keeps an owner's medical profile and the access credential that lets a
/// provider who scans the owner's QR code read it.
#[derive(Debug, Parser)]
#[command(name = "safetid")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API
    Serve(ServeCommand),

    /// Show database status
    Status(StatusCommand),

    /// Manage medical profiles
    #[command(subcommand)]
    Profile(ProfileCommand),

    /// Manage access credentials
    #[command(subcommand)]
    Credential(CredentialCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.quiet, self.verbose)
    }
}
