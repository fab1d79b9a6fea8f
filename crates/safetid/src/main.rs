//! `safetid` - CLI and HTTP server for the shareable medical record
//!
//! This binary runs the HTTP API and offers local administration of profiles
//! and access credentials against the configured database.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use safetid::api;
use safetid::cli::{Cli, Command, ConfigCommand, CredentialCommand, OutputFormat, ProfileCommand};
use safetid::credential::AccessCredential;
use safetid::identity::OwnerIdentity;
use safetid::profile::{draft_profile, MedicalProfile, ProfileFields};
use safetid::{init_logging, AccessService, Config, Storage};

type Service = AccessService<Arc<Storage>>;

const MASKED_CODE: &str = "•••••";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    match cli.command {
        Command::Serve(cmd) => {
            let mut config = load_config(cli.config)?;
            if let Some(bind) = cmd.bind {
                config.server.bind_address = bind;
            }
            if let Some(port) = cmd.port {
                config.server.port = port;
            }
            config.validate()?;
            handle_serve(&config).await
        }
        Command::Status(cmd) => handle_status(&load_config(cli.config)?, cmd.json),
        Command::Profile(cmd) => {
            let service = open_service(&load_config(cli.config)?)?;
            handle_profile(&service, cmd).await
        }
        Command::Credential(cmd) => {
            let service = open_service(&load_config(cli.config)?)?;
            handle_credential(&service, cmd).await
        }
        Command::Config(cmd) => handle_config(cli.config, cmd),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Config::load_from(path).context("failed to load configuration")
}

fn open_service(config: &Config) -> anyhow::Result<Service> {
    let path = config.database_path();
    let storage = Storage::open(&path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;
    Ok(AccessService::new(Arc::new(storage), config)?)
}

async fn handle_serve(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(open_service(config)?);
    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    api::serve(listener, service, api::shutdown_signal()).await?;
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let path = config.database_path();
    let stats = if path.exists() {
        Some(Storage::open(&path)?.stats()?)
    } else {
        None
    };

    if json {
        let status = serde_json::json!({
            "database_path": path,
            "database_exists": stats.is_some(),
            "profiles": stats.as_ref().map(|s| s.profiles),
            "credentials": stats.as_ref().map(|s| s.credentials),
            "db_size_bytes": stats.as_ref().map(|s| s.db_size_bytes),
            "listen_addr": config.listen_addr().to_string(),
            "share_base_url": config.sharing.base_url,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("safetid status");
        println!("--------------");
        println!("Database:      {}", path.display());
        match &stats {
            Some(stats) => {
                println!("Profiles:      {}", stats.profiles);
                println!("Credentials:   {}", stats.credentials);
                println!("Size:          {} bytes", stats.db_size_bytes);
            }
            None => println!("               (not created yet)"),
        }
        println!("Listen:        {}", config.listen_addr());
        println!("Share URLs:    {}", config.sharing.base_url);
    }
    Ok(())
}

async fn handle_profile(service: &Service, cmd: ProfileCommand) -> anyhow::Result<()> {
    match cmd {
        ProfileCommand::Show { owner_id, format } => {
            let owner_id = service.owner_id(&owner_id)?;
            let profile = service.profiles().get_profile(&owner_id).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&profile)?),
                OutputFormat::Plain => print_profile(&profile),
            }
        }
        ProfileCommand::Draft { owner_id, name } => {
            let owner_id = service.owner_id(&owner_id)?;
            let mut identity = OwnerIdentity::new(owner_id.as_str());
            if let Some(name) = name {
                identity = identity.with_display_name(name);
            }
            println!("{}", serde_json::to_string_pretty(&draft_profile(&identity))?);
        }
        ProfileCommand::Save {
            owner_id,
            file,
            expected_version,
        } => {
            let owner_id = service.owner_id(&owner_id)?;
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let fields: ProfileFields = serde_json::from_str(&contents)
                .with_context(|| format!("{} is not a valid profile", file.display()))?;
            let profile = service
                .profiles()
                .save_profile(&owner_id, fields, expected_version)
                .await?;
            println!(
                "Saved profile for {} (version {}).",
                profile.owner_id, profile.version
            );
        }
        ProfileCommand::Delete { owner_id, yes } => {
            let owner_id = service.owner_id(&owner_id)?;
            if !yes {
                println!("This will delete the profile and access credential for {owner_id}.");
                println!("Use --yes to confirm.");
                return Ok(());
            }
            let deletion = service.delete_account(&owner_id).await?;
            println!(
                "Profile deleted: {}. Credential revoked: {}.",
                deletion.profile_deleted, deletion.credential_revoked
            );
        }
    }
    Ok(())
}

async fn handle_credential(service: &Service, cmd: CredentialCommand) -> anyhow::Result<()> {
    let credentials = service.credentials();
    match cmd {
        CredentialCommand::Show {
            owner_id,
            reveal,
            format,
        } => {
            let owner_id = service.owner_id(&owner_id)?;
            let credential = credentials.get_credential(&owner_id).await?;
            match format {
                OutputFormat::Json => {
                    let mut value = serde_json::to_value(&credential)?;
                    if !reveal {
                        value["accessCode"] = serde_json::Value::from(MASKED_CODE);
                    }
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
                OutputFormat::Plain => print_credential(&credential, reveal),
            }
        }
        CredentialCommand::Issue { owner_id } => {
            let owner_id = service.owner_id(&owner_id)?;
            print_credential(&credentials.issue(&owner_id).await?, true);
        }
        CredentialCommand::Rotate { owner_id } => {
            let owner_id = service.owner_id(&owner_id)?;
            print_credential(&credentials.rotate(&owner_id).await?, true);
        }
        CredentialCommand::Deactivate { owner_id } => {
            let owner_id = service.owner_id(&owner_id)?;
            credentials.deactivate(&owner_id).await?;
            println!("Access code for {owner_id} deactivated.");
        }
        CredentialCommand::Validate { owner_id, code } => {
            let owner_id = service.owner_id(&owner_id)?;
            let outcome = credentials.validate(&owner_id, &code).await?;
            if outcome.granted {
                println!("Access granted.");
            } else {
                println!("Access denied.");
            }
        }
    }
    Ok(())
}

fn handle_config(path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Server]");
                println!("  Bind address:       {}", config.server.bind_address);
                println!("  Port:               {}", config.server.port);
                println!();
                println!("[Sharing]");
                println!("  Base URL:           {}", config.sharing.base_url);
                println!("  Token bytes:        {}", config.sharing.token_bytes);
                println!();
                println!("[Identity]");
                println!("  Owner id pattern:   {}", config.identity.owner_id_pattern);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.or(path).unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn print_profile(profile: &MedicalProfile) {
    for line in profile_lines(profile) {
        println!("{line}");
    }
}

fn profile_lines(profile: &MedicalProfile) -> Vec<String> {
    let info = &profile.fields.personal_info;
    let or_dash = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    let measure =
        |value: Option<f64>, unit: &str| value.map_or_else(|| "-".to_string(), |v| format!("{v} {unit}"));

    vec![
        format!("Medical profile for {}", profile.owner_id),
        format!("  Version:            {}", profile.version),
        format!("  Last updated:       {}", profile.last_updated.to_rfc3339()),
        String::new(),
        format!("  Name:               {}", or_dash(&info.full_name)),
        format!("  Date of birth:      {}", or_dash(&info.date_of_birth)),
        format!(
            "  Blood type:         {}",
            info.blood_type.map_or("-", |b| b.label())
        ),
        format!("  Height:             {}", measure(info.height, "cm")),
        format!("  Weight:             {}", measure(info.weight, "kg")),
        format!("  Emergency contact:  {}", or_dash(&info.emergency_contact)),
        format!("  Emergency phone:    {}", or_dash(&info.emergency_phone)),
        String::new(),
        format!("  Conditions:         {}", profile.fields.medical_conditions),
        format!("  Medications:        {}", profile.fields.medications),
        format!("  Allergies:          {}", profile.fields.allergies),
        format!("  Notes:              {}", profile.fields.additional_notes),
    ]
}

fn print_credential(credential: &AccessCredential, reveal: bool) {
    let code = if reveal {
        credential.access_code.as_str()
    } else {
        MASKED_CODE
    };
    println!("Access credential for {}", credential.owner_id);
    println!("  Code:               {code}");
    println!("  Active:             {}", credential.is_active);
    println!("  Share URL:          {}", credential.share_url);
    println!("  Created:            {}", credential.created_at.to_rfc3339());
}
