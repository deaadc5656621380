//! Perfil CLI
//!
//! Administrative front end for the account store:
//! - Registering accounts and checking credentials
//! - Changing password, theme and avatar; appending notes
//! - Inspecting profiles and migrating legacy `usuarios.json` files in place

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use perfil_storage::{AccountStore, StoreConfig};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "perfil")]
#[command(author, version, about = "Perfil: JSON-backed user account store")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// JSON config file (document_path, avatar_dir, max_avatar_bytes, default_theme)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Accounts document (overrides the config file)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Avatar asset directory (overrides the config file)
    #[arg(long, global = true)]
    avatar_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Register { username: String, password: String },

    /// Check a username/password pair (exit status 1 on mismatch)
    Login { username: String, password: String },

    /// Change an account's password
    Passwd { username: String, password: String },

    /// Change an account's display theme
    Theme { username: String, theme: String },

    /// Append a note to an account
    Note { username: String, text: String },

    /// Upload an avatar image from a local file
    Avatar {
        username: String,
        /// Image file (png, jpg, jpeg or gif)
        file: PathBuf,
    },

    /// Print an account's profile as JSON
    Show { username: String },

    /// List all usernames
    List,

    /// Upgrade legacy records in the accounts document
    Migrate,
}

fn load_config(args: &StoreArgs) -> Result<StoreConfig> {
    let mut config = match &args.config {
        Some(path) => StoreConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(store) = &args.store {
        config.document_path = store.clone();
    }
    if let Some(dir) = &args.avatar_dir {
        config.avatar_dir = dir.clone();
    }
    Ok(config)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli.store)?;
    let store = AccountStore::new(&config);

    match cli.command {
        Commands::Register { username, password } => {
            store.register(&username, &password)?;
            println!("{} {}", "✓ Registered".green(), username.trim());
        }
        Commands::Login { username, password } => {
            if !store.authenticate(&username, &password)? {
                bail!("invalid username or password");
            }
            println!("{} {}", "✓ Authenticated".green(), username);
        }
        Commands::Passwd { username, password } => {
            report_change(store.update_password(&username, &password)?, "Password updated");
        }
        Commands::Theme { username, theme } => {
            report_change(store.update_theme(&username, &theme)?, "Theme updated");
        }
        Commands::Note { username, text } => {
            report_change(store.append_note(&username, &text)?, "Note added");
        }
        Commands::Avatar { username, file } => {
            cmd_avatar(&store, &config, &username, &file)?;
        }
        Commands::Show { username } => {
            let Some(account) = store.account(&username)? else {
                bail!("account not found: {username}");
            };
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
        Commands::List => {
            for username in store.usernames()? {
                println!("{username}");
            }
        }
        Commands::Migrate => {
            let report = store.migrate()?;
            if report.changed() {
                println!(
                    "{} {} legacy record(s) upgraded, {} field(s) filled",
                    "✓ Migrated:".green(),
                    report.upgraded_legacy,
                    report.filled_fields
                );
            } else {
                println!("{}", "Already up to date".dimmed());
            }
        }
    }

    tracing::debug!(
        path = %store.path().display(),
        writes = store.writes(),
        "command finished"
    );
    Ok(())
}

fn report_change(changed: bool, message: &str) {
    if changed {
        println!("{} {}", "✓".green(), message);
    } else {
        println!("{}", "No change".dimmed());
    }
}

fn cmd_avatar(
    store: &AccountStore,
    config: &StoreConfig,
    username: &str,
    file: &Path,
) -> Result<()> {
    let original_name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("not a file path: {}", file.display()))?;
    let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;

    let uploader = config.uploader();
    let stored = uploader.accept(store, username, &original_name, &bytes)?;
    println!(
        "{} {}",
        "✓ Avatar stored:".green(),
        uploader.dir().join(stored).display()
    );
    Ok(())
}
