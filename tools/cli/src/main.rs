//! Coffer CLI - Command line interface for a store's data directory.
//!
//! Reports whether a directory is encrypted, switches it between plaintext
//! and encrypted mode, and reads or writes single files through the store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use coffer_crypto::KdfParams;
use coffer_storage::{Store, StoreConfig, StoreMode};

#[derive(Parser)]
#[command(name = "coffer")]
#[command(about = "Coffer - Transparent encryption for a data directory")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Store configuration file (JSON).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory.
    #[arg(short, long)]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether the directory is encrypted.
    Status,

    /// Encrypt the directory.
    Enable {
        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long)]
        strength: Option<String>,
    },

    /// Decrypt the directory.
    Disable,

    /// Re-encrypt the directory under a new passphrase.
    ChangePassphrase,

    /// Roll back an interrupted enable.
    Recover,

    /// Print a file's contents.
    Cat {
        /// File path within the directory.
        file: PathBuf,
    },

    /// Write a file through the store.
    Put {
        /// File path within the directory.
        file: PathBuf,

        /// Source file to copy in.
        #[arg(short, long)]
        source: PathBuf,
    },

    /// List a directory.
    Ls {
        /// Directory within the store (default: root).
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over -v.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => StoreConfig::default(),
    };

    match cli.command {
        Commands::Status => cmd_status(&cli.dir, config),
        Commands::Enable { strength } => cmd_enable(&cli.dir, config, strength.as_deref()),
        Commands::Disable => cmd_disable(&cli.dir, config),
        Commands::ChangePassphrase => cmd_change_passphrase(&cli.dir, config),
        Commands::Recover => cmd_recover(&cli.dir, config),
        Commands::Cat { file } => cmd_cat(&cli.dir, config, &file),
        Commands::Put { file, source } => cmd_put(&cli.dir, config, &file, &source),
        Commands::Ls { dir } => cmd_ls(&cli.dir, config, &dir),
    }
}

/// Prompt for a passphrase without echo.
fn prompt_passphrase(prompt: &str) -> Result<Zeroizing<String>> {
    let passphrase = rpassword::prompt_password(prompt).context("Failed to read passphrase")?;
    Ok(Zeroizing::new(passphrase))
}

fn prompt_new_passphrase() -> Result<Zeroizing<String>> {
    let passphrase = prompt_passphrase("New passphrase: ")?;
    let confirm = prompt_passphrase("Confirm passphrase: ")?;
    if *passphrase != *confirm {
        anyhow::bail!("Passphrases do not match");
    }
    Ok(passphrase)
}

fn open_store(dir: &Path, config: StoreConfig) -> Result<Store> {
    Store::open_with_config(dir, config)
        .with_context(|| format!("Failed to open store at {}", dir.display()))
}

/// Open the store and unlock it when it is encrypted.
fn open_unlocked(dir: &Path, config: StoreConfig) -> Result<Store> {
    let store = open_store(dir, config)?;
    if store.is_encrypted() {
        let passphrase = prompt_passphrase("Passphrase: ")?;
        store.unlock(&passphrase).context("Failed to unlock store")?;
    }
    Ok(store)
}

fn cmd_status(dir: &Path, config: StoreConfig) -> Result<()> {
    let store = open_store(dir, config)?;
    let description = match store.mode() {
        StoreMode::Plaintext => "plaintext",
        StoreMode::Encrypted => "encrypted",
        StoreMode::Interrupted => "interrupted (run `coffer recover`)",
        StoreMode::MissingToken => "encrypted, verification token missing",
    };

    println!("Store: {}", store.base_dir().display());
    println!("  Mode: {}", description);
    Ok(())
}

fn cmd_enable(dir: &Path, mut config: StoreConfig, strength: Option<&str>) -> Result<()> {
    if let Some(name) = strength {
        config.kdf = KdfParams::preset(name)?;
    }
    let store = open_store(dir, config)?;
    let passphrase = prompt_new_passphrase()?;

    info!("Encrypting {}", dir.display());
    store
        .enable_encryption(&passphrase)
        .context("Failed to enable encryption")?;

    println!("Encryption enabled for {}", dir.display());
    Ok(())
}

fn cmd_disable(dir: &Path, config: StoreConfig) -> Result<()> {
    let store = open_store(dir, config)?;
    let passphrase = prompt_passphrase("Passphrase: ")?;

    store
        .disable_encryption(&passphrase)
        .context("Failed to disable encryption")?;

    println!("Encryption disabled for {}", dir.display());
    Ok(())
}

fn cmd_change_passphrase(dir: &Path, config: StoreConfig) -> Result<()> {
    let store = open_store(dir, config)?;
    let old = prompt_passphrase("Current passphrase: ")?;
    let new = prompt_new_passphrase()?;

    store
        .change_passphrase(&old, &new)
        .context("Failed to change passphrase")?;

    println!("Passphrase changed.");
    Ok(())
}

fn cmd_recover(dir: &Path, config: StoreConfig) -> Result<()> {
    let store = open_store(dir, config)?;
    let passphrase = prompt_passphrase("Passphrase used for the interrupted enable: ")?;

    store.recover(&passphrase).context("Failed to recover")?;

    println!("Recovered {}; the directory is plaintext again.", dir.display());
    Ok(())
}

fn cmd_cat(dir: &Path, config: StoreConfig, file: &Path) -> Result<()> {
    let store = open_unlocked(dir, config)?;
    let content = store
        .read_file(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    std::io::stdout()
        .write_all(&content)
        .context("Failed to write to stdout")?;
    Ok(())
}

fn cmd_put(dir: &Path, config: StoreConfig, file: &Path, source: &Path) -> Result<()> {
    let content = fs::read(source)
        .with_context(|| format!("Failed to read source file {}", source.display()))?;
    let store = open_unlocked(dir, config)?;

    store
        .write_file(file, &content)
        .with_context(|| format!("Failed to write {}", file.display()))?;

    println!("Wrote {} ({} bytes)", file.display(), content.len());
    Ok(())
}

fn cmd_ls(dir: &Path, config: StoreConfig, path: &Path) -> Result<()> {
    let store = open_store(dir, config)?;
    let entries = store
        .list_dir(path)
        .with_context(|| format!("Failed to list {}", path.display()))?;

    if entries.is_empty() {
        println!("Directory is empty.");
        return Ok(());
    }

    println!("Contents of {}:", path.display());
    for entry in entries {
        if entry.is_directory {
            println!("  [DIR]  {}/", entry.name);
        } else {
            let size = entry
                .size
                .map(|s| format!("{} bytes", s))
                .unwrap_or_else(|| "unknown".to_string());
            println!(
                "  [FILE] {} ({}, {})",
                entry.name,
                size,
                entry.modified.format("%Y-%m-%d %H:%M")
            );
        }
    }
    Ok(())
}
