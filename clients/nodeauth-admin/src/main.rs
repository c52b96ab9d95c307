//! nodeauth-admin - key provisioning for node admission
//!
//! Thin operator front-end to the crypto-operations service. Typical setup:
//! create an encryption key on the server's crypto service, export its public
//! half, and import it on every node under the name its agent encrypts with.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use nodeauth::{CryptoClient, CryptoOperations};
use std::time::Duration;

const DEFAULT_CRYPTO_URL: &str = "http://127.0.0.1:8300";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Crypto-operations service URL
    #[arg(short = 'u', long, env = "CRYPTO_URL", default_value = DEFAULT_CRYPTO_URL)]
    crypto_url: String,

    /// Client identity to act as
    #[arg(short, long, env = "CRYPTO_CLIENT_NAME", default_value = "NodeAuthServer")]
    name: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Machine-readable output
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register the client identity (idempotent)
    Register,

    /// Remove the client identity
    Unregister,

    /// List the identity's keys
    Keys,

    /// Delete every key the identity owns
    PurgeKeys {
        /// Required, the deletion cannot be undone
        #[arg(long)]
        yes: bool,
    },

    /// Create an encryption key pair
    CreateEncKey {
        key: String,
    },

    /// Create a signing key pair
    CreateSignKey {
        key: String,
    },

    /// Print a public key as an ssh-rsa line
    ExportKey {
        key: String,

        /// Write the line to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Import a public key from an ssh-rsa line
    ImportKey {
        key: String,

        /// File holding the ssh-rsa line
        #[arg(long, conflicts_with = "line", required_unless_present = "line")]
        file: Option<PathBuf>,

        /// The ssh-rsa line itself
        #[arg(long)]
        line: Option<String>,
    },

    /// Delete a key
    DeleteKey {
        key: String,
    },

    /// Sign a message
    Sign {
        key: String,
        message: String,
    },

    /// Verify a base64 signature over a message
    Verify {
        key: String,
        message: String,
        signature: String,
    },

    /// Encrypt a message, printing base64 ciphertext
    Encrypt {
        key: String,
        message: String,
    },

    /// Decrypt base64 ciphertext
    Decrypt {
        key: String,
        ciphertext: String,
    },
}

fn client(cli: &Cli) -> Result<CryptoClient> {
    CryptoClient::new(&cli.crypto_url, Duration::from_secs(cli.timeout))
        .context("Failed to build crypto service client")
}

fn done(cli: &Cli, message: &str) {
    if cli.json {
        println!("{}", serde_json::json!({"ok": true}));
    } else {
        println!("{}", message.green().bold());
    }
}

fn value(cli: &Cli, label: &str, value: &str) {
    if cli.json {
        let mut object = serde_json::Map::new();
        object.insert(label.to_string(), value.into());
        println!("{}", serde_json::Value::Object(object));
    } else {
        println!("{}", value);
    }
}

async fn cmd_register(cli: &Cli) -> Result<()> {
    client(cli)?
        .register_client(&cli.name)
        .await
        .with_context(|| format!("Failed to register {}", cli.name))?;
    done(cli, &format!("Registered {}", cli.name));
    Ok(())
}

async fn cmd_unregister(cli: &Cli) -> Result<()> {
    client(cli)?
        .remove_client(&cli.name)
        .await
        .with_context(|| format!("Failed to remove {}", cli.name))?;
    done(cli, &format!("Removed {}", cli.name));
    Ok(())
}

async fn cmd_keys(cli: &Cli) -> Result<()> {
    let keys = client(cli)?
        .list_keys(&cli.name)
        .await
        .context("Failed to list keys")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&keys)?);
        return Ok(());
    }

    if keys.is_empty() {
        println!("{}", format!("No keys for {}.", cli.name).yellow());
        return Ok(());
    }
    println!("{}", format!("Keys for {}:", cli.name).cyan().bold());
    for key in keys {
        println!("  {} (provider {})", key.name, key.provider_id);
    }
    Ok(())
}

async fn cmd_purge_keys(cli: &Cli, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to delete every key of {} without --yes", cli.name);
    }
    println!(
        "{}",
        format!("Deleting all keys of {}...", cli.name).yellow()
    );
    client(cli)?
        .delete_all_keys(&cli.name)
        .await
        .context("Failed to delete keys")?;
    done(cli, "All keys deleted");
    Ok(())
}

async fn cmd_create_key(cli: &Cli, key: &str, encryption: bool) -> Result<()> {
    let crypto = client(cli)?;
    let result = if encryption {
        crypto.create_encryption_key(&cli.name, key).await
    } else {
        crypto.create_signing_key(&cli.name, key).await
    };
    result.with_context(|| format!("Failed to create key {}", key))?;
    done(cli, &format!("Created key {}", key));
    Ok(())
}

async fn cmd_export_key(cli: &Cli, key: &str, out: Option<&PathBuf>) -> Result<()> {
    let line = client(cli)?
        .export_public_key(&cli.name, key)
        .await
        .with_context(|| format!("Failed to export key {}", key))?;

    match out {
        Some(path) => {
            std::fs::write(path, format!("{}\n", line.trim_end()))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            done(cli, &format!("Wrote {}", path.display()));
        }
        None => value(cli, "publicKey", line.trim_end()),
    }
    Ok(())
}

async fn cmd_import_key(
    cli: &Cli,
    key: &str,
    file: Option<&PathBuf>,
    line: Option<&str>,
) -> Result<()> {
    let line = match (file, line) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, Some(line)) => line.to_string(),
        (None, None) => bail!("Either --file or --line is required"),
    };
    let line = line.trim();
    if !line.starts_with("ssh-rsa ") {
        bail!("Expected an ssh-rsa public key line");
    }

    client(cli)?
        .import_public_key(&cli.name, key, line)
        .await
        .with_context(|| format!("Failed to import key {}", key))?;
    done(cli, &format!("Imported key {}", key));
    Ok(())
}

async fn cmd_delete_key(cli: &Cli, key: &str) -> Result<()> {
    client(cli)?
        .delete_key(&cli.name, key)
        .await
        .with_context(|| format!("Failed to delete key {}", key))?;
    done(cli, &format!("Deleted key {}", key));
    Ok(())
}

async fn cmd_sign(cli: &Cli, key: &str, message: &str) -> Result<()> {
    let signature = client(cli)?
        .sign(&cli.name, key, message)
        .await
        .context("Failed to sign")?;
    value(cli, "signature", &signature);
    Ok(())
}

async fn cmd_verify(cli: &Cli, key: &str, message: &str, signature: &str) -> Result<()> {
    let valid = client(cli)?
        .verify(&cli.name, key, message, signature)
        .await
        .context("Failed to verify")?;

    if cli.json {
        println!("{}", serde_json::json!({ "valid": valid }));
    } else if valid {
        println!("{}", "Signature valid".green().bold());
    } else {
        println!("{}", "Signature INVALID".red().bold());
    }
    if !valid {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_encrypt(cli: &Cli, key: &str, message: &str) -> Result<()> {
    let ciphertext = client(cli)?
        .encrypt(&cli.name, key, message)
        .await
        .context("Failed to encrypt")?;
    value(cli, "ciphertext", &ciphertext);
    Ok(())
}

async fn cmd_decrypt(cli: &Cli, key: &str, ciphertext: &str) -> Result<()> {
    let plaintext = client(cli)?
        .decrypt(&cli.name, key, ciphertext)
        .await
        .context("Failed to decrypt")?;
    value(cli, "plaintext", &String::from_utf8_lossy(&plaintext));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Register => cmd_register(&cli).await,
        Commands::Unregister => cmd_unregister(&cli).await,
        Commands::Keys => cmd_keys(&cli).await,
        Commands::PurgeKeys { yes } => cmd_purge_keys(&cli, *yes).await,
        Commands::CreateEncKey { key } => cmd_create_key(&cli, key, true).await,
        Commands::CreateSignKey { key } => cmd_create_key(&cli, key, false).await,
        Commands::ExportKey { key, out } => cmd_export_key(&cli, key, out.as_ref()).await,
        Commands::ImportKey { key, file, line } => {
            cmd_import_key(&cli, key, file.as_ref(), line.as_deref()).await
        }
        Commands::DeleteKey { key } => cmd_delete_key(&cli, key).await,
        Commands::Sign { key, message } => cmd_sign(&cli, key, message).await,
        Commands::Verify {
            key,
            message,
            signature,
        } => cmd_verify(&cli, key, message, signature).await,
        Commands::Encrypt { key, message } => cmd_encrypt(&cli, key, message).await,
        Commands::Decrypt { key, ciphertext } => cmd_decrypt(&cli, key, ciphertext).await,
    }
}
