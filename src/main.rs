//! sshid CLI application.
//!
//! This binary provides a command-line interface for generating SSH identities
//! and inspecting or exporting the key store.

use clap::{Parser, Subcommand};
use sshid::config::{Settings, DEFAULT_KEYGEN_PROGRAM, DEFAULT_STORE_DIR};
use sshid::error::{Result, SshIdError};
use sshid::KeyGenerator;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sshid")]
#[command(about = "Generate SSH keys and keep a registry and ssh config in sync", long_about = None)]
struct Cli {
    /// Key store directory
    #[arg(long, global = true, env = "SSHID_STORE", default_value = DEFAULT_STORE_DIR)]
    path: PathBuf,

    /// Key generator program
    #[arg(long, global = true, env = "SSHID_KEYGEN", default_value = DEFAULT_KEYGEN_PROGRAM)]
    keygen_program: PathBuf,

    /// Seconds the key generator may run before it is killed
    #[arg(long, global = true, env = "SSHID_KEYGEN_TIMEOUT", default_value_t = 5)]
    keygen_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key pair and register it
    Create {
        /// Email embedded in the key as its comment
        #[arg(long)]
        email: String,

        /// Connection alias (used as `Host` in the ssh config)
        #[arg(long)]
        alias: String,

        /// Remote host name or address
        #[arg(long)]
        host: String,
    },

    /// Print the ssh config document
    ShowConfig,

    /// Print the registry document
    ShowRegistry,

    /// List registered identities
    List,

    /// Copy the key store to <destination>/keys, replacing an earlier copy
    Export {
        /// Destination directory
        #[arg(long)]
        destination: PathBuf,
    },

    /// Rewrite the ssh config block for an alias whose key pair exists
    RetryConfig {
        /// Alias whose block is rewritten
        #[arg(long)]
        alias: String,

        /// Remote host name or address
        #[arg(long)]
        host: String,
    },

    /// Rebuild a missing registry record from the ssh config and key files
    Repair {
        /// Alias to repair
        #[arg(long)]
        alias: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    sshid::logging::init("info");
    let cli = Cli::parse();

    let settings = Settings::for_store(cli.path)
        .with_keygen_program(cli.keygen_program)
        .with_keygen_timeout(Duration::from_secs(cli.keygen_timeout));
    let generator = KeyGenerator::new(&settings);

    let result = handle_command(&generator, cli.command).await;
    if let Err(ref err) = result {
        print_hint(err);
    }
    result
}

async fn handle_command(generator: &KeyGenerator, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Create { email, alias, host } => {
            let record = generator.create_identity(&email, &alias, &host).await?;

            println!("✓ Created key '{}'", record.alias);
            println!("  Private key: {}", record.key_file_path.display());
            println!("  Public key:  {}", record.public_key_path().display());
            println!("  Host:        {}", record.host);

            Ok(())
        }

        Commands::ShowConfig => {
            match generator.show_config().await? {
                Some(document) => print!("{}", document),
                None => println!("No ssh config file yet."),
            }
            Ok(())
        }

        Commands::ShowRegistry => {
            match generator.show_registry().await? {
                Some(document) => println!("{}", document),
                None => println!("No registry file yet."),
            }
            Ok(())
        }

        Commands::List => {
            let records = generator.list_identities().await?;

            if records.is_empty() {
                println!("No keys found in registry.");
            } else {
                println!("{:<20} {:<30} {:<30} Created", "Alias", "Email", "Host");
                println!("{}", "-".repeat(100));

                for record in records {
                    let created = record
                        .created_at
                        .with_timezone(&chrono::Local)
                        .format("%Y-%m-%d %H:%M:%S");
                    println!(
                        "{:<20} {:<30} {:<30} {}",
                        record.alias, record.email, record.host, created
                    );
                }
            }

            Ok(())
        }

        Commands::Export { destination } => {
            let target = generator.export_store(&destination).await?;
            println!("✓ Copied key store to: {}", target.display());
            Ok(())
        }

        Commands::RetryConfig { alias, host } => {
            generator.retry_config(&alias, &host).await?;
            println!("✓ Wrote ssh config block for '{}'", alias);
            Ok(())
        }

        Commands::Repair { alias } => {
            let record = generator.repair_registry(&alias).await?;
            println!("✓ Restored registry record for '{}'", record.alias);
            Ok(())
        }
    }
}

fn print_hint(err: &SshIdError) {
    match err {
        SshIdError::KeyAlreadyExists { .. } => {
            eprintln!("hint: a key for this alias is already on disk; choose a different alias or run `sshid repair`");
        }
        SshIdError::ConfigWrite { alias, host, .. } => {
            eprintln!(
                "hint: the key pair was kept; once the config is writable run `sshid retry-config --alias {} --host {}`, then `sshid repair --alias {}`",
                alias, host, alias
            );
        }
        SshIdError::RegistryWrite { alias, .. } => {
            eprintln!(
                "hint: key and ssh config are in place; run `sshid repair --alias {}` once the registry is writable",
                alias
            );
        }
        SshIdError::KeyGenerationFailed { path, .. } | SshIdError::KeyGenerationTimeout { path, .. } => {
            eprintln!(
                "hint: remove any partial key files at {} before retrying",
                path.display()
            );
        }
        _ => {}
    }
}
