use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use tenant_backup::backup::{BackupError, BackupManager, BackupServices, BackupType, ErrorCategory};
use tenant_backup::{create_pool, Config};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[derive(Parser)]
#[command(name = "tenant-backup")]
#[command(about = "Snapshot, restore and retention of tenant accounting data")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Whole-schema snapshots
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },
    /// Snapshots of one user's tenant data
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Snapshots of one tenant
    Tenant {
        #[command(subcommand)]
        command: TenantCommands,
    },
    /// List recorded backups, newest first
    List {
        /// Only show backups of this type (system, user, tenant)
        #[arg(long = "type")]
        backup_type: Option<BackupType>,
    },
    /// Delete a backup file and its ledger entry
    Delete { backup_id: String },
    /// Remove backups older than the retention window
    Cleanup,
    /// Show backup counts and sizes
    Stats,
}

#[derive(Subcommand)]
enum SystemCommands {
    Create {
        #[arg(long)]
        description: Option<String>,
    },
    Restore { backup_id: String },
}

#[derive(Subcommand)]
enum UserCommands {
    Create {
        user_id: String,
        #[arg(long)]
        description: Option<String>,
    },
    Restore { user_id: String, backup_id: String },
    List { user_id: String },
}

#[derive(Subcommand)]
enum TenantCommands {
    Create {
        tenant_id: String,
        #[arg(long)]
        description: Option<String>,
    },
    Restore { tenant_id: String, backup_id: String },
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.operational.log_level.as_str().into());

    // stdout carries command output, logs go to stderr
    let fmt_layer = if config.operational.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Commands, manager: &BackupManager) -> Result<()> {
    match command {
        Commands::System { command } => match command {
            SystemCommands::Create { description } => {
                print_json(&manager.create_system_backup(description).await?)
            }
            SystemCommands::Restore { backup_id } => {
                print_json(&manager.restore_system_backup(&backup_id).await?)
            }
        },
        Commands::User { command } => match command {
            UserCommands::Create {
                user_id,
                description,
            } => print_json(&manager.create_user_backup(&user_id, description).await?),
            UserCommands::Restore { user_id, backup_id } => {
                print_json(&manager.restore_user_backup(&user_id, &backup_id).await?)
            }
            UserCommands::List { user_id } => {
                print_json(&manager.list_user_backups(&user_id).await?)
            }
        },
        Commands::Tenant { command } => match command {
            TenantCommands::Create {
                tenant_id,
                description,
            } => print_json(&manager.create_tenant_backup(&tenant_id, description).await?),
            TenantCommands::Restore {
                tenant_id,
                backup_id,
            } => print_json(&manager.restore_tenant_backup(&tenant_id, &backup_id).await?),
        },
        Commands::List { backup_type } => print_json(&manager.list_backups(backup_type).await?),
        Commands::Delete { backup_id } => print_json(&manager.delete_backup(&backup_id).await?),
        Commands::Cleanup => print_json(&manager.cleanup_old_backups().await?),
        Commands::Stats => print_json(&manager.statistics().await?),
    }
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<BackupError>().map(BackupError::category) {
        Some(ErrorCategory::BadRequest) => ExitCode::from(2),
        Some(ErrorCategory::NotFound) => ExitCode::from(3),
        _ => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env().and_then(|config| config.validate().map(|_| config)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config);
    info!("Connecting to {}", config.safe_database_url());

    let result = async {
        let pool = create_pool(&config.database_url, &config.operational).await?;
        let services = BackupServices::postgres(Arc::new(pool), &config.backup.schema);
        let manager = BackupManager::initialize(config.backup.clone(), services).await?;
        run(cli.command, &manager).await
    }
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            exit_code(&e)
        }
    }
}
