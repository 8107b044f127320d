//! cloud-drive-tools - Encrypted cloud drive over encfs, unionfs-fuse and rclone
//!
//! Usage:
//!   cloud-drive-tools mount              - Mount every layer
//!   cloud-drive-tools unmount            - Unmount every layer
//!   cloud-drive-tools upload             - Push deletes and new data to the cloud
//!   cloud-drive-tools show-encoded-path  - Print the encrypted name of a path

use anyhow::Context;
use clap::{Parser, Subcommand};
use cloud_drive_tools::{
    config::{expand_tilde, Config, DEFAULT_CONFIG_FILE},
    logging::init_logging,
    mounts::{MountLifecycle, RemoteMountKeeper},
    remote::RemoteOps,
    sync::{DeleteReconciler, UploadCoordinator},
    tools::{deps::check_dependencies, SystemRunner},
    Error,
};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "cloud-drive-tools")]
#[command(version)]
#[command(about = "Encrypted cloud drive orchestration over encfs, unionfs-fuse and rclone")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Mount the cloud drive, the encrypted layers and the union view
    Mount {
        /// Do not unmount existing mounts first
        #[arg(long)]
        no_unmount: bool,
    },

    /// Unmount every layer
    #[command(alias = "unmount-all")]
    Unmount,

    /// Sync deletes, upload new data and clean up the local cache
    Upload,

    /// Delete files from the cloud that were deleted locally
    SyncDeletes,

    /// Foreground remote mount that remounts until asked to stop
    #[command(name = "acd-cli-mount", alias = "cloud-drive-mount")]
    AcdCliMount,

    /// Mount the encrypted layers and union view over an existing remote mount
    MountDataDir,

    /// Wait until the cloud storage mount is visible
    WaitForCloudStorageMount,

    /// Show the encoded path for a decoded path
    ShowEncodedPath {
        /// Path relative to the data directory
        path: PathBuf,
    },

    /// Show the decoded path for an encoded path
    ShowDecodedPath {
        /// Encoded path relative to the cloud drive directory
        path: String,
    },

    /// Move a file or directory on the cloud drive
    MoveFileOrDir {
        /// Current path relative to the data directory
        source: PathBuf,
        /// New path relative to the data directory
        destination: PathBuf,
    },

    /// Create a directory on the cloud drive
    Mkdir {
        /// Path relative to the data directory
        path: PathBuf,
    },

    /// Validate the configuration file and print a summary
    CheckConfig,
}

fn main() {
    let cli = Cli::parse();

    let config_path = expand_tilde(&cli.config);
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
    };

    init_logging(cli.verbose || config.verbose);

    if let Err(e) = run_command(cli.command, &config) {
        error!("{:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(e: &anyhow::Error) -> i32 {
    e.downcast_ref::<Error>().map(Error::exit_code).unwrap_or(1)
}

fn run_command(command: Commands, config: &Config) -> anyhow::Result<()> {
    if command != Commands::CheckConfig {
        check_dependencies(config)?;
    }

    let runner = SystemRunner;
    match command {
        Commands::Mount { no_unmount } => MountLifecycle::new(config, &runner)
            .mount(!no_unmount)
            .context("Mounting failed")?,
        Commands::Unmount => MountLifecycle::new(config, &runner)
            .unmount_all()
            .context("Unmounting failed")?,
        Commands::Upload => {
            let report = UploadCoordinator::new(config, &runner)
                .run()
                .context("Upload failed")?;
            if report.quota_reached {
                info!("Upload stopped early, the remote upload limit was reached");
            }
        }
        Commands::SyncDeletes => {
            DeleteReconciler::new(config, &runner)
                .run()
                .context("Syncing deletes failed")?;
        }
        Commands::AcdCliMount => cmd_keep_mounted(config)?,
        Commands::MountDataDir => MountLifecycle::new(config, &runner)
            .mount_data_dir()
            .context("Mounting the data directory failed")?,
        Commands::WaitForCloudStorageMount => MountLifecycle::new(config, &runner)
            .wait_for_remote_mount()
            .context("Cloud storage mount did not appear")?,
        Commands::ShowEncodedPath { path } => {
            println!("{}", RemoteOps::new(config, &runner).encoded_path(&path)?);
        }
        Commands::ShowDecodedPath { path } => {
            println!("{}", RemoteOps::new(config, &runner).decoded_path(&path)?);
        }
        Commands::MoveFileOrDir {
            source,
            destination,
        } => RemoteOps::new(config, &runner)
            .move_path(&source, &destination)
            .with_context(|| format!("Moving {} failed", source.display()))?,
        Commands::Mkdir { path } => RemoteOps::new(config, &runner)
            .make_dir(&path)
            .with_context(|| format!("Creating {} failed", path.display()))?,
        Commands::CheckConfig => cmd_check_config(config),
    }

    Ok(())
}

fn cmd_keep_mounted(config: &Config) -> anyhow::Result<()> {
    let keeper = RemoteMountKeeper::from_config(config);
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime
        .block_on(keeper.run())
        .context("Remote mount keeper failed")?;
    Ok(())
}

fn cmd_check_config(config: &Config) {
    println!("Configuration OK: {}", config.source.display());
    println!("Mount base: {}", config.mount_base.display());
    println!("Data directory: {}", config.data_dir.display());
    println!(
        "Remote: {}:{}",
        config.rclone_remote, config.path_on_cloud_drive
    );
    println!("rclone: {}", config.rclone.display());
    println!("rclone config: {}", config.rclone_config_path.display());
    println!("encfs config: {}", config.encfs6_config.display());
    println!("encfs passphrase: ***");
    println!("Days to keep local: {}", config.days_to_keep_local);
    println!("State directory: {}", config.state_dir().display());
}
