//! Maintenance CLI
//!
//! Offline inspection and repair of a snapshotter root: listing, stat,
//! usage, mount plans, removal and orphan cleanup. The CLI runs without
//! remote backends, so remote layers are reported as plain local layers.

use crate::config::SnapshotterConfig;
use crate::error::SnapshotError;
use crate::remote::BackendSet;
use crate::snapshotter::Snapshotter;
use crate::types::Info;
use clap::{Parser, Subcommand};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Lazysnap - layered snapshot manager
#[derive(Parser, Debug)]
#[command(name = "lazysnap")]
#[command(about = "Inspect and maintain a layered snapshot store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Snapshotter root (overrides the configuration)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List all snapshots
    List {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show a snapshot's info
    Stat { key: String },
    /// Show a snapshot's disk usage
    Usage { key: String },
    /// Print a snapshot's mount plan as JSON
    Mounts { key: String },
    /// Remove a snapshot
    Remove { key: String },
    /// Reclaim directories that have no snapshot record
    Cleanup,
    /// Print the effective configuration
    Config,
}

impl Cli {
    /// Effective configuration: file and environment, then CLI overrides.
    pub fn load_config(&self) -> Result<SnapshotterConfig, SnapshotError> {
        let mut config = SnapshotterConfig::load(self.config.as_deref())?;
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
        config.ensure_valid()?;
        Ok(config)
    }
}

/// Execute a command against `config`, returning the text to print.
pub async fn execute(
    config: &SnapshotterConfig,
    command: &Commands,
    cancel: &CancellationToken,
) -> Result<String, SnapshotError> {
    if let Commands::Config = command {
        return config.to_toml();
    }

    let snapshotter = Snapshotter::open(config, BackendSet::default())?;
    let output = match command {
        Commands::List { format } => {
            let mut infos = Vec::new();
            snapshotter
                .walk(cancel, |info| {
                    infos.push(info.clone());
                    Ok(())
                })
                .await?;
            infos.sort_by(|a, b| a.name.cmp(&b.name));
            if format == "json" {
                to_json(&infos)?
            } else {
                format_info_table(&infos)
            }
        }
        Commands::Stat { key } => to_json(&snapshotter.stat(cancel, key).await?)?,
        Commands::Usage { key } => {
            let usage = snapshotter.usage(cancel, key).await?;
            format!("size: {} bytes\ninodes: {}", usage.size, usage.inodes)
        }
        Commands::Mounts { key } => to_json(&snapshotter.mounts(cancel, key).await?)?,
        Commands::Remove { key } => {
            snapshotter.remove(cancel, key).await?;
            format!("Removed {}", key)
        }
        Commands::Cleanup => {
            let reclaimed = snapshotter.cleanup(cancel).await?;
            let mut out = format!("Reclaimed {} directories", reclaimed.len());
            for dir in reclaimed {
                out.push_str(&format!("\n  {}", dir.display()));
            }
            out
        }
        Commands::Config => config.to_toml()?,
    };
    snapshotter.close().await?;
    Ok(output)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, SnapshotError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| SnapshotError::InvalidArgument(format!("Failed to render JSON: {}", e)))
}

fn format_info_table(infos: &[Info]) -> String {
    if infos.is_empty() {
        return "No snapshots".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Name", "Parent", "Kind", "Created"]);
    for info in infos {
        table.add_row(vec![
            info.name.clone(),
            info.parent.clone().unwrap_or_else(|| "-".to_string()),
            info.kind.to_string(),
            info.created.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    table.to_string()
}
