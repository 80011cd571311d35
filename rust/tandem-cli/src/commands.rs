//! Sync verb implementations
//!
//! Each verb returns a JSON value for the renderer; errors carry the kind
//! that maps to the process exit code.

use clap::Subcommand;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::str::FromStr;
use tandem_platform::{Platform, PlatformError, PlatformResult};
use tandem_state::{ResolutionStrategy, SyncMode, SyncOptions, WatchOptions};

#[derive(Subcommand)]
pub enum SyncCommand {
    /// Synchronizer status and store statistics
    Status,
    /// Manual reconciliation across all pairs, or one pair
    Force {
        source: Option<String>,
        target: Option<String>,
    },
    /// Bind a filesystem watcher to sync triggers
    Watch {
        path: PathBuf,
        /// immediate | batch | scheduled
        #[arg(long, default_value = "immediate")]
        mode: String,
        #[arg(long)]
        recursive: bool,
        /// Target type key; defaults to the watched path
        #[arg(long)]
        target: Option<String>,
    },
    /// Release a watcher
    Unwatch { path: PathBuf },
    /// Enumerate pending conflicts
    Conflicts {
        source: Option<String>,
        target: Option<String>,
    },
    /// Apply a resolution strategy to pending conflicts
    Resolve {
        strategy: String,
        source: Option<String>,
        target: Option<String>,
    },
    /// State history with conflict statistics
    History {
        #[arg(default_value_t = 10)]
        limit: usize,
    },
    /// Prune old snapshots and history
    Cleanup {
        /// Maximum age in days
        #[arg(long)]
        max_age: Option<i64>,
        /// Maximum versions kept per key
        #[arg(long)]
        max_versions: Option<usize>,
    },
    /// View or set runtime configuration
    Config {
        key: Option<String>,
        value: Option<String>,
    },
}

fn pair<'a>(
    source: &'a Option<String>,
    target: &'a Option<String>,
) -> PlatformResult<Option<(&'a str, &'a str)>> {
    match (source, target) {
        (Some(source), Some(target)) => Ok(Some((source.as_str(), target.as_str()))),
        (None, None) => Ok(None),
        _ => Err(PlatformError::Core(tandem_core::CoreError::Validation {
            field: "target".to_string(),
            message: "source and target must be given together".to_string(),
        })),
    }
}

pub async fn run_sync(platform: &Platform, command: SyncCommand) -> PlatformResult<Value> {
    let sync = platform.synchronizer();
    match command {
        SyncCommand::Status => {
            let status = sync.status();
            let bus = platform.bus().stats().await;
            Ok(json!({"synchronizer": status, "bus": bus}))
        }
        SyncCommand::Force { source, target } => {
            let outcomes = sync
                .force_sync(pair(&source, &target)?, SyncOptions::default())
                .await?;
            Ok(json!({"synced": outcomes.len(), "outcomes": outcomes}))
        }
        SyncCommand::Watch {
            path,
            mode,
            recursive,
            target,
        } => {
            let mode = SyncMode::from_str(&mode)?;
            sync.watch(
                &path,
                WatchOptions {
                    mode,
                    recursive,
                    target,
                },
            )?;
            // The watch lives as long as the process; hold until interrupted
            eprintln!("watching {} (ctrl-c to stop)", path.display());
            let _ = tokio::signal::ctrl_c().await;
            let status = sync.status();
            sync.unwatch(&path)?;
            Ok(json!({
                "watched": path,
                "mode": mode,
                "syncs_total": status.syncs_total,
                "conflicts_detected": status.conflicts_detected,
            }))
        }
        SyncCommand::Unwatch { path } => {
            sync.unwatch(&path)?;
            Ok(json!({"unwatched": path}))
        }
        SyncCommand::Conflicts { source, target } => {
            let conflicts = sync.pending_conflicts(pair(&source, &target)?);
            Ok(json!({"pending": conflicts.len(), "conflicts": conflicts}))
        }
        SyncCommand::Resolve {
            strategy,
            source,
            target,
        } => {
            let strategy = ResolutionStrategy::from_str(&strategy)?;
            let outcomes = sync
                .resolve_pending(strategy, pair(&source, &target)?)
                .await?;
            Ok(json!({"strategy": strategy, "outcomes": outcomes}))
        }
        SyncCommand::History { limit } => {
            let store = platform.store();
            let mut states = serde_json::Map::new();
            for key in store.type_keys() {
                let history = store.history(&key, limit).await;
                states.insert(key, serde_json::to_value(history)?);
            }
            let resolutions = sync.resolution_history();
            let resolved = resolutions.len();
            let pending = sync.pending_conflicts(None).len();
            Ok(json!({
                "states": states,
                "resolutions": resolutions,
                "conflict_stats": {"resolved": resolved, "pending": pending},
            }))
        }
        SyncCommand::Cleanup {
            max_age,
            max_versions,
        } => {
            let max_age = max_age.map(chrono::Duration::days);
            let report = sync.cleanup(max_age, max_versions).await?;
            Ok(serde_json::to_value(report)?)
        }
        SyncCommand::Config { key, value } => match (key, value) {
            (None, _) => {
                let entries: serde_json::Map<String, Value> = platform
                    .config_list()
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                Ok(Value::Object(entries))
            }
            (Some(key), None) => {
                let value = platform.config_get(&key)?;
                Ok(json!({"key": key, "value": value}))
            }
            (Some(key), Some(value)) => {
                platform.config_set(&key, &value)?;
                Ok(json!({"key": key, "value": value, "updated": true}))
            }
        },
    }
}

pub async fn run_command(
    platform: &Platform,
    line: Vec<String>,
    user: Option<String>,
) -> PlatformResult<Value> {
    let raw = line.join(" ");
    let outcome = platform.execute_command(&raw, user.as_deref()).await?;
    Ok(serde_json::to_value(&outcome)?)
}
