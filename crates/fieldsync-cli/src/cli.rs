use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Drive and inspect offline-first sync from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the CLI config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Save an entity locally and queue it for upload
    Put {
        /// Entity type (e.g. samples)
        entity_type: String,
        /// Entity ID
        entity_id: String,
        /// JSON payload
        payload: String,
        /// Queue priority; higher is uploaded sooner
        #[arg(long, default_value = "0")]
        priority: i32,
    },
    /// Delete an entity locally and queue the deletion
    Delete {
        /// Entity type
        entity_type: String,
        /// Entity ID
        entity_id: String,
    },
    /// Show an entity's local copy and sync state
    Show {
        /// Entity type
        entity_type: String,
        /// Entity ID
        entity_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a sync pass against the remote
    Sync {
        /// Only sync one entity type
        #[arg(long = "type", value_name = "TYPE")]
        entity_type: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and manage the sync queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Inspect and resolve sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Give records that exhausted their sync attempts a fresh budget
    ResetFailed {
        /// Only reset one entity type
        #[arg(long = "type", value_name = "TYPE")]
        entity_type: Option<String>,
    },
    /// Sync periodically until interrupted
    Watch {
        /// Seconds between passes (defaults to the configured interval)
        #[arg(long, value_name = "SECONDS")]
        interval_secs: Option<u64>,
    },
    /// Manage CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queue entries in replay order
    List {
        /// Only list one entity type
        #[arg(long = "type", value_name = "TYPE")]
        entity_type: Option<String>,
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove one entry
    Remove {
        /// Queue entry ID
        id: String,
    },
    /// Re-arm a failed entry
    Retry {
        /// Queue entry ID
        id: String,
    },
    /// Drop every entry, including unsynced ones
    Clear {
        /// Confirm discarding unsynced mutations
        #[arg(long)]
        yes: bool,
    },
    /// Delete entries that already reached the remote
    Purge,
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List unresolved conflicts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recently resolved conflicts
    History {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve one conflict
    Resolve {
        /// Entity type
        entity_type: String,
        /// Entity ID
        entity_id: String,
        /// server_wins, client_wins, local_wins or merge
        #[arg(long, default_value = "client_wins")]
        strategy: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write the remote endpoint to the config file
    Init {
        /// Remote base URL (e.g. <https://sync.example.com>)
        #[arg(long, value_name = "URL")]
        remote_url: String,
        /// Bearer token sent with every request
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
    },
    /// Print the effective configuration
    Show,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
