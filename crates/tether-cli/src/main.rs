//! tether - inspect and manage durable conversations

mod config;

use clap::{CommandFactory, Parser};
use tether_agent::{FileSnapshotStore, SnapshotStore};
use tracing_subscriber::EnvFilter;

/// tether - durable conversation orchestration
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Print the effective configuration
    #[arg(long)]
    show_config: bool,

    /// List stored conversation snapshots
    #[arg(long)]
    snapshots: bool,

    /// Print the transcript of a stored conversation
    #[arg(long, value_name = "ID")]
    show: Option<String>,

    /// Delete a stored conversation snapshot
    #[arg(long, value_name = "ID")]
    remove: Option<String>,

    /// Snapshot directory (overrides config and TETHER_SNAPSHOT_DIR)
    #[arg(long)]
    snapshot_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    let filter = if args.verbose {
        EnvFilter::new("tether=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Initialize config and exit
    if args.init_config {
        let path = config::Config::init()?;
        println!("Config file at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let mut config = config::Config::load();
    config.apply_env()?;
    if let Some(dir) = args.snapshot_dir {
        config.snapshot_dir = Some(dir);
    }
    tracing::debug!(path = %config::Config::config_path().display(), "config loaded");

    if args.show_config {
        println!("# {}", config::Config::config_path().display());
        print!("{}", toml::to_string_pretty(&config.effective())?);
        return Ok(());
    }

    let store = FileSnapshotStore::new(config.snapshot_dir());

    if args.snapshots {
        return list_snapshots(&store).await;
    }
    if let Some(id) = args.show {
        return show_snapshot(&store, &id).await;
    }
    if let Some(id) = args.remove {
        remove_snapshot(&store, &id).await?;
        println!("Removed {}", id);
        return Ok(());
    }

    Args::command().print_help()?;
    Ok(())
}

fn format_saved_at(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn list_snapshots(store: &FileSnapshotStore) -> anyhow::Result<()> {
    let snapshots = store.list().await?;
    if snapshots.is_empty() {
        println!("No stored conversations found.");
        println!("Snapshots are stored in: {}", store.dir().display());
        return Ok(());
    }

    println!("Stored conversations:\n");
    println!(
        "{:<38} {:<18} {:>5} {:>7} {:>7} {:>10}",
        "ID", "Saved", "Epoch", "Entries", "Pending", "Tokens"
    );
    println!("{}", "-".repeat(90));
    for s in snapshots {
        println!(
            "{:<38} {:<18} {:>5} {:>7} {:>7} {:>10}",
            s.conversation_id,
            format_saved_at(s.saved_at),
            s.epoch,
            s.entries,
            s.pending,
            s.total_usage.total_tokens
        );
    }
    println!("\nInspect with: tether --show <id>");
    Ok(())
}

async fn show_snapshot(store: &FileSnapshotStore, id: &str) -> anyhow::Result<()> {
    let Some(snapshot) = store.load(id).await? else {
        anyhow::bail!("No stored conversation with id {}", id);
    };

    let usage = snapshot.total_usage();
    println!("Conversation {} (epoch {})", snapshot.conversation_id, snapshot.epoch);
    println!("Saved: {}", format_saved_at(snapshot.saved_at));
    println!(
        "Usage: {} in / {} out / {} total",
        usage.input_tokens, usage.output_tokens, usage.total_tokens
    );
    println!();
    for entry in &snapshot.transcript {
        println!("{}\n", entry);
    }
    if !snapshot.pending.is_empty() {
        println!("Pending turns:");
        for turn in &snapshot.pending {
            println!("  {} ({}): {}", turn.name, turn.timestamp, turn.message);
        }
    }
    Ok(())
}

async fn remove_snapshot(store: &FileSnapshotStore, id: &str) -> anyhow::Result<()> {
    if store.load(id).await?.is_none() {
        anyhow::bail!("No stored conversation with id {}", id);
    }
    store.remove(id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_agent::ConversationSnapshot;

    #[tokio::test]
    async fn test_remove_unknown_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let err = remove_snapshot(&store, "ghost").await.unwrap_err();
        assert!(err.to_string().contains("ghost"), "got: {}", err);
    }

    #[tokio::test]
    async fn test_remove_existing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        store.save(&ConversationSnapshot::new("chat-1")).await.unwrap();

        remove_snapshot(&store, "chat-1").await.unwrap();
        assert!(store.load("chat-1").await.unwrap().is_none());
        assert!(remove_snapshot(&store, "chat-1").await.is_err());
    }
}
