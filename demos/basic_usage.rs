//! Basic usage of botstate
//!
//! Keeps a per-conversation turn counter in a file-backed store and shows how
//! a stale writer is turned away.
//!
//! Run with: cargo run --example basic_usage -- [state-directory]

use botstate::{FileStorage, FileStorageConfig, Record, StorageExt, WILDCARD_ETAG};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ConversationState {
    user: String,
    turns: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "botstate_storage=debug,basic_usage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let directory = match std::env::args().nth(1) {
        Some(dir) => std::path::PathBuf::from(dir),
        None => {
            let dir = std::env::temp_dir().join("botstate-demo");
            tokio::fs::create_dir_all(&dir).await?;
            dir
        }
    };

    let config = FileStorageConfig::new(&directory)
        .with_pretty()
        .with_io_timeout(Duration::from_secs(5));
    let storage = FileStorage::new(config).await?;
    tracing::info!(directory = %directory.display(), "Using file storage");

    let key = "conversation/42";
    let mut state: Record<ConversationState> = match storage.read_record(key).await? {
        Some(existing) => existing,
        None => Record::new(ConversationState {
            user: "ada".to_string(),
            turns: 0,
        })
        .with_extra("channel", "demo"),
    };

    state.value.turns += 1;
    storage.write_record(key, &mut state).await?;
    tracing::info!(turns = state.value.turns, e_tag = %state.e_tag, "Saved conversation state");

    // A writer holding an outdated copy is rejected
    let mut outdated = state.clone().with_e_tag("outdated");
    outdated.value.turns = 0;
    match storage.write_record(key, &mut outdated).await {
        Ok(()) => tracing::warn!("Outdated write was accepted"),
        Err(e) if e.is_conflict() => tracing::info!(error = %e, "Outdated write rejected"),
        Err(e) => return Err(e.into()),
    }

    // The wildcard forces an overwrite regardless of the stored eTag
    let mut reset = state.clone().with_e_tag(WILDCARD_ETAG);
    reset.value.turns = 0;
    storage.write_record(key, &mut reset).await?;
    tracing::info!(e_tag = %reset.e_tag, "Conversation reset");

    tracing::info!(keys = ?storage.keys().await?, "Stored keys");
    Ok(())
}
