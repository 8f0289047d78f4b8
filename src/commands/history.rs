use anyhow::{Context, Result};

use murmur::config::Config;
use murmur::storage::{open_sqlite_log, Replay};
use murmur::utils::truncate_text;

/// Print logged messages after `offset`
pub async fn history(config: Config, offset: i64, limit: usize) -> Result<()> {
    let log = open_sqlite_log(&config.storage.sqlite_path, config.storage.busy_timeout_ms)
        .with_context(|| {
            format!("Failed to open message log at {}", config.storage.sqlite_path.display())
        })?;

    let mut replay = Replay::open(log.as_ref(), offset.max(0), config.storage.replay_batch_size)
        .await
        .context("Failed to read message log")?;

    println!("Messages after offset {} (head: {})", offset.max(0), replay.upper_bound());
    println!("{:-<60}", "");

    let mut shown = 0;
    while shown < limit {
        let Some(message) = replay.next().await.context("Failed to read message log")? else {
            break;
        };

        println!(
            "{:>8}  {:<24}  {}",
            message.sequence_id,
            message.dedup_token.as_deref().unwrap_or("-"),
            truncate_text(&message.content, 80)
        );
        shown += 1;
    }

    println!("{:-<60}", "");
    println!("{shown} message(s)");
    Ok(())
}

/// Print log size and head
pub async fn stats(config: Config) -> Result<()> {
    let log = open_sqlite_log(&config.storage.sqlite_path, config.storage.busy_timeout_ms)
        .with_context(|| {
            format!("Failed to open message log at {}", config.storage.sqlite_path.display())
        })?;

    let count = log.count().await.context("Failed to count messages")?;
    let head = log.head().await.context("Failed to read log head")?;

    println!("Message Log Statistics");
    println!("{:-<40}", "");
    println!("  Database: {}", config.storage.sqlite_path.display());
    println!("  Messages: {count}");
    println!("  Head sequence: {head}");
    Ok(())
}
