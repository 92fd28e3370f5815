//! One-shot control commands (close-all, config, download)

use anyhow::{bail, Context, Result};
use console::style;
use proxyui_cli::config::Config;
use proxyui_cli::stream::{StreamClient, StreamStatus, StreamStore};
use proxyui_common::SubscriptionConfig;
use std::sync::Arc;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Ask the proxy to drop every active connection
pub async fn close_all(config: &Config) -> Result<()> {
    // Nothing needs to be streamed back for a single control message
    let quiet = SubscriptionConfig {
        traffic: false,
        connections: false,
        logs: false,
        mitm: false,
        ..config.subscriptions()
    };
    let store = Arc::new(StreamStore::with_subscriptions(quiet));
    let mut client = StreamClient::new(store, config.stream_options());

    client
        .connect(&config.api_url, config.secret())
        .await
        .context("Failed to start event stream")?;

    let result = match wait_until_open(&client).await {
        Ok(()) => client
            .close_all_connections()
            .context("Failed to send close request"),
        Err(e) => Err(e),
    };

    // Disconnecting flushes the queued request before the close frame
    client.disconnect().await;
    result?;

    println!("{} Requested close of all active connections", style("✓").green());
    Ok(())
}

async fn wait_until_open(client: &StreamClient) -> Result<()> {
    let mut status = client.watch_status();
    let reached = tokio::time::timeout(
        CONNECT_TIMEOUT,
        status.wait_for(|s| matches!(s, StreamStatus::Open | StreamStatus::Rejected)),
    )
    .await
    .context("Timed out connecting to the event stream")?
    .map(|s| *s)
    .context("Event stream task ended")?;

    if reached == StreamStatus::Rejected {
        bail!("The backend rejected the secret. Run `proxyui login <url> --secret <secret>`");
    }
    Ok(())
}

/// Print the backend configuration
pub async fn show_config(config: &Config) -> Result<()> {
    let api = config.api_client()?;
    let value = api
        .fetch_configs()
        .await
        .context("Failed to fetch backend configuration")?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Resolve a stored exchange body to a download link
pub async fn download(config: &Config, key: &str, open_link: bool) -> Result<()> {
    let api = config.api_client()?;
    let info = api
        .storage_download(key)
        .await
        .with_context(|| format!("Failed to resolve download for {}", key))?;

    println!("{}  {}", style("File:").bold(), info.filename);
    println!("{}  {}", style("Size:").bold(), format_bytes(info.size.max(0) as u64));
    println!("{} {}", style("Until:").bold(), info.expires_at);
    println!("{}   {}", style("URL:").bold(), style(&info.download_url).cyan().underlined());

    if open_link {
        if let Err(e) = open::that(&info.download_url) {
            tracing::warn!("Failed to open browser: {}", e);
        }
    }

    Ok(())
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
