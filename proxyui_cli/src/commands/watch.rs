//! Watch command - stream traffic, connections, logs and MITM exchanges to the terminal

use super::control::format_bytes;
use anyhow::{bail, Context, Result};
use console::style;
use proxyui_cli::config::Config;
use proxyui_cli::stream::{
    Exchange, LogEntry, StreamClient, StreamStatus, StreamStore, TrafficSample,
};
use proxyui_common::{LogLevel, SubscriptionUpdate};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Topic switches for `proxyui watch`
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub traffic: bool,
    pub connections: bool,
    pub logs: bool,
    pub mitm: bool,
    pub log_level: Option<LogLevel>,
}

impl WatchOptions {
    fn to_update(&self) -> SubscriptionUpdate {
        SubscriptionUpdate {
            traffic: Some(self.traffic),
            connections: Some(self.connections),
            logs: Some(self.logs),
            mitm: Some(self.mitm),
            log_level: self.log_level,
        }
    }
}

pub async fn run(config: &Config, opts: WatchOptions) -> Result<()> {
    let store = Arc::new(StreamStore::with_subscriptions(config.subscriptions()));
    let mut client = StreamClient::new(store.clone(), config.stream_options());
    let subscriptions = client.update_subscriptions(opts.to_update()).await;

    if subscriptions.topics().is_empty() {
        bail!("Nothing to watch: every topic is disabled");
    }

    let _traffic = store.subscribe_traffic(|sample| {
        println!("{}", style(traffic_line(sample)).dim());
    });

    let last_count = Arc::new(AtomicUsize::new(usize::MAX));
    let _connections = {
        let last_count = last_count.clone();
        store.subscribe_connections(move |list| {
            if last_count.swap(list.len(), Ordering::Relaxed) != list.len() {
                println!("{} {} active connections", style("◆").blue(), list.len());
            }
        })
    };

    let _logs = store.subscribe_logs(|entry| println!("{}", styled_log(entry)));

    let _mitm = store.subscribe_mitm(|exchange| {
        let line = exchange_line(exchange);
        if exchange.has_error {
            println!("{}", style(line).red());
        } else {
            println!("{}", line);
        }
    });

    println!(
        "Watching {} ({})",
        style(&config.api_url).cyan(),
        subscriptions
            .topics()
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("{}", style("Press Ctrl+C to stop").dim());

    client
        .connect(&config.api_url, config.secret())
        .await
        .context("Failed to start event stream")?;

    let mut status = client.watch_status();
    let rejected = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break false,
            changed = status.changed() => {
                if changed.is_err() {
                    break false;
                }
                let current = *status.borrow_and_update();
                print_status(current);
                if current == StreamStatus::Rejected {
                    break true;
                }
            }
        }
    };

    client.disconnect().await;

    if rejected {
        bail!("The backend rejected the secret. Run `proxyui login <url> --secret <secret>`");
    }

    print_summary(&store).await;
    Ok(())
}

fn print_status(status: StreamStatus) {
    match status {
        StreamStatus::Open => println!("{} Connected", style("●").green()),
        StreamStatus::Reconnecting => println!("{} Disconnected, retrying", style("●").yellow()),
        StreamStatus::Rejected => println!("{} Secret rejected", style("●").red()),
        other => tracing::debug!("Stream status: {}", other.as_str()),
    }
}

async fn print_summary(store: &StreamStore) {
    let traffic = store.traffic_history().await;
    let up: i64 = traffic.iter().map(|s| s.up).sum();
    let down: i64 = traffic.iter().map(|s| s.down).sum();

    println!();
    println!("Session summary:");
    println!(
        "  Traffic (last {} samples): ↑ {}  ↓ {}",
        traffic.len(),
        format_bytes(up.max(0) as u64),
        format_bytes(down.max(0) as u64)
    );
    println!("  Logs:      {}", store.logs().await.len());
    println!("  Exchanges: {}", store.mitm_exchanges().await.len());
}

fn traffic_line(sample: &TrafficSample) -> String {
    format!(
        "↑ {}/s  ↓ {}/s",
        format_bytes(sample.up.max(0) as u64),
        format_bytes(sample.down.max(0) as u64)
    )
}

fn styled_log(entry: &LogEntry) -> String {
    let tag = format!("[{:<5}]", entry.level);
    let tag = match entry.severity() {
        LogLevel::Error => style(tag).red(),
        LogLevel::Warn => style(tag).yellow(),
        LogLevel::Info => style(tag).green(),
        LogLevel::Debug => style(tag).dim(),
    };
    format!("{} #{} {}", tag, entry.session, entry.message)
}

fn exchange_line(exchange: &Exchange) -> String {
    let outcome = if exchange.has_error {
        exchange.error.clone()
    } else if exchange.has_response {
        exchange.status_code.to_string()
    } else {
        "pending".to_string()
    };

    format!(
        "{:<7} {} {} ({}ms)",
        exchange.method, outcome, exchange.url, exchange.duration
    )
}
