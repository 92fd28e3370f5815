//! Login command - save the backend address and secret

use anyhow::{bail, Result};
use console::style;
use proxyui_cli::api::ApiError;
use proxyui_cli::config::{self, Config};

pub async fn run(api_url: String, secret: Option<String>) -> Result<()> {
    let config = Config::load()?.with_overrides(Some(api_url), secret);
    let api = config.api_client()?;

    // Only a rejected secret aborts; an unreachable backend is saved anyway
    match api.fetch_configs().await {
        Ok(_) => {
            println!("{} Connected to {}", style("✓").green(), style(api.base_url()).cyan());
        }
        Err(ApiError::Unauthorized) => {
            bail!("The backend at {} rejected the secret", api.base_url());
        }
        Err(e) => {
            tracing::warn!("Could not verify backend: {}", e);
            println!(
                "{} Saved without verification; {} is not reachable right now",
                style("!").yellow(),
                api.base_url()
            );
        }
    }

    config.save()?;
    println!("  Configuration written to {}", style(config::config_file().display()).dim());

    Ok(())
}
