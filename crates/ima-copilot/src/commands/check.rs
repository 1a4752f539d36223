//! `ima-copilot check` - verify credentials by obtaining a token.

use std::path::Path;

use anyhow::{Context, Result, bail};

use ima_copilot::ImaClient;

pub async fn run(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path).await?;
    let client = ImaClient::new(&config).context("failed to create client")?;

    if !client.ensure_ready().await {
        bail!(
            "token check failed within {}s; the browser session may have expired",
            config.ready_timeout_seconds
        );
    }

    println!("OK: token is valid");
    Ok(())
}
