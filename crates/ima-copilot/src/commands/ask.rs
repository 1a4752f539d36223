//! `ima-copilot ask` - ask one question.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use ima_copilot::{Answer, ImaClient};

pub async fn run(
    config_path: &Path,
    question: &str,
    timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }

    let config = super::load_config(config_path).await?;
    let client = ImaClient::new(&config).context("failed to create client")?;

    if !client.ensure_ready().await {
        bail!("could not obtain a valid token; check the credentials in the configuration");
    }

    let deadline = timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.question_timeout());
    let messages = client.ask(question, deadline).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
    } else {
        println!("{}", Answer::from_messages(&messages).render());
    }
    Ok(())
}
