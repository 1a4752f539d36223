//! `ima-copilot config` - print the effective configuration without secrets.

use std::path::Path;

use anyhow::Result;

use ima_copilot::config::ConfigSummary;

pub async fn run(config_path: &Path, format: &str) -> Result<()> {
    let config = super::load_config(config_path).await?;
    let summary = config.summary();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => render_text(&summary),
    }
    Ok(())
}

fn render_text(summary: &ConfigSummary) {
    println!("ima-copilot configuration");
    println!("{}", "=".repeat(50));
    println!("  base url:          {}", summary.base_url);
    println!("  client id:         {}", summary.client_id);
    println!("  knowledge base:    {}", summary.knowledge_base_id);
    println!("  full cookies:      {}", yes_no(summary.has_full_cookies));
    println!();
    println!("  question timeout:  {}s", summary.question_timeout_seconds);
    println!("  ready timeout:     {}s", summary.ready_timeout_seconds);
    println!("  initial silence:   {}s", summary.initial_timeout_seconds);
    println!("  chunk idle:        {}s", summary.chunk_timeout_seconds);
    println!("  max attempts:      {}", summary.max_attempts);
    println!(
        "  proxy:             {}",
        summary.proxy.as_deref().unwrap_or("none")
    );
    println!();
    println!("  raw trace:         {}", yes_no(summary.raw_trace_enabled));
    if summary.raw_trace_enabled {
        println!("  raw trace dir:     {}", summary.raw_trace_dir.display());
        println!("  trace successes:   {}", yes_no(summary.raw_trace_on_success));
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
