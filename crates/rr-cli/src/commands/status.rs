//! Status command for showing configuration and stored rules.

use std::io::Write;

use anyhow::{Context, Result};
use rr_core::Scope;
use rr_db::RuleStore;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config, store: &RuleStore) -> Result<()> {
    let records = store.list().context("failed to list rules")?;
    let count = |scope: Scope| records.iter().filter(|r| r.scope == scope).count();

    writeln!(writer, "ringring status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    writeln!(
        writer,
        "Rules: {} ({} guild, {} category, {} channel)",
        records.len(),
        count(Scope::Guild),
        count(Scope::Category),
        count(Scope::Channel)
    )?;

    if config.webhooks.is_empty() {
        writeln!(writer, "Webhooks: none configured")?;
    } else {
        let channels: Vec<&str> = config.webhooks.keys().map(String::as_str).collect();
        writeln!(writer, "Webhooks: {}", channels.join(", "))?;
    }

    writeln!(
        writer,
        "Refresh: every {}s, at most once per {}s",
        config.refresh_interval_secs, config.refresh_cooldown_secs
    )?;
    writeln!(
        writer,
        "Close: after {}s empty, {} attempts starting {}s apart",
        config.close_grace_secs, config.close_retry_attempts, config.close_retry_initial_delay_secs
    )?;
    match &config.avatar_url {
        Some(template) if config.avatar_required => writeln!(writer, "Avatars: {template} (required)")?,
        Some(template) => writeln!(writer, "Avatars: {template}")?,
        None => writeln!(writer, "Avatars: disabled")?,
    }

    Ok(())
}
