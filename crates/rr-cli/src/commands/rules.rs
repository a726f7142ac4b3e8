//! Rule management commands.

use std::io::Write;

use anyhow::{Context, Result};
use rr_core::{ChannelHierarchy, Rule, Scope};
use rr_db::{RuleRecord, RuleStore};
use serde::Serialize;

pub fn set<W: Write>(writer: &mut W, store: &mut RuleStore, scope: Scope, id: u64, rule: &Rule) -> Result<()> {
    store
        .save(scope, id, rule)
        .with_context(|| format!("failed to save rule for {scope} {id}"))?;
    writeln!(writer, "Saved {scope} {id}: {}", describe(rule))?;
    Ok(())
}

pub fn remove<W: Write>(writer: &mut W, store: &mut RuleStore, scope: Scope, id: u64) -> Result<()> {
    if store.delete(scope, id)? {
        writeln!(writer, "Removed rule for {scope} {id}")?;
    } else {
        writeln!(writer, "No rule for {scope} {id}")?;
    }
    Ok(())
}

#[derive(Serialize)]
struct RuleRow<'a> {
    scope: Scope,
    id: u64,
    #[serde(flatten)]
    rule: &'a Rule,
    updated_at: &'a str,
}

impl<'a> From<&'a RuleRecord> for RuleRow<'a> {
    fn from(record: &'a RuleRecord) -> Self {
        Self {
            scope: record.scope,
            id: record.id,
            rule: &record.rule,
            updated_at: &record.updated_at,
        }
    }
}

pub fn list<W: Write>(writer: &mut W, store: &RuleStore, json: bool) -> Result<()> {
    let records = store.list().context("failed to list rules")?;

    if json {
        let rows: Vec<RuleRow<'_>> = records.iter().map(RuleRow::from).collect();
        writeln!(writer, "{}", serde_json::to_string_pretty(&rows)?)?;
        return Ok(());
    }

    if records.is_empty() {
        writeln!(writer, "No rules configured.")?;
        return Ok(());
    }
    for record in &records {
        writeln!(
            writer,
            "{:<8} {:<20} {}",
            record.scope.as_str(),
            record.id,
            describe(&record.rule)
        )?;
    }
    Ok(())
}

pub fn resolve<W: Write>(writer: &mut W, store: &RuleStore, hierarchy: &ChannelHierarchy) -> Result<()> {
    let (rule, scope) = store
        .scoped_effective_rule(hierarchy)
        .context("failed to resolve rule")?;
    writeln!(
        writer,
        "Channel {} uses the {scope} rule: {}",
        hierarchy.channel,
        describe(&rule)
    )?;
    Ok(())
}

fn describe(rule: &Rule) -> String {
    if !rule.enabled {
        return "disabled".to_string();
    }
    let target = rule
        .notification_channel
        .map_or_else(|| "(no channel)".to_string(), |channel| format!("#{channel}"));
    format!(
        "enabled -> {target} history={} user={} channel={}",
        rule.history, rule.user_format, rule.channel_format
    )
}
