use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rr_call::{AvatarCache, NotificationSink};
use rr_cli::commands::replay::{ReplayScript, TranscriptSink};
use rr_cli::commands::{render, replay, rules, status};
use rr_cli::{Cli, Commands, Config, RulesAction};
use rr_db::RuleStore;
use rr_webhook::{HttpAvatarSupplier, WebhookSink};

/// Load config and open the rule store, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(RuleStore, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let store = RuleStore::open(&config.database_path).context("failed to open database")?;
    Ok((store, config))
}

fn webhook_sink(config: &Config) -> Result<WebhookSink> {
    WebhookSink::new(config.webhook_routes()?).context("invalid webhook configuration")
}

fn avatar_cache(config: &Config) -> Result<Option<Arc<AvatarCache>>> {
    let Some(template) = &config.avatar_url else {
        return Ok(None);
    };
    let supplier = HttpAvatarSupplier::new(template.clone()).context("failed to build avatar client")?;
    Ok(Some(Arc::new(AvatarCache::new(
        Arc::new(supplier),
        Duration::from_secs(config.avatar_ttl_secs),
        config.avatar_cache_capacity,
    ))))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let mut stdout = io::stdout().lock();

    match &cli.command {
        Some(Commands::Status) => {
            let (store, config) = open_database(cli.config.as_deref())?;
            status::run(&mut stdout, &config, &store)?;
        }
        Some(Commands::Rules(action)) => {
            let (mut store, _config) = open_database(cli.config.as_deref())?;
            match action {
                RulesAction::Set { target, .. } => {
                    let rule = action.rule().context("missing rule flags")?;
                    rules::set(&mut stdout, &mut store, target.scope, target.id, &rule)?;
                }
                RulesAction::Remove { target } => {
                    rules::remove(&mut stdout, &mut store, target.scope, target.id)?;
                }
                RulesAction::List { json } => rules::list(&mut stdout, &store, *json)?,
                RulesAction::Resolve { .. } => {
                    let hierarchy = action.hierarchy().context("missing channel flags")?;
                    rules::resolve(&mut stdout, &store, &hierarchy)?;
                }
            }
        }
        Some(Commands::Render {
            request,
            output,
            post_to,
        }) => {
            let png = render::run(&mut stdout, request, output)?;
            if let Some(target) = post_to {
                let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
                let sink = webhook_sink(&config)?;
                let description = request
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let handle = render::post(&sink, *target, &description, png).await?;
                tracing::info!(message_id = %handle.message_id, "timeline posted");
            }
        }
        Some(Commands::Replay {
            script,
            dry_run,
            images,
        }) => {
            let (store, config) = open_database(cli.config.as_deref())?;
            let script = ReplayScript::load(script)?;
            let mut book = store.load_rule_book().context("failed to load rules")?;
            script.apply_rules(&mut book);
            let handler_config = config.handler_config()?;

            let summary = if *dry_run {
                if let Some(dir) = images {
                    std::fs::create_dir_all(dir)
                        .with_context(|| format!("failed to create {}", dir.display()))?;
                }
                let sink = Arc::new(TranscriptSink::new(images.clone()));
                let summary = replay::run(
                    &script,
                    Arc::new(book),
                    Arc::clone(&sink) as Arc<dyn NotificationSink>,
                    handler_config,
                    avatar_cache(&config)?,
                )
                .await?;
                sink.write_to(&mut stdout)?;
                summary
            } else {
                replay::run(
                    &script,
                    Arc::new(book),
                    Arc::new(webhook_sink(&config)?),
                    handler_config,
                    avatar_cache(&config)?,
                )
                .await?
            };
            writeln!(stdout, "{summary}")?;
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
