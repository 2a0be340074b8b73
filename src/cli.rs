use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use console::Term;
use log::info;

use crate::aggregate::{StatePriorities, TieBreakPolicy};
use crate::auth::{CredentialStore, Token};
use crate::config::Config;
use crate::output;
use crate::providers::BitbucketClient;
use crate::refresh::{RefreshLoop, RefreshOutcome};
use crate::snapshot::Snapshot;
use crate::store::SnapshotStore;

#[derive(Parser)]
#[command(name = "pipewatch")]
#[command(author, version, about = "Bitbucket Pipelines branch status dashboard", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Args)]
struct RepoArgs {
    /// Opaque credential for the Basic authorization header
    #[arg(short = 't', long, env = "BITBUCKET_CREDENTIAL")]
    credential: Option<String>,

    #[arg(short, long)]
    workspace: Option<String>,

    #[arg(short, long)]
    repository: Option<String>,

    #[arg(short, long)]
    url: Option<String>,

    /// How many recent pipelines one refresh cycle covers
    #[arg(long)]
    window: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic refresh/render loop
    Watch {
        #[command(flatten)]
        repo: RepoArgs,

        /// Seconds between refreshes
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Run one refresh cycle, print the aggregate and exit
    Refresh {
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Drop the cached snapshot
    Clear {
        #[arg(short, long)]
        workspace: Option<String>,

        #[arg(short, long)]
        repository: Option<String>,
    },
}

/// Fully resolved runtime settings: config file values with CLI overrides.
struct Settings {
    workspace: String,
    repository: String,
    base_url: String,
    window: usize,
    interval_seconds: u64,
    min_step_duration: f64,
    policy: TieBreakPolicy,
    priorities: StatePriorities,
    credential: Option<String>,
}

impl Settings {
    fn resolve(config: Config, repo: &RepoArgs, interval: Option<u64>) -> Result<Self> {
        let workspace = repo
            .workspace
            .clone()
            .or(config.bitbucket.workspace)
            .ok_or_else(|| anyhow!("No workspace specified (use --workspace or a config file)"))?;
        let repository = repo
            .repository
            .clone()
            .or(config.bitbucket.repository)
            .ok_or_else(|| {
                anyhow!("No repository specified (use --repository or a config file)")
            })?;

        Ok(Self {
            workspace,
            repository,
            base_url: repo.url.clone().unwrap_or(config.bitbucket.base_url),
            window: repo.window.unwrap_or(config.refresh.window),
            interval_seconds: interval.unwrap_or(config.refresh.interval_seconds),
            min_step_duration: config.refresh.min_step_duration_seconds,
            policy: config.aggregation.policy,
            priorities: config.aggregation.priorities,
            credential: repo.credential.clone().or(config.bitbucket.credential),
        })
    }
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        match &self.command {
            Commands::Watch { repo, interval } => {
                let settings = Settings::resolve(config, repo, *interval)?;
                self.execute_watch(settings).await
            }
            Commands::Refresh { repo } => {
                let settings = Settings::resolve(config, repo, None)?;
                self.execute_refresh(settings).await
            }
            Commands::Clear {
                workspace,
                repository,
            } => {
                let repo = RepoArgs {
                    credential: None,
                    workspace: workspace.clone(),
                    repository: repository.clone(),
                    url: None,
                    window: None,
                };
                let settings = Settings::resolve(config, &repo, None)?;
                execute_clear(&settings)
            }
        }
    }

    async fn execute_refresh(&self, settings: Settings) -> Result<()> {
        let (mut refresh, credentials) = build_refresh_loop(&settings)?;
        credentials.get_or_prompt()?;

        let spinner = output::refresh_spinner(settings.window);
        let result = refresh.trigger_refresh().await;
        spinner.finish_and_clear();

        match result {
            Ok(RefreshOutcome::Completed(snapshot)) => self.emit(&snapshot, &settings),
            Ok(RefreshOutcome::Skipped) => Ok(()),
            Err(e) => Err(anyhow!("Was unable to update the state (reason: {e})")),
        }
    }

    fn emit(&self, snapshot: &Snapshot, settings: &Settings) -> Result<()> {
        if self.output.is_some() || self.pretty {
            let json_output = if self.pretty {
                serde_json::to_string_pretty(snapshot)?
            } else {
                serde_json::to_string(snapshot)?
            };

            if let Some(output_path) = &self.output {
                std::fs::write(output_path, json_output)?;
                info!("Snapshot written to: {}", output_path.display());
            } else {
                println!("{}", json_output);
            }
        } else {
            println!(
                "{}",
                output::render_snapshot(snapshot, &settings.workspace, &settings.repository)
            );
        }

        Ok(())
    }

    async fn execute_watch(&self, settings: Settings) -> Result<()> {
        let (mut refresh, credentials) = build_refresh_loop(&settings)?;
        credentials.get_or_prompt()?;

        let term = Term::stdout();

        // Render whatever the session already holds; refresh immediately
        // only when nothing is cached yet.
        match refresh.cached() {
            Some(snapshot) => render_to(&term, &snapshot, &settings)?,
            None => refresh_and_render(&mut refresh, &credentials, &settings, &term).await?,
        }

        let mut ticker = refresh_ticker(Duration::from_secs(settings.interval_seconds));
        ticker.tick().await; // the immediate first tick

        loop {
            ticker.tick().await;
            refresh_and_render(&mut refresh, &credentials, &settings, &term).await?;
        }
    }
}

/// Ticker driving the watch loop.
///
/// Ticks that pile up while a refresh cycle overruns the interval are
/// dropped, not replayed: a late cycle must not be chased by an immediate
/// extra refresh.
fn refresh_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker
}

fn build_refresh_loop(settings: &Settings) -> Result<(RefreshLoop, Arc<CredentialStore>)> {
    let credentials = Arc::new(CredentialStore::new(
        settings.credential.as_deref().map(Token::from),
    ));

    let client = BitbucketClient::new(
        &settings.base_url,
        settings.workspace.clone(),
        settings.repository.clone(),
        Arc::clone(&credentials),
        settings.window,
    )?;

    let store = SnapshotStore::for_repository(&settings.workspace, &settings.repository)?;

    let refresh = RefreshLoop::new(
        client,
        store,
        Arc::clone(&credentials),
        settings.policy,
        settings.priorities.clone(),
        settings.min_step_duration,
    );

    Ok((refresh, credentials))
}

/// One watch-loop iteration: ensure a credential, refresh, re-render.
///
/// Refresh failures are printed and swallowed; the periodic timer is the
/// retry mechanism. Only an unusable terminal (no way to re-prompt) is
/// fatal.
async fn refresh_and_render(
    refresh: &mut RefreshLoop,
    credentials: &CredentialStore,
    settings: &Settings,
    term: &Term,
) -> Result<()> {
    credentials.get_or_prompt()?;

    match refresh.trigger_refresh().await {
        Ok(RefreshOutcome::Completed(snapshot)) => render_to(term, &snapshot, settings)?,
        Ok(RefreshOutcome::Skipped) => {}
        Err(e) => eprintln!(
            "{}",
            output::bright_red(format!("Error: Was unable to update the state (reason: {e})"))
        ),
    }

    Ok(())
}

fn render_to(term: &Term, snapshot: &Snapshot, settings: &Settings) -> Result<()> {
    term.clear_screen()?;
    println!(
        "{}",
        output::render_snapshot(snapshot, &settings.workspace, &settings.repository)
    );
    Ok(())
}

fn execute_clear(settings: &Settings) -> Result<()> {
    let store = SnapshotStore::for_repository(&settings.workspace, &settings.repository)?;
    store.clear()?;
    info!(
        "Cleared cached snapshot for {}/{}",
        settings.workspace, settings.repository
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watch_ticker_drops_missed_ticks() {
        let mut ticker = refresh_ticker(Duration::from_millis(100));
        ticker.tick().await; // the immediate first tick

        // A refresh cycle that overruns three whole periods.
        tokio::time::sleep(Duration::from_millis(350)).await;

        // The piled-up ticks must be dropped: the next tick waits for the
        // upcoming period boundary instead of firing immediately.
        let waited = std::time::Instant::now();
        ticker.tick().await;
        assert!(
            waited.elapsed() >= Duration::from_millis(30),
            "missed ticks were replayed instead of dropped"
        );
    }
}
