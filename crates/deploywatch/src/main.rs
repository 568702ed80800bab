//! deploywatch: live terminal dashboard of deployment rollouts.
//!
//! Watches the given deployments (or every active deployment of an
//! application) and redraws one line per deployment and instance as
//! statuses change.
//!
//! # Usage
//!
//! ```text
//! deploywatch --fixture fleet.json d-ABC123 d-DEF456
//! deploywatch --fixture fleet.json -a web -g blue,green --compact
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Notify;
use tracing::info;

use deploywatch_core::{DisplayMode, StatusMode, WatchConfig};
use deploywatch_poller::{Scheduler, Watcher, render_channel};
use deploywatch_state::Aggregator;

mod fixture;
mod logging;
mod sink;

use fixture::FixtureService;
use sink::TerminalSink;

#[derive(Parser, Debug)]
#[command(
    name = "deploywatch",
    about = "Live dashboard of deployment rollouts",
    version
)]
struct Cli {
    /// Deployment ids to watch.
    #[arg(value_name = "DEPLOY_ID")]
    deployment_ids: Vec<String>,

    /// TOML config file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON document describing deployments, instances, and statuses.
    #[arg(long)]
    fixture: PathBuf,

    /// Watch every active deployment of this application.
    #[arg(short, long)]
    application: Option<String>,

    /// Restrict discovery to these deployment groups (comma separated).
    #[arg(short, long, value_delimiter = ',')]
    groups: Vec<String>,

    /// One line per instance.
    #[arg(long, conflicts_with = "verbose")]
    compact: bool,

    /// One line per instance plus its lifecycle events.
    #[arg(long)]
    verbose: bool,

    /// Leave succeeded instances off the dashboard.
    #[arg(long)]
    hide_succeeded: bool,

    /// Poll each instance on its own instead of in batches.
    #[arg(long)]
    per_instance: bool,

    /// Append logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Write log lines as JSON.
    #[arg(long, requires = "log_file")]
    log_json: bool,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Config file values with command-line overrides applied.
    fn watch_config(&self) -> anyhow::Result<WatchConfig> {
        let mut config = match &self.config {
            Some(path) => WatchConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => WatchConfig::default(),
        };

        if let Some(application) = &self.application {
            config.filter.application = Some(application.clone());
        }
        if !self.groups.is_empty() {
            config.filter.groups = self.groups.clone();
        }
        if self.compact {
            config.display.mode = DisplayMode::Compact;
        } else if self.verbose {
            config.display.mode = DisplayMode::Verbose;
        }
        if self.hide_succeeded {
            config.display.hide_succeeded = true;
        }
        if self.per_instance {
            config.poll.status_mode = StatusMode::PerInstance;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.watch_config()?;

    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    if cli.deployment_ids.is_empty() && config.filter.application.is_none() {
        anyhow::bail!("no deployment ids given and no application filter set");
    }
    config.validate().context("invalid configuration")?;

    if let Some(path) = &cli.log_file {
        logging::init(path, cli.log_json)?;
    }

    info!(
        deployments = cli.deployment_ids.len(),
        application = config.filter.application.as_deref().unwrap_or(""),
        fixture = %cli.fixture.display(),
        "deploywatch starting"
    );

    logging::install_panic_hook();

    // The dashboard must be up before any job runs.
    let sink = TerminalSink::stdout().context("failed to initialise the terminal")?;

    let scheduler = Arc::new(Scheduler::new());
    let (frames_tx, frames_rx) = render_channel();
    scheduler.register_dedup_consumer(frames_rx, sink);

    let service = Arc::new(FixtureService::new(&cli.fixture));
    let aggregator = Arc::new(Aggregator::new(config.display.clone()));
    let watcher = Arc::new(Watcher::new(service, aggregator, config, frames_tx)?);
    watcher.seed(cli.deployment_ids.iter().cloned());
    Arc::clone(&watcher).start(&scheduler);

    let quit = Arc::new(Notify::new());
    let notify = Arc::clone(&quit);
    scheduler.on_signal(tokio::signal::ctrl_c(), move || notify.notify_one());

    quit.notified().await;
    scheduler.shutdown();
    scheduler.wait().await;

    info!("deploywatch stopped");
    Ok(())
}
