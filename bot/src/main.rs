//! Rookery - lichess bot driver
//!
//! Connects a bot account to the lichess event stream and plays every
//! accepted challenge with its own engine instance:
//! - `rookery play --engine /usr/bin/stockfish` plays up to `--concurrency` games at once
//! - `rookery play --manual` plays one game at a time with moves typed on stdin
//! - `rookery upgrade` turns the account into a bot account (one-off)

mod credentials;
mod lichess;
mod manual;
mod uci;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use lichess::{LichessClient, LICHESS_URL};
use manual::ManualFactory;
use rookery_core::{BotConfig, ChallengePolicy, Dispatcher, PoolConfig, SessionConfig, SessionLauncher};
use rookery_env::{EnvError, OracleFactory, ThinkBudget, TokioContext, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uci::UciFactory;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "rookery", version)]
#[command(about = "Play lichess challenges with a UCI engine", long_about = None)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Personal access token (otherwise read from --token-file)
    #[arg(long, env = "LICHESS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[arg(long, default_value = credentials::TOKEN_FILE, global = true)]
    token_file: PathBuf,

    #[arg(long, env = "LICHESS_URL", default_value = LICHESS_URL, global = true)]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept challenges and play them
    Play(PlayArgs),

    /// Upgrade the account to a bot account (cannot be undone)
    Upgrade,
}

#[derive(Args, Debug)]
struct PlayArgs {
    /// UCI engine executable
    #[arg(long, required_unless_present = "manual", conflicts_with = "manual")]
    engine: Option<PathBuf>,

    /// Extra arguments for the engine
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// UCI options as name=value
    #[arg(long = "uci-option")]
    uci_options: Vec<String>,

    /// Type moves on stdin instead of running an engine (one game at a time)
    #[arg(long)]
    manual: bool,

    /// Games played at once
    #[arg(short, long, default_value = "5")]
    concurrency: usize,

    /// Account name; looked up from the token when omitted
    #[arg(long)]
    username: Option<String>,

    /// Fraction of the remaining clock spent per move
    #[arg(long, default_value = "0.025")]
    think_proportion: f64,

    /// Thinking time for the first move as White, in seconds
    #[arg(long, default_value = "5")]
    opening_secs: u64,

    /// Extra seconds past the budget before the engine is given up on
    #[arg(long, default_value = "10")]
    grace_secs: u64,

    /// Minimum spacing between two accepts, in milliseconds
    #[arg(long, default_value = "500")]
    settle_ms: u64,

    /// Do not greet the opponent
    #[arg(long)]
    no_greeting: bool,

    /// Do not post progress lines after each move
    #[arg(long)]
    quiet: bool,

    /// Accepted variant keys
    #[arg(long, value_delimiter = ',', default_value = "standard")]
    variants: Vec<String>,

    #[arg(long)]
    no_rated: bool,

    #[arg(long)]
    no_casual: bool,
}

impl PlayArgs {
    fn bot_config(&self, username: String) -> BotConfig {
        let greeting = (!self.no_greeting).then(|| SessionConfig::default().greeting).flatten();
        let mut session = SessionConfig::for_user(username)
            .with_think_proportion(self.think_proportion)
            .with_greeting(greeting)
            .with_progress_reports(!self.quiet)
            .with_hard_timeout_grace(Duration::from_secs(self.grace_secs));
        session.opening_budget = ThinkBudget::from_secs(self.opening_secs);

        // Manual play shares one terminal
        let capacity = if self.manual { 1 } else { self.concurrency };

        BotConfig {
            session,
            pool: PoolConfig::default()
                .with_capacity(capacity)
                .with_settle_interval(Duration::from_millis(self.settle_ms)),
            policy: ChallengePolicy {
                variants: self.variants.clone(),
                accept_rated: !self.no_rated,
                accept_casual: !self.no_casual,
            },
        }
    }

    fn uci_factory(&self, engine: PathBuf) -> Result<UciFactory> {
        let mut factory = UciFactory::new(engine).with_args(self.engine_args.clone());
        for option in &self.uci_options {
            let (name, value) = option
                .split_once('=')
                .with_context(|| format!("UCI option {option:?} is not name=value"))?;
            factory = factory.with_option(name.trim(), value.trim());
        }
        Ok(factory)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let token = credentials::load_token(cli.token.as_deref(), &cli.token_file)
        .context("no lichess access token")?;
    let client = Arc::new(LichessClient::new(&cli.base_url, token)?);

    match cli.command {
        Command::Upgrade => {
            client
                .upgrade_to_bot()
                .await
                .context("account upgrade refused")?;
            info!("Account upgraded to a bot account");
            Ok(())
        }
        Command::Play(args) => {
            let username = match &args.username {
                Some(name) => name.clone(),
                None => {
                    let account = client.account().await.context("account lookup failed")?;
                    if !account.is_bot() {
                        warn!("{} is not a bot account; run `rookery upgrade` first", account.username);
                    }
                    account.username
                }
            };
            info!("Playing as {}", username);
            let config = args.bot_config(username);

            match &args.engine {
                Some(engine) => {
                    let factory = args.uci_factory(engine.clone())?;
                    info!("Engine: {}", factory.describe());
                    play(client, Arc::new(factory), config).await
                }
                None => play(client, Arc::new(ManualFactory), config).await,
            }
        }
    }
}

async fn play<F: OracleFactory>(client: Arc<LichessClient>, factory: Arc<F>, config: BotConfig) -> Result<()> {
    let mut dispatcher = Dispatcher::with_sessions(TokioContext::shared(), client.clone(), factory, config);

    let result = tokio::select! {
        result = serve(&client, &mut dispatcher) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, finishing running games");
            Ok(())
        }
    };

    dispatcher.drain().await;
    let stats = dispatcher.stats();
    info!(
        "Handled {} events: {} offers, {} declined, {} games finished",
        stats.events, stats.offers, stats.declined, stats.games_finished
    );
    result
}

/// Keeps the event stream open, reconnecting with exponential backoff.
///
/// The dispatcher and its pool outlive each connection, so running games
/// carry on while the account stream is re-established.
async fn serve<F: OracleFactory>(
    client: &LichessClient,
    dispatcher: &mut Dispatcher<TokioContext, LichessClient, SessionLauncher<LichessClient, F>>,
) -> Result<()> {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let outcome = match client.stream_events().await {
            Ok(events) => {
                info!("Connected to event stream");
                let outcome = dispatcher.run_stream(events).await;
                // The stream was up, so the next failure starts a fresh backoff
                backoff = INITIAL_BACKOFF;
                outcome
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                info!("Event stream closed by server, reconnecting");
                tokio::time::sleep(INITIAL_BACKOFF).await;
            }
            Err(EnvError::Rejected { status: 401, .. }) => bail!("access token rejected"),
            Err(e) => {
                error!("Event stream failed: {}; retrying in {:?}", e, backoff);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}
