use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rltrader::agent::DqnAgent;
use rltrader::backtest::{
    default_grid, print_sweep_table, rank_by_sharpe, run_sweep, BacktestRunner,
};
use rltrader::config::BotConfig;
use rltrader::data::{prepare_candles, MarketScenario, RedisCandleStore, SyntheticDataGenerator};
use rltrader::execution::{Exchange, LiveExecutor, PaperExchange, RestExchangeClient};
use rltrader::features::FeaturePipeline;
use rltrader::live::LiveRunner;
use rltrader::models::Candle;
use rltrader::risk::MaturityLevel;
use rltrader::training::Trainer;

#[derive(Parser)]
#[command(name = "rltrader")]
#[command(about = "Reinforcement-learning trading engine", version, arg_required_else_help = true)]
struct Cli {
    /// TOML config file; RLTRADER_* env vars override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a DQN agent and write checkpoints
    Train {
        #[command(flatten)]
        data: DataArgs,
        /// Override `train_episodes`
        #[arg(long)]
        episodes: Option<usize>,
    },
    /// Replay the configured strategy over historical candles
    Backtest {
        #[command(flatten)]
        data: DataArgs,
    },
    /// Trade on a schedule until Ctrl+C
    Live {
        /// Paper trade over a synthetic feed instead of the configured exchange
        #[arg(long, value_enum)]
        synthetic: Option<MarketScenario>,
        /// Override `maturity_level`
        #[arg(long, value_enum)]
        maturity: Option<MaturityLevel>,
    },
    /// Backtest a grid of rule-strategy parameters in parallel
    Sweep {
        #[command(flatten)]
        data: DataArgs,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Rows to print
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

#[derive(Args)]
struct DataArgs {
    /// Generate candles for this scenario
    #[arg(long, value_enum, conflicts_with = "redis")]
    synthetic: Option<MarketScenario>,
    /// Load candles from the Redis candle store
    #[arg(long)]
    redis: bool,
    /// Number of candles
    #[arg(long, default_value_t = 2_000)]
    candles: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = BotConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Train { data, episodes } => train(config, &data, episodes).await,
        Command::Backtest { data } => backtest(config, &data).await,
        Command::Live { synthetic, maturity } => live(config, synthetic, maturity).await,
        Command::Sweep { data, workers, top } => sweep(config, &data, workers, top).await,
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rltrader=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn load_candles(config: &BotConfig, data: &DataArgs) -> Result<Vec<Candle>> {
    let candles = if data.redis {
        let mut store = RedisCandleStore::new(&config.redis_url)
            .await
            .context("Failed to connect to Redis")?;
        let to = Utc::now();
        let from = to - ChronoDuration::seconds(config.timeframe.as_secs() * data.candles as i64);
        store
            .load_range(&config.symbol, config.timeframe, from, to)
            .await
            .with_context(|| format!("Failed to load {} candles from Redis", config.symbol))?
    } else {
        let scenario = data.synthetic.unwrap_or(MarketScenario::Sideways);
        tracing::info!("📈 Generating {} synthetic {:?} candles", data.candles, scenario);
        SyntheticDataGenerator::new(config.seed).generate(
            scenario,
            data.candles,
            config.timeframe.as_secs(),
        )
    };

    let candles = prepare_candles(candles, config.timeframe, config.interpolate_gaps)
        .context("Candle history failed validation")?;
    if candles.len() <= config.lookback_window {
        bail!(
            "Need more than {} candles, got {}",
            config.lookback_window,
            candles.len()
        );
    }
    Ok(candles)
}

async fn train(mut config: BotConfig, data: &DataArgs, episodes: Option<usize>) -> Result<()> {
    if let Some(episodes) = episodes {
        config.train_episodes = episodes;
    }
    let candles = load_candles(&config, data).await?;

    let pipeline = FeaturePipeline::new(config.feature_config());
    let agent = DqnAgent::new(config.agent_config(pipeline.state_size()));
    let mut trainer = Trainer::new(
        pipeline,
        config.env_config(),
        config.risk_limits(),
        config.trainer_config(),
        agent,
    );

    tracing::info!("🧠 Training DQN on {} ({})", config.symbol, config.timeframe);
    let report = trainer.train(&candles).context("Training failed")?;

    match report.best_validation_return {
        Some(best) => tracing::info!("🏆 Best validation return: {:+.2}%", best * 100.0),
        None => tracing::info!("No validation window, best model is the final model"),
    }
    if let Some(best) = &report.best_model {
        tracing::info!("  Best model:  {}", best.display());
    }
    tracing::info!("  Final model: {}", report.final_model.display());
    Ok(())
}

async fn backtest(config: BotConfig, data: &DataArgs) -> Result<()> {
    let candles = load_candles(&config, data).await?;
    let runner = BacktestRunner::new(
        FeaturePipeline::new(config.feature_config()),
        config.env_config(),
        config.risk_limits(),
        config.timeframe,
    );
    let mut policy = config
        .strategy
        .build(runner.pipeline().state_size())
        .with_context(|| format!("Failed to build {} strategy", config.strategy.name()))?;

    runner.run_and_report(policy.as_mut(), &candles)?;
    Ok(())
}

async fn sweep(config: BotConfig, data: &DataArgs, workers: usize, top: usize) -> Result<()> {
    let candles = load_candles(&config, data).await?;
    let runner = BacktestRunner::new(
        FeaturePipeline::new(config.feature_config()),
        config.env_config(),
        config.risk_limits(),
        config.timeframe,
    );

    let grid = default_grid();
    tracing::info!("🔬 Sweeping {} configurations on {} workers", grid.len(), workers);
    let mut entries = run_sweep(&runner, &candles, &grid, workers)?;
    rank_by_sharpe(&mut entries);
    print_sweep_table(&entries[..top.min(entries.len())]);
    Ok(())
}

async fn live(
    mut config: BotConfig,
    synthetic: Option<MarketScenario>,
    maturity: Option<MaturityLevel>,
) -> Result<()> {
    if let Some(maturity) = maturity {
        config.maturity_level = maturity;
    }

    let mut feed = None;
    let exchange: Arc<dyn Exchange> = match (&config.exchange_url, synthetic) {
        (Some(url), None) => {
            let api_key = config.exchange_api_key.clone().unwrap_or_default();
            Arc::new(
                RestExchangeClient::new(url, &api_key, config.exchange_rate_limit_per_sec)
                    .context("Failed to build exchange client")?,
            )
        }
        (_, scenario) => {
            let scenario = scenario.unwrap_or(MarketScenario::Sideways);
            let paper = Arc::new(PaperExchange::new(config.initial_balance, config.commission_fee));
            let history = config.history_candles.max(config.lookback_window);
            let step = config.timeframe.as_secs();
            let start = Utc::now() - ChronoDuration::seconds(step * history as i64);
            let mut candles = SyntheticDataGenerator::new(config.seed)
                .with_start_time(start)
                .generate(scenario, history + 10_000, step);
            let upcoming = candles.split_off(history);
            paper.set_candles(&config.symbol, candles).await;
            tracing::info!("📝 Paper trading over a synthetic {:?} feed", scenario);
            feed = Some(spawn_synthetic_feed(
                paper.clone(),
                config.symbol.clone(),
                upcoming,
                Duration::from_secs(config.check_interval),
            ));
            paper
        }
    };

    let pipeline = FeaturePipeline::new(config.feature_config());
    let policy = config
        .strategy
        .build(pipeline.state_size())
        .with_context(|| format!("Failed to build {} strategy", config.strategy.name()))?;

    let mut runner = LiveRunner::new(
        config.live_config(),
        pipeline,
        config.risk_limits(),
        LiveExecutor::new(exchange, config.retry_policy()),
        policy,
        config.initial_balance,
    );

    let control = runner.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("⚠️  Received Ctrl+C, stopping after the current cycle...");
            control.stop();
        }
    });
    tracing::info!("Press Ctrl+C to stop...");

    let result = runner.run().await;
    if let Some(feed) = feed {
        feed.abort();
    }

    let status = runner.status().get();
    if let Some(portfolio) = status.portfolio {
        tracing::info!(
            "💼 Final equity ${:.2} (realized {:+.2}, unrealized {:+.2})",
            portfolio.total_value,
            portfolio.realized_pnl,
            portfolio.unrealized_pnl
        );
    }
    result.context("Live trading failed")
}

/// Release one synthetic candle per interval into the paper exchange
fn spawn_synthetic_feed(
    paper: Arc<PaperExchange>,
    symbol: String,
    candles: Vec<Candle>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        for candle in candles {
            ticker.tick().await;
            paper.push_candle(&symbol, candle).await;
        }
    })
}
