//! # sx-runner
//!
//! Paper-trading session: replays a tick file against the local connector
//! while scripted strategies open and close trades.
//!
//! ```text
//!   sx-md thread                        sx-strategy thread
//!   ────────────                        ──────────────────
//!   tick → market.set_price             dispatch signals
//!        → connector.update  ──clock──► due intents → managers
//!        ◄────────────── ack ────────── manager.process
//! ```
//!
//! The two threads run in lockstep so a replay is reproducible.
//!
//! # Usage
//!
//! ```bash
//! sx-runner config.json --ticks ticks.jsonl --script intents.json --trades-out trades.json
//! ```

mod replay;
mod script;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use sx_core::config::load_config;
use sx_core::cpu_affinity::maybe_bind;
use sx_core::logging::init_logging;
use sx_local::LocalConnector;
use sx_trade::{JsonTradeStore, TradeManager, TraderProxy};
use tracing::{error, info, warn};

use crate::script::{Desk, Script, ScriptedStrategy};

/// Trade execution runtime: local paper-trading replay.
#[derive(Parser)]
#[command(name = "sx-runner", about = "Trade execution runtime: local paper-trading replay")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Tick file (JSON lines).
    #[arg(long)]
    ticks: PathBuf,

    /// Intent script (JSON list).
    #[arg(long)]
    script: Option<PathBuf>,

    /// Trade store file: active trades are restored from it at start and
    /// saved to it at exit.
    #[arg(long)]
    trades_out: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    /// Pin the strategy thread to this CPU core.
    #[arg(long)]
    cpu_core: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Configuration and logging
    let config = load_config(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    init_logging(&cli.log_level, log_dir.as_deref(), "sx-runner", config.log_json());
    info!(
        "sx-runner starting, session={} config={} markets={} strategies={}",
        config.session_name(),
        cli.config.display(),
        config.markets.len(),
        config.strategies.len()
    );
    config.validate()?;

    // 2. Exchange and proxy
    let markets = Arc::new(config.market_registry());
    let connector = Arc::new(LocalConnector::new(&config.account, markets.clone()));
    let proxy = TraderProxy::new(connector.clone(), markets.clone());

    // 3. Strategies, with their persisted trades
    let store = match &cli.trades_out {
        Some(path) => JsonTradeStore::open(path)?,
        None => JsonTradeStore::default(),
    };
    let broker_id = config.broker_id();
    let mut desks = Vec::with_capacity(config.strategies.len());
    for sc in &config.strategies {
        let market = markets.get(&sc.market_id).ok_or_else(|| anyhow!("unknown market '{}'", sc.market_id))?;
        let strategy = Arc::new(ScriptedStrategy::new(sc, &broker_id, market));
        let manager = TradeManager::new(strategy.clone(), proxy.clone());
        let restored = manager.load_trades(&store)?;
        if restored > 0 {
            info!("[runner] {} restored {restored} trade(s)", sc.identifier);
        }
        desks.push(Desk {
            strategy,
            manager,
            timeframe: sc.effective_timeframe(),
            entry_timeout: sc.entry_timeout.unwrap_or(0.0),
        });
    }

    // 4. Inputs
    let ticks = replay::load_ticks(&cli.ticks)?;
    let mut script = match &cli.script {
        Some(path) => Script::load(path)?,
        None => Script::default(),
    };
    info!("[runner] {} tick(s), {} intent(s)", ticks.len(), script.len());

    // 5. Replay
    let (clock_tx, clock_rx) = crossbeam_channel::bounded::<f64>(0);
    let (ack_tx, ack_rx) = crossbeam_channel::bounded::<()>(0);

    let md = {
        let connector = connector.clone();
        let markets = markets.clone();
        thread::Builder::new().name("sx-md".into()).spawn(move || {
            let mut applied = 0usize;
            for tick in ticks {
                let Some(market) = markets.get(&tick.market_id) else {
                    warn!("[md] tick for unknown market '{}'", tick.market_id);
                    continue;
                };
                market.set_price(tick.bid, tick.ask, tick.timestamp);
                connector.update(tick.timestamp);
                applied += 1;
                if clock_tx.send(tick.timestamp).is_err() || ack_rx.recv().is_err() {
                    break;
                }
            }
            applied
        })?
    };

    let cpu_core = cli.cpu_core;
    let strategy_proxy = proxy.clone();
    let worker = thread::Builder::new().name("sx-strategy".into()).spawn(move || {
        maybe_bind(cpu_core);
        let mut last = 0.0;
        for timestamp in clock_rx {
            strategy_proxy.dispatch_signals();
            for intent in script.due(timestamp) {
                match desks.iter().find(|d| d.manager.strategy().identifier() == intent.strategy) {
                    Some(desk) => desk.apply(&intent),
                    None => warn!("[script] unknown strategy '{}'", intent.strategy),
                }
            }
            for desk in &desks {
                desk.expire_entries(timestamp);
            }
            strategy_proxy.dispatch_signals();
            for desk in &desks {
                desk.manager.process(timestamp);
            }
            last = timestamp;
            if ack_tx.send(()).is_err() {
                break;
            }
        }
        if !script.is_empty() {
            warn!("[script] {} intent(s) never reached", script.len());
        }
        (desks, last)
    })?;

    let applied = md.join().map_err(|_| anyhow!("market data thread panicked"))?;
    let (desks, last) = worker.join().map_err(|_| anyhow!("strategy thread panicked"))?;
    proxy.dispatch_signals();
    for desk in &desks {
        desk.manager.process(last);
    }
    info!("[runner] replayed {applied} tick(s)");

    // 6. Persist and report
    for desk in &desks {
        let id = desk.manager.strategy().identifier().to_owned();
        match desk.manager.save_trades(&store) {
            Ok(n) => info!("[runner] {id} saved {n} active trade(s)"),
            Err(e) => error!("[runner] {id} saving trades: {e}"),
        }
        let closed = desk.strategy.closed_trades();
        let wins = closed.iter().filter(|t| t.closed && t.profit_loss_rate > 0.0).count();
        let perf = desk.manager.compute_performance();
        info!(
            "[runner] {id} closed={} wins={wins} open={} perf={:.2}% dd={:.2}%",
            closed.len(),
            perf.actives + perf.pending,
            perf.performance * 100.0,
            perf.drawdown * 100.0
        );
        for t in &closed {
            info!(
                "[runner] {id} #{} {} {:.2}% {:?}",
                t.id,
                t.direction,
                t.profit_loss_rate * 100.0,
                t.exit_reason
            );
        }
    }
    if let Some(path) = &cli.trades_out {
        store.flush(path)?;
        info!("[runner] trade store written to {}", path.display());
    }

    let account = connector.account();
    info!(
        "[runner] balance={:.prec$} equity={:.prec$} max_dd={:.2}% ({:.prec$} {}) samples={}",
        account.balance,
        account.equity(),
        account.max_draw_down_rate * 100.0,
        account.max_draw_down,
        account.currency,
        account.samples().len(),
        prec = account.precision as usize,
    );
    let (orders, positions, trades) = proxy.pool_usage();
    info!("[runner] pools in use: orders={orders} positions={positions} trades={trades}");
    Ok(())
}
