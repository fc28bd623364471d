use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{BotConfig, BotState, Config, EngineState};
use engine::Engine;
use execution::ExecutionRouter;
use filters::FilterService;
use gateway::BinanceUsClient;
use paper::PaperClient;
use persistence::{BotConfigRepo, BotStateRepo, LotRepo, OrderRepo, PairRepo, PositionRepo, SignalRepo};
use risk::RiskManager;
use strategy::{PlaybookParams, StrategyRegistry};

const PLAYBOOK_CONFIG_PATH_DEFAULT: &str = "config/playbooks.toml";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cfg = Config::from_env();
    info!(mode = %cfg.trading_mode, tier = ?cfg.signal_tier, "spotbotd starting");

    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to database: {e}"));
    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .unwrap_or_else(|e| panic!("database migration failed: {e}"));
    info!("database ready");

    // ── Persistence repos ─────────────────────────────────────────────────
    let bot_config_repo = BotConfigRepo::new(db.clone());
    let bot_state_repo = BotStateRepo::new(db.clone());
    let pair_repo = PairRepo::new(db.clone());
    let signal_repo = SignalRepo::new(db.clone());
    let order_repo = OrderRepo::new(db.clone());
    let position_repo = PositionRepo::new(db.clone());
    let lot_repo = LotRepo::new(db.clone());

    // ── Config & state, seeded from the last persisted snapshot if any ────
    let bot_config = bot_config_repo
        .load()
        .await
        .unwrap_or_else(|e| panic!("failed to load bot config: {e}"))
        .unwrap_or_else(|| BotConfig::for_tier(cfg.signal_tier, cfg.universe.clone()));
    if let Err(e) = bot_config_repo.save(&bot_config).await {
        warn!(error = %e, "failed to persist initial bot config");
    }
    let config = Arc::new(RwLock::new(bot_config.clone()));

    let bot_state = bot_state_repo
        .load()
        .await
        .unwrap_or_else(|e| panic!("failed to load bot state: {e}"))
        .unwrap_or_else(|| BotState::new(10_000.0));
    let state = Arc::new(RwLock::new(bot_state));

    // ── Exchange client, live or paper depending on TRADING_MODE ──────────
    let live_client: Arc<dyn common::ExchangeClient> = Arc::new(BinanceUsClient::new(
        cfg.binance_us_api_key.clone(),
        cfg.binance_us_api_secret.clone(),
        cfg.binance_us_base_url.clone(),
    ));
    let exchange_client: Arc<dyn common::ExchangeClient> = match cfg.trading_mode {
        common::TradingMode::Live => {
            info!("live trading mode — orders reach the venue");
            live_client
        }
        common::TradingMode::Paper => {
            info!(slippage_bps = cfg.paper_slippage_bps, "paper trading mode — orders are simulated");
            Arc::new(PaperClient::new(live_client, 10_000.0, cfg.paper_slippage_bps))
        }
    };

    let filters = Arc::new(FilterService::new());

    let playbook_params = if std::path::Path::new(PLAYBOOK_CONFIG_PATH_DEFAULT).exists() {
        PlaybookParams::load(PLAYBOOK_CONFIG_PATH_DEFAULT)
    } else {
        PlaybookParams::default()
    };
    let registry = StrategyRegistry::from_config(&bot_config, playbook_params);

    // ── Channels wiring strategy → risk → execution, and back ─────────────
    let (signal_tx, signal_rx) = mpsc::channel::<common::Signal>(128);
    let (market_tx, _) = broadcast::channel::<common::MarketEvent>(1024);
    let (risk_event_tx, mut risk_event_rx) = broadcast::channel::<common::RiskEvent>(256);
    let (approved_tx, approved_rx) = mpsc::channel::<risk::ApprovedSignal>(64);
    let (close_tx, close_rx) = mpsc::channel::<risk::ClosePositionRequest>(64);
    let (position_tx, position_rx) = mpsc::channel::<common::Position>(64);
    let (closed_tx, closed_rx) = mpsc::channel::<String>(64);
    let market_rx_risk = market_tx.subscribe();

    let risk_manager = RiskManager::new(
        config.clone(),
        state.clone(),
        signal_rx,
        position_rx,
        market_rx_risk,
        closed_rx,
        approved_tx,
        close_tx,
        risk_event_tx.clone(),
    );

    let router = ExecutionRouter::new(
        exchange_client.clone(),
        filters.clone(),
        order_repo,
        position_repo,
        lot_repo,
        state.clone(),
        approved_rx,
        close_rx,
        position_tx,
        closed_tx,
        risk_event_tx.clone(),
    );

    let (engine, engine_handle) = Engine::new(
        exchange_client.clone(),
        filters.clone(),
        registry,
        config.clone(),
        state.clone(),
        bot_state_repo,
        signal_repo,
        pair_repo,
        signal_tx,
        market_tx,
        risk_event_tx.clone(),
        bot_config.universe.clone(),
        cfg.binance_us_ws_url.clone(),
    );

    // ── Risk event log: every stop/target/kill-switch event is logged with
    // the same structured fields an operator dashboard would read back from
    // `persistence::SignalRepo`/`PositionRepo`; no notification channel is
    // part of this core (spec.md §1 non-goals).
    tokio::spawn(async move {
        loop {
            match risk_event_rx.recv().await {
                Ok(common::RiskEvent::StopLossTriggered { pair, close_price }) => {
                    warn!(pair, close_price, "stop-loss triggered");
                }
                Ok(common::RiskEvent::TargetTriggered { pair, close_price }) => {
                    info!(pair, close_price, "target triggered");
                }
                Ok(common::RiskEvent::TimeStopTriggered { pair, close_price }) => {
                    info!(pair, close_price, "time stop triggered");
                }
                Ok(common::RiskEvent::OrderFailed { pair, error }) => {
                    warn!(pair, error, "order failed");
                }
                Ok(common::RiskEvent::KillSwitchEngaged { reason }) => {
                    warn!(reason, "kill switch engaged");
                }
                Ok(common::RiskEvent::KillSwitchCleared) => {
                    info!("kill switch cleared");
                }
                Ok(common::RiskEvent::SignalApproved { signal, sizing }) => {
                    info!(pair = %signal.pair, playbook = %signal.playbook, notional = sizing.notional_quote, "signal approved");
                }
                Ok(common::RiskEvent::SignalRejected { signal, reason }) => {
                    info!(pair = %signal.pair, gate = %reason.gate, reason = %reason.reason, "signal rejected");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "risk event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    tokio::spawn(risk_manager.run());
    tokio::spawn(router.run());

    engine_handle.send(common::EngineCommand::Start).await;
    info!("all subsystems started, engine is running");

    tokio::signal::ctrl_c().await.unwrap_or_else(|e| panic!("failed to listen for shutdown signal: {e}"));
    info!("shutdown signal received, stopping engine");
    engine_handle.send(common::EngineCommand::Stop).await;
    while engine_handle.state().await != EngineState::Stopped {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    info!("spotbotd exited cleanly");
}
