use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use common::{
    BotConfig, BotState, BotStatus, EngineCommand, EngineState, ExchangeClient, MarketEvent,
    RiskEvent, Signal, SignalAction, SignalRecord,
};
use filters::FilterService;
use gateway::{ListenKeyKeeper, TickerStream};
use persistence::{BotStateRepo, PairRepo, SignalRepo};
use scanner::Scanner;
use strategy::StrategyRegistry;

use crate::scan;

const DEFAULT_SCAN_CADENCE: Duration = Duration::from_secs(60);
const DEFAULT_POSITION_MONITOR_CADENCE: Duration = Duration::from_secs(30);
const DEFAULT_FILTER_REFRESH_INTERVAL: Duration = Duration::from_secs(86_400);
const HEALTH_CHECK_CADENCE: Duration = Duration::from_secs(60);

/// Shared, long-lived state every supervisor task reads or writes. Held
/// behind an `Arc` so `Engine::start` can hand each spawned task its own
/// clone without threading a dozen separate parameters through.
struct Context {
    client: Arc<dyn ExchangeClient>,
    filters: Arc<FilterService>,
    scanner: Scanner,
    strategy: RwLock<StrategyRegistry>,
    config: Arc<RwLock<BotConfig>>,
    state: Arc<RwLock<BotState>>,
    bot_state_repo: BotStateRepo,
    signal_repo: SignalRepo,
    pair_repo: PairRepo,
    signal_tx: mpsc::Sender<Signal>,
    market_tx: broadcast::Sender<MarketEvent>,
    risk_event_tx: broadcast::Sender<RiskEvent>,
    universe: Vec<String>,
    base_ws_url: String,
    scan_cadence: Duration,
    position_monitor_cadence: Duration,
    filter_refresh_interval: Duration,
}

/// The engine supervisor (spec.md §4.7): owns the scan tick, the
/// position-monitor heartbeat, the market-data WebSocket reader, the
/// listen-key keepalive, the daily filter refresh, and a venue health
/// check. It does not itself size, gate, or route signals — those stay in
/// `risk` and `execution` — this is purely the task orchestrator.
pub struct Engine {
    ctx: Arc<Context>,
    command_rx: mpsc::Receiver<EngineCommand>,
    engine_state: Arc<RwLock<EngineState>>,
    tasks: Vec<JoinHandle<()>>,
}

/// A cloneable remote control for a running `Engine`: send lifecycle
/// commands and read back its current state without owning the supervisor.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    engine_state: Arc<RwLock<EngineState>>,
}

impl EngineHandle {
    pub async fn send(&self, command: EngineCommand) {
        if self.command_tx.send(command).await.is_err() {
            warn!("engine command channel closed, supervisor is no longer running");
        }
    }

    pub async fn state(&self) -> EngineState {
        *self.engine_state.read().await
    }
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        filters: Arc<FilterService>,
        strategy: StrategyRegistry,
        config: Arc<RwLock<BotConfig>>,
        state: Arc<RwLock<BotState>>,
        bot_state_repo: BotStateRepo,
        signal_repo: SignalRepo,
        pair_repo: PairRepo,
        signal_tx: mpsc::Sender<Signal>,
        market_tx: broadcast::Sender<MarketEvent>,
        risk_event_tx: broadcast::Sender<RiskEvent>,
        universe: Vec<String>,
        base_ws_url: impl Into<String>,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let engine_state = Arc::new(RwLock::new(EngineState::Stopped));

        let ctx = Arc::new(Context {
            client,
            filters,
            scanner: Scanner::new(),
            strategy: RwLock::new(strategy),
            config,
            state,
            bot_state_repo,
            signal_repo,
            pair_repo,
            signal_tx,
            market_tx,
            risk_event_tx,
            universe,
            base_ws_url: base_ws_url.into(),
            scan_cadence: DEFAULT_SCAN_CADENCE,
            position_monitor_cadence: DEFAULT_POSITION_MONITOR_CADENCE,
            filter_refresh_interval: DEFAULT_FILTER_REFRESH_INTERVAL,
        });

        let handle = EngineHandle {
            command_tx,
            engine_state: engine_state.clone(),
        };
        let engine = Self {
            ctx,
            command_rx,
            engine_state,
            tasks: Vec::new(),
        };
        (engine, handle)
    }

    /// Drive the command loop forever. Call inside `tokio::spawn`.
    pub async fn run(mut self) {
        info!("engine supervisor running");
        while let Some(command) = self.command_rx.recv().await {
            self.handle_command(command).await;
        }
        warn!("engine command channel closed, supervisor exiting");
        self.stop().await;
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Start => self.start().await,
            EngineCommand::Stop => self.stop().await,
            EngineCommand::Pause => self.set_state(EngineState::Paused).await,
            EngineCommand::Resume => {
                if *self.engine_state.read().await == EngineState::Paused {
                    self.set_state(EngineState::Running).await;
                }
            }
            EngineCommand::ResetHalt => self.reset_halt().await,
        }
    }

    async fn set_state(&self, next: EngineState) {
        *self.engine_state.write().await = next;
    }

    /// Clears an engaged kill switch. Independent of the supervisor's own
    /// `EngineState` — `BotStatus` (daily/weekly halt) and `EngineState`
    /// (stopped/running/paused) are separate axes.
    async fn reset_halt(&self) {
        let mut state = self.ctx.state.write().await;
        if state.status != BotStatus::Running {
            info!(previous = ?state.status, "operator cleared kill switch");
            state.status = BotStatus::Running;
            let snapshot = state.clone();
            drop(state);
            if let Err(e) = self.ctx.bot_state_repo.save(&snapshot).await {
                warn!(error = %e, "failed to persist cleared kill switch state");
            }
            let _ = self.ctx.risk_event_tx.send(RiskEvent::KillSwitchCleared);
        }
    }

    /// Subscribe the market stream, warm the filter cache, and spawn every
    /// long-running task (spec.md §4.7 "Supervisor lifecycle"). A no-op if
    /// already running.
    async fn start(&mut self) {
        if *self.engine_state.read().await == EngineState::Running {
            return;
        }

        if let Err(e) = self.ctx.filters.refresh(self.ctx.client.as_ref()).await {
            warn!(error = %e, "initial filter warm-up failed, starting with stale/empty filters");
        }

        self.tasks.push(tokio::spawn(
            TickerStream::new(
                self.ctx.base_ws_url.clone(),
                self.ctx.universe.clone(),
                self.ctx.market_tx.clone(),
            )
            .run(),
        ));
        self.tasks.push(tokio::spawn(ListenKeyKeeper::new(self.ctx.client.clone()).run()));
        self.tasks.push(tokio::spawn(run_daily_filter_refresh(self.ctx.clone())));
        self.tasks.push(tokio::spawn(run_history_ingest(self.ctx.clone())));
        self.tasks.push(tokio::spawn(run_signal_recorder(self.ctx.clone())));
        self.tasks
            .push(tokio::spawn(run_scan_loop(self.ctx.clone(), self.engine_state.clone())));
        self.tasks.push(tokio::spawn(run_position_monitor_loop(self.ctx.clone())));
        self.tasks.push(tokio::spawn(run_health_check_loop(self.ctx.clone())));

        self.set_state(EngineState::Running).await;
        info!(pairs = ?self.ctx.universe, "engine supervisor started");
    }

    /// Cancel every spawned task. In-flight HTTP calls are abandoned once
    /// their own 10s client timeout elapses; nothing here blocks on them.
    /// The WebSocket reader and listen-key keepalive die with their tasks,
    /// which is the abort-based analogue of spec.md's "close WebSocket,
    /// revoke listen-key" — `gateway::ListenKeyKeeper` keeps the active key
    /// private to its own loop, so there is nothing further to revoke here.
    async fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.set_state(EngineState::Stopped).await;
        info!("engine supervisor stopped");
    }
}

/// Folds every closed-candle market event (live ticks or synthetic
/// heartbeats, the latter filtered out inside `ingest_event`) into the
/// shared strategy registry's rolling history.
async fn run_history_ingest(ctx: Arc<Context>) {
    let mut market_rx = ctx.market_tx.subscribe();
    loop {
        match market_rx.recv().await {
            Ok(event) => ctx.strategy.write().await.ingest_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "history ingest lagged behind the market stream");
            }
            Err(broadcast::error::RecvError::Closed) => {
                warn!("market stream closed, history ingest task exiting");
                return;
            }
        }
    }
}

/// Persists every accepted or rejected signal candidate for replay and ML
/// labelling (spec.md §4.4 "Recording").
async fn run_signal_recorder(ctx: Arc<Context>) {
    let mut risk_rx = ctx.risk_event_tx.subscribe();
    loop {
        match risk_rx.recv().await {
            Ok(RiskEvent::SignalApproved { signal, .. }) => {
                let record = SignalRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    reason: signal.reason.clone(),
                    signal,
                    action: SignalAction::Executed,
                    recorded_at: Utc::now(),
                };
                if let Err(e) = ctx.signal_repo.insert(&record).await {
                    warn!(error = %e, "failed to persist approved signal");
                }
            }
            Ok(RiskEvent::SignalRejected { signal, reason }) => {
                let record = SignalRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    reason: signal.reason.clone(),
                    signal,
                    action: SignalAction::Skipped,
                    recorded_at: Utc::now(),
                };
                if let Err(e) = ctx.signal_repo.insert_rejected(&record, &reason).await {
                    warn!(error = %e, "failed to persist rejected signal");
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "signal recorder lagged behind risk events");
            }
            Err(broadcast::error::RecvError::Closed) => {
                warn!("risk event stream closed, signal recorder task exiting");
                return;
            }
        }
    }
}

/// Fires every `scan_cadence`; a lagging tick is skipped rather than
/// queued (spec.md §5 "scan tick soft timeout equal to the scan cadence").
async fn run_scan_loop(ctx: Arc<Context>, engine_state: Arc<RwLock<EngineState>>) {
    let mut ticker = tokio::time::interval(ctx.scan_cadence);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if *engine_state.read().await != EngineState::Running {
            continue;
        }
        if tokio::time::timeout(ctx.scan_cadence, run_scan_tick(&ctx)).await.is_err() {
            warn!("scan tick exceeded its cadence and was abandoned");
        }
    }
}

/// One full scan tick: fan the per-pair scan out in parallel so one pair's
/// failure never delays or aborts the others, forward every signal to
/// `risk`, then record the tick in `BotState`.
async fn run_scan_tick(ctx: &Arc<Context>) {
    let config = ctx.config.read().await.clone();

    let mut handles = Vec::with_capacity(ctx.universe.len());
    for pair in &ctx.universe {
        let ctx = ctx.clone();
        let pair = pair.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let signals = scan::scan_pair(ctx.client.as_ref(), &ctx.scanner, &ctx.strategy, &config, &pair).await;
            (pair, signals)
        }));
    }

    for handle in handles {
        let (pair, signals) = match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "scan tick task panicked for one pair");
                continue;
            }
        };
        for signal in signals {
            if ctx.signal_tx.send(signal).await.is_err() {
                warn!(pair, "risk channel closed, dropping generated signal");
            }
        }
    }

    let mut state = ctx.state.write().await;
    state.last_scan_at = Some(Utc::now());
    let snapshot = state.clone();
    drop(state);
    if let Err(e) = ctx.bot_state_repo.save(&snapshot).await {
        warn!(error = %e, "failed to persist last scan timestamp");
    }
}

/// Fires every `position_monitor_cadence`, re-publishing a price heartbeat
/// for the whole universe so stop/target/time-stop checks in `risk` keep
/// running even on a quiet pair (spec.md §4.7 "Position monitor").
async fn run_position_monitor_loop(ctx: Arc<Context>) {
    let mut ticker = tokio::time::interval(ctx.position_monitor_cadence);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        scan::publish_price_heartbeat(ctx.client.as_ref(), &ctx.market_tx, &ctx.universe).await;
    }
}

/// Refreshes the exchange filter cache once a day and persists the result,
/// closing the gap between `FilterService`'s in-memory cache and the
/// exchange-info row `persistence::PairRepo` exists to hold.
async fn run_daily_filter_refresh(ctx: Arc<Context>) {
    loop {
        match ctx.filters.refresh(ctx.client.as_ref()).await {
            Ok(()) => {
                let pairs = ctx.filters.list().await;
                if let Err(e) = ctx.pair_repo.replace_all(&pairs).await {
                    warn!(error = %e, "failed to persist refreshed exchange-info cache");
                }
            }
            Err(e) => warn!(error = %e, "exchange filter refresh failed, keeping stale filters"),
        }
        tokio::time::sleep(ctx.filter_refresh_interval).await;
    }
}

async fn run_health_check_loop(ctx: Arc<Context>) {
    let mut ticker = tokio::time::interval(HEALTH_CHECK_CADENCE);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(e) = ctx.client.ping().await {
            warn!(error = %e, "venue health check failed");
        }
    }
}
