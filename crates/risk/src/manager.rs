use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{info, warn};

use common::{
    BotConfig, BotState, BotStatus, CloseReason, MarketEvent, Position, RiskEvent, Signal,
};

use crate::gates::evaluate_pretrade_gates;
use crate::sizing::size_signal;
use crate::ApprovedSignal;

/// Sent to `execution` when a position needs to unwind: stop-loss, target,
/// a time stop, or an operator-triggered kill switch.
#[derive(Debug, Clone)]
pub struct ClosePositionRequest {
    pub position_id: String,
    pub pair: String,
    pub reason: CloseReason,
    pub price: f64,
}

/// Maximum age for an open position before the time stop forces an exit,
/// regardless of stop/target. Every playbook here is intraday; nothing
/// should sit open for days.
const TIME_STOP_HOURS: i64 = 48;

/// The gatekeeper between the strategy layer and the order executor.
///
/// ALL signals from strategy MUST pass through `run()` before reaching the
/// executor. No strategy or other module holds a direct reference to the
/// approved-signal channel. Every signal is sized with quarter-Kelly and
/// run through the pre-trade gate chain; every market tick marks open
/// positions and watches for stop/target/time-stop triggers.
pub struct RiskManager {
    config: Arc<RwLock<BotConfig>>,
    state: Arc<RwLock<BotState>>,
    signal_rx: mpsc::Receiver<Signal>,
    position_rx: mpsc::Receiver<Position>,
    market_rx: broadcast::Receiver<MarketEvent>,
    closed_rx: mpsc::Receiver<String>,
    approved_tx: mpsc::Sender<ApprovedSignal>,
    close_tx: mpsc::Sender<ClosePositionRequest>,
    risk_event_tx: broadcast::Sender<RiskEvent>,
    open_positions: HashMap<String, Position>,
    last_price: HashMap<String, f64>,
}

impl RiskManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<RwLock<BotConfig>>,
        state: Arc<RwLock<BotState>>,
        signal_rx: mpsc::Receiver<Signal>,
        position_rx: mpsc::Receiver<Position>,
        market_rx: broadcast::Receiver<MarketEvent>,
        closed_rx: mpsc::Receiver<String>,
        approved_tx: mpsc::Sender<ApprovedSignal>,
        close_tx: mpsc::Sender<ClosePositionRequest>,
        risk_event_tx: broadcast::Sender<RiskEvent>,
    ) -> Self {
        Self {
            config,
            state,
            signal_rx,
            position_rx,
            market_rx,
            closed_rx,
            approved_tx,
            close_tx,
            risk_event_tx,
            open_positions: HashMap::new(),
            last_price: HashMap::new(),
        }
    }

    /// Run the risk manager loop. Processes incoming signals, newly opened
    /// positions, and market price updates concurrently via
    /// `tokio::select!`.
    pub async fn run(mut self) {
        info!("RiskManager running");
        loop {
            tokio::select! {
                signal = self.signal_rx.recv() => {
                    match signal {
                        Some(sig) => self.handle_signal(sig).await,
                        None => {
                            warn!("signal channel closed, RiskManager exiting");
                            return;
                        }
                    }
                }
                position = self.position_rx.recv() => {
                    match position {
                        Some(position) => {
                            info!(pair = %position.pair, id = %position.id, "tracking new open position");
                            self.open_positions.insert(position.id.clone(), position);
                        }
                        None => {
                            warn!("position channel closed, RiskManager exiting");
                            return;
                        }
                    }
                }
                event = self.market_rx.recv() => {
                    match event {
                        Ok(event) => self.handle_market_event(&event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "RiskManager lagged behind market stream");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("market broadcast closed");
                            return;
                        }
                    }
                }
                closed = self.closed_rx.recv() => {
                    match closed {
                        Some(position_id) => self.remove_position(&position_id),
                        None => {
                            warn!("closed-position channel closed, RiskManager exiting");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_signal(&mut self, signal: Signal) {
        let config = self.config.read().await.clone();
        let state = self.state.read().await.clone();

        let sizing = size_signal(&signal, &state, config.max_exposure_pct);

        let open_positions: Vec<Position> = self.open_positions.values().cloned().collect();
        let now = Utc::now();
        let current_price = self.last_price.get(&signal.pair).copied().unwrap_or(signal.entry_price);

        match evaluate_pretrade_gates(&signal, &sizing, &config, &state, &open_positions, current_price, now) {
            Ok(()) => {
                info!(
                    pair = %signal.pair,
                    playbook = %signal.playbook,
                    notional = sizing.notional_quote,
                    "signal approved"
                );
                let _ = self.risk_event_tx.send(RiskEvent::SignalApproved {
                    signal: signal.clone(),
                    sizing: sizing.clone(),
                });
                if self.approved_tx.send(ApprovedSignal { signal, sizing }).await.is_err() {
                    warn!("execution channel closed, dropping approved signal");
                }
            }
            Err(reason) => {
                warn!(pair = %signal.pair, gate = %reason.gate, reason = %reason.reason, "signal rejected");
                let _ = self.risk_event_tx.send(RiskEvent::SignalRejected { signal, reason });
            }
        }
    }

    async fn handle_market_event(&mut self, event: &MarketEvent) {
        self.last_price.insert(event.pair.clone(), event.price);

        if !self.open_positions.values().any(|p| p.pair == event.pair) {
            return;
        }

        let mut to_close = Vec::new();
        for position in self.open_positions.values_mut().filter(|p| p.pair == event.pair) {
            position.mark(event.price);
            if let Some(reason) = trigger_reason(position, event.price) {
                to_close.push((position.id.clone(), position.pair.clone(), reason, event.price));
            }
        }

        for (position_id, pair, reason, price) in to_close {
            let risk_event = match reason {
                CloseReason::StopLoss => RiskEvent::StopLossTriggered { pair: pair.clone(), close_price: price },
                CloseReason::Target => RiskEvent::TargetTriggered { pair: pair.clone(), close_price: price },
                CloseReason::TimeStop => RiskEvent::TimeStopTriggered { pair: pair.clone(), close_price: price },
                CloseReason::Manual | CloseReason::KillSwitch => continue,
            };
            let _ = self.risk_event_tx.send(risk_event);
            if self
                .close_tx
                .send(ClosePositionRequest { position_id, pair, reason, price })
                .await
                .is_err()
            {
                warn!("execution channel closed, could not request position close");
            }
        }

        self.check_drawdown().await;
    }

    /// Compares the shared `BotState`'s daily/weekly R loss against the
    /// configured limits and engages the kill switch when breached, halting
    /// further signal acceptance until an operator clears it via
    /// `EngineCommand::ResetHalt`.
    async fn check_drawdown(&mut self) {
        let config = self.config.read().await.clone();
        let mut state = self.state.write().await;

        if state.status != BotStatus::Running {
            return;
        }

        if state.daily_pnl_r <= -config.daily_loss_limit_r {
            state.status = BotStatus::HaltedDaily;
            let _ = self.risk_event_tx.send(RiskEvent::KillSwitchEngaged {
                reason: format!(
                    "daily PnL {:.2}R breached the -{:.2}R limit",
                    state.daily_pnl_r, config.daily_loss_limit_r
                ),
            });
        } else if state.weekly_pnl_r <= -config.weekly_loss_limit_r {
            state.status = BotStatus::HaltedWeekly;
            let _ = self.risk_event_tx.send(RiskEvent::KillSwitchEngaged {
                reason: format!(
                    "weekly PnL {:.2}R breached the -{:.2}R limit",
                    state.weekly_pnl_r, config.weekly_loss_limit_r
                ),
            });
        }
    }

    /// Remove a closed position from tracking once `execution` confirms
    /// the close fill.
    pub fn remove_position(&mut self, position_id: &str) {
        self.open_positions.remove(position_id);
    }
}

/// Stop-loss, target, and time-stop checks for one mark. Stop and target
/// are directional on `position.side`; the time stop is side-agnostic.
fn trigger_reason(position: &Position, price: f64) -> Option<CloseReason> {
    use common::PositionSide::*;
    let hit_stop = match position.side {
        Long => price <= position.stop_price,
        Short => price >= position.stop_price,
    };
    if hit_stop {
        return Some(CloseReason::StopLoss);
    }

    if let Some(target) = position.target_price {
        let hit_target = match position.side {
            Long => price >= target,
            Short => price <= target,
        };
        if hit_target {
            return Some(CloseReason::Target);
        }
    }

    let age = Utc::now().signed_duration_since(position.opened_at);
    if age >= chrono::Duration::hours(TIME_STOP_HOURS) {
        return Some(CloseReason::TimeStop);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderSide, Playbook, PositionSide, PositionStatus};

    fn position(side: PositionSide, entry: f64, stop: f64, target: Option<f64>) -> Position {
        Position {
            id: "pos-1".to_string(),
            pair: "BTCUSDT".to_string(),
            side,
            playbook: Playbook::A,
            entry_order_id: "order-1".to_string(),
            entry_price: entry,
            current_price: entry,
            stop_price: stop,
            target_price: target,
            quantity: 1.0,
            unrealized_pnl: 0.0,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            close_reason: None,
            realized_pnl: None,
        }
    }

    fn signal() -> Signal {
        Signal {
            pair: "BTCUSDT".to_string(),
            playbook: Playbook::A,
            side: OrderSide::Buy,
            entry_price: 100.0,
            stop_price: 95.0,
            target_price: Some(115.0),
            is_event: false,
            reason: "test".to_string(),
            session_vwap: 100.0,
        }
    }

    fn market_event(pair: &str, price: f64) -> MarketEvent {
        MarketEvent {
            pair: pair.to_string(),
            price,
            open: price,
            high: price,
            low: price,
            volume: 100.0,
            is_candle_closed: true,
            timestamp: Utc::now(),
        }
    }

    fn make_manager() -> (
        RiskManager,
        mpsc::Sender<Signal>,
        mpsc::Sender<Position>,
        broadcast::Sender<MarketEvent>,
        mpsc::Receiver<ApprovedSignal>,
        mpsc::Receiver<ClosePositionRequest>,
        broadcast::Receiver<RiskEvent>,
        Arc<RwLock<BotState>>,
    ) {
        let config = Arc::new(RwLock::new(BotConfig::default()));
        let state = Arc::new(RwLock::new(BotState::new(10_000.0)));
        let (signal_tx, signal_rx) = mpsc::channel(32);
        let (position_tx, position_rx) = mpsc::channel(32);
        let (market_tx, market_rx) = broadcast::channel(64);
        let (_closed_tx, closed_rx) = mpsc::channel(32);
        let (approved_tx, approved_rx) = mpsc::channel(32);
        let (close_tx, close_rx) = mpsc::channel(32);
        let (risk_event_tx, risk_event_rx) = broadcast::channel(64);

        let manager = RiskManager::new(
            config.clone(),
            state.clone(),
            signal_rx,
            position_rx,
            market_rx,
            closed_rx,
            approved_tx,
            close_tx,
            risk_event_tx,
        );

        (manager, signal_tx, position_tx, market_tx, approved_rx, close_rx, risk_event_rx, state)
    }

    #[tokio::test]
    async fn stop_loss_fires_and_requests_a_close() {
        let (manager, _signal_tx, position_tx, market_tx, _approved_rx, mut close_rx, mut risk_rx, _state) =
            make_manager();

        position_tx
            .send(position(PositionSide::Long, 100.0, 95.0, Some(115.0)))
            .await
            .unwrap();

        tokio::spawn(manager.run());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        market_tx.send(market_event("BTCUSDT", 94.0)).unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), risk_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert!(matches!(event, RiskEvent::StopLossTriggered { .. }));

        let close = tokio::time::timeout(std::time::Duration::from_secs(1), close_rx.recv())
            .await
            .expect("timeout")
            .expect("no close request emitted");
        assert_eq!(close.reason, CloseReason::StopLoss);
    }

    #[tokio::test]
    async fn target_fires_and_requests_a_close() {
        let (manager, _signal_tx, position_tx, market_tx, _approved_rx, mut close_rx, mut risk_rx, _state) =
            make_manager();

        position_tx
            .send(position(PositionSide::Long, 100.0, 95.0, Some(115.0)))
            .await
            .unwrap();

        tokio::spawn(manager.run());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        market_tx.send(market_event("BTCUSDT", 116.0)).unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), risk_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert!(matches!(event, RiskEvent::TargetTriggered { .. }));

        let close = tokio::time::timeout(std::time::Duration::from_secs(1), close_rx.recv())
            .await
            .expect("timeout")
            .expect("no close request emitted");
        assert_eq!(close.reason, CloseReason::Target);
    }

    #[tokio::test]
    async fn halted_engine_rejects_signal() {
        let (manager, signal_tx, _position_tx, _market_tx, _approved_rx, _close_rx, mut risk_rx, state) =
            make_manager();

        state.write().await.status = BotStatus::HaltedDaily;
        tokio::spawn(manager.run());

        signal_tx.send(signal()).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), risk_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");

        match event {
            RiskEvent::SignalRejected { reason, .. } => assert_eq!(reason.gate, "engine_status"),
            other => panic!("expected SignalRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn well_formed_signal_is_approved() {
        let (manager, signal_tx, _position_tx, _market_tx, mut approved_rx, _close_rx, _risk_rx, state) =
            make_manager();

        // Seed enough playbook history that sizing doesn't sample-dampen a
        // fresh-bot's first signal straight down to zero.
        {
            let mut state = state.write().await;
            for _ in 0..25 {
                state.record_trade_outcome(common::Playbook::A, 1.5);
            }
        }

        tokio::spawn(manager.run());
        signal_tx.send(signal()).await.unwrap();

        let approved = tokio::time::timeout(std::time::Duration::from_secs(1), approved_rx.recv())
            .await
            .expect("timeout")
            .expect("no approved signal emitted");
        assert_eq!(approved.signal.pair, "BTCUSDT");
        assert!(approved.sizing.notional_quote > 0.0);
    }

    #[tokio::test]
    async fn drawdown_breach_engages_kill_switch() {
        let (manager, _signal_tx, position_tx, market_tx, _approved_rx, _close_rx, mut risk_rx, state) =
            make_manager();

        state.write().await.daily_pnl_r = -4.0; // breaches the default -3.0R limit
        let state_handle = state.clone();

        position_tx
            .send(position(PositionSide::Long, 100.0, 50.0, Some(200.0)))
            .await
            .unwrap();
        tokio::spawn(manager.run());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // A mark inside the stop/target band still drives check_drawdown.
        market_tx.send(market_event("BTCUSDT", 101.0)).unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), risk_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert!(matches!(event, RiskEvent::KillSwitchEngaged { .. }));
        assert_eq!(state_handle.read().await.status, BotStatus::HaltedDaily);
    }
}
