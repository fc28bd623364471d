use proptest::prelude::*;
use common::{BotConfig, BotState, MarketEvent, Playbook, Position, PositionSide, PositionStatus};
use risk::RiskManager;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

proptest! {
    /// Risk rule evaluations on randomized f64 price inputs must never panic,
    /// however extreme the entry/stop/current prices and quantity.
    #[test]
    fn risk_rules_never_panic_on_extreme_prices(
        entry_price in 0.0001f64..1_000_000.0f64,
        stop_price in 0.0001f64..1_000_000.0f64,
        current_price in 0.0001f64..1_000_000.0f64,
        quantity in 0.0001f64..1000.0f64,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let config = Arc::new(RwLock::new(BotConfig::default()));
            let state = Arc::new(RwLock::new(BotState::new(10_000.0)));
            let (_signal_tx, signal_rx) = mpsc::channel(1);
            let (position_tx, position_rx) = mpsc::channel(1);
            let (market_tx, market_rx) = broadcast::channel(8);
            let (approved_tx, _approved_rx) = mpsc::channel(1);
            let (close_tx, _close_rx) = mpsc::channel(1);
            let (risk_event_tx, _risk_event_rx) = broadcast::channel(8);

            let manager = RiskManager::new(
                config,
                state,
                signal_rx,
                position_rx,
                market_rx,
                approved_tx,
                close_tx,
                risk_event_tx,
            );

            let handle = tokio::spawn(manager.run());

            position_tx.send(Position {
                id: "p1".into(),
                pair: "TESTUSDT".into(),
                side: PositionSide::Long,
                playbook: Playbook::A,
                entry_order_id: "o1".into(),
                entry_price,
                current_price: entry_price,
                stop_price,
                target_price: None,
                quantity,
                unrealized_pnl: 0.0,
                status: PositionStatus::Open,
                opened_at: chrono::Utc::now(),
                closed_at: None,
                close_reason: None,
                realized_pnl: None,
            }).await.ok();

            let event = MarketEvent {
                pair: "TESTUSDT".into(),
                price: current_price,
                open: current_price,
                high: current_price,
                low: current_price,
                volume: 1.0,
                is_candle_closed: true,
                timestamp: chrono::Utc::now(),
            };
            let _ = market_tx.send(event);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            handle.abort();
        });
    }
}
