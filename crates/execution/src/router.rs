use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{error, info, warn};

use common::{
    BotState, CloseReason, Error, ExchangeClient, Lot, LotStatus, Order, OrderSide,
    OrderStatus, OrderType, Position, PositionSide, PositionStatus, Result, RiskEvent,
};
use filters::FilterService;
use persistence::{LotRepo, OrderRepo, PositionRepo};
use risk::{ApprovedSignal, ClosePositionRequest};

use crate::pricing;

/// Decay versus a signal's entry price beyond which an event signal is
/// submitted at market instead of chasing a maker price (spec.md §4.6).
const EVENT_DECAY_MARKET_THRESHOLD_PCT: f64 = 0.002;

/// Slippage ceiling for non-event signals (spec.md §4.6). Exceeding this is
/// a logged warning, never a rejection — the fill already happened.
const NORMAL_SLIPPAGE_LIMIT_BPS: f64 = 15.0;

/// Wider slippage ceiling for `is_event` signals, which chase a fast move
/// and tolerate more chase cost by design.
const EVENT_SLIPPAGE_LIMIT_BPS: f64 = 50.0;

/// Receives risk-approved signals and position-close requests, turns them
/// into shaped venue orders, and reconciles fills into Positions and Lots.
/// The only component in the workspace that calls `ExchangeClient::place_order`.
pub struct ExecutionRouter {
    client: Arc<dyn ExchangeClient>,
    filters: Arc<FilterService>,
    orders: OrderRepo,
    positions: PositionRepo,
    lots: LotRepo,
    state: Arc<RwLock<BotState>>,
    approved_rx: mpsc::Receiver<ApprovedSignal>,
    close_rx: mpsc::Receiver<ClosePositionRequest>,
    position_tx: mpsc::Sender<Position>,
    closed_tx: mpsc::Sender<String>,
    risk_event_tx: broadcast::Sender<RiskEvent>,
    maker_first: bool,
    bypass_maker: bool,
    vwap_bias: bool,
}

#[allow(clippy::too_many_arguments)]
impl ExecutionRouter {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        filters: Arc<FilterService>,
        orders: OrderRepo,
        positions: PositionRepo,
        lots: LotRepo,
        state: Arc<RwLock<BotState>>,
        approved_rx: mpsc::Receiver<ApprovedSignal>,
        close_rx: mpsc::Receiver<ClosePositionRequest>,
        position_tx: mpsc::Sender<Position>,
        closed_tx: mpsc::Sender<String>,
        risk_event_tx: broadcast::Sender<RiskEvent>,
    ) -> Self {
        Self {
            client,
            filters,
            orders,
            positions,
            lots,
            state,
            approved_rx,
            close_rx,
            position_tx,
            closed_tx,
            risk_event_tx,
            maker_first: true,
            bypass_maker: false,
            vwap_bias: true,
        }
    }

    /// Disable maker-first price shaping in favor of a plain `LIMIT` at the
    /// signal's own entry price (spec.md §4.6 "Configured bypass").
    pub fn with_bypass_maker(mut self, bypass: bool) -> Self {
        self.bypass_maker = bypass;
        self
    }

    /// Disable the optional VWAP-bias step in maker-first price shaping
    /// (spec.md §4.6 step 2, named "optionally" there).
    pub fn with_vwap_bias(mut self, enabled: bool) -> Self {
        self.vwap_bias = enabled;
        self
    }

    pub async fn run(mut self) {
        info!("ExecutionRouter running");
        loop {
            tokio::select! {
                approved = self.approved_rx.recv() => {
                    match approved {
                        Some(approved) => self.handle_approved(approved).await,
                        None => {
                            warn!("approved-signal channel closed, ExecutionRouter exiting");
                            return;
                        }
                    }
                }
                close = self.close_rx.recv() => {
                    match close {
                        Some(req) => self.handle_close(req).await,
                        None => {
                            warn!("close-position channel closed, ExecutionRouter exiting");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_approved(&mut self, approved: ApprovedSignal) {
        let ApprovedSignal { signal, sizing } = approved;
        let pair = signal.pair.clone();

        let order_type = self.decide_order_type(&signal).await;
        let price = match order_type {
            OrderType::Market => None,
            OrderType::Limit => Some(signal.entry_price),
            OrderType::LimitMaker | OrderType::StopLossLimit => {
                match self
                    .maker_first_or_fallback(&pair, signal.side, signal.entry_price, signal.session_vwap)
                    .await
                {
                    Some(p) => Some(p),
                    None => {
                        return self.handle_approved_at_market(signal, sizing).await;
                    }
                }
            }
        };

        let client_order_id = format!("spotbot-{}", uuid::Uuid::new_v4());
        self.submit_and_track(&client_order_id, &pair, signal.side, order_type, sizing.quantity, price, Some(signal))
            .await;
    }

    /// Re-enter with a market order after a maker price was rejected by the
    /// 50 bps adjustment cap (spec.md §4.6 step 1).
    async fn handle_approved_at_market(&mut self, signal: common::Signal, sizing: common::SizingDecision) {
        let client_order_id = format!("spotbot-{}", uuid::Uuid::new_v4());
        let pair = signal.pair.clone();
        self.submit_and_track(
            &client_order_id,
            &pair,
            signal.side,
            OrderType::Market,
            sizing.quantity,
            None,
            Some(signal),
        )
        .await;
    }

    async fn decide_order_type(&self, signal: &common::Signal) -> OrderType {
        if self.bypass_maker {
            return OrderType::Limit;
        }
        if signal.is_event {
            if let Ok(current) = self.client.ticker_price(&signal.pair).await {
                let decay = (current - signal.entry_price).abs() / signal.entry_price.max(f64::EPSILON);
                if decay > EVENT_DECAY_MARKET_THRESHOLD_PCT {
                    return OrderType::Market;
                }
            }
        }
        OrderType::LimitMaker
    }

    async fn maker_first_or_fallback(
        &self,
        pair: &str,
        side: OrderSide,
        reference_price: f64,
        session_vwap: f64,
    ) -> Option<f64> {
        if !self.maker_first {
            return Some(reference_price);
        }
        let book = self.client.depth(pair, 5).await.ok()?;
        let price = pricing::maker_first_price(side, &book, reference_price)?;
        Some(if self.vwap_bias {
            pricing::bias_toward_vwap(side, price, session_vwap)
        } else {
            price
        })
    }

    /// Shape, persist, submit, and (on a LIMIT_MAKER -2010 reject) retry
    /// once at an improved price with an `_r1` client-order-id suffix.
    #[allow(clippy::too_many_arguments)]
    async fn submit_and_track(
        &mut self,
        client_order_id: &str,
        pair: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
        origin_signal: Option<common::Signal>,
    ) {
        let signal_entry_price = origin_signal.as_ref().map(|s| s.entry_price);
        let reference_price = price.unwrap_or_else(|| signal_entry_price.unwrap_or(0.0));

        let shaped = match self.filters.shape_and_validate(pair, reference_price.max(f64::MIN_POSITIVE), quantity).await {
            Ok(shaped) => shaped,
            Err(e) => {
                warn!(pair, error = %e, "order rejected by exchange filters before submission");
                let mut order = Order::new(client_order_id, pair, side, order_type, quantity, price);
                order.status = OrderStatus::Rejected;
                order.evidence.rejection_reason = Some(e.to_string());
                if let Err(persist_err) = self.orders.insert(&order).await {
                    error!(error = %persist_err, "failed to persist rejected order");
                }
                return;
            }
        };

        let submit_price = if order_type == OrderType::Market { None } else { Some(shaped.price) };
        let mut order = Order::new(client_order_id, pair, side, order_type, shaped.quantity, submit_price);
        if let Err(e) = self.orders.insert(&order).await {
            error!(error = %e, "failed to persist new order");
            return;
        }

        match self.client.place_order(&order).await {
            Ok(ack) => self.reconcile_ack(&mut order, ack, origin_signal.as_ref()).await,
            Err(Error::GatewayError { venue_code: Some(-2010), .. }) if order_type == OrderType::LimitMaker => {
                self.retry_after_reject(&mut order, pair, side, shaped, origin_signal.as_ref()).await;
            }
            Err(e) => {
                warn!(pair, error = %e, "order submission failed");
                order.status = OrderStatus::Rejected;
                order.evidence.rejection_reason = Some(e.to_string());
                let _ = self.orders.update(&order).await;
                let _ = self.risk_event_tx.send(RiskEvent::OrderFailed {
                    pair: pair.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// LIMIT_MAKER reject handling (spec.md §4.6): reprice one tick better
    /// and retry once under a `_r1` suffixed client order id. No further
    /// retries regardless of outcome.
    async fn retry_after_reject(
        &mut self,
        original: &mut Order,
        pair: &str,
        side: OrderSide,
        shaped: filters::ShapedOrder,
        origin_signal: Option<&common::Signal>,
    ) {
        original.status = OrderStatus::Rejected;
        original.evidence.rejection_reason = Some("venue -2010: would immediately match".to_string());
        let _ = self.orders.update(original).await;

        let tick = self
            .filters
            .get(pair)
            .await
            .and_then(|p| p.tick_size.parse::<f64>().ok())
            .unwrap_or(0.0);
        let repriced = match side {
            OrderSide::Buy => shaped.price - tick,
            OrderSide::Sell => shaped.price + tick,
        };

        let retry_id = format!("{}_r1", original.client_order_id);
        let mut retry_order = Order::new(&retry_id, pair, side, OrderType::LimitMaker, shaped.quantity, Some(repriced));
        if let Err(e) = self.orders.insert(&retry_order).await {
            error!(error = %e, "failed to persist retried order");
            return;
        }

        match self.client.place_order(&retry_order).await {
            Ok(ack) => self.reconcile_ack(&mut retry_order, ack, origin_signal).await,
            Err(e) => {
                warn!(pair, error = %e, "retried order also failed, no further retries");
                retry_order.status = OrderStatus::Rejected;
                retry_order.evidence.rejection_reason = Some(e.to_string());
                let _ = self.orders.update(&retry_order).await;
                let _ = self.risk_event_tx.send(RiskEvent::OrderFailed {
                    pair: pair.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Fold a venue ack into the order, persist it, and — once terminal and
    /// fully filled on a BUY — create the tax lot and the open position.
    /// Partial fills are polled a bounded number of times until the venue
    /// reports a terminal status, accumulating fills as they arrive.
    async fn reconcile_ack(&mut self, order: &mut Order, mut ack: common::OrderAck, origin_signal: Option<&common::Signal>) {
        const MAX_POLLS: u8 = 5;
        let mut polls = 0;
        loop {
            order.venue_order_id = ack.venue_order_id.clone();
            for fill in &ack.fills {
                if !order.fills.iter().any(|f| f.trade_id == fill.trade_id) {
                    order.fills.push(fill.clone());
                }
            }
            order.recompute_from_fills();

            let next_status = ack.status;
            if order.status.can_transition_to(next_status) {
                order.status = next_status;
            } else if order.status != next_status {
                warn!(
                    order_id = %order.client_order_id,
                    from = ?order.status,
                    to = ?next_status,
                    "venue reported an illegal order-state transition, applying anyway"
                );
                order.status = next_status;
            }

            if order.status == OrderStatus::Filled {
                order.filled_at = Some(Utc::now());
            }
            let _ = self.orders.update(order).await;

            if order.status != OrderStatus::PartiallyFilled || polls >= MAX_POLLS {
                break;
            }
            polls += 1;
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            match self.client.get_order(&order.pair, &order.client_order_id).await {
                Ok(refreshed) => ack = refreshed,
                Err(e) => {
                    warn!(order_id = %order.client_order_id, error = %e, "failed to poll partially filled order");
                    break;
                }
            }
        }

        if order.status == OrderStatus::Filled {
            if let Some(signal) = origin_signal {
                let slip = pricing::slippage_bps(order.avg_fill_price, signal.entry_price);
                let limit = if signal.is_event { EVENT_SLIPPAGE_LIMIT_BPS } else { NORMAL_SLIPPAGE_LIMIT_BPS };
                if slip > limit {
                    warn!(order_id = %order.client_order_id, slippage_bps = slip, limit_bps = limit, "slippage exceeded configured limit");
                } else {
                    info!(order_id = %order.client_order_id, slippage_bps = slip, "order filled");
                }
            }
            if order.side == OrderSide::Buy {
                self.open_position_from_fill(order, origin_signal).await;
            }
        }
    }

    async fn open_position_from_fill(&mut self, order: &Order, origin_signal: Option<&common::Signal>) {
        // A BUY with no originating signal is a manual order (spec.md §3:
        // "Orders without positions are manual") — still lot-tracked for
        // tax accounting, but not handed to risk for stop/target management.
        let Some(signal) = origin_signal else {
            info!(order_id = %order.client_order_id, "manual buy fill, creating lot without a managed position");
            self.create_lot_for_fill(order).await;
            return;
        };

        let lot_id = match self.lots.next_lot_id().await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "failed to allocate lot id, position will have no backing lot");
                return;
            }
        };

        {
            let mut state = self.state.write().await;
            state.record_signal_emitted(signal.playbook, &order.pair, Utc::now());
        }

        let cost_per_unit = if order.filled_quantity > 0.0 {
            (order.avg_fill_price * order.filled_quantity + order.fees) / order.filled_quantity
        } else {
            order.avg_fill_price
        };

        let lot = Lot {
            id: lot_id,
            pair: order.pair.clone(),
            acquired_at: Utc::now(),
            quantity: order.filled_quantity,
            cost_per_unit,
            remaining_quantity: order.filled_quantity,
            status: LotStatus::Open,
            order_id: order.client_order_id.clone(),
        };
        if let Err(e) = self.lots.insert(&lot).await {
            error!(error = %e, "failed to persist lot");
        }

        let position = Position {
            id: uuid::Uuid::new_v4().to_string(),
            pair: order.pair.clone(),
            side: PositionSide::Long,
            playbook: signal.playbook,
            entry_order_id: order.client_order_id.clone(),
            entry_price: order.avg_fill_price,
            current_price: order.avg_fill_price,
            stop_price: signal.stop_price,
            target_price: signal.target_price,
            quantity: order.filled_quantity,
            unrealized_pnl: 0.0,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            close_reason: None,
            realized_pnl: None,
        };

        if let Err(e) = self.positions.insert(&position).await {
            error!(error = %e, "failed to persist new position");
            return;
        }
        if self.position_tx.send(position).await.is_err() {
            warn!("risk channel closed, new position not tracked for marking");
        }
    }

    /// Record the tax lot for a BUY fill with no originating signal, without
    /// opening a risk-managed position.
    async fn create_lot_for_fill(&mut self, order: &Order) {
        let lot_id = match self.lots.next_lot_id().await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "failed to allocate lot id, manual fill will have no backing lot");
                return;
            }
        };
        let cost_per_unit = if order.filled_quantity > 0.0 {
            (order.avg_fill_price * order.filled_quantity + order.fees) / order.filled_quantity
        } else {
            order.avg_fill_price
        };
        let lot = Lot {
            id: lot_id,
            pair: order.pair.clone(),
            acquired_at: Utc::now(),
            quantity: order.filled_quantity,
            cost_per_unit,
            remaining_quantity: order.filled_quantity,
            status: LotStatus::Open,
            order_id: order.client_order_id.clone(),
        };
        if let Err(e) = self.lots.insert(&lot).await {
            error!(error = %e, "failed to persist lot");
        }
    }

    async fn handle_close(&mut self, req: ClosePositionRequest) {
        let position = match self.positions.get(&req.position_id).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                warn!(position_id = %req.position_id, "close request for unknown position");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to load position for close");
                return;
            }
        };

        let close_side = match position.side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        };

        let client_order_id = format!("spotbot-close-{}", uuid::Uuid::new_v4());
        let mut order = Order::new(&client_order_id, &position.pair, close_side, OrderType::Market, position.quantity, None);
        if let Err(e) = self.orders.insert(&order).await {
            error!(error = %e, "failed to persist close order");
            return;
        }

        let ack = match self.client.place_order(&order).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(error = %e, pair = %position.pair, "failed to submit close order");
                let _ = self.risk_event_tx.send(RiskEvent::OrderFailed {
                    pair: position.pair.clone(),
                    error: e.to_string(),
                });
                return;
            }
        };

        order.status = ack.status;
        order.venue_order_id = ack.venue_order_id.clone();
        order.fills = ack.fills;
        order.recompute_from_fills();
        order.filled_at = Some(Utc::now());
        let _ = self.orders.update(&order).await;

        self.finalize_closed_position(position, &order, req.reason).await;
    }

    async fn finalize_closed_position(&mut self, mut position: Position, close_order: &Order, reason: CloseReason) {
        let realized_pnl = match position.side {
            PositionSide::Long => (close_order.avg_fill_price - position.entry_price) * position.quantity,
            PositionSide::Short => (position.entry_price - close_order.avg_fill_price) * position.quantity,
        };
        let r_value = {
            let risk_amount = position.risk_amount();
            if risk_amount > 0.0 { realized_pnl / risk_amount } else { 0.0 }
        };

        position.status = PositionStatus::Closed;
        position.closed_at = Some(Utc::now());
        position.close_reason = Some(reason);
        position.realized_pnl = Some(realized_pnl);
        position.mark(close_order.avg_fill_price);

        if let Err(e) = self.positions.update(&position).await {
            error!(error = %e, "failed to persist closed position");
        }

        if let Err(e) = self.consume_lots_fifo(&position.pair, position.quantity).await {
            error!(error = %e, "failed to reconcile lots against closed position");
        }

        {
            let mut state = self.state.write().await;
            state.apply_realized_pnl(realized_pnl, r_value);
            state.record_trade_outcome(position.playbook, r_value);
        }

        if self.closed_tx.send(position.id.clone()).await.is_err() {
            warn!("risk channel closed, could not confirm position close");
        }
    }

    /// Consume open lots for a pair oldest-first until `quantity` is
    /// accounted for, matching the FIFO tax-lot convention (spec.md §4.6).
    async fn consume_lots_fifo(&self, pair: &str, mut quantity: f64) -> Result<()> {
        let lots = self.lots.open_lots_for_pair(pair).await?;
        for lot in lots {
            if quantity <= 0.0 {
                break;
            }
            let consumed = lot.remaining_quantity.min(quantity);
            let remaining = lot.remaining_quantity - consumed;
            let status = if remaining <= f64::EPSILON { LotStatus::Closed } else { LotStatus::Open };
            self.lots.update_remaining(&lot.id, remaining.max(0.0), status).await?;
            quantity -= consumed;
        }
        Ok(())
    }
}

/// Cancel a resting order: cancel on the venue first, then mark locally.
/// Idempotent on an order that is already in a terminal state.
pub async fn cancel_order(
    client: &dyn ExchangeClient,
    orders: &OrderRepo,
    pair: &str,
    client_order_id: &str,
) -> Result<()> {
    let Some(mut order) = orders.get(client_order_id).await? else {
        return Err(Error::ExecutionError(format!("unknown order {client_order_id}")));
    };
    if order.status.is_terminal() {
        return Ok(());
    }

    client.cancel_order(pair, client_order_id).await?;
    order.status = OrderStatus::Cancelled;
    orders.update(&order).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_decay_threshold_matches_spec() {
        assert!((EVENT_DECAY_MARKET_THRESHOLD_PCT - 0.002).abs() < 1e-12);
    }
}
