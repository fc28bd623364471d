use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Pair ───────────────────────────────────────────────────────────────────

/// A tradable pair on the venue, loaded at boot and refreshed daily.
/// Immutable between refreshes — callers that need fresh filters should
/// re-fetch from `ExchangeClient::exchange_info` rather than cache this past
/// the refresh window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pair {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Minimum price increment, as the venue's literal decimal string
    /// (e.g. `"0.01"`). Parsed by `filters` into scaled-integer form.
    pub tick_size: String,
    /// Minimum quantity increment, same string convention as `tick_size`.
    pub step_size: String,
    pub min_qty: f64,
    pub max_qty: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub min_notional: f64,
}

// ─── Kline / ticker stream ──────────────────────────────────────────────────

/// Live market data event from the exchange stream (WS ticker or REST kline
/// page). Indicators should only fold in events where `is_candle_closed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEvent {
    pub pair: String,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub is_candle_closed: bool,
    pub timestamp: DateTime<Utc>,
}

/// One OHLCV bar as returned by `GET /api/v3/klines`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
}

// ─── Market snapshot ────────────────────────────────────────────────────────

/// Per-tick market read for one pair. Transient — recomputed every scan tick,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub pair: String,
    pub last_price: f64,
    pub quote_volume_24h: f64,
    pub best_bid: f64,
    pub best_bid_qty: f64,
    pub best_ask: f64,
    pub best_ask_qty: f64,
    pub spread_bps: f64,
    pub atr14: f64,
    pub session_vwap: f64,
    pub gate_pass: bool,
    /// Reasons the pair failed a quality gate; empty when `gate_pass`.
    pub gate_fail_reasons: Vec<String>,
    pub taken_at: DateTime<Utc>,
}

// ─── Playbooks & signals ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Playbook {
    /// Breakout Trend
    A,
    /// VWAP Mean Revert
    B,
    /// Event Burst
    C,
    /// Dip Pullback
    D,
}

impl std::fmt::Display for Playbook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Playbook::A => "A",
            Playbook::B => "B",
            Playbook::C => "C",
            Playbook::D => "D",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// A candidate trade produced by one playbook. Valid iff `entry > 0`,
/// `stop > 0`, `entry != stop`, and (when `target` is set) target/entry/stop
/// obey directional ordering for `side`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub pair: String,
    pub playbook: Playbook,
    pub side: OrderSide,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: Option<f64>,
    pub is_event: bool,
    pub reason: String,
    /// Session VWAP read at signal time, carried through so the router can
    /// apply the optional VWAP-bias price shaping step (spec.md §4.6 step 2)
    /// without re-querying the scanner.
    pub session_vwap: f64,
}

impl Signal {
    /// Shape validation run on every signal before it reaches the risk engine.
    pub fn is_valid(&self) -> bool {
        if self.entry_price <= 0.0 || self.stop_price <= 0.0 {
            return false;
        }
        if (self.entry_price - self.stop_price).abs() < f64::EPSILON {
            return false;
        }
        match self.side {
            OrderSide::Buy => {
                if self.stop_price >= self.entry_price {
                    return false;
                }
                if let Some(t) = self.target_price {
                    if t <= self.entry_price {
                        return false;
                    }
                }
            }
            OrderSide::Sell => {
                if self.stop_price <= self.entry_price {
                    return false;
                }
                if let Some(t) = self.target_price {
                    if t >= self.entry_price {
                        return false;
                    }
                }
            }
        }
        true
    }

    pub fn risk_per_unit(&self) -> f64 {
        (self.entry_price - self.stop_price).abs()
    }
}

/// Outcome recorded for every candidate, accepted or rejected, for replay
/// and ML labelling (spec.md §4.4 "Recording").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum SignalAction {
    Executed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub id: String,
    pub signal: Signal,
    pub action: SignalAction,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

// ─── Sizing ─────────────────────────────────────────────────────────────────

/// Derived from a `Signal` plus account state. Not persisted beyond the
/// request that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingDecision {
    pub kelly_fraction: f64,
    pub adjusted_fraction: f64,
    pub notional_quote: f64,
    pub quantity: f64,
    pub reasoning: Vec<String>,
    pub risk_tier: RiskTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskTier {
    Conservative,
    Moderate,
    Aggressive,
}

/// Reason a candidate was refused by a pre-trade gate (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionReason {
    pub gate: String,
    pub reason: String,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.gate, self.reason)
    }
}

// ─── Orders ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    LimitMaker,
    Market,
    Limit,
    StopLossLimit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderType::LimitMaker => "LIMIT_MAKER",
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopLossLimit => "STOP_LOSS_LIMIT",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Whether `self -> next` is a legal order-state transition (spec.md §4.6).
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Open)
                | (Pending, Rejected)
                | (Open, PartiallyFilled)
                | (Open, Filled)
                | (Open, Cancelled)
                | (Open, Rejected)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Cancelled)
        )
    }
}

/// One fill against an order, as reported by the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub commission_asset: String,
    pub trade_id: String,
}

/// Evidence blob kept alongside an order for operator review: the raw
/// request and response bodies, plus a rejection reason when applicable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderEvidence {
    pub request: Option<String>,
    pub response: Option<String>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Locally generated, process-wide unique. Never overwritten on
    /// collision — the submission fails instead (spec.md §3 invariant).
    pub client_order_id: String,
    pub venue_order_id: Option<String>,
    pub pair: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub requested_quantity: f64,
    pub requested_price: Option<f64>,
    pub filled_quantity: f64,
    pub avg_fill_price: f64,
    pub fees: f64,
    pub status: OrderStatus,
    pub evidence: OrderEvidence,
    pub fills: Vec<FillEvent>,
    pub submitted_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        client_order_id: impl Into<String>,
        pair: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            venue_order_id: None,
            pair: pair.into(),
            side,
            order_type,
            requested_quantity: quantity,
            requested_price: price,
            filled_quantity: 0.0,
            avg_fill_price: 0.0,
            fees: 0.0,
            status: OrderStatus::Pending,
            evidence: OrderEvidence::default(),
            fills: Vec::new(),
            submitted_at: Utc::now(),
            filled_at: None,
        }
    }

    /// Recompute `filled_quantity`/`avg_fill_price`/`fees` from `self.fills`.
    /// `avg_fill_price` is the fill-quantity-weighted mean, per spec.md §8's
    /// invariant `O.fill_price == Σ(fill.qty·fill.price)/Σ fill.qty`.
    pub fn recompute_from_fills(&mut self) {
        let total_qty: f64 = self.fills.iter().map(|f| f.quantity).sum();
        let notional: f64 = self.fills.iter().map(|f| f.quantity * f.price).sum();
        self.filled_quantity = total_qty;
        self.avg_fill_price = if total_qty > 0.0 {
            notional / total_qty
        } else {
            0.0
        };
        self.fees = self.fills.iter().map(|f| f.commission).sum();
    }
}

// ─── Positions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    StopLoss,
    Target,
    Manual,
    KillSwitch,
    TimeStop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub pair: String,
    pub side: PositionSide,
    pub playbook: Playbook,
    pub entry_order_id: String,
    pub entry_price: f64,
    pub current_price: f64,
    pub stop_price: f64,
    pub target_price: Option<f64>,
    pub quantity: f64,
    pub unrealized_pnl: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
    pub realized_pnl: Option<f64>,
}

impl Position {
    /// |entry - stop| * quantity, the per-position contribution to
    /// portfolio heat (spec.md §3/§4.5).
    pub fn risk_amount(&self) -> f64 {
        (self.entry_price - self.stop_price).abs() * self.quantity
    }

    pub fn mark(&mut self, price: f64) {
        self.current_price = price;
        self.unrealized_pnl = match self.side {
            PositionSide::Long => (price - self.entry_price) * self.quantity,
            PositionSide::Short => (self.entry_price - price) * self.quantity,
        };
    }
}

// ─── Lots ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum LotStatus {
    Open,
    Closed,
}

/// Immutable tax-lot created for each BUY fill (spec.md §3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    pub id: String,
    pub pair: String,
    pub acquired_at: DateTime<Utc>,
    pub quantity: f64,
    pub cost_per_unit: f64,
    pub remaining_quantity: f64,
    pub status: LotStatus,
    pub order_id: String,
}

// ─── Bot-wide state & config ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotStatus {
    #[default]
    Running,
    HaltedDaily,
    HaltedWeekly,
}

/// Trailing trade history is capped at this many outcomes per playbook
/// (spec.md §4.5: "recent ≤100 trades, per playbook").
pub const PLAYBOOK_TRADE_HISTORY_CAP: usize = 100;

/// Below this many recorded trades for a playbook, sizing falls back to the
/// spec's fixed defaults rather than trusting a thin sample (spec.md §4.5).
pub const PLAYBOOK_MIN_TRADES_FOR_STATS: usize = 5;

/// Win rate `p`, win/loss ratio `b`, and sample count `n` derived from a
/// playbook's trailing R-multiple history, the exact inputs the Kelly
/// formula in `risk::sizing` consumes (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybookKellyInputs {
    pub p: f64,
    pub b: f64,
    pub n: usize,
}

/// Per-user singleton runtime state. Guarded by a single `RwLock` at the
/// point it is shared across tasks (see `engine`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotState {
    pub status: BotStatus,
    pub starting_equity: f64,
    pub current_equity: f64,
    pub peak_equity: f64,
    pub daily_pnl_usd: f64,
    pub daily_pnl_r: f64,
    pub weekly_pnl_usd: f64,
    pub weekly_pnl_r: f64,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub last_signal_at: HashMap<String, DateTime<Utc>>,
    pub playbook_b_session_counts: HashMap<String, u32>,
    /// UTC calendar day `playbook_b_session_counts` was last reset for.
    /// `None` until the first Playbook B fill.
    pub session_day: Option<chrono::NaiveDate>,
    /// Trailing R-multiples realized per playbook, oldest-first, capped at
    /// `PLAYBOOK_TRADE_HISTORY_CAP` (spec.md §4.5).
    pub playbook_trade_r: HashMap<Playbook, VecDeque<f64>>,
}

impl BotState {
    pub fn new(starting_equity: f64) -> Self {
        Self {
            status: BotStatus::Running,
            starting_equity,
            current_equity: starting_equity,
            peak_equity: starting_equity,
            daily_pnl_usd: 0.0,
            daily_pnl_r: 0.0,
            weekly_pnl_usd: 0.0,
            weekly_pnl_r: 0.0,
            last_scan_at: None,
            last_signal_at: HashMap::new(),
            playbook_b_session_counts: HashMap::new(),
            session_day: None,
            playbook_trade_r: HashMap::new(),
        }
    }

    /// Record a filled entry (spec.md §4.3: "Updated by the router on
    /// successful execution"): bumps the pair's cooldown timestamp and, for
    /// Playbook B, its per-pair session trade count used by gate (f)
    /// (spec.md §4.5). The session counts reset whenever the UTC calendar
    /// day rolls over from the last recorded Playbook B fill.
    pub fn record_signal_emitted(&mut self, playbook: Playbook, pair: &str, now: DateTime<Utc>) {
        self.last_signal_at.insert(pair.to_string(), now);

        if playbook != Playbook::B {
            return;
        }

        let today = now.date_naive();
        if self.session_day != Some(today) {
            self.session_day = Some(today);
            self.playbook_b_session_counts.clear();
        }
        *self.playbook_b_session_counts.entry(pair.to_string()).or_insert(0) += 1;
    }

    /// Append a closed trade's R-multiple to its playbook's trailing
    /// history, dropping the oldest entry once the cap is exceeded.
    pub fn record_trade_outcome(&mut self, playbook: Playbook, r_value: f64) {
        let history = self.playbook_trade_r.entry(playbook).or_default();
        history.push_back(r_value);
        if history.len() > PLAYBOOK_TRADE_HISTORY_CAP {
            history.pop_front();
        }
    }

    /// Derive `p`/`b`/`n` from a playbook's trailing R-multiple history.
    /// Returns `None` when fewer than `PLAYBOOK_MIN_TRADES_FOR_STATS` trades
    /// are on record, signalling the caller to use the spec's fixed
    /// defaults instead.
    pub fn playbook_kelly_inputs(&self, playbook: Playbook) -> Option<PlaybookKellyInputs> {
        let history = self.playbook_trade_r.get(&playbook)?;
        let n = history.len();
        if n < PLAYBOOK_MIN_TRADES_FOR_STATS {
            return None;
        }

        let wins: Vec<f64> = history.iter().copied().filter(|r| *r > 0.0).collect();
        let losses: Vec<f64> = history.iter().copied().filter(|r| *r <= 0.0).map(|r| r.abs()).collect();

        let p = wins.len() as f64 / n as f64;
        let avg_win = if wins.is_empty() { 0.0 } else { wins.iter().sum::<f64>() / wins.len() as f64 };
        // A playbook with no losing trades yet still needs a finite
        // denominator; floor it rather than divide by zero.
        let avg_loss = if losses.is_empty() { 0.01 } else { losses.iter().sum::<f64>() / losses.len() as f64 };
        let b = (avg_win / avg_loss).max(0.01);

        Some(PlaybookKellyInputs { p, b, n })
    }

    /// Apply realized PnL, maintaining `peak_equity` monotonically upward
    /// (spec.md §3 invariant).
    pub fn apply_realized_pnl(&mut self, pnl_usd: f64, r_value: f64) {
        self.current_equity += pnl_usd;
        if self.current_equity > self.peak_equity {
            self.peak_equity = self.current_equity;
        }
        self.daily_pnl_usd += pnl_usd;
        self.daily_pnl_r += r_value;
        self.weekly_pnl_usd += pnl_usd;
        self.weekly_pnl_r += r_value;
    }

    pub fn drawdown_pct(&self) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        (self.peak_equity - self.current_equity) / self.peak_equity
    }

    pub fn cooldown_elapsed(&self, pair: &str, cooldown_minutes: i64, now: DateTime<Utc>) -> bool {
        match self.last_signal_at.get(pair) {
            Some(last) => {
                now.signed_duration_since(*last) >= chrono::Duration::minutes(cooldown_minutes)
            }
            None => true,
        }
    }
}

/// Per-user configuration (spec.md §3 `BotConfig`, §6 `SIGNAL_TIER`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub universe: Vec<String>,
    pub min_volume_quote: f64,
    pub max_spread_bps: f64,
    pub min_tob_depth_quote: f64,
    /// Fraction of equity risked per R, e.g. `0.01` = 1% (see Open Question
    /// decision #1 in DESIGN.md — stored as a fraction everywhere).
    pub r_pct: f64,
    pub max_exposure_pct: f64,
    pub max_concurrent_positions: u32,
    pub reserve_target_pct: f64,
    pub reserve_floor_pct: f64,
    pub max_portfolio_heat_pct: f64,
    pub cooldown_minutes: i64,
    pub daily_loss_limit_r: f64,
    pub weekly_loss_limit_r: f64,
    pub playbooks: PlaybookToggles,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookToggles {
    pub a_enabled: bool,
    pub b_enabled: bool,
    pub c_enabled: bool,
    pub d_enabled: bool,
    pub b_max_trades_per_session: u32,
}

impl Default for PlaybookToggles {
    fn default() -> Self {
        Self {
            a_enabled: true,
            b_enabled: true,
            c_enabled: true,
            d_enabled: true,
            b_max_trades_per_session: 3,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            universe: Vec::new(),
            min_volume_quote: 1_000_000.0,
            max_spread_bps: 10.0,
            min_tob_depth_quote: 5_000.0,
            r_pct: 0.01,
            max_exposure_pct: 0.10,
            max_concurrent_positions: 5,
            reserve_target_pct: 0.20,
            reserve_floor_pct: 0.10,
            max_portfolio_heat_pct: 0.20,
            cooldown_minutes: 30,
            daily_loss_limit_r: 3.0,
            weekly_loss_limit_r: 6.0,
            playbooks: PlaybookToggles::default(),
        }
    }
}

/// Which venue-account risk preset a user is running under (spec.md §6
/// `SIGNAL_TIER`). Tier presets are applied by `common::config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalTier {
    Tier1Conservative,
    Tier2Moderate,
    Tier3Aggressive,
}

impl std::str::FromStr for SignalTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TIER_1_CONSERVATIVE" => Ok(SignalTier::Tier1Conservative),
            "TIER_2_MODERATE" => Ok(SignalTier::Tier2Moderate),
            "TIER_3_AGGRESSIVE" => Ok(SignalTier::Tier3Aggressive),
            other => Err(format!(
                "SIGNAL_TIER must be one of TIER_1_CONSERVATIVE, TIER_2_MODERATE, \
                 TIER_3_AGGRESSIVE, got: '{other}'"
            )),
        }
    }
}

impl BotConfig {
    /// Tier-scaled presets layered on top of `Default`. Conservative halves
    /// `r_pct`/heat/exposure caps; aggressive raises them; moderate matches
    /// `Default` exactly.
    pub fn for_tier(tier: SignalTier, universe: Vec<String>) -> Self {
        let mut cfg = Self {
            universe,
            ..Self::default()
        };
        match tier {
            SignalTier::Tier1Conservative => {
                cfg.r_pct = 0.005;
                cfg.max_exposure_pct = 0.05;
                cfg.max_portfolio_heat_pct = 0.10;
                cfg.max_concurrent_positions = 3;
            }
            SignalTier::Tier2Moderate => {}
            SignalTier::Tier3Aggressive => {
                cfg.r_pct = 0.02;
                cfg.max_exposure_pct = 0.15;
                cfg.max_portfolio_heat_pct = 0.30;
                cfg.max_concurrent_positions = 8;
            }
        }
        cfg
    }
}

/// Venue trading mode: whether order flow reaches the real venue or the
/// local simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::str::FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LIVE" => Ok(TradingMode::Live),
            "PAPER" => Ok(TradingMode::Paper),
            other => Err(format!("TRADING_MODE must be one of LIVE, PAPER, got: '{other}'")),
        }
    }
}

// ─── Engine lifecycle ──────────────────────────────────────────────────────

/// Current state of the trading engine (supervisor-level, not per-user
/// `BotState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    Paused,
    Halted,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
            EngineState::Halted => write!(f, "halted"),
        }
    }
}

/// Commands sent to the engine via the command channel.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Start,
    Stop,
    Pause,
    Resume,
    ResetHalt,
}

/// Events emitted by the risk engine / execution router for observability
/// and (in the teacher's system) alerting — here just logged and recorded.
#[derive(Debug, Clone)]
pub enum RiskEvent {
    SignalApproved {
        signal: Signal,
        sizing: SizingDecision,
    },
    SignalRejected {
        signal: Signal,
        reason: RejectionReason,
    },
    StopLossTriggered {
        pair: String,
        close_price: f64,
    },
    TargetTriggered {
        pair: String,
        close_price: f64,
    },
    TimeStopTriggered {
        pair: String,
        close_price: f64,
    },
    OrderFailed {
        pair: String,
        error: String,
    },
    KillSwitchEngaged {
        reason: String,
    },
    KillSwitchCleared,
}

#[cfg(test)]
mod bot_state_tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn record_signal_emitted_sets_cooldown_timestamp() {
        let mut state = BotState::new(10_000.0);
        let now = Utc::now();
        state.record_signal_emitted(Playbook::A, "BTCUSDT", now);
        assert_eq!(state.last_signal_at.get("BTCUSDT"), Some(&now));
        assert!(state.playbook_b_session_counts.is_empty());
    }

    #[test]
    fn record_signal_emitted_counts_playbook_b_per_pair() {
        let mut state = BotState::new(10_000.0);
        let now = Utc::now();
        state.record_signal_emitted(Playbook::B, "ETHUSDT", now);
        state.record_signal_emitted(Playbook::B, "ETHUSDT", now);
        state.record_signal_emitted(Playbook::B, "BTCUSDT", now);
        assert_eq!(state.playbook_b_session_counts.get("ETHUSDT"), Some(&2));
        assert_eq!(state.playbook_b_session_counts.get("BTCUSDT"), Some(&1));
    }

    #[test]
    fn playbook_b_session_counts_reset_on_a_new_utc_day() {
        let mut state = BotState::new(10_000.0);
        let day_one = Utc.with_ymd_and_hms(2026, 7, 30, 23, 59, 0).unwrap();
        let day_two = Utc.with_ymd_and_hms(2026, 7, 31, 0, 1, 0).unwrap();
        state.record_signal_emitted(Playbook::B, "BTCUSDT", day_one);
        assert_eq!(state.playbook_b_session_counts.get("BTCUSDT"), Some(&1));

        state.record_signal_emitted(Playbook::B, "BTCUSDT", day_two);
        assert_eq!(state.playbook_b_session_counts.get("BTCUSDT"), Some(&1));
    }
}
