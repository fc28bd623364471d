use std::str::FromStr;

use crate::{SignalTier, TradingMode};

/// All process-wide configuration loaded from environment variables at
/// startup. Missing required variables cause an immediate panic with a
/// clear message, the same contract as the teacher's loader.
#[derive(Debug, Clone)]
pub struct Config {
    // Venue credentials
    pub binance_us_api_key: String,
    pub binance_us_api_secret: String,
    pub binance_us_base_url: String,
    /// Combined-stream WebSocket origin (no path), e.g.
    /// `wss://stream.binance.us:9443`. Not part of spec.md §6's documented
    /// surface — defaulted rather than required, since every known
    /// Binance-family deployment uses the same fixed WS host.
    pub binance_us_ws_url: String,

    // Risk preset
    pub signal_tier: SignalTier,

    /// Whether order flow reaches the venue or the in-memory simulator.
    /// Not part of spec.md §6's documented env surface (the spec assumes a
    /// single always-live core); defaulted to `Paper` so a fresh checkout
    /// never places a real order before an operator opts in.
    pub trading_mode: TradingMode,

    // Database
    pub database_url: String,

    // Paper-trading simulation
    pub paper_slippage_bps: f64,

    // Trading universe, comma separated symbols, e.g. "BTCUSDT,ETHUSDT"
    pub universe: Vec<String>,

    // Documented env surface with no functional surface in this core
    // (see DESIGN.md Open Question decisions #4, #5). Read so boot never
    // fails against the wider system's documented configuration contract.
    pub mongo_uri: Option<String>,
    pub port: Option<u16>,
    pub jwt_secret: Option<String>,
    pub jwt_refresh_secret: Option<String>,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let signal_tier = SignalTier::from_str(&required_env("SIGNAL_TIER"))
            .unwrap_or_else(|msg| panic!("ERROR: {msg}"));

        let universe = required_env("TRADING_UNIVERSE")
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        if let Some(uri) = optional_env("MONGO_URI") {
            tracing::warn!(
                mongo_uri = %uri,
                "MONGO_URI is set but unused; this build persists to DATABASE_URL (sqlite)"
            );
        }

        Config {
            binance_us_api_key: required_env("BINANCE_US_API_KEY"),
            binance_us_api_secret: required_env("BINANCE_US_API_SECRET"),
            binance_us_base_url: optional_env("BINANCE_US_BASE_URL")
                .unwrap_or_else(|| "https://api.binance.us".to_string()),
            binance_us_ws_url: optional_env("BINANCE_US_WS_URL")
                .unwrap_or_else(|| "wss://stream.binance.us:9443".to_string()),
            signal_tier,
            trading_mode: optional_env("TRADING_MODE")
                .map(|v| TradingMode::from_str(&v).unwrap_or_else(|msg| panic!("ERROR: {msg}")))
                .unwrap_or(TradingMode::Paper),
            database_url: required_env("DATABASE_URL"),
            paper_slippage_bps: optional_env("PAPER_SLIPPAGE_BPS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10.0),
            universe,
            mongo_uri: optional_env("MONGO_URI"),
            port: optional_env("PORT").and_then(|v| v.parse().ok()),
            jwt_secret: optional_env("JWT_SECRET"),
            jwt_refresh_secret: optional_env("JWT_REFRESH_SECRET"),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
