use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};
use url::Url;

use common::{Error, MarketEvent, Result};

use crate::backoff::Backoff;

/// Combined-stream WebSocket client: subscribes to the 1-minute kline stream
/// for every pair in the universe over a single connection, reconnecting
/// with jittered exponential backoff on failure.
pub struct TickerStream {
    base_ws_url: String,
    pairs: Vec<String>,
    market_tx: broadcast::Sender<MarketEvent>,
}

impl TickerStream {
    pub fn new(base_ws_url: impl Into<String>, pairs: Vec<String>, market_tx: broadcast::Sender<MarketEvent>) -> Self {
        Self {
            base_ws_url: base_ws_url.into(),
            pairs,
            market_tx,
        }
    }

    /// Run the stream loop forever, reconnecting on failure. Call this
    /// inside a `tokio::spawn`.
    pub async fn run(self) {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(60));

        loop {
            info!(pairs = ?self.pairs, "connecting to venue market-data stream");
            match self.connect_once().await {
                Ok(()) => {
                    info!("market-data stream closed cleanly, reconnecting");
                    backoff.reset();
                }
                Err(e) => {
                    warn!(error = %e, "market-data stream error, reconnecting");
                    backoff.wait().await;
                }
            }
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let streams = self
            .pairs
            .iter()
            .map(|p| format!("{}@kline_1m", p.to_lowercase()))
            .collect::<Vec<_>>()
            .join("/");
        let url_str = format!("{}/stream?streams={}", self.base_ws_url, streams);
        let url = Url::parse(&url_str).map_err(|e| Error::Other(e.to_string()))?;

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Other(format!("websocket connect failed: {e}")))?;

        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::Other(format!("websocket read failed: {e}")))?;

            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                match parse_combined_kline_event(&text) {
                    Ok(Some(event)) => {
                        let _ = self.market_tx.send(event);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "failed to parse kline event"),
                }
            }
        }

        Ok(())
    }
}

#[derive(Deserialize)]
struct CombinedEnvelope {
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct KlineWrapper {
    s: String,
    k: KlineData,
}

#[derive(Deserialize)]
struct KlineData {
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
    #[serde(rename = "T")]
    close_time_ms: i64,
}

fn parse_combined_kline_event(text: &str) -> Result<Option<MarketEvent>> {
    let envelope: CombinedEnvelope = serde_json::from_str(text)?;
    if envelope.data.get("e").and_then(|v| v.as_str()) != Some("kline") {
        return Ok(None);
    }

    let kline: KlineWrapper = serde_json::from_value(envelope.data)?;
    let k = kline.k;

    let timestamp = Utc
        .timestamp_millis_opt(k.close_time_ms)
        .single()
        .unwrap_or_else(Utc::now);

    Ok(Some(MarketEvent {
        pair: kline.s,
        price: k.close.parse().unwrap_or(0.0),
        open: k.open.parse().unwrap_or(0.0),
        high: k.high.parse().unwrap_or(0.0),
        low: k.low.parse().unwrap_or(0.0),
        volume: k.volume.parse().unwrap_or(0.0),
        is_candle_closed: k.is_closed,
        timestamp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_kline_event_is_ignored() {
        let text = r#"{"stream":"btcusdt@kline_1m","data":{"e":"24hrTicker"}}"#;
        assert!(parse_combined_kline_event(text).unwrap().is_none());
    }

    #[test]
    fn kline_event_parses_fields() {
        let text = r#"{"stream":"btcusdt@kline_1m","data":{"e":"kline","s":"BTCUSDT","k":{"o":"100.0","h":"110.0","l":"90.0","c":"105.0","v":"12.5","x":true,"T":1700000000000}}}"#;
        let event = parse_combined_kline_event(text).unwrap().unwrap();
        assert_eq!(event.pair, "BTCUSDT");
        assert_eq!(event.price, 105.0);
        assert!(event.is_candle_closed);
    }
}
