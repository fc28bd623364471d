pub mod bot_config;
pub mod bot_state;
pub mod lots;
pub mod orders;
pub mod pairs;
pub mod positions;
pub mod signals;

pub use bot_config::BotConfigRepo;
pub use bot_state::BotStateRepo;
pub use lots::LotRepo;
pub use orders::OrderRepo;
pub use pairs::PairRepo;
pub use positions::PositionRepo;
pub use signals::SignalRepo;

use chrono::{DateTime, Utc};
use common::{Error, Result};

/// Parse an RFC3339 timestamp column, the only encoding this crate ever
/// writes for a `DateTime<Utc>` field.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Database(sqlx::Error::Decode(Box::new(e))))
}

pub(crate) fn parse_ts_opt(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}
