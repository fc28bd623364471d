pub mod gates;
pub mod manager;
pub mod sizing;

pub use manager::{ClosePositionRequest, RiskManager};

use common::{Signal, SizingDecision};

/// A signal that cleared every pre-trade gate, paired with the size the
/// Kelly engine settled on. This is the only thing `risk` hands to
/// `execution` — downstream never re-derives sizing.
#[derive(Debug, Clone)]
pub struct ApprovedSignal {
    pub signal: Signal,
    pub sizing: SizingDecision,
}
