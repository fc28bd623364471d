use thiserror::Error;

/// Workspace-wide error taxonomy. Each crate boundary returns `Result<T>`
/// against this enum rather than a boxed trait object, the same convention
/// as the teacher's `common::error::Error`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A non-2xx or transport-level failure from the venue's REST or
    /// WebSocket surface.
    #[error("gateway error ({venue_code:?}, HTTP {status:?}): {message}")]
    GatewayError {
        status: Option<u16>,
        venue_code: Option<i64>,
        message: String,
    },

    /// A quantity/price failed precision or bound validation against a
    /// pair's exchange filters.
    #[error("filter error: {0}")]
    FilterError(String),

    /// A candidate was refused by a pre-trade risk gate.
    #[error("risk blocked ({gate}): {reason}")]
    RiskBlocked { gate: String, reason: String },

    #[error("execution error: {0}")]
    ExecutionError(String),

    /// An invariant the system assumes always holds (e.g. a terminal order
    /// with no fills, a position with non-positive quantity) was violated.
    #[error("state invariant violated: {0}")]
    StateInvariant(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
