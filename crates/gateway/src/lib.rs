pub mod backoff;
pub mod cache;
pub mod client;
pub mod clock;
pub mod ratelimit;
pub mod stream;
pub mod user_stream;

pub use client::BinanceUsClient;
pub use stream::TickerStream;
pub use user_stream::ListenKeyKeeper;
