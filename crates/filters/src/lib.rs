pub mod precision;
pub mod service;

pub use service::{FilterService, ShapedOrder};
