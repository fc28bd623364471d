pub mod scan;
pub mod supervisor;

pub use supervisor::{Engine, EngineHandle};
