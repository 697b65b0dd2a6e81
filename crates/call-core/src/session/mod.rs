//! Call session: the engine handle and the state machine it drives

pub mod engine;
mod machine;

pub use engine::{CallEngine, CallEngineBuilder};
pub use machine::EngineDiagnostics;
