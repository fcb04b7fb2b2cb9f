pub mod engine;
pub mod error;
pub mod looping;
pub mod rundown;
pub mod telemetry;
pub mod validation;

pub use engine::BatchEngine;
pub use error::EngineError;
