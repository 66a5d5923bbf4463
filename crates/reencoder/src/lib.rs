pub mod candidate;
pub mod engine;
pub mod execute;
pub mod gate;
pub mod probe;
pub mod reconcile;

pub use engine::{spawn, EngineStatus, ReencoderHandle};
