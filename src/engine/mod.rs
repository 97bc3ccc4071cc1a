// =============================================================================
// Engine module tree — C1..C9 of the decision pipeline
// =============================================================================

pub mod data_trust;
pub mod decision;
pub mod dwell;
pub mod engine;
pub mod hypothesis;
pub mod orderbook;
pub mod replayer;
pub mod sanitizer;
pub mod time_aligner;

pub use engine::Engine;
