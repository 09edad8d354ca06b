pub mod anomaly;
pub mod attribution;
pub mod engine;
pub mod identity;
pub mod matcher;
pub mod retry;
pub mod run;
pub mod scoring;
pub mod settings;
pub mod similarity;
pub mod trends;

pub use engine::Engine;
pub use retry::RetryPolicy;
pub use run::Deadline;
pub use settings::{AnomalyThresholds, EngineSettings};
