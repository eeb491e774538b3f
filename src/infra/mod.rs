pub mod browser;
pub mod error;
pub mod llm;
pub mod store;
pub mod telemetry;
pub mod vision;
