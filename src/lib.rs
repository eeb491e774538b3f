//! Lucido generates slide decks: an outline planner, an HTML unit renderer
//! with structural validation, an optional vision-guided visual inspector,
//! and a pipeline coordinator tying them together over pluggable model,
//! browser, and storage collaborators.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
