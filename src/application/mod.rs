pub mod error;
pub mod inspector;
pub mod pipeline;
pub mod planner;
pub mod progress;
pub mod renderer;
pub mod structure;
pub mod style;

use uuid::Uuid;

/// Per-run context shared by every pipeline stage. Read-only after
/// construction; the only mutable cross-unit state is the style guide,
/// which lives behind [`style::StyleGuideService`].
#[derive(Debug, Clone)]
pub struct DeckContext {
    pub project: Uuid,
    pub topic: String,
    pub audience: Option<String>,
    pub style: Option<String>,
    pub total_units: usize,
}

impl DeckContext {
    pub fn new(project: Uuid, topic: impl Into<String>) -> Self {
        Self {
            project,
            topic: topic.into(),
            audience: None,
            style: None,
            total_units: 0,
        }
    }
}
