//! Outline Planner: topic plus constraints to a structurally valid,
//! contract-satisfying outline.
//!
//! The planner is the only stage allowed to fail, and only when the text
//! collaborator is unreachable after its own retries. Structural problems
//! are repaired through model feedback (bounded rounds) and the page-count
//! contract is ultimately enforced by deterministic correction, so an
//! outline is always produced once the collaborator answers at all.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::extract;
use crate::domain::outline::{
    self, Outline, OutlineUnit, PageCountContract, UnitKind, ValidationError,
};
use crate::infra::llm::{self, CompletionRequest, LlmError, TextGenerator};

const SOURCE: &str = "application::planner::OutlinePlanner";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Collaborator(#[from] LlmError),
}

/// Caller-supplied constraints beyond the page-count contract.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    pub topic: String,
    pub audience: Option<String>,
    pub style: Option<String>,
    /// Focus topics seed synthesized units during deterministic correction.
    pub focus_topics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlannerOptions {
    pub max_repair_rounds: u32,
    pub model: Option<String>,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            max_repair_rounds: 10,
            model: None,
        }
    }
}

pub struct OutlinePlanner {
    text: Arc<dyn TextGenerator>,
    options: PlannerOptions,
}

impl OutlinePlanner {
    pub fn new(text: Arc<dyn TextGenerator>, options: PlannerOptions) -> Self {
        Self { text, options }
    }

    /// Produce an outline satisfying the contract. See module docs for the
    /// failure ladder.
    pub async fn plan(
        &self,
        request: &PlanRequest,
        contract: &PageCountContract,
    ) -> Result<Outline, PlanError> {
        let raw = llm::collect_stream(self.text.complete_stream(CompletionRequest {
            prompt: self.initial_prompt(request, contract),
            system: Some(SYSTEM_PROMPT.to_string()),
            model: self.options.model.clone(),
            temperature: Some(0.4),
            ..CompletionRequest::default()
        }))
        .await?;

        let mut candidate = extract::json_candidate(&raw);
        let mut best: Option<Outline> = parse_candidate(&candidate);

        for round in 1..=self.options.max_repair_rounds {
            let errors = match &best {
                Some(outline) => outline::validate(outline, contract),
                None => vec![ValidationError::new(
                    "response was not a parseable outline JSON object",
                )],
            };
            if errors.is_empty() {
                break;
            }

            counter!("lucido_planner_repair_rounds_total").increment(1);
            debug!(
                target = "lucido::planner",
                source = SOURCE,
                round,
                errors = errors.len(),
                "requesting outline repair"
            );

            let completion = self
                .text
                .complete(CompletionRequest {
                    prompt: repair_prompt(&candidate, &errors, contract),
                    system: Some(SYSTEM_PROMPT.to_string()),
                    model: self.options.model.clone(),
                    temperature: Some(0.2),
                    ..CompletionRequest::default()
                })
                .await?;

            candidate = extract::json_candidate(&completion.content);
            if let Some(repaired) = parse_candidate(&candidate) {
                best = Some(repaired);
            }
        }

        let mut outline = match best {
            Some(outline) => outline,
            None => {
                warn!(
                    target = "lucido::planner",
                    source = SOURCE,
                    "no parseable candidate after repair; synthesizing minimal outline"
                );
                synthesize_outline(request)
            }
        };

        resolve_kinds(&mut outline);
        outline.metadata.audience = request.audience.clone();
        outline.metadata.style = request.style.clone();
        outline = outline::enforce_contract(outline, contract, &request.focus_topics);

        info!(
            target = "lucido::planner",
            source = SOURCE,
            units = outline.units.len(),
            contract = %contract.describe(),
            "outline accepted"
        );
        Ok(outline)
    }

    fn initial_prompt(&self, request: &PlanRequest, contract: &PageCountContract) -> String {
        let mut prompt = format!(
            "Plan a slide deck about \"{}\" with {}.\n",
            request.topic,
            contract.describe()
        );
        if let Some(audience) = &request.audience {
            prompt.push_str(&format!("Audience: {audience}.\n"));
        }
        if let Some(style) = &request.style {
            prompt.push_str(&format!("Presentation style: {style}.\n"));
        }
        if !request.focus_topics.is_empty() {
            prompt.push_str(&format!(
                "Make sure these topics are covered: {}.\n",
                request.focus_topics.join(", ")
            ));
        }
        prompt.push_str(OUTLINE_FORMAT_INSTRUCTIONS);
        prompt
    }
}

const SYSTEM_PROMPT: &str =
    "You are a presentation planner. Respond with a single fenced JSON block and nothing else.";

const OUTLINE_FORMAT_INSTRUCTIONS: &str = "\nRespond with JSON in a ```json fence:\n\
{\n  \"title\": \"deck title\",\n  \"units\": [\n    {\"position\": 1, \"title\": \"slide title\", \
\"content_points\": [\"point\"], \"kind\": \"title|content|agenda|closing\"}\n  ],\n  \
\"metadata\": {\"unit_count\": N}\n}\n\
Positions must run 1..N with no gaps and metadata.unit_count must equal the number of units.";

fn repair_prompt(
    candidate: &str,
    errors: &[ValidationError],
    contract: &PageCountContract,
) -> String {
    let itemized = errors
        .iter()
        .map(|e| format!("- {e}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "The outline below failed validation.\n\nOutline:\n{candidate}\n\nProblems:\n{itemized}\n\n\
         Return a corrected outline as a single fenced JSON block, keeping the same structure \
         and {}.{OUTLINE_FORMAT_INSTRUCTIONS}",
        contract.describe()
    )
}

fn parse_candidate(candidate: &str) -> Option<Outline> {
    serde_json::from_str::<Outline>(candidate).ok()
}

/// Apply the explicit-field-plus-heuristics kind policy to every unit.
fn resolve_kinds(outline: &mut Outline) {
    let total = outline.units.len();
    for unit in &mut outline.units {
        unit.kind = outline::infer_kind(unit.kind, &unit.title, unit.position, total);
    }
}

/// Minimal outline used when the model never produced parseable JSON; the
/// deterministic correction then grows it to the contract.
fn synthesize_outline(request: &PlanRequest) -> Outline {
    let mut units = vec![OutlineUnit {
        position: 1,
        title: request.topic.clone(),
        content_points: vec![format!("An overview of {}", request.topic)],
        kind: UnitKind::Title,
    }];
    for topic in &request.focus_topics {
        units.push(OutlineUnit {
            position: 0,
            title: topic.clone(),
            content_points: vec![format!("Key aspects of {topic}")],
            kind: UnitKind::Content,
        });
    }
    units.push(OutlineUnit {
        position: 0,
        title: "Summary".to_string(),
        content_points: vec![format!("Recap of {}", request.topic)],
        kind: UnitKind::Closing,
    });

    let mut outline = Outline {
        title: request.topic.clone(),
        units,
        metadata: Default::default(),
    };
    outline.renumber();
    outline
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_outline_is_valid() {
        let request = PlanRequest {
            topic: "Edge caching".to_string(),
            focus_topics: vec!["TTLs".to_string()],
            ..PlanRequest::default()
        };
        let outline = synthesize_outline(&request);
        assert!(outline::validate(&outline, &PageCountContract::Open).is_empty());
        assert_eq!(outline.units.first().unwrap().kind, UnitKind::Title);
        assert_eq!(outline.units.last().unwrap().kind, UnitKind::Closing);
    }

    #[test]
    fn repair_prompt_itemizes_errors() {
        let errors = vec![
            ValidationError::new("unit 2 has no content points"),
            ValidationError::new("metadata.unit_count is 4 but the outline has 3 units"),
        ];
        let prompt = repair_prompt("{}", &errors, &PageCountContract::fixed(3));
        assert!(prompt.contains("- unit 2 has no content points"));
        assert!(prompt.contains("exactly 3 slides"));
    }
}
