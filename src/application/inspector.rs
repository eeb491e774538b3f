//! Visual Inspector/Repairer: render off-screen, screenshot, ask the vision
//! model for a defect report, and conditionally repair past a severity gate.
//!
//! The stage is strictly best-effort. Any failure — browser missing, vision
//! collaborator unconfigured or erroring, repair producing unusable markup —
//! degrades to returning the original artifact unchanged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::domain::extract;
use crate::domain::report::{InspectionReport, UnparsablePolicy};
use crate::infra::browser::{RenderSurface, Viewport};
use crate::infra::llm::{CompletionRequest, LlmError, TextGenerator};
use crate::infra::vision::{ChatContent, ChatMessage, VisionModel};

use super::DeckContext;
use super::structure;

const SOURCE: &str = "application::inspector::VisualInspector";

#[derive(Debug, Clone)]
pub struct InspectorOptions {
    pub enabled: bool,
    pub viewport: Viewport,
    pub wait_budget: Duration,
    pub max_report_attempts: u32,
    pub unparsable_policy: UnparsablePolicy,
    pub repair_model: Option<String>,
}

impl Default for InspectorOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            viewport: Viewport::default(),
            wait_budget: Duration::from_secs(8),
            max_report_attempts: 3,
            unparsable_policy: UnparsablePolicy::default(),
            repair_model: None,
        }
    }
}

pub struct VisualInspector {
    browser: Option<Arc<dyn RenderSurface>>,
    vision: Option<Arc<dyn VisionModel>>,
    text: Arc<dyn TextGenerator>,
    options: InspectorOptions,
}

impl VisualInspector {
    pub fn new(
        browser: Option<Arc<dyn RenderSurface>>,
        vision: Option<Arc<dyn VisionModel>>,
        text: Arc<dyn TextGenerator>,
        options: InspectorOptions,
    ) -> Self {
        Self {
            browser,
            vision,
            text,
            options,
        }
    }

    /// A disabled or unconfigurable inspector that passes markup through.
    pub fn disabled(text: Arc<dyn TextGenerator>) -> Self {
        Self::new(
            None,
            None,
            text,
            InspectorOptions {
                enabled: false,
                ..InspectorOptions::default()
            },
        )
    }

    /// Inspect and possibly repair one artifact. Always returns usable
    /// markup; the original is the safe result on every failure path.
    pub async fn inspect_and_repair(&self, markup: &str, ctx: &DeckContext) -> String {
        if !self.options.enabled {
            return markup.to_string();
        }
        let (Some(browser), Some(vision)) = (self.browser.as_ref(), self.vision.as_ref()) else {
            counter!("lucido_inspection_skipped_total").increment(1);
            debug!(
                target = "lucido::inspector",
                source = SOURCE,
                "inspection surface or vision model unavailable, passing through"
            );
            return markup.to_string();
        };

        let started = Instant::now();
        let result = self
            .try_inspect(browser.as_ref(), vision.as_ref(), markup, ctx)
            .await;
        histogram!("lucido_inspection_ms").record(started.elapsed().as_millis() as f64);

        match result {
            Ok(Some(repaired)) => {
                counter!("lucido_inspection_repair_total").increment(1);
                repaired
            }
            Ok(None) => {
                counter!("lucido_inspection_skipped_total").increment(1);
                markup.to_string()
            }
            Err(err) => {
                counter!("lucido_inspection_skipped_total").increment(1);
                warn!(
                    target = "lucido::inspector",
                    source = SOURCE,
                    project = %ctx.project,
                    error = %err,
                    "inspection degraded to no-op"
                );
                markup.to_string()
            }
        }
    }

    async fn try_inspect(
        &self,
        browser: &dyn RenderSurface,
        vision: &dyn VisionModel,
        markup: &str,
        ctx: &DeckContext,
    ) -> Result<Option<String>, InspectError> {
        let screenshot = browser
            .render_to_image(markup, self.options.viewport, self.options.wait_budget)
            .await
            .map_err(|err| InspectError::Render(err.to_string()))?;

        let report = self.request_report(vision, screenshot).await?;

        if !report.needs_repair(self.options.unparsable_policy) {
            debug!(
                target = "lucido::inspector",
                source = SOURCE,
                defects = report.defects.len(),
                max_severity = ?report.max_severity(),
                "severity gate closed, keeping original markup"
            );
            return Ok(None);
        }

        self.request_repair(markup, &report, ctx).await
    }

    async fn request_report(
        &self,
        vision: &dyn VisionModel,
        screenshot: Vec<u8>,
    ) -> Result<InspectionReport, InspectError> {
        let mut last = String::new();
        for attempt in 1..=self.options.max_report_attempts.max(1) {
            let messages = vec![
                ChatMessage::system(
                    "You are a meticulous slide layout reviewer. Respond with JSON only.",
                ),
                ChatMessage::user(vec![
                    ChatContent::Text(CHECKLIST_PROMPT.to_string()),
                    ChatContent::Image {
                        data: screenshot.clone(),
                        mime: "image/png".to_string(),
                    },
                ]),
            ];

            match vision.complete(messages).await {
                Ok(completion) => return Ok(InspectionReport::parse(&completion.content)),
                Err(err @ LlmError::Unconfigured(_)) => {
                    return Err(InspectError::Vision(err.to_string()));
                }
                Err(err) => {
                    warn!(
                        target = "lucido::inspector",
                        source = SOURCE,
                        attempt,
                        error = %err,
                        "defect report request failed"
                    );
                    last = err.to_string();
                }
            }
        }
        Err(InspectError::Vision(last))
    }

    /// Severity-gated second model call. The repaired markup replaces the
    /// original only when it is non-empty, different, and structurally
    /// sound; anything else keeps the original.
    async fn request_repair(
        &self,
        markup: &str,
        report: &InspectionReport,
        ctx: &DeckContext,
    ) -> Result<Option<String>, InspectError> {
        let completion = self
            .text
            .complete(CompletionRequest {
                prompt: repair_prompt(markup, report, ctx),
                system: Some(
                    "You are a careful HTML surgeon fixing only reported layout defects."
                        .to_string(),
                ),
                model: self.options.repair_model.clone(),
                temperature: Some(0.2),
                ..CompletionRequest::default()
            })
            .await
            .map_err(|err| InspectError::Repair(err.to_string()))?;

        let repaired = extract::html_candidate(&completion.content);
        if repaired.trim().is_empty() || repaired == markup {
            return Ok(None);
        }
        if !structure::check(&repaired).is_acceptable() {
            warn!(
                target = "lucido::inspector",
                source = SOURCE,
                "vision repair produced structurally invalid markup, keeping original"
            );
            return Ok(None);
        }
        Ok(Some(repaired))
    }
}

const CHECKLIST_PROMPT: &str = "Inspect this rendered slide for visual defects. Check: \
clipped or overlapping text, content overflowing the canvas, unbalanced whitespace, poor \
color contrast, visible scrollbars. Respond with JSON: {\"defects\": [{\"description\": \
\"...\", \"severity\": \"low|medium|high\"}]}. Use an empty array when the slide is clean.";

fn repair_prompt(markup: &str, report: &InspectionReport, ctx: &DeckContext) -> String {
    format!(
        "This HTML slide (part of a deck about \"{topic}\") has visual defects.\n\n\
         Defect report:\n{report}\n\nHTML:\n```html\n{markup}\n```\n\n\
         Fix only the flagged issues. Preserve header, footer, and pagination regions \
         exactly. Return the full corrected document in a single ```html fence.",
        topic = ctx.topic,
        report = report.raw,
    )
}

#[derive(Debug, thiserror::Error)]
enum InspectError {
    #[error("off-screen render failed: {0}")]
    Render(String),
    #[error("vision report unavailable: {0}")]
    Vision(String),
    #[error("repair call failed: {0}")]
    Repair(String),
}
