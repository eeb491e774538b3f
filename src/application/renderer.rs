//! Unit Renderer: one outline unit to one self-contained HTML artifact.
//!
//! Never fails. The fallback ladder runs: model generation with structural
//! validation → deterministic auto-fix → regenerate with a cooler prompt →
//! locally synthesized template. Hard structural errors drive retries;
//! boilerplate warnings never do.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use crate::domain::extract;
use crate::domain::outline::OutlineUnit;
use crate::domain::units::{GenerationAttempt, RenderedUnit, UnitSource};
use crate::infra::llm::{CompletionRequest, TextGenerator};

use super::DeckContext;
use super::structure;

const SOURCE: &str = "application::renderer::UnitRenderer";

#[derive(Debug, Clone)]
pub struct RendererOptions {
    pub max_attempts: u32,
    pub base_temperature: f32,
    pub model: Option<String>,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_temperature: 0.7,
            model: None,
        }
    }
}

pub struct UnitRenderer {
    text: Arc<dyn TextGenerator>,
    options: RendererOptions,
}

impl UnitRenderer {
    pub fn new(text: Arc<dyn TextGenerator>, options: RendererOptions) -> Self {
        Self { text, options }
    }

    /// Render a unit into usable markup. Always returns; the `source` field
    /// records which rung of the ladder produced the result.
    pub async fn render(
        &self,
        unit: &OutlineUnit,
        ctx: &DeckContext,
        style_guide: &str,
    ) -> RenderedUnit {
        let mut attempt = GenerationAttempt::new(self.options.max_attempts);

        while attempt.begin() {
            counter!("lucido_render_attempts_total").increment(1);

            let request = CompletionRequest {
                prompt: self.prompt(unit, ctx, style_guide, &attempt),
                system: Some(SYSTEM_PROMPT.to_string()),
                model: self.options.model.clone(),
                temperature: Some(attempt.temperature(self.options.base_temperature)),
                ..CompletionRequest::default()
            };

            let raw = match self.text.complete(request).await {
                Ok(completion) => completion.content,
                Err(err) => {
                    warn!(
                        target = "lucido::renderer",
                        source = SOURCE,
                        position = unit.position,
                        attempt = attempt.attempt(),
                        error = %err,
                        "generation call failed"
                    );
                    attempt.record(err.to_string());
                    continue;
                }
            };

            let markup = extract::html_candidate(&raw);
            let report = structure::check(&markup);
            if report.is_acceptable() {
                if !report.warnings.is_empty() {
                    debug!(
                        target = "lucido::renderer",
                        source = SOURCE,
                        position = unit.position,
                        warnings = report.warnings.len(),
                        "accepting markup with boilerplate warnings"
                    );
                }
                counter!("lucido_units_rendered_total", "source" => UnitSource::Generated.as_str())
                    .increment(1);
                return RenderedUnit {
                    position: unit.position,
                    markup,
                    source: UnitSource::Generated,
                };
            }

            // Cheap local repair before spending another model call.
            if let Some(fixed) = structure::auto_fix(&markup)
                && structure::check(&fixed).is_acceptable()
            {
                counter!(
                    "lucido_units_rendered_total",
                    "source" => UnitSource::RepairedByParser.as_str()
                )
                .increment(1);
                return RenderedUnit {
                    position: unit.position,
                    markup: fixed,
                    source: UnitSource::RepairedByParser,
                };
            }

            let summary = report
                .errors
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            warn!(
                target = "lucido::renderer",
                source = SOURCE,
                position = unit.position,
                attempt = attempt.attempt(),
                errors = %summary,
                "generated markup failed structural check"
            );
            attempt.record(summary);
        }

        counter!("lucido_render_fallback_total").increment(1);
        counter!("lucido_units_rendered_total", "source" => UnitSource::Fallback.as_str())
            .increment(1);
        warn!(
            target = "lucido::renderer",
            source = SOURCE,
            position = unit.position,
            attempts = attempt.max_attempts(),
            last_error = attempt.last_error().unwrap_or("none"),
            "retries exhausted, emitting fallback template"
        );

        RenderedUnit {
            position: unit.position,
            markup: fallback_markup(unit, ctx),
            source: UnitSource::Fallback,
        }
    }

    fn prompt(
        &self,
        unit: &OutlineUnit,
        ctx: &DeckContext,
        style_guide: &str,
        attempt: &GenerationAttempt,
    ) -> String {
        let role_hint = position_hint(unit, ctx.total_units);
        let points = unit
            .content_points
            .iter()
            .map(|p| format!("- {p}"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut prompt = format!(
            "Create slide {position} of {total} for a deck about \"{topic}\".\n\
             Slide title: {title}\n\
             Content points:\n{points}\n\
             {role_hint}\n\
             Style guide: {style_guide}\n\
             Produce one complete, self-contained HTML document (inline CSS only) sized for a \
             1280x720 canvas. Respond with a single ```html fence.",
            position = unit.position,
            total = ctx.total_units,
            topic = ctx.topic,
            title = unit.title,
        );

        if attempt.attempt() > 1 {
            prompt.push_str(
                "\nThe previous attempt produced malformed HTML. Regenerate the complete \
                 document from scratch; every tag must be closed.",
            );
        }
        prompt
    }
}

const SYSTEM_PROMPT: &str =
    "You are a slide engineer producing valid, self-contained HTML documents.";

fn position_hint(unit: &OutlineUnit, total: usize) -> &'static str {
    if unit.position <= 1 {
        "This is the opening slide: make the title dominant and inviting."
    } else if unit.position as usize >= total {
        "This is the closing slide: wrap up and leave a clear final impression."
    } else {
        "This is a middle slide: favor clear content hierarchy over decoration."
    }
}

/// Locally synthesized, always-well-formed fallback used when every model
/// attempt failed. Plain layout, no external resources.
pub fn fallback_markup(unit: &OutlineUnit, ctx: &DeckContext) -> String {
    let points = unit
        .content_points
        .iter()
        .map(|p| format!("      <li>{}</li>\n", escape_html(p)))
        .collect::<String>();

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n\
         <style>\n  body {{ margin: 0; width: 1280px; height: 720px; display: flex; \
         flex-direction: column; justify-content: center; padding: 0 96px; \
         box-sizing: border-box; font-family: sans-serif; background: #ffffff; \
         color: #1e293b; }}\n  h1 {{ font-size: 54px; margin: 0 0 32px; }}\n  \
         li {{ font-size: 28px; line-height: 1.6; }}\n  footer {{ position: absolute; \
         bottom: 24px; right: 48px; font-size: 18px; color: #64748b; }}\n</style>\n\
         </head>\n<body>\n  <h1>{title}</h1>\n  <ul>\n{points}  </ul>\n  \
         <footer>{position} / {total}</footer>\n</body>\n</html>\n",
        title = escape_html(&unit.title),
        position = unit.position,
        total = ctx.total_units,
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outline::UnitKind;
    use uuid::Uuid;

    fn unit() -> OutlineUnit {
        OutlineUnit {
            position: 2,
            title: "Cache <Invalidation> & You".to_string(),
            content_points: vec!["Hard problem".to_string(), "Naming things".to_string()],
            kind: UnitKind::Content,
        }
    }

    fn ctx() -> DeckContext {
        let mut ctx = DeckContext::new(Uuid::new_v4(), "Systems humor");
        ctx.total_units = 3;
        ctx
    }

    #[test]
    fn fallback_markup_passes_structural_check() {
        let markup = fallback_markup(&unit(), &ctx());
        let report = structure::check(&markup);
        assert!(report.is_acceptable(), "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn fallback_markup_escapes_content() {
        let markup = fallback_markup(&unit(), &ctx());
        assert!(markup.contains("Cache &lt;Invalidation&gt; &amp; You"));
        assert!(markup.contains("2 / 3"));
    }

    #[test]
    fn position_hint_tracks_role() {
        let mut u = unit();
        u.position = 1;
        assert!(position_hint(&u, 3).contains("opening"));
        u.position = 3;
        assert!(position_hint(&u, 3).contains("closing"));
        u.position = 2;
        assert!(position_hint(&u, 3).contains("middle"));
    }
}
