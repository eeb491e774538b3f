mod common;

use std::sync::Arc;

use common::{Reply, ScriptedText, fenced_slide};
use lucido::application::renderer::{RendererOptions, UnitRenderer};
use lucido::application::{DeckContext, structure};
use lucido::domain::outline::{OutlineUnit, UnitKind};
use lucido::domain::units::UnitSource;
use uuid::Uuid;

fn unit(position: u32) -> OutlineUnit {
    OutlineUnit {
        position,
        title: format!("Slide {position}"),
        content_points: vec!["First point".to_string(), "Second point".to_string()],
        kind: UnitKind::Content,
    }
}

fn ctx() -> DeckContext {
    let mut ctx = DeckContext::new(Uuid::new_v4(), "Integration topic");
    ctx.total_units = 3;
    ctx
}

fn renderer(text: Arc<ScriptedText>, max_attempts: u32) -> UnitRenderer {
    UnitRenderer::new(
        text,
        RendererOptions {
            max_attempts,
            base_temperature: 0.7,
            model: None,
        },
    )
}

#[tokio::test]
async fn well_formed_response_is_accepted_first_try() {
    let text = Arc::new(ScriptedText::of(&[&fenced_slide("Slide 2")]));
    let renderer = renderer(text.clone(), 5);

    let rendered = renderer.render(&unit(2), &ctx(), "plain style").await;

    assert_eq!(text.call_count(), 1);
    assert_eq!(rendered.source, UnitSource::Generated);
    assert!(rendered.markup.contains("Slide 2"));
    assert!(structure::check(&rendered.markup).is_acceptable());
}

#[tokio::test]
async fn broken_markup_is_repaired_locally() {
    // Unclosed div and p; the deterministic fixer closes them instead of
    // spending another model call.
    let broken = "```html\n<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
                  <title>Slide</title></head><body><div><p>dangling</body></html>\n```";
    let text = Arc::new(ScriptedText::of(&[broken]));
    let renderer = renderer(text.clone(), 5);

    let rendered = renderer.render(&unit(1), &ctx(), "plain style").await;

    assert_eq!(text.call_count(), 1);
    assert_eq!(rendered.source, UnitSource::RepairedByParser);
    assert!(structure::check(&rendered.markup).is_acceptable());
}

#[tokio::test]
async fn exhausted_retries_always_yield_usable_fallback() {
    let text = Arc::new(ScriptedText::new(vec![
        Reply::Fail,
        Reply::Fail,
        Reply::Fail,
        Reply::Fail,
        Reply::Fail,
    ]));
    let renderer = renderer(text.clone(), 5);

    let rendered = renderer.render(&unit(2), &ctx(), "plain style").await;

    assert_eq!(text.call_count(), 5);
    assert_eq!(rendered.source, UnitSource::Fallback);
    let report = structure::check(&rendered.markup);
    assert!(report.is_acceptable(), "{:?}", report.errors);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert!(rendered.markup.contains("Slide 2"));
    assert!(rendered.markup.contains("2 / 3"));
}

#[tokio::test]
async fn transient_failure_is_survived_by_a_later_attempt() {
    let text = Arc::new(ScriptedText::new(vec![
        Reply::Fail,
        Reply::text(fenced_slide("Slide 1")),
    ]));
    let renderer = renderer(text.clone(), 5);

    let rendered = renderer.render(&unit(1), &ctx(), "plain style").await;

    assert_eq!(text.call_count(), 2);
    assert_eq!(rendered.source, UnitSource::Generated);
}
