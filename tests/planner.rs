mod common;

use std::sync::Arc;

use common::{Reply, ScriptedText};
use lucido::application::planner::{OutlinePlanner, PlanRequest, PlannerOptions};
use lucido::domain::outline::{self, PageCountContract, UnitKind};

fn outline_json(positions: &[u32]) -> String {
    let units = positions
        .iter()
        .map(|p| {
            format!(
                "{{\"position\": {p}, \"title\": \"Slide {p}\", \
                 \"content_points\": [\"point {p}\"]}}"
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "```json\n{{\"title\": \"Demo deck\", \"units\": [{units}], \
         \"metadata\": {{\"unit_count\": {}}}}}\n```",
        positions.len()
    )
}

fn request(topic: &str) -> PlanRequest {
    PlanRequest {
        topic: topic.to_string(),
        ..PlanRequest::default()
    }
}

fn planner(text: Arc<ScriptedText>, rounds: u32) -> OutlinePlanner {
    OutlinePlanner::new(
        text,
        PlannerOptions {
            max_repair_rounds: rounds,
            model: None,
        },
    )
}

#[tokio::test]
async fn clean_first_response_needs_no_repair() {
    let text = Arc::new(ScriptedText::of(&[&outline_json(&[1, 2, 3])]));
    let planner = planner(text.clone(), 10);

    let outline = planner
        .plan(&request("Demo"), &PageCountContract::fixed(3))
        .await
        .expect("plan succeeds");

    assert_eq!(text.call_count(), 1);
    assert!(outline::validate(&outline, &PageCountContract::fixed(3)).is_empty());
}

#[tokio::test]
async fn position_gap_costs_exactly_one_repair_round() {
    let text = Arc::new(ScriptedText::of(&[
        &outline_json(&[1, 3]),
        &outline_json(&[1, 2]),
    ]));
    let planner = planner(text.clone(), 10);

    let outline = planner
        .plan(&request("Demo"), &PageCountContract::Open)
        .await
        .expect("plan succeeds");

    assert_eq!(text.call_count(), 2);
    assert_eq!(outline.units.len(), 2);
    assert!(outline::validate(&outline, &PageCountContract::Open).is_empty());
}

#[tokio::test]
async fn stubborn_count_is_corrected_deterministically() {
    // The model keeps answering three units against a five-unit contract;
    // once repair rounds run out, synthesis closes the gap.
    let three = outline_json(&[1, 2, 3]);
    let text = Arc::new(ScriptedText::of(&[&three, &three, &three]));
    let planner = planner(text.clone(), 2);

    let outline = planner
        .plan(&request("Demo"), &PageCountContract::fixed(5))
        .await
        .expect("plan succeeds");

    assert_eq!(text.call_count(), 3);
    assert_eq!(outline.units.len(), 5);
    let positions: Vec<u32> = outline.units.iter().map(|u| u.position).collect();
    assert_eq!(positions, vec![1, 2, 3, 4, 5]);
    assert_eq!(outline.metadata.unit_count, 5);
}

#[tokio::test]
async fn garbage_responses_fall_back_to_synthesis() {
    let text = Arc::new(ScriptedText::of(&[
        "I would rather write a poem.",
        "Still not JSON.",
    ]));
    let planner = planner(text.clone(), 1);

    let outline = planner
        .plan(&request("Edge caching"), &PageCountContract::fixed(4))
        .await
        .expect("plan succeeds");

    assert_eq!(outline.units.len(), 4);
    assert_eq!(outline.units[0].kind, UnitKind::Title);
    assert!(outline::validate(&outline, &PageCountContract::fixed(4)).is_empty());
}

#[tokio::test]
async fn focus_topics_seed_synthesized_units() {
    let three = outline_json(&[1, 2, 3]);
    let text = Arc::new(ScriptedText::of(&[&three, &three]));
    let planner = planner(text.clone(), 1);

    let plan_request = PlanRequest {
        topic: "Demo".to_string(),
        focus_topics: vec!["Cache invalidation".to_string()],
        ..PlanRequest::default()
    };
    let outline = planner
        .plan(&plan_request, &PageCountContract::fixed(5))
        .await
        .expect("plan succeeds");

    assert!(
        outline
            .units
            .iter()
            .any(|u| u.title == "Cache invalidation"),
        "focus topic should back one synthesized unit"
    );
}

#[tokio::test]
async fn unreachable_collaborator_is_the_only_failure() {
    let text = Arc::new(ScriptedText::new(vec![Reply::Fail]));
    let planner = planner(text.clone(), 3);

    let result = planner.plan(&request("Demo"), &PageCountContract::Open).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn audience_and_style_land_in_metadata() {
    let text = Arc::new(ScriptedText::of(&[&outline_json(&[1, 2])]));
    let planner = planner(text.clone(), 10);

    let plan_request = PlanRequest {
        topic: "Demo".to_string(),
        audience: Some("executives".to_string()),
        style: Some("minimal".to_string()),
        ..PlanRequest::default()
    };
    let outline = planner
        .plan(&plan_request, &PageCountContract::Open)
        .await
        .expect("plan succeeds");

    assert_eq!(outline.metadata.audience.as_deref(), Some("executives"));
    assert_eq!(outline.metadata.style.as_deref(), Some("minimal"));
}
