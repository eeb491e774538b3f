//! Outline model: planned deck structure plus the pure checks the planner
//! relies on.
//!
//! Everything here is deterministic and side-effect free. The planner feeds
//! model output through [`validate`] and, once a candidate is accepted,
//! through [`enforce_contract`] so that the page-count contract holds even
//! when the model never produced a conforming outline.

use serde::{Deserialize, Serialize};

/// Role a planned unit plays within the deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Title,
    #[default]
    Content,
    Agenda,
    Closing,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Title => "title",
            UnitKind::Content => "content",
            UnitKind::Agenda => "agenda",
            UnitKind::Closing => "closing",
        }
    }
}

/// One planned slide. Immutable once the outline is accepted; repair rounds
/// replace the whole [`Outline`], never individual units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineUnit {
    #[serde(default)]
    pub position: u32,
    pub title: String,
    #[serde(default)]
    pub content_points: Vec<String>,
    #[serde(default)]
    pub kind: UnitKind,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutlineMetadata {
    #[serde(default)]
    pub unit_count: usize,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub title: String,
    #[serde(default)]
    pub units: Vec<OutlineUnit>,
    #[serde(default)]
    pub metadata: OutlineMetadata,
}

impl Outline {
    /// Rewrite `position` values into a contiguous 1..N sequence matching
    /// array order and refresh `metadata.unit_count`.
    pub fn renumber(&mut self) {
        for (index, unit) in self.units.iter_mut().enumerate() {
            unit.position = index as u32 + 1;
        }
        self.metadata.unit_count = self.units.len();
    }
}

/// Page-count contract supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PageCountContract {
    Fixed { count: u32 },
    Range { min: u32, max: u32 },
    Open,
}

impl PageCountContract {
    pub fn fixed(count: u32) -> Self {
        Self::Fixed { count }
    }

    pub fn range(min: u32, max: u32) -> Self {
        Self::Range { min, max }
    }

    pub fn permits(&self, len: usize) -> bool {
        match *self {
            PageCountContract::Fixed { count } => len == count as usize,
            PageCountContract::Range { min, max } => {
                len >= min as usize && len <= max as usize
            }
            PageCountContract::Open => true,
        }
    }

    /// Natural-language rendering embedded into planner prompts.
    pub fn describe(&self) -> String {
        match *self {
            PageCountContract::Fixed { count } => {
                format!("exactly {count} slides")
            }
            PageCountContract::Range { min, max } => {
                format!("between {min} and {max} slides (inclusive)")
            }
            PageCountContract::Open => "however many slides the topic needs".to_string(),
        }
    }

    /// Unit count a non-conforming outline is corrected towards.
    fn target(&self, len: usize) -> usize {
        match *self {
            PageCountContract::Fixed { count } => count as usize,
            PageCountContract::Range { min, max } => {
                len.clamp(min as usize, max as usize)
            }
            PageCountContract::Open => len,
        }
    }
}

/// A single structural problem found in a candidate outline. A non-empty
/// list blocks acceptance and feeds the repair prompt verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Pure structural check over a candidate outline, including the page-count
/// contract. Returns every problem found, not just the first.
pub fn validate(outline: &Outline, contract: &PageCountContract) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if outline.title.trim().is_empty() {
        errors.push(ValidationError::new("outline title is empty"));
    }

    if outline.units.is_empty() {
        errors.push(ValidationError::new("outline has no units"));
        return errors;
    }

    for (index, unit) in outline.units.iter().enumerate() {
        let expected = index as u32 + 1;
        if unit.position != expected {
            errors.push(ValidationError::new(format!(
                "unit at index {index} has position {} but expected {expected} \
                 (positions must form a contiguous 1..N sequence)",
                unit.position
            )));
        }
        if unit.title.trim().is_empty() {
            errors.push(ValidationError::new(format!(
                "unit {expected} has an empty title"
            )));
        }
        if unit.content_points.is_empty() {
            errors.push(ValidationError::new(format!(
                "unit {expected} has no content points"
            )));
        } else if unit.content_points.iter().any(|p| p.trim().is_empty()) {
            errors.push(ValidationError::new(format!(
                "unit {expected} contains a blank content point"
            )));
        }
    }

    if outline.metadata.unit_count != outline.units.len() {
        errors.push(ValidationError::new(format!(
            "metadata.unit_count is {} but the outline has {} units",
            outline.metadata.unit_count,
            outline.units.len()
        )));
    }

    if !contract.permits(outline.units.len()) {
        errors.push(ValidationError::new(format!(
            "outline has {} units but the contract requires {}",
            outline.units.len(),
            contract.describe()
        )));
    }

    errors
}

/// Resolve the final `kind` of a unit from the explicit field plus keyword
/// heuristics on the title. The heuristics only override the generic default
/// (`content`); an explicit non-default kind always wins.
pub fn infer_kind(explicit: UnitKind, title: &str, position: u32, total: usize) -> UnitKind {
    if explicit != UnitKind::Content {
        return explicit;
    }

    let lowered = title.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

    if has(&["agenda", "overview", "outline", "contents"]) {
        return UnitKind::Agenda;
    }
    if has(&["thank", "questions", "q&a", "conclusion", "summary", "closing"]) {
        return UnitKind::Closing;
    }
    if position == 1 && total > 1 && has(&["introduction", "welcome", "title"]) {
        return UnitKind::Title;
    }

    UnitKind::Content
}

/// Deterministic page-count correction, independent of the model.
///
/// Preserves a leading title unit and a trailing closing unit where present.
/// When short, synthesizes content units from leftover focus topics (or
/// generic placeholders); when long, truncates interior content units.
/// Positions are renumbered after any edit.
pub fn enforce_contract(
    mut outline: Outline,
    contract: &PageCountContract,
    focus_topics: &[String],
) -> Outline {
    if outline.units.is_empty() {
        outline.renumber();
        return outline;
    }

    let target = contract.target(outline.units.len());
    if target == 0 || outline.units.len() == target {
        outline.renumber();
        return outline;
    }

    if outline.units.len() < target {
        grow_to(&mut outline, target, focus_topics);
    } else {
        shrink_to(&mut outline, target);
    }

    outline.renumber();
    outline
}

fn grow_to(outline: &mut Outline, target: usize, focus_topics: &[String]) {
    // Titles already covered by existing units must not be duplicated when
    // synthesizing from leftover focus topics.
    let covered: Vec<String> = outline
        .units
        .iter()
        .map(|u| u.title.to_lowercase())
        .collect();
    let mut leftovers = focus_topics
        .iter()
        .filter(|topic| {
            let lowered = topic.to_lowercase();
            !covered.iter().any(|t| t.contains(&lowered))
        })
        .cloned()
        .collect::<Vec<_>>()
        .into_iter();

    let insert_at = if outline
        .units
        .last()
        .is_some_and(|u| u.kind == UnitKind::Closing)
    {
        outline.units.len() - 1
    } else {
        outline.units.len()
    };

    let mut insert_at = insert_at;
    let mut placeholder = 0usize;
    while outline.units.len() < target {
        let title = match leftovers.next() {
            Some(topic) => topic,
            None => {
                placeholder += 1;
                format!("Additional discussion {placeholder}")
            }
        };
        outline.units.insert(
            insert_at,
            OutlineUnit {
                position: 0,
                content_points: vec![format!("Key aspects of {title}")],
                title,
                kind: UnitKind::Content,
            },
        );
        insert_at += 1;
    }
}

fn shrink_to(outline: &mut Outline, target: usize) {
    let keep_first = outline.units.first().is_some_and(|u| u.kind == UnitKind::Title);
    let keep_last = outline.units.last().is_some_and(|u| u.kind == UnitKind::Closing);

    // Drop interior content units from the back of the interior range first.
    while outline.units.len() > target {
        let lower = usize::from(keep_first);
        let upper = outline.units.len() - usize::from(keep_last);
        let removable = (lower..upper)
            .rev()
            .find(|&i| outline.units[i].kind == UnitKind::Content);

        match removable {
            Some(index) => {
                outline.units.remove(index);
            }
            None => {
                // Interior exhausted; truncate from the tail.
                outline.units.truncate(target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(position: u32, title: &str, kind: UnitKind) -> OutlineUnit {
        OutlineUnit {
            position,
            title: title.to_string(),
            content_points: vec![format!("{title} details")],
            kind,
        }
    }

    fn outline(units: Vec<OutlineUnit>) -> Outline {
        let unit_count = units.len();
        Outline {
            title: "Rust in Production".to_string(),
            units,
            metadata: OutlineMetadata {
                unit_count,
                ..OutlineMetadata::default()
            },
        }
    }

    #[test]
    fn valid_outline_passes() {
        let deck = outline(vec![
            unit(1, "Cover", UnitKind::Title),
            unit(2, "Ownership", UnitKind::Content),
            unit(3, "Thanks", UnitKind::Closing),
        ]);
        assert!(validate(&deck, &PageCountContract::Open).is_empty());
    }

    #[test]
    fn position_gap_reports_exactly_one_error() {
        let deck = outline(vec![
            unit(1, "Cover", UnitKind::Title),
            unit(3, "Ownership", UnitKind::Content),
        ]);
        let errors = validate(&deck, &PageCountContract::Open);
        let gap_errors: Vec<_> = errors
            .iter()
            .filter(|e| e.message.contains("contiguous"))
            .collect();
        assert_eq!(gap_errors.len(), 1);
    }

    #[test]
    fn renumber_fixes_position_gap() {
        let mut deck = outline(vec![
            unit(1, "Cover", UnitKind::Title),
            unit(3, "Ownership", UnitKind::Content),
        ]);
        deck.renumber();
        assert!(validate(&deck, &PageCountContract::Open).is_empty());
    }

    #[test]
    fn blank_content_point_is_rejected() {
        let mut deck = outline(vec![unit(1, "Cover", UnitKind::Title)]);
        deck.units[0].content_points.push("   ".to_string());
        let errors = validate(&deck, &PageCountContract::Open);
        assert!(errors.iter().any(|e| e.message.contains("blank content point")));
    }

    #[test]
    fn unit_count_mismatch_is_reported() {
        let mut deck = outline(vec![unit(1, "Cover", UnitKind::Title)]);
        deck.metadata.unit_count = 7;
        let errors = validate(&deck, &PageCountContract::Open);
        assert!(errors.iter().any(|e| e.message.contains("unit_count")));
    }

    #[test]
    fn contract_violation_is_reported() {
        let deck = outline(vec![unit(1, "Cover", UnitKind::Title)]);
        let errors = validate(&deck, &PageCountContract::fixed(3));
        assert!(errors.iter().any(|e| e.message.contains("exactly 3 slides")));
    }

    #[test]
    fn correction_synthesizes_missing_units() {
        let deck = outline(vec![
            unit(1, "Cover", UnitKind::Title),
            unit(2, "Ownership", UnitKind::Content),
            unit(3, "Thanks", UnitKind::Closing),
        ]);
        let focus = vec!["Borrow checker".to_string(), "Async".to_string()];
        let fixed = enforce_contract(deck, &PageCountContract::fixed(5), &focus);

        assert_eq!(fixed.units.len(), 5);
        assert_eq!(fixed.units[0].kind, UnitKind::Title);
        assert_eq!(fixed.units[4].kind, UnitKind::Closing);
        assert_eq!(fixed.units[2].title, "Borrow checker");
        assert_eq!(fixed.units[3].title, "Async");
        assert!(validate(&fixed, &PageCountContract::fixed(5)).is_empty());
    }

    #[test]
    fn correction_falls_back_to_placeholders() {
        let deck = outline(vec![unit(1, "Cover", UnitKind::Title)]);
        let fixed = enforce_contract(deck, &PageCountContract::fixed(3), &[]);
        assert_eq!(fixed.units.len(), 3);
        assert!(fixed.units[1].title.starts_with("Additional discussion"));
        assert!(fixed.units[1].content_points[0].contains("Additional discussion"));
    }

    #[test]
    fn correction_truncates_interior_units() {
        let deck = outline(vec![
            unit(1, "Cover", UnitKind::Title),
            unit(2, "One", UnitKind::Content),
            unit(3, "Two", UnitKind::Content),
            unit(4, "Three", UnitKind::Content),
            unit(5, "Thanks", UnitKind::Closing),
        ]);
        let fixed = enforce_contract(deck, &PageCountContract::range(2, 3), &[]);
        assert_eq!(fixed.units.len(), 3);
        assert_eq!(fixed.units[0].kind, UnitKind::Title);
        assert_eq!(fixed.units.last().unwrap().kind, UnitKind::Closing);
        // The earliest interior content unit survives.
        assert_eq!(fixed.units[1].title, "One");
    }

    #[test]
    fn range_contract_keeps_conforming_length() {
        let deck = outline(vec![
            unit(1, "Cover", UnitKind::Title),
            unit(2, "One", UnitKind::Content),
            unit(3, "Thanks", UnitKind::Closing),
        ]);
        let fixed = enforce_contract(deck.clone(), &PageCountContract::range(2, 5), &[]);
        assert_eq!(fixed.units.len(), deck.units.len());
    }

    #[test]
    fn explicit_kind_wins_over_heuristics() {
        assert_eq!(
            infer_kind(UnitKind::Title, "Agenda for today", 1, 5),
            UnitKind::Title
        );
    }

    #[test]
    fn heuristics_override_generic_default() {
        assert_eq!(
            infer_kind(UnitKind::Content, "Agenda for today", 2, 5),
            UnitKind::Agenda
        );
        assert_eq!(
            infer_kind(UnitKind::Content, "Thank you & questions", 5, 5),
            UnitKind::Closing
        );
        assert_eq!(
            infer_kind(UnitKind::Content, "Ownership in depth", 3, 5),
            UnitKind::Content
        );
    }
}
