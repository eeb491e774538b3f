//! Visual inspection reports and the severity gate.

use serde::{Deserialize, Serialize};

use crate::domain::extract;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "low" | "minor" => Some(Severity::Low),
            "medium" | "moderate" => Some(Severity::Medium),
            "high" | "severe" | "critical" => Some(Severity::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    pub description: String,
    pub severity: Severity,
}

/// Policy for reports whose severities cannot be parsed at all. Skipping is
/// the default: an unreadable report is weak evidence, and the inspector
/// contract prefers returning the original artifact over destabilizing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnparsablePolicy {
    #[default]
    SkipRepair,
    AttemptRepair,
}

/// A parsed defect report. Ephemeral: consumed immediately by the repair
/// decision, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectionReport {
    pub raw: String,
    pub defects: Vec<Defect>,
    /// Structured parsing succeeded and the model explicitly reported zero
    /// defects. Distinct from an unreadable report, which also has no
    /// recognizable severities but carries no verdict at all.
    clean: bool,
}

#[derive(Deserialize)]
struct WireReport {
    #[serde(default)]
    defects: Vec<WireDefect>,
}

#[derive(Deserialize)]
struct WireDefect {
    description: String,
    #[serde(default)]
    severity: Option<String>,
}

impl InspectionReport {
    /// Parse a free-text report. Tries structured JSON first (an object with
    /// a `defects` array, or a bare array), then falls back to scanning
    /// lines for severity markers. Defects with unrecognizable severity are
    /// dropped rather than guessed.
    pub fn parse(raw: &str) -> Self {
        let candidate = extract::json_candidate(raw);

        let wire_defects = serde_json::from_str::<WireReport>(&candidate)
            .map(|report| report.defects)
            .or_else(|_| serde_json::from_str::<Vec<WireDefect>>(&candidate))
            .ok();
        let clean = matches!(&wire_defects, Some(list) if list.is_empty());

        let mut defects: Vec<Defect> = wire_defects
            .unwrap_or_default()
            .into_iter()
            .filter_map(|defect| {
                let severity = defect.severity.as_deref().and_then(Severity::parse)?;
                Some(Defect {
                    description: defect.description,
                    severity,
                })
            })
            .collect();

        if defects.is_empty() && !clean {
            defects = scan_lines(raw);
        }

        Self {
            raw: raw.to_string(),
            defects,
            clean,
        }
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.defects.iter().map(|d| d.severity).max()
    }

    /// Severity gate: repair only when at least one defect exceeds `Low`.
    /// An explicitly empty defect list always closes the gate; only reports
    /// with no recognizable severities at all defer to `policy`.
    pub fn needs_repair(&self, policy: UnparsablePolicy) -> bool {
        match self.max_severity() {
            Some(severity) => severity > Severity::Low,
            None if self.clean => false,
            None => policy == UnparsablePolicy::AttemptRepair,
        }
    }
}

/// Line-based fallback for prose reports: `severity: high` or a leading
/// `[high]` marker attaches the rest of the line as the description.
fn scan_lines(raw: &str) -> Vec<Defect> {
    let mut defects = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim().trim_start_matches(['-', '*', ' ']);
        if trimmed.is_empty() {
            continue;
        }

        let severity = if let Some(rest) = trimmed.strip_prefix('[') {
            rest.split_once(']')
                .and_then(|(tag, _)| Severity::parse(tag))
        } else {
            trimmed.to_lowercase().find("severity:").and_then(|idx| {
                let tail = &trimmed[idx + "severity:".len()..];
                Severity::parse(tail.split(|c: char| c == ',' || c == ';').next().unwrap_or(""))
            })
        };

        if let Some(severity) = severity {
            defects.push(Defect {
                description: trimmed.to_string(),
                severity,
            });
        }
    }
    defects
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_report_parses() {
        let raw = r#"{"defects": [
            {"description": "text clipped at bottom", "severity": "high"},
            {"description": "slightly uneven margins", "severity": "low"}
        ]}"#;
        let report = InspectionReport::parse(raw);
        assert_eq!(report.defects.len(), 2);
        assert_eq!(report.max_severity(), Some(Severity::High));
        assert!(report.needs_repair(UnparsablePolicy::default()));
    }

    #[test]
    fn fenced_report_parses() {
        let raw = "```json\n{\"defects\":[{\"description\":\"overflow\",\"severity\":\"medium\"}]}\n```";
        let report = InspectionReport::parse(raw);
        assert_eq!(report.max_severity(), Some(Severity::Medium));
    }

    #[test]
    fn all_low_skips_repair() {
        let raw = r#"{"defects": [{"description": "minor nit", "severity": "low"}]}"#;
        let report = InspectionReport::parse(raw);
        assert!(!report.needs_repair(UnparsablePolicy::default()));
    }

    #[test]
    fn prose_fallback_finds_markers() {
        let raw = "- [high] heading overlaps the chart\n- looks fine otherwise";
        let report = InspectionReport::parse(raw);
        assert_eq!(report.defects.len(), 1);
        assert_eq!(report.defects[0].severity, Severity::High);
    }

    #[test]
    fn severity_colon_marker_is_recognized() {
        let raw = "Body text overflows the canvas, severity: medium, needs attention";
        let report = InspectionReport::parse(raw);
        assert_eq!(report.max_severity(), Some(Severity::Medium));
    }

    #[test]
    fn unparsable_report_defers_to_policy() {
        let report = InspectionReport::parse("everything looks broken somehow");
        assert!(!report.needs_repair(UnparsablePolicy::SkipRepair));
        assert!(report.needs_repair(UnparsablePolicy::AttemptRepair));
    }

    #[test]
    fn unknown_severity_word_is_dropped_not_guessed() {
        let raw = r#"{"defects": [{"description": "odd", "severity": "catastrophic-ish"}]}"#;
        let report = InspectionReport::parse(raw);
        assert!(report.defects.is_empty());
        // Severities were present but unreadable, so the policy decides.
        assert!(report.needs_repair(UnparsablePolicy::AttemptRepair));
    }

    #[test]
    fn explicitly_clean_report_closes_the_gate_under_any_policy() {
        for raw in [r#"{"defects": []}"#, "```json\n{\"defects\": []}\n```", "[]"] {
            let report = InspectionReport::parse(raw);
            assert!(report.defects.is_empty());
            assert!(!report.needs_repair(UnparsablePolicy::SkipRepair), "{raw}");
            assert!(!report.needs_repair(UnparsablePolicy::AttemptRepair), "{raw}");
        }
    }
}
