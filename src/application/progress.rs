//! Append-only progress events emitted by the coordinator.
//!
//! Consumers read as produced; there is no replay or backpressure contract
//! beyond the channel capacity. In parallel mode only
//! persistence-before-emission per unit is guaranteed, not cross-unit
//! order — callers needing display order buffer and reorder by position.

use serde::Serialize;

use crate::domain::units::RenderedUnit;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum PipelineEvent {
    Progress {
        position: u32,
        stage: Stage,
    },
    Unit {
        unit: RenderedUnit,
        /// True when a manually-edited unit was re-emitted unchanged.
        skipped: bool,
    },
    Error {
        position: Option<u32>,
        message: String,
    },
    Done {
        rendered: usize,
        skipped: usize,
        failed: usize,
    },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Rendering,
    Inspecting,
    Persisted,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::units::UnitSource;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = PipelineEvent::Unit {
            unit: RenderedUnit {
                position: 2,
                markup: "<html></html>".to_string(),
                source: UnitSource::Generated,
            },
            skipped: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "unit");
        assert_eq!(json["payload"]["unit"]["position"], 2);
    }

    #[test]
    fn summary_wire_format_is_stable() {
        let event = PipelineEvent::Done {
            rendered: 3,
            skipped: 1,
            failed: 0,
        };
        insta::assert_snapshot!(
            serde_json::to_string(&event).unwrap(),
            @r#"{"type":"done","payload":{"rendered":3,"skipped":1,"failed":0}}"#
        );
    }
}
