//! Declarative recipe documents.
//!
//! One YAML document per file: `name`, `description`, optional `context`
//! defaults, and an ordered `steps` list. Each step carries `name`,
//! `topic`, `payload`, and an optional `wait_condition` that is either a
//! `{duration: seconds}` timeout or a `{topic, payload_contains}` message
//! gate. Unknown keys are tolerated and ignored.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use apsflow_core::{SequenceDefinition, SequenceStep, WaitIntent};

use crate::catalog::CatalogError;
use crate::validate::validate_definition;

/// Top-level declarative recipe.
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceDocument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    pub steps: Vec<StepDocument>,
}

/// One declarative step.
#[derive(Debug, Clone, Deserialize)]
pub struct StepDocument {
    pub name: String,
    pub topic: String,
    pub payload: Value,
    #[serde(default)]
    pub wait_condition: Option<WaitConditionDocument>,
}

/// Declarative wait condition, disambiguated by shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WaitConditionDocument {
    Timeout {
        /// Seconds.
        duration: f64,
    },
    Message {
        topic: String,
        #[serde(default)]
        payload_contains: Value,
    },
}

impl From<WaitConditionDocument> for WaitIntent {
    fn from(doc: WaitConditionDocument) -> Self {
        match doc {
            WaitConditionDocument::Timeout { duration } => WaitIntent::timeout(duration),
            WaitConditionDocument::Message {
                topic,
                payload_contains,
            } => WaitIntent::message(topic, payload_contains),
        }
    }
}

impl SequenceDocument {
    /// Normalize into the engine's value type, assigning 1-based step
    /// indices in document order, then validate.
    pub fn into_definition(self) -> Result<SequenceDefinition, CatalogError> {
        let steps = self
            .steps
            .into_iter()
            .enumerate()
            .map(|(pos, step)| {
                let mut normalized = SequenceStep::new(
                    (pos + 1) as u32,
                    step.name,
                    step.topic,
                    step.payload,
                );
                if let Some(condition) = step.wait_condition {
                    normalized = normalized.with_wait(condition.into());
                }
                normalized
            })
            .collect();

        let definition = SequenceDefinition::new(self.name, self.description, steps)
            .with_context_defaults(self.context);
        validate_definition(&definition)?;
        Ok(definition)
    }
}

/// Parse one YAML document into a validated definition.
pub fn parse_document(content: &str) -> Result<SequenceDefinition, CatalogError> {
    let document: SequenceDocument = serde_yaml::from_str(content)?;
    document.into_definition()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RECIPE: &str = r#"
name: mill_cycle
description: drive the mill through one cycle
context:
  module_serial: MILL1
steps:
  - name: PICK
    topic: module/v1/ff/{{module_serial}}/order
    payload:
      serialNumber: "{{module_serial}}"
      action:
        id: "{{action_id}}"
        command: PICK
        metadata: {}
      orderId: "{{orderId}}"
      orderUpdateId: "{{orderUpdateId}}"
    wait_condition:
      topic: module/v1/ff/MILL1/state
      payload_contains:
        actionState: IDLE
  - name: DROP
    topic: module/v1/ff/{{module_serial}}/order
    payload:
      command: DROP
    wait_condition:
      duration: 2.5
    vendor_extension: ignored
"#;

    #[test]
    fn test_parse_declarative_recipe() {
        let definition = parse_document(RECIPE).unwrap();
        assert_eq!(definition.name, "mill_cycle");
        assert_eq!(definition.steps.len(), 2);
        assert_eq!(definition.steps[0].step_index, 1);
        assert_eq!(
            definition.steps[0].wait_intent,
            Some(WaitIntent::message(
                "module/v1/ff/MILL1/state",
                json!({"actionState": "IDLE"})
            ))
        );
        assert_eq!(
            definition.steps[1].wait_intent,
            Some(WaitIntent::timeout(2.5))
        );
        assert_eq!(
            definition.context_defaults.get("module_serial"),
            Some(&json!("MILL1"))
        );
    }

    #[test]
    fn test_payload_key_order_survives_parse() {
        let definition = parse_document(RECIPE).unwrap();
        let keys: Vec<&str> = definition.steps[0]
            .payload_template
            .as_object()
            .unwrap()
            .keys()
            .map(|k| k.as_str())
            .collect();
        assert_eq!(keys, vec!["serialNumber", "action", "orderId", "orderUpdateId"]);
    }

    #[test]
    fn test_round_trip_preserves_definition() {
        let definition = parse_document(RECIPE).unwrap();
        let serialized = serde_yaml::to_string(&definition).unwrap();
        let reparsed: SequenceDefinition = serde_yaml::from_str(&serialized).unwrap();
        assert_eq!(reparsed, definition);
    }

    #[test]
    fn test_empty_steps_rejected() {
        let err = parse_document("name: empty\nsteps: []\n").unwrap_err();
        assert!(err.to_string().contains("steps"));
    }

    #[test]
    fn test_unresolvable_topic_placeholder_rejected() {
        let recipe = r#"
name: bad_topic
steps:
  - name: GO
    topic: module/v1/ff/{{unknown_serial}}/order
    payload: {}
"#;
        let err = parse_document(recipe).unwrap_err();
        assert!(err.to_string().contains("unknown_serial"));
    }

    #[test]
    fn test_injected_keys_allowed_in_topic() {
        let recipe = r#"
name: injected_ok
steps:
  - name: GO
    topic: module/v1/ff/EXAMPLE/order/{{orderId}}
    payload: {}
"#;
        assert!(parse_document(recipe).is_ok());
    }
}
