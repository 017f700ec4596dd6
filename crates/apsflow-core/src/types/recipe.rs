//! Recipe value types
//!
//! A recipe (SequenceDefinition) is an ordered list of publish-then-wait
//! steps. Both the declarative YAML shape and programmatic factories
//! normalize into these types, so the engine only ever sees one shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Wait intent governing when a published step counts as complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitIntent {
    /// Advance after a fixed duration. Expiry is a normal advance
    /// trigger, not a failure: most modules ack out-of-band.
    Timeout {
        /// Upper bound in seconds, measured from arm time.
        duration_s: f64,
    },
    /// Advance when an inbound message on `topic_pattern` carries
    /// `required_subset` in its payload.
    Message {
        /// Exact-match topic. Wildcards live at the transport level only.
        topic_pattern: String,
        /// Partial payload tree; every key path and scalar in it must
        /// appear with equal value in the awaited message.
        #[serde(default)]
        required_subset: Value,
        /// Optional deadline racing the predicate; whichever fires first
        /// wins.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_s: Option<f64>,
    },
}

impl WaitIntent {
    /// Fixed-duration wait.
    pub fn timeout(duration_s: f64) -> Self {
        Self::Timeout { duration_s }
    }

    /// Message-gated wait on an exact topic with a payload subset.
    pub fn message(topic_pattern: impl Into<String>, required_subset: Value) -> Self {
        Self::Message {
            topic_pattern: topic_pattern.into(),
            required_subset,
            timeout_s: None,
        }
    }
}

/// One publish-then-wait unit of a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStep {
    /// Position within the sequence, 1-based, unique within the parent.
    pub step_index: u32,
    /// Human label, used only for logs and UI.
    pub name: String,
    /// Topic string with zero or more `{{name}}` placeholders.
    pub topic_template: String,
    /// Payload tree; placeholders may appear in any string leaf.
    pub payload_template: Value,
    /// Wait intent; when omitted the engine applies its configured
    /// default fixed-duration wait.
    #[serde(default)]
    pub wait_intent: Option<WaitIntent>,
}

impl SequenceStep {
    /// Create a step without an explicit wait intent.
    pub fn new(
        step_index: u32,
        name: impl Into<String>,
        topic_template: impl Into<String>,
        payload_template: Value,
    ) -> Self {
        Self {
            step_index,
            name: name.into(),
            topic_template: topic_template.into(),
            payload_template,
            wait_intent: None,
        }
    }

    /// Attach a wait intent.
    pub fn with_wait(mut self, intent: WaitIntent) -> Self {
        self.wait_intent = Some(intent);
        self
    }
}

/// One recipe: ordered steps plus default placeholder values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceDefinition {
    /// Unique within the catalog.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Ordered, non-empty list of steps.
    pub steps: Vec<SequenceStep>,
    /// Placeholder defaults, merged with per-run overrides at start.
    #[serde(default)]
    pub context_defaults: HashMap<String, Value>,
}

impl SequenceDefinition {
    /// Create a definition with no context defaults.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<SequenceStep>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps,
            context_defaults: HashMap::new(),
        }
    }

    /// Attach context defaults.
    pub fn with_context_defaults(mut self, defaults: HashMap<String, Value>) -> Self {
        self.context_defaults = defaults;
        self
    }

    /// Look up a step by its 1-based index.
    pub fn step(&self, step_index: u32) -> Option<&SequenceStep> {
        self.steps.iter().find(|s| s.step_index == step_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wait_intent_serde_shape() {
        let intent = WaitIntent::message("module/v1/ff/X/state", json!({"actionState": "IDLE"}));
        let text = serde_json::to_string(&intent).unwrap();
        assert!(text.contains("\"kind\":\"message\""));
        let back: WaitIntent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, intent);
    }

    #[test]
    fn test_definition_step_lookup() {
        let def = SequenceDefinition::new(
            "demo",
            "demo recipe",
            vec![
                SequenceStep::new(1, "PICK", "t", json!({})),
                SequenceStep::new(2, "DROP", "t", json!({})),
            ],
        );
        assert_eq!(def.step(2).map(|s| s.name.as_str()), Some("DROP"));
        assert!(def.step(3).is_none());
    }
}
