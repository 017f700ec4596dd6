//! Definition validation.
//!
//! Rejection happens at load time, never mid-run: empty step lists,
//! colliding step indices, and topic placeholders that cannot resolve
//! from the declared context defaults plus the engine-injected keys.

use std::collections::HashSet;

use apsflow_core::{placeholder_names, SequenceDefinition, WaitIntent, INJECTED_KEYS};

use crate::catalog::CatalogError;

/// Upper bound for declared wait durations: one year in seconds.
const MAX_WAIT_SECS: f64 = 31_536_000.0;

pub fn validate_definition(definition: &SequenceDefinition) -> Result<(), CatalogError> {
    if definition.name.trim().is_empty() {
        return Err(invalid(definition, "name must not be empty"));
    }

    if definition.steps.is_empty() {
        return Err(invalid(definition, "steps must not be empty"));
    }

    let mut seen = HashSet::new();
    for step in &definition.steps {
        if step.step_index == 0 {
            return Err(invalid(
                definition,
                format!("step '{}' has index 0; indices are 1-based", step.name),
            ));
        }
        if !seen.insert(step.step_index) {
            return Err(invalid(
                definition,
                format!("step index {} collides", step.step_index),
            ));
        }

        match &step.wait_intent {
            Some(WaitIntent::Timeout { duration_s }) => {
                check_wait_secs(definition, &step.name, *duration_s)?;
            }
            Some(WaitIntent::Message {
                timeout_s: Some(seconds),
                ..
            }) => {
                check_wait_secs(definition, &step.name, *seconds)?;
            }
            _ => {}
        }

        let names = placeholder_names(&step.topic_template)
            .map_err(|e| invalid(definition, e.to_string()))?;
        for name in names {
            let declared = definition.context_defaults.contains_key(&name)
                || INJECTED_KEYS.contains(&name.as_str());
            if !declared {
                return Err(invalid(
                    definition,
                    format!(
                        "topic placeholder '{{{{{name}}}}}' in step '{}' is unresolvable",
                        step.name
                    ),
                ));
            }
        }
    }

    Ok(())
}

fn check_wait_secs(
    definition: &SequenceDefinition,
    step_name: &str,
    seconds: f64,
) -> Result<(), CatalogError> {
    if !seconds.is_finite() || seconds <= 0.0 || seconds > MAX_WAIT_SECS {
        return Err(invalid(
            definition,
            format!("step '{step_name}' declares an out-of-range wait of {seconds} seconds"),
        ));
    }
    Ok(())
}

fn invalid(definition: &SequenceDefinition, reason: impl Into<String>) -> CatalogError {
    CatalogError::InvalidDefinition {
        name: definition.name.clone(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apsflow_core::{SequenceStep, WaitIntent};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_colliding_step_indices_rejected() {
        let definition = SequenceDefinition::new(
            "dup",
            "",
            vec![
                SequenceStep::new(1, "A", "t", json!({})),
                SequenceStep::new(1, "B", "t", json!({})),
            ],
        );
        let err = validate_definition(&definition).unwrap_err();
        assert!(err.to_string().contains("collides"));
    }

    #[test]
    fn test_topic_placeholder_resolution_checked_against_defaults() {
        let step = SequenceStep::new(1, "GO", "m/{{serial}}/order", json!({}))
            .with_wait(WaitIntent::timeout(1.0));

        let bare = SequenceDefinition::new("r", "", vec![step.clone()]);
        assert!(validate_definition(&bare).is_err());

        let declared = SequenceDefinition::new("r", "", vec![step]).with_context_defaults(
            HashMap::from([("serial".to_string(), json!("ABC"))]),
        );
        assert!(validate_definition(&declared).is_ok());
    }

    #[test]
    fn test_out_of_range_wait_durations_rejected() {
        for seconds in [f64::NAN, f64::INFINITY, -1.0, 0.0, 1.0e300] {
            let definition = SequenceDefinition::new(
                "r",
                "",
                vec![SequenceStep::new(1, "GO", "m/order", json!({}))
                    .with_wait(WaitIntent::timeout(seconds))],
            );
            assert!(
                validate_definition(&definition).is_err(),
                "wait of {seconds} seconds was accepted"
            );
        }
    }

    #[test]
    fn test_message_wait_deadline_is_bounds_checked() {
        let gate = |timeout_s| {
            SequenceDefinition::new(
                "r",
                "",
                vec![SequenceStep::new(1, "GO", "m/order", json!({})).with_wait(
                    WaitIntent::Message {
                        topic_pattern: "m/state".to_string(),
                        required_subset: json!({"actionState": "IDLE"}),
                        timeout_s,
                    },
                )],
            )
        };
        assert!(validate_definition(&gate(Some(1.0e300))).is_err());
        assert!(validate_definition(&gate(Some(2.0))).is_ok());
        assert!(validate_definition(&gate(None)).is_ok());
    }

    #[test]
    fn test_payload_placeholders_are_not_checked_at_load() {
        // Payload placeholders may come from per-run overrides; they fail
        // the step at render time instead.
        let definition = SequenceDefinition::new(
            "r",
            "",
            vec![SequenceStep::new(
                1,
                "GO",
                "m/order",
                json!({"slot": "{{runtime_only}}"}),
            )],
        );
        assert!(validate_definition(&definition).is_ok());
    }
}
